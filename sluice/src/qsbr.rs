//! Quiescent-state-based reclamation.
//!
//! Writers call [`Qsbr::start`] after unlinking a resource and keep the
//! returned token; the resource may be freed once [`Qsbr::check`] reports that
//! every registered, online thread has passed a quiescent state at or after
//! that token. Readers pay one store per quiescent report and nothing per
//! access.
//!
//! Each thread owns one counter slot. Only the owner writes it; writers only
//! read it. Registration is tracked in a bitmap of 64-bit words so a check
//! visits registered threads only.

use core::fmt;
use core::sync::atomic::{AtomicU32, AtomicU64, Ordering, fence};
use std::time::{Duration, Instant};

use crossbeam_utils::{Backoff, CachePadded};

use crate::error::Error;

/// Counter value of a thread that is offline or unregistered.
const OFFLINE: u64 = 0;
/// First token handed out; never equal to [`OFFLINE`].
const TOKEN_INIT: u64 = 1;
const WORD_BITS: u32 = u64::BITS;

#[derive(Default)]
struct ThreadState {
    cnt: AtomicU64,
    lock_cnt: AtomicU32,
}

/// A QSBR domain for up to `max_threads` reader threads.
pub struct Qsbr {
    token: CachePadded<AtomicU64>,
    acked_token: CachePadded<AtomicU64>,
    num_threads: AtomicU32,
    max_threads: u32,
    reg_bitmap: Box<[AtomicU64]>,
    threads: Box<[CachePadded<ThreadState>]>,
}

impl Qsbr {
    /// Creates a domain with thread ids `0..max_threads`.
    pub fn new(max_threads: u32) -> Result<Self, Error> {
        if max_threads == 0 {
            return Err(Error::ZeroThreads);
        }
        let words = max_threads.div_ceil(WORD_BITS) as usize;
        let qsbr = Self {
            token: CachePadded::new(AtomicU64::new(TOKEN_INIT)),
            acked_token: CachePadded::new(AtomicU64::new(TOKEN_INIT - 1)),
            num_threads: AtomicU32::new(0),
            max_threads,
            reg_bitmap: (0..words).map(|_| AtomicU64::new(0)).collect(),
            threads: (0..max_threads)
                .map(|_| CachePadded::new(ThreadState::default()))
                .collect(),
        };
        log::debug!("qsbr domain created: max_threads={max_threads}, bitmap_words={words}");
        Ok(qsbr)
    }

    /// Largest thread id plus one.
    pub fn max_threads(&self) -> u32 {
        self.max_threads
    }

    /// Currently registered threads.
    pub fn num_threads(&self) -> u32 {
        self.num_threads.load(Ordering::Relaxed)
    }

    /// Most recently issued token.
    pub fn token(&self) -> u64 {
        self.token.load(Ordering::Acquire)
    }

    /// Every token up to this one is known to be complete.
    pub fn acked_token(&self) -> u64 {
        self.acked_token.load(Ordering::Acquire)
    }

    /// Returns `true` if `id` is registered. Out-of-range ids are never registered.
    pub fn is_registered(&self, id: u32) -> bool {
        if id >= self.max_threads {
            return false;
        }
        let (word, mask) = bit(id);
        self.reg_bitmap[word].load(Ordering::Acquire) & mask != 0
    }

    /// Registers `id` and brings it online.
    ///
    /// The thread takes part in every grace period started after this returns.
    pub fn register(&self, id: u32) -> Result<(), Error> {
        self.check_id(id)?;
        let (word, mask) = bit(id);
        let prev = self.reg_bitmap[word].fetch_or(mask, Ordering::AcqRel);
        if prev & mask != 0 {
            return Err(Error::AlreadyRegistered(id));
        }
        self.num_threads.fetch_add(1, Ordering::Relaxed);
        self.thread_online(id);
        log::debug!("qsbr: thread {id} registered");
        Ok(())
    }

    /// Takes `id` offline and removes it from the registry.
    pub fn unregister(&self, id: u32) -> Result<(), Error> {
        self.check_id(id)?;
        if !self.is_registered(id) {
            return Err(Error::NotRegistered(id));
        }
        let state = self.state(id);
        let count = state.lock_cnt.load(Ordering::Acquire);
        if count != 0 {
            return Err(Error::LockHeld { id, count });
        }

        state.cnt.store(OFFLINE, Ordering::Release);
        let (word, mask) = bit(id);
        let prev = self.reg_bitmap[word].fetch_and(!mask, Ordering::Release);
        if prev & mask == 0 {
            return Err(Error::NotRegistered(id));
        }
        self.num_threads.fetch_sub(1, Ordering::Relaxed);
        log::debug!("qsbr: thread {id} unregistered");
        Ok(())
    }

    /// Resumes reporting for a registered thread that went offline.
    ///
    /// # Panics
    ///
    /// Panics if `id >= max_threads`.
    pub fn thread_online(&self, id: u32) {
        let t = self.token.load(Ordering::Acquire);
        self.state(id).cnt.store(t, Ordering::Relaxed);
        // The counter must be visible to writers before this thread reads
        // any shared data.
        fence(Ordering::SeqCst);
    }

    /// Stops reporting; checks skip this thread until it comes back online.
    ///
    /// # Panics
    ///
    /// Panics if `id >= max_threads`.
    pub fn thread_offline(&self, id: u32) {
        self.state(id).cnt.store(OFFLINE, Ordering::Release);
    }

    /// Enters a read-side critical section. Nests.
    pub fn lock(&self, id: u32) -> Result<(), Error> {
        self.check_id(id)?;
        self.lock_unchecked(id);
        Ok(())
    }

    #[inline]
    fn lock_unchecked(&self, id: u32) {
        self.state(id).lock_cnt.fetch_add(1, Ordering::Acquire);
    }

    /// Leaves the innermost read-side critical section.
    pub fn unlock(&self, id: u32) -> Result<(), Error> {
        self.check_id(id)?;
        self.state(id)
            .lock_cnt
            .fetch_update(Ordering::Release, Ordering::Relaxed, |c| c.checked_sub(1))
            .map(|_| ())
            .map_err(|_| Error::NotLocked(id))
    }

    /// Current read-side nesting depth of `id`.
    pub fn lock_count(&self, id: u32) -> Result<u32, Error> {
        self.check_id(id)?;
        Ok(self.state(id).lock_cnt.load(Ordering::Relaxed))
    }

    /// Opens a grace period and returns its token.
    ///
    /// Call after the resource is unreachable for new readers.
    pub fn start(&self) -> u64 {
        let t = self.token.fetch_add(1, Ordering::Release) + 1;
        // Pairs with the fence in `thread_online`: either the thread sees
        // the unlinked state or this writer sees its counter.
        fence(Ordering::SeqCst);
        t
    }

    /// Reports that `id` holds no references to shared data.
    ///
    /// # Panics
    ///
    /// Panics if `id >= max_threads`.
    pub fn quiescent(&self, id: u32) {
        let state = self.state(id);
        debug_assert_eq!(
            state.lock_cnt.load(Ordering::Relaxed),
            0,
            "thread {id} reported a quiescent state inside a read-side critical section"
        );
        let t = self.token.load(Ordering::Acquire);
        state.cnt.store(t, Ordering::Release);
    }

    /// Returns `true` once every online thread reported at or after `token`.
    ///
    /// With `wait` set, spins until that holds. Threads that go offline or
    /// unregister during the wait stop holding it up.
    pub fn check(&self, token: u64, wait: bool) -> bool {
        if token <= self.acked_token.load(Ordering::Acquire) {
            return true;
        }

        let backoff = Backoff::new();
        let mut min_cnt = u64::MAX;
        for (w, word) in self.reg_bitmap.iter().enumerate() {
            let mut bmap = word.load(Ordering::Acquire);
            while bmap != 0 {
                let b = bmap.trailing_zeros();
                let id = w as u32 * WORD_BITS + b;
                let cnt = self.state(id).cnt.load(Ordering::Acquire);
                if cnt != OFFLINE && cnt < token {
                    if !wait {
                        return false;
                    }
                    backoff.snooze();
                    // The thread may have unregistered meanwhile.
                    bmap = word.load(Ordering::Acquire) & (u64::MAX << b);
                    continue;
                }
                if cnt != OFFLINE {
                    min_cnt = min_cnt.min(cnt);
                }
                bmap &= bmap - 1;
            }
        }

        // With nobody online there is no counter to vouch for a token, and
        // `token` itself may never have been issued.
        if min_cnt != u64::MAX {
            self.acked_token.fetch_max(min_cnt, Ordering::AcqRel);
        }
        true
    }

    /// Polls [`Qsbr::check`] until it succeeds or `timeout` elapses.
    pub fn check_timeout(&self, token: u64, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let backoff = Backoff::new();
        loop {
            if self.check(token, false) {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            backoff.snooze();
        }
    }

    /// Waits for a full grace period.
    ///
    /// When the caller is itself a registered reader, pass its id so its own
    /// quiescent state is reported first; otherwise it would wait on itself.
    pub fn synchronize(&self, id: Option<u32>) {
        let token = self.start();
        if let Some(id) = id.filter(|&id| self.is_registered(id)) {
            self.quiescent(id);
        }
        self.check(token, true);
    }

    /// Registers `id` and returns a handle that unregisters on drop.
    pub fn reader(&self, id: u32) -> Result<Reader<'_>, Error> {
        self.register(id)?;
        Ok(Reader { qsbr: self, id })
    }

    fn check_id(&self, id: u32) -> Result<(), Error> {
        if id >= self.max_threads {
            return Err(Error::ThreadIdOutOfRange {
                id,
                max: self.max_threads,
            });
        }
        Ok(())
    }

    #[inline]
    fn state(&self, id: u32) -> &ThreadState {
        &self.threads[id as usize]
    }

    fn registered_ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.reg_bitmap.iter().enumerate().flat_map(|(w, word)| {
            let bmap = word.load(Ordering::Acquire);
            (0..WORD_BITS)
                .filter(move |b| bmap & (1 << b) != 0)
                .map(move |b| w as u32 * WORD_BITS + b)
        })
    }
}

#[inline]
fn bit(id: u32) -> (usize, u64) {
    ((id / WORD_BITS) as usize, 1u64 << (id % WORD_BITS))
}

struct ThreadDump<'a>(&'a Qsbr);

impl fmt::Debug for ThreadDump<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for id in self.0.registered_ids() {
            let state = self.0.state(id);
            map.entry(
                &id,
                &format_args!(
                    "cnt={} locks={}",
                    state.cnt.load(Ordering::Relaxed),
                    state.lock_cnt.load(Ordering::Relaxed)
                ),
            );
        }
        map.finish()
    }
}

impl fmt::Debug for Qsbr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Qsbr")
            .field("max_threads", &self.max_threads)
            .field("num_threads", &self.num_threads())
            .field("token", &self.token())
            .field("acked_token", &self.acked_token())
            .field("threads", &ThreadDump(self))
            .finish()
    }
}

/// A registered reader thread. Unregisters on drop.
#[derive(Debug)]
pub struct Reader<'a> {
    qsbr: &'a Qsbr,
    id: u32,
}

impl<'a> Reader<'a> {
    /// Thread id this handle registered.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Domain the reader belongs to.
    pub fn domain(&self) -> &'a Qsbr {
        self.qsbr
    }

    /// Reports a quiescent state.
    pub fn quiescent(&self) {
        self.qsbr.quiescent(self.id);
    }

    /// Goes offline; see [`Qsbr::thread_offline`].
    pub fn offline(&self) {
        self.qsbr.thread_offline(self.id);
    }

    /// Comes back online; see [`Qsbr::thread_online`].
    pub fn online(&self) {
        self.qsbr.thread_online(self.id);
    }

    /// Enters a read-side critical section until the guard drops.
    pub fn lock(&self) -> ReadLock<'_> {
        // A registered id is always in range.
        self.qsbr.lock_unchecked(self.id);
        ReadLock {
            qsbr: self.qsbr,
            id: self.id,
        }
    }
}

impl Drop for Reader<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.qsbr.unregister(self.id) {
            log::warn!("qsbr: reader {} failed to unregister: {e}", self.id);
        }
    }
}

/// Read-side critical section held by a [`Reader`].
#[must_use = "the critical section ends when the guard drops"]
#[derive(Debug)]
pub struct ReadLock<'r> {
    qsbr: &'r Qsbr,
    id: u32,
}

impl Drop for ReadLock<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.qsbr.unlock(self.id) {
            log::warn!("qsbr: reader {} failed to leave its critical section: {e}", self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_starts_above_offline() {
        let q = Qsbr::new(1).unwrap();
        assert_eq!(q.token(), TOKEN_INIT);
        assert_eq!(q.start(), TOKEN_INIT + 1);
        assert_eq!(q.token(), TOKEN_INIT + 1);
    }

    #[test]
    fn bitmap_spans_words() {
        let q = Qsbr::new(130).unwrap();
        assert_eq!(q.reg_bitmap.len(), 3);
        for id in [0, 63, 64, 129] {
            q.register(id).unwrap();
        }
        assert_eq!(q.registered_ids().collect::<Vec<_>>(), vec![0, 63, 64, 129]);
        assert_eq!(q.num_threads(), 4);
    }

    #[test]
    fn check_with_nobody_online_succeeds_without_acking() {
        let q = Qsbr::new(4).unwrap();
        let before = q.acked_token();
        let t = q.start();
        assert!(q.check(t, false));
        assert_eq!(q.acked_token(), before);
    }

    #[test]
    fn lock_rejects_out_of_range_id() {
        let q = Qsbr::new(2).unwrap();
        assert_eq!(
            q.lock(2).unwrap_err(),
            Error::ThreadIdOutOfRange { id: 2, max: 2 }
        );
        assert_eq!(
            q.unlock(2).unwrap_err(),
            Error::ThreadIdOutOfRange { id: 2, max: 2 }
        );
        q.lock(1).unwrap();
        assert_eq!(q.lock_count(1), Ok(1));
        q.unlock(1).unwrap();
    }

    #[test]
    fn read_lock_drop_survives_unbalanced_unlock() {
        let q = Qsbr::new(1).unwrap();
        let r = q.reader(0).unwrap();
        let cs = r.lock();
        // Someone else closed the section behind the guard's back.
        q.unlock(0).unwrap();
        drop(cs);
        assert_eq!(q.lock_count(0), Ok(0));
    }

    #[test]
    fn acked_token_is_minimum_counter() {
        let q = Qsbr::new(2).unwrap();
        q.register(0).unwrap();
        q.register(1).unwrap();
        let t1 = q.start();
        q.quiescent(0);
        let t2 = q.start();
        q.quiescent(1);
        assert!(q.check(t1, false));
        assert_eq!(q.acked_token(), t1);
        assert!(!q.check(t2, false));
    }
}
