//! Deferred reclamation on top of a ring.
//!
//! Writers hand unlinked resources to [`DeferQueue::enqueue`], which stamps
//! each one with a fresh grace-period token. [`DeferQueue::reclaim`] frees
//! entries in FIFO order and stops at the first one whose grace period is
//! still open: tokens grow along the queue, so nothing behind it can be
//! complete either.

use core::fmt;
use core::marker::PhantomData;
use core::mem::MaybeUninit;
use std::sync::Arc;

use sluice_ring::{Behavior, Ring, SyncType};

use crate::error::Error;
use crate::grace::GracePeriod;
use crate::qsbr::Qsbr;

/// Frees resources whose grace period has ended.
///
/// Any `Fn(&[T]) + Send + Sync` closure is a reclaimer; its captures play the
/// role of a callback context.
///
/// Queue elements are `Copy`, so `T` is a handle to the resource rather than
/// the resource itself: a slab index, a raw or `NonNull` pointer wrapper, a
/// file descriptor. The queue never drops anything a handle refers to; from
/// `enqueue` on, releasing the resource is the reclaimer's job, and a handle
/// left in the queue when it is dropped refers to a resource that is leaked.
pub trait Reclaimer<T>: Send + Sync {
    /// Releases `items`. Called exactly once per enqueued element.
    fn reclaim(&self, items: &[T]);
}

impl<T, F> Reclaimer<T> for F
where
    F: Fn(&[T]) + Send + Sync,
{
    #[inline]
    fn reclaim(&self, items: &[T]) {
        self(items)
    }
}

/// Which threads may call into a [`DeferQueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MtSafety {
    /// A single thread enqueues and reclaims. Concurrent use panics.
    SingleProducer,
    /// Any thread may enqueue or reclaim.
    #[default]
    MultiProducer,
}

impl MtSafety {
    fn ring_sync(self) -> (SyncType, SyncType) {
        match self {
            MtSafety::SingleProducer => (SyncType::Single, SyncType::Single),
            MtSafety::MultiProducer => (SyncType::MultiPlain, SyncType::MultiHts),
        }
    }
}

/// Outcome of one [`DeferQueue::reclaim`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReclaimStats {
    /// Elements handed to the reclaimer.
    pub freed: u32,
    /// Elements still queued.
    pub pending: u32,
    /// Free slots left for enqueue.
    pub available: u32,
}

#[derive(Clone, Copy)]
struct Entry<T> {
    token: u64,
    item: T,
}

/// Builder for [`DeferQueue`].
pub struct DeferQueueBuilder<T, R, G> {
    domain: G,
    reclaimer: R,
    size: u32,
    trigger_reclaim_limit: u32,
    max_reclaim_size: u32,
    mt_safety: MtSafety,
    _marker: PhantomData<fn(T)>,
}

impl<T, R, G> DeferQueueBuilder<T, R, G>
where
    T: Copy + Send,
    R: Reclaimer<T>,
    G: GracePeriod,
{
    /// Minimum number of queued elements. Rounded up to a power of two.
    pub fn size(mut self, size: u32) -> Self {
        self.size = size;
        self
    }

    /// Enqueue reclaims inline once more than this many elements are queued.
    ///
    /// Default 0: every enqueue into a non-empty queue tries to reclaim.
    pub fn trigger_reclaim_limit(mut self, limit: u32) -> Self {
        self.trigger_reclaim_limit = limit;
        self
    }

    /// Upper bound on elements freed by one inline reclaim. Default unbounded.
    pub fn max_reclaim_size(mut self, max: u32) -> Self {
        self.max_reclaim_size = max;
        self
    }

    /// Default [`MtSafety::MultiProducer`].
    pub fn mt_safety(mut self, mt_safety: MtSafety) -> Self {
        self.mt_safety = mt_safety;
        self
    }

    /// Validates the parameters and allocates the queue.
    pub fn build(self) -> Result<DeferQueue<T, R, G>, Error> {
        if self.size == 0 {
            return Err(Error::InvalidConfig("size must be non-zero"));
        }
        if self.max_reclaim_size == 0 {
            return Err(Error::InvalidConfig("max_reclaim_size must be non-zero"));
        }
        let capacity = self
            .size
            .checked_next_power_of_two()
            .ok_or(Error::InvalidConfig("size too large"))?;
        let (prod, cons) = self.mt_safety.ring_sync();
        let ring = Ring::with_sync(capacity, prod, cons)?;

        log::debug!(
            "defer queue created: size={}, capacity={capacity}, trigger={}, max_reclaim={}, {:?}",
            self.size,
            self.trigger_reclaim_limit,
            self.max_reclaim_size,
            self.mt_safety
        );
        Ok(DeferQueue {
            ring,
            domain: self.domain,
            reclaimer: self.reclaimer,
            trigger_reclaim_limit: self.trigger_reclaim_limit,
            max_reclaim_size: self.max_reclaim_size,
        })
    }
}

/// FIFO of unlinked resources waiting for their grace period.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicU32, Ordering};
/// use sluice::{DeferQueue, Qsbr};
///
/// let qsbr = Arc::new(Qsbr::new(4).unwrap());
/// let freed = Arc::new(AtomicU32::new(0));
/// let counter = freed.clone();
///
/// let dq = DeferQueue::builder(qsbr.clone(), move |items: &[u32]| {
///     counter.fetch_add(items.len() as u32, Ordering::Relaxed);
/// })
/// .size(16)
/// .build()
/// .unwrap();
///
/// let reader = qsbr.reader(0).unwrap();
/// dq.enqueue(7).unwrap();
/// assert_eq!(dq.reclaim(16).freed, 0);
///
/// reader.quiescent();
/// assert_eq!(dq.reclaim(16).freed, 1);
/// assert_eq!(freed.load(Ordering::Relaxed), 1);
/// ```
pub struct DeferQueue<T, R, G = Arc<Qsbr>>
where
    T: Copy + Send,
    R: Reclaimer<T>,
    G: GracePeriod,
{
    ring: Ring<Entry<T>>,
    domain: G,
    reclaimer: R,
    trigger_reclaim_limit: u32,
    max_reclaim_size: u32,
}

impl<T, R, G> DeferQueue<T, R, G>
where
    T: Copy + Send,
    R: Reclaimer<T>,
    G: GracePeriod,
{
    /// Starts a builder; `size` must be set before [`DeferQueueBuilder::build`].
    pub fn builder(domain: G, reclaimer: R) -> DeferQueueBuilder<T, R, G> {
        DeferQueueBuilder {
            domain,
            reclaimer,
            size: 0,
            trigger_reclaim_limit: 0,
            max_reclaim_size: u32::MAX,
            mt_safety: MtSafety::default(),
            _marker: PhantomData,
        }
    }

    /// Queues `item` for release after the current grace period.
    ///
    /// On [`Error::QueueFull`] the item is neither queued nor freed; it is
    /// still owned by the caller.
    pub fn enqueue(&self, item: T) -> Result<(), Error> {
        let token = self.domain.start();

        if self.ring.count() > self.trigger_reclaim_limit {
            let stats = self.reclaim(self.max_reclaim_size);
            log::trace!(
                "defer queue inline reclaim: freed={}, pending={}",
                stats.freed,
                stats.pending
            );
        }

        self.ring
            .push(Entry { token, item })
            .map_err(|_| Error::QueueFull)
    }

    /// Frees up to `n` elements whose grace period has ended, oldest first.
    pub fn reclaim(&self, n: u32) -> ReclaimStats {
        let mut freed = 0;
        while freed < n {
            let mut slot = [MaybeUninit::<Entry<T>>::uninit()];
            let Ok(peek) = self.ring.dequeue_start_uninit(&mut slot, Behavior::Exact) else {
                unreachable!("defer queue consumer side is always peekable");
            };
            if peek.is_empty() {
                break;
            }
            // SAFETY: a non-empty peek initialized the first slot.
            let entry = unsafe { slot[0].assume_init() };
            if !self.domain.is_complete(entry.token) {
                peek.commit(0);
                break;
            }
            peek.commit(1);
            self.reclaimer.reclaim(core::slice::from_ref(&entry.item));
            freed += 1;
        }

        ReclaimStats {
            freed,
            pending: self.ring.count(),
            available: self.ring.free_count(),
        }
    }

    /// Frees everything reclaimable and destroys the queue.
    ///
    /// If some entries still wait for readers, the queue comes back with
    /// [`Error::PendingReclaims`] so the caller can retry later.
    pub fn delete(self) -> Result<(), (Self, Error)> {
        let stats = self.reclaim(u32::MAX);
        if stats.pending > 0 {
            log::warn!(
                "defer queue delete refused: {} entries pending",
                stats.pending
            );
            return Err((
                self,
                Error::PendingReclaims {
                    pending: stats.pending,
                },
            ));
        }
        log::debug!("defer queue deleted");
        Ok(())
    }

    /// Elements waiting to be freed.
    pub fn len(&self) -> u32 {
        self.ring.count()
    }

    /// Returns `true` if nothing waits to be freed.
    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    /// Maximum number of queued elements.
    pub fn capacity(&self) -> u32 {
        self.ring.capacity()
    }

    /// Grace-period source the queue stamps entries with.
    pub fn domain(&self) -> &G {
        &self.domain
    }
}

impl<T, R, G> Drop for DeferQueue<T, R, G>
where
    T: Copy + Send,
    R: Reclaimer<T>,
    G: GracePeriod,
{
    fn drop(&mut self) {
        let stats = self.reclaim(u32::MAX);
        if stats.pending > 0 {
            log::warn!(
                "defer queue dropped with {} entries still in a grace period; they are not freed",
                stats.pending
            );
        }
    }
}

impl<T, R, G> fmt::Debug for DeferQueue<T, R, G>
where
    T: Copy + Send,
    R: Reclaimer<T>,
    G: GracePeriod,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferQueue")
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .field("trigger_reclaim_limit", &self.trigger_reclaim_limit)
            .field("max_reclaim_size", &self.max_reclaim_size)
            .field("producer", &self.ring.producer_sync())
            .field("consumer", &self.ring.consumer_sync())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn size_rounds_up() {
        let q = Qsbr::new(1).unwrap();
        let dq = DeferQueue::builder(&q, |_: &[u64]| {}).size(100).build().unwrap();
        assert_eq!(dq.capacity(), 128);
        assert!(dq.is_empty());
    }

    #[test]
    fn rejects_bad_config() {
        let q = Qsbr::new(1).unwrap();
        let err = DeferQueue::builder(&q, |_: &[u64]| {}).build().unwrap_err();
        assert_eq!(err, Error::InvalidConfig("size must be non-zero"));
        let err = DeferQueue::builder(&q, |_: &[u64]| {})
            .size(8)
            .max_reclaim_size(0)
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
        let err = DeferQueue::builder(&q, |_: &[u64]| {})
            .size(u32::MAX)
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }

    #[test]
    fn mt_safety_selects_ring_sync() {
        let q = Qsbr::new(1).unwrap();
        let dq = DeferQueue::builder(&q, |_: &[u8]| {})
            .size(4)
            .mt_safety(MtSafety::SingleProducer)
            .build()
            .unwrap();
        assert_eq!(dq.ring.producer_sync(), SyncType::Single);
        assert_eq!(dq.ring.consumer_sync(), SyncType::Single);

        let dq = DeferQueue::builder(&q, |_: &[u8]| {}).size(4).build().unwrap();
        assert_eq!(dq.ring.producer_sync(), SyncType::MultiPlain);
        assert_eq!(dq.ring.consumer_sync(), SyncType::MultiHts);
    }

    #[test]
    fn unregistered_domain_frees_immediately() {
        let q = Qsbr::new(1).unwrap();
        let freed = Mutex::new(Vec::new());
        let dq = DeferQueue::builder(&q, |items: &[u32]| {
            freed.lock().unwrap().extend_from_slice(items)
        })
        .size(8)
        .trigger_reclaim_limit(8)
        .build()
        .unwrap();
        dq.enqueue(1).unwrap();
        dq.enqueue(2).unwrap();
        let stats = dq.reclaim(u32::MAX);
        assert_eq!(
            stats,
            ReclaimStats {
                freed: 2,
                pending: 0,
                available: 8
            }
        );
        drop(dq);
        assert_eq!(*freed.lock().unwrap(), vec![1, 2]);
    }
}
