//! Staged ordered ring.
//!
//! Elements enter at the producer side, then pass through `N` processing
//! stages before the consumer side can dequeue them. Within a stage, threads
//! acquire ranges in ring order but may release them in any order; a stage's
//! tail only advances over a contiguous run of released ranges, so the next
//! stage (and finally the consumer) always sees elements in enqueue order.
//!
//! Every slot has a state word next to its element. Acquire marks the first
//! slot of the range `START | n`; release flips it to `FINISH | n`. Whoever
//! finds a stage tail sitting on a finished range (the releasing thread, the
//! next stage's acquirer, or the consumer) takes the tail's busy flag and
//! walks it forward, clearing the states it passes.
//!
//! Each element may carry a metadata value (`M`, `()` by default) that moves
//! with it and can be rewritten by any stage.

use core::cell::UnsafeCell;
use core::fmt;
use core::marker::PhantomData;
use core::mem::MaybeUninit;
use core::sync::atomic::{AtomicU32, Ordering, fence};

use crossbeam_utils::CachePadded;
use portable_atomic::AtomicU64;

use crate::codec::StageTail;
use crate::config::{Behavior, HTD_MAX_DIVISOR, SyncType};
use crate::copy;
use crate::error::RingError;
use crate::headtail::{HeadTail, HeadTailSnapshot, Published, Reservation, Side};
use crate::ring::{Transfer, request_len};

/// Largest capacity of a staged ring. Range lengths share a 32-bit state
/// word with two flag bits.
pub const MAX_STAGED_CAPACITY: u32 = 1 << 29;

const ST_START: u32 = 1 << 30;
const ST_FINISH: u32 = 1 << 31;
const ST_COUNT_MASK: u32 = ST_START - 1;

/// State word of the first slot of an acquired range: the finish token in the
/// low half, flags and length in the high half.
#[inline]
const fn state_word(ftoken: u32, stnum: u32) -> u64 {
    (ftoken as u64) | ((stnum as u64) << 32)
}

/// Token tying a range to its stage: the range head offset by the stage index.
#[inline]
const fn finish_token(head: u32, stage: u32) -> u32 {
    head.wrapping_add(stage)
}

/// Head and tail of one stage. The head is always moved by CAS.
struct Stage {
    head: AtomicU32,
    tail: AtomicU64,
}

impl Stage {
    fn new() -> Self {
        Self {
            head: AtomicU32::new(0),
            tail: AtomicU64::new(StageTail::at(0).pack()),
        }
    }

    #[inline]
    fn load_tail(&self, order: Ordering) -> StageTail {
        StageTail::unpack(self.tail.load(order))
    }

    /// Reserves up to `n` slots that the feeding boundary has published.
    fn move_head<P: Published + ?Sized>(
        &self,
        other: &P,
        n: u32,
        behavior: Behavior,
    ) -> Reservation {
        let mut old_head = self.head.load(Ordering::Relaxed);
        loop {
            // Head must be read before the feeding tail.
            fence(Ordering::Acquire);
            let entries = other.published_tail().wrapping_sub(old_head);
            let count = Reservation::clamp(n, entries, behavior);
            if count == 0 {
                return Reservation::empty(old_head, entries);
            }
            match self.head.compare_exchange_weak(
                old_head,
                old_head.wrapping_add(count),
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return Reservation::new(old_head, count, entries),
                Err(current) => old_head = current,
            }
        }
    }

    fn snapshot(&self) -> HeadTailSnapshot {
        let tail = self.load_tail(Ordering::Acquire);
        HeadTailSnapshot {
            head: self.head.load(Ordering::Acquire),
            tail: tail.pos,
            head_cnt: None,
            tail_cnt: None,
            htd_max: None,
        }
    }
}

impl Published for Stage {
    #[inline]
    fn published_tail(&self) -> u32 {
        self.load_tail(Ordering::Acquire).pos
    }
}

/// Builder for [`StagedRing`].
///
/// ```rust
/// use sluice_ring::{StagedRing, SyncType};
///
/// let ring = StagedRing::<u64>::builder(100, 2)
///     .producer(SyncType::MultiRts)
///     .build()
///     .unwrap();
/// assert_eq!(ring.capacity(), 100);
/// assert_eq!(ring.size(), 128);
/// ```
#[derive(Debug, Clone)]
pub struct StagedRingBuilder<T, M = ()> {
    capacity: u32,
    stages: u32,
    producer: SyncType,
    consumer: SyncType,
    producer_htd_max: Option<u32>,
    consumer_htd_max: Option<u32>,
    _marker: PhantomData<fn() -> (T, M)>,
}

impl<T: Copy, M: Copy + Default> StagedRingBuilder<T, M> {
    /// A ring of `capacity` elements with `stages` processing stages,
    /// multi-plain on both ends.
    pub fn new(capacity: u32, stages: u32) -> Self {
        Self {
            capacity,
            stages,
            producer: SyncType::MultiPlain,
            consumer: SyncType::MultiPlain,
            producer_htd_max: None,
            consumer_htd_max: None,
            _marker: PhantomData,
        }
    }

    /// Sets the producer discipline.
    pub fn producer(mut self, sync: SyncType) -> Self {
        self.producer = sync;
        self
    }

    /// Sets the consumer discipline.
    pub fn consumer(mut self, sync: SyncType) -> Self {
        self.consumer = sync;
        self
    }

    /// Sets the producer head-tail distance. Requires an RTS producer.
    pub fn producer_htd_max(mut self, max: u32) -> Self {
        self.producer_htd_max = Some(max);
        self
    }

    /// Sets the consumer head-tail distance. Requires an RTS consumer.
    pub fn consumer_htd_max(mut self, max: u32) -> Self {
        self.consumer_htd_max = Some(max);
        self
    }

    /// Validates the parameters and allocates the ring.
    pub fn build(self) -> Result<StagedRing<T, M>, RingError> {
        if core::mem::size_of::<T>() == 0 {
            return Err(RingError::ZeroSizedElement);
        }
        if self.stages == 0 {
            return Err(RingError::ZeroStages);
        }
        if self.capacity == 0 {
            return Err(RingError::ZeroCapacity);
        }
        if self.capacity > MAX_STAGED_CAPACITY {
            return Err(RingError::CapacityTooLarge(self.capacity));
        }
        if self.producer_htd_max.is_some() && self.producer != SyncType::MultiRts {
            return Err(RingError::NotRts);
        }
        if self.consumer_htd_max.is_some() && self.consumer != SyncType::MultiRts {
            return Err(RingError::NotRts);
        }
        Ok(StagedRing::from_builder(self))
    }
}

/// A bounded ring whose elements pass through ordered processing stages.
///
/// Producers [`enqueue`](Self::enqueue); stage workers
/// [`acquire`](Self::acquire) ranges from a stage, process them, and release
/// them through the returned [`StageReservation`]; consumers
/// [`dequeue`](Self::dequeue) what the last stage released. The ring order
/// is kept end to end even when a stage's workers finish out of order.
///
/// `capacity` need not be a power of two; storage is rounded up.
pub struct StagedRing<T, M = ()> {
    prod: CachePadded<Side>,
    cons: CachePadded<Side>,
    stages: Box<[CachePadded<Stage>]>,

    /// One word per slot; non-zero only on the first slot of an open range.
    state: Box<[AtomicU64]>,

    capacity: u32,
    size: u32,
    mask: u32,

    slots: Box<[UnsafeCell<MaybeUninit<T>>]>,
    meta: Box<[UnsafeCell<M>]>,
}

unsafe impl<T: Send, M: Send> Send for StagedRing<T, M> {}
unsafe impl<T: Send, M: Send> Sync for StagedRing<T, M> {}

impl<T: Copy, M: Copy + Default> StagedRing<T, M> {
    /// Creates a builder for a ring of `capacity` elements and `stages` stages.
    pub fn builder(capacity: u32, stages: u32) -> StagedRingBuilder<T, M> {
        StagedRingBuilder::new(capacity, stages)
    }

    /// Multi-plain on both ends.
    pub fn new(capacity: u32, stages: u32) -> Result<Self, RingError> {
        StagedRingBuilder::new(capacity, stages).build()
    }

    fn from_builder(builder: StagedRingBuilder<T, M>) -> Self {
        let capacity = builder.capacity;
        let size = capacity.next_power_of_two();
        let default_htd = capacity / HTD_MAX_DIVISOR;
        let prod = HeadTail::new(
            builder.producer,
            builder.producer_htd_max.unwrap_or(default_htd),
        );
        let cons = HeadTail::new(
            builder.consumer,
            builder.consumer_htd_max.unwrap_or(default_htd),
        );

        let mut slots = Vec::with_capacity(size as usize);
        slots.resize_with(size as usize, || UnsafeCell::new(MaybeUninit::uninit()));
        let mut meta = Vec::with_capacity(size as usize);
        meta.resize_with(size as usize, || UnsafeCell::new(M::default()));

        log::debug!(
            "staged ring created: capacity={} size={} stages={} elem_size={} meta_size={} producer={} consumer={}",
            capacity,
            size,
            builder.stages,
            core::mem::size_of::<T>(),
            core::mem::size_of::<M>(),
            builder.producer,
            builder.consumer,
        );

        StagedRing {
            prod: CachePadded::new(Side::new(prod, "producer")),
            cons: CachePadded::new(Side::new(cons, "consumer")),
            stages: (0..builder.stages)
                .map(|_| CachePadded::new(Stage::new()))
                .collect(),
            state: (0..size).map(|_| AtomicU64::new(0)).collect(),
            capacity,
            size,
            mask: size - 1,
            slots: slots.into_boxed_slice(),
            meta: meta.into_boxed_slice(),
        }
    }

    #[inline]
    fn base(&self) -> *mut T {
        UnsafeCell::raw_get(self.slots.as_ptr()).cast::<T>()
    }

    #[inline]
    fn meta_base(&self) -> *mut M {
        UnsafeCell::raw_get(self.meta.as_ptr())
    }

    #[inline]
    fn stage(&self, stage: u32) -> Result<&Stage, RingError> {
        self.stages
            .get(stage as usize)
            .map(|s| &**s)
            .ok_or(RingError::StageOutOfRange {
                stage,
                stages: self.stages.len() as u32,
            })
    }

    #[inline]
    fn last_stage(&self) -> u32 {
        self.stages.len() as u32 - 1
    }

    /// Enqueues elements from `items` for stage 0.
    pub fn enqueue(&self, items: &[T], behavior: Behavior) -> Transfer {
        let n = request_len(items.len());
        // SAFETY: `items` is valid for `n` reads.
        unsafe { self.enqueue_raw(items.as_ptr(), None, n, behavior) }
    }

    /// Enqueues elements together with their metadata. The request is the
    /// shorter of the two slices.
    pub fn enqueue_with_meta(&self, items: &[T], meta: &[M], behavior: Behavior) -> Transfer {
        let n = request_len(items.len().min(meta.len()));
        // SAFETY: both slices are valid for `n` reads.
        unsafe { self.enqueue_raw(items.as_ptr(), Some(meta.as_ptr()), n, behavior) }
    }

    /// Enqueues all of `items` or none; returns the number enqueued.
    #[inline]
    pub fn enqueue_bulk(&self, items: &[T]) -> u32 {
        self.enqueue(items, Behavior::Exact).count
    }

    /// Enqueues as many of `items` as fit; returns the number enqueued.
    #[inline]
    pub fn enqueue_burst(&self, items: &[T]) -> u32 {
        self.enqueue(items, Behavior::UpTo).count
    }

    /// # Safety
    ///
    /// `src` (and `meta`, if given) must be valid for `n` reads.
    unsafe fn enqueue_raw(
        &self,
        src: *const T,
        meta: Option<*const M>,
        n: u32,
        behavior: Behavior,
    ) -> Transfer {
        if n == 0 {
            return Transfer::default();
        }
        let _side = self.prod.enter();
        let r = self
            .prod
            .ht
            .move_head(&self.cons.ht, self.capacity, n, behavior);
        if r.count > 0 {
            // SAFETY: the reservation grants exclusive access to the range,
            // which is free of every stage and of the consumer.
            unsafe {
                copy::write(self.base(), self.mask, r.head, src, r.count);
                if let Some(meta) = meta {
                    copy::write(self.meta_base(), self.mask, r.head, meta, r.count);
                }
            }
            self.prod.ht.update_tail(&r);
        }
        Transfer {
            count: r.count,
            remaining: r.remaining(),
        }
    }

    /// Dequeues elements the last stage has released.
    pub fn dequeue(&self, out: &mut [T], behavior: Behavior) -> Transfer {
        let n = request_len(out.len());
        // SAFETY: `out` is valid for `n` writes.
        unsafe { self.dequeue_raw(out.as_mut_ptr(), None, n, behavior) }
    }

    /// Dequeues elements and their metadata. The request is the shorter of
    /// the two slices.
    pub fn dequeue_with_meta(
        &self,
        out: &mut [T],
        meta: &mut [M],
        behavior: Behavior,
    ) -> Transfer {
        let n = request_len(out.len().min(meta.len()));
        // SAFETY: both slices are valid for `n` writes.
        unsafe { self.dequeue_raw(out.as_mut_ptr(), Some(meta.as_mut_ptr()), n, behavior) }
    }

    /// Fills `out` completely or takes nothing; returns the number dequeued.
    #[inline]
    pub fn dequeue_bulk(&self, out: &mut [T]) -> u32 {
        self.dequeue(out, Behavior::Exact).count
    }

    /// Dequeues as many as are available into the front of `out`.
    #[inline]
    pub fn dequeue_burst(&self, out: &mut [T]) -> u32 {
        self.dequeue(out, Behavior::UpTo).count
    }

    /// # Safety
    ///
    /// `dst` (and `meta`, if given) must be valid for `n` writes.
    unsafe fn dequeue_raw(
        &self,
        dst: *mut T,
        meta: Option<*mut M>,
        n: u32,
        behavior: Behavior,
    ) -> Transfer {
        if n == 0 {
            return Transfer::default();
        }
        let _side = self.cons.enter();
        let last = self.last_stage();
        let feeder = &*self.stages[last as usize];
        let r = self.reserve_finalizing(last, n, behavior, |b| {
            self.cons.ht.move_head(feeder, 0, n, b)
        });
        if r.count > 0 {
            // SAFETY: the last stage released the range and we reserved it.
            unsafe {
                copy::read(self.base(), self.mask, r.head, dst, r.count);
                if let Some(meta) = meta {
                    copy::read(self.meta_base(), self.mask, r.head, meta, r.count);
                }
            }
            self.cons.ht.update_tail(&r);
        }
        Transfer {
            count: r.count,
            remaining: r.remaining(),
        }
    }

    /// Takes a range from `stage` and copies its elements into `out`.
    ///
    /// Stage 0 takes what producers published; later stages take what the
    /// previous stage released. The range stays owned by the returned
    /// reservation until it is released or dropped.
    pub fn acquire(
        &self,
        stage: u32,
        out: &mut [T],
        behavior: Behavior,
    ) -> Result<StageReservation<'_, T, M>, RingError> {
        let n = request_len(out.len());
        // SAFETY: `out` is valid for `n` writes.
        unsafe { self.acquire_raw(stage, out.as_mut_ptr(), None, n, behavior) }
    }

    /// Like [`acquire`](Self::acquire), also copying out metadata. The
    /// request is the shorter of the two slices.
    pub fn acquire_with_meta(
        &self,
        stage: u32,
        out: &mut [T],
        meta: &mut [M],
        behavior: Behavior,
    ) -> Result<StageReservation<'_, T, M>, RingError> {
        let n = request_len(out.len().min(meta.len()));
        // SAFETY: both slices are valid for `n` writes.
        unsafe { self.acquire_raw(stage, out.as_mut_ptr(), Some(meta.as_mut_ptr()), n, behavior) }
    }

    /// Acquires all of `out` or nothing.
    #[inline]
    pub fn acquire_bulk(
        &self,
        stage: u32,
        out: &mut [T],
    ) -> Result<StageReservation<'_, T, M>, RingError> {
        self.acquire(stage, out, Behavior::Exact)
    }

    /// Acquires as many as are ready, up to `out.len()`.
    #[inline]
    pub fn acquire_burst(
        &self,
        stage: u32,
        out: &mut [T],
    ) -> Result<StageReservation<'_, T, M>, RingError> {
        self.acquire(stage, out, Behavior::UpTo)
    }

    /// # Safety
    ///
    /// `dst` (and `meta`, if given) must be valid for `n` writes.
    unsafe fn acquire_raw(
        &self,
        stage: u32,
        dst: *mut T,
        meta: Option<*mut M>,
        n: u32,
        behavior: Behavior,
    ) -> Result<StageReservation<'_, T, M>, RingError> {
        let stg = self.stage(stage)?;
        let r = if n == 0 {
            Reservation::empty(stg.head.load(Ordering::Relaxed), 0)
        } else if stage == 0 {
            stg.move_head(&self.prod.ht, n, behavior)
        } else {
            let feeder = &*self.stages[stage as usize - 1];
            self.reserve_finalizing(stage - 1, n, behavior, |b| stg.move_head(feeder, n, b))
        };

        if r.count > 0 {
            let idx = (r.head & self.mask) as usize;
            let ftoken = finish_token(r.head, stage);
            debug_assert_eq!(
                self.state[idx].load(Ordering::Relaxed),
                0,
                "stage {stage} acquired slot {idx} with an open range on it"
            );
            self.state[idx].store(state_word(ftoken, ST_START | r.count), Ordering::Relaxed);
            // SAFETY: the previous stage released the range and this stage's
            // head move made it ours.
            unsafe {
                copy::read(self.base(), self.mask, r.head, dst, r.count);
                if let Some(meta) = meta {
                    copy::read(self.meta_base(), self.mask, r.head, meta, r.count);
                }
            }
        }

        Ok(StageReservation {
            ring: self,
            stage,
            head: r.head,
            count: r.count,
            remaining: r.remaining(),
            done: r.count == 0,
        })
    }

    /// Reserves against stage `feeder`'s tail, finalizing it once if an
    /// exact attempt comes back empty.
    fn reserve_finalizing(
        &self,
        feeder: u32,
        n: u32,
        behavior: Behavior,
        mut reserve: impl FnMut(Behavior) -> Reservation,
    ) -> Reservation {
        let r = reserve(Behavior::Exact);
        if r.count > 0 {
            return r;
        }
        let finalized = self.finalize(feeder, n.saturating_mul(2));
        let entries = r.entries.saturating_add(finalized);
        let required = match behavior {
            Behavior::Exact => n,
            Behavior::UpTo => 0,
        };
        if entries >= required {
            reserve(behavior)
        } else {
            Reservation::empty(r.head, entries)
        }
    }

    /// Marks a range finished and tries to advance its stage's tail.
    ///
    /// # Safety
    ///
    /// `(stage, head, n)` must describe an open range acquired from this
    /// ring, and `src`/`meta` must be valid for `n` reads.
    unsafe fn release_raw(
        &self,
        stage: u32,
        head: u32,
        n: u32,
        src: Option<*const T>,
        meta: Option<*const M>,
    ) {
        let idx = (head & self.mask) as usize;
        let ftoken = finish_token(head, stage);
        debug_assert_eq!(
            self.state[idx].load(Ordering::Relaxed),
            state_word(ftoken, ST_START | n),
            "stage {stage} released a range it does not hold at slot {idx}"
        );

        // SAFETY: the range is still exclusively ours.
        unsafe {
            if let Some(src) = src {
                copy::write(self.base(), self.mask, head, src, n);
            }
            if let Some(meta) = meta {
                copy::write(self.meta_base(), self.mask, head, meta, n);
            }
        }

        // Orders the element writes before the finish mark.
        self.state[idx].store(state_word(ftoken, ST_FINISH | n), Ordering::Release);

        if self.stages[stage as usize].load_tail(Ordering::Relaxed).pos == head {
            self.finalize(stage, self.capacity);
        }
    }

    /// Moves `stage`'s tail over up to `max` finished slots. Returns the
    /// number of slots passed, 0 if another thread holds the tail.
    fn finalize(&self, stage: u32, max: u32) -> u32 {
        let stg = &self.stages[stage as usize];
        let old = stg.load_tail(Ordering::Acquire);
        if old.busy {
            return 0;
        }
        let owned = StageTail {
            busy: true,
            pos: old.pos,
        };
        if stg
            .tail
            .compare_exchange(old.pack(), owned.pack(), Ordering::AcqRel, Ordering::Relaxed)
            .is_err()
        {
            return 0;
        }

        let head = stg.head.load(Ordering::Acquire);
        let limit = head.wrapping_sub(old.pos).min(max);
        let mut passed = 0;
        let mut tail = old.pos;
        while passed < limit {
            let idx = (tail & self.mask) as usize;
            let word = self.state[idx].load(Ordering::Acquire);
            let stnum = (word >> 32) as u32;
            if stnum & !ST_COUNT_MASK != ST_FINISH || word as u32 != finish_token(tail, stage) {
                break;
            }
            let k = stnum & ST_COUNT_MASK;
            self.state[idx].store(0, Ordering::Relaxed);
            passed += k;
            tail = tail.wrapping_add(k);
        }

        stg.tail.store(StageTail::at(tail).pack(), Ordering::Release);
        if passed > 0 {
            log::trace!("stage {stage} tail advanced by {passed} to {tail}");
        }
        passed
    }
}

impl<T, M> StagedRing<T, M> {
    /// Maximum number of elements the ring holds.
    #[inline]
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Allocated slots: the capacity rounded up to a power of two.
    #[inline]
    pub fn size(&self) -> u32 {
        self.size
    }

    /// Number of processing stages.
    #[inline]
    pub fn stages(&self) -> u32 {
        self.stages.len() as u32
    }

    /// Elements enqueued and not yet dequeued, in any stage.
    pub fn count(&self) -> u32 {
        let cons_tail = self.cons.ht.tail();
        let prod_tail = self.prod.ht.tail();
        prod_tail.wrapping_sub(cons_tail).min(self.capacity)
    }

    /// Number of free slots.
    pub fn free_count(&self) -> u32 {
        self.capacity - self.count()
    }

    /// Returns `true` if nothing is in flight.
    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// Producer discipline.
    pub fn producer_sync(&self) -> SyncType {
        self.prod.ht.sync_type()
    }

    /// Consumer discipline.
    pub fn consumer_sync(&self) -> SyncType {
        self.cons.ht.sync_type()
    }

    /// Current producer head and tail.
    pub fn producer_snapshot(&self) -> HeadTailSnapshot {
        self.prod.ht.snapshot()
    }

    /// Current consumer head and tail.
    pub fn consumer_snapshot(&self) -> HeadTailSnapshot {
        self.cons.ht.snapshot()
    }

    /// Current head and tail of `stage`.
    pub fn stage_snapshot(&self, stage: u32) -> Result<HeadTailSnapshot, RingError> {
        self.stages
            .get(stage as usize)
            .map(|s| s.snapshot())
            .ok_or(RingError::StageOutOfRange {
                stage,
                stages: self.stages.len() as u32,
            })
    }
}

impl<T, M> fmt::Debug for StagedRing<T, M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stages: Vec<_> = self.stages.iter().map(|s| s.snapshot()).collect();
        f.debug_struct("StagedRing")
            .field("capacity", &self.capacity)
            .field("size", &self.size)
            .field("elem_size", &core::mem::size_of::<T>())
            .field("meta_size", &core::mem::size_of::<M>())
            .field("producer_sync", &self.producer_sync())
            .field("consumer_sync", &self.consumer_sync())
            .field("producer", &self.producer_snapshot())
            .field("stages", &stages)
            .field("consumer", &self.consumer_snapshot())
            .field("used", &self.count())
            .field("avail", &self.free_count())
            .finish()
    }
}

/// A range owned by one stage, from [`StagedRing::acquire`].
///
/// Dropping the reservation releases the range unchanged. An empty
/// reservation holds nothing and releases nothing.
#[must_use = "the range is released as soon as the reservation is dropped"]
pub struct StageReservation<'a, T: Copy, M: Copy + Default = ()> {
    ring: &'a StagedRing<T, M>,
    stage: u32,
    head: u32,
    count: u32,
    remaining: u32,
    done: bool,
}

impl<T: Copy, M: Copy + Default> StageReservation<'_, T, M> {
    /// Number of elements acquired.
    #[inline]
    pub fn len(&self) -> u32 {
        self.count
    }

    /// `true` when nothing was acquired.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Elements still ready for this stage after the acquire.
    #[inline]
    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    /// Stage the range belongs to.
    #[inline]
    pub fn stage(&self) -> u32 {
        self.stage
    }

    /// Hands the range to the next stage unchanged.
    pub fn release(mut self) {
        // SAFETY: no element data is written.
        unsafe { self.finish(None, None) }
    }

    /// Overwrites the range with `items` and hands it to the next stage.
    ///
    /// # Panics
    ///
    /// If `items` is shorter than the reservation.
    pub fn release_with(mut self, items: &[T]) {
        assert!(
            items.len() >= self.count as usize,
            "release of {} elements with only {} items",
            self.count,
            items.len()
        );
        // SAFETY: `items` holds at least `count` elements.
        unsafe { self.finish(Some(items.as_ptr()), None) }
    }

    /// Overwrites the range's elements and metadata and hands it on.
    ///
    /// # Panics
    ///
    /// If either slice is shorter than the reservation.
    pub fn release_with_meta(mut self, items: &[T], meta: &[M]) {
        let n = self.count as usize;
        assert!(
            items.len() >= n && meta.len() >= n,
            "release of {n} elements with {} items and {} metadata values",
            items.len(),
            meta.len()
        );
        // SAFETY: both slices hold at least `count` elements.
        unsafe { self.finish(Some(items.as_ptr()), Some(meta.as_ptr())) }
    }

    /// # Safety
    ///
    /// `src`/`meta` must be valid for `count` reads.
    unsafe fn finish(&mut self, src: Option<*const T>, meta: Option<*const M>) {
        if self.done {
            return;
        }
        self.done = true;
        // SAFETY: the range is open and owned by this reservation.
        unsafe {
            self.ring
                .release_raw(self.stage, self.head, self.count, src, meta)
        }
    }
}

impl<T: Copy, M: Copy + Default> Drop for StageReservation<'_, T, M> {
    fn drop(&mut self) {
        // SAFETY: no element data is written.
        unsafe { self.finish(None, None) }
    }
}

impl<T: Copy, M: Copy + Default> fmt::Debug for StageReservation<'_, T, M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageReservation")
            .field("stage", &self.stage)
            .field("head", &self.head)
            .field("count", &self.count)
            .field("remaining", &self.remaining)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_bad_parameters() {
        assert_eq!(
            StagedRing::<u32>::new(8, 0).unwrap_err(),
            RingError::ZeroStages
        );
        assert_eq!(
            StagedRing::<u32>::new(0, 1).unwrap_err(),
            RingError::ZeroCapacity
        );
        assert_eq!(
            StagedRing::<u32>::new(MAX_STAGED_CAPACITY + 1, 1).unwrap_err(),
            RingError::CapacityTooLarge(MAX_STAGED_CAPACITY + 1)
        );
        assert_eq!(
            StagedRing::<()>::new(8, 1).unwrap_err(),
            RingError::ZeroSizedElement
        );
        let err = StagedRing::<u32>::builder(8, 1)
            .consumer(SyncType::MultiHts)
            .consumer_htd_max(1)
            .build()
            .unwrap_err();
        assert_eq!(err, RingError::NotRts);
    }

    #[test]
    fn states_are_cleared_after_finalize() {
        let ring = StagedRing::<u32>::new(8, 1).unwrap();
        assert_eq!(ring.enqueue_bulk(&[1, 2, 3]), 3);

        let mut out = [0u32; 2];
        let a = ring.acquire(0, &mut out, Behavior::Exact).unwrap();
        assert_eq!(ring.state[0].load(Ordering::Relaxed), state_word(0, ST_START | 2));
        a.release();
        assert!(ring.state.iter().all(|s| s.load(Ordering::Relaxed) == 0));
        assert_eq!(ring.stage_snapshot(0).unwrap().tail, 2);
    }

    #[test]
    fn busy_tail_is_not_finalized_twice() {
        let ring = StagedRing::<u32>::new(8, 1).unwrap();
        ring.enqueue_bulk(&[1, 2]);
        let mut out = [0u32; 2];
        let a = ring.acquire(0, &mut out, Behavior::Exact).unwrap();

        // Another thread holds the tail.
        let stg = &ring.stages[0];
        stg.tail.store(StageTail { busy: true, pos: 0 }.pack(), Ordering::Relaxed);
        a.release();
        assert_eq!(ring.stage_snapshot(0).unwrap().tail, 0);
        assert_eq!(ring.dequeue_burst(&mut out), 0);

        // Once it lets go, the finished range is picked up by the consumer.
        stg.tail.store(StageTail::at(0).pack(), Ordering::Relaxed);
        assert_eq!(ring.dequeue_burst(&mut out), 2);
        assert_eq!(out, [1, 2]);
    }

    #[test]
    fn empty_acquire_holds_nothing() {
        let ring = StagedRing::<u32>::new(4, 2).unwrap();
        let mut out = [0u32; 4];
        let r = ring.acquire(1, &mut out, Behavior::UpTo).unwrap();
        assert!(r.is_empty());
        drop(r);
        assert!(ring.state.iter().all(|s| s.load(Ordering::Relaxed) == 0));
    }
}
