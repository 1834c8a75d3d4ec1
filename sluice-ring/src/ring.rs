use core::cell::UnsafeCell;
use core::fmt;
use core::mem::MaybeUninit;
use core::slice;

use crossbeam_utils::CachePadded;

use crate::config::{Behavior, HTD_MAX_DIVISOR, RingBuilder, SyncType};
use crate::copy;
use crate::error::RingError;
use crate::headtail::{HeadTail, HeadTailSnapshot, Reservation, Side};

/// Largest supported capacity. Index differences are taken modulo 2^32, so
/// the ring may never hold more than half the index space.
pub const MAX_CAPACITY: u32 = 1 << 31;

/// Outcome of a data-path operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Transfer {
    /// Elements moved.
    pub count: u32,
    /// Free slots left after an enqueue, or entries left after a dequeue.
    ///
    /// Zero when the request itself was empty: such calls return without
    /// reading any shared state.
    pub remaining: u32,
}

/// A bounded lock-free ring of `Copy` elements.
///
/// Each side (producer, consumer) is synchronized independently with one of
/// the [`SyncType`] disciplines. Operations never block: a request that
/// cannot be met returns fewer elements (or none), and the only waits are the
/// bounded spins a discipline needs to order publication.
pub struct Ring<T> {
    /// Producer head/tail.
    prod: CachePadded<Side>,

    /// Consumer head/tail.
    cons: CachePadded<Side>,

    /// Usable slots.
    capacity: u32,

    /// Storage slots; a power of two no smaller than `capacity`.
    size: u32,

    /// `size - 1`.
    mask: u32,

    /// Element storage.
    slots: Box<[UnsafeCell<MaybeUninit<T>>]>,
}

unsafe impl<T: Send> Send for Ring<T> {}
unsafe impl<T: Send> Sync for Ring<T> {}

impl<T: Copy> Ring<T> {
    /// Creates a builder for a ring of `capacity` elements.
    pub fn builder(capacity: u32) -> RingBuilder<T> {
        RingBuilder::new(capacity)
    }

    /// Creates a ring that is multi-producer and multi-consumer with the
    /// plain discipline on both sides.
    pub fn new(capacity: u32) -> Result<Self, RingError> {
        RingBuilder::new(capacity).build()
    }

    /// Creates a ring with the given disciplines and default tuning.
    pub fn with_sync(capacity: u32, producer: SyncType, consumer: SyncType) -> Result<Self, RingError> {
        RingBuilder::new(capacity)
            .producer(producer)
            .consumer(consumer)
            .build()
    }

    pub(crate) fn from_builder(builder: RingBuilder<T>, size: u32) -> Self {
        let capacity = builder.capacity;
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

        log::debug!(
            "ring created: capacity={} size={} elem_size={} producer={} consumer={}",
            capacity,
            size,
            core::mem::size_of::<T>(),
            builder.producer,
            builder.consumer,
        );

        Ring {
            prod: CachePadded::new(Side::new(prod, "producer")),
            cons: CachePadded::new(Side::new(cons, "consumer")),
            capacity,
            size,
            mask: size - 1,
            slots: slots.into_boxed_slice(),
        }
    }

    #[inline]
    pub(crate) fn base(&self) -> *mut T {
        UnsafeCell::raw_get(self.slots.as_ptr()).cast::<T>()
    }

    #[inline]
    pub(crate) fn prod_side(&self) -> &Side {
        &self.prod
    }

    #[inline]
    pub(crate) fn cons_side(&self) -> &Side {
        &self.cons
    }

    #[inline]
    pub(crate) fn mask(&self) -> u32 {
        self.mask
    }

    /// Enqueues elements from `items`.
    ///
    /// With [`Behavior::Exact`] either all of `items` is enqueued or nothing
    /// is; with [`Behavior::UpTo`] as many as fit.
    pub fn enqueue(&self, items: &[T], behavior: Behavior) -> Transfer {
        let n = request_len(items.len());
        if n == 0 {
            return Transfer::default();
        }

        let _side = self.prod.enter();
        let r = self
            .prod
            .ht
            .move_head(&self.cons.ht, self.capacity, n, behavior);
        if r.count > 0 {
            // SAFETY: the reservation grants exclusive access to
            // `[r.head, r.head + r.count)` and `items` holds at least that many.
            unsafe {
                copy::write(self.base(), self.mask, r.head, items.as_ptr(), r.count);
            }
            self.prod.ht.update_tail(&r);
        }
        transfer(&r)
    }

    /// Dequeues into the front of `out`.
    ///
    /// With [`Behavior::Exact`] either `out` is filled or nothing is taken;
    /// with [`Behavior::UpTo`] as many as are available.
    pub fn dequeue(&self, out: &mut [T], behavior: Behavior) -> Transfer {
        let n = request_len(out.len());
        if n == 0 {
            return Transfer::default();
        }
        // SAFETY: `out` is valid for `n` writes.
        unsafe { self.dequeue_raw(out.as_mut_ptr(), n, behavior) }
    }

    /// # Safety
    ///
    /// `dst` must be valid for `n` writes.
    unsafe fn dequeue_raw(&self, dst: *mut T, n: u32, behavior: Behavior) -> Transfer {
        let _side = self.cons.enter();
        let r = self.cons.ht.move_head(&self.prod.ht, 0, n, behavior);
        if r.count > 0 {
            // SAFETY: the range is published by producers and reserved for us.
            unsafe {
                copy::read(self.base(), self.mask, r.head, dst, r.count);
            }
            self.cons.ht.update_tail(&r);
        }
        transfer(&r)
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

    /// Enqueues one element, handing it back if the ring is full.
    pub fn push(&self, item: T) -> Result<(), T> {
        if self.enqueue(slice::from_ref(&item), Behavior::Exact).count == 1 {
            Ok(())
        } else {
            Err(item)
        }
    }

    /// Dequeues one element.
    pub fn pop(&self) -> Option<T> {
        let mut slot = MaybeUninit::<T>::uninit();
        // SAFETY: `slot` has room for one element and is only read back when
        // the ring reports it was written.
        unsafe {
            match self.dequeue_raw(slot.as_mut_ptr(), 1, Behavior::Exact).count {
                1 => Some(slot.assume_init()),
                _ => None,
            }
        }
    }
}

impl<T> Ring<T> {
    /// Maximum number of elements the ring holds.
    #[inline]
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Allocated slots. Equal to the capacity unless the ring was built with
    /// [`RingBuilder::exact_size`].
    #[inline]
    pub fn size(&self) -> u32 {
        self.size
    }

    /// Number of published, not yet consumed elements.
    pub fn count(&self) -> u32 {
        let cons_tail = self.cons.ht.tail();
        let prod_tail = self.prod.ht.tail();
        prod_tail.wrapping_sub(cons_tail).min(self.capacity)
    }

    /// Number of free slots.
    pub fn free_count(&self) -> u32 {
        self.capacity - self.count()
    }

    /// Returns `true` if the ring holds no published elements.
    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// Returns `true` if the ring has no free slots.
    pub fn is_full(&self) -> bool {
        self.count() == self.capacity
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

    /// Producer head-tail distance limit, if the producer is RTS.
    pub fn producer_htd_max(&self) -> Option<u32> {
        self.prod.ht.rts().map(|r| r.htd_max())
    }

    /// Consumer head-tail distance limit, if the consumer is RTS.
    pub fn consumer_htd_max(&self) -> Option<u32> {
        self.cons.ht.rts().map(|r| r.htd_max())
    }

    /// Changes the producer head-tail distance limit.
    ///
    /// `0` serializes producers completely; a value at or above the capacity
    /// removes the limit.
    pub fn set_producer_htd_max(&self, max: u32) -> Result<(), RingError> {
        self.prod.ht.rts().ok_or(RingError::NotRts)?.set_htd_max(max);
        Ok(())
    }

    /// Changes the consumer head-tail distance limit.
    pub fn set_consumer_htd_max(&self, max: u32) -> Result<(), RingError> {
        self.cons.ht.rts().ok_or(RingError::NotRts)?.set_htd_max(max);
        Ok(())
    }

    /// Empties the ring.
    pub fn reset(&mut self) {
        self.prod.ht.reset();
        self.cons.ht.reset();
    }
}

impl<T> fmt::Debug for Ring<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ring")
            .field("capacity", &self.capacity)
            .field("size", &self.size)
            .field("elem_size", &core::mem::size_of::<T>())
            .field("producer_sync", &self.producer_sync())
            .field("consumer_sync", &self.consumer_sync())
            .field("producer", &self.producer_snapshot())
            .field("consumer", &self.consumer_snapshot())
            .field("used", &self.count())
            .field("avail", &self.free_count())
            .finish()
    }
}

/// Requests longer than the index space are truncated; no ring can satisfy
/// more than [`MAX_CAPACITY`] anyway.
#[inline]
pub(crate) fn request_len(len: usize) -> u32 {
    u32::try_from(len).unwrap_or(u32::MAX)
}

#[inline]
fn transfer(r: &Reservation) -> Transfer {
    Transfer {
        count: r.count,
        remaining: r.remaining(),
    }
}
