//! Classic head/tail pair: two independent 32-bit counters.
//!
//! Producers (or consumers) claim a range with a CAS on `head`, fill it, then
//! wait until `tail` reaches the start of their range before moving it past
//! the end. Publication therefore happens in reservation order.

use core::sync::atomic::{AtomicU32, Ordering, fence};

use crossbeam_utils::Backoff;

use crate::config::Behavior;
use crate::headtail::{Published, Reservation};

pub(crate) struct PlainHeadTail {
    head: AtomicU32,
    tail: AtomicU32,
    /// Single-thread side: plain store instead of CAS, no tail wait.
    single: bool,
}

impl PlainHeadTail {
    pub(crate) const fn new(single: bool) -> Self {
        Self {
            head: AtomicU32::new(0),
            tail: AtomicU32::new(0),
            single,
        }
    }

    #[inline]
    pub(crate) fn is_single(&self) -> bool {
        self.single
    }

    #[inline]
    pub(crate) fn head(&self) -> u32 {
        self.head.load(Ordering::Relaxed)
    }

    #[inline]
    pub(crate) fn tail(&self) -> u32 {
        self.tail.load(Ordering::Acquire)
    }

    /// Reserves up to `n` slots against the opposite side's tail.
    ///
    /// `capacity` is the ring capacity on the producer side and 0 on the
    /// consumer side, so `capacity + other_tail - head` is the free space for
    /// producers and the number of entries for consumers.
    pub(crate) fn move_head<P: Published + ?Sized>(
        &self,
        other: &P,
        capacity: u32,
        n: u32,
        behavior: Behavior,
    ) -> Reservation {
        let mut old_head = self.head.load(Ordering::Relaxed);
        loop {
            // Head must be read before the opposite tail.
            fence(Ordering::Acquire);
            let entries = capacity
                .wrapping_add(other.published_tail())
                .wrapping_sub(old_head);
            let count = Reservation::clamp(n, entries, behavior);
            if count == 0 {
                return Reservation::empty(old_head, entries);
            }

            let new_head = old_head.wrapping_add(count);
            if self.single {
                self.head.store(new_head, Ordering::Relaxed);
                return Reservation::new(old_head, count, entries);
            }
            match self.head.compare_exchange_weak(
                old_head,
                new_head,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return Reservation::new(old_head, count, entries),
                Err(current) => old_head = current,
            }
        }
    }

    /// Publishes `count` slots starting at `old_tail`.
    pub(crate) fn update_tail(&self, old_tail: u32, count: u32) {
        if !self.single {
            // Earlier reservations publish first.
            let backoff = Backoff::new();
            while self.tail.load(Ordering::Acquire) != old_tail {
                backoff.snooze();
            }
        }
        self.tail
            .store(old_tail.wrapping_add(count), Ordering::Release);
    }

    /// Rolls a single-thread peek back to `tail + count`.
    pub(crate) fn set_head_tail(&self, tail: u32, count: u32) {
        debug_assert!(self.single);
        let pos = tail.wrapping_add(count);
        self.head.store(pos, Ordering::Relaxed);
        self.tail.store(pos, Ordering::Release);
    }

    pub(crate) fn reset(&mut self) {
        *self.head.get_mut() = 0;
        *self.tail.get_mut() = 0;
    }
}
