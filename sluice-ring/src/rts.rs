//! Relaxed tail synchronized side.
//!
//! Head and tail are each a packed `(cnt, pos)` word. A reservation bumps
//! head's counter together with its position. Finishing bumps tail's counter;
//! the thread whose increment makes the two counters equal is the last one
//! out and drags tail's position up to head's. Nobody waits for anybody else
//! to publish, but head may not run more than `htd_max` ahead of tail before
//! a new reservation is admitted.
//!
//! Liveness: a thread that never finishes its reservation leaves the counters
//! permanently unequal and the tail stops moving. There is no recovery.

use core::sync::atomic::{AtomicU32, Ordering};

use crossbeam_utils::Backoff;
use portable_atomic::AtomicU64;

use crate::codec::RtsPos;
use crate::config::Behavior;
use crate::headtail::{Published, Reservation};

pub(crate) struct RtsHeadTail {
    head: AtomicU64,
    tail: AtomicU64,
    htd_max: AtomicU32,
}

impl RtsHeadTail {
    pub(crate) const fn new(htd_max: u32) -> Self {
        Self {
            head: AtomicU64::new(RtsPos::at(0).pack()),
            tail: AtomicU64::new(RtsPos::at(0).pack()),
            htd_max: AtomicU32::new(htd_max),
        }
    }

    #[inline]
    pub(crate) fn load_head(&self, order: Ordering) -> RtsPos {
        RtsPos::unpack(self.head.load(order))
    }

    #[inline]
    pub(crate) fn load_tail(&self, order: Ordering) -> RtsPos {
        RtsPos::unpack(self.tail.load(order))
    }

    #[inline]
    pub(crate) fn tail(&self) -> u32 {
        self.load_tail(Ordering::Acquire).pos
    }

    #[inline]
    pub(crate) fn htd_max(&self) -> u32 {
        self.htd_max.load(Ordering::Relaxed)
    }

    #[inline]
    pub(crate) fn set_htd_max(&self, max: u32) {
        self.htd_max.store(max, Ordering::Relaxed);
    }

    /// Spins while head is more than `htd_max` ahead of tail.
    #[inline]
    fn wait_distance(&self, mut head: RtsPos) -> RtsPos {
        let max = self.htd_max();
        let backoff = Backoff::new();
        loop {
            let tail = self.load_tail(Ordering::Acquire);
            if head.pos.wrapping_sub(tail.pos) <= max {
                return head;
            }
            backoff.snooze();
            head = self.load_head(Ordering::Acquire);
        }
    }

    /// Reserves up to `n` slots; head becomes `(cnt + 1, pos + count)`.
    ///
    /// A zero-length result leaves the counter untouched, so no matching
    /// [`RtsHeadTail::update_tail`] is owed.
    pub(crate) fn move_head<P: Published + ?Sized>(
        &self,
        other: &P,
        capacity: u32,
        n: u32,
        behavior: Behavior,
    ) -> Reservation {
        let mut current = self.load_head(Ordering::Acquire);
        loop {
            current = self.wait_distance(current);

            let entries = capacity
                .wrapping_add(other.published_tail())
                .wrapping_sub(current.pos);
            let count = Reservation::clamp(n, entries, behavior);
            if count == 0 {
                return Reservation::empty(current.pos, entries);
            }

            let next = current.advance(count);
            match self.head.compare_exchange(
                current.pack(),
                next.pack(),
                Ordering::Acquire,
                Ordering::Acquire,
            ) {
                Ok(_) => return Reservation::new(current.pos, count, entries),
                Err(raw) => current = RtsPos::unpack(raw),
            }
        }
    }

    /// Records one finished reservation and, if it was the last outstanding
    /// one, publishes everything up to head.
    pub(crate) fn update_tail(&self) {
        let mut current = self.tail.load(Ordering::Acquire);
        loop {
            let head = self.load_head(Ordering::Acquire);
            let mut next = RtsPos::unpack(current);
            next.cnt = next.cnt.wrapping_add(1);
            if next.cnt == head.cnt {
                next.pos = head.pos;
            }
            match self.tail.compare_exchange_weak(
                current,
                next.pack(),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return,
                Err(raw) => current = raw,
            }
        }
    }

    pub(crate) fn reset(&mut self) {
        *self.head.get_mut() = RtsPos::at(0).pack();
        *self.tail.get_mut() = RtsPos::at(0).pack();
    }
}
