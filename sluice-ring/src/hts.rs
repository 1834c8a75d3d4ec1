//! Head-tail synchronized side.
//!
//! `head` and `tail` live in one 64-bit word. A thread may only reserve while
//! the word is idle (`head == tail`), so at most one reservation per side is
//! ever open. Publication is a plain store that sets `tail` to `head`.

use core::sync::atomic::Ordering;

use crossbeam_utils::Backoff;
use portable_atomic::AtomicU64;

use crate::codec::HtsPos;
use crate::config::Behavior;
use crate::headtail::{Published, Reservation};

pub(crate) struct HtsHeadTail {
    raw: AtomicU64,
}

impl HtsHeadTail {
    pub(crate) const fn new() -> Self {
        Self {
            raw: AtomicU64::new(HtsPos::idle(0).pack()),
        }
    }

    #[inline]
    pub(crate) fn load(&self, order: Ordering) -> HtsPos {
        HtsPos::unpack(self.raw.load(order))
    }

    #[inline]
    pub(crate) fn tail(&self) -> u32 {
        self.load(Ordering::Acquire).tail
    }

    /// Spins until no reservation is open on this side.
    #[inline]
    fn wait_idle(&self, mut pos: HtsPos) -> HtsPos {
        let backoff = Backoff::new();
        while !pos.is_idle() {
            backoff.snooze();
            pos = self.load(Ordering::Acquire);
        }
        pos
    }

    /// Opens a reservation of up to `n` slots.
    ///
    /// On success the word becomes `(old_head + count, old_head)`: tail stays
    /// behind until [`HtsHeadTail::update_tail`] closes the window.
    pub(crate) fn move_head<P: Published + ?Sized>(
        &self,
        other: &P,
        capacity: u32,
        n: u32,
        behavior: Behavior,
    ) -> Reservation {
        let mut current = self.load(Ordering::Acquire);
        loop {
            current = self.wait_idle(current);

            let entries = capacity
                .wrapping_add(other.published_tail())
                .wrapping_sub(current.head);
            let count = Reservation::clamp(n, entries, behavior);
            if count == 0 {
                return Reservation::empty(current.head, entries);
            }

            let next = HtsPos {
                head: current.head.wrapping_add(count),
                tail: current.tail,
            };
            match self.raw.compare_exchange(
                current.pack(),
                next.pack(),
                Ordering::Acquire,
                Ordering::Acquire,
            ) {
                Ok(_) => return Reservation::new(current.head, count, entries),
                Err(raw) => current = HtsPos::unpack(raw),
            }
        }
    }

    /// Closes the open reservation that started at `old_tail`.
    pub(crate) fn update_tail(&self, old_tail: u32, count: u32) {
        let pos = old_tail.wrapping_add(count);
        debug_assert_eq!(self.load(Ordering::Relaxed).head, pos);
        self.raw.store(HtsPos::idle(pos).pack(), Ordering::Release);
    }

    /// Closes the open reservation after using only `count` of its slots.
    pub(crate) fn set_head_tail(&self, tail: u32, count: u32) {
        let pos = tail.wrapping_add(count);
        self.raw.store(HtsPos::idle(pos).pack(), Ordering::Release);
    }

    pub(crate) fn reset(&mut self) {
        *self.raw.get_mut() = HtsPos::idle(0).pack();
    }
}
