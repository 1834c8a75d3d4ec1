//! Two-phase operations.
//!
//! A start call reserves a range and keeps it open; the returned guard
//! decides how much of it to keep. Only sides whose head can be rolled back
//! support this: single-thread sides and HTS sides, where the open
//! reservation is the only one.

use core::mem::MaybeUninit;

use crate::config::Behavior;
use crate::copy;
use crate::error::RingError;
use crate::headtail::{Reservation, SideGuard};
use crate::ring::{Ring, request_len};

impl<T: Copy> Ring<T> {
    /// Reserves up to `n` producer slots without publishing anything.
    ///
    /// Until the returned reservation is committed or dropped, other
    /// producers on an HTS side spin.
    pub fn enqueue_start(&self, n: u32, behavior: Behavior) -> Result<EnqueueReservation<'_, T>, RingError> {
        let side = self.prod_side();
        let sync = side.ht.sync_type();
        if !sync.supports_peek() {
            return Err(RingError::PeekUnsupported(sync));
        }
        let guard = side.enter();
        let reservation = if n == 0 {
            Reservation::empty(0, 0)
        } else {
            side.ht
                .move_head(&self.cons_side().ht, self.capacity(), n, behavior)
        };
        Ok(EnqueueReservation {
            ring: self,
            reservation,
            done: false,
            _side: guard,
        })
    }

    /// Copies up to `out.len()` elements out of the ring without consuming them.
    ///
    /// The returned peek decides how many of the copied elements are actually
    /// taken; the rest stay at the front of the ring.
    pub fn dequeue_start(&self, out: &mut [T], behavior: Behavior) -> Result<DequeuePeek<'_, T>, RingError> {
        let n = request_len(out.len());
        // SAFETY: `out` is valid for `n` writes.
        unsafe { self.dequeue_start_raw(out.as_mut_ptr(), n, behavior) }
    }

    /// Like [`Ring::dequeue_start`] for callers without initialized storage.
    ///
    /// The first [`DequeuePeek::len`] elements of `out` are initialized on return.
    pub fn dequeue_start_uninit(
        &self,
        out: &mut [MaybeUninit<T>],
        behavior: Behavior,
    ) -> Result<DequeuePeek<'_, T>, RingError> {
        let n = request_len(out.len());
        // SAFETY: `out` is valid for `n` writes of `T`.
        unsafe { self.dequeue_start_raw(out.as_mut_ptr().cast::<T>(), n, behavior) }
    }

    /// # Safety
    ///
    /// `dst` must be valid for `n` writes.
    unsafe fn dequeue_start_raw(&self, dst: *mut T, n: u32, behavior: Behavior) -> Result<DequeuePeek<'_, T>, RingError> {
        let side = self.cons_side();
        let sync = side.ht.sync_type();
        if !sync.supports_peek() {
            return Err(RingError::PeekUnsupported(sync));
        }
        let guard = side.enter();
        let reservation = if n == 0 {
            Reservation::empty(0, 0)
        } else {
            side.ht.move_head(&self.prod_side().ht, 0, n, behavior)
        };
        if reservation.count > 0 {
            // SAFETY: the range is published and reserved for us; the caller
            // vouches for `dst`.
            unsafe {
                copy::read(self.base(), self.mask(), reservation.head, dst, reservation.count);
            }
        }
        Ok(DequeuePeek {
            ring: self,
            reservation,
            done: false,
            _side: guard,
        })
    }
}

/// Open producer reservation. Dropping it without committing releases every slot.
#[must_use = "an uncommitted reservation publishes nothing"]
pub struct EnqueueReservation<'a, T: Copy> {
    ring: &'a Ring<T>,
    reservation: Reservation,
    done: bool,
    _side: SideGuard<'a>,
}

impl<T: Copy> EnqueueReservation<'_, T> {
    /// Slots reserved.
    pub fn len(&self) -> u32 {
        self.reservation.count
    }

    /// Returns `true` if nothing could be reserved.
    pub fn is_empty(&self) -> bool {
        self.reservation.count == 0
    }

    /// Free slots left after the reservation.
    pub fn remaining(&self) -> u32 {
        self.reservation.remaining()
    }

    /// Writes the first `min(items.len(), len())` elements, publishes them and
    /// releases the rest. Returns the number published.
    pub fn commit(mut self, items: &[T]) -> u32 {
        let n = request_len(items.len()).min(self.reservation.count);
        if n > 0 {
            // SAFETY: `n` slots from `reservation.head` are exclusively ours.
            unsafe {
                copy::write(
                    self.ring.base(),
                    self.ring.mask(),
                    self.reservation.head,
                    items.as_ptr(),
                    n,
                );
            }
        }
        self.finish(n);
        n
    }

    fn finish(&mut self, n: u32) {
        self.done = true;
        if self.reservation.count > 0 {
            self.ring
                .prod_side()
                .ht
                .set_head_tail(self.reservation.head, n);
        }
    }
}

impl<T: Copy> Drop for EnqueueReservation<'_, T> {
    fn drop(&mut self) {
        if !self.done {
            self.finish(0);
        }
    }
}

/// Elements copied out by [`Ring::dequeue_start`] but not yet consumed.
#[must_use = "an uncommitted peek consumes nothing"]
pub struct DequeuePeek<'a, T: Copy> {
    ring: &'a Ring<T>,
    reservation: Reservation,
    done: bool,
    _side: SideGuard<'a>,
}

impl<T: Copy> DequeuePeek<'_, T> {
    /// Elements copied out.
    pub fn len(&self) -> u32 {
        self.reservation.count
    }

    /// Returns `true` if nothing was available.
    pub fn is_empty(&self) -> bool {
        self.reservation.count == 0
    }

    /// Entries left behind the peeked ones.
    pub fn remaining(&self) -> u32 {
        self.reservation.remaining()
    }

    /// Consumes the first `min(n, len())` peeked elements; returns how many.
    pub fn commit(mut self, n: u32) -> u32 {
        let n = n.min(self.reservation.count);
        self.finish(n);
        n
    }

    fn finish(&mut self, n: u32) {
        self.done = true;
        if self.reservation.count > 0 {
            self.ring
                .cons_side()
                .ht
                .set_head_tail(self.reservation.head, n);
        }
    }
}

impl<T: Copy> Drop for DequeuePeek<'_, T> {
    fn drop(&mut self) {
        if !self.done {
            self.finish(0);
        }
    }
}
