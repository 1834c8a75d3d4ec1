//! Packed position words.
//!
//! HTS and RTS keep two 32-bit values in one 64-bit atomic so that a single
//! CAS validates both of them. The low half carries the first field, the high
//! half the second:
//!
//! - [`HtsPos`]: `(head, tail)` of a head-tail-synchronized side.
//! - [`RtsPos`]: `(cnt, pos)` of one end of a relaxed-tail-synchronized side.
//! - [`StageTail`]: `(busy, pos)` of a stage tail in a staged ring.
//!
//! The counter in [`RtsPos`] changes on every reservation, so a CAS that only
//! compared positions could not tell a stale word from a current one after the
//! position wrapped (ABA).

/// `(head, tail)` pair of a head-tail-synchronized side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HtsPos {
    /// Reservation boundary.
    pub head: u32,
    /// Publication boundary.
    pub tail: u32,
}

impl HtsPos {
    /// Creates a pair with both boundaries at `pos`.
    #[inline]
    pub const fn idle(pos: u32) -> Self {
        Self {
            head: pos,
            tail: pos,
        }
    }

    /// `true` when no reservation is open.
    #[inline]
    pub const fn is_idle(self) -> bool {
        self.head == self.tail
    }

    /// Packs into one word: head in the low half, tail in the high half.
    #[inline]
    pub const fn pack(self) -> u64 {
        (self.head as u64) | ((self.tail as u64) << 32)
    }

    /// Inverse of [`HtsPos::pack`].
    #[inline]
    pub const fn unpack(raw: u64) -> Self {
        Self {
            head: raw as u32,
            tail: (raw >> 32) as u32,
        }
    }
}

/// `(cnt, pos)` pair of one end of a relaxed-tail-synchronized side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RtsPos {
    /// Number of operations that moved this end, modulo 2^32.
    pub cnt: u32,
    /// Ring index of this end.
    pub pos: u32,
}

impl RtsPos {
    /// Creates a word with a zero counter.
    #[inline]
    pub const fn at(pos: u32) -> Self {
        Self { cnt: 0, pos }
    }

    /// The word after one more operation of `n` elements.
    #[inline]
    pub const fn advance(self, n: u32) -> Self {
        Self {
            cnt: self.cnt.wrapping_add(1),
            pos: self.pos.wrapping_add(n),
        }
    }

    /// Packs into one word: counter in the low half, position in the high half.
    #[inline]
    pub const fn pack(self) -> u64 {
        (self.cnt as u64) | ((self.pos as u64) << 32)
    }

    /// Inverse of [`RtsPos::pack`].
    #[inline]
    pub const fn unpack(raw: u64) -> Self {
        Self {
            cnt: raw as u32,
            pos: (raw >> 32) as u32,
        }
    }
}

/// Tail of one stage of a staged ring.
///
/// `busy` is set while one thread walks the stage's finished ranges; the
/// position is only moved by that thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StageTail {
    /// Set while a finalizer owns the tail.
    pub busy: bool,
    /// First slot not yet handed to the next stage.
    pub pos: u32,
}

impl StageTail {
    /// An idle tail at `pos`.
    #[inline]
    pub const fn at(pos: u32) -> Self {
        Self { busy: false, pos }
    }

    /// Packs into one word: busy flag in the low half, position in the high half.
    #[inline]
    pub const fn pack(self) -> u64 {
        (self.busy as u64) | ((self.pos as u64) << 32)
    }

    /// Inverse of [`StageTail::pack`].
    #[inline]
    pub const fn unpack(raw: u64) -> Self {
        Self {
            busy: raw as u32 != 0,
            pos: (raw >> 32) as u32,
        }
    }
}
