//! One side (producer or consumer) of a ring and its reservation record.

use core::sync::atomic::{AtomicBool, Ordering};

use crate::config::{Behavior, SyncType};
use crate::hts::HtsHeadTail;
use crate::plain::PlainHeadTail;
use crate::rts::RtsHeadTail;

/// Range claimed by a head move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Reservation {
    /// Old head: first index of the range.
    pub(crate) head: u32,
    /// Number of slots claimed.
    pub(crate) count: u32,
    /// Slots that were available before the claim.
    pub(crate) entries: u32,
}

impl Reservation {
    #[inline]
    pub(crate) const fn new(head: u32, count: u32, entries: u32) -> Self {
        Self {
            head,
            count,
            entries,
        }
    }

    #[inline]
    pub(crate) const fn empty(head: u32, entries: u32) -> Self {
        Self::new(head, 0, entries)
    }

    /// Slots still available after the claim.
    #[inline]
    pub(crate) const fn remaining(&self) -> u32 {
        self.entries - self.count
    }

    /// Size of the claim for a request of `n` with `entries` available.
    #[inline]
    pub(crate) fn clamp(n: u32, entries: u32, behavior: Behavior) -> u32 {
        if n <= entries {
            n
        } else {
            match behavior {
                Behavior::Exact => 0,
                Behavior::UpTo => entries,
            }
        }
    }
}

/// A boundary a head move reserves against: the tail of the side (or stage)
/// that feeds it.
pub(crate) trait Published {
    fn published_tail(&self) -> u32;
}

impl Published for HeadTail {
    #[inline]
    fn published_tail(&self) -> u32 {
        self.tail()
    }
}

/// Head/tail state of one side, by discipline.
pub(crate) enum HeadTail {
    Plain(PlainHeadTail),
    Hts(HtsHeadTail),
    Rts(RtsHeadTail),
}

impl HeadTail {
    pub(crate) fn new(sync: SyncType, htd_max: u32) -> Self {
        match sync {
            SyncType::Single => HeadTail::Plain(PlainHeadTail::new(true)),
            SyncType::MultiPlain => HeadTail::Plain(PlainHeadTail::new(false)),
            SyncType::MultiHts => HeadTail::Hts(HtsHeadTail::new()),
            SyncType::MultiRts => HeadTail::Rts(RtsHeadTail::new(htd_max)),
        }
    }

    pub(crate) fn sync_type(&self) -> SyncType {
        match self {
            HeadTail::Plain(p) if p.is_single() => SyncType::Single,
            HeadTail::Plain(_) => SyncType::MultiPlain,
            HeadTail::Hts(_) => SyncType::MultiHts,
            HeadTail::Rts(_) => SyncType::MultiRts,
        }
    }

    /// Published boundary, as seen by the opposite side.
    #[inline]
    pub(crate) fn tail(&self) -> u32 {
        match self {
            HeadTail::Plain(p) => p.tail(),
            HeadTail::Hts(h) => h.tail(),
            HeadTail::Rts(r) => r.tail(),
        }
    }

    #[inline]
    pub(crate) fn move_head<P: Published + ?Sized>(
        &self,
        other: &P,
        capacity: u32,
        n: u32,
        behavior: Behavior,
    ) -> Reservation {
        match self {
            HeadTail::Plain(p) => p.move_head(other, capacity, n, behavior),
            HeadTail::Hts(h) => h.move_head(other, capacity, n, behavior),
            HeadTail::Rts(r) => r.move_head(other, capacity, n, behavior),
        }
    }

    /// Publishes a non-empty reservation.
    #[inline]
    pub(crate) fn update_tail(&self, reservation: &Reservation) {
        debug_assert!(reservation.count > 0);
        match self {
            HeadTail::Plain(p) => p.update_tail(reservation.head, reservation.count),
            HeadTail::Hts(h) => h.update_tail(reservation.head, reservation.count),
            HeadTail::Rts(r) => r.update_tail(),
        }
    }

    /// Finishes a peek, keeping `count` slots of the reservation that began at `tail`.
    ///
    /// Only reachable for single-thread and HTS sides.
    pub(crate) fn set_head_tail(&self, tail: u32, count: u32) {
        match self {
            HeadTail::Plain(p) => p.set_head_tail(tail, count),
            HeadTail::Hts(h) => h.set_head_tail(tail, count),
            HeadTail::Rts(_) => unreachable!("peek reservations are never taken on RTS sides"),
        }
    }

    pub(crate) fn snapshot(&self) -> HeadTailSnapshot {
        match self {
            HeadTail::Plain(p) => HeadTailSnapshot {
                head: p.head(),
                tail: p.tail(),
                head_cnt: None,
                tail_cnt: None,
                htd_max: None,
            },
            HeadTail::Hts(h) => {
                let pos = h.load(Ordering::Acquire);
                HeadTailSnapshot {
                    head: pos.head,
                    tail: pos.tail,
                    head_cnt: None,
                    tail_cnt: None,
                    htd_max: None,
                }
            }
            HeadTail::Rts(r) => {
                let tail = r.load_tail(Ordering::Acquire);
                let head = r.load_head(Ordering::Acquire);
                HeadTailSnapshot {
                    head: head.pos,
                    tail: tail.pos,
                    head_cnt: Some(head.cnt),
                    tail_cnt: Some(tail.cnt),
                    htd_max: Some(r.htd_max()),
                }
            }
        }
    }

    pub(crate) fn rts(&self) -> Option<&RtsHeadTail> {
        match self {
            HeadTail::Rts(r) => Some(r),
            _ => None,
        }
    }

    pub(crate) fn reset(&mut self) {
        match self {
            HeadTail::Plain(p) => p.reset(),
            HeadTail::Hts(h) => h.reset(),
            HeadTail::Rts(r) => r.reset(),
        }
    }
}

/// Point-in-time view of one side of a ring.
///
/// Head and tail are read separately, so under concurrent traffic the pair
/// need not describe a single instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeadTailSnapshot {
    /// Reservation boundary.
    pub head: u32,
    /// Publication boundary.
    pub tail: u32,
    /// RTS only: reservations taken.
    pub head_cnt: Option<u32>,
    /// RTS only: reservations finished.
    pub tail_cnt: Option<u32>,
    /// RTS only: maximum head-tail distance.
    pub htd_max: Option<u32>,
}

impl HeadTailSnapshot {
    /// Slots reserved but not yet published.
    pub fn in_flight(&self) -> u32 {
        self.head.wrapping_sub(self.tail)
    }
}

/// Occupancy flag of a single-thread side.
pub(crate) struct Side {
    pub(crate) ht: HeadTail,
    busy: AtomicBool,
    name: &'static str,
}

impl Side {
    pub(crate) fn new(ht: HeadTail, name: &'static str) -> Self {
        Self {
            ht,
            busy: AtomicBool::new(false),
            name,
        }
    }

    /// Marks a single-thread side as in use for the lifetime of the guard.
    ///
    /// # Panics
    ///
    /// If another thread is inside an operation on the same single-thread side.
    #[inline]
    pub(crate) fn enter(&self) -> SideGuard<'_> {
        let single = matches!(&self.ht, HeadTail::Plain(p) if p.is_single());
        if !single {
            return SideGuard { busy: None };
        }
        if self.busy.swap(true, Ordering::Acquire) {
            panic!(
                "single-thread {} side entered by two threads at once",
                self.name
            );
        }
        SideGuard {
            busy: Some(&self.busy),
        }
    }
}

pub(crate) struct SideGuard<'a> {
    busy: Option<&'a AtomicBool>,
}

impl Drop for SideGuard<'_> {
    #[inline]
    fn drop(&mut self) {
        if let Some(busy) = self.busy {
            busy.store(false, Ordering::Release);
        }
    }
}
