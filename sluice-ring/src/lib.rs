//! Bounded lock-free ring for fixed-size elements.
//!
//! ## Features
//!
//! - Single- and multi-thread producers and consumers, configured per side.
//! - Three multi-thread disciplines:
//!   - `MultiPlain`: CAS on head, ordered spin on tail.
//!   - `MultiHts`: head and tail updated together; one open reservation per side.
//!   - `MultiRts`: last finisher publishes; bounded head-tail distance.
//! - Bulk (all-or-nothing) and burst (as many as possible) transfers.
//! - Two-phase enqueue/dequeue on single-thread and HTS sides.
//! - Exact-size rings: any capacity, storage rounded up to a power of two.
//! - [`StagedRing`]: elements pass through ordered processing stages, each
//!   with its own acquire/release, before they can be dequeued.
//!
//! ## Usage
//!
//! ```rust
//! use sluice_ring::{Ring, SyncType};
//!
//! let ring = Ring::<u32>::with_sync(4, SyncType::MultiRts, SyncType::MultiHts).unwrap();
//! assert_eq!(ring.enqueue_bulk(&[1, 2, 3, 4]), 4);
//!
//! let mut out = [0; 2];
//! assert_eq!(ring.dequeue_bulk(&mut out), 2);
//! assert_eq!(out, [1, 2]);
//!
//! assert_eq!(ring.enqueue_burst(&[5, 6, 7]), 2);
//! assert_eq!(ring.count(), 4);
//! ```

#![warn(missing_docs)]

pub mod codec;
mod config;
mod copy;
mod error;
mod headtail;
mod hts;
mod peek;
mod plain;
mod ring;
mod rts;
mod staged;

pub use config::{Behavior, HTD_MAX_DIVISOR, RingBuilder, SyncType};
pub use error::RingError;
pub use headtail::HeadTailSnapshot;
pub use peek::{DequeuePeek, EnqueueReservation};
pub use ring::{MAX_CAPACITY, Ring, Transfer};
pub use staged::{MAX_STAGED_CAPACITY, StageReservation, StagedRing, StagedRingBuilder};
