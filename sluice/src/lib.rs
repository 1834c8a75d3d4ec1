//! Sluice: quiescent-state-based reclamation and a deferred-free queue.
//!
//! Readers register with a [`Qsbr`] domain and report quiescent states
//! between critical sections; they never lock or count references on the
//! read path. Writers open a grace period with [`Qsbr::start`] after
//! unlinking a resource and free it once [`Qsbr::check`] succeeds, or hand it
//! to a [`DeferQueue`] that frees it as soon as the grace period allows.
//!
//! The bounded rings underneath live in [`ring`] (the `sluice-ring` crate).
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use std::thread;
//! use sluice::Qsbr;
//!
//! let qsbr = Arc::new(Qsbr::new(2).unwrap());
//!
//! let reader = {
//!     let qsbr = qsbr.clone();
//!     thread::spawn(move || {
//!         let me = qsbr.reader(0).unwrap();
//!         for _ in 0..100 {
//!             {
//!                 let _cs = me.lock();
//!                 // read shared data
//!             }
//!             me.quiescent();
//!         }
//!     })
//! };
//!
//! // Writer: unlink, then wait out the readers.
//! let token = qsbr.start();
//! reader.join().unwrap();
//! assert!(qsbr.check(token, true));
//! ```

#![warn(missing_docs)]

mod defer;
mod error;
mod grace;
mod qsbr;

pub use defer::{DeferQueue, DeferQueueBuilder, MtSafety, ReclaimStats, Reclaimer};
pub use error::Error;
pub use grace::GracePeriod;
pub use qsbr::{Qsbr, ReadLock, Reader};

/// Bounded lock-free rings.
pub use sluice_ring as ring;
