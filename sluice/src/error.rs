//! Errors reported by the registry and the defer queue.

use sluice_ring::RingError;
use thiserror::Error;

/// Configuration and protocol-misuse errors.
///
/// A queue that is merely full or empty is not an error for the ring; the
/// defer queue reports [`Error::QueueFull`] because its enqueue takes a
/// single element and has no count to return.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// The underlying ring rejected its configuration.
    #[error(transparent)]
    Ring(#[from] RingError),

    /// A registry needs room for at least one thread.
    #[error("max_threads must be non-zero")]
    ZeroThreads,

    /// Thread id outside `0..max`.
    #[error("thread id {id} out of range (max_threads = {max})")]
    ThreadIdOutOfRange {
        /// Offending id.
        id: u32,
        /// Registry size.
        max: u32,
    },

    /// The thread id is already registered.
    #[error("thread {0} is already registered")]
    AlreadyRegistered(u32),

    /// The thread id is not registered.
    #[error("thread {0} is not registered")]
    NotRegistered(u32),

    /// Unregister attempted inside a read-side critical section.
    #[error("thread {id} still holds {count} read-side lock(s)")]
    LockHeld {
        /// Thread id.
        id: u32,
        /// Outstanding lock count.
        count: u32,
    },

    /// Unlock without a matching lock.
    #[error("thread {0} holds no read-side lock")]
    NotLocked(u32),

    /// A builder parameter was rejected.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),

    /// No free slot in the defer queue; the element was neither queued nor freed.
    #[error("defer queue is full")]
    QueueFull,

    /// Entries still wait for readers to pass a quiescent state.
    #[error("{pending} entries still wait for a grace period")]
    PendingReclaims {
        /// Entries left in the queue.
        pending: u32,
    },
}
