use thiserror::Error;

use crate::config::SyncType;

/// Errors reported by ring construction and configuration.
///
/// Running out of space or elements is not an error: data-path operations
/// report it through their return counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RingError {
    /// Capacity is zero or not a power of two.
    #[error("ring capacity {0} is not a power of two")]
    CapacityNotPowerOfTwo(u32),

    /// Capacity exceeds the largest size whose index differences stay unambiguous.
    #[error("ring capacity {0} exceeds the supported maximum")]
    CapacityTooLarge(u32),

    /// An exact-size or staged ring was asked to hold nothing.
    #[error("ring capacity must be non-zero")]
    ZeroCapacity,

    /// A staged ring needs at least one stage.
    #[error("staged ring needs at least one stage")]
    ZeroStages,

    /// Stage index outside `0..stages`.
    #[error("stage {stage} out of range (ring has {stages} stages)")]
    StageOutOfRange {
        /// Requested stage.
        stage: u32,
        /// Number of stages.
        stages: u32,
    },

    /// The element type has no size.
    #[error("ring elements must not be zero-sized")]
    ZeroSizedElement,

    /// A head-tail distance was requested for a side that is not RTS.
    #[error("head-tail distance is only defined for relaxed-tail-synchronized sides")]
    NotRts,

    /// Two-phase operations need a side that can roll its head back.
    #[error("peek operations are not supported with {0} synchronization")]
    PeekUnsupported(SyncType),
}
