//! Ring construction parameters.

use core::fmt;
use core::marker::PhantomData;

use crate::error::RingError;
use crate::ring::Ring;

/// Synchronization discipline of one side (producer or consumer) of a ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SyncType {
    /// One thread at a time. No CAS, no tail wait.
    Single,
    /// CAS on head, then each thread waits for its turn to move tail.
    #[default]
    MultiPlain,
    /// Head-tail synchronized: a single open reservation per side.
    MultiHts,
    /// Relaxed tail synchronization: the last finisher publishes for everyone.
    MultiRts,
}

impl SyncType {
    /// `true` when the side supports two-phase (peek) operations.
    pub const fn supports_peek(self) -> bool {
        matches!(self, SyncType::Single | SyncType::MultiHts)
    }
}

impl fmt::Display for SyncType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncType::Single => "single",
            SyncType::MultiPlain => "multi-plain",
            SyncType::MultiHts => "multi-hts",
            SyncType::MultiRts => "multi-rts",
        };
        f.write_str(name)
    }
}

/// How a data-path operation treats a request it cannot fully satisfy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Behavior {
    /// All or nothing ("bulk").
    Exact,
    /// As many as possible ("burst").
    UpTo,
}

/// Divisor applied to the capacity for the default RTS head-tail distance.
pub const HTD_MAX_DIVISOR: u32 = 8;

/// Builder for [`Ring`].
///
/// ```rust
/// use sluice_ring::{Ring, SyncType};
///
/// let ring = Ring::<u64>::builder(1024)
///     .producer(SyncType::MultiRts)
///     .consumer(SyncType::MultiHts)
///     .build()
///     .unwrap();
/// assert_eq!(ring.capacity(), 1024);
/// ```
#[derive(Debug, Clone)]
pub struct RingBuilder<T> {
    pub(crate) capacity: u32,
    pub(crate) producer: SyncType,
    pub(crate) consumer: SyncType,
    pub(crate) producer_htd_max: Option<u32>,
    pub(crate) consumer_htd_max: Option<u32>,
    pub(crate) exact_size: bool,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Copy> RingBuilder<T> {
    /// Creates a builder for a ring of `capacity` elements, multi-plain on both sides.
    pub fn new(capacity: u32) -> Self {
        Self {
            capacity,
            producer: SyncType::MultiPlain,
            consumer: SyncType::MultiPlain,
            producer_htd_max: None,
            consumer_htd_max: None,
            exact_size: false,
            _marker: PhantomData,
        }
    }

    /// Sets the producer discipline.
    pub fn producer(mut self, sync: SyncType) -> Self {
        self.producer = sync;
        self
    }

    /// Sets the consumer discipline.
    pub fn consumer(mut self, sync: SyncType) -> Self {
        self.consumer = sync;
        self
    }

    /// Sets the producer head-tail distance. Requires an RTS producer.
    pub fn producer_htd_max(mut self, max: u32) -> Self {
        self.producer_htd_max = Some(max);
        self
    }

    /// Sets the consumer head-tail distance. Requires an RTS consumer.
    pub fn consumer_htd_max(mut self, max: u32) -> Self {
        self.consumer_htd_max = Some(max);
        self
    }

    /// Holds exactly `capacity` elements, with storage rounded up to the
    /// next power of two. Without it `capacity` must be a power of two.
    pub fn exact_size(mut self, exact: bool) -> Self {
        self.exact_size = exact;
        self
    }

    /// Number of storage slots the ring will allocate.
    pub(crate) fn storage_size(&self) -> Result<u32, RingError> {
        let size = if self.exact_size {
            if self.capacity == 0 {
                return Err(RingError::ZeroCapacity);
            }
            self.capacity
                .checked_next_power_of_two()
                .ok_or(RingError::CapacityTooLarge(self.capacity))?
        } else {
            if !self.capacity.is_power_of_two() {
                return Err(RingError::CapacityNotPowerOfTwo(self.capacity));
            }
            self.capacity
        };
        if size > crate::ring::MAX_CAPACITY {
            return Err(RingError::CapacityTooLarge(self.capacity));
        }
        Ok(size)
    }

    /// Validates the parameters and allocates the ring.
    pub fn build(self) -> Result<Ring<T>, RingError> {
        if core::mem::size_of::<T>() == 0 {
            return Err(RingError::ZeroSizedElement);
        }
        let size = self.storage_size()?;
        if self.producer_htd_max.is_some() && self.producer != SyncType::MultiRts {
            return Err(RingError::NotRts);
        }
        if self.consumer_htd_max.is_some() && self.consumer != SyncType::MultiRts {
            return Err(RingError::NotRts);
        }
        Ok(Ring::from_builder(self, size))
    }
}
