//! Error type shared by the pool and both arrays.

use thiserror::Error;

/// Errors returned by [`Pool`](crate::Pool), [`DynamicArray`](crate::DynamicArray)
/// and [`CompressedArray`](crate::CompressedArray).
///
/// Lost compare-and-swap races are retried internally and never show up here.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// The system allocator refused to hand out a new chunk.
    #[error(
        "out of memory: requested {requested} bytes aligned to {alignment} \
         ({used} bytes used, {allocated} bytes allocated)"
    )]
    OutOfMemory {
        /// Number of bytes the caller asked for.
        requested: usize,
        /// Alignment the caller asked for.
        alignment: usize,
        /// Pool `used` counter at the time of failure.
        used: usize,
        /// Pool `allocated` counter at the time of failure.
        allocated: usize,
    },

    /// Alignment of zero was requested.
    #[error("invalid alignment {alignment}: must be non-zero")]
    InvalidAlignment {
        /// The rejected alignment.
        alignment: usize,
    },

    /// A size computation overflowed `usize`.
    #[error("size overflow computing {what}")]
    SizeOverflow {
        /// What was being computed.
        what: &'static str,
    },

    /// Random access past the end of a [`DynamicArray`](crate::DynamicArray).
    #[error("index out of bounds: index is {index} but length is {len}")]
    IndexOutOfBounds {
        /// The requested index.
        index: usize,
        /// Number of elements visible when the walk finished.
        len: usize,
    },

    /// The array holds no elements.
    #[error("array is empty")]
    Empty,

    /// A configuration value failed validation.
    #[error("invalid configuration: {reason}")]
    InvalidConfig {
        /// Which constraint was violated.
        reason: &'static str,
    },
}

impl Error {
    /// Returns `true` if this is [`Error::OutOfMemory`].
    ///
    /// Out-of-memory is the only variant worth retrying after the caller
    /// has released memory elsewhere (for example by rewinding another pool).
    #[must_use]
    pub const fn is_out_of_memory(&self) -> bool {
        matches!(self, Self::OutOfMemory { .. })
    }
}

/// Result alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;
