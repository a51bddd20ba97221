//! Pool and array configuration.

use crate::error::{Error, Result};

/// Configuration for a [`Pool`](crate::Pool).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PoolConfig {
    /// Data bytes in every chunk obtained from the system allocator.
    ///
    /// Requests larger than this get a dedicated chunk sized to fit them.
    /// Default: 1 MiB.
    pub block_size: usize,
}

impl PoolConfig {
    /// Default chunk size: 1 MiB.
    pub const DEFAULT_BLOCK_SIZE: usize = 1024 * 1024;

    /// Creates a config with default values.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            block_size: Self::DEFAULT_BLOCK_SIZE,
        }
    }

    /// Sets the chunk size.
    #[must_use]
    pub const fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        self
    }

    /// Checks the config for values the pool cannot work with.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if `block_size` is zero.
    pub const fn validate(&self) -> Result<()> {
        if self.block_size == 0 {
            return Err(Error::InvalidConfig {
                reason: "block_size must be non-zero",
            });
        }
        Ok(())
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Growth configuration shared by [`DynamicArray`](crate::DynamicArray) and
/// [`CompressedArray`](crate::CompressedArray).
///
/// Capacities are counted in elements for the typed array and in bytes for
/// the compressed one.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ArrayConfig {
    /// Capacity of the head node. Default: 1.
    pub initial_capacity: usize,
    /// Each new node is `floor(previous * growth_factor)` long. Default: 1.5.
    pub growth_factor: f64,
}

impl ArrayConfig {
    /// Default head node capacity.
    pub const DEFAULT_INITIAL_CAPACITY: usize = 1;

    /// Default growth factor.
    pub const DEFAULT_GROWTH_FACTOR: f64 = 1.5;

    /// Creates a config with default values.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            initial_capacity: Self::DEFAULT_INITIAL_CAPACITY,
            growth_factor: Self::DEFAULT_GROWTH_FACTOR,
        }
    }

    /// Sets the head node capacity.
    #[must_use]
    pub const fn with_initial_capacity(mut self, initial_capacity: usize) -> Self {
        self.initial_capacity = initial_capacity;
        self
    }

    /// Sets the growth factor.
    #[must_use]
    pub const fn with_growth_factor(mut self, growth_factor: f64) -> Self {
        self.growth_factor = growth_factor;
        self
    }

    /// Checks the config for values that would stall growth.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if `initial_capacity` is zero or
    /// `growth_factor` is not a finite number `>= 1.0`.
    pub fn validate(&self) -> Result<()> {
        if self.initial_capacity == 0 {
            return Err(Error::InvalidConfig {
                reason: "initial_capacity must be non-zero",
            });
        }
        if !self.growth_factor.is_finite() || self.growth_factor < 1.0 {
            return Err(Error::InvalidConfig {
                reason: "growth_factor must be finite and at least 1.0",
            });
        }
        Ok(())
    }

    /// Capacity of the node that follows a node of `previous` capacity.
    ///
    /// `floor(previous * growth_factor)`, never less than 1.
    #[must_use]
    #[expect(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        reason = "capacities are scaled by a float factor; the product is floored and saturates"
    )]
    pub fn next_capacity(&self, previous: usize) -> usize {
        // float -> int `as` saturates, so huge products clamp to usize::MAX.
        ((previous as f64 * self.growth_factor).floor() as usize).max(1)
    }
}

impl Default for ArrayConfig {
    fn default() -> Self {
        Self::new()
    }
}
