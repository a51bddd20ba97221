//! Thread-safe pool allocator with lock-free grow-only arrays.
//!
//! `pool-arrays` provides a bump allocator that never frees individual
//! objects, and two append-only containers that take all their memory from
//! it. Built for allocation-heavy workloads such as posting lists and index
//! builders, where everything is thrown away at once.
//!
//! # Types
//!
//! - [`Pool`]: lock-free bump allocator over a chain of large chunks,
//!   released all at once by [`Pool::rewind`] or drop
//! - [`DynamicArray<T>`]: grow-only typed array, lock-free `push_back`
//! - [`CompressedArray`]: grow-only `u32` array stored as base-128 varints
//!
//! # Key properties
//!
//! - **No locks**: contention only ever causes compare-and-swap retries
//! - **Borrowed pool**: arrays hold `&Pool`, so rewinding while an array is
//!   alive does not compile
//! - **Recoverable errors**: allocation failure and out-of-range access are
//!   [`Error`] values, never aborts or silent wrong data
//! - **Logging**: chunk, node and rewind events go through [`tracing`];
//!   install any subscriber to see them
//!
//! # Example
//!
//! ```
//! use std::thread;
//!
//! use pool_arrays::{ArrayConfig, DynamicArray, Pool};
//!
//! let pool = Pool::new();
//! let config = ArrayConfig::default().with_growth_factor(2.0);
//! let array = DynamicArray::with_config(&pool, config).unwrap();
//!
//! thread::scope(|s| {
//!     for t in 0..4u32 {
//!         let array = &array;
//!         s.spawn(move || {
//!             for i in 0..100 {
//!                 array.push_back(t * 100 + i).unwrap();
//!             }
//!         });
//!     }
//! });
//!
//! let mut values: Vec<u32> = array.iter().copied().collect();
//! values.sort_unstable();
//! assert_eq!(values, (0..400).collect::<Vec<_>>());
//! ```

#![deny(missing_docs)]

mod backoff;
mod compressed;
mod config;
mod dynamic_array;
mod error;
mod iter;
mod pool;
pub mod varint;

pub use compressed::{CompressedArray, RESERVED_BYTES};
pub use config::{ArrayConfig, PoolConfig};
pub use dynamic_array::DynamicArray;
pub use error::{Error, Result};
pub use iter::{CompressedIter, Iter};
pub use pool::{DEFAULT_ALIGNMENT, Pool, align_padding};

#[cfg(test)]
mod tests;
