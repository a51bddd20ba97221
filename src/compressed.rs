use std::fmt;
use std::iter;
use std::ptr::{self, NonNull};
use std::slice;
use std::sync::atomic::{AtomicPtr, AtomicU8, AtomicUsize, Ordering};

use tracing::trace;

use crate::backoff::Backoff;
use crate::config::ArrayConfig;
use crate::error::Result;
use crate::iter::CompressedIter;
use crate::pool::Pool;
use crate::varint;

/// Free bytes a node must have before a value is encoded into it.
///
/// More than [`varint::MAX_ENCODED_LEN`], so one value always fits; also
/// the smallest node the array ever allocates.
pub const RESERVED_BYTES: usize = 7;

/// One growth step of a [`CompressedArray`]: a run of encoded bytes.
///
/// Bytes are atomics so that a reader racing a writer never touches
/// undefined memory. Readers only decode below `published`, which moves
/// over a reservation once its bytes are stored.
pub(crate) struct ByteNode {
    data: NonNull<AtomicU8>,
    /// One bit per data byte, set at the first byte of every reservation
    /// whose bytes are fully stored.
    ready: NonNull<AtomicU8>,
    capacity: usize,
    /// Bytes reserved by writers. Never exceeds `capacity`.
    used: AtomicUsize,
    /// All bytes `< published` hold complete values.
    published: AtomicUsize,
    next: AtomicPtr<ByteNode>,
}

impl ByteNode {
    fn create(pool: &Pool, capacity: usize) -> Result<NonNull<Self>> {
        let data = pool.allocate_aligned(capacity, 1)?.cast::<AtomicU8>();
        let ready_bytes = capacity.div_ceil(8);
        let ready = pool.allocate_aligned(ready_bytes, 1)?.cast::<AtomicU8>();
        // SAFETY: both ranges were just allocated with these sizes; zero is
        // a valid AtomicU8.
        unsafe {
            ptr::write_bytes(data.as_ptr(), 0, capacity);
            ptr::write_bytes(ready.as_ptr(), 0, ready_bytes);
        }
        let node = pool.alloc(Self {
            data,
            ready,
            capacity,
            used: AtomicUsize::new(0),
            published: AtomicUsize::new(0),
            next: AtomicPtr::new(ptr::null_mut()),
        })?;
        Ok(NonNull::from(node))
    }

    /// Number of bytes holding complete, readable values.
    pub(crate) fn len(&self) -> usize {
        self.published.load(Ordering::Acquire)
    }

    pub(crate) fn bytes(&self) -> &[AtomicU8] {
        // SAFETY: data holds `capacity` zero-initialized atomic bytes that
        // live as long as the pool borrow.
        unsafe { slice::from_raw_parts(self.data.as_ptr(), self.capacity) }
    }

    fn ready_bit(&self, offset: usize) -> &AtomicU8 {
        // SAFETY: offset < capacity, so offset / 8 < capacity.div_ceil(8).
        unsafe { &*self.ready.as_ptr().add(offset / 8) }
    }

    pub(crate) fn next(&self) -> Option<&Self> {
        // SAFETY: linked nodes live as long as the pool borrow.
        NonNull::new(self.next.load(Ordering::Acquire)).map(|next| unsafe { next.as_ref() })
    }

    /// Stores `encoded` at the reserved offset `at` and publishes it.
    fn write(&self, at: usize, encoded: &[u8]) {
        for (cell, &byte) in self.bytes()[at..at + encoded.len()].iter().zip(encoded) {
            cell.store(byte, Ordering::Release);
        }
        self.ready_bit(at).fetch_or(1 << (at % 8), Ordering::SeqCst);
        self.advance_published();
    }

    /// Moves `published` forward over every consecutive stored value.
    ///
    /// Same protocol as the typed array: never waits, and SeqCst on the
    /// ready bits and `published` guarantees the last finishing writer
    /// publishes everything before it.
    fn advance_published(&self) {
        loop {
            let p = self.published.load(Ordering::SeqCst);
            if p >= self.capacity {
                break;
            }
            let ready = self.ready_bit(p).load(Ordering::SeqCst) & (1 << (p % 8)) != 0;
            if !ready {
                break;
            }
            let bytes = self.bytes()[p..]
                .iter()
                .map(|byte| byte.load(Ordering::Acquire));
            let Some((_, width)) = varint::decode(bytes) else {
                break;
            };
            let _ = self.published.compare_exchange(
                p,
                p + width,
                Ordering::SeqCst,
                Ordering::SeqCst,
            );
        }
    }
}

/// Thread-safe grow-only array of `u32`, stored as base-128 varints.
///
/// Same node chain and lock-free growth as
/// [`DynamicArray`](crate::DynamicArray), but nodes hold encoded bytes:
/// small values take one or two bytes instead of four. Capacities in
/// [`ArrayConfig`] are counted in bytes, and no node is smaller than
/// [`RESERVED_BYTES`].
///
/// Only forward iteration is offered; variable-width values would make
/// random access and `back()` full scans.
///
/// Readers may run alongside writers. They decode only values whose bytes
/// are fully stored, in reservation order, and may miss in-flight ones.
/// Once all writers are done, reads are exact.
///
/// # Example
///
/// ```
/// use pool_arrays::{CompressedArray, Pool};
///
/// let pool = Pool::new();
/// let postings = CompressedArray::new(&pool).unwrap();
/// for id in [0, 127, 128, 300] {
///     postings.push_back(id).unwrap();
/// }
///
/// assert_eq!(postings.encoded_len(), 6);
/// assert_eq!(postings.iter().collect::<Vec<_>>(), [0, 127, 128, 300]);
/// ```
pub struct CompressedArray<'pool> {
    pool: &'pool Pool,
    head: NonNull<ByteNode>,
    tail: AtomicPtr<ByteNode>,
    config: ArrayConfig,
}

// SAFETY: nodes are pool memory reachable only through atomics; all bytes
// are AtomicU8, byte ranges are reserved by CAS on `used`, and readers stay
// below `published`.
unsafe impl Send for CompressedArray<'_> {}
unsafe impl Sync for CompressedArray<'_> {}

impl<'pool> CompressedArray<'pool> {
    /// Creates an empty array with the default config.
    ///
    /// # Errors
    ///
    /// Returns an allocation error if the pool cannot hold the head node.
    pub fn new(pool: &'pool Pool) -> Result<Self> {
        Self::with_config(pool, ArrayConfig::default())
    }

    /// Creates an empty array with the given growth config.
    ///
    /// `initial_capacity` is in bytes and raised to [`RESERVED_BYTES`] if
    /// smaller.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`](crate::Error::InvalidConfig) for an
    /// invalid config, or an allocation error if the pool cannot hold the
    /// head node.
    pub fn with_config(pool: &'pool Pool, config: ArrayConfig) -> Result<Self> {
        config.validate()?;
        let head = ByteNode::create(pool, config.initial_capacity.max(RESERVED_BYTES))?;
        Ok(Self {
            pool,
            head,
            tail: AtomicPtr::new(head.as_ptr()),
            config,
        })
    }

    /// Appends `value`.
    ///
    /// Can be called concurrently from multiple threads.
    ///
    /// # Errors
    ///
    /// Returns an allocation error if a new node is needed and the pool
    /// cannot provide it.
    pub fn push_back(&self, value: u32) -> Result<()> {
        let (encoded, width) = varint::encode(value);
        let mut backoff = Backoff::new();
        loop {
            let last = self.tail.load(Ordering::Acquire);
            // SAFETY: tail always points at a linked node, alive for 'pool.
            let node = unsafe { &*last };

            let at = node.used.load(Ordering::Acquire);
            if node.capacity.saturating_sub(at) >= RESERVED_BYTES {
                if node
                    .used
                    .compare_exchange_weak(at, at + width, Ordering::AcqRel, Ordering::Relaxed)
                    .is_ok()
                {
                    node.write(at, &encoded[..width]);
                    return Ok(());
                }
                backoff.snooze();
                continue;
            }

            if self.tail.load(Ordering::Acquire) != last {
                continue;
            }

            let capacity = self
                .config
                .next_capacity(node.capacity)
                .max(RESERVED_BYTES);
            let another = ByteNode::create(self.pool, capacity)?;
            if self
                .tail
                .compare_exchange(last, another.as_ptr(), Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                node.next.store(another.as_ptr(), Ordering::Release);
                trace!(capacity, "compressed array node appended");
            } else {
                trace!("lost compressed array node race");
                backoff.snooze();
            }
        }
    }

    /// Appends every value from `values`, stopping at the first error.
    ///
    /// # Errors
    ///
    /// See [`push_back`](Self::push_back).
    pub fn push_all(&self, values: impl IntoIterator<Item = u32>) -> Result<()> {
        values.into_iter().try_for_each(|value| self.push_back(value))
    }

    /// Returns the total number of encoded bytes across all nodes.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        self.nodes().map(ByteNode::len).sum()
    }

    /// Returns `true` if nothing has been pushed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes().all(|node| node.len() == 0)
    }

    /// Returns the capacity in bytes of every node, head first.
    #[must_use]
    pub fn node_capacities(&self) -> Vec<usize> {
        self.nodes().map(|node| node.capacity).collect()
    }

    /// Returns the growth config.
    #[must_use]
    pub const fn config(&self) -> &ArrayConfig {
        &self.config
    }

    /// Returns the pool backing this array.
    #[must_use]
    pub const fn pool(&self) -> &'pool Pool {
        self.pool
    }

    /// Returns an iterator decoding values in insertion order.
    ///
    /// Each call starts again from the head.
    pub fn iter(&self) -> CompressedIter<'_> {
        // SAFETY: the head node lives as long as the pool borrow.
        CompressedIter::new(unsafe { self.head.as_ref() })
    }

    fn nodes(&self) -> impl Iterator<Item = &ByteNode> {
        // SAFETY: the head node lives as long as the pool borrow.
        iter::successors(Some(unsafe { self.head.as_ref() }), |node| node.next())
    }
}

impl<'a> IntoIterator for &'a CompressedArray<'_> {
    type Item = u32;
    type IntoIter = CompressedIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl fmt::Debug for CompressedArray<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}
