use std::fmt;
use std::iter;
use std::marker::PhantomData;
use std::mem;
use std::ops::Index;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicUsize, Ordering};

use tracing::trace;

use crate::backoff::Backoff;
use crate::config::ArrayConfig;
use crate::error::{Error, Result};
use crate::iter::Iter;
use crate::pool::Pool;

/// One growth step of a [`DynamicArray`]: a fixed run of slots plus
/// per-slot readiness flags, all carved out of the pool.
pub(crate) struct Node<T> {
    data: NonNull<T>,
    flags: NonNull<AtomicBool>,
    capacity: usize,
    /// Next slot to be claimed. May overshoot `capacity` briefly before
    /// the overshooting writer pins it back.
    used: AtomicUsize,
    /// All slots `< published` are written and readable.
    published: AtomicUsize,
    /// Set once, by the thread that installed the following node.
    next: AtomicPtr<Node<T>>,
}

impl<T> Node<T> {
    fn create(pool: &Pool, capacity: usize) -> Result<NonNull<Self>> {
        let data_bytes = mem::size_of::<T>()
            .checked_mul(capacity)
            .ok_or(Error::SizeOverflow { what: "node data" })?;
        let data = pool
            .allocate_aligned(data_bytes, mem::align_of::<T>())?
            .cast::<T>();
        let flags = pool
            .allocate_aligned(capacity, mem::align_of::<AtomicBool>())?
            .cast::<AtomicBool>();
        // SAFETY: `capacity` flag bytes were just allocated; all-zero is
        // `false` for AtomicBool.
        unsafe { ptr::write_bytes(flags.as_ptr(), 0, capacity) };

        let node = pool.alloc(Self {
            data,
            flags,
            capacity,
            used: AtomicUsize::new(0),
            published: AtomicUsize::new(0),
            next: AtomicPtr::new(ptr::null_mut()),
        })?;
        Ok(NonNull::from(node))
    }

    /// Number of readable slots.
    pub(crate) fn len(&self) -> usize {
        self.published.load(Ordering::Acquire)
    }

    pub(crate) fn next(&self) -> Option<&Self> {
        // SAFETY: linked nodes live as long as the pool borrow of the array
        // that owns this node.
        NonNull::new(self.next.load(Ordering::Acquire)).map(|next| unsafe { next.as_ref() })
    }

    /// # Safety
    ///
    /// `index` must be below [`len`](Self::len).
    pub(crate) unsafe fn get_unchecked(&self, index: usize) -> &T {
        // SAFETY: index < published, so the slot is written, and the
        // Acquire load of `published` synchronizes with its writer.
        unsafe { &*self.data.as_ptr().add(index) }
    }

    /// Moves `published` forward over every consecutive ready slot.
    ///
    /// Never waits: if the next slot is still being written, its writer
    /// advances past it (and past us) when it finishes. SeqCst on both the
    /// flag store and the `published` accesses rules out the case where
    /// each writer misses the other's update.
    fn advance_published(&self) {
        loop {
            let p = self.published.load(Ordering::SeqCst);
            if p >= self.capacity {
                break;
            }
            // SAFETY: p < capacity.
            let ready = unsafe { (*self.flags.as_ptr().add(p)).load(Ordering::SeqCst) };
            if !ready {
                break;
            }
            let _ = self
                .published
                .compare_exchange(p, p + 1, Ordering::SeqCst, Ordering::SeqCst);
        }
    }
}

/// Thread-safe grow-only array whose storage comes from a [`Pool`].
///
/// Elements live in a chain of nodes; each new node is
/// [`ArrayConfig::growth_factor`] times larger than the last. Appending is
/// lock-free via `&self`: writers claim slots with `fetch_add`, and the
/// writer that overshoots a full node installs the next one with
/// compare-and-swap. A writer that loses that race leaves its node unused
/// inside the pool.
///
/// Iteration is O(1) per element. Random access via [`get`](Self::get)
/// walks the node chain, so indexing every element in turn is quadratic.
///
/// Readers may run alongside writers; they see every element whose write
/// has completed in slot order and may miss in-flight ones. Once all
/// writers are done, reads are exact.
///
/// Elements are dropped when the array is dropped. The memory itself
/// belongs to the pool.
///
/// # Example
///
/// ```
/// use pool_arrays::{DynamicArray, Pool};
///
/// let pool = Pool::new();
/// let array = DynamicArray::new(&pool).unwrap();
/// array.push_back(10).unwrap();
/// array.push_back(20).unwrap();
///
/// assert_eq!(array[1], 20);
/// assert_eq!(array.back(), Ok(&20));
/// assert_eq!(array.iter().copied().collect::<Vec<_>>(), [10, 20]);
/// ```
pub struct DynamicArray<'pool, T> {
    pool: &'pool Pool,
    head: NonNull<Node<T>>,
    tail: AtomicPtr<Node<T>>,
    config: ArrayConfig,
    _marker: PhantomData<T>,
}

// SAFETY: the array owns its elements (hence T: Send) and every shared
// mutation goes through atomics. Writers only touch slots they claimed via
// fetch_add; readers only touch published slots, so sharing needs T: Sync.
unsafe impl<T: Send> Send for DynamicArray<'_, T> {}
unsafe impl<T: Send + Sync> Sync for DynamicArray<'_, T> {}

impl<'pool, T> DynamicArray<'pool, T> {
    /// Creates an empty array with the default config (head node of one
    /// element, growth factor 1.5).
    ///
    /// # Errors
    ///
    /// Returns an allocation error if the pool cannot hold the head node.
    pub fn new(pool: &'pool Pool) -> Result<Self> {
        Self::with_config(pool, ArrayConfig::default())
    }

    /// Creates an empty array whose head node holds `initial_capacity`
    /// elements.
    ///
    /// # Errors
    ///
    /// See [`with_config`](Self::with_config).
    pub fn with_capacity(pool: &'pool Pool, initial_capacity: usize) -> Result<Self> {
        Self::with_config(
            pool,
            ArrayConfig::default().with_initial_capacity(initial_capacity),
        )
    }

    /// Creates an empty array with the given growth config.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] for an invalid config, or an
    /// allocation error if the pool cannot hold the head node.
    pub fn with_config(pool: &'pool Pool, config: ArrayConfig) -> Result<Self> {
        config.validate()?;
        let head = Node::create(pool, config.initial_capacity)?;
        Ok(Self {
            pool,
            head,
            tail: AtomicPtr::new(head.as_ptr()),
            config,
            _marker: PhantomData,
        })
    }

    /// Appends `value`.
    ///
    /// Can be called concurrently from multiple threads. Elements pushed by
    /// different threads appear in the order their slots were claimed.
    ///
    /// # Errors
    ///
    /// Returns an allocation error if a new node is needed and the pool
    /// cannot provide it. `value` is dropped in that case.
    pub fn push_back(&self, value: T) -> Result<()> {
        let mut backoff = Backoff::new();
        loop {
            let last = self.tail.load(Ordering::Acquire);
            // SAFETY: tail always points at a linked node, alive for 'pool.
            let node = unsafe { &*last };

            let slot = node.used.fetch_add(1, Ordering::AcqRel);
            if slot < node.capacity {
                // SAFETY: slot < capacity, and fetch_add handed this slot
                // to us alone.
                unsafe {
                    node.data.as_ptr().add(slot).write(value);
                    (*node.flags.as_ptr().add(slot)).store(true, Ordering::SeqCst);
                }
                node.advance_published();
                return Ok(());
            }

            // Every slot below capacity was claimed before ours, so pinning
            // cannot hide an unclaimed slot.
            node.used.store(node.capacity, Ordering::Release);
            if self.tail.load(Ordering::Acquire) != last {
                continue;
            }

            let capacity = self.config.next_capacity(node.capacity);
            let another = Node::create(self.pool, capacity)?;
            if self
                .tail
                .compare_exchange(last, another.as_ptr(), Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                node.next.store(another.as_ptr(), Ordering::Release);
                trace!(capacity, "dynamic array node appended");
            } else {
                trace!("lost dynamic array node race");
                backoff.snooze();
            }
        }
    }

    /// Appends every value from `values`, stopping at the first error.
    ///
    /// # Errors
    ///
    /// See [`push_back`](Self::push_back).
    pub fn push_all(&self, values: impl IntoIterator<Item = T>) -> Result<()> {
        values.into_iter().try_for_each(|value| self.push_back(value))
    }

    /// Returns the element at `index`, counting from 0 in append order.
    ///
    /// Walks the node chain: O(number of nodes).
    ///
    /// # Errors
    ///
    /// Returns [`Error::IndexOutOfBounds`] if `index >= len()`.
    pub fn get(&self, index: usize) -> Result<&T> {
        let mut remaining = index;
        for node in self.nodes() {
            let len = node.len();
            if remaining < len {
                // SAFETY: remaining < len.
                return Ok(unsafe { node.get_unchecked(remaining) });
            }
            remaining -= len;
        }
        Err(Error::IndexOutOfBounds {
            index,
            len: index - remaining,
        })
    }

    /// Returns the last published element.
    ///
    /// Exact once writers are done; under concurrent pushes it is some
    /// recently appended element.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Empty`] if nothing has been published.
    pub fn back(&self) -> Result<&T> {
        // SAFETY: tail always points at a linked node, alive for 'pool.
        let tail = unsafe { &*self.tail.load(Ordering::Acquire) };
        if let Some(last) = tail.len().checked_sub(1) {
            // SAFETY: last < len.
            return Ok(unsafe { tail.get_unchecked(last) });
        }
        // The tail node was just installed and is still empty.
        self.nodes()
            .filter_map(|node| {
                // SAFETY: index < len.
                node.len()
                    .checked_sub(1)
                    .map(|last| unsafe { node.get_unchecked(last) })
            })
            .last()
            .ok_or(Error::Empty)
    }

    /// Returns the number of published elements. O(number of nodes).
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes().map(Node::len).sum()
    }

    /// Returns `true` if no element has been published.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes().all(|node| node.len() == 0)
    }

    /// Returns the capacity of every node, head first.
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

    /// Returns an iterator over published elements in append order.
    ///
    /// Each call starts again from the head.
    pub fn iter(&self) -> Iter<'_, T> {
        // SAFETY: the head node lives as long as the pool borrow.
        Iter::new(unsafe { self.head.as_ref() })
    }

    fn nodes(&self) -> impl Iterator<Item = &Node<T>> {
        // SAFETY: the head node lives as long as the pool borrow.
        iter::successors(Some(unsafe { self.head.as_ref() }), |node| node.next())
    }
}

impl<T> Index<usize> for DynamicArray<'_, T> {
    type Output = T;

    fn index(&self, index: usize) -> &T {
        match self.get(index) {
            Ok(value) => value,
            Err(e) => panic!("{e}"),
        }
    }
}

impl<'a, T> IntoIterator for &'a DynamicArray<'_, T> {
    type Item = &'a T;
    type IntoIter = Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<T: fmt::Debug> fmt::Debug for DynamicArray<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

impl<T> Drop for DynamicArray<'_, T> {
    fn drop(&mut self) {
        if !mem::needs_drop::<T>() {
            return;
        }
        for node in self.nodes() {
            for slot in (0..node.len()).rev() {
                // SAFETY: slot < published, so the value is initialized,
                // and &mut self means no reader can still observe it.
                unsafe { node.data.as_ptr().add(slot).drop_in_place() };
            }
        }
    }
}
