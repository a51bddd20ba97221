use std::alloc::{self, Layout};
use std::mem;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};

use tracing::{debug, error, trace};

use crate::backoff::Backoff;
use crate::config::PoolConfig;
use crate::error::{Error, Result};

/// Alignment used by [`Pool::allocate`].
///
/// Word-sized on aarch64, where unaligned loads can fault; byte-aligned
/// elsewhere so that consecutive small allocations pack tightly.
#[cfg(target_arch = "aarch64")]
pub const DEFAULT_ALIGNMENT: usize = mem::size_of::<usize>();

/// Alignment used by [`Pool::allocate`].
///
/// Word-sized on aarch64, where unaligned loads can fault; byte-aligned
/// elsewhere so that consecutive small allocations pack tightly.
#[cfg(not(target_arch = "aarch64"))]
pub const DEFAULT_ALIGNMENT: usize = 1;

/// Bytes of padding needed to move `address` up to a multiple of `boundary`.
///
/// Zero when `address` is already aligned or `boundary <= 1`.
#[must_use]
pub const fn align_padding(address: usize, boundary: usize) -> usize {
    if boundary <= 1 {
        return 0;
    }
    match address % boundary {
        0 => 0,
        rem => boundary - rem,
    }
}

/// Header of one slab obtained from the system allocator.
///
/// The slab is laid out as this header followed by `capacity` data bytes.
/// Handed-out ranges stay valid until the pool rewinds, even after the
/// chunk stops being the head.
struct Chunk {
    /// Offset of the next free data byte. Only moves forward.
    cursor: AtomicUsize,
    /// Number of data bytes after the header.
    capacity: usize,
    /// Chunk that was the head when this one was installed.
    next: *mut Chunk,
    /// Layout the slab was allocated with.
    layout: Layout,
}

const HEADER: usize = mem::size_of::<Chunk>();

impl Chunk {
    fn layout(capacity: usize) -> Result<Layout> {
        let size = HEADER.checked_add(capacity).ok_or(Error::SizeOverflow {
            what: "chunk size",
        })?;
        Layout::from_size_align(size, mem::align_of::<Self>()).map_err(|_| Error::SizeOverflow {
            what: "chunk layout",
        })
    }

    /// First data byte of `chunk`.
    fn data(chunk: NonNull<Self>) -> *mut u8 {
        // SAFETY: the slab is at least HEADER bytes long, so HEADER is at
        // most one past the end of the allocation.
        unsafe { chunk.as_ptr().cast::<u8>().add(HEADER) }
    }
}

/// Thread-safe bump allocator backed by a chain of large chunks.
///
/// Allocation is lock-free via `&self`: threads race to advance the head
/// chunk's cursor with compare-and-swap, and a thread that finds the head
/// full installs a fresh chunk with another CAS. Memory is never returned
/// piecemeal; [`rewind`](Self::rewind) (or drop) hands every chunk back to
/// the system allocator at once.
///
/// Arrays built on a pool borrow it, so the borrow checker rejects a
/// rewind while any array (or any reference from [`alloc`](Self::alloc))
/// is still alive:
///
/// ```compile_fail
/// use pool_arrays::{DynamicArray, Pool};
///
/// let mut pool = Pool::new();
/// let array = DynamicArray::new(&pool).unwrap();
/// array.push_back(1u32).unwrap();
/// pool.rewind();
/// assert_eq!(array.len(), 1);
/// ```
///
/// # Example
///
/// ```
/// use pool_arrays::Pool;
///
/// let mut pool = Pool::with_block_size(4096);
/// let ptr = pool.allocate_aligned(100, 16).unwrap();
/// assert_eq!(ptr.as_ptr() as usize % 16, 0);
/// assert_eq!(pool.used(), 100);
///
/// pool.rewind();
/// assert_eq!(pool.allocated(), 0);
/// ```
pub struct Pool {
    /// Newest chunk; older chunks hang off its `next` link.
    head: AtomicPtr<Chunk>,
    block_size: usize,
    /// Bytes handed out to callers.
    used: AtomicUsize,
    /// Bytes obtained from the system allocator, headers and slack included.
    allocated: AtomicUsize,
}

impl Pool {
    /// Creates an empty pool with the default block size.
    ///
    /// No memory is obtained until the first allocation.
    #[must_use]
    pub const fn new() -> Self {
        Self::with_block_size(PoolConfig::DEFAULT_BLOCK_SIZE)
    }

    /// Creates an empty pool whose chunks hold `block_size` data bytes.
    ///
    /// A block size of zero is treated as one.
    #[must_use]
    pub const fn with_block_size(block_size: usize) -> Self {
        Self {
            head: AtomicPtr::new(ptr::null_mut()),
            block_size: if block_size == 0 { 1 } else { block_size },
            used: AtomicUsize::new(0),
            allocated: AtomicUsize::new(0),
        }
    }

    /// Creates an empty pool from a validated config.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if the config fails validation.
    pub const fn with_config(config: PoolConfig) -> Result<Self> {
        if let Err(e) = config.validate() {
            return Err(e);
        }
        Ok(Self::with_block_size(config.block_size))
    }

    /// Allocates `bytes` bytes at [`DEFAULT_ALIGNMENT`].
    ///
    /// # Errors
    ///
    /// See [`allocate_aligned`](Self::allocate_aligned).
    pub fn allocate(&self, bytes: usize) -> Result<NonNull<u8>> {
        self.allocate_aligned(bytes, DEFAULT_ALIGNMENT)
    }

    /// Allocates `bytes` bytes whose address is a multiple of `alignment`.
    ///
    /// The returned range is exclusively owned by the caller and stays valid
    /// until the pool is rewound or dropped. Any non-zero alignment is
    /// accepted, not only powers of two. Requests larger than the block size
    /// get a dedicated chunk.
    ///
    /// Safe to call concurrently from any number of threads.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidAlignment`] if `alignment` is zero.
    /// - [`Error::SizeOverflow`] if the chunk size overflows.
    /// - [`Error::OutOfMemory`] if the system allocator fails.
    pub fn allocate_aligned(&self, bytes: usize, alignment: usize) -> Result<NonNull<u8>> {
        if alignment == 0 {
            return Err(Error::InvalidAlignment { alignment });
        }

        let mut backoff = Backoff::new();
        loop {
            let head = self.head.load(Ordering::Acquire);
            if let Some(chunk) = NonNull::new(head) {
                // SAFETY: installed chunks stay alive until rewind, which
                // needs &mut self.
                let header = unsafe { chunk.as_ref() };
                let base = Chunk::data(chunk);
                let at = header.cursor.load(Ordering::Relaxed);
                let padding = align_padding(base.addr().wrapping_add(at), alignment);
                let end = at
                    .checked_add(padding)
                    .and_then(|start| start.checked_add(bytes))
                    .filter(|&end| end <= header.capacity);

                if let Some(end) = end {
                    if header
                        .cursor
                        .compare_exchange_weak(at, end, Ordering::AcqRel, Ordering::Relaxed)
                        .is_ok()
                    {
                        self.used.fetch_add(bytes, Ordering::AcqRel);
                        // SAFETY: at + padding + bytes <= capacity, and the
                        // CAS made [at, end) ours alone.
                        return Ok(unsafe { NonNull::new_unchecked(base.add(at + padding)) });
                    }
                    backoff.snooze();
                    continue;
                }
            }

            self.add_chunk(head, bytes, alignment)?;
        }
    }

    /// Obtains a chunk large enough for `bytes` at `alignment` and tries to
    /// install it in place of `observed`.
    ///
    /// Losing the install race is not an error: another thread put a fresh
    /// chunk in place, so the caller simply retries.
    fn add_chunk(&self, observed: *mut Chunk, bytes: usize, alignment: usize) -> Result<()> {
        let capacity = bytes
            .checked_add(alignment - 1)
            .ok_or(Error::SizeOverflow { what: "chunk size" })?
            .max(self.block_size);
        let layout = Chunk::layout(capacity)?;

        // SAFETY: layout size is at least HEADER, which is non-zero.
        let raw = unsafe { alloc::alloc(layout) }.cast::<Chunk>();
        let Some(chunk) = NonNull::new(raw) else {
            error!(
                requested = bytes,
                chunk_bytes = layout.size(),
                "system allocator refused a pool chunk"
            );
            return Err(Error::OutOfMemory {
                requested: bytes,
                alignment,
                used: self.used(),
                allocated: self.allocated(),
            });
        };

        // SAFETY: chunk is freshly allocated with Chunk's layout.
        unsafe {
            chunk.as_ptr().write(Chunk {
                cursor: AtomicUsize::new(0),
                capacity,
                next: observed,
                layout,
            });
        }

        // Account before publishing so `used <= allocated` holds for anyone
        // allocating out of the new chunk.
        self.allocated.fetch_add(layout.size(), Ordering::AcqRel);
        match self.head.compare_exchange(
            observed,
            chunk.as_ptr(),
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => {
                debug!(chunk_bytes = layout.size(), "pool chunk installed");
            }
            Err(_) => {
                self.allocated.fetch_sub(layout.size(), Ordering::AcqRel);
                // SAFETY: the chunk never became visible to other threads.
                unsafe { alloc::dealloc(raw.cast::<u8>(), layout) };
                trace!("lost chunk install race");
            }
        }
        Ok(())
    }

    /// Moves `value` into the pool and returns a reference to it.
    ///
    /// The value's destructor never runs: rewinding reclaims the memory
    /// without dropping anything.
    ///
    /// # Errors
    ///
    /// See [`allocate_aligned`](Self::allocate_aligned).
    pub fn alloc<T>(&self, value: T) -> Result<&mut T> {
        let ptr = self
            .allocate_aligned(mem::size_of::<T>(), mem::align_of::<T>())?
            .cast::<T>();
        // SAFETY: ptr is aligned for T, sized for T, and exclusively ours.
        unsafe {
            ptr.as_ptr().write(value);
            Ok(&mut *ptr.as_ptr())
        }
    }

    /// Copies `src` into the pool.
    ///
    /// # Errors
    ///
    /// See [`allocate_aligned`](Self::allocate_aligned).
    pub fn alloc_slice_copy<T: Copy>(&self, src: &[T]) -> Result<&mut [T]> {
        let ptr = self
            .allocate_aligned(mem::size_of_val(src), mem::align_of::<T>())?
            .cast::<T>();
        // SAFETY: ptr is aligned for T with room for src.len() elements, and
        // freshly allocated memory cannot overlap src.
        unsafe {
            ptr::copy_nonoverlapping(src.as_ptr(), ptr.as_ptr(), src.len());
            Ok(std::slice::from_raw_parts_mut(ptr.as_ptr(), src.len()))
        }
    }

    /// Copies `s` into the pool.
    ///
    /// # Errors
    ///
    /// See [`allocate_aligned`](Self::allocate_aligned).
    pub fn alloc_str(&self, s: &str) -> Result<&mut str> {
        let bytes = self.alloc_slice_copy(s.as_bytes())?;
        // SAFETY: byte-for-byte copy of valid UTF-8.
        Ok(unsafe { std::str::from_utf8_unchecked_mut(bytes) })
    }

    /// Returns every chunk to the system allocator and zeroes both counters.
    ///
    /// `&mut self` guarantees no allocation is in flight and no reference
    /// into the pool survives. The next allocation starts a fresh chunk.
    pub fn rewind(&mut self) {
        let chunks = self.chunk_count();
        let mut current = mem::replace(self.head.get_mut(), ptr::null_mut());
        while let Some(chunk) = NonNull::new(current) {
            // SAFETY: every linked chunk was allocated in add_chunk with the
            // layout stored in its header, and is freed exactly once here.
            unsafe {
                let Chunk { next, layout, .. } = chunk.as_ptr().read();
                alloc::dealloc(chunk.as_ptr().cast::<u8>(), layout);
                current = next;
            }
        }
        let used = mem::take(self.used.get_mut());
        let allocated = mem::take(self.allocated.get_mut());
        if chunks > 0 {
            debug!(chunks, used, allocated, "pool rewound");
        }
    }

    /// Bytes handed out to callers since the last rewind.
    #[must_use]
    pub fn used(&self) -> usize {
        self.used.load(Ordering::Acquire)
    }

    /// Bytes obtained from the system allocator since the last rewind,
    /// chunk headers and alignment slack included.
    #[must_use]
    pub fn allocated(&self) -> usize {
        self.allocated.load(Ordering::Acquire)
    }

    /// Configured chunk size in data bytes.
    #[must_use]
    pub const fn block_size(&self) -> usize {
        self.block_size
    }

    /// Number of chunks currently installed.
    #[must_use]
    pub fn chunk_count(&self) -> usize {
        let mut count = 0;
        let mut current = self.head.load(Ordering::Acquire);
        while let Some(chunk) = NonNull::new(current) {
            count += 1;
            // SAFETY: installed chunks stay alive until rewind.
            current = unsafe { chunk.as_ref() }.next;
        }
        count
    }
}

impl Default for Pool {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Pool {
    fn drop(&mut self) {
        self.rewind();
    }
}

impl std::fmt::Debug for Pool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("block_size", &self.block_size)
            .field("used", &self.used())
            .field("allocated", &self.allocated())
            .field("chunks", &self.chunk_count())
            .finish()
    }
}
