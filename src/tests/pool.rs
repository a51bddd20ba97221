use std::collections::HashSet;
use std::mem;
use std::thread;

use crate::{DEFAULT_ALIGNMENT, DynamicArray, Error, Pool, PoolConfig, align_padding};

#[test]
fn new_pool_is_empty() {
    let pool = Pool::new();
    assert_eq!(pool.used(), 0);
    assert_eq!(pool.allocated(), 0);
    assert_eq!(pool.chunk_count(), 0);
    assert_eq!(pool.block_size(), PoolConfig::DEFAULT_BLOCK_SIZE);
}

#[test]
fn first_allocation_obtains_one_chunk() {
    let pool = Pool::with_block_size(1024);
    pool.allocate_aligned(10, 1).unwrap();

    assert_eq!(pool.chunk_count(), 1);
    assert_eq!(pool.used(), 10);
    assert!(pool.allocated() > 1024);
}

#[test]
fn sequential_allocations_are_adjacent() {
    let pool = Pool::with_block_size(1024);
    let a = pool.allocate_aligned(10, 1).unwrap();
    let b = pool.allocate_aligned(20, 1).unwrap();
    let c = pool.allocate_aligned(30, 1).unwrap();

    assert_eq!(b.as_ptr() as usize, a.as_ptr() as usize + 10);
    assert_eq!(c.as_ptr() as usize, b.as_ptr() as usize + 20);
    assert_eq!(pool.used(), 60);
    assert_eq!(pool.chunk_count(), 1);
}

#[test]
fn aligned_allocations() {
    let pool = Pool::with_block_size(4096);
    pool.allocate_aligned(1, 1).unwrap();
    for alignment in [2, 3, 4, 8, 16, 24, 64, 100] {
        let ptr = pool.allocate_aligned(5, alignment).unwrap();
        assert_eq!(ptr.as_ptr() as usize % alignment, 0, "alignment {alignment}");
    }
}

#[test]
fn default_alignment() {
    let pool = Pool::new();
    for _ in 0..10 {
        let ptr = pool.allocate(3).unwrap();
        assert_eq!(ptr.as_ptr() as usize % DEFAULT_ALIGNMENT, 0);
    }
}

#[test]
fn zero_alignment_rejected() {
    let pool = Pool::new();
    assert_eq!(
        pool.allocate_aligned(8, 0),
        Err(Error::InvalidAlignment { alignment: 0 })
    );
    assert_eq!(pool.allocated(), 0);
}

#[test]
fn full_chunk_rolls_over() {
    let pool = Pool::with_block_size(64);
    pool.allocate_aligned(60, 1).unwrap();
    pool.allocate_aligned(10, 1).unwrap();

    assert_eq!(pool.chunk_count(), 2);
    assert_eq!(pool.used(), 70);
}

#[test]
fn oversized_request_gets_dedicated_chunk() {
    let pool = Pool::with_block_size(64);
    let ptr = pool.allocate_aligned(10_000, 1).unwrap();

    // SAFETY: the range is ours and 10_000 bytes long.
    unsafe { std::ptr::write_bytes(ptr.as_ptr(), 0xAB, 10_000) };
    assert_eq!(pool.chunk_count(), 1);
    assert!(pool.allocated() >= 10_000);
}

#[test]
fn oversized_aligned_request_fits() {
    let pool = Pool::with_block_size(16);
    let ptr = pool.allocate_aligned(1000, 512).unwrap();
    assert_eq!(ptr.as_ptr() as usize % 512, 0);
}

#[test]
fn zero_byte_allocation() {
    let pool = Pool::with_block_size(64);
    let a = pool.allocate_aligned(0, 1).unwrap();
    let b = pool.allocate_aligned(0, 1).unwrap();
    assert_eq!(a, b);
    assert_eq!(pool.used(), 0);
}

#[test]
fn used_never_exceeds_allocated() {
    let pool = Pool::with_block_size(100);
    for bytes in [1, 50, 99, 100, 101, 7, 300] {
        pool.allocate_aligned(bytes, 8).unwrap();
        assert!(pool.used() <= pool.allocated());
    }
}

#[test]
fn rewind_releases_everything() {
    let mut pool = Pool::with_block_size(64);
    for _ in 0..10 {
        pool.allocate_aligned(40, 1).unwrap();
    }
    assert!(pool.chunk_count() > 1);

    pool.rewind();
    assert_eq!(pool.used(), 0);
    assert_eq!(pool.allocated(), 0);
    assert_eq!(pool.chunk_count(), 0);
}

#[test]
fn reuse_after_rewind() {
    let mut pool = Pool::with_block_size(64);
    pool.allocate_aligned(40, 1).unwrap();
    pool.rewind();

    pool.allocate_aligned(8, 1).unwrap();
    assert_eq!(pool.chunk_count(), 1);
    assert_eq!(pool.used(), 8);
}

#[test]
fn rewind_empty_pool() {
    let mut pool = Pool::new();
    pool.rewind();
    pool.rewind();
    assert_eq!(pool.allocated(), 0);
}

#[test]
fn with_config_validates() {
    assert!(matches!(
        Pool::with_config(PoolConfig::new().with_block_size(0)),
        Err(Error::InvalidConfig { .. })
    ));
    let pool = Pool::with_config(PoolConfig::new().with_block_size(256)).unwrap();
    assert_eq!(pool.block_size(), 256);
}

#[test]
fn zero_block_size_clamped() {
    let pool = Pool::with_block_size(0);
    assert_eq!(pool.block_size(), 1);
    pool.allocate_aligned(16, 1).unwrap();
}

#[test]
fn alloc_value() {
    let pool = Pool::new();
    let a = pool.alloc(42u64).unwrap();
    let b = pool.alloc([7u8; 3]).unwrap();
    *a += 1;
    b[1] = 0;

    assert_eq!(*a, 43);
    assert_eq!(*b, [7, 0, 7]);
    assert_eq!(std::ptr::from_mut(a) as usize % mem::align_of::<u64>(), 0);
}

#[test]
fn alloc_slice_and_str() {
    let pool = Pool::new();
    let slice = pool.alloc_slice_copy(&[1u32, 2, 3]).unwrap();
    slice[0] = 10;
    let s = pool.alloc_str("posting").unwrap();
    s.make_ascii_uppercase();

    assert_eq!(slice, &[10, 2, 3]);
    assert_eq!(s, "POSTING");
    assert!(pool.alloc_slice_copy::<u8>(&[]).unwrap().is_empty());
}

#[test]
fn align_padding_arithmetic() {
    assert_eq!(align_padding(0, 8), 0);
    assert_eq!(align_padding(1, 8), 7);
    assert_eq!(align_padding(8, 8), 0);
    assert_eq!(align_padding(9, 8), 7);
    assert_eq!(align_padding(10, 3), 2);
    assert_eq!(align_padding(12345, 1), 0);
    assert_eq!(align_padding(12345, 0), 0);
}

#[test]
fn debug_output() {
    let pool = Pool::with_block_size(128);
    pool.allocate_aligned(10, 1).unwrap();
    let text = format!("{pool:?}");
    assert!(text.contains("used: 10"));
    assert!(text.contains("chunks: 1"));
}

#[test]
fn out_of_memory_is_recoverable() {
    let pool = Pool::new();
    pool.allocate(64).unwrap();
    let allocated = pool.allocated();

    let err = pool.allocate(usize::MAX / 4).unwrap_err();
    assert!(err.is_out_of_memory());
    assert!(matches!(
        err,
        Error::OutOfMemory { requested, used: 64, .. } if requested == usize::MAX / 4
    ));
    assert_eq!(pool.allocated(), allocated);
    assert_eq!(pool.chunk_count(), 1);

    pool.allocate(16).unwrap();
    assert_eq!(pool.used(), 80);
}

#[test]
fn out_of_memory_on_empty_pool() {
    let pool = Pool::new();
    assert!(matches!(
        pool.allocate(usize::MAX / 4),
        Err(Error::OutOfMemory { allocated: 0, .. })
    ));
    assert_eq!(pool.allocated(), 0);
    assert_eq!(pool.chunk_count(), 0);
    pool.allocate(16).unwrap();
}

#[test]
fn out_of_memory_reaches_arrays() {
    let pool = Pool::new();
    let result = DynamicArray::<u64>::with_capacity(&pool, usize::MAX / 64);
    assert!(matches!(result, Err(Error::OutOfMemory { .. })));

    let array = DynamicArray::new(&pool).unwrap();
    array.push_back(1u64).unwrap();
    assert_eq!(array.back(), Ok(&1));
}

#[test]
fn size_overflow_is_reported() {
    let pool = Pool::new();
    assert_eq!(
        pool.allocate_aligned(usize::MAX, 2),
        Err(Error::SizeOverflow { what: "chunk size" })
    );
    assert_eq!(
        DynamicArray::<u64>::with_capacity(&pool, usize::MAX).err(),
        Some(Error::SizeOverflow { what: "node data" })
    );
    assert_eq!(pool.allocated(), 0);
}

#[test]
fn error_display() {
    let err = Error::OutOfMemory {
        requested: 10,
        alignment: 8,
        used: 1,
        allocated: 2,
    };
    assert!(err.is_out_of_memory());
    assert_eq!(
        err.to_string(),
        "out of memory: requested 10 bytes aligned to 8 (1 bytes used, 2 bytes allocated)"
    );
    assert!(!Error::Empty.is_out_of_memory());
}

#[test]
fn concurrent_allocations_do_not_overlap() {
    let pool = Pool::with_block_size(4096);
    let ranges: Vec<(usize, usize)> = thread::scope(|s| {
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let pool = &pool;
                let fill = u8::try_from(t).unwrap();
                s.spawn(move || {
                    (0..500)
                        .map(|i| {
                            let bytes = 1 + (t + i) % 24;
                            let ptr = pool.allocate_aligned(bytes, 8).unwrap();
                            // SAFETY: the range is exclusively ours.
                            unsafe { std::ptr::write_bytes(ptr.as_ptr(), fill, bytes) };
                            (ptr.as_ptr() as usize, bytes)
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect()
    });

    assert_eq!(ranges.len(), 8 * 500);
    let starts: HashSet<usize> = ranges.iter().map(|&(start, _)| start).collect();
    assert_eq!(starts.len(), ranges.len());

    let mut sorted = ranges.clone();
    sorted.sort_unstable();
    for pair in sorted.windows(2) {
        let (start, len) = pair[0];
        assert!(start + len <= pair[1].0, "overlapping ranges {pair:?}");
    }
    for &(start, _) in &ranges {
        assert_eq!(start % 8, 0);
    }
    assert_eq!(
        pool.used(),
        ranges.iter().map(|&(_, len)| len).sum::<usize>()
    );
    assert!(pool.used() <= pool.allocated());
}
