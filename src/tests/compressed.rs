use std::sync::atomic::{AtomicU32, Ordering};
use std::thread;

use crate::varint;
use crate::{ArrayConfig, CompressedArray, Error, Pool, RESERVED_BYTES};

#[test]
fn small_values_take_few_bytes() {
    let pool = Pool::new();
    let array = CompressedArray::new(&pool).unwrap();
    array.push_all([0, 127, 128, 300]).unwrap();

    assert_eq!(array.iter().collect::<Vec<_>>(), [0, 127, 128, 300]);
    assert_eq!(array.encoded_len(), 6);
    assert_eq!(array.node_capacities(), [7, 10]);
}

#[test]
fn boundary_values() {
    let values = [
        0,
        1,
        127,
        128,
        16_383,
        16_384,
        2_097_151,
        2_097_152,
        268_435_455,
        268_435_456,
        (1 << 31) - 1,
        u32::MAX,
    ];
    let pool = Pool::new();
    let array = CompressedArray::new(&pool).unwrap();
    array.push_all(values).unwrap();

    assert_eq!(array.iter().collect::<Vec<_>>(), values);
    assert_eq!(
        array.encoded_len(),
        values.iter().map(|&v| varint::encoded_len(v)).sum::<usize>()
    );
}

#[test]
fn empty_array() {
    let pool = Pool::new();
    let array = CompressedArray::new(&pool).unwrap();

    assert!(array.is_empty());
    assert_eq!(array.encoded_len(), 0);
    assert_eq!(array.iter().next(), None);
    assert_eq!(format!("{array:?}"), "[]");
}

#[test]
fn tiny_initial_capacity_is_raised() {
    let pool = Pool::new();
    let config = ArrayConfig::default().with_initial_capacity(2);
    let array = CompressedArray::with_config(&pool, config).unwrap();

    array.push_back(u32::MAX).unwrap();
    assert_eq!(array.node_capacities(), [RESERVED_BYTES]);
    assert_eq!(array.iter().collect::<Vec<_>>(), [u32::MAX]);
}

#[test]
fn rolls_over_when_reserve_runs_out() {
    let pool = Pool::new();
    let config = ArrayConfig::new()
        .with_initial_capacity(64)
        .with_growth_factor(2.0);
    let array = CompressedArray::with_config(&pool, config).unwrap();

    // A one-byte value fits while at least RESERVED_BYTES are free.
    array.push_all(std::iter::repeat_n(5, 64 - RESERVED_BYTES + 1)).unwrap();
    assert_eq!(array.node_capacities(), [64]);
    assert_eq!(array.encoded_len(), 58);

    array.push_back(5).unwrap();
    assert_eq!(array.node_capacities(), [64, 128]);
    assert_eq!(array.iter().count(), 59);
}

#[test]
fn node_capacities_follow_growth() {
    let pool = Pool::new();
    let array = CompressedArray::new(&pool).unwrap();
    array.push_all(0..1000).unwrap();

    let capacities = array.node_capacities();
    assert!(capacities.iter().all(|&c| c >= RESERVED_BYTES));
    assert!(capacities.windows(2).all(|pair| {
        pair[1] == array.config().next_capacity(pair[0]).max(RESERVED_BYTES)
    }));
    assert_eq!(array.iter().collect::<Vec<_>>(), (0..1000).collect::<Vec<_>>());
}

#[test]
fn invalid_config_rejected() {
    let pool = Pool::new();
    let config = ArrayConfig::default().with_growth_factor(f64::NAN);

    assert!(matches!(
        CompressedArray::with_config(&pool, config),
        Err(Error::InvalidConfig { .. })
    ));
}

#[test]
fn iteration_restarts() {
    let pool = Pool::new();
    let array = CompressedArray::new(&pool).unwrap();
    array.push_all([10, 20, 30]).unwrap();

    let mut iter = array.iter();
    assert_eq!(iter.next(), Some(10));
    let rest = iter.clone();
    assert_eq!(iter.collect::<Vec<_>>(), [20, 30]);
    assert_eq!(rest.collect::<Vec<_>>(), [20, 30]);
    assert_eq!((&array).into_iter().sum::<u32>(), 60);
}

#[test]
fn debug_lists_values() {
    let pool = Pool::new();
    let array = CompressedArray::new(&pool).unwrap();
    array.push_all([1, 300]).unwrap();

    assert_eq!(format!("{array:?}"), "[1, 300]");
}

#[test]
fn concurrent_pushes() {
    const THREADS: u32 = 8;
    const PER_THREAD: u32 = 1000;

    let pool = Pool::with_block_size(4096);
    let array = CompressedArray::new(&pool).unwrap();

    thread::scope(|s| {
        for t in 0..THREADS {
            let array = &array;
            s.spawn(move || {
                for i in 0..PER_THREAD {
                    // Spread values over every encoded width.
                    array.push_back((t * PER_THREAD + i).wrapping_mul(2_654_435_761)).unwrap();
                }
            });
        }
    });

    let mut expected: Vec<u32> = (0..THREADS * PER_THREAD)
        .map(|v| v.wrapping_mul(2_654_435_761))
        .collect();
    let mut decoded: Vec<u32> = array.iter().collect();
    assert_eq!(
        array.encoded_len(),
        expected.iter().map(|&v| varint::encoded_len(v)).sum::<usize>()
    );

    expected.sort_unstable();
    decoded.sort_unstable();
    assert_eq!(decoded, expected);
}

#[test]
fn concurrent_pushes_keep_per_thread_order() {
    let pool = Pool::new();
    let array = CompressedArray::new(&pool).unwrap();

    thread::scope(|s| {
        for t in 0..4u32 {
            let array = &array;
            s.spawn(move || {
                for i in 0..500u32 {
                    array.push_back((t << 16) | i).unwrap();
                }
            });
        }
    });

    for t in 0..4u32 {
        let sequence: Vec<u32> = array
            .iter()
            .filter(|value| value >> 16 == t)
            .map(|value| value & 0xFFFF)
            .collect();
        assert_eq!(sequence, (0..500).collect::<Vec<_>>());
    }
}

#[test]
fn readers_alongside_writers_see_only_pushed_values() {
    const WRITERS: u32 = 4;
    const PER_WRITER: u32 = 20_000;
    const BASE: u32 = 1_000_000;

    let pool = Pool::new();
    let array = CompressedArray::new(&pool).unwrap();
    let finished = AtomicU32::new(0);

    thread::scope(|s| {
        for t in 0..WRITERS {
            let array = &array;
            let finished = &finished;
            s.spawn(move || {
                for i in 0..PER_WRITER {
                    array.push_back(BASE + t * PER_WRITER + i).unwrap();
                }
                finished.fetch_add(1, Ordering::Release);
            });
        }
        let array = &array;
        let finished = &finished;
        s.spawn(move || {
            loop {
                let done = finished.load(Ordering::Acquire) == WRITERS;
                let mut seen = 0;
                for value in array {
                    assert!(
                        (BASE..BASE + WRITERS * PER_WRITER).contains(&value),
                        "decoded {value}, which was never pushed"
                    );
                    seen += 1;
                }
                assert!(seen <= WRITERS * PER_WRITER);
                if done {
                    break;
                }
            }
        });
    });

    assert_eq!(array.iter().count(), 80_000);
}

