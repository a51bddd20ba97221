use std::hint;
use std::thread;

/// Spins up to `1 << SPIN_LIMIT` iterations per retry before yielding.
const SPIN_LIMIT: u32 = 6;

/// Exponential backoff for compare-and-swap retry loops.
///
/// Every failed CAS calls [`snooze`](Self::snooze). The first few retries
/// busy-spin with a doubling count; after that each retry yields the
/// thread so a preempted winner can finish. Retries themselves are never
/// capped: a lost race always means another thread made progress.
pub(crate) struct Backoff {
    step: u32,
}

impl Backoff {
    pub(crate) const fn new() -> Self {
        Self { step: 0 }
    }

    pub(crate) fn snooze(&mut self) {
        if self.step <= SPIN_LIMIT {
            for _ in 0..1u32 << self.step {
                hint::spin_loop();
            }
            self.step += 1;
        } else {
            thread::yield_now();
        }
    }
}
