//! Stress tests for SegStore.
//!
//! These tests verify behavior under heavy load and concurrent access.

use segstore_core::ArrayStore;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// Result of a stress test run.
#[derive(Debug, Clone)]
pub struct StressTestResult {
    /// Total operations performed.
    pub total_ops: usize,
    /// Successful operations.
    pub successful_ops: usize,
    /// Failed operations.
    pub failed_ops: usize,
    /// Total duration.
    pub duration: Duration,
    /// Operations per second.
    pub ops_per_second: f64,
}

impl StressTestResult {
    /// Creates a new result.
    pub fn new(successful: usize, failed: usize, duration: Duration) -> Self {
        let total = successful + failed;
        let ops_per_second = if duration.as_secs_f64() > 0.0 {
            total as f64 / duration.as_secs_f64()
        } else {
            0.0
        };

        Self {
            total_ops: total,
            successful_ops: successful,
            failed_ops: failed,
            duration,
            ops_per_second,
        }
    }

    /// Prints a summary of the test.
    pub fn print_summary(&self, name: &str) {
        println!("\n=== {} ===", name);
        println!("Total operations: {}", self.total_ops);
        println!("Successful: {}", self.successful_ops);
        println!("Failed: {}", self.failed_ops);
        println!("Duration: {:?}", self.duration);
        println!("Throughput: {:.2} ops/sec", self.ops_per_second);
    }
}

/// Configuration for stress tests.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Number of operations to perform.
    pub operations: usize,
    /// Number of concurrent reader threads.
    pub threads: usize,
    /// Size of each value in bytes.
    pub value_size: usize,
    /// Number of distinct positions written.
    pub positions: u64,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            operations: 10_000,
            threads: 4,
            value_size: 256,
            positions: 200,
        }
    }
}

/// A value that names its position and the round that wrote it.
#[must_use]
pub fn tagged_value(position: u64, round: u64, size: usize) -> Vec<u8> {
    let mut value = vec![0xAB; size.max(16)];
    value[..8].copy_from_slice(&position.to_le_bytes());
    value[8..16].copy_from_slice(&round.to_le_bytes());
    value
}

fn tag_of(value: &[u8]) -> Option<(u64, u64)> {
    let position = u64::from_le_bytes(value.get(..8)?.try_into().ok()?);
    let round = u64::from_le_bytes(value.get(8..16)?.try_into().ok()?);
    Some((position, round))
}

/// Run a sequential write stress test.
pub fn stress_sequential_writes(store: &ArrayStore, config: &StressConfig) -> StressTestResult {
    let start = Instant::now();
    let mut successful = 0usize;
    let mut failed = 0usize;

    for i in 0..config.operations as u64 {
        let position = i % config.positions;
        match store.set(position, &tagged_value(position, i, config.value_size)) {
            Ok(()) => successful += 1,
            Err(_) => failed += 1,
        }
    }

    StressTestResult::new(successful, failed, start.elapsed())
}

/// Run a sequential read stress test over previously written positions.
pub fn stress_sequential_reads(store: &ArrayStore, config: &StressConfig) -> StressTestResult {
    let start = Instant::now();
    let mut successful = 0usize;
    let mut failed = 0usize;

    for i in 0..config.operations as u64 {
        match store.get(i % config.positions) {
            Ok(_) => successful += 1,
            Err(_) => failed += 1,
        }
    }

    StressTestResult::new(successful, failed, start.elapsed())
}

/// Run readers concurrently with one writer and repeated compaction.
///
/// A read fails if it errors or returns a value tagged with another
/// position.
pub fn stress_concurrent_readers(store: &ArrayStore, config: &StressConfig) -> StressTestResult {
    for position in 0..config.positions {
        let _ = store.set(position, &tagged_value(position, 0, config.value_size));
    }

    let successful = AtomicUsize::new(0);
    let failed = AtomicUsize::new(0);
    let done = AtomicBool::new(false);
    let ops_per_thread = config.operations / config.threads.max(1);

    let start = Instant::now();
    thread::scope(|scope| {
        scope.spawn(|| {
            let mut round = 1;
            while !done.load(Ordering::Acquire) {
                for position in 0..config.positions {
                    let value = tagged_value(position, round, config.value_size);
                    if store.set(position, &value).is_err() {
                        failed.fetch_add(1, Ordering::Relaxed);
                    }
                }
                round += 1;
            }
        });
        scope.spawn(|| {
            while !done.load(Ordering::Acquire) {
                if store.compact().is_err() {
                    failed.fetch_add(1, Ordering::Relaxed);
                }
                thread::sleep(Duration::from_millis(1));
            }
        });

        let readers: Vec<_> = (0..config.threads)
            .map(|t| {
                let (successful, failed) = (&successful, &failed);
                scope.spawn(move || {
                    for i in 0..ops_per_thread as u64 {
                        let position = (t as u64 * 31 + i) % config.positions;
                        match store.get(position) {
                            Ok(Some(value)) if tag_of(&value).map(|t| t.0) == Some(position) => {
                                successful.fetch_add(1, Ordering::Relaxed);
                            }
                            _ => {
                                failed.fetch_add(1, Ordering::Relaxed);
                            }
                        }
                    }
                })
            })
            .collect();

        for reader in readers {
            reader.join().expect("Thread panicked");
        }
        done.store(true, Ordering::Release);
    });

    StressTestResult::new(
        successful.load(Ordering::Relaxed),
        failed.load(Ordering::Relaxed),
        start.elapsed(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{small_config, TestStore};

    fn quick_config() -> StressConfig {
        StressConfig {
            operations: 2_000,
            threads: 4,
            value_size: 64,
            positions: 200,
        }
    }

    #[test]
    fn test_sequential_writes_then_reads() {
        let test_store = TestStore::new_static(small_config());
        let config = quick_config();

        let writes = stress_sequential_writes(&test_store, &config);
        assert_eq!(writes.failed_ops, 0);
        let reads = stress_sequential_reads(&test_store, &config);
        assert_eq!(reads.failed_ops, 0);
        writes.print_summary("sequential writes");

        // The last write to each position wins.
        let last_round = config.operations as u64 - config.positions;
        assert_eq!(
            test_store.get(0).unwrap(),
            Some(tagged_value(0, last_round, config.value_size))
        );
    }

    #[test]
    fn test_concurrent_readers_with_writer_and_compaction() {
        let test_store = TestStore::new_static(small_config());
        let result = stress_concurrent_readers(&test_store, &quick_config());
        result.print_summary("concurrent readers");

        assert_eq!(result.failed_ops, 0);
        assert_eq!(result.successful_ops, 2_000);
        assert!(test_store.verify().is_ok());
    }

    #[test]
    fn test_reopen_after_stress() {
        let mut test_store = TestStore::new_static(small_config());
        let config = quick_config();
        stress_sequential_writes(&test_store, &config);
        test_store.compact().unwrap();

        test_store.reopen();
        let last_round = config.operations as u64 - config.positions;
        for position in 0..config.positions {
            assert_eq!(
                test_store.get(position).unwrap(),
                Some(tagged_value(position, last_round + position, config.value_size))
            );
        }
    }
}
