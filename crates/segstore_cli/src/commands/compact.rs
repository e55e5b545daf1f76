//! Compact command implementation.

use super::CliResult;
use segstore_core::{ArrayStore, SegmentStats, SegmentStatus, StoreConfig};
use std::path::Path;

/// Segments a compaction with `factor` would pick.
pub fn candidates(stats: &[SegmentStats], factor: f64) -> Vec<&SegmentStats> {
    stats
        .iter()
        .filter(|s| s.status == SegmentStatus::ReadOnly && s.live_ratio < factor)
        .collect()
}

/// Runs the compact command.
///
/// A real run closes the store afterwards, so the emptied segments are
/// recorded as recyclable by the final checkpoint.
pub fn run(path: &Path, factor: Option<f64>, dry_run: bool) -> CliResult<()> {
    let mut config = StoreConfig::new();
    if let Some(factor) = factor {
        config = config.segment_compact_factor(factor);
    }
    let factor = config.segment_compact_factor;
    let store = ArrayStore::open_existing(path, config)?;

    println!("Compacting segments at {:?}", path);
    if dry_run {
        println!("(dry run - no changes will be made)");
    }
    println!();

    let stats = store.segment_stats()?;
    let picked = candidates(&stats, factor);
    println!("Segments below live ratio {:.2}: {}", factor, picked.len());
    for segment in &picked {
        println!(
            "  {}  {} of {} bytes live ({:.1}%)",
            segment.id,
            segment.live_bytes,
            segment.size,
            segment.live_ratio * 100.0
        );
    }
    if dry_run {
        return Ok(());
    }

    let report = store.compact()?;
    println!();
    println!("Compaction Result:");
    println!("  Segments recycled:  {}", report.recycled().count());
    println!("  Records relocated:  {}", report.records_relocated());
    for failure in report.failures() {
        if let Some(error) = &failure.error {
            println!("  Skipped {}: {}", failure.segment, error);
        }
    }

    store.close()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use segstore_core::SegmentId;

    fn stats(id: u32, status: SegmentStatus, live_ratio: f64) -> SegmentStats {
        SegmentStats {
            id: SegmentId::new(id),
            status,
            capacity: 4096,
            size: 4096,
            live_bytes: (live_ratio * 4080.0) as u64,
            live_ratio,
        }
    }

    #[test]
    fn only_sparse_read_only_segments_are_candidates() {
        let all = vec![
            stats(1, SegmentStatus::ReadOnly, 0.1),
            stats(2, SegmentStatus::ReadOnly, 0.9),
            stats(3, SegmentStatus::Writable, 0.0),
            stats(4, SegmentStatus::Recyclable, 0.0),
        ];
        let picked: Vec<u32> = candidates(&all, 0.5).iter().map(|s| s.id.as_u32()).collect();
        assert_eq!(picked, vec![1]);
    }
}
