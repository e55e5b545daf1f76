//! Inspect command implementation.

use super::{open_store, CliResult, OutputFormat};
use segstore_core::{ArrayStore, SegmentStats};
use serde::Serialize;
use std::path::Path;

/// Store inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Store path.
    pub path: String,
    /// `static` or `dynamic`.
    pub kind: String,
    /// First valid position.
    pub index_start: u64,
    /// Number of addressable positions.
    pub capacity: u64,
    /// Slots per index unit.
    pub unit_capacity: u32,
    /// Sequence of the last checkpoint.
    pub checkpoint_sequence: u64,
    /// Batches completed over the life of the store.
    pub total_batches: u64,
    /// Number of segment files.
    pub segment_count: usize,
    /// Bytes in segment files.
    pub segment_bytes: u64,
    /// Bytes referenced by the index.
    pub live_bytes: u64,
    /// Segment details (if requested).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub segments: Option<Vec<SegmentInfo>>,
}

/// Statistics for a single segment.
#[derive(Debug, Serialize)]
pub struct SegmentInfo {
    /// Segment id.
    pub id: u32,
    /// Lifecycle state.
    pub status: String,
    /// Capacity in bytes.
    pub capacity: u64,
    /// Bytes written.
    pub size: u64,
    /// Bytes referenced by the index.
    pub live_bytes: u64,
    /// Live bytes over usable capacity.
    pub live_ratio: f64,
}

impl From<&SegmentStats> for SegmentInfo {
    fn from(stats: &SegmentStats) -> Self {
        Self {
            id: stats.id.as_u32(),
            status: stats.status.to_string(),
            capacity: stats.capacity,
            size: stats.size,
            live_bytes: stats.live_bytes,
            live_ratio: stats.live_ratio,
        }
    }
}

/// Collects the inspection result for an open store.
pub fn inspect(store: &ArrayStore, show_segments: bool) -> CliResult<InspectResult> {
    let stats = store.segment_stats()?;
    Ok(InspectResult {
        path: store.path().display().to_string(),
        kind: store.kind().to_string(),
        index_start: store.index_start(),
        capacity: store.capacity(),
        unit_capacity: store.unit_capacity(),
        checkpoint_sequence: store.checkpoint_sequence(),
        total_batches: store.total_batches(),
        segment_count: stats.len(),
        segment_bytes: stats.iter().map(|s| s.size).sum(),
        live_bytes: stats.iter().map(|s| s.live_bytes).sum(),
        segments: show_segments.then(|| stats.iter().map(SegmentInfo::from).collect()),
    })
}

/// Runs the inspect command.
pub fn run(path: &Path, show_segments: bool, format: OutputFormat) -> CliResult<()> {
    let store = open_store(path)?;
    let result = inspect(&store, show_segments)?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&result)?),
        OutputFormat::Text => print_text(&result),
    }
    Ok(())
}

fn print_text(result: &InspectResult) {
    println!("Store: {}", result.path);
    println!();
    println!("Index:");
    println!("  Kind:          {}", result.kind);
    println!("  Positions:     {}..{}", result.index_start, result.index_start + result.capacity);
    println!("  Unit capacity: {}", result.unit_capacity);
    println!();
    println!("Checkpoint:");
    println!("  Sequence:      {}", result.checkpoint_sequence);
    println!("  Batches:       {}", result.total_batches);
    println!();
    println!("Segments:");
    println!("  Count:         {}", result.segment_count);
    println!("  Size:          {} bytes", result.segment_bytes);
    println!("  Live:          {} bytes", result.live_bytes);

    if let Some(segments) = &result.segments {
        println!();
        println!("  {:>8}  {:<11} {:>12} {:>12} {:>7}", "ID", "STATUS", "SIZE", "LIVE", "RATIO");
        for segment in segments {
            println!(
                "  {:>8}  {:<11} {:>12} {:>12} {:>6.1}%",
                segment.id,
                segment.status,
                segment.size,
                segment.live_bytes,
                segment.live_ratio * 100.0
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use segstore_core::StoreConfig;
    use tempfile::tempdir;

    #[test]
    fn inspect_reports_store_shape() {
        let dir = tempdir().unwrap();
        let config = StoreConfig::new()
            .initial_capacity(100)
            .unit_capacity(64)
            .segment_capacity_bytes(4096);
        let store = ArrayStore::open_dynamic(dir.path(), config).unwrap();
        store.set(5, b"value").unwrap();

        let result = inspect(&store, true).unwrap();
        assert_eq!(result.kind, "dynamic");
        assert_eq!(result.capacity, 128);
        assert_eq!(result.segment_count, 1);
        assert_eq!(result.segments.as_ref().unwrap()[0].status, "writable");

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["unit_capacity"], 64);
    }
}
