//! Verify command implementation.

use super::{open_store, CliError, CliResult};
use std::path::Path;

/// Runs the verify command.
///
/// Every stored value is read back through its frame checksum.
pub fn run(path: &Path) -> CliResult<()> {
    println!("Verifying store at {:?}", path);
    println!();

    let store = open_store(path)?;
    let report = store.verify();

    println!("  Values:       {}", report.values);
    println!("  Empty slots:  {}", report.empty);
    println!("  Errors:       {}", report.errors.len());
    for (position, error) in report.errors.iter().take(20) {
        println!("    position {position}: {error}");
    }
    if report.errors.len() > 20 {
        println!("    ... and {} more", report.errors.len() - 20);
    }
    println!();

    if report.is_ok() {
        println!("Verification passed.");
        Ok(())
    } else {
        Err(CliError::VerificationFailed(report.errors.len()))
    }
}
