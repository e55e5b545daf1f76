//! Single-position commands: get, put and delete.

use super::{open_store, CliResult};
use std::fmt::Write as _;
use std::path::Path;

/// Formats a value for printing.
pub fn format_value(value: &[u8], hex: bool) -> String {
    if hex {
        value.iter().fold(String::with_capacity(value.len() * 2), |mut out, b| {
            let _ = write!(out, "{b:02x}");
            out
        })
    } else {
        String::from_utf8_lossy(value).into_owned()
    }
}

/// Prints the value at `position`.
pub fn get(path: &Path, position: u64, hex: bool) -> CliResult<()> {
    let store = open_store(path)?;
    match store.get(position)? {
        Some(value) => println!("{}", format_value(&value, hex)),
        None => println!("(empty)"),
    }
    Ok(())
}

/// Stores `value` at `position` and closes the store.
pub fn put(path: &Path, position: u64, value: &[u8], expand: bool) -> CliResult<()> {
    let store = open_store(path)?;
    if expand {
        store.set_expand(position, value)?;
    } else {
        store.set(position, value)?;
    }
    store.close()?;
    println!("Stored {} bytes at position {}", value.len(), position);
    Ok(())
}

/// Removes the value at `position` and closes the store.
pub fn delete(path: &Path, position: u64) -> CliResult<()> {
    let store = open_store(path)?;
    let removed = store.delete(position)?;
    store.close()?;
    if removed {
        println!("Deleted position {}", position);
    } else {
        println!("Position {} was already empty", position);
    }
    Ok(())
}
