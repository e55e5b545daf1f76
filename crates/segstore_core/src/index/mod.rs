//! The index array: position to address mapping.
//!
//! Positions are split into units of `unit_capacity` slots. Each unit is
//! persisted as its own file, so a checkpoint rewrites only the units that
//! changed since the previous one.
//!
//! # Sizing
//!
//! - [`ArrayKind::Static`](crate::ArrayKind::Static): capacity is the
//!   requested length, fixed forever.
//! - [`ArrayKind::Dynamic`](crate::ArrayKind::Dynamic): created at
//!   `U * 2^level` slots and grown one unit at a time on demand, up to
//!   [`MAX_UNITS`] units.

mod array;
mod sizing;
mod unit;

pub use array::{unit_layout, IndexArray};
pub use sizing::{
    grown_capacity, initial_dynamic_capacity, initial_level, max_capacity, MAX_INITIAL_LEVEL,
    MAX_UNITS,
};
pub use unit::Unit;
