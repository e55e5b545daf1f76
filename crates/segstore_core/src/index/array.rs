//! Position-indexed array of addresses.

use crate::error::{CoreError, CoreResult};
use crate::index::sizing::{grown_capacity, initial_dynamic_capacity, max_capacity, MAX_UNITS};
use crate::index::unit::Unit;
use crate::types::{Address, ArrayKind};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Maps positions `index_start..index_start + capacity` to addresses.
///
/// The unit table is only write-locked to append new units during growth.
/// Lookups take the read lock just long enough to clone the unit's `Arc`.
pub struct IndexArray {
    kind: ArrayKind,
    unit_capacity: u32,
    index_start: u64,
    capacity: AtomicU64,
    units: RwLock<Vec<Arc<Unit>>>,
}

impl IndexArray {
    /// Creates an empty array sized for `requested` positions.
    ///
    /// Static arrays hold exactly `requested` positions; dynamic arrays start
    /// at the next power-of-two multiple of the unit capacity.
    #[must_use]
    pub fn create(kind: ArrayKind, unit_capacity: u32, requested: u64) -> Self {
        let capacity = match kind {
            ArrayKind::Static => requested,
            ArrayKind::Dynamic => initial_dynamic_capacity(requested, unit_capacity),
        };
        let units = build_units(0, capacity, unit_capacity);
        Self {
            kind,
            unit_capacity,
            index_start: 0,
            capacity: AtomicU64::new(capacity),
            units: RwLock::new(units),
        }
    }

    /// Rebuilds an array from units loaded off disk.
    ///
    /// `units` must cover `capacity` exactly, as produced by [`unit_layout`].
    pub fn from_units(
        kind: ArrayKind,
        unit_capacity: u32,
        index_start: u64,
        capacity: u64,
        units: Vec<Unit>,
    ) -> CoreResult<Self> {
        let layout = unit_layout(capacity, unit_capacity);
        if layout.len() != units.len()
            || layout.iter().zip(&units).any(|(&len, unit)| len != unit.len())
        {
            return Err(CoreError::invalid_format(format!(
                "{} units do not cover capacity {capacity}",
                units.len()
            )));
        }
        Ok(Self {
            kind,
            unit_capacity,
            index_start,
            capacity: AtomicU64::new(capacity),
            units: RwLock::new(units.into_iter().map(Arc::new).collect()),
        })
    }

    /// Returns the sizing policy.
    #[must_use]
    pub fn kind(&self) -> ArrayKind {
        self.kind
    }

    /// Returns the slots per unit.
    #[must_use]
    pub fn unit_capacity(&self) -> u32 {
        self.unit_capacity
    }

    /// Returns the first valid position.
    #[must_use]
    pub fn index_start(&self) -> u64 {
        self.index_start
    }

    /// Returns the number of addressable positions.
    #[must_use]
    pub fn capacity(&self) -> u64 {
        self.capacity.load(Ordering::Acquire)
    }

    /// Same as [`IndexArray::capacity`].
    #[must_use]
    pub fn length(&self) -> u64 {
        self.capacity()
    }

    /// Returns the number of units.
    #[must_use]
    pub fn unit_count(&self) -> usize {
        self.units.read().len()
    }

    fn out_of_range(&self, position: u64) -> CoreError {
        CoreError::PositionOutOfRange {
            position,
            start: self.index_start,
            end: self.index_start.saturating_add(self.capacity()),
        }
    }

    fn locate(&self, position: u64) -> CoreResult<(Arc<Unit>, usize)> {
        let end = self.index_start.saturating_add(self.capacity());
        if position < self.index_start || position >= end {
            return Err(self.out_of_range(position));
        }
        let offset = position - self.index_start;
        let unit_capacity = u64::from(self.unit_capacity);
        let unit_index = (offset / unit_capacity) as usize;
        let slot = (offset % unit_capacity) as usize;

        let units = self.units.read();
        units
            .get(unit_index)
            .map(|unit| (Arc::clone(unit), slot))
            .ok_or_else(|| {
                CoreError::invalid_operation(format!("unit {unit_index} missing for {position}"))
            })
    }

    /// Returns the address at `position`, [`Address::EMPTY`] when unset.
    pub fn get(&self, position: u64) -> CoreResult<Address> {
        let (unit, slot) = self.locate(position)?;
        Ok(unit.load(slot))
    }

    /// Stores `address` at `position`, returning the previous address.
    pub fn set(&self, position: u64, address: Address) -> CoreResult<Address> {
        let (unit, slot) = self.locate(position)?;
        Ok(unit.swap(slot, address))
    }

    /// Replaces the slot at `position` only if it still holds `expected`.
    pub fn compare_and_set(
        &self,
        position: u64,
        expected: Address,
        new: Address,
    ) -> CoreResult<bool> {
        let (unit, slot) = self.locate(position)?;
        Ok(unit.compare_exchange(slot, expected, new))
    }

    /// Grows a dynamic array so that `position` is addressable.
    ///
    /// Returns true if the capacity changed. Static arrays and positions
    /// below `index_start` are left to the range check of the next access.
    ///
    /// # Errors
    ///
    /// `PositionOutOfRange` when covering `position` would take more than
    /// [`MAX_UNITS`] units.
    pub fn expand_to(&self, position: u64) -> CoreResult<bool> {
        if self.kind == ArrayKind::Static || position < self.index_start {
            return Ok(false);
        }
        match (position - self.index_start).checked_add(1) {
            Some(requested) => self.ensure_length(requested),
            None => Err(self.out_of_range(position)),
        }
    }

    /// Grows a dynamic array so it covers `requested` positions.
    ///
    /// Returns true if the capacity changed. Static arrays never grow.
    ///
    /// # Errors
    ///
    /// `PositionOutOfRange` when `requested` exceeds
    /// [`max_capacity`](crate::index::max_capacity).
    pub fn ensure_length(&self, requested: u64) -> CoreResult<bool> {
        if self.kind == ArrayKind::Static || requested <= self.capacity() {
            return Ok(false);
        }
        if requested > max_capacity(self.unit_capacity) {
            return Err(self.out_of_range(self.index_start.saturating_add(requested - 1)));
        }

        let mut units = self.units.write();
        let current = self.capacity();
        let grown = grown_capacity(current, requested, self.unit_capacity);
        if grown == current {
            return Ok(false);
        }

        // Dynamic capacities are whole units, so growth only appends.
        let first = u32::try_from(units.len())
            .ok()
            .filter(|&n| n < MAX_UNITS)
            .ok_or_else(|| self.out_of_range(self.index_start.saturating_add(requested - 1)))?;
        for unit in build_units(first, grown - current, self.unit_capacity) {
            unit.mark_dirty();
            units.push(unit);
        }
        self.capacity.store(grown, Ordering::Release);
        debug!(from = current, to = grown, units = units.len(), "index array grew");
        Ok(true)
    }

    /// Empties every slot, returning how many held an address.
    pub fn clear(&self) -> usize {
        let mut cleared = 0;
        for unit in self.units() {
            for slot in 0..unit.len() {
                if !unit.load(slot).is_empty() {
                    unit.swap(slot, Address::EMPTY);
                    cleared += 1;
                }
            }
            unit.mark_dirty();
        }
        cleared
    }

    /// Returns a snapshot of the unit table.
    #[must_use]
    pub fn units(&self) -> Vec<Arc<Unit>> {
        self.units.read().clone()
    }

    /// Converts a unit-relative slot to a position.
    #[must_use]
    pub fn position_of(&self, unit: u32, slot: usize) -> u64 {
        self.index_start + u64::from(unit) * u64::from(self.unit_capacity) + slot as u64
    }
}

impl std::fmt::Debug for IndexArray {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexArray")
            .field("kind", &self.kind)
            .field("unit_capacity", &self.unit_capacity)
            .field("index_start", &self.index_start)
            .field("capacity", &self.capacity())
            .finish()
    }
}

/// Slot counts of the units covering `capacity` positions.
///
/// Every unit is full except possibly the last one of a static array.
#[must_use]
pub fn unit_layout(capacity: u64, unit_capacity: u32) -> Vec<usize> {
    let unit = u64::from(unit_capacity);
    let count = capacity.div_ceil(unit);
    (0..count)
        .map(|i| (capacity - i * unit).min(unit) as usize)
        .collect()
}

fn build_units(first: u32, capacity: u64, unit_capacity: u32) -> Vec<Arc<Unit>> {
    unit_layout(capacity, unit_capacity)
        .into_iter()
        .zip(first..)
        .map(|(len, number)| Arc::new(Unit::new(number, len)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SegmentId;

    fn addr(seg: u32) -> Address {
        Address::new(SegmentId::new(seg), 16, 4)
    }

    #[test]
    fn static_capacity_is_exact() {
        let array = IndexArray::create(ArrayKind::Static, 64, 100);
        assert_eq!(array.capacity(), 100);
        assert_eq!(array.length(), 100);
        assert_eq!(array.unit_count(), 2);
        assert_eq!(unit_layout(100, 64), vec![64, 36]);
    }

    #[test]
    fn dynamic_capacity_uses_levels() {
        let array = IndexArray::create(ArrayKind::Dynamic, 1024, 2600);
        assert_eq!(array.capacity(), 4096);
        assert_eq!(array.unit_count(), 4);

        let small = IndexArray::create(ArrayKind::Dynamic, 1024, 10);
        assert_eq!(small.capacity(), 1024);
    }

    #[test]
    fn get_set_and_range() {
        let array = IndexArray::create(ArrayKind::Static, 16, 40);

        assert_eq!(array.get(39).unwrap(), Address::EMPTY);
        assert_eq!(array.set(39, addr(1)).unwrap(), Address::EMPTY);
        assert_eq!(array.set(39, addr(2)).unwrap(), addr(1));
        assert_eq!(array.get(39).unwrap(), addr(2));

        assert!(matches!(
            array.get(40),
            Err(CoreError::PositionOutOfRange { position: 40, start: 0, end: 40 })
        ));
    }

    #[test]
    fn expand_to_grows_dynamic_only() {
        let dynamic = IndexArray::create(ArrayKind::Dynamic, 1024, 2600);
        assert!(dynamic.expand_to(4199).unwrap());
        dynamic.set(4199, addr(1)).unwrap();
        assert_eq!(dynamic.capacity(), 5120);
        assert_eq!(dynamic.get(4199).unwrap(), addr(1));

        let fixed = IndexArray::create(ArrayKind::Static, 1024, 2600);
        assert!(!fixed.expand_to(2600).unwrap());
        assert!(fixed.set(2600, addr(1)).is_err());
        assert_eq!(fixed.capacity(), 2600);
    }

    #[test]
    fn expand_to_rejects_positions_past_the_unit_limit() {
        let array = IndexArray::create(ArrayKind::Dynamic, 16, 16);

        assert!(matches!(
            array.expand_to(u64::MAX),
            Err(CoreError::PositionOutOfRange { position: u64::MAX, .. })
        ));
        assert!(matches!(
            array.expand_to(1 << 40),
            Err(CoreError::PositionOutOfRange { .. })
        ));
        assert_eq!(array.capacity(), 16);

        let limit = max_capacity(16);
        assert!(array.expand_to(limit - 1).unwrap());
        assert_eq!(array.capacity(), limit);
        assert_eq!(array.unit_count(), MAX_UNITS as usize);
        assert_eq!(array.units().last().unwrap().number(), MAX_UNITS - 1);
        assert!(array.expand_to(limit).is_err());
    }

    #[test]
    fn compare_and_set_respects_current_value() {
        let array = IndexArray::create(ArrayKind::Static, 8, 8);
        array.set(3, addr(1)).unwrap();

        assert!(!array.compare_and_set(3, addr(9), addr(2)).unwrap());
        assert!(array.compare_and_set(3, addr(1), addr(2)).unwrap());
        assert_eq!(array.get(3).unwrap(), addr(2));
    }

    #[test]
    fn clear_empties_all_slots() {
        let array = IndexArray::create(ArrayKind::Static, 4, 10);
        array.set(0, addr(1)).unwrap();
        array.set(9, addr(1)).unwrap();

        assert_eq!(array.clear(), 2);
        assert_eq!(array.get(9).unwrap(), Address::EMPTY);
        assert!(array.units().iter().all(|u| u.is_dirty()));
    }

    #[test]
    fn from_units_checks_layout() {
        let units = vec![Unit::new(0, 4), Unit::new(1, 2)];
        let array = IndexArray::from_units(ArrayKind::Static, 4, 0, 6, units).unwrap();
        assert_eq!(array.capacity(), 6);
        assert_eq!(array.position_of(1, 1), 5);

        let units = vec![Unit::new(0, 4)];
        assert!(IndexArray::from_units(ArrayKind::Static, 4, 0, 6, units).is_err());
    }
}
