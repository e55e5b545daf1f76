//! Capacity rules for index arrays.
//!
//! A dynamic array is created at `U * 2^level` slots, where `level` is the
//! smallest power-of-two multiple of the unit capacity `U` covering the
//! requested length. Later growth is linear, one unit at a time.

/// Highest level a dynamic array is created at.
pub const MAX_INITIAL_LEVEL: u32 = 15;

/// Most units an index array may hold.
pub const MAX_UNITS: u32 = 1 << 16;

/// Returns the largest capacity an array of `unit_capacity` slot units may
/// reach.
#[must_use]
pub fn max_capacity(unit_capacity: u32) -> u64 {
    u64::from(MAX_UNITS) * u64::from(unit_capacity)
}

/// Returns the creation level for a requested length.
///
/// `0` when `requested <= unit_capacity`, otherwise `ceil(log2(requested / U))`,
/// capped at [`MAX_INITIAL_LEVEL`].
#[must_use]
pub fn initial_level(requested: u64, unit_capacity: u32) -> u32 {
    let units = requested.div_ceil(u64::from(unit_capacity)).max(1);
    let level = units
        .checked_next_power_of_two()
        .map_or(u64::BITS - 1, u64::trailing_zeros);
    level.min(MAX_INITIAL_LEVEL)
}

/// Returns the capacity a dynamic array is created with.
#[must_use]
pub fn initial_dynamic_capacity(requested: u64, unit_capacity: u32) -> u64 {
    u64::from(unit_capacity) << initial_level(requested, unit_capacity)
}

/// Returns the capacity after a request for `requested` slots.
///
/// Unchanged when the current capacity already covers the request; otherwise
/// grown by whole units.
#[must_use]
pub fn grown_capacity(current: u64, requested: u64, unit_capacity: u32) -> u64 {
    if requested <= current {
        return current;
    }
    let unit = u64::from(unit_capacity);
    current.saturating_add(unit.saturating_mul((requested - current).div_ceil(unit)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn levels() {
        assert_eq!(initial_level(0, 1024), 0);
        assert_eq!(initial_level(1024, 1024), 0);
        assert_eq!(initial_level(1025, 1024), 1);
        assert_eq!(initial_level(2048, 1024), 1);
        assert_eq!(initial_level(2600, 1024), 2);
        assert_eq!(initial_level(u64::MAX / 2, 1024), MAX_INITIAL_LEVEL);
    }

    #[test]
    fn create_then_grow() {
        assert_eq!(initial_dynamic_capacity(2600, 1024), 4096);
        assert_eq!(grown_capacity(4096, 4200, 1024), 5120);
        assert_eq!(grown_capacity(4096, 4000, 1024), 4096);
        assert_eq!(grown_capacity(4096, 4096, 1024), 4096);
    }

    #[test]
    fn growth_saturates_instead_of_overflowing() {
        assert_eq!(grown_capacity(4096, u64::MAX, 1024), u64::MAX);
        assert_eq!(max_capacity(1024), 1024 << 16);
        assert!(initial_dynamic_capacity(u64::MAX, 1 << 31) <= max_capacity(1 << 31));
    }

    proptest! {
        #[test]
        fn creation_covers_request_below_cap(
            shift in 0u32..20,
            requested in 0u64..(1 << 24),
        ) {
            let unit = 1u32 << shift;
            let capacity = initial_dynamic_capacity(requested, unit);
            let level = initial_level(requested, unit);

            prop_assert_eq!(capacity, u64::from(unit) << level);
            prop_assert_eq!(capacity % u64::from(unit), 0);
            if level < MAX_INITIAL_LEVEL {
                prop_assert!(capacity >= requested);
            }
            if level > 0 {
                prop_assert!(capacity / 2 < requested);
            }
        }

        #[test]
        fn growth_is_minimal_whole_units(
            shift in 0u32..16,
            current_units in 1u64..64,
            requested in 0u64..(1 << 22),
        ) {
            let unit = 1u32 << shift;
            let current = current_units * u64::from(unit);
            let grown = grown_capacity(current, requested, unit);

            prop_assert!(grown >= current);
            prop_assert!(grown >= requested);
            prop_assert_eq!((grown - current) % u64::from(unit), 0);
            if grown > current {
                prop_assert!(grown - u64::from(unit) < requested);
            }
        }
    }
}
