//! Index units: fixed-size blocks of address slots.

use crate::error::{CoreError, CoreResult};
use crate::segment::compute_crc32;
use crate::types::Address;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

/// Magic bytes for unit files.
pub const UNIT_MAGIC: [u8; 4] = *b"SGIX";

/// Current unit file version.
pub const UNIT_VERSION: u16 = 1;

const UNIT_HEADER_SIZE: usize = 24;

/// A block of address slots persisted as one file.
///
/// Each slot sits behind its own lock, held only for a load or a
/// replacement, so a reader sees either the old or the new address, never a
/// mix, and stores share no lock state. The dirty flag is set after every
/// replacement and cleared when a checkpoint takes its snapshot.
pub struct Unit {
    number: u32,
    slots: Box<[Mutex<Address>]>,
    dirty: AtomicBool,
}

impl Unit {
    /// Creates a unit with every slot empty.
    #[must_use]
    pub fn new(number: u32, slot_count: usize) -> Self {
        Self {
            number,
            slots: (0..slot_count)
                .map(|_| Mutex::new(Address::EMPTY))
                .collect(),
            dirty: AtomicBool::new(false),
        }
    }

    /// Returns the unit number.
    #[must_use]
    pub fn number(&self) -> u32 {
        self.number
    }

    /// Returns the slot count.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Returns true when the unit has no slots.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Loads a slot.
    #[must_use]
    pub fn load(&self, slot: usize) -> Address {
        *self.slots[slot].lock()
    }

    /// Replaces a slot, returning the previous address.
    pub fn swap(&self, slot: usize, address: Address) -> Address {
        let old = std::mem::replace(&mut *self.slots[slot].lock(), address);
        self.dirty.store(true, Ordering::Release);
        old
    }

    /// Replaces a slot only if it still holds `expected`.
    pub fn compare_exchange(&self, slot: usize, expected: Address, new: Address) -> bool {
        let mut current = self.slots[slot].lock();
        if *current != expected {
            return false;
        }
        *current = new;
        self.dirty.store(true, Ordering::Release);
        true
    }

    /// Returns whether the unit changed since its last snapshot.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Clears the dirty flag, returning its previous value.
    ///
    /// Call before [`Unit::encode`] so a replacement racing the snapshot
    /// leaves the unit dirty for the next checkpoint.
    pub fn take_dirty(&self) -> bool {
        self.dirty.swap(false, Ordering::AcqRel)
    }

    /// Marks the unit dirty again after a failed write.
    pub fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }

    /// Iterates over `(slot, address)` for every non-empty slot.
    pub fn live_slots(&self) -> impl Iterator<Item = (usize, Address)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .map(|(i, cell)| (i, *cell.lock()))
            .filter(|(_, addr)| !addr.is_empty())
    }

    /// Encodes a snapshot of the unit as file generation `generation`.
    ///
    /// ```text
    /// | magic (4) | version (2) | reserved (2) | unit (4) | slots (4) | generation (8) |
    /// | slot addresses (12 each) ... | crc32 (4) |
    /// ```
    #[must_use]
    pub fn encode(&self, generation: u64) -> Vec<u8> {
        let mut buf =
            Vec::with_capacity(UNIT_HEADER_SIZE + self.slots.len() * Address::ENCODED_SIZE + 4);
        buf.extend_from_slice(&UNIT_MAGIC);
        buf.extend_from_slice(&UNIT_VERSION.to_le_bytes());
        buf.extend_from_slice(&0u16.to_le_bytes());
        buf.extend_from_slice(&self.number.to_le_bytes());
        buf.extend_from_slice(&(self.slots.len() as u32).to_le_bytes());
        buf.extend_from_slice(&generation.to_le_bytes());
        for cell in self.slots.iter() {
            buf.extend_from_slice(&cell.lock().encode());
        }
        let crc = compute_crc32(&buf);
        buf.extend_from_slice(&crc.to_le_bytes());
        buf
    }

    /// Decodes a unit file, checking it belongs to `number` at `generation`
    /// and holds `slot_count` slots.
    pub fn decode(
        data: &[u8],
        number: u32,
        generation: u64,
        slot_count: usize,
    ) -> CoreResult<Self> {
        let expected_len = UNIT_HEADER_SIZE + slot_count * Address::ENCODED_SIZE + 4;
        if data.len() != expected_len {
            return Err(CoreError::invalid_format(format!(
                "unit {number} file is {} bytes, expected {expected_len}",
                data.len()
            )));
        }

        let (body, crc) = data.split_at(data.len() - 4);
        let stored = u32::from_le_bytes([crc[0], crc[1], crc[2], crc[3]]);
        if compute_crc32(body) != stored {
            return Err(CoreError::invalid_format(format!(
                "unit {number} checksum mismatch"
            )));
        }

        if body[0..4] != UNIT_MAGIC {
            return Err(CoreError::invalid_format("invalid unit magic"));
        }
        let version = u16::from_le_bytes([body[4], body[5]]);
        if version > UNIT_VERSION {
            return Err(CoreError::invalid_format(format!(
                "unsupported unit version: {version}"
            )));
        }
        let file_number = u32::from_le_bytes([body[8], body[9], body[10], body[11]]);
        let file_slots = u32::from_le_bytes([body[12], body[13], body[14], body[15]]);
        let mut raw_generation = [0u8; 8];
        raw_generation.copy_from_slice(&body[16..24]);
        let file_generation = u64::from_le_bytes(raw_generation);

        if file_number != number || file_slots as usize != slot_count || file_generation != generation
        {
            return Err(CoreError::invalid_format(format!(
                "unit file header ({file_number}, {file_slots} slots, gen {file_generation}) \
                 does not match unit {number} ({slot_count} slots, gen {generation})"
            )));
        }

        let unit = Self::new(number, slot_count);
        for (i, chunk) in body[UNIT_HEADER_SIZE..]
            .chunks_exact(Address::ENCODED_SIZE)
            .enumerate()
        {
            let mut raw = [0u8; Address::ENCODED_SIZE];
            raw.copy_from_slice(chunk);
            *unit.slots[i].lock() = Address::decode(&raw);
        }
        Ok(unit)
    }
}

impl std::fmt::Debug for Unit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Unit")
            .field("number", &self.number)
            .field("slots", &self.slots.len())
            .field("dirty", &self.is_dirty())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SegmentId;

    fn addr(seg: u32, off: u32) -> Address {
        Address::new(SegmentId::new(seg), off, 8)
    }

    #[test]
    fn swap_returns_previous_and_dirties() {
        let unit = Unit::new(0, 4);
        assert!(!unit.is_dirty());

        assert_eq!(unit.swap(1, addr(1, 16)), Address::EMPTY);
        assert_eq!(unit.swap(1, addr(1, 40)), addr(1, 16));
        assert_eq!(unit.load(1), addr(1, 40));
        assert!(unit.take_dirty());
        assert!(!unit.is_dirty());
    }

    #[test]
    fn compare_exchange_only_on_match() {
        let unit = Unit::new(0, 2);
        unit.swap(0, addr(1, 16));
        unit.take_dirty();

        assert!(!unit.compare_exchange(0, addr(1, 99), addr(2, 16)));
        assert!(!unit.is_dirty());
        assert!(unit.compare_exchange(0, addr(1, 16), addr(2, 16)));
        assert_eq!(unit.load(0), addr(2, 16));
        assert!(unit.is_dirty());
    }

    #[test]
    fn concurrent_compare_exchange_has_one_winner_per_round() {
        let unit = Unit::new(0, 1);
        for round in 1..=50u32 {
            let expected = unit.load(0);
            let winners: usize = std::thread::scope(|scope| {
                let handles: Vec<_> = (0..4u32)
                    .map(|t| {
                        let unit = &unit;
                        scope.spawn(move || {
                            usize::from(unit.compare_exchange(0, expected, addr(round, 16 + t)))
                        })
                    })
                    .collect();
                handles.into_iter().map(|h| h.join().unwrap()).sum()
            });
            assert_eq!(winners, 1);
            assert_eq!(unit.load(0).segment(), SegmentId::new(round));
        }
    }

    #[test]
    fn file_encoding() {
        let unit = Unit::new(3, 5);
        unit.swap(0, addr(1, 16));
        unit.swap(4, addr(2, 64));

        let data = unit.encode(7);
        let decoded = Unit::decode(&data, 3, 7, 5).unwrap();
        assert_eq!(decoded.load(0), addr(1, 16));
        assert_eq!(decoded.load(2), Address::EMPTY);
        assert_eq!(decoded.load(4), addr(2, 64));
        assert!(!decoded.is_dirty());
        assert_eq!(decoded.live_slots().count(), 2);
    }

    #[test]
    fn file_for_another_unit_is_rejected() {
        let data = Unit::new(3, 5).encode(7);
        assert!(Unit::decode(&data, 4, 7, 5).is_err());
        assert!(Unit::decode(&data, 3, 8, 5).is_err());
        assert!(Unit::decode(&data, 3, 7, 6).is_err());
    }

    #[test]
    fn corrupted_file_is_rejected() {
        let mut data = Unit::new(0, 2).encode(1);
        data[30] ^= 0xFF;
        assert!(matches!(
            Unit::decode(&data, 0, 1, 2),
            Err(CoreError::InvalidFormat { .. })
        ));
    }
}
