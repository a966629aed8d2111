//! The digest-location map: a flat, value-typed index of blob locations.

use crate::hashing::fnv1a64;
use crate::local::Location;

#[derive(Debug, Clone, Copy)]
struct Slot {
    key: [u8; 32],
    // Which probe of the key's sequence this slot corresponds to; needed to
    // resume the sequence when the entry is displaced.
    attempt: u32,
    location: Location,
}

/// Open-addressed map from hashed digest keys to data block locations.
///
/// Entries are displaced cuckoo-style: an insertion landing on an occupied
/// slot evicts an older resident into the next slot of the resident's own
/// probe sequence. Both lookups and insertions touch a bounded number of
/// slots; an insertion that exhausts its budget silently drops the entry it
/// is carrying. The map is the only index over the data blocks, so a
/// dropped entry is equivalent to a preemptive eviction of its blob. The
/// knob a deployer tunes is the table's load factor against
/// `max_get_attempts` (premature-eviction probability is roughly
/// `load_factor ^ max_get_attempts`).
///
/// Slots are plain values, no pointers; the whole table lives in one
/// allocation and is guarded by the engine's single lock.
pub struct DigestLocationMap {
    slots: Vec<Option<Slot>>,
    max_get_attempts: u32,
    max_put_attempts: u32,
}

impl DigestLocationMap {
    pub fn new(slot_count: usize, max_get_attempts: u32, max_put_attempts: u32) -> Self {
        Self {
            slots: vec![None; slot_count],
            max_get_attempts,
            max_put_attempts,
        }
    }

    fn slot_index(&self, key: &[u8; 32], attempt: u32) -> usize {
        (fnv1a64(u64::from(attempt), key) % self.slots.len() as u64) as usize
    }

    /// Look up `key`, treating locations rejected by `is_live` as vacated.
    ///
    /// Inspects at most `max_get_attempts` slots.
    pub fn get(&self, key: &[u8; 32], is_live: impl Fn(&Location) -> bool) -> Option<Location> {
        for attempt in 0..self.max_get_attempts {
            let slot = self.slots[self.slot_index(key, attempt)];
            if let Some(slot) = slot {
                if slot.key == *key && is_live(&slot.location) {
                    return Some(slot.location);
                }
            }
        }
        None
    }

    /// Insert `key -> location`, displacing older residents.
    ///
    /// Performs at most `max_put_attempts` slot mutations. The entry still
    /// being carried when the mutation allowance runs out, or whose probe
    /// sequence is exhausted, is dropped.
    pub fn put(&mut self, key: [u8; 32], location: Location, is_live: impl Fn(&Location) -> bool) {
        let mut record = Slot {
            key,
            attempt: 0,
            location,
        };
        for _ in 0..self.max_put_attempts {
            let index = self.slot_index(&record.key, record.attempt);
            let resident = match self.slots[index] {
                // Free or vacated slots accept the record outright.
                Some(resident) if is_live(&resident.location) => resident,
                _ => {
                    self.slots[index] = Some(record);
                    return;
                }
            };
            if resident.key == record.key {
                // Same blob; keep whichever location is newer.
                if resident.location.is_older_than(&record.location) {
                    self.slots[index] = Some(record);
                }
                return;
            }
            if resident.location.is_older_than(&record.location) {
                // Displace the older resident and keep inserting it along
                // its own probe sequence.
                self.slots[index] = Some(record);
                record = Slot {
                    attempt: resident.attempt + 1,
                    ..resident
                };
            } else {
                record.attempt += 1;
            }
            if record.attempt >= self.max_get_attempts {
                // Unreachable by any future get; dropping it now is a
                // preemptive eviction.
                return;
            }
        }
    }

    /// Remove the entry for `key` if it still points at `location`.
    ///
    /// Used by repair hooks; a concurrent refresh that moved the entry wins.
    pub fn remove(&mut self, key: &[u8; 32], location: &Location) {
        for attempt in 0..self.max_get_attempts {
            let index = self.slot_index(key, attempt);
            if let Some(slot) = self.slots[index] {
                if slot.key == *key && slot.location == *location {
                    self.slots[index] = None;
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn key(seed: u8) -> [u8; 32] {
        [seed; 32]
    }

    fn location(block_id: u64, offset: u64) -> Location {
        Location {
            block_id,
            offset_bytes: offset,
            size_bytes: 1,
        }
    }

    const LIVE: fn(&Location) -> bool = |_| true;

    #[test]
    fn put_then_get_round_trips() {
        let mut map = DigestLocationMap::new(64, 8, 32);
        map.put(key(1), location(3, 0), LIVE);
        assert_eq!(map.get(&key(1), LIVE), Some(location(3, 0)));
        assert_eq!(map.get(&key(2), LIVE), None);
    }

    #[test]
    fn newer_locations_replace_older_ones() {
        let mut map = DigestLocationMap::new(64, 8, 32);
        map.put(key(1), location(3, 0), LIVE);
        map.put(key(1), location(7, 16), LIVE);
        assert_eq!(map.get(&key(1), LIVE), Some(location(7, 16)));

        // A stale update never rolls the entry back.
        map.put(key(1), location(2, 0), LIVE);
        assert_eq!(map.get(&key(1), LIVE), Some(location(7, 16)));
    }

    #[test]
    fn dead_locations_read_as_absent_and_are_reusable() {
        let mut map = DigestLocationMap::new(64, 8, 32);
        map.put(key(1), location(3, 0), LIVE);

        let live_after_3 = |loc: &Location| loc.block_id > 3;
        assert_eq!(map.get(&key(1), live_after_3), None);

        // The vacated slot accepts new entries.
        map.put(key(1), location(9, 0), live_after_3);
        assert_eq!(map.get(&key(1), live_after_3), Some(location(9, 0)));
    }

    #[test]
    fn remove_only_matches_the_exact_location() {
        let mut map = DigestLocationMap::new(64, 8, 32);
        map.put(key(1), location(3, 0), LIVE);

        map.remove(&key(1), &location(3, 8));
        assert_eq!(map.get(&key(1), LIVE), Some(location(3, 0)));

        map.remove(&key(1), &location(3, 0));
        assert_eq!(map.get(&key(1), LIVE), None);
    }

    #[test]
    fn overfull_map_drops_oldest_entries_not_newest() {
        // A tiny table forced well past its capacity: insertions must stay
        // bounded and recent entries must survive displacement.
        let mut map = DigestLocationMap::new(8, 4, 16);
        for i in 0..64u8 {
            map.put(key(i), location(u64::from(i), 0), LIVE);
        }
        // The most recent insertion always survives: every slot it probes
        // holds an older resident, which it displaces.
        assert_eq!(map.get(&key(63), LIVE), Some(location(63, 0)));
    }

    proptest! {
        /// Whatever displacement does, a lookup never fabricates data: it
        /// yields the newest location stored for that key, or nothing.
        #[test]
        fn lookups_are_sound(entries in proptest::collection::vec((0u8..32, 0u64..1000), 1..200)) {
            let mut map = DigestLocationMap::new(32, 4, 16);
            let mut newest: std::collections::HashMap<u8, u64> = std::collections::HashMap::new();
            for (seed, order) in entries {
                // Monotonically newer locations, as the block ring produces.
                let id = *newest.get(&seed).map(|prev| prev.max(&order)).unwrap_or(&order) + 1;
                map.put(key(seed), location(id, 0), LIVE);
                newest.insert(seed, id);
            }
            for (seed, id) in newest {
                if let Some(found) = map.get(&key(seed), LIVE) {
                    prop_assert_eq!(found.block_id, id);
                }
            }
        }
    }
}
