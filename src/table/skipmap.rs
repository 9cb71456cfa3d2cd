//! Sparse field-number index.
//!
//! The map is a flat `u16` array of groups:
//!
//! ```text
//! [start_lo, start_hi, block_count, (absent_bitmap, entry_offset) * block_count]
//! ```
//!
//! A group covers `16 * block_count` field numbers starting at `start`. Bit
//! `i` of a block's bitmap is set when field `start + 16 * block + i` is
//! absent. The entry index of a present field is the block's `entry_offset`
//! plus the number of present fields before it in the block. The map ends
//! with `start == u32::MAX`.

use crate::util::CastFrom;

const BLOCK_FIELDS: u32 = 16;
const GROUP_HEADER: usize = 3;
const END: u16 = 0xFFFF;

/// Finds the entry index of `field_number`, or `None` if it is absent.
#[inline]
pub fn lookup(map: &[u16], field_number: u32) -> Option<usize> {
    let mut pos = 0;
    loop {
        let header = map.get(pos..pos + GROUP_HEADER)?;
        let start = u32::from(header[0]) | (u32::from(header[1]) << 16);
        // Groups are sorted, the terminator sorts last.
        if start == u32::MAX || field_number < start {
            return None;
        }

        let block_count = usize::from(header[2]);
        let block = usize::cast_from((field_number - start) / BLOCK_FIELDS);
        if block < block_count {
            let at = pos + GROUP_HEADER + 2 * block;
            let absent = *map.get(at)?;
            let offset = *map.get(at + 1)?;

            let bit = 1u16 << ((field_number - start) % BLOCK_FIELDS);
            if absent & bit != 0 {
                return None;
            }
            let before = (!absent & (bit - 1)).count_ones();
            return Some(usize::from(offset) + usize::cast_from(before));
        }
        pos += GROUP_HEADER + 2 * block_count;
    }
}

/// Builds a skip map over `fields`, which must be sorted and unique.
///
/// The `i`-th field's entry lives at index `first_entry + i`. Returns `None`
/// when an entry index does not fit in 16 bits.
pub fn build(fields: &[u32], first_entry: usize) -> Option<Vec<u16>> {
    let mut map = Vec::new();
    let mut fields = fields.iter().copied().peekable();
    let mut entry = first_entry;

    while let Some(&start) = fields.peek() {
        let header_at = map.len();
        map.extend_from_slice(&[low_half(start), high_half(start), 0]);

        let mut block_count = 0u32;
        loop {
            // Start a new group rather than emit more than one empty block.
            let next_block = match fields.peek() {
                Some(&field) => (field - start) / BLOCK_FIELDS,
                None => break,
            };
            if next_block > block_count + 1 || next_block >= u32::from(u16::MAX) {
                break;
            }
            while block_count <= next_block {
                let block_start = start + block_count * BLOCK_FIELDS;
                let mut absent = u16::MAX;
                let offset = u16::try_from(entry).ok()?;
                while let Some(&field) = fields.peek() {
                    if field >= block_start + BLOCK_FIELDS {
                        break;
                    }
                    absent &= !(1u16 << (field - block_start));
                    entry += 1;
                    fields.next();
                }
                map.extend_from_slice(&[absent, offset]);
                block_count += 1;
            }
        }
        map[header_at + 2] = u16::try_from(block_count).ok()?;
    }

    map.extend_from_slice(&[END, END, 0]);
    Some(map)
}

#[allow(clippy::as_conversions)]
fn low_half(value: u32) -> u16 {
    (value & 0xFFFF) as u16
}

#[allow(clippy::as_conversions)]
fn high_half(value: u32) -> u16 {
    (value >> 16) as u16
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use proptest::property_test;

    use super::*;

    #[test]
    fn test_single_field() {
        let map = build(&[1000], 4).unwrap();
        assert_eq!(lookup(&map, 1000), Some(4));
        assert_eq!(lookup(&map, 999), None);
        assert_eq!(lookup(&map, 1001), None);
        assert_eq!(lookup(&map, 5), None);
    }

    #[test]
    fn test_empty_map() {
        let map = build(&[], 0).unwrap();
        assert_eq!(map, [END, END, 0]);
        assert_eq!(lookup(&map, 1), None);
    }

    #[test]
    fn test_blocks_and_groups() {
        // Two fields in one block, one in the next, a gap of one empty block,
        // then a far away field that needs its own group.
        let fields = [100, 105, 117, 150, 100_000];
        let map = build(&fields, 10).unwrap();

        for (i, field) in fields.iter().enumerate() {
            assert_eq!(lookup(&map, *field), Some(10 + i), "field {field}");
        }
        for absent in [99, 101, 116, 133, 149, 151, 99_999, 100_001] {
            assert_eq!(lookup(&map, absent), None, "field {absent}");
        }

        // Group 1: header + 4 blocks. Group 2: header + 1 block. Terminator.
        assert_eq!(map.len(), (3 + 8) + (3 + 2) + 3);
    }

    #[test]
    fn test_max_field_number() {
        let max = crate::wire::MAXIMUM_FIELD_NUMBER;
        let map = build(&[max - 1, max], 0).unwrap();
        assert_eq!(lookup(&map, max - 1), Some(0));
        assert_eq!(lookup(&map, max), Some(1));
        assert_eq!(lookup(&map, u32::MAX), None);
    }

    #[property_test]
    fn proptest_lookup_matches_fields(fields: Vec<u16>, probes: Vec<u16>) {
        let mut fields: Vec<u32> = fields.into_iter().map(|f| u32::from(f) + 1).collect();
        fields.sort_unstable();
        fields.dedup();

        let map = build(&fields, 0).unwrap();
        for (i, field) in fields.iter().enumerate() {
            prop_assert_eq!(lookup(&map, *field), Some(i));
        }
        for probe in probes {
            let probe = u32::from(probe);
            let expected = fields.binary_search(&probe).ok();
            prop_assert_eq!(lookup(&map, probe), expected);
        }
    }
}
