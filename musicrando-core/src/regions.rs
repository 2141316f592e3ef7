//! Secondary music tables: which song each map area plays and which song
//! each boss encounter plays. Both are derived from the primary slot map.

use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::layout::{AreaTable, BossTableLayout, Region};
use crate::shuffle::{spread, Shuffler};
use crate::slots::SlotMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionTrack {
    /// Position of the region in the layout's region list.
    pub index: usize,
    pub region: String,
    pub usage: String,
    pub slot: u8,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegionAssignment(Vec<RegionTrack>);

impl RegionAssignment {
    pub fn iter(&self) -> impl Iterator<Item = &RegionTrack> {
        self.0.iter()
    }

    pub fn get(&self, region: &str) -> Option<u8> {
        self.0.iter().find(|r| r.region == region).map(|r| r.slot)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Gives every region one slot from its own category's resolved list.
/// Categories with fewer slots than regions reuse slots; which region gets
/// which slot comes from `shuffler`.
pub fn derive_region_assignments<S: Shuffler>(
    regions: &[Region],
    slot_map: &SlotMap,
    shuffler: &mut S,
) -> RegionAssignment {
    let mut by_usage: Vec<(&str, Vec<usize>)> = Vec::new();
    for (i, region) in regions.iter().enumerate() {
        match by_usage.iter_mut().find(|(u, _)| *u == region.usage) {
            Some((_, members)) => members.push(i),
            None => by_usage.push((region.usage.as_str(), vec![i])),
        }
    }

    let mut picked: BTreeMap<usize, u8> = BTreeMap::new();
    for (usage, members) in by_usage {
        let source = slot_map.resolved(usage);
        if source.is_empty() {
            warn!(usage, regions = members.len(), "no resolved slots for regions, skipping");
            continue;
        }
        let slots = spread(source, members.len(), shuffler);
        picked.extend(members.into_iter().zip(slots));
    }

    RegionAssignment(
        picked
            .into_iter()
            .map(|(index, slot)| RegionTrack {
                index,
                region: regions[index].name.clone(),
                usage: regions[index].usage.clone(),
                slot,
            })
            .collect(),
    )
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BossTable(pub Vec<u8>);

/// Fills `table_len` encounters from `boss_slots`, leaving out the first
/// slot, which belongs to a fixed encounter. Empty if nothing is left.
pub fn derive_boss_table<S: Shuffler>(
    boss_slots: &[u8],
    table_len: usize,
    shuffler: &mut S,
) -> BossTable {
    let eligible = boss_slots.get(1..).unwrap_or(&[]);
    BossTable(spread(eligible, table_len, shuffler))
}

/// Track byte of one map area and where it lives in the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AreaTrack {
    pub area: usize,
    pub offset: usize,
    pub track: u8,
}

/// Follows each area pointer into the bank window and reads its track byte.
/// Pointers that fall outside the window or the image are skipped.
pub fn read_area_tracks(image: &[u8], table: &AreaTable) -> Vec<AreaTrack> {
    let mut out = Vec::new();

    for area in 0..table.count {
        let Some(bytes) = area
            .checked_mul(2)
            .and_then(|rel| table.table_offset.checked_add(rel))
            .and_then(|entry| image.get(entry..entry.checked_add(2)?))
        else {
            break;
        };
        let ptr = u16::from_le_bytes([bytes[0], bytes[1]]);

        let Some(rel) = ptr.checked_sub(table.window_addr) else {
            continue;
        };
        let rel = rel as usize;
        if rel >= table.window_size {
            continue;
        }

        let Some(offset) = table
            .window_offset
            .checked_add(rel)
            .and_then(|o| o.checked_add(table.track_field))
        else {
            continue;
        };
        if let Some(&track) = image.get(offset) {
            out.push(AreaTrack {
                area,
                offset,
                track,
            });
        }
    }

    out
}

/// Writes each region's slot into every area it controls. Returns the
/// number of bytes written.
pub fn write_region_tracks(
    image: &mut [u8],
    table: &AreaTable,
    assignment: &RegionAssignment,
    regions: &[Region],
) -> usize {
    let offsets: BTreeMap<usize, usize> = read_area_tracks(image, table)
        .into_iter()
        .map(|a| (a.area, a.offset))
        .collect();

    let mut written = 0;
    for entry in assignment.iter() {
        for area in regions[entry.index].areas.iter().flat_map(|s| s.indices()) {
            match offsets.get(&area) {
                Some(&offset) => {
                    image[offset] = entry.slot;
                    written += 1;
                }
                None => debug!(area, region = %entry.region, "area has no readable pointer"),
            }
        }
    }
    written
}

pub fn write_boss_table(image: &mut [u8], layout: &BossTableLayout, table: &BossTable) -> bool {
    let len = table.0.len().min(layout.len);
    let Some(end) = layout.offset.checked_add(len) else {
        return false;
    };
    match image.get_mut(layout.offset..end) {
        Some(dst) => {
            dst.copy_from_slice(&table.0[..len]);
            true
        }
        None => false,
    }
}
