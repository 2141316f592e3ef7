use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::layout::MusicLayout;
use crate::shuffle::Shuffler;
use crate::track::Track;
use crate::{RandomiserError, Result};

/// Tracks chosen for each usage category, in placement order.
pub type Selection = BTreeMap<String, Vec<Track>>;

/// Picks which candidates fill each category.
pub trait Selector {
    fn select<S: Shuffler>(
        &self,
        candidates: &[Track],
        layout: &MusicLayout,
        shuffler: &mut S,
    ) -> Result<Selection>;
}

/// Shuffles each category's eligible tracks and takes as many as the
/// category has slots. Categories are visited in layout order and a
/// candidate is never chosen twice.
#[derive(Debug, Default, Clone, Copy)]
pub struct ShuffleSelector;

impl Selector for ShuffleSelector {
    fn select<S: Shuffler>(
        &self,
        candidates: &[Track],
        layout: &MusicLayout,
        shuffler: &mut S,
    ) -> Result<Selection> {
        let mut taken = vec![false; candidates.len()];
        let mut selection = Selection::new();

        for cat in &layout.categories {
            let mut pool: Vec<usize> = candidates
                .iter()
                .enumerate()
                .filter(|(i, t)| {
                    !taken[*i]
                        && t.has_use(&cat.name)
                        && t.native_slot.map_or(true, |s| cat.slots.contains(&s))
                })
                .map(|(i, _)| i)
                .collect();
            shuffler.shuffle(&mut pool);

            let mut native_slots = BTreeSet::new();
            let mut chosen = Vec::new();
            for i in pool {
                if chosen.len() == cat.slots.len() {
                    break;
                }
                if let Some(slot) = candidates[i].native_slot {
                    if !native_slots.insert(slot) {
                        continue;
                    }
                }
                taken[i] = true;
                chosen.push(candidates[i].clone());
            }

            debug!(usage = %cat.name, count = chosen.len(), "selected tracks");
            selection.insert(cat.name.clone(), chosen);
        }

        Ok(selection)
    }
}

/// Slot indices whose content is already in the image and never moves.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NativeReservation(BTreeSet<u8>);

impl NativeReservation {
    pub fn from_selection(selection: &Selection) -> Self {
        selection
            .values()
            .flatten()
            .filter_map(|t| t.native_slot)
            .collect()
    }

    pub fn contains(&self, slot: u8) -> bool {
        self.0.contains(&slot)
    }
}

impl FromIterator<u8> for NativeReservation {
    fn from_iter<I: IntoIterator<Item = u8>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Final slot to track assignment for one allocation attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SlotMap {
    slots: BTreeMap<u8, Track>,
    resolved: BTreeMap<String, Vec<u8>>,
}

impl SlotMap {
    pub fn get(&self, slot: u8) -> Option<&Track> {
        self.slots.get(&slot)
    }

    /// Assigned slots in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = (u8, &Track)> {
        self.slots.iter().map(|(&s, t)| (s, t))
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Slots filled for `usage`, natives first, then in fill order.
    pub fn resolved(&self, usage: &str) -> &[u8] {
        self.resolved.get(usage).map(Vec::as_slice).unwrap_or(&[])
    }
}

pub fn assign_primary_slots(
    layout: &MusicLayout,
    selection: &Selection,
    native: &NativeReservation,
) -> Result<SlotMap> {
    let mut map = SlotMap::default();

    for (usage, tracks) in selection {
        let cat = layout.category(usage)?;
        let mut filled = Vec::new();
        let mut movable = Vec::new();

        for track in tracks {
            match track.native_slot {
                Some(slot) if native.contains(slot) && cat.slots.contains(&slot) => {
                    if map.slots.insert(slot, track.clone()).is_some() {
                        return Err(RandomiserError::Config(format!(
                            "native slot {slot:#x} is claimed by more than one track"
                        )));
                    }
                    filled.push(slot);
                }
                _ => movable.push(track),
            }
        }

        let free: Vec<u8> = cat
            .slots
            .iter()
            .copied()
            .filter(|&s| !native.contains(s) && !map.slots.contains_key(&s))
            .collect();
        if movable.len() > free.len() {
            return Err(RandomiserError::CategoryOverflow {
                usage: usage.clone(),
                tracks: movable.len(),
                free: free.len(),
            });
        }

        for (slot, track) in free.into_iter().zip(movable) {
            debug!(slot, title = %track.title, "placed track");
            map.slots.insert(slot, track.clone());
            filled.push(slot);
        }

        map.resolved.insert(usage.clone(), filled);
    }

    Ok(map)
}
