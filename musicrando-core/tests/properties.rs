use musicrando_core::ips::{PatchContainer, PatchError};
use musicrando_core::layout::{AreaSpan, MusicLayout, Region, UsageCategory};
use musicrando_core::packer::Packer;
use musicrando_core::regions::{derive_boss_table, derive_region_assignments};
use musicrando_core::retry::retry_allocation;
use musicrando_core::shuffle::RandomShuffler;
use musicrando_core::slots::{
    assign_primary_slots, NativeReservation, Selection, ShuffleSelector, SlotMap,
};
use musicrando_core::track::Track;
use musicrando_core::{allocate, RandomiserError, Result};
use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::SeedableRng;

// --- HELPERS ---

fn encode(records: &[(usize, Vec<u8>)]) -> Vec<u8> {
    let mut out = b"PATCH".to_vec();
    for (offset, payload) in records {
        out.extend_from_slice(&(*offset as u32).to_be_bytes()[1..]);
        out.extend_from_slice(&(payload.len() as u16).to_be_bytes());
        out.extend_from_slice(payload);
    }
    out.extend_from_slice(b"EOF");
    out
}

fn encode_rle(offset: usize, len: u16, value: u8) -> Vec<u8> {
    let mut out = b"PATCH".to_vec();
    out.extend_from_slice(&(offset as u32).to_be_bytes()[1..]);
    out.extend_from_slice(&[0, 0]);
    out.extend_from_slice(&len.to_be_bytes());
    out.push(value);
    out.extend_from_slice(b"EOF");
    out
}

/// Literal records covering every byte where `target` differs from
/// `source`, plus everything past the end of `source`.
fn diff(source: &[u8], target: &[u8]) -> Vec<(usize, Vec<u8>)> {
    let differs = |i: usize| i >= source.len() || source[i] != target[i];
    let mut records = Vec::new();
    let mut i = 0;
    while i < target.len() {
        if !differs(i) {
            i += 1;
            continue;
        }
        let start = i;
        while i < target.len() && differs(i) && i - start < 0xFFFF {
            i += 1;
        }
        records.push((start, target[start..i].to_vec()));
    }
    records
}

fn track(title: &str, usage: &str, native_slot: Option<u8>) -> Track {
    Track {
        title: title.to_string(),
        author: None,
        uses: vec![usage.to_string()],
        native_slot,
        tags: Vec::new(),
        safe: true,
        data: vec![0xEA; 8],
    }
}

fn layout() -> MusicLayout {
    let mut layout = MusicLayout::crystalis();
    layout.categories = vec![
        UsageCategory::new("Dungeon", &[0x03, 0x07, 0x08, 0x11, 0x15]),
        UsageCategory::new("Town", &[0x0d, 0x16]),
        UsageCategory::new("Boss", &[0x14, 0x12, 0x25, 0x26]),
    ];
    layout
}

fn selection(dungeon: usize, town: usize, native_dungeon: &[u8]) -> Selection {
    let mut sel = Selection::new();
    let mut dungeons: Vec<Track> = native_dungeon
        .iter()
        .map(|&s| track(&format!("native {s:x}"), "Dungeon", Some(s)))
        .collect();
    dungeons.extend((0..dungeon).map(|i| track(&format!("dungeon {i}"), "Dungeon", None)));
    sel.insert("Dungeon".to_string(), dungeons);
    sel.insert(
        "Town".to_string(),
        (0..town).map(|i| track(&format!("town {i}"), "Town", None)).collect(),
    );
    sel
}

struct AlwaysFull;

impl Packer for AlwaysFull {
    fn pack(&mut self, _image: &mut [u8], _slots: &SlotMap) -> Result<Vec<u8>> {
        Err(RandomiserError::CapacityExceeded {
            track: "everything".to_string(),
            needed: 1,
            available: 0,
        })
    }
}

// --- PATCH ENGINE ---

proptest! {
    #[test]
    fn diff_then_apply_round_trips(
        source in proptest::collection::vec(any::<u8>(), 0..300),
        target in proptest::collection::vec(any::<u8>(), 0..300),
    ) {
        let mut target = target;
        if target.len() < source.len() {
            target.extend_from_slice(&source[target.len()..]);
        }
        let container = PatchContainer::parse(&encode(&diff(&source, &target))).unwrap();
        prop_assert_eq!(container.apply(&source, false).unwrap(), target);
    }

    #[test]
    fn rle_fills_exactly_its_span(offset in 0usize..2048, len in 1u16..512, value in 1u8..=255) {
        let source = vec![0u8; offset + len as usize + 16];
        let container = PatchContainer::parse(&encode_rle(offset, len, value)).unwrap();
        let out = container.apply(&source, false).unwrap();

        prop_assert_eq!(out.len(), source.len());
        for (i, &b) in out.iter().enumerate() {
            let inside = i >= offset && i < offset + len as usize;
            prop_assert_eq!(b, if inside { value } else { 0 });
        }
    }

    #[test]
    fn growth_reaches_max_span_end(
        source_len in 0usize..64,
        records in proptest::collection::vec((0usize..5000, 1usize..300), 1..8),
    ) {
        let source = vec![0x11u8; source_len];
        let encoded: Vec<(usize, Vec<u8>)> = records
            .iter()
            .map(|&(offset, len)| (offset, vec![0x22; len]))
            .collect();
        let container = PatchContainer::parse(&encode(&encoded)).unwrap();
        let out = container.apply(&source, true).unwrap();

        let max_end = records.iter().map(|&(o, l)| o + l).max().unwrap();
        prop_assert_eq!(out.len(), max_end.max(source_len));
    }

    #[test]
    fn gaps_are_rejected_without_permission(source_len in 0usize..256, gap in 1usize..4096) {
        let offset = source_len + gap;
        let container = PatchContainer::parse(&encode(&[(offset, vec![1])])).unwrap();
        prop_assert_eq!(
            container.apply(&vec![0; source_len], false).unwrap_err(),
            PatchError::GapNotAllowed { offset, size: source_len }
        );
    }

    #[test]
    fn truncated_patches_never_parse(cut in 6usize..16) {
        let full = encode(&[(0x10, vec![1, 2, 3, 4, 5, 6, 7, 8])]);
        let err = PatchContainer::parse(&full[..cut]).unwrap_err();
        prop_assert_eq!(err, PatchError::Truncated { offset: 5 });
    }
}

#[test]
fn patch_from_readme_scenario() {
    let mut bytes = b"PATCH".to_vec();
    bytes.extend_from_slice(&[0x00, 0x00, 0x00, 0x00, 0x04, 0xAA, 0xBB, 0xCC, 0xDD]);
    bytes.extend_from_slice(b"EOF");
    let out = PatchContainer::parse(&bytes).unwrap().apply(&[0; 4], false).unwrap();
    assert_eq!(out, vec![0xAA, 0xBB, 0xCC, 0xDD]);
}

// --- ALLOCATION ENGINE ---

proptest! {
    #[test]
    fn primary_slots_are_pure_and_keep_natives(
        extra in 0usize..=3,
        town in 0usize..=2,
        natives in proptest::sample::subsequence(vec![0x07u8, 0x11], 0..=2),
    ) {
        let layout = layout();
        let sel = selection(extra, town, &natives);
        let native = NativeReservation::from_selection(&sel);

        let first = assign_primary_slots(&layout, &sel, &native).unwrap();
        let second = assign_primary_slots(&layout, &sel, &native).unwrap();
        prop_assert_eq!(&first, &second);

        for &slot in &natives {
            let placed = first.get(slot).unwrap();
            prop_assert_eq!(placed.native_slot, Some(slot));
        }
        prop_assert_eq!(first.len(), natives.len() + extra + town);
    }

    #[test]
    fn regions_only_draw_from_their_category(
        seed in any::<u64>(),
        town_regions in 1usize..12,
        dungeon_regions in 0usize..12,
    ) {
        let layout = layout();
        let sel = selection(3, 2, &[0x07]);
        let native = NativeReservation::from_selection(&sel);
        let slots = assign_primary_slots(&layout, &sel, &native).unwrap();

        let regions: Vec<Region> = (0..town_regions)
            .map(|i| ("Town", i))
            .chain((0..dungeon_regions).map(|i| ("Dungeon", i)))
            .map(|(usage, i)| Region {
                name: format!("{usage} {i}"),
                usage: usage.to_string(),
                areas: vec![AreaSpan::Single(i)],
            })
            .collect();

        let mut shuffler = RandomShuffler::new(StdRng::seed_from_u64(seed));
        let assignment = derive_region_assignments(&regions, &slots, &mut shuffler);

        prop_assert_eq!(assignment.len(), regions.len());
        for entry in assignment.iter() {
            prop_assert!(slots.resolved(&entry.usage).contains(&entry.slot));
        }
    }
}

#[test]
fn boss_table_scenario() {
    let mut shuffler = RandomShuffler::new(StdRng::seed_from_u64(2024));
    let table = derive_boss_table(&[0x14, 0x12, 0x25, 0x26], 7, &mut shuffler);
    assert_eq!(table.0.len(), 7);
    assert!(table.0.iter().all(|s| [0x12, 0x25, 0x26].contains(s)));
}

#[test]
fn overflowing_category_is_not_retried() {
    let layout = layout();
    let sel = selection(0, 3, &[]);
    let err = assign_primary_slots(&layout, &sel, &NativeReservation::default()).unwrap_err();
    assert!(matches!(
        err,
        RandomiserError::CategoryOverflow { tracks: 3, free: 2, .. }
    ));
}

#[test]
fn retry_budget_is_exhausted_after_n_plus_one_attempts() {
    let layout = layout();
    let candidates: Vec<Track> = (0..4)
        .map(|i| track(&format!("dungeon {i}"), "Dungeon", None))
        .collect();
    let rom = vec![0u8; 0x100];

    for budget in [0usize, 1, 5] {
        let mut attempts = 0;
        let res = retry_allocation(7, budget, |rng, _| {
            attempts += 1;
            allocate(&rom, &layout, &candidates, &ShuffleSelector, &mut AlwaysFull, rng)
        });
        assert!(matches!(res, Err(RandomiserError::CapacityExceeded { .. })));
        assert_eq!(attempts, budget + 1);
    }
}
