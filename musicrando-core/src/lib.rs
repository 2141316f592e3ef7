use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

pub mod embed;
pub mod ips;
pub mod layout;
pub mod packer;
pub mod regions;
pub mod retry;
pub mod shuffle;
pub mod slots;
pub mod track;

use ips::{PatchContainer, PatchError};
use layout::MusicLayout;
use packer::{BankLedger, Packer};
use regions::{
    derive_boss_table, derive_region_assignments, write_boss_table, write_region_tracks,
    BossTable, RegionAssignment,
};
use retry::retry_allocation;
use shuffle::RandomShuffler;
use slots::{assign_primary_slots, NativeReservation, Selector, ShuffleSelector, SlotMap};
use track::{load_library, LibraryFilter, Track};

/// Size of an unexpanded Crystalis ROM, iNES header included.
pub const ROM_SIZE: usize = 0x60010;
/// Size after expansion to 512 KiB of PRG.
pub const EXPANDED_ROM_SIZE: usize = 0xa0010;
const EXPANDED_HEAD: usize = 0x3c010;
const EXPANDED_TAIL: usize = 0x24000;

pub const DEFAULT_RETRIES: usize = 8;

#[derive(Debug, Error)]
pub enum RandomiserError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("configuration error: {0}")]
    Config(String),
    #[error(transparent)]
    Patch(#[from] PatchError),
    #[error("not a Crystalis ROM ({len:#x} bytes)")]
    NotARom { len: usize },
    #[error("unknown usage category '{0}'")]
    UnknownCategory(String),
    #[error("category {usage} has {tracks} tracks but only {free} free slots")]
    CategoryOverflow {
        usage: String,
        tracks: usize,
        free: usize,
    },
    #[error("ROM is full: '{track}' needs {needed} banks but only {available} are free")]
    CapacityExceeded {
        track: String,
        needed: usize,
        available: usize,
    },
}

pub type Result<T> = std::result::Result<T, RandomiserError>;

/// Inputs to one randomisation run, independent of where they came from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RandomizeOptions {
    pub seed: u64,
    pub retries: usize,
    pub include_builtin: bool,
    pub include_diverse: bool,
    pub include_unsafe: bool,
    /// JSON track libraries, in load order.
    pub libraries: Vec<String>,
    /// IPS patch applied to the expanded ROM before allocation.
    pub patch: Option<Vec<u8>>,
    pub layout: MusicLayout,
}

impl Default for RandomizeOptions {
    fn default() -> Self {
        Self {
            seed: 0,
            retries: DEFAULT_RETRIES,
            include_builtin: true,
            include_diverse: false,
            include_unsafe: false,
            libraries: Vec::new(),
            patch: None,
            layout: MusicLayout::crystalis(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RandomiserSettings {
    pub seed: u64,
    pub retries: usize,
    pub include_builtin: bool,
    pub include_diverse: bool,
    pub include_unsafe: bool,
    pub libraries: Vec<PathBuf>,
    pub patch_path: Option<PathBuf>,
    pub layout_path: Option<PathBuf>,
    pub free_banks: Vec<u8>,
    pub input_path: PathBuf,
    pub output_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Randomized {
    pub rom: Vec<u8>,
    pub free_banks: Vec<u8>,
    pub log: String,
}

/// Brings a ROM to the expanded size, keeping the fixed banks at the end.
pub fn expand_rom(base: &[u8]) -> Result<Vec<u8>> {
    match base.len() {
        EXPANDED_ROM_SIZE => Ok(base.to_vec()),
        ROM_SIZE => {
            let mut out = vec![0u8; EXPANDED_ROM_SIZE];
            out[..EXPANDED_HEAD].copy_from_slice(&base[..EXPANDED_HEAD]);
            out[EXPANDED_ROM_SIZE - EXPANDED_TAIL..]
                .copy_from_slice(&base[ROM_SIZE - EXPANDED_TAIL..]);
            Ok(out)
        }
        len => Err(RandomiserError::NotARom { len }),
    }
}

fn load_candidates(options: &RandomizeOptions) -> Result<Vec<Track>> {
    let layout = &options.layout;
    let filter = LibraryFilter {
        include_diverse: options.include_diverse,
        include_unsafe: options.include_unsafe,
    };

    let mut tracks = Vec::new();
    if options.include_builtin {
        tracks.extend(layout.builtin_tracks());
    }
    for (i, json) in options.libraries.iter().enumerate() {
        let name = format!("custom library {}", i + 1);
        tracks.extend(load_library(&name, json, layout, filter)?);
    }
    Ok(tracks)
}

/// Parses every library without filtering, reporting the first problem.
pub fn check_libraries(layout: &MusicLayout, libraries: &[String]) -> Result<usize> {
    let filter = LibraryFilter {
        include_diverse: true,
        include_unsafe: true,
    };
    let mut count = 0;
    for (i, json) in libraries.iter().enumerate() {
        let name = format!("custom library {}", i + 1);
        count += load_library(&name, json, layout, filter)?.len();
    }
    Ok(count)
}

fn write_log(
    layout: &MusicLayout,
    slots: &SlotMap,
    regions: &RegionAssignment,
    boss: Option<&BossTable>,
) -> String {
    let mut log = String::new();

    let _ = writeln!(log, "Selected Songs:");
    for (slot, track) in slots.iter() {
        let author = match track.author.as_deref() {
            Some(a) if !a.is_empty() => format!(" ({a})"),
            _ => String::new(),
        };
        let _ = writeln!(
            log,
            "- {slot} ({}): {}{author}",
            layout.song_name(slot).unwrap_or(""),
            track.title
        );
    }

    if !regions.is_empty() {
        let _ = writeln!(log, "\nRegion Songs:");
        for entry in regions.iter() {
            let _ = writeln!(log, "- {} ({}): {}", entry.region, entry.usage, entry.slot);
        }
    }

    if let Some(table) = boss.filter(|t| !t.0.is_empty()) {
        let _ = writeln!(log, "\nBoss Songs:");
        for (i, slot) in table.0.iter().enumerate() {
            let _ = writeln!(log, "- {i}: {slot}");
        }
    }

    log
}

/// One allocation attempt over a fresh copy of `rom`. Nothing here is
/// retried; a `CapacityExceeded` from `packer` goes back to the caller.
pub fn allocate<Sel: Selector, P: Packer>(
    rom: &[u8],
    layout: &MusicLayout,
    candidates: &[Track],
    selector: &Sel,
    packer: &mut P,
    rng: StdRng,
) -> Result<Randomized> {
    let mut image = rom.to_vec();
    let mut shuffler = RandomShuffler::new(rng);

    let selection = selector.select(candidates, layout, &mut shuffler)?;
    let native = NativeReservation::from_selection(&selection);
    let slots = assign_primary_slots(layout, &selection, &native)?;

    let regions = derive_region_assignments(&layout.regions, &slots, &mut shuffler);
    let boss = match &layout.boss_table {
        Some(boss_layout) => {
            let cat = layout.category(&boss_layout.usage)?;
            let filled: Vec<u8> = cat
                .slots
                .iter()
                .enumerate()
                .filter(|&(i, &s)| i == 0 || slots.get(s).is_some())
                .map(|(_, &s)| s)
                .collect();
            Some(derive_boss_table(&filled, boss_layout.len, &mut shuffler))
        }
        None => None,
    };

    let free_banks = packer.pack(&mut image, &slots)?;

    if let Some(table) = &layout.area_table {
        let written = write_region_tracks(&mut image, table, &regions, &layout.regions);
        info!(written, "wrote area music table");
    }
    if let (Some(boss_layout), Some(table)) = (&layout.boss_table, &boss) {
        if !write_boss_table(&mut image, boss_layout, table) {
            return Err(RandomiserError::Config(format!(
                "boss table at {:#x} lies outside the image",
                boss_layout.offset
            )));
        }
    }

    let log = write_log(layout, &slots, &regions, boss.as_ref());
    Ok(Randomized {
        rom: image,
        free_banks,
        log,
    })
}

pub fn randomize_rom(
    base_rom: &[u8],
    free_banks: &[u8],
    options: &RandomizeOptions,
) -> Result<Randomized> {
    let mut rom = expand_rom(base_rom)?;

    if !options.include_builtin && options.libraries.is_empty() {
        return Ok(Randomized {
            rom: base_rom.to_vec(),
            free_banks: free_banks.to_vec(),
            log: String::new(),
        });
    }

    let layout = &options.layout;
    layout.validate()?;

    if let Some(patch) = &options.patch {
        let container = PatchContainer::parse(patch)?;
        rom = container.apply(&rom, false)?;
        info!(records = container.records().len(), "applied base patch");
    }

    let candidates = load_candidates(options)?;
    info!(count = candidates.len(), "loaded candidate tracks");

    retry_allocation(options.seed, options.retries, |rng, attempt| {
        let mut packer = BankLedger::new(layout, free_banks);
        let out = allocate(&rom, layout, &candidates, &ShuffleSelector, &mut packer, rng)?;
        info!(attempt = attempt + 1, free = out.free_banks.len(), "allocation succeeded");
        Ok(out)
    })
}

/// `<dir>/<stem> Music<ext>` next to the source ROM.
pub fn default_output_path(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = input
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    input.with_file_name(format!("{stem} Music{ext}"))
}

pub struct RunOutcome {
    pub output_path: PathBuf,
    pub result: Randomized,
}

pub fn run(settings: RandomiserSettings) -> Result<RunOutcome> {
    if !settings.input_path.exists() {
        return Err(RandomiserError::Config(format!(
            "Input path does not exist: {}",
            settings.input_path.display()
        )));
    }

    let layout = match &settings.layout_path {
        Some(path) => MusicLayout::load_from_file(path)?,
        None => MusicLayout::crystalis(),
    };
    let libraries = settings
        .libraries
        .iter()
        .map(fs::read_to_string)
        .collect::<std::io::Result<Vec<_>>>()?;
    check_libraries(&layout, &libraries)?;

    let patch = settings.patch_path.as_ref().map(fs::read).transpose()?;
    let options = RandomizeOptions {
        seed: settings.seed,
        retries: settings.retries,
        include_builtin: settings.include_builtin,
        include_diverse: settings.include_diverse,
        include_unsafe: settings.include_unsafe,
        libraries,
        patch,
        layout,
    };

    let source = fs::read(&settings.input_path)?;
    let result = randomize_rom(&source, &settings.free_banks, &options)?;

    let output_path = settings
        .output_path
        .unwrap_or_else(|| default_output_path(&settings.input_path));
    fs::write(&output_path, &result.rom)?;
    info!(path = %output_path.display(), "wrote randomised ROM");

    Ok(RunOutcome {
        output_path,
        result,
    })
}
