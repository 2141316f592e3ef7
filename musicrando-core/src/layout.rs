use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::track::Track;
use crate::{RandomiserError, Result};

/// A usage role and the song slots reserved for it, in fill order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageCategory {
    pub name: String,
    pub slots: Vec<u8>,
}

impl UsageCategory {
    pub fn new(name: &str, slots: &[u8]) -> Self {
        Self {
            name: name.to_string(),
            slots: slots.to_vec(),
        }
    }
}

/// A single area index or an inclusive range of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AreaSpan {
    Single(usize),
    Range([usize; 2]),
}

impl AreaSpan {
    pub fn indices(&self) -> std::ops::RangeInclusive<usize> {
        match *self {
            AreaSpan::Single(i) => i..=i,
            AreaSpan::Range([lo, hi]) => lo..=hi,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub name: String,
    pub usage: String,
    pub areas: Vec<AreaSpan>,
}

/// Where the per-area music bytes live: a table of 16-bit little-endian
/// pointers into a banked window, each pointing at an area record whose
/// `track_field` byte selects the song.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AreaTable {
    pub table_offset: usize,
    pub count: usize,
    pub window_offset: usize,
    pub window_addr: u16,
    pub window_size: usize,
    #[serde(default)]
    pub track_field: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BossTableLayout {
    pub offset: usize,
    pub len: usize,
    #[serde(default = "default_boss_usage")]
    pub usage: String,
}

fn default_boss_usage() -> String {
    "Boss".to_string()
}

/// Everything the allocation engine knows about a particular ROM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MusicLayout {
    pub header_size: usize,
    pub bank_size: usize,
    pub song_map_offset: usize,
    pub num_songs: usize,
    pub categories: Vec<UsageCategory>,
    #[serde(default)]
    pub builtin_names: Vec<Option<String>>,
    #[serde(default)]
    pub builtin_author: Option<String>,
    #[serde(default)]
    pub regions: Vec<Region>,
    #[serde(default)]
    pub area_table: Option<AreaTable>,
    #[serde(default)]
    pub boss_table: Option<BossTableLayout>,
}

const CRYSTALIS_SONG_NAMES: [Option<&str>; 0x20] = [
    Some("Silence"),
    Some("Fields"),
    None,
    Some("Poison Swamp"),
    Some("Desert"),
    None,
    Some("Ocean Waves"),
    Some("Underground Rivers"),
    Some("Fortress"),
    Some("One Hope"),
    Some("The End Day"),
    Some("Title Screen"),
    Some("Emperor Draygon"),
    Some("Shyron"),
    Some("Fortune Telling"),
    Some("Portoa Royalty"),
    None,
    Some("Earth Cave"),
    Some("Boss Battle"),
    Some("Power Increase"),
    Some("Final Confrontation"),
    Some("Tower in the Sky"),
    Some("Town"),
    Some("Ice Cave"),
    Some("Inner Mountains"),
    Some("Pyramids"),
    Some("Ending Part 3"),
    Some("Mesia"),
    Some("Ending Part 2"),
    Some("Ending Part 1"),
    Some("Ominous Introduction"),
    Some("Activation"),
];

impl MusicLayout {
    /// Layout of the 512 KiB Crystalis ROM produced by the FT base patch.
    pub fn crystalis() -> Self {
        Self {
            header_size: 0x10,
            bank_size: 0x2000,
            song_map_offset: 0x32010 + 0x10,
            num_songs: 0x4f,
            categories: vec![
                UsageCategory::new("Overworld", &[0x01, 0x04]),
                UsageCategory::new(
                    "Dungeon",
                    &[0x03, 0x07, 0x08, 0x11, 0x15, 0x17, 0x18, 0x19],
                ),
                UsageCategory::new("Ship", &[0x06]),
                UsageCategory::new("Draygon", &[0x0c]),
                UsageCategory::new("Mesia", &[0x1b]),
                UsageCategory::new("Town", &[0x0d, 0x16]),
                UsageCategory::new("Boss", &[0x12]),
                UsageCategory::new("Ending", &[0x1c]),
            ],
            builtin_names: CRYSTALIS_SONG_NAMES
                .iter()
                .map(|n| n.map(str::to_string))
                .collect(),
            builtin_author: Some("Yoko Osaka".to_string()),
            regions: Vec::new(),
            area_table: None,
            boss_table: None,
        }
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = fs::read_to_string(path.as_ref())?;
        let layout: Self = serde_json::from_str(&text)?;
        layout.validate()?;
        Ok(layout)
    }

    /// Checks that banks have a size, that slot indices are unique and in
    /// range and that every region and the boss table name a declared
    /// category.
    pub fn validate(&self) -> Result<()> {
        if self.bank_size == 0 {
            return Err(RandomiserError::Config("bank size must not be zero".to_string()));
        }

        let mut seen = [false; 0x100];
        for cat in &self.categories {
            for &slot in &cat.slots {
                let idx = slot as usize;
                if idx >= self.num_songs {
                    return Err(RandomiserError::Config(format!(
                        "slot {idx:#x} of {} is outside the song table ({:#x} songs)",
                        cat.name, self.num_songs
                    )));
                }
                if seen[idx] {
                    return Err(RandomiserError::Config(format!(
                        "slot {idx:#x} is claimed by more than one category"
                    )));
                }
                seen[idx] = true;
            }
        }

        for region in &self.regions {
            self.category(&region.usage)?;
        }
        if let Some(boss) = &self.boss_table {
            self.category(&boss.usage)?;
        }
        Ok(())
    }

    pub fn category(&self, name: &str) -> Result<&UsageCategory> {
        self.categories
            .iter()
            .find(|c| c.name == name)
            .ok_or_else(|| RandomiserError::UnknownCategory(name.to_string()))
    }

    pub fn song_name(&self, slot: u8) -> Option<&str> {
        self.builtin_names
            .get(slot as usize)
            .and_then(|n| n.as_deref())
    }

    /// File offset of the first byte of `bank`, or `None` if it overflows.
    pub fn bank_offset(&self, bank: u8) -> Option<usize> {
        (bank as usize)
            .checked_mul(self.bank_size)?
            .checked_add(self.header_size)
    }

    /// The songs already in the ROM, one per category slot, pinned to
    /// their own slot.
    pub fn builtin_tracks(&self) -> Vec<Track> {
        self.categories
            .iter()
            .flat_map(|cat| {
                cat.slots.iter().map(move |&slot| Track {
                    title: format!(
                        "Crystalis - {slot:x}. {}",
                        self.song_name(slot).unwrap_or("Unknown")
                    ),
                    author: self.builtin_author.clone(),
                    uses: vec![cat.name.clone()],
                    native_slot: Some(slot),
                    tags: Vec::new(),
                    safe: true,
                    data: Vec::new(),
                })
            })
            .collect()
    }
}

impl Default for MusicLayout {
    fn default() -> Self {
        Self::crystalis()
    }
}
