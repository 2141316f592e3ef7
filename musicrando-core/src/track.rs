use serde::{Deserialize, Serialize};

use crate::layout::MusicLayout;
use crate::{RandomiserError, Result};

/// A song that can occupy a slot. `data` is the already-built binary the
/// packer copies into free banks; native tracks carry none.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Track {
    pub title: String,
    #[serde(default)]
    pub author: Option<String>,
    pub uses: Vec<String>,
    #[serde(default)]
    pub native_slot: Option<u8>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default = "default_safe")]
    pub safe: bool,
    #[serde(default)]
    pub data: Vec<u8>,
}

fn default_safe() -> bool {
    true
}

impl Track {
    pub fn is_native(&self) -> bool {
        self.native_slot.is_some()
    }

    pub fn has_use(&self, usage: &str) -> bool {
        self.uses.iter().any(|u| u.eq_ignore_ascii_case(usage))
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t.eq_ignore_ascii_case(tag))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LibraryFilter {
    pub include_diverse: bool,
    pub include_unsafe: bool,
}

impl LibraryFilter {
    pub fn accepts(&self, track: &Track) -> bool {
        (self.include_unsafe || track.safe) && (self.include_diverse || !track.has_tag("diverse"))
    }
}

/// Parses a JSON track library, checks it against `layout` and applies
/// `filter`. `name` only appears in error messages.
pub fn load_library(
    name: &str,
    json: &str,
    layout: &MusicLayout,
    filter: LibraryFilter,
) -> Result<Vec<Track>> {
    let tracks: Vec<Track> = serde_json::from_str(json).map_err(|e| {
        RandomiserError::Config(format!("error loading custom music from '{name}': {e}"))
    })?;
    validate_library(&tracks, layout).map_err(|e| {
        RandomiserError::Config(format!("error loading custom music from '{name}': {e}"))
    })?;
    Ok(tracks.into_iter().filter(|t| filter.accepts(t)).collect())
}

/// Every use must be a declared category and every native slot must belong
/// to one of the track's own categories.
pub fn validate_library(tracks: &[Track], layout: &MusicLayout) -> Result<()> {
    for track in tracks {
        if track.uses.is_empty() {
            return Err(RandomiserError::Config(format!(
                "track '{}' has no uses",
                track.title
            )));
        }
        for usage in &track.uses {
            if !layout
                .categories
                .iter()
                .any(|c| c.name.eq_ignore_ascii_case(usage))
            {
                return Err(RandomiserError::UnknownCategory(usage.clone()));
            }
        }
        if let Some(slot) = track.native_slot {
            let owned = layout
                .categories
                .iter()
                .filter(|c| track.has_use(&c.name))
                .any(|c| c.slots.contains(&slot));
            if !owned {
                return Err(RandomiserError::Config(format!(
                    "native track '{}' sits in slot {slot:#x}, which none of its uses own",
                    track.title
                )));
            }
        }
    }
    Ok(())
}
