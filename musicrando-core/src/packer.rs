use std::collections::VecDeque;

use tracing::debug;

use crate::layout::MusicLayout;
use crate::slots::SlotMap;
use crate::{RandomiserError, Result};

/// Consumes a finished slot map and writes it into the image. Returns the
/// banks still free, or `CapacityExceeded` when the tracks do not fit.
pub trait Packer {
    fn pack(&mut self, image: &mut [u8], slots: &SlotMap) -> Result<Vec<u8>>;
}

/// Hands out free banks in list order: each non-native track takes one bank
/// per `bank_size` bytes of its data, and its slot's song map entry gets the
/// first of them.
pub struct BankLedger<'a> {
    layout: &'a MusicLayout,
    free_banks: Vec<u8>,
}

impl<'a> BankLedger<'a> {
    pub fn new(layout: &'a MusicLayout, free_banks: &[u8]) -> Self {
        Self {
            layout,
            free_banks: free_banks.to_vec(),
        }
    }
}

fn span_mut(image: &mut [u8], start: Option<usize>, len: usize) -> Option<&mut [u8]> {
    let start = start?;
    image.get_mut(start..start.checked_add(len)?)
}

impl Packer for BankLedger<'_> {
    fn pack(&mut self, image: &mut [u8], slots: &SlotMap) -> Result<Vec<u8>> {
        if self.layout.bank_size == 0 {
            return Err(RandomiserError::Config("bank size must not be zero".to_string()));
        }
        let mut free: VecDeque<u8> = self.free_banks.iter().copied().collect();

        for (slot, track) in slots.iter().filter(|(_, t)| !t.is_native()) {
            let chunks: Vec<&[u8]> = if track.data.is_empty() {
                vec![&track.data[..]]
            } else {
                track.data.chunks(self.layout.bank_size).collect()
            };
            if chunks.len() > free.len() {
                return Err(RandomiserError::CapacityExceeded {
                    track: track.title.clone(),
                    needed: chunks.len(),
                    available: free.len(),
                });
            }

            let mut first_bank = None;
            for chunk in chunks {
                let Some(bank) = free.pop_front() else {
                    break;
                };
                let Some(dst) = span_mut(image, self.layout.bank_offset(bank), chunk.len()) else {
                    return Err(RandomiserError::Config(format!(
                        "bank {bank:#x} lies outside the image"
                    )));
                };
                dst.copy_from_slice(chunk);
                first_bank.get_or_insert(bank);
            }

            if let Some(bank) = first_bank {
                let entry = self.layout.song_map_offset.checked_add(slot as usize);
                let Some([dst]) = span_mut(image, entry, 1) else {
                    return Err(RandomiserError::Config(format!(
                        "song map entry {slot:#x} lies outside the image"
                    )));
                };
                *dst = bank;
                debug!(slot, bank, title = %track.title, "packed track");
            }
        }

        Ok(free.into_iter().collect())
    }
}
