use std::cmp::Ordering;
use std::fmt;

use thiserror::Error;

const SIGNATURE: &[u8] = b"PATCH";
const END_MARKER: &[u8] = b"EOF";
const MIN_CAPACITY: usize = 1024;

/// Errors raised while reading or applying an IPS patch.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PatchError {
    #[error("invalid IPS patch: missing PATCH signature")]
    Malformed,

    #[error("incomplete IPS patch: record at offset {offset:#x} runs past the end of the file")]
    Truncated { offset: usize },

    #[error("IPS record targets offset {offset:#x} past the end of the data ({size:#x} bytes)")]
    GapNotAllowed { offset: usize, size: usize },
}

/// One record of an IPS file. `payload_offset` points into the patch bytes;
/// for RLE records it is the offset of the single fill byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatchRecord {
    pub payload_offset: usize,
    pub target_offset: usize,
    pub len: usize,
    pub is_rle: bool,
}

impl PatchRecord {
    pub fn target_end(&self) -> usize {
        self.target_offset + self.len
    }
}

/// Half-open span of the target touched by one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DiffRange {
    pub start: usize,
    pub end: usize,
}

impl Ord for DiffRange {
    fn cmp(&self, other: &Self) -> Ordering {
        self.end
            .cmp(&other.end)
            .then_with(|| self.start.cmp(&other.start))
    }
}

impl PartialOrd for DiffRange {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for DiffRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start + 1 == self.end {
            write!(f, "{:x}", self.start)
        } else {
            write!(f, "{:x}-{:x}", self.start, self.end.saturating_sub(1))
        }
    }
}

/// A parsed IPS file. Records keep file order; payloads stay in `data`.
#[derive(Debug, Clone)]
pub struct PatchContainer {
    records: Vec<PatchRecord>,
    data: Vec<u8>,
    metadata_offset: usize,
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize, record_start: usize) -> Result<&'a [u8], PatchError> {
        let data = self.data;
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= data.len())
            .ok_or(PatchError::Truncated {
                offset: record_start,
            })?;
        let bytes = &data[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn read_u16_be(&mut self, record_start: usize) -> Result<usize, PatchError> {
        let b = self.take(2, record_start)?;
        Ok(((b[0] as usize) << 8) | b[1] as usize)
    }

    fn read_u24_be(&mut self, record_start: usize) -> Result<usize, PatchError> {
        let b = self.take(3, record_start)?;
        Ok(((b[0] as usize) << 16) | ((b[1] as usize) << 8) | b[2] as usize)
    }

    fn at_end_marker(&self) -> bool {
        self.data[self.pos..].starts_with(END_MARKER)
    }
}

impl PatchContainer {
    pub fn parse(bytes: &[u8]) -> Result<Self, PatchError> {
        if !bytes.starts_with(SIGNATURE) {
            return Err(PatchError::Malformed);
        }

        let mut cur = Cursor {
            data: bytes,
            pos: SIGNATURE.len(),
        };
        let mut records = Vec::new();

        while !cur.at_end_marker() {
            let record_start = cur.pos;
            let target_offset = cur.read_u24_be(record_start)?;
            let len = cur.read_u16_be(record_start)?;

            let record = if len == 0 {
                let run_len = cur.read_u16_be(record_start)?;
                let payload_offset = cur.pos;
                cur.take(1, record_start)?;
                PatchRecord {
                    payload_offset,
                    target_offset,
                    len: run_len,
                    is_rle: true,
                }
            } else {
                let payload_offset = cur.pos;
                cur.take(len, record_start)?;
                PatchRecord {
                    payload_offset,
                    target_offset,
                    len,
                    is_rle: false,
                }
            };
            records.push(record);
        }

        Ok(Self {
            records,
            data: bytes.to_vec(),
            metadata_offset: cur.pos + END_MARKER.len(),
        })
    }

    pub fn records(&self) -> &[PatchRecord] {
        &self.records
    }

    /// Everything after the EOF marker, verbatim.
    pub fn metadata(&self) -> &[u8] {
        &self.data[self.metadata_offset..]
    }

    pub fn apply(&self, source: &[u8], allow_gaps: bool) -> Result<Vec<u8>, PatchError> {
        if self.records.is_empty() {
            return Ok(source.to_vec());
        }

        let mut buf = source.to_vec();
        buf.resize(source.len().max(MIN_CAPACITY), 0);
        let mut size = source.len();

        for record in &self.records {
            if record.target_offset > size && !allow_gaps {
                return Err(PatchError::GapNotAllowed {
                    offset: record.target_offset,
                    size,
                });
            }

            let end = record.target_end();
            if end > buf.len() {
                let mut capacity = buf.len();
                while capacity < end {
                    capacity *= 2;
                }
                buf.resize(capacity, 0);
            }

            let target = &mut buf[record.target_offset..end];
            if record.is_rle {
                target.fill(self.data[record.payload_offset]);
            } else {
                target.copy_from_slice(
                    &self.data[record.payload_offset..record.payload_offset + record.len],
                );
            }

            size = size.max(end);
        }

        buf.truncate(size);
        Ok(buf)
    }

    pub fn diff_ranges(&self) -> Vec<DiffRange> {
        let mut ranges: Vec<DiffRange> = self
            .records
            .iter()
            .map(|r| DiffRange {
                start: r.target_offset,
                end: r.target_end(),
            })
            .collect();
        ranges.sort();
        ranges
    }
}
