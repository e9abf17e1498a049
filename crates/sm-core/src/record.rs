//! Binary interchange layout for persisted stars.
//!
//! One record, little-endian throughout:
//!
//! ```text
//! [u8 version]
//! [4 × f32 coordinates]
//! [12-byte rainbow code]
//! [f32 brightness][f32 gravity]
//! [u16 tag count]{ [u16 byte length][UTF-8 bytes] } × count
//! [u64 created_at, Unix µs]
//! ```
//!
//! A record file is `b"SMST"`, a u32 record count, then the records back to
//! back. The star id is not part of the record: ids are reassigned in file
//! order when records are restored into a store.

use std::collections::BTreeSet;

use crate::constants::{CODE_LEN, RECORD_VERSION};
use crate::error::{CoreError, Result};
use crate::spectrum::RainbowCode;
use crate::star::Star;

pub const FILE_MAGIC: &[u8; 4] = b"SMST";

/// Tags longer than this many bytes are truncated on scatter.
pub const MAX_TAG_BYTES: usize = 256;
/// Tags beyond this count are dropped on scatter.
pub const MAX_TAGS: usize = 1024;

/// A star as persisted: everything but the id.
#[derive(Clone, Debug, PartialEq)]
pub struct StarRecord {
    pub code: RainbowCode,
    pub coordinates: [f64; 4],
    pub brightness: f64,
    pub gravity: f64,
    pub tags: BTreeSet<String>,
    pub created_at: u64,
}

impl From<&Star> for StarRecord {
    fn from(star: &Star) -> Self {
        Self {
            code: star.code,
            coordinates: star.coordinates,
            brightness: star.brightness,
            gravity: star.gravity,
            tags: star.tags.clone(),
            created_at: star.created_at,
        }
    }
}

impl StarRecord {
    /// Serialize into the record layout.
    pub fn encode(&self) -> Vec<u8> {
        let tag_bytes: usize = self.tags.iter().map(|t| 2 + t.len()).sum();
        let mut out = Vec::with_capacity(1 + 16 + CODE_LEN + 8 + 2 + tag_bytes + 8);

        out.push(RECORD_VERSION);
        for c in self.coordinates {
            out.extend_from_slice(&(c as f32).to_le_bytes());
        }
        out.extend_from_slice(self.code.as_bytes());
        out.extend_from_slice(&(self.brightness as f32).to_le_bytes());
        out.extend_from_slice(&(self.gravity as f32).to_le_bytes());

        // Tag limits are enforced on scatter; these casts cannot truncate
        // for any star that came through a store.
        let tags: Vec<&String> = self.tags.iter().take(u16::MAX as usize).collect();
        out.extend_from_slice(&(tags.len() as u16).to_le_bytes());
        for tag in tags {
            let bytes = &tag.as_bytes()[..tag.len().min(u16::MAX as usize)];
            out.extend_from_slice(&(bytes.len() as u16).to_le_bytes());
            out.extend_from_slice(bytes);
        }

        out.extend_from_slice(&self.created_at.to_le_bytes());
        out
    }

    /// Parse one record from the front of `bytes`, returning it and the
    /// number of bytes consumed.
    pub fn decode(bytes: &[u8]) -> Result<(Self, usize)> {
        let mut reader = Reader::new(bytes);

        let version = reader.u8()?;
        if version != RECORD_VERSION {
            return Err(CoreError::CorruptRecord(format!(
                "unsupported record version {version}"
            )));
        }

        let mut coordinates = [0.0; 4];
        for c in &mut coordinates {
            *c = reader.f32()? as f64;
        }
        let code = RainbowCode::from_slice(reader.take(CODE_LEN)?)
            .map_err(|e| CoreError::CorruptRecord(e.to_string()))?;
        let brightness = reader.f32()? as f64;
        let gravity = reader.f32()? as f64;

        if coordinates.iter().any(|c| !c.is_finite())
            || !brightness.is_finite()
            || !gravity.is_finite()
        {
            return Err(CoreError::CorruptRecord(
                "non-finite coordinate or weight".to_string(),
            ));
        }

        let tag_count = reader.u16()?;
        let mut tags = BTreeSet::new();
        for _ in 0..tag_count {
            let len = reader.u16()? as usize;
            let raw = reader.take(len)?;
            let tag = std::str::from_utf8(raw)
                .map_err(|e| CoreError::CorruptRecord(format!("tag is not UTF-8: {e}")))?;
            tags.insert(tag.to_string());
        }

        let created_at = reader.u64()?;

        Ok((
            Self {
                code,
                coordinates,
                brightness,
                gravity,
                tags,
                created_at,
            },
            reader.position(),
        ))
    }
}

/// Serialize a full record file.
pub fn encode_file<'a>(records: impl IntoIterator<Item = &'a StarRecord>) -> Vec<u8> {
    let mut body = Vec::new();
    let mut count: u32 = 0;
    for record in records {
        body.extend_from_slice(&record.encode());
        count += 1;
    }

    let mut out = Vec::with_capacity(8 + body.len());
    out.extend_from_slice(FILE_MAGIC);
    out.extend_from_slice(&count.to_le_bytes());
    out.extend_from_slice(&body);
    out
}

/// Parse a full record file. Any damage is a single terminal error.
pub fn decode_file(bytes: &[u8]) -> Result<Vec<StarRecord>> {
    let mut reader = Reader::new(bytes);
    if reader.take(4)? != FILE_MAGIC {
        return Err(CoreError::CorruptRecord("missing SMST file magic".to_string()));
    }
    let count = reader.u32()? as usize;

    let mut records = Vec::with_capacity(count.min(bytes.len() / 40));
    let mut offset = reader.position();
    for index in 0..count {
        let (record, used) = StarRecord::decode(&bytes[offset..])
            .map_err(|e| CoreError::CorruptRecord(format!("record {index}: {e}")))?;
        records.push(record);
        offset += used;
    }

    if offset != bytes.len() {
        return Err(CoreError::CorruptRecord(format!(
            "{} trailing bytes after {count} records",
            bytes.len() - offset
        )));
    }
    Ok(records)
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn position(&self) -> usize {
        self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self.pos.checked_add(n).filter(|end| *end <= self.bytes.len());
        let Some(end) = end else {
            return Err(CoreError::CorruptRecord(format!(
                "truncated: need {n} bytes at offset {}, have {}",
                self.pos,
                self.bytes.len().saturating_sub(self.pos)
            )));
        };
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.array::<1>()?[0])
    }

    fn u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.array()?))
    }

    fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    fn u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.array()?))
    }

    fn f32(&mut self) -> Result<f32> {
        Ok(f32::from_le_bytes(self.array()?))
    }
}
