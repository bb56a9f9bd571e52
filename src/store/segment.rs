//! On-disk layout for one SMS segment file (§4.1): a fixed-capacity,
//! memory-mapped append log of `{guid(16), len(4), bytes(len), checksum(4)}`
//! records, named `<N>.rdq`.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::mmap::MmapFile;
use crate::message::Guid;
use crate::{Error, Result};

/// guid(16) + len(4) + checksum(4), payload bytes follow `len`.
pub const RECORD_OVERHEAD: u64 = 16 + 4 + 4;

pub fn segment_path(dir: &Path, id: u64) -> PathBuf {
    dir.join(format!("{id}.rdq"))
}

/// Appends records into one preallocated, memory-mapped segment file.
pub struct SegmentWriter {
    pub id: u64,
    mmap: MmapFile,
    write_offset: u64,
    capacity: u64,
}

/// A single decoded record, as produced by [`SegmentWriter::append`] or scanned
/// back out of a closed segment.
pub struct DecodedRecord {
    pub guid: Guid,
    pub offset: u64,
    pub len: u32,
}

impl SegmentWriter {
    pub fn create(dir: &Path, id: u64, capacity: u64) -> Result<Self> {
        let path = segment_path(dir, id);
        Self::create_at(&path, id, capacity)
    }

    /// Like [`Self::create`], but at an explicit path rather than the
    /// conventional `<dir>/<id>.rdq` — used by the compacting GC to build a
    /// replacement segment under a temporary name before renaming it over.
    pub fn create_at(path: &Path, id: u64, capacity: u64) -> Result<Self> {
        let mmap = MmapFile::create(path, capacity as usize)?;
        Ok(Self {
            id,
            mmap,
            write_offset: 0,
            capacity,
        })
    }

    pub fn open_for_append(dir: &Path, id: u64, write_offset: u64, capacity: u64) -> Result<Self> {
        let path = segment_path(dir, id);
        let mmap = MmapFile::open(&path)?;
        Ok(Self {
            id,
            mmap,
            write_offset,
            capacity,
        })
    }

    /// Appends one record. Returns `None` (without mutating state) if the
    /// record would not fit in the remaining capacity; the caller must roll
    /// to a new segment and retry.
    pub fn append(&mut self, guid: &Guid, bytes: &[u8]) -> Result<Option<u64>> {
        let record_len = RECORD_OVERHEAD
            .checked_add(bytes.len() as u64)
            .ok_or(Error::PayloadTooLarge)?;
        if record_len > self.capacity {
            return Err(Error::PayloadTooLarge);
        }
        let end = self.write_offset + record_len;
        if end > self.capacity {
            return Ok(None);
        }
        let offset = self.write_offset;
        let checksum = crc32fast::hash(bytes);

        let mut cursor = offset as usize;
        self.mmap.range_mut(cursor, 16)?.copy_from_slice(guid.as_bytes());
        cursor += 16;
        self.mmap
            .range_mut(cursor, 4)?
            .copy_from_slice(&(bytes.len() as u32).to_le_bytes());
        cursor += 4;
        self.mmap.range_mut(cursor, bytes.len())?.copy_from_slice(bytes);
        cursor += bytes.len();
        self.mmap
            .range_mut(cursor, 4)?
            .copy_from_slice(&checksum.to_le_bytes());

        self.write_offset = end;
        Ok(Some(offset))
    }

    pub fn write_offset(&self) -> u64 {
        self.write_offset
    }

    pub fn sync(&self) -> Result<()> {
        self.mmap.sync()
    }

    /// Reads one record's payload out of the still-open (current) segment,
    /// verifying its checksum. Used by the store when a read hits the
    /// segment that's still being appended to, so it doesn't need to reopen
    /// the file it's already holding mapped.
    pub fn read_at(&self, offset: u64, len: u32) -> Result<Vec<u8>> {
        let payload_start = offset as usize + 20;
        let payload_end = payload_start + len as usize;
        let data = self.mmap.as_slice();
        let payload = data
            .get(payload_start..payload_end)
            .ok_or(Error::Corrupt("sms segment read out of bounds"))?;
        let checksum_bytes = data
            .get(payload_end..payload_end + 4)
            .ok_or(Error::Corrupt("sms segment read out of bounds"))?;
        let checksum = u32::from_le_bytes(checksum_bytes.try_into().expect("4 bytes"));
        if crc32fast::hash(payload) != checksum {
            return Err(Error::Corrupt("sms segment checksum mismatch"));
        }
        Ok(payload.to_vec())
    }

    /// Scans the already-written prefix of the segment, yielding every
    /// well-formed record. Stops at the first checksum failure or truncated
    /// record, since an unsynced tail record may have been only partially
    /// written before a crash (§7 Corruption).
    pub fn scan(&self) -> Vec<DecodedRecord> {
        scan_bytes(&self.mmap.as_slice()[..self.write_offset as usize])
    }
}

fn scan_bytes(data: &[u8]) -> Vec<DecodedRecord> {
    let mut out = Vec::new();
    let mut offset = 0usize;
    while offset + RECORD_OVERHEAD as usize <= data.len() {
        let mut guid_bytes = [0u8; 16];
        guid_bytes.copy_from_slice(&data[offset..offset + 16]);
        let len = u32::from_le_bytes(data[offset + 16..offset + 20].try_into().expect("4 bytes"));
        let payload_start = offset + 20;
        let payload_end = match payload_start.checked_add(len as usize) {
            Some(end) if end + 4 <= data.len() => end,
            _ => break,
        };
        let checksum = u32::from_le_bytes(
            data[payload_end..payload_end + 4]
                .try_into()
                .expect("4 bytes"),
        );
        let payload = &data[payload_start..payload_end];
        if crc32fast::hash(payload) != checksum {
            break;
        }
        out.push(DecodedRecord {
            guid: Guid(guid_bytes),
            offset: offset as u64,
            len,
        });
        offset = payload_end + 4;
    }
    out
}

/// Reads one record's payload out of a (possibly closed) segment file by
/// reopening it and seeking, rather than keeping every historical segment
/// memory-mapped.
pub fn read_payload_at(dir: &Path, segment_id: u64, offset: u64, len: u32) -> Result<Vec<u8>> {
    let path = segment_path(dir, segment_id);
    let mut file = File::open(path)?;
    file.seek(SeekFrom::Start(offset + 20))?;
    let mut payload = vec![0u8; len as usize];
    file.read_exact(&mut payload)?;
    let mut checksum_buf = [0u8; 4];
    file.read_exact(&mut checksum_buf)?;
    let checksum = u32::from_le_bytes(checksum_buf);
    if crc32fast::hash(&payload) != checksum {
        return Err(Error::Corrupt("sms segment checksum mismatch"));
    }
    Ok(payload)
}

/// Scans a closed segment file from disk (used during full-store recovery).
pub fn scan_segment_file(dir: &Path, id: u64) -> Result<Vec<DecodedRecord>> {
    let path = segment_path(dir, id);
    let mut file = File::open(path)?;
    let mut data = Vec::new();
    file.read_to_end(&mut data)?;
    Ok(scan_bytes(&data))
}

/// Lists segment ids present in `dir`, ascending.
pub fn list_segment_ids(dir: &Path) -> Result<Vec<u64>> {
    let mut ids = Vec::new();
    if !dir.exists() {
        return Ok(ids);
    }
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("rdq") {
            continue;
        }
        if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
            if let Ok(id) = stem.parse::<u64>() {
                ids.push(id);
            }
        }
    }
    ids.sort_unstable();
    Ok(ids)
}
