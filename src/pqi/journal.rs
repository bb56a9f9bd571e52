//! The per-queue journal (§4.2): an append-only log of PUBLISH/DELIVER/ACK
//! records, flushed periodically into segment files. Grounded on the same
//! append-and-checksum idiom as [`crate::store::segment`], but the record
//! shape here is fixed-width rather than length-prefixed.

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use crate::message::Guid;
use crate::Result;

pub const JOURNAL_FILE: &str = "journal.pqj";

/// guid(16) + seq_id(8) + tag(1) + persistent(1) + checksum(4).
const RECORD_LEN: usize = 16 + 8 + 1 + 1 + 4;

const TAG_PUBLISH: u8 = 1;
const TAG_DELIVER: u8 = 2;
const TAG_ACK: u8 = 3;

#[derive(Clone, Copy, Debug)]
pub enum JournalRecord {
    Publish {
        seq_id: u64,
        guid: Guid,
        is_persistent: bool,
    },
    Deliver {
        seq_id: u64,
    },
    Ack {
        seq_id: u64,
    },
}

impl JournalRecord {
    fn encode(&self, buf: &mut [u8; RECORD_LEN]) {
        let (tag, seq_id, guid, persistent) = match self {
            JournalRecord::Publish {
                seq_id,
                guid,
                is_persistent,
            } => (TAG_PUBLISH, *seq_id, *guid, *is_persistent),
            JournalRecord::Deliver { seq_id } => (TAG_DELIVER, *seq_id, Guid([0; 16]), false),
            JournalRecord::Ack { seq_id } => (TAG_ACK, *seq_id, Guid([0; 16]), false),
        };
        buf[0..16].copy_from_slice(guid.as_bytes());
        buf[16..24].copy_from_slice(&seq_id.to_le_bytes());
        buf[24] = tag;
        buf[25] = persistent as u8;
        let checksum = crc32fast::hash(&buf[0..26]);
        buf[26..30].copy_from_slice(&checksum.to_le_bytes());
    }

    fn decode(buf: &[u8; RECORD_LEN]) -> Option<Self> {
        let checksum = u32::from_le_bytes(buf[26..30].try_into().expect("4 bytes"));
        if crc32fast::hash(&buf[0..26]) != checksum {
            return None;
        }
        let mut guid_bytes = [0u8; 16];
        guid_bytes.copy_from_slice(&buf[0..16]);
        let guid = Guid(guid_bytes);
        let seq_id = u64::from_le_bytes(buf[16..24].try_into().expect("8 bytes"));
        let persistent = buf[25] != 0;
        match buf[24] {
            TAG_PUBLISH => Some(JournalRecord::Publish {
                seq_id,
                guid,
                is_persistent: persistent,
            }),
            TAG_DELIVER => Some(JournalRecord::Deliver { seq_id }),
            TAG_ACK => Some(JournalRecord::Ack { seq_id }),
            _ => None,
        }
    }
}

pub struct Journal {
    path: PathBuf,
    file: File,
}

impl Journal {
    pub fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(JOURNAL_FILE);
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)?;
        Ok(Self { path, file })
    }

    pub fn append(&mut self, record: &JournalRecord) -> Result<()> {
        let mut buf = [0u8; RECORD_LEN];
        record.encode(&mut buf);
        self.file.write_all(&buf)?;
        Ok(())
    }

    pub fn sync(&self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }

    /// Reads every well-formed record currently in the journal file, in
    /// order. A truncated or corrupt trailing record stops the scan, since
    /// it indicates a torn write mid-crash (§7 Corruption).
    pub fn read_all(dir: &Path) -> Result<Vec<JournalRecord>> {
        let path = dir.join(JOURNAL_FILE);
        let mut file = match File::open(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let mut data = Vec::new();
        file.read_to_end(&mut data)?;
        let mut out = Vec::new();
        for chunk in data.chunks_exact(RECORD_LEN) {
            let buf: [u8; RECORD_LEN] = chunk.try_into().expect("exact chunk");
            match JournalRecord::decode(&buf) {
                Some(record) => out.push(record),
                None => break,
            }
        }
        Ok(out)
    }

    /// Truncates the journal to empty after its contents have been folded
    /// into segment files (§4.2 flush).
    pub fn reset(&mut self) -> Result<()> {
        self.file.set_len(0)?;
        use std::io::Seek;
        self.file.seek(std::io::SeekFrom::Start(0))?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
