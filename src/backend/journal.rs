//! Mutation journal for the in-process document store
//!
//! Every committed write is appended here before it becomes visible, so
//! that the store can be rebuilt after a restart. An entry records the
//! full post-image of one document, which makes replay idempotent.
//!
//! Format per entry:
//! - length: u32 (4 bytes, little endian)
//! - data: [u8; length] (JSON encoded `JournalEntry`)
//! - crc: u32 (4 bytes, CRC32 of length + data)

use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::document::Fields;
use super::error::{StoreError, StoreResult};

/// Largest accepted entry
const MAX_ENTRY_LEN: usize = 4 * 1024 * 1024;

/// Sync strategy for journal writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JournalSyncMode {
    /// Fsync after every write
    EveryWrite,
    /// Fsync once enough bytes have accumulated
    #[default]
    Batched,
    /// Flush to the OS only
    None,
}

/// One committed document write
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub path: String,
    pub version: u64,
    pub data: Fields,
}

/// Append-only journal file
pub struct Journal {
    writer: BufWriter<File>,
    path: PathBuf,
    entry_count: u64,
    bytes_since_sync: usize,
    sync_mode: JournalSyncMode,
    sync_threshold: usize,
    /// A damaged entry was found after the intact prefix
    damaged: bool,
}

impl Journal {
    /// Open or create a journal file
    pub fn open(path: impl AsRef<Path>, sync_mode: JournalSyncMode) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)?;

        let mut entry_count = 0u64;
        let mut damaged = false;
        for entry in JournalReader::open(&path)? {
            match entry {
                Ok(_) => entry_count += 1,
                Err(e) => {
                    tracing::warn!("Journal damaged after entry {}: {}", entry_count, e);
                    damaged = true;
                    break;
                }
            }
        }

        Ok(Self {
            writer: BufWriter::new(file),
            path,
            entry_count,
            bytes_since_sync: 0,
            sync_mode,
            sync_threshold: 64 * 1024,
            damaged,
        })
    }

    /// Append one entry
    pub fn append(&mut self, entry: &JournalEntry) -> StoreResult<()> {
        let data = serde_json::to_vec(entry)?;
        if data.len() > MAX_ENTRY_LEN {
            return Err(StoreError::Journal(format!(
                "entry for {} is {} bytes (max {})",
                entry.path,
                data.len(),
                MAX_ENTRY_LEN
            )));
        }

        let len = (data.len() as u32).to_le_bytes();
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&len);
        hasher.update(&data);
        let crc = hasher.finalize();

        self.writer.write_all(&len)?;
        self.writer.write_all(&data)?;
        self.writer.write_all(&crc.to_le_bytes())?;

        self.entry_count += 1;
        self.bytes_since_sync += 8 + data.len();

        self.maybe_sync()
    }

    fn maybe_sync(&mut self) -> StoreResult<()> {
        match self.sync_mode {
            JournalSyncMode::EveryWrite => self.sync()?,
            JournalSyncMode::Batched => {
                self.writer.flush()?;
                if self.bytes_since_sync >= self.sync_threshold {
                    self.sync()?;
                }
            }
            JournalSyncMode::None => self.writer.flush()?,
        }
        Ok(())
    }

    /// Force sync to disk
    pub fn sync(&mut self) -> StoreResult<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        self.bytes_since_sync = 0;
        Ok(())
    }

    /// Read back every intact entry. Replay stops at the first damaged one.
    pub fn recover(&self) -> StoreResult<Vec<JournalEntry>> {
        let mut entries = Vec::new();
        for entry in JournalReader::open(&self.path)? {
            match entry {
                Ok(entry) => entries.push(entry),
                Err(e) => {
                    tracing::warn!(
                        path = %self.path.display(),
                        recovered = entries.len(),
                        "Journal recovery stopped: {}",
                        e
                    );
                    break;
                }
            }
        }
        Ok(entries)
    }

    /// Replace the journal with a compacted set of entries
    pub fn rewrite(&mut self, entries: &[JournalEntry]) -> StoreResult<()> {
        self.sync()?;

        let tmp_path = self.path.with_extension("compact");
        {
            let mut tmp = Journal {
                writer: BufWriter::new(File::create(&tmp_path)?),
                path: tmp_path.clone(),
                entry_count: 0,
                bytes_since_sync: 0,
                sync_mode: JournalSyncMode::None,
                sync_threshold: self.sync_threshold,
                damaged: false,
            };
            for entry in entries {
                tmp.append(entry)?;
            }
            tmp.sync()?;
        }
        std::fs::rename(&tmp_path, &self.path)?;

        self.writer = BufWriter::new(
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)?,
        );
        self.entry_count = entries.len() as u64;
        self.bytes_since_sync = 0;
        self.damaged = false;

        tracing::debug!(entries = entries.len(), "Journal compacted");
        Ok(())
    }

    pub fn entry_count(&self) -> u64 {
        self.entry_count
    }

    /// Entries after the intact prefix are unreadable; appends would be lost
    /// until the journal is rewritten
    pub fn is_damaged(&self) -> bool {
        self.damaged
    }

    pub fn file_size(&self) -> StoreResult<u64> {
        Ok(std::fs::metadata(&self.path)?.len())
    }
}

/// Streaming reader over a journal file
pub struct JournalReader {
    reader: BufReader<File>,
    failed: bool,
}

impl JournalReader {
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let file = File::open(path.as_ref())?;
        Ok(Self {
            reader: BufReader::new(file),
            failed: false,
        })
    }

    fn read_entry(&mut self) -> StoreResult<Option<JournalEntry>> {
        let mut len_buf = [0u8; 4];
        match self.reader.read_exact(&mut len_buf) {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }
        let len = u32::from_le_bytes(len_buf) as usize;

        if len > MAX_ENTRY_LEN {
            return Err(StoreError::Journal(format!("Entry length too large: {}", len)));
        }

        let mut data = vec![0u8; len];
        self.reader.read_exact(&mut data)?;

        let mut crc_buf = [0u8; 4];
        self.reader.read_exact(&mut crc_buf)?;
        let stored_crc = u32::from_le_bytes(crc_buf);

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&len_buf);
        hasher.update(&data);
        let computed_crc = hasher.finalize();

        if stored_crc != computed_crc {
            return Err(StoreError::Corruption(format!(
                "CRC mismatch: stored={}, computed={}",
                stored_crc, computed_crc
            )));
        }

        Ok(Some(serde_json::from_slice(&data)?))
    }
}

impl Iterator for JournalReader {
    type Item = StoreResult<JournalEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.read_entry() {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => None,
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}
