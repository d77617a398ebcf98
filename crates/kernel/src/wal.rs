//! Write-ahead log (§4.6).
//!
//! One writer, one file. Every record is framed as
//! `lsn:u64 | kind:u8 | len:u32 | payload | crc32:u32`, fsynced before the
//! caller is told it is durable. Recovery scans from the start, validates
//! each record's crc32, and stops at the first invalid or partial record —
//! that tail is discarded, both from the in-memory replay and, on the next
//! append, from the file itself (we truncate to the last valid offset).

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{KernelError, KernelResult};

/// Discriminator for what a WAL record represents. The kernel's three stores
/// each own a slice of this space; `Kernel::apply` dispatches on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum EntryType {
    ThreadSpawn = 1,
    ThreadReturn = 2,
    ThreadFail = 3,
    SegmentAppend = 4,
    SegmentFold = 5,
    SegmentUnfold = 6,
    SegmentEvict = 7,
    SegmentRelevance = 8,
    JournalAppend = 9,
    JournalPrune = 10,
}

impl EntryType {
    fn from_u8(b: u8) -> Option<Self> {
        Some(match b {
            1 => EntryType::ThreadSpawn,
            2 => EntryType::ThreadReturn,
            3 => EntryType::ThreadFail,
            4 => EntryType::SegmentAppend,
            5 => EntryType::SegmentFold,
            6 => EntryType::SegmentUnfold,
            7 => EntryType::SegmentEvict,
            8 => EntryType::SegmentRelevance,
            9 => EntryType::JournalAppend,
            10 => EntryType::JournalPrune,
            _ => return None,
        })
    }
}

/// One durable record. `lsn` is assigned by [`Wal::append`] /
/// [`Wal::append_batch`]; callers never choose it themselves.
#[derive(Debug, Clone)]
pub struct WalEntry {
    pub lsn: u64,
    pub kind: EntryType,
    pub payload: Vec<u8>,
}

impl WalEntry {
    /// Build an entry with `lsn` left at 0 — [`Wal::append`] assigns the
    /// real value.
    pub fn new(kind: EntryType, payload: Vec<u8>) -> Self {
        Self { lsn: 0, kind, payload }
    }

    fn checksum(lsn: u64, kind: EntryType, payload: &[u8]) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&lsn.to_be_bytes());
        hasher.update(&[kind as u8]);
        hasher.update(&(payload.len() as u32).to_be_bytes());
        hasher.update(payload);
        hasher.finalize()
    }

    fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(8 + 1 + 4 + self.payload.len() + 4);
        buf.extend_from_slice(&self.lsn.to_be_bytes());
        buf.push(self.kind as u8);
        buf.extend_from_slice(&(self.payload.len() as u32).to_be_bytes());
        buf.extend_from_slice(&self.payload);
        buf.extend_from_slice(&Self::checksum(self.lsn, self.kind, &self.payload).to_be_bytes());
        buf
    }
}

/// The write-ahead log itself: one file, one writer.
pub struct Wal {
    path: PathBuf,
    file: File,
    next_lsn: u64,
}

impl Wal {
    /// Open (creating if absent) and validate the log, truncating any
    /// trailing partial/corrupt record so future appends start clean.
    pub fn open(path: &Path) -> KernelResult<Self> {
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)?;

        let (valid_len, last_lsn) = Self::scan_valid_prefix(&mut file)?;
        file.set_len(valid_len)?;
        file.seek(SeekFrom::End(0))?;

        Ok(Self {
            path: path.to_path_buf(),
            file,
            next_lsn: last_lsn.map(|l| l + 1).unwrap_or(0),
        })
    }

    /// Scan the file from the start, returning the byte length of the
    /// longest valid prefix and the lsn of the last valid record.
    fn scan_valid_prefix(file: &mut File) -> KernelResult<(u64, Option<u64>)> {
        file.seek(SeekFrom::Start(0))?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf)?;

        let mut offset = 0usize;
        let mut last_lsn = None;

        loop {
            const HEADER: usize = 8 + 1 + 4;
            if buf.len() < offset + HEADER {
                break;
            }
            let lsn = u64::from_be_bytes(buf[offset..offset + 8].try_into().unwrap());
            let kind_byte = buf[offset + 8];
            let kind = match EntryType::from_u8(kind_byte) {
                Some(k) => k,
                None => break,
            };
            let len = u32::from_be_bytes(buf[offset + 9..offset + 13].try_into().unwrap()) as usize;
            let record_end = offset + HEADER + len + 4;
            if buf.len() < record_end {
                break;
            }
            let payload = &buf[offset + HEADER..offset + HEADER + len];
            let stored_crc =
                u32::from_be_bytes(buf[record_end - 4..record_end].try_into().unwrap());
            if stored_crc != WalEntry::checksum(lsn, kind, payload) {
                break;
            }
            last_lsn = Some(lsn);
            offset = record_end;
        }

        Ok((offset as u64, last_lsn))
    }

    /// Append one record, fsync, and return the assigned lsn.
    pub fn append(&mut self, entry: &WalEntry) -> KernelResult<u64> {
        let lsns = self.append_batch(std::slice::from_ref(entry))?;
        Ok(lsns[0])
    }

    /// Append a batch atomically from the caller's perspective: all records
    /// are written and fsynced together before this returns. Order within
    /// the batch is preserved; lsn is assigned per record.
    pub fn append_batch(&mut self, entries: &[WalEntry]) -> KernelResult<Vec<u64>> {
        let mut lsns = Vec::with_capacity(entries.len());
        let mut buf = Vec::new();
        for entry in entries {
            let lsn = self.next_lsn;
            self.next_lsn += 1;
            let stamped = WalEntry {
                lsn,
                kind: entry.kind,
                payload: entry.payload.clone(),
            };
            buf.extend_from_slice(&stamped.encode());
            lsns.push(lsn);
        }
        self.file.write_all(&buf)?;
        self.file.sync_all()?;
        Ok(lsns)
    }

    /// Replay every valid record from the start of the file, in lsn order.
    pub fn replay(&self) -> KernelResult<Vec<WalEntry>> {
        self.replay_from(0)
    }

    /// Replay records with `lsn >= from_lsn` (used after loading a
    /// checkpoint, to apply only what the checkpoint doesn't already
    /// reflect).
    pub fn replay_from(&self, from_lsn: u64) -> KernelResult<Vec<WalEntry>> {
        let mut file = File::open(&self.path)?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf)?;

        let mut offset = 0usize;
        let mut entries = Vec::new();
        const HEADER: usize = 8 + 1 + 4;

        loop {
            if buf.len() < offset + HEADER {
                break;
            }
            let lsn = u64::from_be_bytes(buf[offset..offset + 8].try_into().unwrap());
            let kind = match EntryType::from_u8(buf[offset + 8]) {
                Some(k) => k,
                None => break,
            };
            let len = u32::from_be_bytes(buf[offset + 9..offset + 13].try_into().unwrap()) as usize;
            let record_end = offset + HEADER + len + 4;
            if buf.len() < record_end {
                break;
            }
            let payload = buf[offset + HEADER..offset + HEADER + len].to_vec();
            let stored_crc =
                u32::from_be_bytes(buf[record_end - 4..record_end].try_into().unwrap());
            if stored_crc != WalEntry::checksum(lsn, kind, &payload) {
                break;
            }
            if lsn >= from_lsn {
                entries.push(WalEntry { lsn, kind, payload });
            }
            offset = record_end;
        }

        Ok(entries)
    }

    /// Truncate the log to empty — used right after a checkpoint snapshot
    /// has durably captured everything the log held.
    pub fn truncate(&mut self) -> KernelResult<()> {
        self.file.set_len(0)?;
        self.file.seek(SeekFrom::Start(0))?;
        Ok(())
    }

    pub fn next_lsn(&self) -> u64 {
        self.next_lsn
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn append_and_replay_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.wal");
        let mut wal = Wal::open(&path).unwrap();

        wal.append(&WalEntry::new(EntryType::ThreadSpawn, b"root".to_vec()))
            .unwrap();
        wal.append(&WalEntry::new(EntryType::JournalAppend, b"msg-1".to_vec()))
            .unwrap();

        let entries = wal.replay().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].lsn, 0);
        assert_eq!(entries[1].lsn, 1);
        assert_eq!(entries[1].payload, b"msg-1");
    }

    #[test]
    fn lsn_is_monotonic_across_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.wal");
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&WalEntry::new(EntryType::ThreadSpawn, b"a".to_vec()))
                .unwrap();
            wal.append(&WalEntry::new(EntryType::ThreadSpawn, b"b".to_vec()))
                .unwrap();
        }
        let mut wal = Wal::open(&path).unwrap();
        assert_eq!(wal.next_lsn(), 2);
        let lsn = wal
            .append(&WalEntry::new(EntryType::ThreadSpawn, b"c".to_vec()))
            .unwrap();
        assert_eq!(lsn, 2);
    }

    #[test]
    fn corrupted_trailing_record_is_discarded() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.wal");
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&WalEntry::new(EntryType::ThreadSpawn, b"good".to_vec()))
                .unwrap();
        }
        // Simulate a crash mid-write: append garbage bytes that look like a
        // record header but have a bad checksum / truncated payload.
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&[0, 0, 0, 0, 0, 0, 0, 1]).unwrap(); // lsn=1
            f.write_all(&[EntryType::ThreadSpawn as u8]).unwrap();
            f.write_all(&[0, 0, 0, 100]).unwrap(); // claims 100-byte payload
            f.write_all(b"short").unwrap(); // but only wrote 5 bytes
            f.sync_all().unwrap();
        }

        let wal = Wal::open(&path).unwrap();
        let entries = wal.replay().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].payload, b"good");
        assert_eq!(wal.next_lsn(), 1);
    }

    #[test]
    fn truncate_clears_log() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.wal");
        let mut wal = Wal::open(&path).unwrap();
        wal.append(&WalEntry::new(EntryType::ThreadSpawn, b"a".to_vec()))
            .unwrap();
        wal.truncate().unwrap();
        assert!(wal.replay().unwrap().is_empty());
    }

    #[test]
    fn batch_append_assigns_sequential_lsns() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.wal");
        let mut wal = Wal::open(&path).unwrap();
        let batch = vec![
            WalEntry::new(EntryType::ThreadSpawn, b"1".to_vec()),
            WalEntry::new(EntryType::SegmentAppend, b"2".to_vec()),
            WalEntry::new(EntryType::JournalAppend, b"3".to_vec()),
        ];
        let lsns = wal.append_batch(&batch).unwrap();
        assert_eq!(lsns, vec![0, 1, 2]);
    }

    #[test]
    fn replay_idempotence() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.wal");
        let mut wal = Wal::open(&path).unwrap();
        wal.append(&WalEntry::new(EntryType::ThreadSpawn, b"a".to_vec()))
            .unwrap();

        let first = wal.replay().unwrap();
        let second = wal.replay().unwrap();
        assert_eq!(first.len(), second.len());
        assert_eq!(first[0].payload, second[0].payload);
    }
}
