//! The append-only dispatch journal (§4.4). Every envelope that crosses the
//! dispatch boundary gets a journal entry; how long that entry survives is
//! governed by the sender's profile's retention policy, not by the journal
//! itself — the journal only records and prunes on command.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{KernelError, KernelResult};
use crate::wal::{EntryType, WalEntry};

/// How long a journal entry is kept once written, decided by the sending
/// thread's profile (§4.4, §5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RetentionPolicy {
    RetainForever,
    PruneOnDelivery,
    RetainDays(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeliveryStatus {
    Undelivered,
    Delivered,
}

/// §3's Journal Entry `direction` field: whether the entry records a
/// message leaving its sender (`Outbound`) or arriving for a handler to
/// consume (`Inbound`). `prune_on_delivery` matches an `Outbound` entry
/// against a later `Inbound` entry carrying the same `payload_hash` on the
/// same target — never by caller-supplied identity alone (§4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Inbound,
    Outbound,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalEntry {
    /// Monotonic, kernel-assigned total order over every appended event
    /// (§5, §8 property 5) — never the caller-supplied `message_id`, which
    /// carries no ordering guarantee of its own.
    pub id: u64,
    pub message_id: String,
    pub from: String,
    pub to: String,
    pub direction: Direction,
    pub payload_tag: String,
    /// Integrity digest of the dispatched bytes (§3). Never the bytes
    /// themselves — the full payload lives in the context store.
    pub payload_hash: u32,
    pub retention: RetentionPolicy,
    pub status: DeliveryStatus,
    /// Unix-epoch seconds, supplied by the caller (the kernel never reads
    /// the clock itself, keeping replay deterministic).
    pub written_at_epoch_secs: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct AppendRecord {
    id: u64,
    message_id: String,
    from: String,
    to: String,
    direction: Direction,
    payload_tag: String,
    payload_hash: u32,
    retention: RetentionPolicy,
    written_at_epoch_secs: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct PruneRecord {
    ids: Vec<u64>,
}

/// In-memory journal, reconstructed from WAL replay.
#[derive(Debug, Default)]
pub struct Journal {
    entries: BTreeMap<u64, JournalEntry>,
    next_id: u64,
}

impl Journal {
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
            next_id: 0,
        }
    }

    pub fn get(&self, message_id: &str) -> Option<&JournalEntry> {
        self.entries.values().find(|e| e.message_id == message_id)
    }

    pub fn all(&self) -> impl Iterator<Item = &JournalEntry> {
        self.entries.values()
    }

    pub(crate) fn restore(&mut self, entries: impl Iterator<Item = JournalEntry>) {
        self.entries = entries.map(|e| (e.id, e)).collect();
        self.next_id = self.entries.keys().next_back().map(|id| id + 1).unwrap_or(0);
    }

    pub fn count(&self) -> usize {
        self.entries.len()
    }

    fn next_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn insert(&mut self, entry: JournalEntry) -> WalEntry {
        let record = AppendRecord {
            id: entry.id,
            message_id: entry.message_id.clone(),
            from: entry.from.clone(),
            to: entry.to.clone(),
            direction: entry.direction,
            payload_tag: entry.payload_tag.clone(),
            payload_hash: entry.payload_hash,
            retention: entry.retention,
            written_at_epoch_secs: entry.written_at_epoch_secs,
        };
        self.entries.insert(entry.id, entry);
        let payload = serde_json::to_vec(&record).expect("AppendRecord always serializes");
        WalEntry::new(EntryType::JournalAppend, payload)
    }

    /// Record an `Outbound` entry: `from` has dispatched `payload` to `to`.
    /// This is the journal's half of §4.1 stage 4 — one entry per handler
    /// dispatch, carrying the dispatched bytes' integrity digest rather
    /// than the bytes themselves.
    pub fn append(
        &mut self,
        message_id: &str,
        from: &str,
        to: &str,
        payload_tag: &str,
        payload: &[u8],
        retention: RetentionPolicy,
        written_at_epoch_secs: u64,
    ) -> WalEntry {
        let id = self.next_id();
        self.insert(JournalEntry {
            id,
            message_id: message_id.to_string(),
            from: from.to_string(),
            to: to.to_string(),
            direction: Direction::Outbound,
            payload_tag: payload_tag.to_string(),
            payload_hash: crc32fast::hash(payload),
            retention,
            status: DeliveryStatus::Undelivered,
            written_at_epoch_secs,
        })
    }

    /// Record that `handler` has consumed `payload` — an `Inbound` entry —
    /// and, for any still-`Undelivered` `Outbound` entry addressed to
    /// `handler` whose `payload_hash` matches, mark it delivered and (for
    /// `PruneOnDelivery` entries) prune it. Per §9's Open Question 2,
    /// Broadcast outputs are recorded as one `Outbound` entry per target,
    /// so each target's own matching `Inbound` entry prunes independently —
    /// the conservative "every target delivered" reading falls out of that
    /// per-target granularity.
    ///
    /// A same-`message_id` `Outbound` entry whose stored `payload_hash`
    /// disagrees with the freshly computed hash of `payload` is a
    /// corruption event, not a recoverable mismatch (§4.5): the bytes that
    /// reached the handler are not the bytes that were dispatched under
    /// that message id.
    pub fn mark_delivered(
        &mut self,
        message_id: &str,
        handler: &str,
        payload_tag: &str,
        payload: &[u8],
        written_at_epoch_secs: u64,
    ) -> KernelResult<(WalEntry, Option<WalEntry>)> {
        let hash = crc32fast::hash(payload);

        if let Some(mismatched) = self
            .entries
            .values()
            .find(|e| e.direction == Direction::Outbound && e.message_id == message_id && e.payload_hash != hash)
        {
            return Err(KernelError::CorruptedWal {
                lsn: mismatched.id,
                reason: format!(
                    "payload_hash mismatch for message '{message_id}': recorded {:#010x}, observed {:#010x}",
                    mismatched.payload_hash, hash
                ),
            });
        }

        let inbound_id = self.next_id();
        let inbound = self.insert(JournalEntry {
            id: inbound_id,
            message_id: message_id.to_string(),
            from: handler.to_string(),
            to: handler.to_string(),
            direction: Direction::Inbound,
            payload_tag: payload_tag.to_string(),
            payload_hash: hash,
            retention: RetentionPolicy::RetainForever,
            status: DeliveryStatus::Delivered,
            written_at_epoch_secs,
        });

        let matched: Vec<u64> = self
            .entries
            .values()
            .filter(|e| {
                e.id != inbound_id
                    && e.direction == Direction::Outbound
                    && e.to == handler
                    && e.payload_hash == hash
                    && e.status == DeliveryStatus::Undelivered
            })
            .map(|e| e.id)
            .collect();

        for id in &matched {
            if let Some(entry) = self.entries.get_mut(id) {
                entry.status = DeliveryStatus::Delivered;
            }
        }

        let prunable: Vec<u64> = matched
            .into_iter()
            .filter(|id| matches!(self.entries.get(id).map(|e| e.retention), Some(RetentionPolicy::PruneOnDelivery)))
            .collect();

        if prunable.is_empty() {
            return Ok((inbound, None));
        }

        for id in &prunable {
            self.entries.remove(id);
        }
        let payload = serde_json::to_vec(&PruneRecord { ids: prunable }).expect("PruneRecord always serializes");
        Ok((inbound, Some(WalEntry::new(EntryType::JournalPrune, payload))))
    }

    /// Prune every entry with `RetainDays(n)` whose age exceeds `n` days as
    /// of `now_epoch_secs`. Returns the prune WAL entry if anything changed.
    pub fn prune_expired(&mut self, now_epoch_secs: u64) -> Option<WalEntry> {
        const SECS_PER_DAY: u64 = 86_400;
        let expired: Vec<u64> = self
            .entries
            .values()
            .filter(|e| match e.retention {
                RetentionPolicy::RetainDays(days) => {
                    now_epoch_secs.saturating_sub(e.written_at_epoch_secs) > days as u64 * SECS_PER_DAY
                }
                _ => false,
            })
            .map(|e| e.id)
            .collect();

        if expired.is_empty() {
            return None;
        }
        for id in &expired {
            self.entries.remove(id);
        }
        let payload = serde_json::to_vec(&PruneRecord { ids: expired }).expect("PruneRecord always serializes");
        Some(WalEntry::new(EntryType::JournalPrune, payload))
    }

    pub fn undelivered(&self) -> Vec<&JournalEntry> {
        self.entries
            .values()
            .filter(|e| e.status == DeliveryStatus::Undelivered)
            .collect()
    }

    pub fn apply_wal_entry(&mut self, entry: &WalEntry) -> KernelResult<()> {
        match entry.kind {
            EntryType::JournalAppend => {
                let rec: AppendRecord = serde_json::from_slice(&entry.payload)?;
                self.entries.insert(
                    rec.id,
                    JournalEntry {
                        id: rec.id,
                        message_id: rec.message_id,
                        from: rec.from,
                        to: rec.to,
                        direction: rec.direction,
                        payload_tag: rec.payload_tag,
                        payload_hash: rec.payload_hash,
                        retention: rec.retention,
                        status: DeliveryStatus::Undelivered,
                        written_at_epoch_secs: rec.written_at_epoch_secs,
                    },
                );
                self.next_id = self.next_id.max(rec.id + 1);
                Ok(())
            }
            EntryType::JournalPrune => {
                let rec: PruneRecord = serde_json::from_slice(&entry.payload)?;
                for id in rec.ids {
                    self.entries.remove(&id);
                }
                Ok(())
            }
            other => Err(KernelError::CorruptedWal {
                lsn: entry.lsn,
                reason: format!("journal cannot apply entry kind {other:?}"),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_then_mark_delivered_retain_forever_keeps_entry() {
        let mut journal = Journal::new();
        journal.append("m1", "root", "root.a", "Task", b"payload", RetentionPolicy::RetainForever, 1000);
        let (_, prune) = journal.mark_delivered("m1", "root.a", "Task", b"payload", 1001).unwrap();
        assert!(prune.is_none());
        let outbound = journal
            .all()
            .find(|e| e.message_id == "m1" && e.direction == Direction::Outbound)
            .unwrap();
        assert_eq!(outbound.status, DeliveryStatus::Delivered);
    }

    #[test]
    fn prune_on_delivery_removes_outbound_entry_on_matching_inbound() {
        let mut journal = Journal::new();
        journal.append("m1", "root", "root.a", "Task", b"payload", RetentionPolicy::PruneOnDelivery, 1000);
        let (_, prune) = journal.mark_delivered("m1", "root.a", "Task", b"payload", 1001).unwrap();
        assert!(prune.is_some());
        assert!(journal
            .all()
            .all(|e| !(e.message_id == "m1" && e.direction == Direction::Outbound)));
    }

    #[test]
    fn mismatched_payload_on_delivery_is_a_corruption_event() {
        let mut journal = Journal::new();
        journal.append("m1", "root", "root.a", "Task", b"original", RetentionPolicy::PruneOnDelivery, 1000);
        let err = journal
            .mark_delivered("m1", "root.a", "Task", b"tampered", 1001)
            .unwrap_err();
        assert!(matches!(err, KernelError::CorruptedWal { .. }));
    }

    #[test]
    fn each_append_gets_a_monotonic_total_order_id() {
        let mut journal = Journal::new();
        journal.append("m1", "root", "root.a", "Task", b"a", RetentionPolicy::RetainForever, 0);
        journal.append("m2", "root", "root.b", "Task", b"b", RetentionPolicy::RetainForever, 0);
        let ids: Vec<u64> = journal.all().map(|e| e.id).collect();
        assert_eq!(ids, vec![0, 1]);
    }

    #[test]
    fn retain_days_expires_after_window() {
        let mut journal = Journal::new();
        journal.append("m1", "root", "root.a", "Task", b"x", RetentionPolicy::RetainDays(1), 0);
        assert!(journal.prune_expired(3600).is_none()); // 1 hour, not expired
        let prune = journal.prune_expired(86_400 * 2);
        assert!(prune.is_some());
        assert!(journal.get("m1").is_none());
    }

    #[test]
    fn apply_wal_entry_is_append_only_until_pruned() {
        let mut journal = Journal::new();
        let append = journal.append("m1", "root", "root.a", "Task", b"x", RetentionPolicy::RetainForever, 0);
        let mut replay = Journal::new();
        replay.apply_wal_entry(&append).unwrap();
        assert_eq!(replay.count(), 1);
        assert_eq!(replay.get("m1").unwrap().direction, Direction::Outbound);
    }

    #[test]
    fn replaying_append_advances_next_id_past_the_replayed_record() {
        let mut journal = Journal::new();
        let append = journal.append("m1", "root", "root.a", "Task", b"x", RetentionPolicy::RetainForever, 0);

        let mut replay = Journal::new();
        replay.apply_wal_entry(&append).unwrap();
        let second = replay.append("m2", "root", "root.b", "Task", b"y", RetentionPolicy::RetainForever, 0);
        assert_eq!(replay.get("m2").unwrap().id, 1);
        let _ = second;
    }

    #[test]
    fn undelivered_lists_only_pending() {
        let mut journal = Journal::new();
        journal.append("m1", "root", "root.a", "Task", b"x", RetentionPolicy::RetainForever, 0);
        journal.append("m2", "root", "root.b", "Task", b"y", RetentionPolicy::RetainForever, 0);
        journal.mark_delivered("m1", "root.a", "Task", b"x", 0).unwrap();
        let pending = journal.undelivered();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].message_id, "m2");
    }
}
