//! The hierarchical thread table (§4.2). Every thread is keyed by its
//! dot-separated thread_id; a child's key is always `{parent}.{segment}`, so
//! ancestry is recoverable from the string alone without extra bookkeeping.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{KernelError, KernelResult};
use crate::wal::{EntryType, WalEntry};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ThreadStatus {
    Running,
    Returned,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadRecord {
    pub thread_id: String,
    pub parent: Option<String>,
    pub profile: String,
    pub status: ThreadStatus,
    /// Iterations consumed so far against the thread's cap (§6).
    pub iterations: u32,
}

#[derive(Debug, Serialize, Deserialize)]
struct SpawnRecord {
    thread_id: String,
    parent: Option<String>,
    profile: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct ReturnRecord {
    thread_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct FailRecord {
    thread_id: String,
}

/// In-memory arena of threads, reconstructed from the WAL on open and kept
/// in lockstep with it thereafter: every mutation here is always preceded by
/// a durable WAL record (the kernel enforces the ordering, not this type).
#[derive(Debug, Default)]
pub struct ThreadTable {
    threads: BTreeMap<String, ThreadRecord>,
}

impl ThreadTable {
    pub fn new() -> Self {
        Self {
            threads: BTreeMap::new(),
        }
    }

    pub fn get(&self, thread_id: &str) -> Option<&ThreadRecord> {
        self.threads.get(thread_id)
    }

    pub fn contains(&self, thread_id: &str) -> bool {
        self.threads.contains_key(thread_id)
    }

    pub fn all(&self) -> impl Iterator<Item = &ThreadRecord> {
        self.threads.values()
    }

    /// Replace the table's contents wholesale, used when loading a
    /// checkpoint. `next_seq`-style counters have no equivalent here since
    /// thread ids are caller-supplied, not generated.
    pub(crate) fn restore(&mut self, records: impl Iterator<Item = ThreadRecord>) {
        self.threads = records.map(|r| (r.thread_id.clone(), r)).collect();
    }

    /// Root thread has no parent and carries whatever profile the organism
    /// configuration assigns as the root profile.
    pub fn spawn_root(&mut self, thread_id: &str, profile: &str) -> WalEntry {
        let record = ThreadRecord {
            thread_id: thread_id.to_string(),
            parent: None,
            profile: profile.to_string(),
            status: ThreadStatus::Running,
            iterations: 0,
        };
        self.threads.insert(thread_id.to_string(), record);
        let payload = serde_json::to_vec(&SpawnRecord {
            thread_id: thread_id.to_string(),
            parent: None,
            profile: profile.to_string(),
        })
        .expect("SpawnRecord always serializes");
        WalEntry::new(EntryType::ThreadSpawn, payload)
    }

    /// Spawn a child under `parent`, enforcing profile monotonicity
    /// (child profile must be a subset of the parent's, per §4.2's
    /// invariant). `is_subset` is supplied by the caller (conduit-security
    /// owns the subset relation between named profiles).
    pub fn spawn_child(
        &mut self,
        parent: &str,
        child_segment: &str,
        child_profile: &str,
        is_subset: impl FnOnce(&str, &str) -> bool,
    ) -> KernelResult<WalEntry> {
        let parent_record = self
            .threads
            .get(parent)
            .ok_or_else(|| KernelError::UnknownThread(parent.to_string()))?;

        if !is_subset(child_profile, &parent_record.profile) {
            return Err(KernelError::PrivilegeEscalation {
                parent: parent.to_string(),
            });
        }

        let thread_id = format!("{parent}.{child_segment}");
        let record = ThreadRecord {
            thread_id: thread_id.clone(),
            parent: Some(parent.to_string()),
            profile: child_profile.to_string(),
            status: ThreadStatus::Running,
            iterations: 0,
        };
        self.threads.insert(thread_id.clone(), record);

        let payload = serde_json::to_vec(&SpawnRecord {
            thread_id,
            parent: Some(parent.to_string()),
            profile: child_profile.to_string(),
        })
        .expect("SpawnRecord always serializes");
        Ok(WalEntry::new(EntryType::ThreadSpawn, payload))
    }

    pub fn mark_returned(&mut self, thread_id: &str) -> KernelResult<WalEntry> {
        let record = self
            .threads
            .get_mut(thread_id)
            .ok_or_else(|| KernelError::UnknownThread(thread_id.to_string()))?;
        record.status = ThreadStatus::Returned;
        let payload = serde_json::to_vec(&ReturnRecord {
            thread_id: thread_id.to_string(),
        })
        .expect("ReturnRecord always serializes");
        Ok(WalEntry::new(EntryType::ThreadReturn, payload))
    }

    pub fn mark_failed(&mut self, thread_id: &str) -> KernelResult<WalEntry> {
        let record = self
            .threads
            .get_mut(thread_id)
            .ok_or_else(|| KernelError::UnknownThread(thread_id.to_string()))?;
        record.status = ThreadStatus::Failed;
        let payload = serde_json::to_vec(&FailRecord {
            thread_id: thread_id.to_string(),
        })
        .expect("FailRecord always serializes");
        Ok(WalEntry::new(EntryType::ThreadFail, payload))
    }

    pub fn increment_iterations(&mut self, thread_id: &str) -> KernelResult<u32> {
        let record = self
            .threads
            .get_mut(thread_id)
            .ok_or_else(|| KernelError::UnknownThread(thread_id.to_string()))?;
        record.iterations += 1;
        Ok(record.iterations)
    }

    /// Ancestors of `thread_id`, nearest first, not including itself.
    pub fn ancestors(&self, thread_id: &str) -> Vec<&ThreadRecord> {
        let mut chain = Vec::new();
        let mut current = self.threads.get(thread_id).and_then(|r| r.parent.clone());
        while let Some(id) = current {
            match self.threads.get(&id) {
                Some(record) => {
                    chain.push(record);
                    current = record.parent.clone();
                }
                None => break,
            }
        }
        chain
    }

    /// Direct children of `thread_id`.
    pub fn children(&self, thread_id: &str) -> Vec<&ThreadRecord> {
        self.threads
            .values()
            .filter(|r| r.parent.as_deref() == Some(thread_id))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.threads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.threads.is_empty()
    }

    /// Replay one WAL entry previously produced by this table's own
    /// mutators. Idempotent: replaying the same entry twice converges to the
    /// same state (inserts overwrite, status flips are absolute).
    pub fn apply_wal_entry(&mut self, entry: &WalEntry) -> KernelResult<()> {
        match entry.kind {
            EntryType::ThreadSpawn => {
                let rec: SpawnRecord = serde_json::from_slice(&entry.payload)?;
                self.threads.insert(
                    rec.thread_id.clone(),
                    ThreadRecord {
                        thread_id: rec.thread_id,
                        parent: rec.parent,
                        profile: rec.profile,
                        status: ThreadStatus::Running,
                        iterations: 0,
                    },
                );
                Ok(())
            }
            EntryType::ThreadReturn => {
                let rec: ReturnRecord = serde_json::from_slice(&entry.payload)?;
                if let Some(record) = self.threads.get_mut(&rec.thread_id) {
                    record.status = ThreadStatus::Returned;
                }
                Ok(())
            }
            EntryType::ThreadFail => {
                let rec: FailRecord = serde_json::from_slice(&entry.payload)?;
                if let Some(record) = self.threads.get_mut(&rec.thread_id) {
                    record.status = ThreadStatus::Failed;
                }
                Ok(())
            }
            other => Err(KernelError::CorruptedWal {
                lsn: entry.lsn,
                reason: format!("thread table cannot apply entry kind {other:?}"),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spawn_root_then_child() {
        let mut table = ThreadTable::new();
        table.spawn_root("root", "default");
        table
            .spawn_child("root", "task-1", "default", |_, _| true)
            .unwrap();
        assert!(table.contains("root.task-1"));
        assert_eq!(table.get("root.task-1").unwrap().parent.as_deref(), Some("root"));
    }

    #[test]
    fn privilege_escalation_is_rejected() {
        let mut table = ThreadTable::new();
        table.spawn_root("root", "restricted");
        let err = table
            .spawn_child("root", "task-1", "admin", |_, _| false)
            .unwrap_err();
        assert!(matches!(err, KernelError::PrivilegeEscalation { .. }));
        assert!(!table.contains("root.task-1"));
    }

    #[test]
    fn ancestors_walk_to_root() {
        let mut table = ThreadTable::new();
        table.spawn_root("root", "default");
        table
            .spawn_child("root", "a", "default", |_, _| true)
            .unwrap();
        table
            .spawn_child("root.a", "b", "default", |_, _| true)
            .unwrap();

        let chain = table.ancestors("root.a.b");
        assert_eq!(chain.len(), 2);
        assert_eq!(chain[0].thread_id, "root.a");
        assert_eq!(chain[1].thread_id, "root");
    }

    #[test]
    fn unknown_parent_is_rejected() {
        let mut table = ThreadTable::new();
        let err = table
            .spawn_child("ghost", "a", "default", |_, _| true)
            .unwrap_err();
        assert!(matches!(err, KernelError::UnknownThread(_)));
    }

    #[test]
    fn apply_wal_entry_is_idempotent() {
        let mut table = ThreadTable::new();
        let entry = table.spawn_root("root", "default");
        let mut replay_table = ThreadTable::new();
        replay_table.apply_wal_entry(&entry).unwrap();
        replay_table.apply_wal_entry(&entry).unwrap();
        assert_eq!(replay_table.len(), 1);
        assert!(replay_table.contains("root"));
    }

    #[test]
    fn children_lists_direct_descendants_only() {
        let mut table = ThreadTable::new();
        table.spawn_root("root", "default");
        table.spawn_child("root", "a", "default", |_, _| true).unwrap();
        table.spawn_child("root", "b", "default", |_, _| true).unwrap();
        table
            .spawn_child("root.a", "c", "default", |_, _| true)
            .unwrap();

        let kids = table.children("root");
        assert_eq!(kids.len(), 2);
    }
}
