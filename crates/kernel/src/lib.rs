//! The durable kernel (§4): a single-writer, WAL-backed composition of the
//! thread table, context store, and dispatch journal. Every cross-store
//! mutation the engine performs goes through one of the `Kernel` methods
//! here, so that the WAL batch backing it is always written and fsynced
//! before the in-memory state changes are visible to callers.

mod checkpoint;
pub mod context_store;
pub mod error;
pub mod journal;
pub mod thread_table;
pub mod wal;

use std::path::{Path, PathBuf};

pub use context_store::{ContextInventory, ContextStore, Segment, SegmentMeta, SegmentStatus};
pub use error::{KernelError, KernelResult};
pub use journal::{DeliveryStatus, Direction, Journal, JournalEntry, RetentionPolicy};
pub use thread_table::{ThreadRecord, ThreadStatus, ThreadTable};
pub use wal::{EntryType, Wal, WalEntry};

use checkpoint::Checkpoint;

/// The root thread's fixed identifier (§4.2, §GLOSSARY).
pub const ROOT_THREAD_ID: &str = "root";

/// Composition of the three stores plus the WAL that backs them, open
/// against one data directory.
pub struct Kernel {
    wal: Wal,
    threads: ThreadTable,
    contexts: ContextStore,
    journal: Journal,
    data_dir: PathBuf,
}

impl Kernel {
    /// Open the kernel rooted at `data_dir`, loading the last checkpoint (if
    /// any) and replaying WAL records written since that checkpoint's lsn.
    /// If no checkpoint exists, replays the entire log from lsn 0.
    pub fn open(data_dir: &Path) -> KernelResult<Self> {
        std::fs::create_dir_all(data_dir)?;
        let wal_path = data_dir.join("kernel.wal");
        let wal = Wal::open(&wal_path)?;

        let mut threads = ThreadTable::new();
        let mut contexts = ContextStore::new();
        let mut journal = Journal::new();

        let checkpoint_path = data_dir.join("kernel.checkpoint");
        let from_lsn = if let Some(checkpoint) = Checkpoint::load(&checkpoint_path)? {
            checkpoint.restore_into(&mut threads, &mut contexts, &mut journal);
            checkpoint.next_lsn
        } else {
            0
        };

        for entry in wal.replay_from(from_lsn)? {
            Self::apply(&mut threads, &mut contexts, &mut journal, &entry)?;
        }

        Ok(Self {
            wal,
            threads,
            contexts,
            journal,
            data_dir: data_dir.to_path_buf(),
        })
    }

    fn apply(
        threads: &mut ThreadTable,
        contexts: &mut ContextStore,
        journal: &mut Journal,
        entry: &WalEntry,
    ) -> KernelResult<()> {
        use EntryType::*;
        match entry.kind {
            ThreadSpawn | ThreadReturn | ThreadFail => threads.apply_wal_entry(entry),
            SegmentAppend | SegmentFold | SegmentUnfold | SegmentEvict | SegmentRelevance => {
                contexts.apply_wal_entry(entry)
            }
            JournalAppend | JournalPrune => journal.apply_wal_entry(entry),
        }
    }

    /// Create the root thread if the data directory is freshly initialized.
    /// A no-op if the root thread already exists (idempotent across
    /// restarts of a fresh-looking but already-initialized directory).
    pub fn initialize_root(&mut self, root_profile: &str) -> KernelResult<()> {
        if self.threads.contains(ROOT_THREAD_ID) {
            return Ok(());
        }
        let entry = self.threads.spawn_root(ROOT_THREAD_ID, root_profile);
        self.wal.append(&entry)?;
        Ok(())
    }

    /// Spawn a child thread under `parent`, appending both the spawn record
    /// and (optionally, via `seed_segment`) an initial context segment in
    /// one atomic WAL batch.
    pub fn spawn_thread(
        &mut self,
        parent: &str,
        child_segment: &str,
        child_profile: &str,
        is_subset: impl FnOnce(&str, &str) -> bool,
        seed_segment: Option<(&str, &str)>,
    ) -> KernelResult<String> {
        let spawn_entry = self
            .threads
            .spawn_child(parent, child_segment, child_profile, is_subset)?;
        let thread_id = format!("{parent}.{child_segment}");

        let mut batch = vec![spawn_entry];
        if let Some((segment_id, content)) = seed_segment {
            batch.push(self.contexts.append(segment_id, &thread_id, content, 1.0));
        }
        self.wal.append_batch(&batch)?;
        Ok(thread_id)
    }

    pub fn mark_thread_returned(&mut self, thread_id: &str) -> KernelResult<()> {
        let entry = self.threads.mark_returned(thread_id)?;
        self.wal.append(&entry)?;
        Ok(())
    }

    pub fn mark_thread_failed(&mut self, thread_id: &str) -> KernelResult<()> {
        let entry = self.threads.mark_failed(thread_id)?;
        self.wal.append(&entry)?;
        Ok(())
    }

    pub fn increment_iterations(&mut self, thread_id: &str) -> KernelResult<u32> {
        self.threads.increment_iterations(thread_id)
    }

    /// Record a dispatched envelope in the journal (an `Outbound` entry —
    /// §3's `direction`, with `payload_hash` computed from `payload`) and,
    /// in the same atomic WAL batch, append the payload as a context
    /// segment on the destination thread. This is the kernel half of stage
    /// 4 (§4.1).
    pub fn dispatch_message(
        &mut self,
        message_id: &str,
        from: &str,
        to: &str,
        payload_tag: &str,
        payload: &[u8],
        retention: RetentionPolicy,
        written_at_epoch_secs: u64,
    ) -> KernelResult<()> {
        let journal_entry = self.journal.append(
            message_id,
            from,
            to,
            payload_tag,
            payload,
            retention,
            written_at_epoch_secs,
        );
        let segment_entry = self.contexts.append(
            &format!("{message_id}:recv"),
            to,
            &String::from_utf8_lossy(payload),
            1.0,
        );
        self.wal.append_batch(&[journal_entry, segment_entry])?;
        Ok(())
    }

    /// Record that `handler` has consumed `payload` (an `Inbound` journal
    /// entry) and, per §4.5's `prune_on_delivery`, mature any matching
    /// `Outbound` entry addressed to `handler` whose `payload_hash` agrees
    /// — pruning it if its retention policy says to. A `payload_hash`
    /// mismatch against the same `message_id`'s recorded `Outbound` entry
    /// is surfaced as `CorruptedWal`, per §4.5's append-only invariant.
    pub fn mark_delivered(
        &mut self,
        message_id: &str,
        handler: &str,
        payload_tag: &str,
        payload: &[u8],
        written_at_epoch_secs: u64,
    ) -> KernelResult<()> {
        let (inbound_entry, prune_entry) =
            self.journal
                .mark_delivered(message_id, handler, payload_tag, payload, written_at_epoch_secs)?;
        match prune_entry {
            Some(prune_entry) => {
                self.wal.append_batch(&[inbound_entry, prune_entry])?;
            }
            None => {
                self.wal.append(&inbound_entry)?;
            }
        }
        Ok(())
    }

    pub fn fold_segment(&mut self, id: &str, summary: &str) -> KernelResult<()> {
        let entry = self.contexts.fold(id, summary)?;
        self.wal.append(&entry)?;
        Ok(())
    }

    pub fn unfold_segment(&mut self, id: &str) -> KernelResult<()> {
        let entry = self.contexts.unfold(id)?;
        self.wal.append(&entry)?;
        Ok(())
    }

    pub fn evict_segment(&mut self, id: &str) -> KernelResult<()> {
        let entry = self.contexts.evict(id)?;
        self.wal.append(&entry)?;
        Ok(())
    }

    pub fn set_segment_relevance(&mut self, id: &str, relevance: f32) -> KernelResult<()> {
        let entry = self.contexts.set_relevance(id, relevance)?;
        self.wal.append(&entry)?;
        Ok(())
    }

    /// Prune journal entries whose `RetainDays` window has elapsed.
    pub fn prune_expired_journal_entries(&mut self, now_epoch_secs: u64) -> KernelResult<()> {
        if let Some(entry) = self.journal.prune_expired(now_epoch_secs) {
            self.wal.append(&entry)?;
        }
        Ok(())
    }

    /// Snapshot the current state to disk and truncate the WAL — the
    /// durable-kernel equivalent of compaction. Safe to call at any quiet
    /// point; on crash mid-checkpoint the old checkpoint plus the
    /// untruncated WAL still replay to the same state.
    pub fn checkpoint(&mut self) -> KernelResult<()> {
        let checkpoint = Checkpoint::capture(&self.threads, &self.contexts, &self.journal, self.wal.next_lsn());
        let checkpoint_path = self.data_dir.join("kernel.checkpoint");
        checkpoint.store(&checkpoint_path)?;
        self.wal.truncate()?;
        Ok(())
    }

    pub fn threads(&self) -> &ThreadTable {
        &self.threads
    }

    pub fn contexts(&self) -> &ContextStore {
        &self.contexts
    }

    /// Metadata-only snapshot of a thread's segments, for a curation
    /// collaborator to build a prompt from.
    pub fn context_inventory(&self, thread_id: &str) -> ContextInventory {
        self.contexts.snapshot(thread_id)
    }

    pub fn journal(&self) -> &Journal {
        &self.journal
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn initialize_root_is_idempotent_across_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let mut kernel = Kernel::open(dir.path()).unwrap();
            kernel.initialize_root("default").unwrap();
        }
        let mut kernel = Kernel::open(dir.path()).unwrap();
        kernel.initialize_root("default").unwrap();
        assert_eq!(kernel.threads().len(), 1);
    }

    #[test]
    fn kernel_state_persists_across_restart() {
        let dir = TempDir::new().unwrap();
        {
            let mut kernel = Kernel::open(dir.path()).unwrap();
            kernel.initialize_root("default").unwrap();
            kernel
                .spawn_thread("root", "task-1", "default", |_, _| true, Some(("seg-1", "hello")))
                .unwrap();
            kernel
                .dispatch_message(
                    "m1",
                    "root",
                    "root.task-1",
                    "Task",
                    b"hello",
                    RetentionPolicy::RetainForever,
                    0,
                )
                .unwrap();
        }

        let kernel = Kernel::open(dir.path()).unwrap();
        assert!(kernel.threads().contains("root.task-1"));
        assert_eq!(kernel.journal().count(), 1);
        assert!(kernel.contexts().get("seg-1").is_some());
    }

    #[test]
    fn checkpoint_then_restart_preserves_state_and_truncates_wal() {
        let dir = TempDir::new().unwrap();
        let mut kernel = Kernel::open(dir.path()).unwrap();
        kernel.initialize_root("default").unwrap();
        kernel
            .spawn_thread("root", "task-1", "default", |_, _| true, None)
            .unwrap();
        kernel.checkpoint().unwrap();
        drop(kernel);

        let kernel = Kernel::open(dir.path()).unwrap();
        assert!(kernel.threads().contains("root.task-1"));
        assert!(kernel.threads().contains("root"));
    }

    #[test]
    fn privilege_escalation_denied_on_spawn() {
        let dir = TempDir::new().unwrap();
        let mut kernel = Kernel::open(dir.path()).unwrap();
        kernel.initialize_root("restricted").unwrap();
        let err = kernel
            .spawn_thread("root", "task-1", "admin", |_, _| false, None)
            .unwrap_err();
        assert!(matches!(err, KernelError::PrivilegeEscalation { .. }));
    }

    #[test]
    fn prune_on_delivery_removes_journal_entry_durably() {
        let dir = TempDir::new().unwrap();
        {
            let mut kernel = Kernel::open(dir.path()).unwrap();
            kernel.initialize_root("default").unwrap();
            kernel
                .dispatch_message(
                    "m1",
                    "root",
                    "root",
                    "Task",
                    b"x",
                    RetentionPolicy::PruneOnDelivery,
                    0,
                )
                .unwrap();
            kernel.mark_delivered("m1", "root", "Task", b"x", 1).unwrap();
        }
        let kernel = Kernel::open(dir.path()).unwrap();
        assert!(kernel
            .journal()
            .all()
            .all(|e| !(e.message_id == "m1" && e.direction == Direction::Outbound)));
    }

    #[test]
    fn fold_unfold_evict_round_trip_never_loses_content() {
        let dir = TempDir::new().unwrap();
        let mut kernel = Kernel::open(dir.path()).unwrap();
        kernel.initialize_root("default").unwrap();
        kernel
            .spawn_thread("root", "task-1", "default", |_, _| true, Some(("seg-1", "full text")))
            .unwrap();

        kernel.fold_segment("seg-1", "summary").unwrap();
        kernel.evict_segment("seg-1").unwrap();
        assert_eq!(kernel.contexts().get("seg-1").unwrap().content, "full text");

        kernel.unfold_segment("seg-1").unwrap();
        let view = kernel.contexts().working_view("root.task-1");
        assert_eq!(view[0].1, "full text");
    }
}
