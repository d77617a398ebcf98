//! The three-tier context segment model (§4.3). A segment's full content is
//! always retained on disk regardless of tier — `Expanded`/`Folded`/`Evicted`
//! only describe what is currently surfaced to the thread's working view,
//! and every transition between them is reversible.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{KernelError, KernelResult};
use crate::wal::{EntryType, WalEntry};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SegmentStatus {
    /// Full content is part of the thread's working view.
    Expanded,
    /// A summary stands in for the content; full content is still on disk.
    Folded,
    /// Nothing is surfaced; full content is still on disk, recoverable by
    /// `unfold`.
    Evicted,
}

/// Metadata-only view of one segment — what a curation collaborator reads
/// to decide fold/evict/unfold without being handed content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentMeta {
    pub id: String,
    pub tag: String,
    pub size: usize,
    pub status: SegmentStatus,
    pub relevance: f32,
    pub created_at: u64,
}

/// A snapshot of one thread's segments, for building a curation prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextInventory {
    pub thread_id: String,
    pub segments: Vec<SegmentMeta>,
    pub expanded_count: usize,
    pub folded_count: usize,
    pub evicted_count: usize,
    pub expanded_bytes: usize,
    pub total_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Segment {
    pub id: String,
    pub thread_id: String,
    pub status: SegmentStatus,
    /// Full content — never discarded, regardless of `status` (§4.3's
    /// no-silent-data-loss invariant).
    pub content: String,
    /// Present once folded at least once; kept even after unfolding so a
    /// re-fold doesn't need to regenerate it.
    pub summary: Option<String>,
    pub relevance: f32,
    pub seq: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct AppendRecord {
    id: String,
    thread_id: String,
    content: String,
    relevance: f32,
    seq: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct FoldRecord {
    id: String,
    summary: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct UnfoldRecord {
    id: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct EvictRecord {
    id: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct RelevanceRecord {
    id: String,
    relevance: f32,
}

/// In-memory store of segments, reconstructed from WAL replay on open.
#[derive(Debug, Default)]
pub struct ContextStore {
    segments: BTreeMap<String, Segment>,
    next_seq: u64,
}

impl ContextStore {
    pub fn new() -> Self {
        Self {
            segments: BTreeMap::new(),
            next_seq: 0,
        }
    }

    pub fn get(&self, id: &str) -> Option<&Segment> {
        self.segments.get(id)
    }

    pub fn all(&self) -> impl Iterator<Item = &Segment> {
        self.segments.values()
    }

    pub(crate) fn restore(&mut self, segments: impl Iterator<Item = Segment>) {
        self.segments = segments.map(|s| (s.id.clone(), s)).collect();
        self.next_seq = self
            .segments
            .values()
            .map(|s| s.seq + 1)
            .max()
            .unwrap_or(0);
    }

    /// Append new content to a thread's context as an Expanded segment.
    pub fn append(&mut self, id: &str, thread_id: &str, content: &str, relevance: f32) -> WalEntry {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.segments.insert(
            id.to_string(),
            Segment {
                id: id.to_string(),
                thread_id: thread_id.to_string(),
                status: SegmentStatus::Expanded,
                content: content.to_string(),
                summary: None,
                relevance,
                seq,
            },
        );
        let payload = serde_json::to_vec(&AppendRecord {
            id: id.to_string(),
            thread_id: thread_id.to_string(),
            content: content.to_string(),
            relevance,
            seq,
        })
        .expect("AppendRecord always serializes");
        WalEntry::new(EntryType::SegmentAppend, payload)
    }

    /// Replace a segment's working-view content with `summary`, retaining
    /// the full content untouched.
    pub fn fold(&mut self, id: &str, summary: &str) -> KernelResult<WalEntry> {
        let segment = self
            .segments
            .get_mut(id)
            .ok_or_else(|| KernelError::UnknownSegment(id.to_string()))?;
        segment.status = SegmentStatus::Folded;
        segment.summary = Some(summary.to_string());
        let payload = serde_json::to_vec(&FoldRecord {
            id: id.to_string(),
            summary: summary.to_string(),
        })
        .expect("FoldRecord always serializes");
        Ok(WalEntry::new(EntryType::SegmentFold, payload))
    }

    /// Restore a Folded or Evicted segment to Expanded, surfacing its full
    /// content again.
    pub fn unfold(&mut self, id: &str) -> KernelResult<WalEntry> {
        let segment = self
            .segments
            .get_mut(id)
            .ok_or_else(|| KernelError::UnknownSegment(id.to_string()))?;
        segment.status = SegmentStatus::Expanded;
        let payload = serde_json::to_vec(&UnfoldRecord { id: id.to_string() })
            .expect("UnfoldRecord always serializes");
        Ok(WalEntry::new(EntryType::SegmentUnfold, payload))
    }

    /// Drop a segment from the working view entirely. Full content stays on
    /// disk; `unfold` recovers it.
    pub fn evict(&mut self, id: &str) -> KernelResult<WalEntry> {
        let segment = self
            .segments
            .get_mut(id)
            .ok_or_else(|| KernelError::UnknownSegment(id.to_string()))?;
        segment.status = SegmentStatus::Evicted;
        let payload = serde_json::to_vec(&EvictRecord { id: id.to_string() })
            .expect("EvictRecord always serializes");
        Ok(WalEntry::new(EntryType::SegmentEvict, payload))
    }

    pub fn set_relevance(&mut self, id: &str, relevance: f32) -> KernelResult<WalEntry> {
        let segment = self
            .segments
            .get_mut(id)
            .ok_or_else(|| KernelError::UnknownSegment(id.to_string()))?;
        segment.relevance = relevance;
        let payload = serde_json::to_vec(&RelevanceRecord {
            id: id.to_string(),
            relevance,
        })
        .expect("RelevanceRecord always serializes");
        Ok(WalEntry::new(EntryType::SegmentRelevance, payload))
    }

    /// The thread's current working view: Expanded segments show full
    /// content, Folded segments show their summary, Evicted segments are
    /// omitted. Ordered by insertion sequence.
    pub fn working_view(&self, thread_id: &str) -> Vec<(&Segment, String)> {
        let mut segments: Vec<&Segment> = self
            .segments
            .values()
            .filter(|s| s.thread_id == thread_id)
            .collect();
        segments.sort_by_key(|s| s.seq);
        segments
            .into_iter()
            .filter_map(|s| match s.status {
                SegmentStatus::Expanded => Some((s, s.content.clone())),
                SegmentStatus::Folded => {
                    Some((s, s.summary.clone().unwrap_or_default()))
                }
                SegmentStatus::Evicted => None,
            })
            .collect()
    }

    /// Approximate size in bytes of the current working view, for budget
    /// enforcement by the router's curation collaborator.
    pub fn working_view_size(&self, thread_id: &str) -> usize {
        self.working_view(thread_id)
            .iter()
            .map(|(_, text)| text.len())
            .sum()
    }

    /// A metadata-only snapshot of one thread's segments — everything an
    /// external curation collaborator needs to decide fold/evict/unfold
    /// calls, without handing over content it has no reason to read.
    pub fn snapshot(&self, thread_id: &str) -> ContextInventory {
        let mut segments: Vec<&Segment> = self
            .segments
            .values()
            .filter(|s| s.thread_id == thread_id)
            .collect();
        segments.sort_by_key(|s| s.seq);

        let mut expanded_count = 0;
        let mut folded_count = 0;
        let mut evicted_count = 0;
        let mut expanded_bytes = 0;
        let mut total_bytes = 0;

        let metas = segments
            .iter()
            .map(|s| {
                let size = s.content.len();
                total_bytes += size;
                match s.status {
                    SegmentStatus::Expanded => {
                        expanded_count += 1;
                        expanded_bytes += size;
                    }
                    SegmentStatus::Folded => folded_count += 1,
                    SegmentStatus::Evicted => evicted_count += 1,
                }
                SegmentMeta {
                    id: s.id.clone(),
                    tag: s.id.split(':').next().unwrap_or(&s.id).to_string(),
                    size,
                    status: s.status,
                    relevance: s.relevance,
                    // Segments carry no wall-clock timestamp; `seq` is a
                    // monotonic stand-in that preserves creation order.
                    created_at: s.seq,
                }
            })
            .collect();

        ContextInventory {
            thread_id: thread_id.to_string(),
            segments: metas,
            expanded_count,
            folded_count,
            evicted_count,
            expanded_bytes,
            total_bytes,
        }
    }

    pub fn apply_wal_entry(&mut self, entry: &WalEntry) -> KernelResult<()> {
        match entry.kind {
            EntryType::SegmentAppend => {
                let rec: AppendRecord = serde_json::from_slice(&entry.payload)?;
                self.segments.insert(
                    rec.id.clone(),
                    Segment {
                        id: rec.id,
                        thread_id: rec.thread_id,
                        status: SegmentStatus::Expanded,
                        content: rec.content,
                        summary: None,
                        relevance: rec.relevance,
                        seq: rec.seq,
                    },
                );
                if rec.seq >= self.next_seq {
                    self.next_seq = rec.seq + 1;
                }
                Ok(())
            }
            EntryType::SegmentFold => {
                let rec: FoldRecord = serde_json::from_slice(&entry.payload)?;
                if let Some(segment) = self.segments.get_mut(&rec.id) {
                    segment.status = SegmentStatus::Folded;
                    segment.summary = Some(rec.summary);
                }
                Ok(())
            }
            EntryType::SegmentUnfold => {
                let rec: UnfoldRecord = serde_json::from_slice(&entry.payload)?;
                if let Some(segment) = self.segments.get_mut(&rec.id) {
                    segment.status = SegmentStatus::Expanded;
                }
                Ok(())
            }
            EntryType::SegmentEvict => {
                let rec: EvictRecord = serde_json::from_slice(&entry.payload)?;
                if let Some(segment) = self.segments.get_mut(&rec.id) {
                    segment.status = SegmentStatus::Evicted;
                }
                Ok(())
            }
            EntryType::SegmentRelevance => {
                let rec: RelevanceRecord = serde_json::from_slice(&entry.payload)?;
                if let Some(segment) = self.segments.get_mut(&rec.id) {
                    segment.relevance = rec.relevance;
                }
                Ok(())
            }
            other => Err(KernelError::CorruptedWal {
                lsn: entry.lsn,
                reason: format!("context store cannot apply entry kind {other:?}"),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fold_then_unfold_recovers_full_content() {
        let mut store = ContextStore::new();
        store.append("seg-1", "root", "the full content", 1.0);
        store.fold("seg-1", "a short summary").unwrap();

        let view = store.working_view("root");
        assert_eq!(view[0].1, "a short summary");
        assert_eq!(store.get("seg-1").unwrap().content, "the full content");

        store.unfold("seg-1").unwrap();
        let view = store.working_view("root");
        assert_eq!(view[0].1, "the full content");
    }

    #[test]
    fn evict_then_unfold_recovers_full_content() {
        let mut store = ContextStore::new();
        store.append("seg-1", "root", "the full content", 1.0);
        store.evict("seg-1").unwrap();
        assert!(store.working_view("root").is_empty());
        assert_eq!(store.get("seg-1").unwrap().content, "the full content");

        store.unfold("seg-1").unwrap();
        let view = store.working_view("root");
        assert_eq!(view[0].1, "the full content");
    }

    #[test]
    fn working_view_preserves_insertion_order() {
        let mut store = ContextStore::new();
        store.append("a", "root", "first", 1.0);
        store.append("b", "root", "second", 1.0);
        store.append("c", "root", "third", 1.0);
        let view = store.working_view("root");
        let ids: Vec<&str> = view.iter().map(|(s, _)| s.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn unknown_segment_operations_error() {
        let mut store = ContextStore::new();
        assert!(matches!(
            store.fold("ghost", "x"),
            Err(KernelError::UnknownSegment(_))
        ));
        assert!(matches!(
            store.evict("ghost"),
            Err(KernelError::UnknownSegment(_))
        ));
    }

    #[test]
    fn snapshot_counts_segments_by_status() {
        let mut store = ContextStore::new();
        store.append("a", "root", "one", 1.0);
        store.append("b", "root", "two", 1.0);
        store.append("c", "root", "three", 1.0);
        store.fold("b", "summary of two").unwrap();
        store.evict("c").unwrap();

        let inventory = store.snapshot("root");
        assert_eq!(inventory.segments.len(), 3);
        assert_eq!(inventory.expanded_count, 1);
        assert_eq!(inventory.folded_count, 1);
        assert_eq!(inventory.evicted_count, 1);
        assert_eq!(inventory.expanded_bytes, "one".len());
    }

    #[test]
    fn apply_wal_entry_replays_full_lifecycle() {
        let mut store = ContextStore::new();
        let append = store.append("seg-1", "root", "content", 1.0);
        let fold = store.fold("seg-1", "summary").unwrap();
        let unfold = store.unfold("seg-1").unwrap();
        let evict = store.evict("seg-1").unwrap();

        let mut replay = ContextStore::new();
        for entry in [&append, &fold, &unfold, &evict] {
            replay.apply_wal_entry(entry).unwrap();
        }
        assert_eq!(replay.get("seg-1").unwrap().status, SegmentStatus::Evicted);
        assert_eq!(replay.get("seg-1").unwrap().content, "content");
    }
}
