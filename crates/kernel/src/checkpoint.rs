//! Point-in-time snapshot of kernel state, serialized to disk so the WAL
//! can be truncated without losing history (§4.6's checkpoint/truncate
//! cycle).

use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::context_store::{ContextStore, Segment};
use crate::error::KernelResult;
use crate::journal::{Journal, JournalEntry};
use crate::thread_table::{ThreadRecord, ThreadTable};

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct Checkpoint {
    pub(crate) next_lsn: u64,
    threads: Vec<ThreadRecord>,
    segments: Vec<Segment>,
    journal: Vec<JournalEntry>,
}

impl Checkpoint {
    pub(crate) fn capture(
        threads: &ThreadTable,
        contexts: &ContextStore,
        journal: &Journal,
        next_lsn: u64,
    ) -> Self {
        Self {
            next_lsn,
            threads: threads.all().cloned().collect(),
            segments: contexts.all().cloned().collect(),
            journal: journal.all().cloned().collect(),
        }
    }

    pub(crate) fn store(&self, path: &Path) -> KernelResult<()> {
        let tmp_path = path.with_extension("checkpoint.tmp");
        {
            let file = File::create(&tmp_path)?;
            serde_json::to_writer(BufWriter::new(file), self)?;
        }
        fs::rename(&tmp_path, path)?;
        Ok(())
    }

    pub(crate) fn load(path: &Path) -> KernelResult<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let file = File::open(path)?;
        let checkpoint: Checkpoint = serde_json::from_reader(BufReader::new(file))?;
        Ok(Some(checkpoint))
    }

    pub(crate) fn restore_into(
        &self,
        threads: &mut ThreadTable,
        contexts: &mut ContextStore,
        journal: &mut Journal,
    ) {
        threads.restore(self.threads.iter().cloned());
        contexts.restore(self.segments.iter().cloned());
        journal.restore(self.journal.iter().cloned());
    }
}
