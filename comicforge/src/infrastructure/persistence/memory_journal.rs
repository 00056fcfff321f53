// /////////////////////////////////////////////////////////////////////////////
// Comicforge
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! In-memory session journal.
//!
//! The test double (and single-process default) for the journal port. Keeps
//! every guarantee of the durable adapter: append-only, idempotent by
//! (session id, sequence), ordered reads.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use parking_lot::RwLock;

use comicforge_domain::repositories::session_journal::{JournalEntry, SessionJournal};
use comicforge_domain::{EngineError, SessionId};

/// Journal backed by process memory.
#[derive(Default)]
pub struct MemoryJournal {
    streams: RwLock<HashMap<SessionId, BTreeMap<u64, JournalEntry>>>,
}

impl MemoryJournal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries journaled for a session.
    pub fn entry_count(&self, session_id: SessionId) -> usize {
        self.streams.read().get(&session_id).map(BTreeMap::len).unwrap_or(0)
    }
}

#[async_trait]
impl SessionJournal for MemoryJournal {
    async fn append(&self, entry: JournalEntry) -> Result<(), EngineError> {
        let mut streams = self.streams.write();
        let stream = streams.entry(entry.session_id).or_default();
        // Idempotent: a duplicate (session, sequence) write is a no-op.
        stream.entry(entry.sequence).or_insert(entry);
        Ok(())
    }

    async fn load(&self, session_id: SessionId) -> Result<Vec<JournalEntry>, EngineError> {
        Ok(self
            .streams
            .read()
            .get(&session_id)
            .map(|stream| stream.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn sessions(&self) -> Result<Vec<SessionId>, EngineError> {
        let mut ids: Vec<SessionId> = self.streams.read().keys().copied().collect();
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use comicforge_domain::repositories::session_journal::JournalRecord;
    use comicforge_domain::{SessionState, SubmissionOptions};

    fn entry(session: SessionId, sequence: u64) -> JournalEntry {
        JournalEntry::new(
            session,
            sequence,
            JournalRecord::Terminal {
                state: SessionState::Completed,
                artifact_pointer: Some(format!("artifact://{}", sequence)),
            },
        )
    }

    #[tokio::test]
    async fn test_append_and_ordered_load() {
        let journal = MemoryJournal::new();
        let session = SessionId::new();
        journal.append(entry(session, 2)).await.unwrap();
        journal.append(entry(session, 0)).await.unwrap();
        journal.append(entry(session, 1)).await.unwrap();

        let entries = journal.load(session).await.unwrap();
        let sequences: Vec<u64> = entries.iter().map(|e| e.sequence).collect();
        assert_eq!(sequences, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_duplicate_sequence_is_idempotent() {
        let journal = MemoryJournal::new();
        let session = SessionId::new();
        journal.append(entry(session, 0)).await.unwrap();

        let mut replayed = entry(session, 0);
        replayed.record = JournalRecord::Admitted {
            owner: comicforge_domain::OwnerId::new(),
            submission: "late duplicate".to_string(),
            options: SubmissionOptions::default(),
        };
        journal.append(replayed).await.unwrap();

        let entries = journal.load(session).await.unwrap();
        assert_eq!(entries.len(), 1);
        // First write wins; the duplicate did not overwrite
        assert!(matches!(entries[0].record, JournalRecord::Terminal { .. }));
    }

    #[tokio::test]
    async fn test_sessions_listing() {
        let journal = MemoryJournal::new();
        let a = SessionId::new();
        let b = SessionId::new();
        journal.append(entry(a, 0)).await.unwrap();
        journal.append(entry(b, 0)).await.unwrap();
        let ids = journal.sessions().await.unwrap();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&a) && ids.contains(&b));
    }
}
