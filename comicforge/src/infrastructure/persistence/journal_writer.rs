// /////////////////////////////////////////////////////////////////////////////
// Comicforge
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # File-backed Session Journal
//!
//! Durable implementation of the journal port: one append-only JSON-lines
//! file per session under a root directory. Each line is one
//! `JournalEntry`; idempotency by (session id, sequence) is enforced with an
//! in-memory index of written sequences, rebuilt from disk on first touch of
//! a session.
//!
//! Reads reconstruct enough state to resume a subscription or serve a
//! finished artifact; they are not an execution checkpoint.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tracing::warn;

use comicforge_domain::repositories::session_journal::{JournalEntry, SessionJournal};
use comicforge_domain::{EngineError, SessionId};

/// JSON-lines journal rooted at a directory.
pub struct FileJournal {
    root: PathBuf,
    /// (session -> sequences already on disk), guarded by an async mutex so
    /// the read-check-append sequence is atomic per process.
    written: tokio::sync::Mutex<HashMap<SessionId, HashSet<u64>>>,
}

impl FileJournal {
    /// Opens (creating if needed) a journal root directory.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, EngineError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|e| EngineError::persistence(format!("creating journal root {:?}: {}", root, e)))?;
        Ok(Self {
            root,
            written: tokio::sync::Mutex::new(HashMap::new()),
        })
    }

    fn stream_path(&self, session_id: SessionId) -> PathBuf {
        self.root.join(format!("{}.jsonl", session_id))
    }

    async fn read_entries(path: &Path) -> Result<Vec<JournalEntry>, EngineError> {
        let raw = match tokio::fs::read_to_string(path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(EngineError::persistence(format!("reading {:?}: {}", path, e))),
        };
        let mut entries = Vec::new();
        for (lineno, line) in raw.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<JournalEntry>(line) {
                Ok(entry) => entries.push(entry),
                // A torn tail line from a crashed writer is skipped, not fatal
                Err(e) => warn!(?path, lineno, error = %e, "skipping unparsable journal line"),
            }
        }
        entries.sort_by_key(|e| e.sequence);
        Ok(entries)
    }

    async fn known_sequences(&self, session_id: SessionId) -> Result<HashSet<u64>, EngineError> {
        let entries = Self::read_entries(&self.stream_path(session_id)).await?;
        Ok(entries.into_iter().map(|e| e.sequence).collect())
    }
}

#[async_trait]
impl SessionJournal for FileJournal {
    async fn append(&self, entry: JournalEntry) -> Result<(), EngineError> {
        let mut written = self.written.lock().await;
        if !written.contains_key(&entry.session_id) {
            let on_disk = self.known_sequences(entry.session_id).await?;
            written.insert(entry.session_id, on_disk);
        }
        let sequences = written
            .get_mut(&entry.session_id)
            .ok_or_else(|| EngineError::internal("journal index vanished"))?;
        if sequences.contains(&entry.sequence) {
            return Ok(());
        }

        let mut line = serde_json::to_vec(&entry)?;
        line.push(b'\n');

        let path = self.stream_path(entry.session_id);
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| EngineError::persistence(format!("opening {:?}: {}", path, e)))?;
        file.write_all(&line)
            .await
            .map_err(|e| EngineError::persistence(format!("appending to {:?}: {}", path, e)))?;
        file.flush()
            .await
            .map_err(|e| EngineError::persistence(format!("flushing {:?}: {}", path, e)))?;

        sequences.insert(entry.sequence);
        Ok(())
    }

    async fn load(&self, session_id: SessionId) -> Result<Vec<JournalEntry>, EngineError> {
        Self::read_entries(&self.stream_path(session_id)).await
    }

    async fn sessions(&self) -> Result<Vec<SessionId>, EngineError> {
        let mut ids = Vec::new();
        let mut dir = tokio::fs::read_dir(&self.root)
            .await
            .map_err(|e| EngineError::persistence(format!("listing {:?}: {}", self.root, e)))?;
        while let Some(dirent) = dir
            .next_entry()
            .await
            .map_err(|e| EngineError::persistence(format!("listing {:?}: {}", self.root, e)))?
        {
            let name = dirent.file_name();
            let name = name.to_string_lossy();
            if let Some(stem) = name.strip_suffix(".jsonl") {
                if let Ok(id) = SessionId::parse(stem) {
                    ids.push(id);
                }
            }
        }
        ids.sort();
        Ok(ids)
    }
}
