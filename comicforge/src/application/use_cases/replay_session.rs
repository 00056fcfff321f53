// /////////////////////////////////////////////////////////////////////////////
// Comicforge
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Replay Session Use Case
//!
//! Reconstructs a journaled session into a read-only report: terminal state,
//! per-stage checkpoints, feedback history, and the artifact pointer. A
//! journal stream without a terminal record replays as failed - crashed
//! stages are not resumable; a new session must be started for that work.

use std::sync::Arc;

use comicforge_domain::repositories::session_journal::{ReplayedSession, SessionJournal};
use comicforge_domain::{EngineError, SessionId, SessionState};

/// Human-readable replay summary.
#[derive(Debug)]
pub struct ReplayReport {
    pub session_id: SessionId,
    pub state: SessionState,
    /// True when the terminal state was inferred at recovery time.
    pub recovered: bool,
    pub checkpoints: usize,
    pub feedback_events: usize,
    pub last_stage: Option<String>,
    pub artifact_pointer: Option<String>,
}

pub struct ReplaySessionUseCase {
    journal: Arc<dyn SessionJournal>,
}

impl ReplaySessionUseCase {
    pub fn new(journal: Arc<dyn SessionJournal>) -> Self {
        Self { journal }
    }

    pub async fn replay(&self, session_id: SessionId) -> Result<ReplayReport, EngineError> {
        let entries = self.journal.load(session_id).await?;
        let replayed = ReplayedSession::from_entries(session_id, &entries)?;
        Ok(report_of(&replayed))
    }

    /// Lists every journaled session id.
    pub async fn list_sessions(&self) -> Result<Vec<SessionId>, EngineError> {
        self.journal.sessions().await
    }
}

fn report_of(replayed: &ReplayedSession) -> ReplayReport {
    ReplayReport {
        session_id: replayed.session_id,
        state: replayed.state,
        recovered: replayed.recovered,
        checkpoints: replayed.checkpoints.len(),
        feedback_events: replayed.feedback.len(),
        last_stage: replayed.last_stage.map(|stage| stage.name().to_string()),
        artifact_pointer: replayed.artifact_pointer.clone(),
    }
}
