// /////////////////////////////////////////////////////////////////////////////
// Comicforge
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Session Journal Port
//!
//! The persistence boundary of the engine: an append-only stream of records
//! per session. Admissions, stage checkpoints, previews, feedback envelopes,
//! and terminal states are journaled; writes are idempotent by
//! (session id, sequence).
//!
//! Reads reconstruct a session sufficiently to resume a subscription or
//! serve a completed artifact - never to resume execution of a crashed
//! stage. [`ReplayedSession::from_entries`] implements that recovery rule:
//! a journal with no terminal record replays as `failed`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::aggregates::version_log::Version;
use crate::entities::session::{SessionState, SubmissionOptions};
use crate::error::EngineError;
use crate::services::datetime_serde;
use crate::value_objects::feedback::FeedbackEnvelope;
use crate::value_objects::generic_id::{OwnerId, SessionId};
use crate::value_objects::preview::PreviewPayload;
use crate::value_objects::stage_index::StageIndex;

/// One durable record in a session's append stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "record", rename_all = "kebab-case")]
pub enum JournalRecord {
    Admitted {
        owner: OwnerId,
        submission: String,
        options: SubmissionOptions,
    },
    Checkpoint {
        version: Box<Version>,
    },
    Preview {
        preview: PreviewPayload,
    },
    Feedback {
        envelope: FeedbackEnvelope,
    },
    StageFailed {
        stage: StageIndex,
        error_kind: String,
        message: String,
    },
    Terminal {
        state: SessionState,
        #[serde(skip_serializing_if = "Option::is_none")]
        artifact_pointer: Option<String>,
    },
}

/// A sequenced journal entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalEntry {
    pub session_id: SessionId,
    /// Monotonic per session; the idempotency key together with the session.
    pub sequence: u64,
    pub record: JournalRecord,
    #[serde(with = "datetime_serde")]
    pub written_at: DateTime<Utc>,
}

impl JournalEntry {
    pub fn new(session_id: SessionId, sequence: u64, record: JournalRecord) -> Self {
        Self {
            session_id,
            sequence,
            record,
            written_at: Utc::now(),
        }
    }
}

/// Append-only durable store for session streams.
///
/// Implementations must make `append` idempotent: a second write with an
/// already-journaled (session id, sequence) pair is a no-op, not an error.
#[async_trait]
pub trait SessionJournal: Send + Sync {
    async fn append(&self, entry: JournalEntry) -> Result<(), EngineError>;

    /// All entries of a session, in sequence order.
    async fn load(&self, session_id: SessionId) -> Result<Vec<JournalEntry>, EngineError>;

    /// Ids of all journaled sessions.
    async fn sessions(&self) -> Result<Vec<SessionId>, EngineError>;
}

/// Read-only reconstruction of a journaled session.
#[derive(Debug, Clone)]
pub struct ReplayedSession {
    pub session_id: SessionId,
    pub owner: Option<OwnerId>,
    pub options: Option<SubmissionOptions>,
    /// Terminal state, or `Failed` when the journal ends without one
    /// (crashed sessions are not resumable).
    pub state: SessionState,
    /// Whether the terminal state was recovered rather than journaled.
    pub recovered: bool,
    pub checkpoints: Vec<Version>,
    pub feedback: Vec<FeedbackEnvelope>,
    pub artifact_pointer: Option<String>,
    /// Highest stage with a journaled checkpoint.
    pub last_stage: Option<StageIndex>,
}

impl ReplayedSession {
    /// Replays a session's entries into a read-only view.
    pub fn from_entries(session_id: SessionId, entries: &[JournalEntry]) -> Result<Self, EngineError> {
        if entries.is_empty() {
            return Err(EngineError::SessionNotFound(format!("{}", session_id)));
        }

        let mut replayed = ReplayedSession {
            session_id,
            owner: None,
            options: None,
            state: SessionState::Failed,
            recovered: true,
            checkpoints: Vec::new(),
            feedback: Vec::new(),
            artifact_pointer: None,
            last_stage: None,
        };

        let mut seen = std::collections::BTreeSet::new();
        for entry in entries {
            if entry.session_id != session_id {
                return Err(EngineError::persistence(format!(
                    "journal stream for {} contains entry for {}",
                    session_id, entry.session_id
                )));
            }
            // Duplicate sequences are the idempotent-write case; skip replays.
            if !seen.insert(entry.sequence) {
                continue;
            }
            match &entry.record {
                JournalRecord::Admitted { owner, options, .. } => {
                    replayed.owner = Some(*owner);
                    replayed.options = Some(options.clone());
                }
                JournalRecord::Checkpoint { version } => {
                    let stage = version.stage;
                    replayed.checkpoints.push((**version).clone());
                    replayed.last_stage = Some(match replayed.last_stage {
                        Some(prev) => prev.max(stage),
                        None => stage,
                    });
                }
                JournalRecord::Preview { .. } | JournalRecord::StageFailed { .. } => {}
                JournalRecord::Feedback { envelope } => replayed.feedback.push(envelope.clone()),
                JournalRecord::Terminal {
                    state,
                    artifact_pointer,
                } => {
                    replayed.state = *state;
                    replayed.recovered = false;
                    replayed.artifact_pointer = artifact_pointer.clone();
                }
            }
        }
        Ok(replayed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregates::version_log::{VersionAuthor, VersionLog};
    use crate::entities::stage_result::StageResult;
    use crate::value_objects::quality_score::QualityScore;
    use crate::value_objects::stage_output::{ConceptOutput, StageOutput};

    fn checkpoint_entry(session: SessionId, sequence: u64) -> (JournalEntry, VersionLog) {
        let mut log = VersionLog::new(session);
        let result = StageResult::new(
            session,
            StageIndex::first(),
            1,
            "fp".to_string(),
            StageOutput::Concept(ConceptOutput {
                theme: "storms".to_string(),
                genres: vec![],
                world_setting: "island".to_string(),
                target_audience: "teen".to_string(),
                estimated_pages: 1,
            }),
            QualityScore::clamped(0.9),
            10,
            vec![],
        );
        let id = log.checkpoint(result, VersionAuthor::System, "s1", vec![]).unwrap();
        let version = log.version(id).unwrap().clone();
        (
            JournalEntry::new(session, sequence, JournalRecord::Checkpoint { version: Box::new(version) }),
            log,
        )
    }

    #[test]
    fn test_replay_without_terminal_recovers_as_failed() {
        let session = SessionId::new();
        let admitted = JournalEntry::new(
            session,
            0,
            JournalRecord::Admitted {
                owner: OwnerId::new(),
                submission: "story".to_string(),
                options: SubmissionOptions::default(),
            },
        );
        let (checkpoint, _log) = checkpoint_entry(session, 1);

        let replayed = ReplayedSession::from_entries(session, &[admitted, checkpoint]).unwrap();
        assert_eq!(replayed.state, SessionState::Failed);
        assert!(replayed.recovered);
        assert_eq!(replayed.checkpoints.len(), 1);
        assert_eq!(replayed.last_stage, Some(StageIndex::first()));
    }

    #[test]
    fn test_replay_with_terminal_state() {
        let session = SessionId::new();
        let entries = vec![
            JournalEntry::new(
                session,
                0,
                JournalRecord::Admitted {
                    owner: OwnerId::new(),
                    submission: "story".to_string(),
                    options: SubmissionOptions::default(),
                },
            ),
            JournalEntry::new(
                session,
                1,
                JournalRecord::Terminal {
                    state: SessionState::Completed,
                    artifact_pointer: Some("artifact://final".to_string()),
                },
            ),
        ];
        let replayed = ReplayedSession::from_entries(session, &entries).unwrap();
        assert_eq!(replayed.state, SessionState::Completed);
        assert!(!replayed.recovered);
        assert_eq!(replayed.artifact_pointer.as_deref(), Some("artifact://final"));
    }

    #[test]
    fn test_replay_skips_duplicate_sequences() {
        let session = SessionId::new();
        let (checkpoint, _log) = checkpoint_entry(session, 5);
        let duplicate = checkpoint.clone();
        let replayed = ReplayedSession::from_entries(session, &[checkpoint, duplicate]).unwrap();
        assert_eq!(replayed.checkpoints.len(), 1);
    }

    #[test]
    fn test_replay_rejects_foreign_entries() {
        let session = SessionId::new();
        let (foreign, _log) = checkpoint_entry(SessionId::new(), 0);
        assert!(ReplayedSession::from_entries(session, &[foreign]).is_err());
    }

    #[test]
    fn test_empty_journal_is_not_found() {
        let err = ReplayedSession::from_entries(SessionId::new(), &[]).unwrap_err();
        assert_eq!(err.kind(), "session-not-found");
    }
}
