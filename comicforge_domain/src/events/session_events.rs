// /////////////////////////////////////////////////////////////////////////////
// Comicforge
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Session Events
//!
//! The nine event kinds fanned out on the live update bus, wrapped in a
//! sequenced envelope. Subscribers of a session observe causal order: a
//! `stage-completed(k)` always precedes `stage-started(k+1)`, and the
//! sequence number is monotonic per session. No ordering is guaranteed
//! across sessions.
//!
//! Event kind strings and payload shapes are part of the subscription schema
//! and stable across minor versions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::services::datetime_serde;
use crate::value_objects::feedback::FeedbackOrigin;
use crate::value_objects::generic_id::{SessionId, VersionId};
use crate::value_objects::preview::PreviewPayload;
use crate::value_objects::stage_index::StageIndex;

/// Kind-specific payload of a session event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum EventPayload {
    StageStarted {
        stage: StageIndex,
        attempt: u32,
    },
    StageProgress {
        stage: StageIndex,
        /// Monotonic per stage, in [0, 100].
        percent: u8,
    },
    StageCompleted {
        stage: StageIndex,
        version_id: VersionId,
        quality: f64,
        elapsed_ms: u64,
    },
    PreviewAvailable {
        stage: StageIndex,
        preview: PreviewPayload,
    },
    AwaitingFeedback {
        stage: StageIndex,
        #[serde(with = "datetime_serde")]
        deadline: DateTime<Utc>,
    },
    FeedbackAccepted {
        stage: StageIndex,
        origin: FeedbackOrigin,
        #[serde(skip_serializing_if = "Option::is_none")]
        next_stage: Option<StageIndex>,
    },
    StageFailed {
        stage: StageIndex,
        error_kind: String,
        message: String,
        will_retry: bool,
        fallback: bool,
    },
    PipelineCompleted {
        artifact_pointer: String,
        overall_quality: f64,
        elapsed_ms: u64,
    },
    PipelineCancelled {
        reason: String,
    },
    /// Terminal failure: a critical stage exhausted its retries, admission
    /// was lost, or persistence failed permanently.
    PipelineFailed {
        error_kind: String,
        message: String,
    },
}

impl EventPayload {
    /// Wire-stable kind string.
    pub fn kind(&self) -> &'static str {
        match self {
            EventPayload::StageStarted { .. } => "stage-started",
            EventPayload::StageProgress { .. } => "stage-progress",
            EventPayload::StageCompleted { .. } => "stage-completed",
            EventPayload::PreviewAvailable { .. } => "preview-available",
            EventPayload::AwaitingFeedback { .. } => "awaiting-feedback",
            EventPayload::FeedbackAccepted { .. } => "feedback-accepted",
            EventPayload::StageFailed { .. } => "stage-failed",
            EventPayload::PipelineCompleted { .. } => "pipeline-completed",
            EventPayload::PipelineCancelled { .. } => "pipeline-cancelled",
            EventPayload::PipelineFailed { .. } => "pipeline-failed",
        }
    }

    /// The stage this event concerns, if any.
    pub fn stage(&self) -> Option<StageIndex> {
        match self {
            EventPayload::StageStarted { stage, .. }
            | EventPayload::StageProgress { stage, .. }
            | EventPayload::StageCompleted { stage, .. }
            | EventPayload::PreviewAvailable { stage, .. }
            | EventPayload::AwaitingFeedback { stage, .. }
            | EventPayload::FeedbackAccepted { stage, .. }
            | EventPayload::StageFailed { stage, .. } => Some(*stage),
            EventPayload::PipelineCompleted { .. }
            | EventPayload::PipelineCancelled { .. }
            | EventPayload::PipelineFailed { .. } => None,
        }
    }

    /// Whether this event terminates the session's stream.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EventPayload::PipelineCompleted { .. }
                | EventPayload::PipelineCancelled { .. }
                | EventPayload::PipelineFailed { .. }
        )
    }
}

/// A sequenced session event as observed by subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionEvent {
    pub event_id: Uuid,
    pub session_id: SessionId,
    /// Stage the event concerns; absent for pipeline-level events.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<StageIndex>,
    /// Monotonic per session.
    pub sequence: u64,
    #[serde(with = "datetime_serde")]
    pub occurred_at: DateTime<Utc>,
    pub payload: EventPayload,
}

impl SessionEvent {
    pub fn new(session_id: SessionId, sequence: u64, payload: EventPayload) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            session_id,
            stage: payload.stage(),
            sequence,
            occurred_at: Utc::now(),
            payload,
        }
    }

    pub fn kind(&self) -> &'static str {
        self.payload.kind()
    }
}
