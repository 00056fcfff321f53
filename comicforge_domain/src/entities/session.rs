// /////////////////////////////////////////////////////////////////////////////
// Comicforge
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Session Entity
//!
//! A `Session` is one run of the seven-stage pipeline for one submission.
//! The entity owns the observable state machine:
//!
//! ```text
//! queued -> running(stage=1)
//! running(k)  -> quality-gate(k)
//!              -> on pass:       hitl(k)   [if stage k is HITL-enabled]
//!                               -> running(k+1)
//!              -> on retry:      running(k)   [attempt+1, bounded]
//!              -> on fallback:   running(k+1) with placeholder output
//!              -> on fatal:      failed
//! hitl(k)     -> on feedback:    running(k+1)   [merged input]
//!              -> on timeout:    running(k+1)   [default]
//! running(7) -> completed
//! any -> cancelled  (on external cancel)
//! ```
//!
//! The scheduler is the single writer of a session; everything else observes
//! copies. Transition methods validate the state machine and return internal
//! errors on violations, which would indicate a scheduler bug rather than a
//! user fault.
//!
//! Invariant: the stage index never decreases, and a session never skips an
//! index - `advance` only ever moves to the immediate successor.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::services::datetime_serde;
use crate::value_objects::generic_id::{OwnerId, SessionId, VersionId};
use crate::value_objects::quality_level::QualityLevel;
use crate::value_objects::stage_index::{StageIndex, STAGE_COUNT};

/// Maximum accepted submission length, in characters.
pub const MAX_SUBMISSION_CHARS: usize = 50_000;

/// Observable lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionState {
    Queued,
    Running,
    AwaitingFeedback,
    Completed,
    Failed,
    Cancelled,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Completed | SessionState::Failed | SessionState::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Queued => "queued",
            SessionState::Running => "running",
            SessionState::AwaitingFeedback => "awaiting-feedback",
            SessionState::Completed => "completed",
            SessionState::Failed => "failed",
            SessionState::Cancelled => "cancelled",
        }
    }
}

/// Options supplied with a submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionOptions {
    pub quality: QualityLevel,
    pub hitl_enabled: bool,
    /// Per-stage wall-clock budget overrides in seconds, stages 1..=7.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage_budget_overrides: Option<[u64; STAGE_COUNT]>,
    /// Idempotency token: resubmitting the same (owner, token) pair yields
    /// the same session id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_token: Option<String>,
}

impl Default for SubmissionOptions {
    fn default() -> Self {
        Self {
            quality: QualityLevel::default(),
            hitl_enabled: true,
            stage_budget_overrides: None,
            client_token: None,
        }
    }
}

impl SubmissionOptions {
    /// Effective wall-clock budget for a stage, honouring overrides.
    pub fn stage_budget(&self, stage: StageIndex) -> std::time::Duration {
        match &self.stage_budget_overrides {
            Some(overrides) => std::time::Duration::from_secs(overrides[stage.as_offset()]),
            None => stage.default_budget(),
        }
    }

    /// Expected whole-pipeline duration, the sum of effective budgets.
    pub fn expected_duration(&self) -> std::time::Duration {
        StageIndex::all().map(|s| self.stage_budget(s)).sum()
    }
}

/// One generation session, from submission to terminal state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    id: SessionId,
    owner: OwnerId,
    submission: String,
    options: SubmissionOptions,
    state: SessionState,
    current_stage: StageIndex,
    attempts: [u32; STAGE_COUNT],
    #[serde(with = "datetime_serde")]
    created_at: DateTime<Utc>,
    #[serde(with = "datetime_serde::option")]
    started_at: Option<DateTime<Utc>>,
    #[serde(with = "datetime_serde::option")]
    finished_at: Option<DateTime<Utc>>,
    version_head: Option<VersionId>,
}

impl Session {
    /// Creates a queued session for a validated submission.
    pub fn new(owner: OwnerId, submission: String, options: SubmissionOptions) -> Result<Self, EngineError> {
        let trimmed_len = submission.trim().chars().count();
        if trimmed_len == 0 {
            return Err(EngineError::invalid_input("submission text is empty"));
        }
        if submission.chars().count() > MAX_SUBMISSION_CHARS {
            return Err(EngineError::invalid_input(format!(
                "submission exceeds {} characters",
                MAX_SUBMISSION_CHARS
            )));
        }
        Ok(Self {
            id: SessionId::new(),
            owner,
            submission,
            options,
            state: SessionState::Queued,
            current_stage: StageIndex::first(),
            attempts: [0; STAGE_COUNT],
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            version_head: None,
        })
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn owner(&self) -> OwnerId {
        self.owner
    }

    pub fn submission(&self) -> &str {
        &self.submission
    }

    pub fn options(&self) -> &SubmissionOptions {
        &self.options
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn current_stage(&self) -> StageIndex {
        self.current_stage
    }

    /// Attempts recorded so far for a stage.
    pub fn attempts(&self, stage: StageIndex) -> u32 {
        self.attempts[stage.as_offset()]
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    pub fn version_head(&self) -> Option<VersionId> {
        self.version_head
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Wall-clock time since execution began, in milliseconds.
    pub fn elapsed_ms(&self) -> u64 {
        let start = match self.started_at {
            Some(t) => t,
            None => return 0,
        };
        let end = self.finished_at.unwrap_or_else(Utc::now);
        (end - start).num_milliseconds().max(0) as u64
    }

    /// queued -> running(1)
    pub fn begin(&mut self) -> Result<(), EngineError> {
        if self.state != SessionState::Queued {
            return Err(EngineError::internal(format!(
                "cannot begin session in state {}",
                self.state.as_str()
            )));
        }
        self.state = SessionState::Running;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    /// Records a new attempt of the current stage, returning the one-based
    /// attempt number.
    pub fn begin_attempt(&mut self, stage: StageIndex) -> Result<u32, EngineError> {
        self.expect_running(stage)?;
        let slot = &mut self.attempts[stage.as_offset()];
        *slot += 1;
        Ok(*slot)
    }

    /// running(k) -> awaiting-feedback(k)
    pub fn await_feedback(&mut self, stage: StageIndex) -> Result<(), EngineError> {
        self.expect_running(stage)?;
        self.state = SessionState::AwaitingFeedback;
        Ok(())
    }

    /// awaiting-feedback(k) -> running(k)
    pub fn resume(&mut self) -> Result<(), EngineError> {
        if self.state != SessionState::AwaitingFeedback {
            return Err(EngineError::internal(format!(
                "cannot resume session in state {}",
                self.state.as_str()
            )));
        }
        self.state = SessionState::Running;
        Ok(())
    }

    /// running(k) -> running(k+1). Rejects skips and regressions.
    pub fn advance(&mut self) -> Result<StageIndex, EngineError> {
        self.expect_running(self.current_stage)?;
        let next = self
            .current_stage
            .next()
            .ok_or_else(|| EngineError::internal("cannot advance past the final stage"))?;
        self.current_stage = next;
        Ok(next)
    }

    /// running(7) -> completed
    pub fn complete(&mut self) -> Result<(), EngineError> {
        self.expect_running(self.current_stage)?;
        if !self.current_stage.is_last() {
            return Err(EngineError::internal(format!(
                "cannot complete at stage {}",
                self.current_stage
            )));
        }
        self.state = SessionState::Completed;
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    /// any non-terminal -> failed
    pub fn fail(&mut self) -> Result<(), EngineError> {
        if self.state.is_terminal() {
            return Err(EngineError::internal(format!(
                "cannot fail session in terminal state {}",
                self.state.as_str()
            )));
        }
        self.state = SessionState::Failed;
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    /// any non-terminal -> cancelled. Idempotent: returns whether the state
    /// changed, and never errors on an already-terminal session.
    pub fn cancel(&mut self) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        self.state = SessionState::Cancelled;
        self.finished_at = Some(Utc::now());
        true
    }

    pub fn set_version_head(&mut self, head: VersionId) {
        self.version_head = Some(head);
    }

    fn expect_running(&self, stage: StageIndex) -> Result<(), EngineError> {
        if self.state != SessionState::Running {
            return Err(EngineError::internal(format!(
                "expected running state, found {}",
                self.state.as_str()
            )));
        }
        if stage != self.current_stage {
            return Err(EngineError::internal(format!(
                "expected stage {}, found {}",
                self.current_stage, stage
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> Session {
        Session::new(OwnerId::new(), "A lighthouse keeper finds a map.".to_string(), SubmissionOptions::default())
            .unwrap()
    }

    #[test]
    fn test_submission_validation() {
        assert!(Session::new(OwnerId::new(), "   ".to_string(), SubmissionOptions::default()).is_err());
        let long = "x".repeat(MAX_SUBMISSION_CHARS + 1);
        assert!(Session::new(OwnerId::new(), long, SubmissionOptions::default()).is_err());
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut s = session();
        assert_eq!(s.state(), SessionState::Queued);
        s.begin().unwrap();
        for stage in StageIndex::all() {
            assert_eq!(s.current_stage(), stage);
            assert_eq!(s.begin_attempt(stage).unwrap(), 1);
            if !stage.is_last() {
                s.advance().unwrap();
            }
        }
        s.complete().unwrap();
        assert!(s.is_terminal());
        assert_eq!(s.state(), SessionState::Completed);
    }

    #[test]
    fn test_stage_index_is_monotonic() {
        let mut s = session();
        s.begin().unwrap();
        let first = s.current_stage();
        let next = s.advance().unwrap();
        assert!(next > first);
        // Attempting work on the prior stage is rejected
        assert!(s.begin_attempt(first).is_err());
    }

    #[test]
    fn test_cannot_complete_early() {
        let mut s = session();
        s.begin().unwrap();
        assert!(s.complete().is_err());
    }

    #[test]
    fn test_feedback_rendezvous_transitions() {
        let mut s = session();
        s.begin().unwrap();
        s.await_feedback(StageIndex::first()).unwrap();
        assert_eq!(s.state(), SessionState::AwaitingFeedback);
        // No attempts can start while awaiting feedback
        assert!(s.begin_attempt(StageIndex::first()).is_err());
        s.resume().unwrap();
        assert_eq!(s.state(), SessionState::Running);
    }

    #[test]
    fn test_cancel_is_idempotent_and_final() {
        let mut s = session();
        s.begin().unwrap();
        assert!(s.cancel());
        assert!(!s.cancel());
        assert_eq!(s.state(), SessionState::Cancelled);
        assert!(s.fail().is_err());
    }

    #[test]
    fn test_retry_attempts_accumulate() {
        let mut s = session();
        s.begin().unwrap();
        let stage = s.current_stage();
        assert_eq!(s.begin_attempt(stage).unwrap(), 1);
        assert_eq!(s.begin_attempt(stage).unwrap(), 2);
        assert_eq!(s.attempts(stage), 2);
    }

    #[test]
    fn test_budget_overrides() {
        let mut options = SubmissionOptions::default();
        assert_eq!(options.stage_budget(StageIndex::first()).as_secs(), 12);
        options.stage_budget_overrides = Some([1, 1, 1, 1, 2, 1, 1]);
        assert_eq!(options.stage_budget(StageIndex::first()).as_secs(), 1);
        assert_eq!(options.expected_duration().as_secs(), 8);
    }
}
