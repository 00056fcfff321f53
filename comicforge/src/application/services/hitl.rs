// /////////////////////////////////////////////////////////////////////////////
// Comicforge
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # HITL Coordinator
//!
//! The bounded rendezvous between a stage boundary and an external
//! observer. Per (session, stage) exactly one of three events wins:
//! feedback received, timeout, or session cancel.
//!
//! ## Protocol Errors
//!
//! Feedback submission fails with:
//! - `not-awaiting` - no rendezvous is open for the session
//! - `wrong-stage` - a rendezvous is open, but for a different stage
//! - `stage-closed` - this stage's rendezvous already resolved (including
//!   the race where the timer fired an instant earlier)
//!
//! ## Exactly-once
//!
//! The envelope is minted inside `submit_feedback` only after the slot's
//! sender is taken under the coordinator lock, so an envelope can apply to
//! at most one transition. At `t = timeout +/- epsilon` the slot is either taken by
//! the submitter (feedback wins - the rendezvous select polls the receiver
//! before the timer) or already resolved (the submitter observes
//! `stage-closed`); never both.

use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::debug;

use comicforge_bootstrap::CancellationToken;
use comicforge_domain::value_objects::feedback::{FeedbackEnvelope, FeedbackKind};
use comicforge_domain::{EngineError, SessionId, StageIndex};

/// How a rendezvous resolved.
#[derive(Debug)]
pub enum RendezvousOutcome {
    /// An observer intervened (real feedback or an explicit skip).
    Feedback(FeedbackEnvelope),
    /// The deadline passed with no intervention.
    Timeout,
    /// The session was cancelled while waiting.
    Cancelled,
}

struct Slot {
    stage: StageIndex,
    tx: Option<oneshot::Sender<FeedbackEnvelope>>,
}

#[derive(Default)]
struct SessionFeedbackState {
    /// Stages whose rendezvous has already resolved.
    closed_stages: BTreeSet<u8>,
    /// Envelope sequence counter.
    next_sequence: u64,
}

/// Coordinates feedback rendezvous across all sessions.
#[derive(Default)]
pub struct HitlCoordinator {
    slots: Mutex<HashMap<SessionId, Slot>>,
    state: Mutex<HashMap<SessionId, SessionFeedbackState>>,
}

impl HitlCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a rendezvous and waits for one of the three terminating
    /// events. The slot is closed on return, whatever won.
    pub async fn rendezvous(
        &self,
        session_id: SessionId,
        stage: StageIndex,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> RendezvousOutcome {
        let (tx, rx) = oneshot::channel();
        self.slots.lock().insert(
            session_id,
            Slot {
                stage,
                tx: Some(tx),
            },
        );
        debug!(session = %session_id, stage = %stage, ?timeout, "rendezvous open");

        // Feedback is polled before the timer so a deadline-instant envelope
        // is accepted, not dropped.
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => RendezvousOutcome::Cancelled,
            envelope = rx => match envelope {
                Ok(envelope) => RendezvousOutcome::Feedback(envelope),
                Err(_) => RendezvousOutcome::Timeout,
            },
            _ = tokio::time::sleep(timeout) => RendezvousOutcome::Timeout,
        };

        self.slots.lock().remove(&session_id);
        self.state
            .lock()
            .entry(session_id)
            .or_default()
            .closed_stages
            .insert(stage.value());

        debug!(session = %session_id, stage = %stage, outcome = ?std::mem::discriminant(&outcome), "rendezvous resolved");
        outcome
    }

    /// Delivers observer feedback into an open rendezvous.
    pub fn submit_feedback(
        &self,
        session_id: SessionId,
        stage: StageIndex,
        kind: FeedbackKind,
        content: Option<String>,
    ) -> Result<FeedbackEnvelope, EngineError> {
        let mut slots = self.slots.lock();
        match slots.get_mut(&session_id) {
            Some(slot) if slot.stage == stage => {
                let tx = slot
                    .tx
                    .take()
                    .ok_or_else(|| EngineError::stage_closed(format!("stage {} already received feedback", stage)))?;
                let sequence = self.next_sequence(session_id);
                let envelope = FeedbackEnvelope::observer(session_id, stage, sequence, kind, content);
                tx.send(envelope.clone())
                    .map_err(|_| EngineError::stage_closed(format!("stage {} rendezvous just resolved", stage)))?;
                Ok(envelope)
            }
            Some(slot) => Err(EngineError::wrong_stage(format!(
                "session is awaiting feedback for stage {}, not {}",
                slot.stage, stage
            ))),
            None => {
                let closed = self
                    .state
                    .lock()
                    .get(&session_id)
                    .map(|s| s.closed_stages.contains(&stage.value()))
                    .unwrap_or(false);
                if closed {
                    Err(EngineError::stage_closed(format!("stage {} rendezvous already resolved", stage)))
                } else {
                    Err(EngineError::not_awaiting("no feedback rendezvous is open"))
                }
            }
        }
    }

    /// Mints the synthetic envelope recorded when a rendezvous times out.
    pub fn mint_default_accepted(&self, session_id: SessionId, stage: StageIndex) -> FeedbackEnvelope {
        let sequence = self.next_sequence(session_id);
        FeedbackEnvelope::default_accepted(session_id, stage, sequence)
    }

    /// Deadline carried by the `awaiting-feedback` event.
    pub fn deadline_for(timeout: Duration) -> DateTime<Utc> {
        Utc::now() + chrono::Duration::from_std(timeout).unwrap_or_else(|_| chrono::Duration::seconds(30))
    }

    /// Clears per-session state once the session is terminal and retention
    /// elapses.
    pub fn forget_session(&self, session_id: SessionId) {
        self.slots.lock().remove(&session_id);
        self.state.lock().remove(&session_id);
    }

    fn next_sequence(&self, session_id: SessionId) -> u64 {
        let mut state = self.state.lock();
        let entry = state.entry(session_id).or_default();
        let sequence = entry.next_sequence;
        entry.next_sequence += 1;
        sequence
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn stage(n: u8) -> StageIndex {
        StageIndex::new(n).unwrap()
    }

    #[tokio::test]
    async fn test_feedback_resolves_rendezvous() {
        let coordinator = Arc::new(HitlCoordinator::new());
        let session = SessionId::new();
        let cancel = CancellationToken::new();

        let submitter = Arc::clone(&coordinator);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            submitter
                .submit_feedback(session, stage(3), FeedbackKind::QuickOption, Some("faster-pacing".to_string()))
                .unwrap();
        });

        match coordinator.rendezvous(session, stage(3), Duration::from_secs(5), &cancel).await {
            RendezvousOutcome::Feedback(envelope) => {
                assert_eq!(envelope.stage, stage(3));
                assert_eq!(envelope.content.as_deref(), Some("faster-pacing"));
            }
            other => panic!("expected feedback, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_timeout_resolution() {
        let coordinator = HitlCoordinator::new();
        let session = SessionId::new();
        let outcome = coordinator
            .rendezvous(session, stage(3), Duration::from_millis(20), &CancellationToken::new())
            .await;
        assert!(matches!(outcome, RendezvousOutcome::Timeout));
    }

    #[tokio::test]
    async fn test_cancel_wins_over_timer() {
        let coordinator = HitlCoordinator::new();
        let session = SessionId::new();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = coordinator
            .rendezvous(session, stage(3), Duration::from_secs(5), &cancel)
            .await;
        assert!(matches!(outcome, RendezvousOutcome::Cancelled));
    }

    #[tokio::test]
    async fn test_protocol_errors() {
        let coordinator = Arc::new(HitlCoordinator::new());
        let session = SessionId::new();

        // Nothing open yet
        let err = coordinator
            .submit_feedback(session, stage(3), FeedbackKind::Skip, None)
            .unwrap_err();
        assert_eq!(err.kind(), "not-awaiting");

        // Open stage 3, address stage 5
        let waiter = Arc::clone(&coordinator);
        let handle = tokio::spawn(async move {
            waiter
                .rendezvous(session, stage(3), Duration::from_millis(200), &CancellationToken::new())
                .await
        });
        tokio::time::sleep(Duration::from_millis(30)).await;

        let err = coordinator
            .submit_feedback(session, stage(5), FeedbackKind::Skip, None)
            .unwrap_err();
        assert_eq!(err.kind(), "wrong-stage");

        // Let the rendezvous time out, then the stage is closed
        handle.await.unwrap();
        let err = coordinator
            .submit_feedback(session, stage(3), FeedbackKind::Skip, None)
            .unwrap_err();
        assert_eq!(err.kind(), "stage-closed");
    }

    #[tokio::test]
    async fn test_envelope_applies_exactly_once() {
        let coordinator = Arc::new(HitlCoordinator::new());
        let session = SessionId::new();

        let waiter = Arc::clone(&coordinator);
        let handle = tokio::spawn(async move {
            waiter
                .rendezvous(session, stage(6), Duration::from_secs(5), &CancellationToken::new())
                .await
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        coordinator
            .submit_feedback(session, stage(6), FeedbackKind::NaturalLanguage, Some("more rain".to_string()))
            .unwrap();
        // Second delivery against the same rendezvous is rejected
        let err = coordinator
            .submit_feedback(session, stage(6), FeedbackKind::Skip, None)
            .unwrap_err();
        assert!(err.is_hitl_protocol_error());

        assert!(matches!(handle.await.unwrap(), RendezvousOutcome::Feedback(_)));
    }

    #[tokio::test]
    async fn test_sequences_are_monotonic_per_session() {
        let coordinator = HitlCoordinator::new();
        let session = SessionId::new();
        let a = coordinator.mint_default_accepted(session, stage(3));
        let b = coordinator.mint_default_accepted(session, stage(6));
        assert_eq!(a.sequence, 0);
        assert_eq!(b.sequence, 1);
    }
}
