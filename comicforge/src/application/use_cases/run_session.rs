// /////////////////////////////////////////////////////////////////////////////
// Comicforge
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Run Session Use Case
//!
//! Submits a story, streams events until the pipeline terminates, and
//! returns the final artifact (when one exists). This is the CLI's `run`
//! subcommand and the canonical embedding example for driving the engine.

use tracing::info;

use comicforge_bootstrap::CancellationToken;
use comicforge_domain::{
    EngineError, FinalOutput, OwnerId, SessionEvent, SessionId, SessionState, StageOutput, SubmissionOptions,
};

use crate::application::services::scheduler::SessionScheduler;

/// Outcome of one driven session.
#[derive(Debug)]
pub struct RunOutcome {
    pub session_id: SessionId,
    pub state: SessionState,
    pub artifact: Option<FinalOutput>,
    pub events_observed: usize,
}

pub struct RunSessionUseCase {
    scheduler: SessionScheduler,
}

impl RunSessionUseCase {
    pub fn new(scheduler: SessionScheduler) -> Self {
        Self { scheduler }
    }

    /// Submits and drives one session to its terminal state.
    ///
    /// `on_event` observes every streamed event (the CLI prints them);
    /// `interrupt` cancels the session when tripped (the CLI wires Ctrl-C
    /// here).
    pub async fn run(
        &self,
        owner: OwnerId,
        story: String,
        options: SubmissionOptions,
        interrupt: CancellationToken,
        mut on_event: impl FnMut(&SessionEvent),
    ) -> Result<RunOutcome, EngineError> {
        let receipt = self.scheduler.submit(owner, story, options).await?;
        let session_id = receipt.session_id;
        info!(session = %session_id, expected = ?receipt.expected_duration, "session submitted");

        let canceller = {
            let scheduler = self.scheduler.clone();
            tokio::spawn(async move {
                interrupt.cancelled().await;
                let _ = scheduler.cancel(session_id);
            })
        };

        let mut events = receipt.events;
        let mut events_observed = 0usize;
        while let Some(event) = events.recv().await? {
            events_observed += 1;
            on_event(&event);
            if event.payload.is_terminal() {
                break;
            }
        }

        canceller.abort();
        self.scheduler.join_session(session_id).await.ok();
        let state = self.scheduler.session_snapshot(session_id)?.state();
        let artifact = self.final_artifact(session_id);

        Ok(RunOutcome {
            session_id,
            state,
            artifact,
            events_observed,
        })
    }

    /// The stage-7 output on the active branch, if the pipeline got there.
    fn final_artifact(&self, session_id: SessionId) -> Option<FinalOutput> {
        let log = self.scheduler.version_log(session_id).ok()?;
        match log.current_result(comicforge_domain::StageIndex::last())?.output() {
            StageOutput::Final(fin) => Some(fin.clone()),
            _ => None,
        }
    }
}
