// /////////////////////////////////////////////////////////////////////////////
// Comicforge
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Journal reconstruction over the durable file journal: a completed
//! session replays with its artifact pointer, and an interrupted stream
//! recovers as failed.

use std::sync::Arc;

use comicforge::application::use_cases::replay_session::ReplaySessionUseCase;
use comicforge::infrastructure::adapters::{ScriptedImageModel, ScriptedTextModel};
use comicforge::infrastructure::persistence::FileJournal;
use comicforge::EngineBuilder;
use comicforge_domain::{OwnerId, SessionState};

use crate::common;

#[tokio::test]
async fn test_completed_session_replays_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let journal = Arc::new(FileJournal::open(dir.path()).await.unwrap());

    let scheduler = EngineBuilder::new(
        common::fast_config(),
        Arc::new(ScriptedTextModel::new()),
        Arc::new(ScriptedImageModel::new()),
        Arc::clone(&journal) as Arc<dyn comicforge_domain::SessionJournal>,
    )
    .build()
    .unwrap();

    let receipt = scheduler
        .submit(OwnerId::new(), common::story(), common::options(false))
        .await
        .unwrap();
    let session_id = receipt.session_id;
    receipt.events.collect_to_end().await.unwrap();
    scheduler.join_session(session_id).await.unwrap();

    // A second journal handle over the same root, as a restarted process
    // would open
    let reopened = Arc::new(FileJournal::open(dir.path()).await.unwrap());
    let use_case = ReplaySessionUseCase::new(reopened);

    let sessions = use_case.list_sessions().await.unwrap();
    assert_eq!(sessions, vec![session_id]);

    let report = use_case.replay(session_id).await.unwrap();
    assert_eq!(report.state, SessionState::Completed);
    assert!(!report.recovered);
    assert!(report.checkpoints >= 7);
    assert_eq!(report.last_stage.as_deref(), Some("final"));
    assert!(report.artifact_pointer.as_deref().unwrap().starts_with("artifact://"));
}

#[tokio::test]
async fn test_cancelled_session_replays_without_artifact() {
    let dir = tempfile::tempdir().unwrap();
    let journal = Arc::new(FileJournal::open(dir.path()).await.unwrap());

    let scheduler = EngineBuilder::new(
        common::fast_config(),
        Arc::new(ScriptedTextModel::new()),
        Arc::new(ScriptedImageModel::new()),
        Arc::clone(&journal) as Arc<dyn comicforge_domain::SessionJournal>,
    )
    .build()
    .unwrap();

    let receipt = scheduler
        .submit(OwnerId::new(), common::story(), common::options(false))
        .await
        .unwrap();
    let session_id = receipt.session_id;
    scheduler.cancel(session_id).unwrap();
    receipt.events.collect_to_end().await.unwrap();
    let _ = scheduler.join_session(session_id).await;

    let report = ReplaySessionUseCase::new(journal).replay(session_id).await.unwrap();
    assert_eq!(report.state, SessionState::Cancelled);
    assert!(!report.recovered);
    assert!(report.artifact_pointer.is_none());
}
