// /////////////////////////////////////////////////////////////////////////////
// Comicforge
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Pipeline scenario tests: the happy path, quality retry into fallback,
//! transient stage-5 failures, and cancellation mid-fan-out.

use std::time::{Duration, Instant};

use comicforge_domain::{EventPayload, OwnerId, SessionState, StageIndex, StageOutput};

use crate::common;

#[tokio::test]
async fn test_happy_path_without_hitl() {
    let (scheduler, _text, _image) = common::build_engine(common::fast_config());
    let receipt = scheduler
        .submit(OwnerId::new(), common::story(), common::options(false))
        .await
        .unwrap();
    let session_id = receipt.session_id;

    let events = receipt.events.collect_to_end().await.unwrap();

    // Seven stage-completed events, strictly in stage order
    let completed: Vec<u8> = events
        .iter()
        .filter(|e| e.kind() == "stage-completed")
        .map(|e| e.stage.unwrap().value())
        .collect();
    assert_eq!(completed, vec![1, 2, 3, 4, 5, 6, 7]);

    // Causal order: stage-completed(k) precedes stage-started(k+1)
    for k in 1..7u8 {
        let completed_at = events
            .iter()
            .position(|e| e.kind() == "stage-completed" && e.stage.map(|s| s.value()) == Some(k))
            .unwrap();
        let next_started = events
            .iter()
            .position(|e| e.kind() == "stage-started" && e.stage.map(|s| s.value()) == Some(k + 1))
            .unwrap();
        assert!(completed_at < next_started, "stage {} completion must precede stage {} start", k, k + 1);
    }

    // Sequences are monotonic
    for window in events.windows(2) {
        assert!(window[0].sequence < window[1].sequence);
    }

    // Terminal event carries the artifact pointer and a passing quality
    match &events.last().unwrap().payload {
        EventPayload::PipelineCompleted {
            artifact_pointer,
            overall_quality,
            ..
        } => {
            assert!(artifact_pointer.starts_with("artifact://sessions/"));
            assert!(*overall_quality >= 0.70, "overall quality {} below target", overall_quality);
        }
        other => panic!("expected pipeline-completed, got {:?}", other),
    }

    scheduler.join_session(session_id).await.unwrap();
    assert_eq!(scheduler.session_snapshot(session_id).unwrap().state(), SessionState::Completed);

    // The final artifact has at least one page
    let log = scheduler.version_log(session_id).unwrap();
    match log.current_result(StageIndex::last()).unwrap().output() {
        StageOutput::Final(fin) => {
            assert!(!fin.pages.is_empty());
            assert!(fin.stats.degraded_sections.is_empty());
        }
        other => panic!("expected final output, got {:?}", other),
    }
}

#[tokio::test]
async fn test_quality_retry_then_fallback() {
    // Stage 3 scores 0.60, 0.65, 0.68 against T = 0.70 with three attempts
    let (scheduler, _text, _image) =
        common::build_engine_with_scripted_scores(common::fast_config(), 3, vec![0.60, 0.65, 0.68]);

    let receipt = scheduler
        .submit(OwnerId::new(), common::story(), common::options(false))
        .await
        .unwrap();
    let session_id = receipt.session_id;
    let events = receipt.events.collect_to_end().await.unwrap();

    // Pipeline continues to completion despite the stage 3 shortfall
    assert_eq!(events.last().unwrap().kind(), "pipeline-completed");

    scheduler.join_session(session_id).await.unwrap();
    let session = scheduler.session_snapshot(session_id).unwrap();
    assert_eq!(session.attempts(StageIndex::new(3).unwrap()), 3, "three attempts logged");

    // The version log archives every attempt; the settled transition is
    // tagged fallback and the current stage-3 result is a placeholder.
    let log = scheduler.version_log(session_id).unwrap();
    let stage3: Vec<_> = log
        .versions_in_order()
        .filter(|v| v.stage.value() == 3)
        .collect();
    assert!(stage3.len() >= 4, "attempt checkpoints plus the fallback, got {}", stage3.len());
    assert!(stage3.iter().any(|v| v.tags.contains(&"fallback".to_string())));
    assert!(log.current_result(StageIndex::new(3).unwrap()).unwrap().is_placeholder());

    // Degradation is noted in the final artifact
    match log.current_result(StageIndex::last()).unwrap().output() {
        StageOutput::Final(fin) => {
            assert!(fin.stats.degraded_sections.contains(&"plot".to_string()));
        }
        other => panic!("expected final output, got {:?}", other),
    }
}

#[tokio::test]
async fn test_transient_image_failure_recovers() {
    let (scheduler, _text, image) = common::build_engine(common::fast_config());
    // First render attempt of every prompt containing "angle" fails once;
    // only one panel absorbs the single injected failure.
    image.inject_transient_failures("angle", 1);

    let receipt = scheduler
        .submit(OwnerId::new(), common::story(), common::options(false))
        .await
        .unwrap();
    let session_id = receipt.session_id;
    let events = receipt.events.collect_to_end().await.unwrap();
    assert_eq!(events.last().unwrap().kind(), "pipeline-completed");

    scheduler.join_session(session_id).await.unwrap();
    let log = scheduler.version_log(session_id).unwrap();
    match log.current_result(StageIndex::new(5).unwrap()).unwrap().output() {
        StageOutput::SceneImages(images) => {
            assert!(images.images.iter().all(|i| !i.placeholder), "the transient failure recovered");
            assert!((0.0..=1.0).contains(&images.efficiency), "efficiency recorded");
        }
        other => panic!("expected scene images, got {:?}", other),
    }
}

#[tokio::test]
async fn test_cancel_during_image_fanout() {
    let mut config = common::fast_config();
    config.retry.cap_secs = 1;
    let (scheduler, _text, image) = common::build_engine(config);
    // Every render keeps failing transiently, pinning stage 5 in backoff
    image.inject_transient_failures("angle", 1000);

    let receipt = scheduler
        .submit(OwnerId::new(), common::story(), common::options(false))
        .await
        .unwrap();
    let session_id = receipt.session_id;

    let mut events = receipt.events;
    let mut observed = Vec::new();
    let mut cancelled_at = None;
    while let Some(event) = events.recv().await.unwrap() {
        if event.kind() == "stage-started" && event.stage.map(|s| s.value()) == Some(5) && cancelled_at.is_none() {
            scheduler.cancel(session_id).unwrap();
            cancelled_at = Some(Instant::now());
        }
        observed.push(event);
    }

    let cancelled_at = cancelled_at.expect("stage 5 started before the stream ended");
    assert!(
        cancelled_at.elapsed() <= Duration::from_secs(4),
        "cancellation settled within two backoff periods"
    );

    assert_eq!(observed.last().unwrap().kind(), "pipeline-cancelled");
    assert!(
        !observed
            .iter()
            .any(|e| e.kind() == "stage-completed" && e.stage.map(|s| s.value()).unwrap_or(0) >= 5),
        "no stage completes after the cancel"
    );

    let _ = scheduler.join_session(session_id).await;
    assert_eq!(scheduler.session_snapshot(session_id).unwrap().state(), SessionState::Cancelled);

    // Checkpoints exist only for stages settled before the cancel
    let log = scheduler.version_log(session_id).unwrap();
    assert!(log.versions_in_order().all(|v| v.stage.value() <= 4));
}

#[tokio::test]
async fn test_critical_stage_exhaustion_fails_session() {
    // Stage 5 marked critical and scored below threshold on every attempt:
    // retry exhaustion must fail the session instead of falling back.
    let mut config = common::fast_config();
    config.stages.critical_stages = vec![5];
    let (scheduler, _text, _image) =
        common::build_engine_with_scripted_scores(config, 5, vec![0.2, 0.2, 0.2]);

    let receipt = scheduler
        .submit(OwnerId::new(), common::story(), common::options(false))
        .await
        .unwrap();
    let session_id = receipt.session_id;
    let events = receipt.events.collect_to_end().await.unwrap();

    assert_eq!(events.last().unwrap().kind(), "pipeline-failed");
    let _ = scheduler.join_session(session_id).await;
    assert_eq!(scheduler.session_snapshot(session_id).unwrap().state(), SessionState::Failed);

    // The failed attempts were still scored and archived
    let log = scheduler.version_log(session_id).unwrap();
    assert!(log.versions_in_order().any(|v| v.stage.value() == 5));
}
