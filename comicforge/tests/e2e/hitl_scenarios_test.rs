// /////////////////////////////////////////////////////////////////////////////
// Comicforge
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! HITL scenario tests: feedback delivery, timeout fallback, and the
//! protocol error surface around the rendezvous.

use std::time::{Duration, Instant};

use comicforge_domain::{
    EventPayload, FeedbackKind, FeedbackOrigin, OwnerId, SessionState, StageIndex, StageOutput, VersionAuthor,
};

use crate::common;

/// HITL only at stage 3, with a short window.
fn hitl_config(timeout_secs: u64) -> comicforge::infrastructure::config::EngineConfig {
    let mut config = common::fast_config();
    config.hitl.enabled_stages = vec![3];
    config.hitl.timeout_secs = timeout_secs;
    config
}

#[tokio::test]
async fn test_feedback_applies_a_pacing_modifier() {
    // Baseline run without feedback, for comparison
    let (baseline, _t, _i) = common::build_engine(hitl_config(1));
    let receipt = baseline
        .submit(OwnerId::new(), common::story(), common::options(false))
        .await
        .unwrap();
    receipt.events.collect_to_end().await.unwrap();
    let baseline_panels = match baseline
        .version_log(receipt.session_id)
        .unwrap()
        .current_result(StageIndex::new(4).unwrap())
        .unwrap()
        .output()
    {
        StageOutput::Storyboard(storyboard) => storyboard.panel_count(),
        other => panic!("expected storyboard, got {:?}", other),
    };

    // HITL run: deliver "faster-pacing" at stage 3's rendezvous
    let (scheduler, _t, _i) = common::build_engine(hitl_config(10));
    let receipt = scheduler
        .submit(OwnerId::new(), common::story(), common::options(true))
        .await
        .unwrap();
    let session_id = receipt.session_id;

    let mut events = receipt.events;
    let mut awaiting_seen = false;
    let mut accepted_latency = None;
    let mut all = Vec::new();
    while let Some(event) = events.recv().await.unwrap() {
        match &event.payload {
            EventPayload::AwaitingFeedback { stage, .. } if stage.value() == 3 => {
                awaiting_seen = true;
                let sent = Instant::now();
                let ack = scheduler
                    .submit_feedback(
                        session_id,
                        StageIndex::new(3).unwrap(),
                        FeedbackKind::QuickOption,
                        Some("faster-pacing".to_string()),
                    )
                    .unwrap();
                assert!(ack.accepted);
                assert_eq!(ack.next_stage, Some(StageIndex::new(4).unwrap()));
                accepted_latency = Some(sent);
            }
            EventPayload::FeedbackAccepted { origin, .. } => {
                assert_eq!(*origin, FeedbackOrigin::Observer);
                let sent = accepted_latency.expect("feedback submitted before acceptance");
                assert!(sent.elapsed() <= Duration::from_secs(1), "feedback-accepted within 1s");
            }
            _ => {}
        }
        all.push(event);
    }
    assert!(awaiting_seen, "stage 3 opened a rendezvous");
    assert_eq!(all.last().unwrap().kind(), "pipeline-completed");

    scheduler.join_session(session_id).await.unwrap();

    // The version log contains a feedback-derived version
    let log = scheduler.version_log(session_id).unwrap();
    assert!(log
        .versions_in_order()
        .any(|v| v.author == VersionAuthor::UserFeedbackApplied));

    // Stage 4 honoured the pacing modifier: fewer panels than baseline
    let paced_panels = match log.current_result(StageIndex::new(4).unwrap()).unwrap().output() {
        StageOutput::Storyboard(storyboard) => storyboard.panel_count(),
        other => panic!("expected storyboard, got {:?}", other),
    };
    assert!(
        paced_panels < baseline_panels,
        "pacing modifier reduced panel density ({} < {})",
        paced_panels,
        baseline_panels
    );
}

#[tokio::test]
async fn test_timeout_accepts_the_default() {
    let (scheduler, _t, _i) = common::build_engine(hitl_config(2));
    let receipt = scheduler
        .submit(OwnerId::new(), common::story(), common::options(true))
        .await
        .unwrap();

    let mut events = receipt.events;
    let mut awaiting_at = None;
    let mut accepted_origin = None;
    while let Some(event) = events.recv().await.unwrap() {
        match &event.payload {
            EventPayload::AwaitingFeedback { stage, deadline } if stage.value() == 3 => {
                awaiting_at = Some(Instant::now());
                assert!(*deadline > chrono::Utc::now(), "deadline lies in the future");
            }
            EventPayload::FeedbackAccepted { origin, .. } => {
                let opened = awaiting_at.expect("awaiting-feedback precedes feedback-accepted");
                assert!(
                    opened.elapsed() <= Duration::from_millis(2500),
                    "default accepted within the 2s window plus slack"
                );
                accepted_origin = Some(*origin);
            }
            _ => {}
        }
        if event.payload.is_terminal() {
            assert_eq!(event.kind(), "pipeline-completed", "pipeline continues after timeout");
        }
    }
    assert_eq!(accepted_origin, Some(FeedbackOrigin::DefaultAccepted));
}

#[tokio::test]
async fn test_feedback_after_timeout_is_stage_closed() {
    let (scheduler, _t, _i) = common::build_engine(hitl_config(1));
    let receipt = scheduler
        .submit(OwnerId::new(), common::story(), common::options(true))
        .await
        .unwrap();
    let session_id = receipt.session_id;

    let mut events = receipt.events;
    let mut checked = false;
    while let Some(event) = events.recv().await.unwrap() {
        // After the rendezvous resolved by timeout, a late envelope for the
        // same stage is rejected as stage-closed.
        if let EventPayload::FeedbackAccepted { stage, .. } = &event.payload {
            let err = scheduler
                .submit_feedback(session_id, *stage, FeedbackKind::Skip, None)
                .unwrap_err();
            assert_eq!(err.kind(), "stage-closed");
            checked = true;
        }
    }
    assert!(checked, "a rendezvous resolved during the run");
}

#[tokio::test]
async fn test_wrong_stage_feedback_rejected() {
    let (scheduler, _t, _i) = common::build_engine(hitl_config(5));
    let receipt = scheduler
        .submit(OwnerId::new(), common::story(), common::options(true))
        .await
        .unwrap();
    let session_id = receipt.session_id;

    let mut events = receipt.events;
    while let Some(event) = events.recv().await.unwrap() {
        if let EventPayload::AwaitingFeedback { stage, .. } = &event.payload {
            let err = scheduler
                .submit_feedback(session_id, StageIndex::new(6).unwrap(), FeedbackKind::Skip, None)
                .unwrap_err();
            assert_eq!(err.kind(), "wrong-stage");

            // Unblock the run with a skip on the right stage
            let ack = scheduler
                .submit_feedback(session_id, *stage, FeedbackKind::Skip, None)
                .unwrap();
            assert!(ack.accepted);
        }
    }

    scheduler.join_session(session_id).await.unwrap();
    let log = scheduler.version_log(session_id).unwrap();
    // The skip is archived as user-skipped
    assert!(log
        .versions_in_order()
        .any(|v| v.tags.contains(&"user-skipped".to_string())));
}
