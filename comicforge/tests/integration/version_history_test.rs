// /////////////////////////////////////////////////////////////////////////////
// Comicforge
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Version history over a completed run: diff, restore, and the
//! current-result view through the scheduler facade.

use comicforge_domain::{OwnerId, StageIndex};

use crate::common;

#[tokio::test]
async fn test_diff_and_restore_after_completion() {
    let (scheduler, _t, _i) = common::build_engine(common::fast_config());
    let receipt = scheduler
        .submit(OwnerId::new(), common::story(), common::options(false))
        .await
        .unwrap();
    let session_id = receipt.session_id;
    receipt.events.collect_to_end().await.unwrap();
    scheduler.join_session(session_id).await.unwrap();

    let log = scheduler.version_log(session_id).unwrap();
    assert!(log.len() >= 7, "one checkpoint per settled stage at minimum");

    // Diff a version against itself: identical, similarity 1.0
    let first = log.versions_in_order().next().unwrap().id;
    let last = log.versions_in_order().last().unwrap().id;
    let same = scheduler.diff(session_id, first, first).unwrap();
    assert!(same.is_identical());
    assert_eq!(same.similarity, 1.0);

    // Different stages diff as wholly different payloads
    let cross = scheduler.diff(session_id, first, last).unwrap();
    assert!(!cross.is_identical());
    assert!(cross.similarity < 1.0);

    // Restore an early version: a fresh branch rooted there, head equal to
    // the restored version, existing versions untouched
    let before = log.len();
    let branch = scheduler.restore(session_id, first).unwrap();
    let log = scheduler.version_log(session_id).unwrap();
    assert_eq!(log.current_branch(), branch);
    assert_eq!(log.head(), Some(first));
    assert_eq!(log.len(), before, "restore mints no new version");
}

#[tokio::test]
async fn test_current_results_cover_all_stages() {
    let (scheduler, _t, _i) = common::build_engine(common::fast_config());
    let receipt = scheduler
        .submit(OwnerId::new(), common::story(), common::options(false))
        .await
        .unwrap();
    let session_id = receipt.session_id;
    receipt.events.collect_to_end().await.unwrap();
    scheduler.join_session(session_id).await.unwrap();

    let log = scheduler.version_log(session_id).unwrap();
    for stage in StageIndex::all() {
        let result = log.current_result(stage).unwrap_or_else(|| panic!("stage {} has a current result", stage));
        assert_eq!(result.stage(), stage);
        assert_eq!(result.output().stage(), stage);
    }
}
