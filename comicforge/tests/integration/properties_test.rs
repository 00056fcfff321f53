// /////////////////////////////////////////////////////////////////////////////
// Comicforge
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Property tests over the version DAG and the cache key.

use std::collections::BTreeMap;

use proptest::prelude::*;

use comicforge_domain::{
    ConceptOutput, ImageCacheKey, QualityScore, SessionId, StageIndex, StageOutput, StageResult, VersionAuthor,
    VersionLog,
};

fn concept_result(session: SessionId, attempt: u32, theme: String) -> StageResult {
    StageResult::new(
        session,
        StageIndex::first(),
        attempt,
        "fp".to_string(),
        StageOutput::Concept(ConceptOutput {
            theme,
            genres: vec![],
            world_setting: "w".to_string(),
            target_audience: "teen".to_string(),
            estimated_pages: 1,
        }),
        QualityScore::clamped(0.8),
        1,
        vec![],
    )
}

/// One randomised operation against the log.
#[derive(Debug, Clone)]
enum LogOp {
    Checkpoint(String),
    /// Branch off the version at this index (modulo the log length).
    Branch(usize, String),
    /// Switch to the branch at this index (modulo the branch count).
    Switch(usize),
    /// Restore the version at this index (modulo the log length).
    Restore(usize),
}

fn log_op_strategy() -> impl Strategy<Value = LogOp> {
    prop_oneof![
        "[a-z]{3,8}".prop_map(LogOp::Checkpoint),
        (any::<usize>(), "[a-z]{3,8}").prop_map(|(i, name)| LogOp::Branch(i, name)),
        any::<usize>().prop_map(LogOp::Switch),
        any::<usize>().prop_map(LogOp::Restore),
    ]
}

proptest! {
    /// Whatever sequence of operations runs, the DAG invariants hold:
    /// every parent edge targets an existing version, ids are unique, the
    /// head of every branch exists, and append order is preserved.
    #[test]
    fn prop_version_dag_invariants(ops in proptest::collection::vec(log_op_strategy(), 1..40)) {
        let session = SessionId::new();
        let mut log = VersionLog::new(session);
        let mut attempt = 0u32;

        for op in ops {
            match op {
                LogOp::Checkpoint(theme) => {
                    attempt += 1;
                    log.checkpoint(concept_result(session, attempt, theme), VersionAuthor::System, "cp", vec![])
                        .unwrap();
                }
                LogOp::Branch(index, name) => {
                    let ids: Vec<_> = log.versions_in_order().map(|v| v.id).collect();
                    if !ids.is_empty() {
                        let base = ids[index % ids.len()];
                        // Duplicate names are rejected, which is itself the invariant
                        let _ = log.branch(base, name);
                    }
                }
                LogOp::Switch(index) => {
                    let names: Vec<String> = log.branch_names().iter().map(|s| s.to_string()).collect();
                    let name = names[index % names.len()].clone();
                    log.switch(&name).unwrap();
                }
                LogOp::Restore(index) => {
                    let ids: Vec<_> = log.versions_in_order().map(|v| v.id).collect();
                    if !ids.is_empty() {
                        let target = ids[index % ids.len()];
                        let branch = log.restore(target).unwrap();
                        prop_assert_eq!(log.current_branch(), branch);
                        prop_assert_eq!(log.head(), Some(target));
                    }
                }
            }

            // Parent edges always resolve within the log
            for version in log.versions_in_order() {
                if let Some(parent) = version.parent {
                    prop_assert!(log.version(parent).is_some(), "dangling parent edge");
                }
            }
            // Ids are never recycled
            let mut ids: Vec<_> = log.versions_in_order().map(|v| v.id).collect();
            let total = ids.len();
            ids.sort();
            ids.dedup();
            prop_assert_eq!(ids.len(), total, "duplicate version id");
            // Every branch head is a known version
            for name in log.branch_names() {
                let mut probe = log.clone();
                probe.switch(name).unwrap();
                if let Some(head) = probe.head() {
                    prop_assert!(probe.version(head).is_some());
                }
            }
        }
    }

    /// Restore-then-checkpoint parents the new version at the restored one.
    #[test]
    fn prop_restore_then_checkpoint_parents_at_restored(extra in 1usize..6) {
        let session = SessionId::new();
        let mut log = VersionLog::new(session);
        let first = log
            .checkpoint(concept_result(session, 1, "origin".to_string()), VersionAuthor::System, "cp", vec![])
            .unwrap();
        for i in 0..extra {
            log.checkpoint(
                concept_result(session, 2 + i as u32, format!("rev{}", i)),
                VersionAuthor::System,
                "cp",
                vec![],
            )
            .unwrap();
        }

        log.restore(first).unwrap();
        let appended = log
            .checkpoint(concept_result(session, 99, "after".to_string()), VersionAuthor::System, "cp", vec![])
            .unwrap();
        prop_assert_eq!(log.version(appended).unwrap().parent, Some(first));
    }

    /// The cache key is insensitive to style-map insertion order and
    /// sensitive to every content field.
    #[test]
    fn prop_cache_key_canonical(
        prompt in ".{0,40}",
        negative in ".{0,20}",
        pairs in proptest::collection::vec(("[a-z]{1,6}", "[a-z]{1,6}"), 0..6),
    ) {
        let style: BTreeMap<String, String> = pairs.iter().cloned().map(|(k, v)| (k, v)).collect();
        let reversed: BTreeMap<String, String> = pairs.iter().rev().cloned().map(|(k, v)| (k, v)).collect();

        let a = ImageCacheKey::compute(&prompt, &negative, &style);
        let b = ImageCacheKey::compute(&prompt, &negative, &reversed);
        prop_assert_eq!(a.clone(), b);

        let mutated = ImageCacheKey::compute(&format!("{}!", prompt), &negative, &style);
        prop_assert_ne!(a, mutated);
    }
}
