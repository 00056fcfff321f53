// /////////////////////////////////////////////////////////////////////////////
// Comicforge
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Version Log Aggregate
//!
//! The append-only history of one session's stage outputs, structured as a
//! DAG rooted at an implicit origin. Every completed stage attempt is
//! checkpointed; branches permit exploration, restore never rewrites, and
//! superseded attempts stay addressable forever.
//!
//! ## Operations
//!
//! - **checkpoint** - append a version whose parent is the current branch
//!   head and advance the head
//! - **branch** - register a named branch rooted at an existing version
//! - **switch** - designate the branch that subsequent checkpoints extend
//! - **diff** - structural comparison of two versions' outputs with a
//!   similarity score in [0, 1]
//! - **restore** - create a fresh branch at an older version and switch to
//!   it; existing versions are never mutated
//!
//! ## Invariants
//!
//! - Parent edges are immutable and may only target versions already in this
//!   session's log (back-edge validation happens at checkpoint time; cycles
//!   are therefore unrepresentable)
//! - A version id is never recycled
//! - Branch names are unique within a session; switching to a non-existent
//!   branch is an error
//!
//! The aggregate is single-writer: only the session's scheduler appends.
//! Readers work on clones or on immutable version references.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entities::stage_result::StageResult;
use crate::error::EngineError;
use crate::services::datetime_serde;
use crate::value_objects::generic_id::{SessionId, VersionId};
use crate::value_objects::stage_index::StageIndex;
use crate::value_objects::stage_output::{PayloadClass, StageOutput};

/// Name of the branch every session starts on.
pub const MAIN_BRANCH: &str = "main";

/// Who authored a version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VersionAuthor {
    /// Checkpoint produced by normal pipeline progress.
    System,
    /// Checkpoint produced by applying observer feedback.
    UserFeedbackApplied,
}

/// One immutable entry of the version DAG.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Version {
    pub id: VersionId,
    pub parent: Option<VersionId>,
    pub branch: String,
    pub stage: StageIndex,
    pub result: StageResult,
    pub author: VersionAuthor,
    pub label: String,
    pub tags: Vec<String>,
    #[serde(with = "datetime_serde")]
    pub created_at: DateTime<Utc>,
}

/// Kind of change observed at one path of a diff.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChangeKind {
    Added { value: String },
    Removed { value: String },
    Modified { from: String, to: String },
}

/// One field- or panel-level difference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEntry {
    /// JSON-pointer-like path ("/act1", "/pages/0/panels/2/description") or
    /// a panel address ("panel p01-02/prompt") for image payloads.
    pub path: String,
    pub change: ChangeKind,
}

/// Structural comparison of two versions' outputs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeSet {
    pub a: VersionId,
    pub b: VersionId,
    pub entries: Vec<ChangeEntry>,
    /// Fraction of compared leaves that match, in [0, 1].
    pub similarity: f64,
}

impl ChangeSet {
    pub fn is_identical(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Append-only per-session version DAG.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionLog {
    session_id: SessionId,
    versions: HashMap<VersionId, Version>,
    /// Append order, for deterministic iteration.
    order: Vec<VersionId>,
    /// Branch name -> head version (None while a branch still sits at the
    /// implicit origin).
    branches: HashMap<String, Option<VersionId>>,
    current_branch: String,
    restore_count: u32,
}

impl VersionLog {
    /// Creates an empty log rooted at the implicit origin, on `main`.
    pub fn new(session_id: SessionId) -> Self {
        let mut branches = HashMap::new();
        branches.insert(MAIN_BRANCH.to_string(), None);
        Self {
            session_id,
            versions: HashMap::new(),
            order: Vec::new(),
            branches,
            current_branch: MAIN_BRANCH.to_string(),
            restore_count: 0,
        }
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn current_branch(&self) -> &str {
        &self.current_branch
    }

    pub fn branch_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.branches.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Head of the current branch, if any checkpoint exists on it.
    pub fn head(&self) -> Option<VersionId> {
        self.branches.get(&self.current_branch).copied().flatten()
    }

    pub fn version(&self, id: VersionId) -> Option<&Version> {
        self.versions.get(&id)
    }

    /// Versions in append order.
    pub fn versions_in_order(&self) -> impl Iterator<Item = &Version> {
        self.order.iter().filter_map(|id| self.versions.get(id))
    }

    /// Appends a checkpoint whose parent is the current branch head.
    pub fn checkpoint(
        &mut self,
        result: StageResult,
        author: VersionAuthor,
        label: impl Into<String>,
        tags: Vec<String>,
    ) -> Result<VersionId, EngineError> {
        if result.session_id() != self.session_id {
            return Err(EngineError::version_log(format!(
                "result belongs to session {}, log to {}",
                result.session_id(),
                self.session_id
            )));
        }
        let parent = self.head();
        if let Some(parent_id) = parent {
            // Back-edge validation: the parent must already exist in this log.
            if !self.versions.contains_key(&parent_id) {
                return Err(EngineError::version_log(format!("unknown parent version {}", parent_id)));
            }
        }

        let id = VersionId::new();
        let version = Version {
            id,
            parent,
            branch: self.current_branch.clone(),
            stage: result.stage(),
            result,
            author,
            label: label.into(),
            tags,
            created_at: Utc::now(),
        };
        self.versions.insert(id, version);
        self.order.push(id);
        self.branches.insert(self.current_branch.clone(), Some(id));
        Ok(id)
    }

    /// Registers a named branch rooted at `base`.
    pub fn branch(&mut self, base: VersionId, name: impl Into<String>) -> Result<(), EngineError> {
        let name = name.into();
        if !self.versions.contains_key(&base) {
            return Err(EngineError::version_log(format!("unknown base version {}", base)));
        }
        if self.branches.contains_key(&name) {
            return Err(EngineError::version_log(format!("branch '{}' already exists", name)));
        }
        self.branches.insert(name, Some(base));
        Ok(())
    }

    /// Designates the branch subsequent checkpoints extend.
    pub fn switch(&mut self, name: &str) -> Result<(), EngineError> {
        if !self.branches.contains_key(name) {
            return Err(EngineError::version_log(format!("no such branch '{}'", name)));
        }
        self.current_branch = name.to_string();
        Ok(())
    }

    /// Creates a fresh branch at `version` and switches to it. Returns the
    /// generated branch name. Never mutates existing versions.
    pub fn restore(&mut self, version: VersionId) -> Result<String, EngineError> {
        if !self.versions.contains_key(&version) {
            return Err(EngineError::version_log(format!("unknown version {}", version)));
        }
        self.restore_count += 1;
        let name = format!("restore-{}", self.restore_count);
        self.branch(version, name.clone())?;
        self.switch(&name)?;
        Ok(name)
    }

    /// The path from the current head back to the origin, head first.
    pub fn current_path(&self) -> Vec<&Version> {
        let mut path = Vec::new();
        let mut cursor = self.head();
        while let Some(id) = cursor {
            match self.versions.get(&id) {
                Some(version) => {
                    cursor = version.parent;
                    path.push(version);
                }
                None => break,
            }
        }
        path
    }

    /// The "current" result for a stage on the active branch: the most
    /// recent checkpoint at that stage along the head's ancestry.
    pub fn current_result(&self, stage: StageIndex) -> Option<&StageResult> {
        self.current_path()
            .into_iter()
            .find(|v| v.stage == stage)
            .map(|v| &v.result)
    }

    /// Structural diff between two versions' outputs.
    pub fn diff(&self, a: VersionId, b: VersionId) -> Result<ChangeSet, EngineError> {
        let va = self
            .versions
            .get(&a)
            .ok_or_else(|| EngineError::version_log(format!("unknown version {}", a)))?;
        let vb = self
            .versions
            .get(&b)
            .ok_or_else(|| EngineError::version_log(format!("unknown version {}", b)))?;

        let entries = diff_outputs(va.result.output(), vb.result.output());
        let similarity = similarity_of(va.result.output(), vb.result.output(), &entries);
        Ok(ChangeSet {
            a,
            b,
            entries,
            similarity,
        })
    }
}

/// Dispatches the structural diff on payload class: textual payloads get
/// field-level JSON diffs, image payloads get per-panel comparisons, and
/// composite payloads get both.
fn diff_outputs(a: &StageOutput, b: &StageOutput) -> Vec<ChangeEntry> {
    match (a.payload_class(), b.payload_class()) {
        (PayloadClass::Image, PayloadClass::Image) => diff_panels(a, b),
        (PayloadClass::Composite, PayloadClass::Composite) => {
            let mut entries = diff_json_leaves(&a.to_json(), &b.to_json());
            entries.extend(diff_panels(a, b));
            entries
        }
        _ => diff_json_leaves(&a.to_json(), &b.to_json()),
    }
}

/// Field-level diff over flattened JSON leaves.
fn diff_json_leaves(a: &serde_json::Value, b: &serde_json::Value) -> Vec<ChangeEntry> {
    let mut left = std::collections::BTreeMap::new();
    flatten_json("", a, &mut left);
    let mut right = std::collections::BTreeMap::new();
    flatten_json("", b, &mut right);

    let mut entries = Vec::new();
    for (path, value) in &left {
        match right.get(path) {
            None => entries.push(ChangeEntry {
                path: path.clone(),
                change: ChangeKind::Removed { value: value.clone() },
            }),
            Some(other) if other != value => entries.push(ChangeEntry {
                path: path.clone(),
                change: ChangeKind::Modified {
                    from: value.clone(),
                    to: other.clone(),
                },
            }),
            Some(_) => {}
        }
    }
    for (path, value) in &right {
        if !left.contains_key(path) {
            entries.push(ChangeEntry {
                path: path.clone(),
                change: ChangeKind::Added { value: value.clone() },
            });
        }
    }
    entries
}

/// Per-panel identity, parameter, and byte-hash comparison for image
/// payloads.
fn diff_panels(a: &StageOutput, b: &StageOutput) -> Vec<ChangeEntry> {
    let left = panel_index(a);
    let right = panel_index(b);
    let mut entries = Vec::new();

    for (panel, (prompt, hash)) in &left {
        match right.get(panel) {
            None => entries.push(ChangeEntry {
                path: format!("panel {}", panel),
                change: ChangeKind::Removed { value: prompt.clone() },
            }),
            Some((other_prompt, other_hash)) => {
                if prompt != other_prompt {
                    entries.push(ChangeEntry {
                        path: format!("panel {}/prompt", panel),
                        change: ChangeKind::Modified {
                            from: prompt.clone(),
                            to: other_prompt.clone(),
                        },
                    });
                }
                if hash != other_hash {
                    entries.push(ChangeEntry {
                        path: format!("panel {}/bytes", panel),
                        change: ChangeKind::Modified {
                            from: hash.clone(),
                            to: other_hash.clone(),
                        },
                    });
                }
            }
        }
    }
    for (panel, (prompt, _)) in &right {
        if !left.contains_key(panel) {
            entries.push(ChangeEntry {
                path: format!("panel {}", panel),
                change: ChangeKind::Added { value: prompt.clone() },
            });
        }
    }
    entries
}

/// Panel id -> (prompt, byte hash) for any payload carrying panel images.
fn panel_index(output: &StageOutput) -> std::collections::BTreeMap<String, (String, String)> {
    match output {
        StageOutput::SceneImages(images) => images
            .images
            .iter()
            .map(|p| (p.panel_id.to_string(), (p.prompt.clone(), p.image.byte_hash())))
            .collect(),
        StageOutput::Final(fin) => fin
            .pages
            .iter()
            .enumerate()
            .map(|(i, page)| (format!("page-{}", i + 1), (String::new(), page.image.byte_hash())))
            .collect(),
        _ => std::collections::BTreeMap::new(),
    }
}

/// Similarity: fraction of the union of compared leaves that match.
fn similarity_of(a: &StageOutput, b: &StageOutput, entries: &[ChangeEntry]) -> f64 {
    let mut left = std::collections::BTreeMap::new();
    flatten_json("", &a.to_json(), &mut left);
    let mut right = std::collections::BTreeMap::new();
    flatten_json("", &b.to_json(), &mut right);

    let union: std::collections::BTreeSet<&String> = left.keys().chain(right.keys()).collect();
    if union.is_empty() {
        return 1.0;
    }
    let changed = entries.len().min(union.len());
    1.0 - changed as f64 / union.len() as f64
}

/// Flattens a JSON value into (path, rendered leaf) pairs.
fn flatten_json(prefix: &str, value: &serde_json::Value, out: &mut std::collections::BTreeMap<String, String>) {
    match value {
        serde_json::Value::Object(map) => {
            for (key, child) in map {
                flatten_json(&format!("{}/{}", prefix, key), child, out);
            }
        }
        serde_json::Value::Array(items) => {
            for (i, child) in items.iter().enumerate() {
                flatten_json(&format!("{}/{}", prefix, i), child, out);
            }
        }
        leaf => {
            out.insert(prefix.to_string(), leaf.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value_objects::quality_score::QualityScore;
    use crate::value_objects::stage_output::{ConceptOutput, StageOutput};

    fn concept_result(session: SessionId, attempt: u32, theme: &str) -> StageResult {
        StageResult::new(
            session,
            StageIndex::first(),
            attempt,
            "fp".to_string(),
            StageOutput::Concept(ConceptOutput {
                theme: theme.to_string(),
                genres: vec!["mystery".to_string()],
                world_setting: "rainy metropolis".to_string(),
                target_audience: "adult".to_string(),
                estimated_pages: 5,
            }),
            QualityScore::clamped(0.8),
            120,
            vec![],
        )
    }

    #[test]
    fn test_checkpoint_advances_head() {
        let session = SessionId::new();
        let mut log = VersionLog::new(session);
        assert!(log.head().is_none());

        let v1 = log
            .checkpoint(concept_result(session, 1, "masks"), VersionAuthor::System, "stage 1", vec![])
            .unwrap();
        assert_eq!(log.head(), Some(v1));
        assert_eq!(log.version(v1).unwrap().parent, None);

        let v2 = log
            .checkpoint(concept_result(session, 2, "mirrors"), VersionAuthor::System, "retry", vec![])
            .unwrap();
        assert_eq!(log.head(), Some(v2));
        assert_eq!(log.version(v2).unwrap().parent, Some(v1));
    }

    #[test]
    fn test_foreign_result_rejected() {
        let mut log = VersionLog::new(SessionId::new());
        let foreign = concept_result(SessionId::new(), 1, "masks");
        assert!(log.checkpoint(foreign, VersionAuthor::System, "x", vec![]).is_err());
    }

    #[test]
    fn test_branch_and_switch() {
        let session = SessionId::new();
        let mut log = VersionLog::new(session);
        let v1 = log
            .checkpoint(concept_result(session, 1, "masks"), VersionAuthor::System, "s1", vec![])
            .unwrap();
        let _v2 = log
            .checkpoint(concept_result(session, 2, "mirrors"), VersionAuthor::System, "s1 retry", vec![])
            .unwrap();

        log.branch(v1, "alt").unwrap();
        assert!(log.branch(v1, "alt").is_err(), "duplicate branch names rejected");
        assert!(log.switch("nope").is_err());

        log.switch("alt").unwrap();
        assert_eq!(log.head(), Some(v1));
        let v3 = log
            .checkpoint(concept_result(session, 3, "smoke"), VersionAuthor::System, "alt take", vec![])
            .unwrap();
        assert_eq!(log.version(v3).unwrap().parent, Some(v1));
    }

    #[test]
    fn test_restore_then_checkpoint_parents_at_restored_version() {
        let session = SessionId::new();
        let mut log = VersionLog::new(session);
        let v1 = log
            .checkpoint(concept_result(session, 1, "masks"), VersionAuthor::System, "s1", vec![])
            .unwrap();
        let _v2 = log
            .checkpoint(concept_result(session, 2, "mirrors"), VersionAuthor::System, "s1 retry", vec![])
            .unwrap();

        let branch = log.restore(v1).unwrap();
        assert_eq!(log.current_branch(), branch);
        // Restored head equals the restored version's content, untouched
        assert_eq!(log.head(), Some(v1));

        let v3 = log
            .checkpoint(concept_result(session, 3, "smoke"), VersionAuthor::System, "after restore", vec![])
            .unwrap();
        assert_eq!(log.version(v3).unwrap().parent, Some(v1));
    }

    #[test]
    fn test_current_result_follows_active_branch() {
        let session = SessionId::new();
        let mut log = VersionLog::new(session);
        let _v1 = log
            .checkpoint(concept_result(session, 1, "masks"), VersionAuthor::System, "s1", vec![])
            .unwrap();
        let v2 = log
            .checkpoint(concept_result(session, 2, "mirrors"), VersionAuthor::System, "retry", vec![])
            .unwrap();

        let current = log.current_result(StageIndex::first()).unwrap();
        assert_eq!(current.attempt(), 2);
        assert_eq!(log.version(v2).unwrap().result.attempt(), 2);
    }

    #[test]
    fn test_textual_diff_finds_field_changes() {
        let session = SessionId::new();
        let mut log = VersionLog::new(session);
        let v1 = log
            .checkpoint(concept_result(session, 1, "masks"), VersionAuthor::System, "a", vec![])
            .unwrap();
        let v2 = log
            .checkpoint(concept_result(session, 2, "mirrors"), VersionAuthor::System, "b", vec![])
            .unwrap();

        let diff = log.diff(v1, v2).unwrap();
        assert!(!diff.is_identical());
        assert!(diff.entries.iter().any(|e| e.path.ends_with("/theme")));
        assert!(diff.similarity > 0.0 && diff.similarity < 1.0);

        let same = log.diff(v1, v1).unwrap();
        assert!(same.is_identical());
        assert_eq!(same.similarity, 1.0);
    }
}
