// /////////////////////////////////////////////////////////////////////////////
// Comicforge
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Aggregate roots guarding multi-object invariants.

pub mod version_log;

pub use version_log::{
    ChangeEntry, ChangeKind, ChangeSet, Version, VersionAuthor, VersionLog, MAIN_BRANCH,
};
