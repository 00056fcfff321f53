// /////////////////////////////////////////////////////////////////////////////
// Comicforge
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Persistence ports of the comicforge domain.

pub mod session_journal;

pub use session_journal::{JournalEntry, JournalRecord, ReplayedSession, SessionJournal};
