// /////////////////////////////////////////////////////////////////////////////
// Comicforge
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Use Cases

pub mod replay_session;
pub mod run_session;

pub use replay_session::{ReplaySessionUseCase, ReplayReport};
pub use run_session::{RunOutcome, RunSessionUseCase};
