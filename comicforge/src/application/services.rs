// /////////////////////////////////////////////////////////////////////////////
// Comicforge
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Application Services

pub mod hitl;
pub mod preview;
pub mod quality_gate;
pub mod scheduler;

pub use hitl::{HitlCoordinator, RendezvousOutcome};
pub use preview::PreviewService;
pub use quality_gate::{GateDecision, GateOutcome, QualityGate};
pub use scheduler::{EngineBuilder, FeedbackAck, SessionScheduler, SubmissionReceipt};
