// /////////////////////////////////////////////////////////////////////////////
// Comicforge
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Comicforge
//!
//! The comicforge engine turns a story text into a multi-page comic artifact
//! by driving a fixed seven-stage generation pipeline: concept, characters,
//! plot, storyboard, scene images, dialogue, and final assembly. Text stages
//! drive a text model port; the image stage fans out panel renders under
//! bounded concurrency.
//!
//! ## Engine Capabilities
//!
//! - **Session scheduling** with global admission caps (sessions, stage
//!   workers, image tasks) and an observable per-session state machine
//! - **Quality gating** after every stage: weighted category scoring with
//!   pass / retry / fallback decisions and admin overrides
//! - **HITL rendezvous**: bounded feedback windows between stages with
//!   timeout fallback, exactly-once envelope consumption, and structured
//!   modification merging
//! - **Versioned checkpoints**: an append-only per-session DAG with
//!   branches, structural diff, and non-destructive restore
//! - **Live updates**: per-session event fan-out with bounded subscriber
//!   queues, causal ordering, and late-subscriber snapshots
//! - **Durable journaling**: idempotent append-only session streams that
//!   reconstruct finished sessions (crashed stages are failed, not resumed)
//!
//! ## Layering
//!
//! The crate follows the workspace's layered architecture:
//!
//! - [`application`] - the scheduler, quality gate, HITL coordinator,
//!   preview service, and CLI-facing use cases
//! - [`infrastructure`] - stage workers, fan-out executor, bus, resource
//!   pool, scripted model adapters, persistence, metrics, configuration
//! - [`presentation`] - the command-line interface
//!
//! Domain types live in `comicforge_domain`; process bootstrap in
//! `comicforge_bootstrap`.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use comicforge::application::services::{EngineBuilder};
//! use comicforge::infrastructure::adapters::{ScriptedImageModel, ScriptedTextModel};
//! use comicforge::infrastructure::config::EngineConfig;
//! use comicforge::infrastructure::persistence::MemoryJournal;
//! use comicforge_domain::{OwnerId, SubmissionOptions};
//!
//! # async fn demo() -> Result<(), comicforge_domain::EngineError> {
//! let scheduler = EngineBuilder::new(
//!     EngineConfig::default(),
//!     Arc::new(ScriptedTextModel::new()),
//!     Arc::new(ScriptedImageModel::new()),
//!     Arc::new(MemoryJournal::new()),
//! )
//! .build()?;
//!
//! let receipt = scheduler
//!     .submit(OwnerId::new(), "A story...".to_string(), SubmissionOptions::default())
//!     .await?;
//! let events = receipt.events.collect_to_end().await?;
//! # Ok(())
//! # }
//! ```

pub mod application;
pub mod infrastructure;
pub mod presentation;

// Tests are organized as:
// - Unit tests: #[cfg(test)] modules within each source file
// - Integration and e2e tests: separate files in tests/

// Re-export the engine facade and domain types for convenient access
pub use application::services::{EngineBuilder, FeedbackAck, SessionScheduler, SubmissionReceipt};
pub use comicforge_domain::{
    EngineError, EventPayload, FeedbackKind, OwnerId, QualityLevel, SessionEvent, SessionId, SessionState,
    StageIndex, SubmissionOptions,
};
