// /////////////////////////////////////////////////////////////////////////////
// Comicforge
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Comicforge Domain
//!
//! The comicforge domain crate holds the business rules of the seven-stage
//! comic generation pipeline, independent of runtimes, transports, and
//! storage. It follows Domain-Driven Design layering and is consumed by the
//! `comicforge` engine crate.
//!
//! ## Module Structure
//!
//! ### Entities
//! Objects with identity whose state evolves while the identity persists:
//!
//! - [`entities::Session`]: one pipeline run and its observable state machine
//! - [`entities::StageResult`]: the immutable record of one stage attempt
//! - [`entities::ImageTask`]: one unit of stage-5 fan-out work
//! - [`entities::GenerationMetrics`]: per-session measurements
//!
//! ### Value Objects
//! Immutable, self-validating types defined by their attributes:
//!
//! - [`value_objects::SessionId`] / [`value_objects::VersionId`] /
//!   [`value_objects::OwnerId`]: ULID-backed typed identifiers
//! - [`value_objects::PanelId`]: storyboard-position panel addressing
//! - [`value_objects::StageIndex`]: the validated 1..=7 stage index
//! - [`value_objects::QualityScore`] / [`value_objects::QualityLevel`]
//! - [`value_objects::StageOutput`]: the seven stage payload shapes
//! - [`value_objects::ImageCacheKey`]: content-addressed image cache key
//! - [`value_objects::FeedbackEnvelope`]: HITL intervention record
//! - [`value_objects::RetryPolicy`]: exponential backoff with cap and jitter
//!
//! ### Aggregates
//! - [`aggregates::VersionLog`]: the per-session append-only version DAG
//!   with branch, diff, and restore operations
//!
//! ### Domain Events
//! - [`events::SessionEvent`]: the sequenced events fanned out to observers
//!
//! ### Services (ports)
//! - [`services::StageWorker`]: the per-stage execution contract
//! - [`services::TextModelService`] / [`services::ImageModelService`]: the
//!   generative backend ports
//! - [`services::CategoryEvaluator`]: pluggable quality scoring
//!
//! ### Repositories (ports)
//! - [`repositories::SessionJournal`]: idempotent append-only persistence
//!
//! ## Business Rules
//!
//! The domain layer enforces the engine's core invariants:
//!
//! - A session never skips a stage index; stage k reads only from stages
//!   `< k` on the same version path
//! - Exactly one stage result is current per completed stage on the active
//!   branch; superseded attempts stay addressable
//! - Every terminated attempt records a quality score
//! - A feedback envelope applies to at most one transition
//! - Image cache keys are content-addressed over (prompt, negative prompt,
//!   style)

pub mod aggregates;
pub mod entities;
pub mod error;
pub mod events;
pub mod repositories;
pub mod services;
pub mod value_objects;

pub use error::EngineError;

pub use aggregates::{ChangeEntry, ChangeKind, ChangeSet, Version, VersionAuthor, VersionLog, MAIN_BRANCH};
pub use entities::{
    GenerationMetrics, ImageResult, ImageTask, Session, SessionState, StageResult, SubmissionOptions,
    MAX_SUBMISSION_CHARS,
};
pub use events::{EventPayload, SessionEvent};
pub use repositories::{JournalEntry, JournalRecord, ReplayedSession, SessionJournal};
pub use services::{
    CategoryEvaluator, CategoryScores, ImageGenRequest, ImageGenResponse, ImageModelService, NoopProgress,
    ProgressSink, QualityCategory, QualityWeights, StageContext, StageWorker, TextGenRequest, TextGenResponse,
    TextModelService,
};
pub use value_objects::{
    BubbleType, CharacterSheet, CharactersOutput, ConceptOutput, DialogueLine, DialogueOutput, EmotionalTone,
    FeedbackEnvelope, FeedbackKind, FeedbackOrigin, FinalOutput, FinalPage, GenerationStats, ImageCacheKey,
    ImagePayload, Intensity, ModificationDescriptor, ModificationType, OwnerId, PageSpec, PanelId, PanelImage,
    PanelSize, PanelSpec, PayloadClass, PlotOutput, PreviewPayload, QualityLevel, QualityScore, RetryPolicy,
    SceneBeat, SceneImagesOutput, SessionId, SoundEffect, StageIndex, StageOutput, StoryboardOutput, VersionId,
    STAGE_COUNT,
};
