// /////////////////////////////////////////////////////////////////////////////
// Comicforge
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Domain service traits and helpers.
//!
//! Stateless contracts the infrastructure layer implements: stage workers,
//! the generative model ports, and pluggable quality evaluators, plus the
//! shared RFC3339 serde helper.

pub mod datetime_serde;
pub mod generative;
pub mod quality_evaluator;
pub mod stage_worker;

pub use generative::{
    ImageGenRequest, ImageGenResponse, ImageModelService, TextGenRequest, TextGenResponse, TextModelService,
};
pub use quality_evaluator::{CategoryEvaluator, QualityCategory, QualityWeights};
pub use stage_worker::{CategoryScores, NoopProgress, ProgressSink, StageContext, StageWorker};
