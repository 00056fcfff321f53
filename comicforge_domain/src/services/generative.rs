// /////////////////////////////////////////////////////////////////////////////
// Comicforge
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Generative Model Ports
//!
//! Narrow interfaces through which the engine consumes external generative
//! backends. The engine never implements the models; stage workers call the
//! text model (stages 1-4, 6-7) or the image model (stage 5) through these
//! ports and classify failures into the engine's error taxonomy
//! (`AiRetryable`, `AiFatal`, `ContentPolicy`).
//!
//! In-tree scripted implementations live in the infrastructure layer and
//! back the CLI demo and the test suite.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::value_objects::quality_level::QualityLevel;
use crate::value_objects::stage_index::StageIndex;
use crate::value_objects::stage_output::ImagePayload;

/// Request to the text model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextGenRequest {
    pub stage: StageIndex,
    /// Instructional prompt assembled by the stage worker.
    pub prompt: String,
    /// Structured context (prior outputs, modifications) for the backend.
    pub context: serde_json::Value,
    pub quality: QualityLevel,
}

/// Response from the text model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextGenResponse {
    /// Generated content; stage workers parse this into their output shape.
    pub content: String,
    pub model: String,
    pub latency_ms: u64,
    pub tokens: u32,
}

/// Text generation backend (stages 1-4, 6-7).
#[async_trait]
pub trait TextModelService: Send + Sync {
    async fn generate(&self, request: TextGenRequest) -> Result<TextGenResponse, EngineError>;
}

/// Request to the image model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageGenRequest {
    pub prompt: String,
    pub negative_prompt: String,
    pub style: BTreeMap<String, String>,
    pub quality: QualityLevel,
}

/// Response from the image model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageGenResponse {
    pub image: ImagePayload,
    pub model: String,
    pub latency_ms: u64,
}

/// Image rendering backend (stage 5).
#[async_trait]
pub trait ImageModelService: Send + Sync {
    async fn render(&self, request: ImageGenRequest) -> Result<ImageGenResponse, EngineError>;
}
