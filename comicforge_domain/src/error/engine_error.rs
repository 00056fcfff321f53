// /////////////////////////////////////////////////////////////////////////////
// Comicforge
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Engine Error System
//!
//! This module provides the single, hierarchical error type for the comicforge
//! generation engine. Every failure the engine can produce - admission denial,
//! HITL protocol violations, model call failures, timeouts, backpressure,
//! persistence faults - is represented here as a typed variant.
//!
//! ## Overview
//!
//! The error system is designed around a few principles:
//!
//! - **Domain-Specific**: Errors map one-to-one onto the engine's error
//!   taxonomy; transport layers translate variants, never strings
//! - **Typed Events**: Background stages never raise user-visible panics; all
//!   failure information flows as `EngineError` values published on the bus
//! - **Actionable**: Each variant carries enough context for debugging
//! - **Cloneable**: Errors are cloned into events, journals, and metrics
//!
//! ## Error Categories
//!
//! ### Admission and Input
//! - **Capacity**: Admission semaphores exhausted; no session record created
//! - **InvalidInput**: Ill-formed submission or feedback
//!
//! ### HITL Protocol Violations
//! - **StageClosed**: Feedback for a stage whose rendezvous already resolved
//! - **NotAwaiting**: Feedback while no rendezvous is open
//! - **WrongStage**: Feedback addressed to a stage other than the open one
//!
//! ### Stage Execution
//! - **StageTimeout**: Stage exceeded its wall-clock budget
//! - **AiRetryable**: Transient model failure, consumed locally up to budget
//! - **AiFatal**: Permanent model failure; fallback or session failure
//! - **ContentPolicy**: Non-retryable policy rejection; placeholder result
//! - **QualityBelowThreshold**: Internal; surfaces as retry or fallback
//!
//! ### Infrastructure
//! - **CacheMiss**: Internal; never surfaces to observers
//! - **TooSlow**: Subscriber disconnected for queue overflow
//! - **PersistenceError**: Journal write/read failure
//!
//! ### Lifecycle and System
//! - **Cancelled**: External cancellation observed
//! - **InvalidConfiguration**: Malformed engine configuration
//! - **InternalError**: Unexpected engine fault
//!
//! ## Recovery
//!
//! Retryable errors (`AiRetryable`, `StageTimeout`, `PersistenceError`) are
//! consumed by the scheduler's retry loop; each attempt is recorded in the
//! version log. Fatal errors terminate the stage and, depending on stage
//! criticality, either fall back with a placeholder or fail the session.

use thiserror::Error;

/// Domain-specific errors for the comicforge generation engine.
///
/// This enum represents every failure mode the engine can produce. Each
/// variant includes a descriptive message; the wire-stable error kind is
/// exposed through [`EngineError::kind`].
#[derive(Error, Debug, Clone)]
pub enum EngineError {
    #[error("Capacity exhausted: {0}")]
    Capacity(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Stage closed: {0}")]
    StageClosed(String),

    #[error("Not awaiting feedback: {0}")]
    NotAwaiting(String),

    #[error("Wrong stage: {0}")]
    WrongStage(String),

    #[error("Stage timeout: {0}")]
    StageTimeout(String),

    #[error("Retryable model error: {0}")]
    AiRetryable(String),

    #[error("Fatal model error: {0}")]
    AiFatal(String),

    #[error("Content policy violation: {0}")]
    ContentPolicy(String),

    #[error("Quality below threshold: {0}")]
    QualityBelowThreshold(String),

    #[error("Cache miss: {0}")]
    CacheMiss(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Subscriber too slow: {0}")]
    TooSlow(String),

    #[error("Persistence error: {0}")]
    PersistenceError(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Version log error: {0}")]
    VersionLogError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl EngineError {
    /// Creates a new capacity error
    pub fn capacity(msg: impl Into<String>) -> Self {
        Self::Capacity(msg.into())
    }

    /// Creates a new invalid input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Creates a new stage-closed error
    pub fn stage_closed(msg: impl Into<String>) -> Self {
        Self::StageClosed(msg.into())
    }

    /// Creates a new not-awaiting error
    pub fn not_awaiting(msg: impl Into<String>) -> Self {
        Self::NotAwaiting(msg.into())
    }

    /// Creates a new wrong-stage error
    pub fn wrong_stage(msg: impl Into<String>) -> Self {
        Self::WrongStage(msg.into())
    }

    /// Creates a new stage timeout error
    pub fn stage_timeout(msg: impl Into<String>) -> Self {
        Self::StageTimeout(msg.into())
    }

    /// Creates a new retryable model error
    pub fn ai_retryable(msg: impl Into<String>) -> Self {
        Self::AiRetryable(msg.into())
    }

    /// Creates a new fatal model error
    pub fn ai_fatal(msg: impl Into<String>) -> Self {
        Self::AiFatal(msg.into())
    }

    /// Creates a new content policy error
    pub fn content_policy(msg: impl Into<String>) -> Self {
        Self::ContentPolicy(msg.into())
    }

    /// Creates a new cancellation error
    pub fn cancelled(msg: impl Into<String>) -> Self {
        Self::Cancelled(msg.into())
    }

    /// Creates a new persistence error
    pub fn persistence(msg: impl Into<String>) -> Self {
        Self::PersistenceError(msg.into())
    }

    /// Creates a new configuration error
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfiguration(msg.into())
    }

    /// Creates a new version log error
    pub fn version_log(msg: impl Into<String>) -> Self {
        Self::VersionLogError(msg.into())
    }

    /// Creates a new internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::InternalError(msg.into())
    }

    /// Checks whether a failed stage attempt may be retried.
    ///
    /// Timeouts count as failed attempts for retry/fallback purposes, so they
    /// are retryable alongside transient model and persistence failures.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::AiRetryable(_) | EngineError::StageTimeout(_) | EngineError::PersistenceError(_)
        )
    }

    /// Checks if the error is a HITL protocol violation
    pub fn is_hitl_protocol_error(&self) -> bool {
        matches!(
            self,
            EngineError::StageClosed(_) | EngineError::NotAwaiting(_) | EngineError::WrongStage(_)
        )
    }

    /// Checks if the error is internal: it never fails a session by itself.
    /// A quality shortfall surfaces only as a retry or fallback transition,
    /// and a cache miss never surfaces at all.
    pub fn is_internal_only(&self) -> bool {
        matches!(self, EngineError::QualityBelowThreshold(_) | EngineError::CacheMiss(_))
    }

    /// Gets the wire-stable error kind.
    ///
    /// These strings are part of the subscription event schema and must not
    /// change across minor versions.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::Capacity(_) => "capacity",
            EngineError::InvalidInput(_) => "invalid-input",
            EngineError::StageClosed(_) => "stage-closed",
            EngineError::NotAwaiting(_) => "not-awaiting",
            EngineError::WrongStage(_) => "wrong-stage",
            EngineError::StageTimeout(_) => "stage-timeout",
            EngineError::AiRetryable(_) => "stage-ai-error-retryable",
            EngineError::AiFatal(_) => "stage-ai-error-fatal",
            EngineError::ContentPolicy(_) => "content-policy",
            EngineError::QualityBelowThreshold(_) => "quality-below-threshold",
            EngineError::CacheMiss(_) => "cache-miss",
            EngineError::Cancelled(_) => "cancelled",
            EngineError::TooSlow(_) => "too-slow",
            EngineError::PersistenceError(_) => "persistence-error",
            EngineError::InvalidConfiguration(_) => "invalid-configuration",
            EngineError::SessionNotFound(_) => "session-not-found",
            EngineError::VersionLogError(_) => "version-log-error",
            EngineError::InternalError(_) => "internal",
        }
    }
}

// Implement conversion from standard library errors
impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::PersistenceError(err.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::InternalError(format!("serialization: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(EngineError::ai_retryable("503").is_retryable());
        assert!(EngineError::stage_timeout("budget exceeded").is_retryable());
        assert!(!EngineError::ai_fatal("model gone").is_retryable());
        assert!(!EngineError::content_policy("rejected").is_retryable());
        assert!(!EngineError::cancelled("user").is_retryable());
    }

    #[test]
    fn test_hitl_protocol_errors() {
        assert!(EngineError::stage_closed("stage 3").is_hitl_protocol_error());
        assert!(EngineError::not_awaiting("no rendezvous").is_hitl_protocol_error());
        assert!(EngineError::wrong_stage("expected 3, got 5").is_hitl_protocol_error());
        assert!(!EngineError::capacity("full").is_hitl_protocol_error());
    }

    #[test]
    fn test_wire_kinds_are_stable() {
        assert_eq!(EngineError::capacity("x").kind(), "capacity");
        assert_eq!(EngineError::ai_retryable("x").kind(), "stage-ai-error-retryable");
        assert_eq!(EngineError::ai_fatal("x").kind(), "stage-ai-error-fatal");
        assert_eq!(EngineError::TooSlow("x".into()).kind(), "too-slow");
        assert_eq!(EngineError::stage_closed("x").kind(), "stage-closed");
    }

    #[test]
    fn test_internal_only_errors() {
        assert!(EngineError::QualityBelowThreshold("0.6".into()).is_internal_only());
        assert!(EngineError::CacheMiss("key".into()).is_internal_only());
        assert!(!EngineError::cancelled("x").is_internal_only());
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
        let err: EngineError = io.into();
        assert_eq!(err.kind(), "persistence-error");
    }
}
