// /////////////////////////////////////////////////////////////////////////////
// Comicforge
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Task Supervision Utilities
//!
//! Supervised spawning for background session tasks. Prevents
//! spawn-and-forget: every task logs its lifecycle and surfaces its outcome
//! (including panics) as a typed error to whoever joins it.

use comicforge_domain::EngineError;
use tokio::task::JoinHandle;
use tracing::{debug, error};

/// Result type alias for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

/// Spawns a supervised task with lifecycle logging.
///
/// The returned handle must be awaited (directly or via
/// [`join_supervised`]); failures are logged at spawn site granularity so
/// background errors are visible immediately.
pub fn spawn_supervised<F, T>(name: &'static str, fut: F) -> JoinHandle<EngineResult<T>>
where
    F: std::future::Future<Output = EngineResult<T>> + Send + 'static,
    T: Send + 'static,
{
    debug!(task = name, "task starting");

    tokio::spawn(async move {
        let result = fut.await;

        match &result {
            Ok(_) => debug!(task = name, "task completed"),
            Err(e) => error!(task = name, error = ?e, "task failed"),
        }

        result
    })
}

/// Awaits a supervised task handle, converting panics and join failures into
/// typed errors so no outcome is lost.
pub async fn join_supervised<T>(handle: JoinHandle<EngineResult<T>>) -> EngineResult<T> {
    match handle.await {
        Ok(task_result) => task_result,
        Err(e) => {
            if e.is_panic() {
                Err(EngineError::internal(format!("task panicked: {}", e)))
            } else if e.is_cancelled() {
                Err(EngineError::cancelled("task aborted"))
            } else {
                Err(EngineError::internal(format!("task join failed: {}", e)))
            }
        }
    }
}
