// /////////////////////////////////////////////////////////////////////////////
// Comicforge
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Image Fan-out Executor
//!
//! Runs the stage-5 image tasks of one session in parallel under two
//! concurrency bounds: the per-session cap (default 5) and the engine-wide
//! image slot pool. Tasks are admitted in priority order - higher priority
//! first, ties broken by earliest panel id - because both semaphores queue
//! waiters fairly and tasks enter the queues in sorted order.
//!
//! ## Per-task Flow
//!
//! 1. Acquire the per-session slot, then a global slot
//! 2. Consult the shared content-addressed cache; a hit returns immediately
//!    with `cache_hit = true` and zero model attempts
//! 3. Call the image model, retrying transient failures up to the task's
//!    attempt budget with exponential backoff (2^attempt seconds, capped at
//!    30s, +/-20% jitter)
//! 4. Non-retryable failures (content policy, fatal model errors) terminate
//!    the task immediately with a placeholder result
//! 5. Successful renders populate the cache under the task's stable key
//!
//! ## Cancellation
//!
//! The session's cancellation token is raced against every model call and
//! every backoff sleep. On cancel, in-flight attempts are discarded (late
//! external results are dropped with the select), pending tasks are
//! abandoned, and the executor returns `cancelled` - all within one backoff
//! period.
//!
//! ## Efficiency Score
//!
//! `efficiency = 1 - wall / (n x mean-per-task)`, scaled by
//! `min(1, bound / n)` and clamped to [0, 1]. Perfectly parallel fan-out
//! approaches 1; fully serial execution approaches 0.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use comicforge_bootstrap::CancellationToken;
use comicforge_domain::services::{ImageGenRequest, ImageModelService};
use comicforge_domain::{
    EngineError, ImagePayload, ImageResult, ImageTask, ProgressSink, QualityLevel, RetryPolicy,
};

use crate::infrastructure::adapters::image_cache::ImageCache;
use crate::infrastructure::runtime::resource_pool::ResourcePool;

/// Aggregate outcome of one fan-out.
#[derive(Debug, Clone)]
pub struct FanoutOutcome {
    /// Results in reading order (panel id order), one per task.
    pub results: Vec<ImageResult>,
    /// Parallel-efficiency score in [0, 1].
    pub efficiency: f64,
    pub cache_hits: u32,
    pub failures: u32,
}

/// Parallel image task executor shared by all sessions.
pub struct ImageExecutor {
    model: Arc<dyn ImageModelService>,
    cache: Arc<ImageCache>,
    pool: Arc<ResourcePool>,
}

impl ImageExecutor {
    pub fn new(model: Arc<dyn ImageModelService>, cache: Arc<ImageCache>, pool: Arc<ResourcePool>) -> Self {
        Self { model, cache, pool }
    }

    pub fn cache(&self) -> &Arc<ImageCache> {
        &self.cache
    }

    /// Executes one session's tasks under `per_session_limit`.
    ///
    /// Returns `cancelled` as soon as the token fires; otherwise every task
    /// yields a result (rendered, cached, or placeholder).
    pub async fn execute(
        &self,
        mut tasks: Vec<ImageTask>,
        quality: QualityLevel,
        per_session_limit: usize,
        retry: RetryPolicy,
        cancel: &CancellationToken,
        progress: &dyn ProgressSink,
    ) -> Result<FanoutOutcome, EngineError> {
        if tasks.is_empty() {
            return Ok(FanoutOutcome {
                results: Vec::new(),
                efficiency: 1.0,
                cache_hits: 0,
                failures: 0,
            });
        }

        // Priority admission: both semaphores hand out permits in request
        // order, and tasks request in this order.
        tasks.sort_by_key(|t| t.admission_key());

        let total = tasks.len();
        let local_slots = Arc::new(Semaphore::new(per_session_limit.max(1)));
        let completed = AtomicU32::new(0);
        let wall_start = Instant::now();

        let futures = tasks
            .into_iter()
            .map(|task| {
                let local_slots = Arc::clone(&local_slots);
                let completed = &completed;
                async move {
                    let _local = local_slots
                        .acquire()
                        .await
                        .map_err(|_| EngineError::internal("session image semaphore closed"))?;
                    let _global = self.pool.acquire_image_slot().await?;

                    let result = self.run_task(task, quality, retry, cancel).await?;
                    let done = completed.fetch_add(1, Ordering::Relaxed) + 1;
                    progress.report(((done as usize * 100) / total) as u8);
                    Ok::<ImageResult, EngineError>(result)
                }
            })
            .collect::<Vec<_>>();

        let mut results = Vec::with_capacity(total);
        for outcome in join_all(futures).await {
            results.push(outcome?);
        }
        // Back to reading order for the stage output.
        results.sort_by_key(|r| r.panel_id);

        let wall_ms = wall_start.elapsed().as_millis() as u64;
        let cache_hits = results.iter().filter(|r| r.cache_hit).count() as u32;
        let failures = results.iter().filter(|r| r.placeholder).count() as u32;
        let efficiency = efficiency_score(&results, wall_ms, per_session_limit);

        debug!(
            tasks = total,
            cache_hits, failures, efficiency, wall_ms, "image fan-out settled"
        );

        Ok(FanoutOutcome {
            results,
            efficiency,
            cache_hits,
            failures,
        })
    }

    /// One task: cache lookup, then the bounded retry loop.
    async fn run_task(
        &self,
        task: ImageTask,
        quality: QualityLevel,
        retry: RetryPolicy,
        cancel: &CancellationToken,
    ) -> Result<ImageResult, EngineError> {
        let started = Instant::now();
        let key = task.cache_key();

        if let Some(image) = self.cache.get(&key) {
            return Ok(ImageResult {
                panel_id: task.panel_id,
                image,
                prompt: task.prompt,
                cache_hit: true,
                attempts: 0,
                elapsed_ms: started.elapsed().as_millis() as u64,
                placeholder: false,
            });
        }

        let request = ImageGenRequest {
            prompt: task.prompt.clone(),
            negative_prompt: task.negative_prompt.clone(),
            style: task.style.clone(),
            quality,
        };
        let budget = retry.max_attempts.min(task.max_attempts).max(1);

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            if cancel.is_cancelled() {
                return Err(EngineError::cancelled("image task abandoned"));
            }

            let rendered = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(EngineError::cancelled("image task abandoned mid-attempt")),
                rendered = self.model.render(request.clone()) => rendered,
            };

            match rendered {
                Ok(response) => {
                    self.cache.insert(key.clone(), response.image.clone(), quality);
                    return Ok(ImageResult {
                        panel_id: task.panel_id,
                        image: response.image,
                        prompt: task.prompt,
                        cache_hit: false,
                        attempts: attempt,
                        elapsed_ms: started.elapsed().as_millis() as u64,
                        placeholder: false,
                    });
                }
                Err(error) if error.is_retryable() && attempt < budget => {
                    let delay = retry.delay(attempt);
                    debug!(panel = %task.panel_id, attempt, ?delay, "retrying image task");
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(EngineError::cancelled("image task abandoned in backoff")),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(error) => {
                    warn!(panel = %task.panel_id, attempt, error = %error, "image task terminated");
                    return Ok(placeholder_result(task, attempt, started, &error));
                }
            }
        }
    }
}

// The terminating error is recorded on the stage result's errors list by the
// stage worker; the placeholder itself carries no message.
fn placeholder_result(task: ImageTask, attempts: u32, started: Instant, _error: &EngineError) -> ImageResult {
    ImageResult {
        panel_id: task.panel_id,
        image: ImagePayload::Inline {
            media_type: "image/svg+xml".to_string(),
            base64: String::new(),
        },
        prompt: task.prompt,
        cache_hit: false,
        attempts,
        elapsed_ms: started.elapsed().as_millis() as u64,
        placeholder: true,
    }
}

/// `1 - wall/(n x mean)`, scaled by `min(1, bound/n)`, clamped to [0, 1].
fn efficiency_score(results: &[ImageResult], wall_ms: u64, bound: usize) -> f64 {
    let n = results.len();
    if n == 0 {
        return 1.0;
    }
    let total_task_ms: u64 = results.iter().map(|r| r.elapsed_ms).sum();
    let mean = total_task_ms as f64 / n as f64;
    if mean <= 0.0 {
        return 1.0;
    }
    let raw = 1.0 - (wall_ms as f64 / (n as f64 * mean));
    let scale = (bound as f64 / n as f64).min(1.0);
    (raw * scale).clamp(0.0, 1.0)
}
