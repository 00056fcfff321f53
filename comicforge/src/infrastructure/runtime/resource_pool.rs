// /////////////////////////////////////////////////////////////////////////////
// Comicforge
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Global Resource Pool
//!
//! Centralized resource governance across the engine, preventing
//! oversubscription when many sessions generate concurrently.
//!
//! ## Architecture Pattern: Two-Level Resource Governance
//!
//! **Problem:** Without global limits, concurrent sessions can overwhelm the
//! process and the model backends:
//! - 50 sessions x 8 panels/session = 400 in-flight image calls
//! - Result: backend throttling, queue explosions, missed latency budgets
//!
//! **Solution:** Two-level coordination:
//! 1. **Global limits** (this module) - sessions, stage workers, image tasks
//! 2. **Local limits** (per-session) - the stage-5 fan-out cap
//!
//! ## Resource Types
//!
//! ### Session Slots
//! - **Purpose:** Cap concurrently admitted sessions (default 50)
//! - **Use:** Acquired non-blocking at submission; exhaustion is the
//!   `capacity` error, and no session record is created
//!
//! ### Stage Worker Slots
//! - **Purpose:** Cap concurrently executing stage attempts (default 20)
//! - **Use:** Acquired (waiting) before each stage attempt runs
//!
//! ### Image Task Slots
//! - **Purpose:** Global cap on in-flight image tasks across all sessions
//!   (default 100); the per-session bound is enforced by the fan-out
//!   executor on top of this
//!
//! ### Memory Gauge
//! - **Purpose:** Monitor payload memory held by live sessions (gauge only,
//!   no enforcement)

use comicforge_domain::EngineError;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Configuration for the global resource pool.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Concurrent session cap (default 50)
    pub max_sessions: usize,
    /// Concurrent stage worker cap (default 20)
    pub max_stage_workers: usize,
    /// Global concurrent image task cap (default 100)
    pub max_image_tasks: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_sessions: 50,
            max_stage_workers: 20,
            max_image_tasks: 100,
        }
    }
}

/// Global resource pool for engine-wide admission control.
///
/// Semaphores provide backpressure: work waits (or, for admission, fails
/// fast) when a resource is saturated, and RAII permits release on drop.
/// Permits are acquired in owned form so they can travel into spawned
/// session tasks.
pub struct ResourcePool {
    sessions: Arc<Semaphore>,
    stage_workers: Arc<Semaphore>,
    image_tasks: Arc<Semaphore>,
    memory_used: AtomicUsize,
    session_slots: usize,
    worker_slots: usize,
    image_slots: usize,
}

impl ResourcePool {
    pub fn new(config: PoolConfig) -> Result<Self, EngineError> {
        if config.max_sessions == 0 || config.max_stage_workers == 0 || config.max_image_tasks == 0 {
            return Err(EngineError::invalid_config("resource pool caps must be nonzero"));
        }
        Ok(Self {
            sessions: Arc::new(Semaphore::new(config.max_sessions)),
            stage_workers: Arc::new(Semaphore::new(config.max_stage_workers)),
            image_tasks: Arc::new(Semaphore::new(config.max_image_tasks)),
            memory_used: AtomicUsize::new(0),
            session_slots: config.max_sessions,
            worker_slots: config.max_stage_workers,
            image_slots: config.max_image_tasks,
        })
    }

    /// Attempts to admit a session without waiting.
    ///
    /// Admission never queues: a full engine answers `capacity` immediately
    /// and creates no session record.
    pub fn try_admit_session(&self) -> Result<OwnedSemaphorePermit, EngineError> {
        self.sessions
            .clone()
            .try_acquire_owned()
            .map_err(|_| EngineError::capacity(format!("all {} session slots in use", self.session_slots)))
    }

    /// Acquires a stage worker slot, waiting while the pool is saturated.
    pub async fn acquire_stage_worker(&self) -> Result<OwnedSemaphorePermit, EngineError> {
        self.stage_workers
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| EngineError::internal("stage worker semaphore closed"))
    }

    /// Acquires a global image task slot, waiting while saturated.
    pub async fn acquire_image_slot(&self) -> Result<OwnedSemaphorePermit, EngineError> {
        self.image_tasks
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| EngineError::internal("image task semaphore closed"))
    }

    /// Track payload memory held by a live session (gauge only).
    pub fn allocate_memory(&self, bytes: usize) {
        self.memory_used.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn release_memory(&self, bytes: usize) {
        self.memory_used.fetch_sub(bytes, Ordering::Relaxed);
    }

    pub fn memory_used(&self) -> usize {
        self.memory_used.load(Ordering::Relaxed)
    }

    pub fn sessions_available(&self) -> usize {
        self.sessions.available_permits()
    }

    pub fn sessions_total(&self) -> usize {
        self.session_slots
    }

    pub fn stage_workers_available(&self) -> usize {
        self.stage_workers.available_permits()
    }

    pub fn stage_workers_total(&self) -> usize {
        self.worker_slots
    }

    pub fn image_slots_available(&self) -> usize {
        self.image_tasks.available_permits()
    }

    pub fn image_slots_total(&self) -> usize {
        self.image_slots
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_creation_defaults() {
        let pool = ResourcePool::new(PoolConfig::default()).unwrap();
        assert_eq!(pool.sessions_available(), 50);
        assert_eq!(pool.stage_workers_available(), 20);
        assert_eq!(pool.image_slots_available(), 100);
    }

    #[test]
    fn test_zero_caps_rejected() {
        let config = PoolConfig {
            max_sessions: 0,
            ..Default::default()
        };
        assert!(ResourcePool::new(config).is_err());
    }

    #[test]
    fn test_admission_fails_fast_at_capacity() {
        let pool = ResourcePool::new(PoolConfig {
            max_sessions: 2,
            ..Default::default()
        })
        .unwrap();

        let _a = pool.try_admit_session().unwrap();
        let _b = pool.try_admit_session().unwrap();
        let err = pool.try_admit_session().unwrap_err();
        assert_eq!(err.kind(), "capacity");

        drop(_a);
        assert!(pool.try_admit_session().is_ok());
    }

    #[tokio::test]
    async fn test_worker_slots_release_on_drop() {
        let pool = ResourcePool::new(PoolConfig {
            max_stage_workers: 1,
            ..Default::default()
        })
        .unwrap();

        let permit = pool.acquire_stage_worker().await.unwrap();
        assert_eq!(pool.stage_workers_available(), 0);
        drop(permit);
        assert_eq!(pool.stage_workers_available(), 1);
    }

    #[test]
    fn test_memory_gauge() {
        let pool = ResourcePool::new(PoolConfig::default()).unwrap();
        pool.allocate_memory(2048);
        pool.allocate_memory(1024);
        pool.release_memory(1024);
        assert_eq!(pool.memory_used(), 2048);
    }
}
