// /////////////////////////////////////////////////////////////////////////////
// Comicforge
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Runtime Module
//!
//! Concurrency primitives of the engine: the global resource pool, the image
//! fan-out executor, and supervised task spawning.

pub mod image_executor;
pub mod resource_pool;
pub mod supervisor;

pub use image_executor::{FanoutOutcome, ImageExecutor};
pub use resource_pool::{PoolConfig, ResourcePool};
pub use supervisor::{join_supervised, spawn_supervised, EngineResult};
