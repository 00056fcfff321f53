// /////////////////////////////////////////////////////////////////////////////
// Comicforge
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Configuration Module

pub mod engine_config;

pub use engine_config::{
    BusConfig, EngineConfig, HitlConfig, LimitsConfig, QualityConfig, RetryConfig, StagesConfig,
};
