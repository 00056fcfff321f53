// /////////////////////////////////////////////////////////////////////////////
// Comicforge
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Metrics Module
//!
//! Prometheus-backed engine observability.

pub mod service;

pub use service::{MetricsService, PIPELINE_BUDGET_SECS};
