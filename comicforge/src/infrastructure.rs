// /////////////////////////////////////////////////////////////////////////////
// Comicforge
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Infrastructure Layer
//!
//! Concrete implementations behind the domain's ports: stage workers, the
//! image fan-out executor, the live update bus, the resource pool, scripted
//! model adapters, persistence, metrics, and configuration.

pub mod adapters;
pub mod bus;
pub mod config;
pub mod metrics;
pub mod persistence;
pub mod quality;
pub mod runtime;
pub mod stages;
