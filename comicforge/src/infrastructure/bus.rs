// /////////////////////////////////////////////////////////////////////////////
// Comicforge
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Live Update Bus Module

pub mod update_bus;

pub use update_bus::{Subscription, UpdateBus, DEFAULT_QUEUE_CAPACITY};
