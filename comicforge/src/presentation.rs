// /////////////////////////////////////////////////////////////////////////////
// Comicforge
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Interface Layer
//!
//! The outermost layer: the command-line interface. Receives external
//! requests, validates input, and translates them into application-layer
//! operations. Transport framing (HTTP/WS) is out of scope for the engine;
//! the CLI is the in-tree consumer.

pub mod cli;
