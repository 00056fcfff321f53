// /////////////////////////////////////////////////////////////////////////////
// Comicforge
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Adapters Module
//!
//! Concrete backends: the shared image cache and the deterministic scripted
//! implementations of the generative model ports.

pub mod image_cache;
pub mod scripted_image_model;
pub mod scripted_text_model;

pub use image_cache::ImageCache;
pub use scripted_image_model::ScriptedImageModel;
pub use scripted_text_model::ScriptedTextModel;
