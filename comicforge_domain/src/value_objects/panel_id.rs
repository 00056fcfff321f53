// /////////////////////////////////////////////////////////////////////////////
// Comicforge
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Panel identifier value object.
//!
//! Panels are addressed by their storyboard position rather than a random id:
//! page number plus panel index within the page, both one-based. The derived
//! ordering is reading order, which is what the image fan-out executor uses to
//! break priority ties ("earliest panel id first").

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::EngineError;

/// Storyboard-position identifier of a single panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PanelId {
    page: u32,
    index: u32,
}

impl PanelId {
    /// Creates a panel id; page and index are one-based.
    pub fn new(page: u32, index: u32) -> Result<Self, EngineError> {
        if page == 0 || index == 0 {
            return Err(EngineError::invalid_input(format!(
                "panel id components are one-based, got page {} panel {}",
                page, index
            )));
        }
        Ok(Self { page, index })
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    /// Whether the panel sits on the opening page.
    pub fn on_first_page(&self) -> bool {
        self.page == 1
    }
}

impl fmt::Display for PanelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "p{:02}-{:02}", self.page, self.index)
    }
}

impl FromStr for PanelId {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || EngineError::invalid_input(format!("invalid panel id '{}'", s));
        let rest = s.strip_prefix('p').ok_or_else(bad)?;
        let (page, index) = rest.split_once('-').ok_or_else(bad)?;
        let page = page.parse::<u32>().map_err(|_| bad())?;
        let index = index.parse::<u32>().map_err(|_| bad())?;
        Self::new(page, index)
    }
}

impl Serialize for PanelId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for PanelId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
