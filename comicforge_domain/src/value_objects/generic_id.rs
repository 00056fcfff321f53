// /////////////////////////////////////////////////////////////////////////////
// Comicforge
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Generic ID Value Object
//!
//! Type-safe, ULID-backed identifiers for the comicforge domain. A phantom
//! category type prevents mixing identifier kinds at compile time while the
//! underlying ULID keeps ids sortable by creation time and safe for use in
//! file names and URLs.
//!
//! ## Key Properties
//!
//! - **Type Safety**: `SessionId` and `VersionId` are distinct types; passing
//!   one where the other is expected is a compile error
//! - **Sortable**: ULIDs sort lexicographically by creation time
//! - **Compact**: 26-character Crockford Base32 representation
//! - **Zero-Cost**: the phantom type has no runtime overhead
//!
//! ## Usage
//!
//! ```
//! use comicforge_domain::value_objects::generic_id::SessionId;
//!
//! let id = SessionId::new();
//! let parsed: SessionId = id.to_string().parse().unwrap();
//! assert_eq!(id, parsed);
//! ```

use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use ulid::Ulid;

use crate::error::EngineError;

/// Marker trait for identifier categories.
///
/// Each id kind provides its category name, used in error messages and
/// diagnostics.
pub trait IdCategory: Send + Sync + 'static {
    /// Unique name of this id category (e.g., "session")
    fn category_name() -> &'static str;
}

/// Generic ULID-backed identifier parameterised by category.
///
/// Equality, ordering, and hashing are delegated to the underlying ULID;
/// two ids of different categories are different types and never compare.
pub struct GenericId<C: IdCategory> {
    ulid: Ulid,
    _category: PhantomData<C>,
}

impl<C: IdCategory> GenericId<C> {
    /// Mints a fresh identifier.
    pub fn new() -> Self {
        Self {
            ulid: Ulid::new(),
            _category: PhantomData,
        }
    }

    /// Wraps an existing ULID.
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self {
            ulid,
            _category: PhantomData,
        }
    }

    /// Returns the underlying ULID.
    pub fn as_ulid(&self) -> Ulid {
        self.ulid
    }

    /// Parses an id from its 26-character string form.
    pub fn parse(s: &str) -> Result<Self, EngineError> {
        let ulid = Ulid::from_string(s).map_err(|e| {
            EngineError::invalid_input(format!("invalid {} id '{}': {}", C::category_name(), s, e))
        })?;
        Ok(Self::from_ulid(ulid))
    }
}

impl<C: IdCategory> Default for GenericId<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: IdCategory> Clone for GenericId<C> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<C: IdCategory> Copy for GenericId<C> {}

impl<C: IdCategory> PartialEq for GenericId<C> {
    fn eq(&self, other: &Self) -> bool {
        self.ulid == other.ulid
    }
}

impl<C: IdCategory> Eq for GenericId<C> {}

impl<C: IdCategory> PartialOrd for GenericId<C> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<C: IdCategory> Ord for GenericId<C> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.ulid.cmp(&other.ulid)
    }
}

impl<C: IdCategory> Hash for GenericId<C> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.ulid.hash(state);
    }
}

impl<C: IdCategory> fmt::Debug for GenericId<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", C::category_name(), self.ulid)
    }
}

// Display writes the bare ULID so ids round-trip through logs and journals.
impl<C: IdCategory> fmt::Display for GenericId<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.ulid)
    }
}

impl<C: IdCategory> FromStr for GenericId<C> {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl<C: IdCategory> Serialize for GenericId<C> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.ulid.to_string())
    }
}

impl<'de, C: IdCategory> Deserialize<'de> for GenericId<C> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        GenericId::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// Category marker for generation sessions
#[derive(Debug)]
pub struct SessionIdCategory;

impl IdCategory for SessionIdCategory {
    fn category_name() -> &'static str {
        "session"
    }
}

/// Category marker for version log entries
#[derive(Debug)]
pub struct VersionIdCategory;

impl IdCategory for VersionIdCategory {
    fn category_name() -> &'static str {
        "version"
    }
}

/// Category marker for submission owners
#[derive(Debug)]
pub struct OwnerIdCategory;

impl IdCategory for OwnerIdCategory {
    fn category_name() -> &'static str {
        "owner"
    }
}

/// Identifier of a generation session
pub type SessionId = GenericId<SessionIdCategory>;

/// Identifier of a version log entry
pub type VersionId = GenericId<VersionIdCategory>;

/// Identifier of a submission owner
pub type OwnerId = GenericId<OwnerIdCategory>;
