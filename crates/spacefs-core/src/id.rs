// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Storage-space identifier codec
//!
//! A resource is addressed by a `(storage, space, opaque)` triple encoded as
//! `storage$space!opaque`. The `$` is omitted when the storage id is empty
//! and the `!` is omitted when the opaque id is empty; an empty opaque id
//! denotes the root node of the space.

use crate::error::{StoreError, StoreResult};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Three-part identifier of one node within one space of one storage
/// provider.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceId {
    pub storage_id: String,
    pub space_id: String,
    pub opaque_id: String,
}

impl ResourceId {
    pub fn new(
        storage_id: impl Into<String>,
        space_id: impl Into<String>,
        opaque_id: impl Into<String>,
    ) -> Self {
        Self {
            storage_id: storage_id.into(),
            space_id: space_id.into(),
            opaque_id: opaque_id.into(),
        }
    }

    /// Encode as `storage$space!opaque`. No trailing `!` is ever emitted for
    /// an empty opaque id, so a space-root id round-trips unchanged.
    pub fn format(&self) -> String {
        let mut s = String::with_capacity(
            self.storage_id.len() + self.space_id.len() + self.opaque_id.len() + 2,
        );
        if !self.storage_id.is_empty() {
            s.push_str(&self.storage_id);
            s.push('$');
        }
        s.push_str(&self.space_id);
        if !self.opaque_id.is_empty() {
            s.push('!');
            s.push_str(&self.opaque_id);
        }
        s
    }

    /// Decode the `storage$space!opaque` form. An empty input is invalid.
    pub fn parse(s: &str) -> StoreResult<Self> {
        if s.is_empty() {
            return Err(StoreError::InvalidId);
        }
        let (head, opaque_id) = match s.split_once('!') {
            Some((head, rest)) => (head, rest.to_string()),
            None => (s, String::new()),
        };
        let (storage_id, space_id) = match head.split_once('$') {
            Some((st, sp)) => (st.to_string(), sp.to_string()),
            None => (String::new(), head.to_string()),
        };
        if space_id.is_empty() {
            return Err(StoreError::InvalidId);
        }
        Ok(Self {
            storage_id,
            space_id,
            opaque_id,
        })
    }

    /// Compatibility shim for two-part identifiers that predate spaces: when
    /// the space id is absent, the legacy storage id carried both parts
    /// joined with `$`. Guarded so it is never applied to an already
    /// up-to-date id.
    pub fn update_legacy(mut self) -> Self {
        if self.space_id.is_empty() {
            if let Some((storage_id, space_id)) = self.storage_id.split_once('$') {
                let (storage_id, space_id) = (storage_id.to_string(), space_id.to_string());
                self.storage_id = storage_id;
                self.space_id = space_id;
            }
        }
        self
    }
}

impl std::fmt::Display for ResourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.format())
    }
}

impl std::str::FromStr for ResourceId {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// A resource id plus an optional relative path below it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Reference {
    pub resource: ResourceId,
    /// Cleaned relative path, empty when the reference is the node itself.
    pub path: String,
}

impl Reference {
    pub fn new(resource: ResourceId, path: &str) -> StoreResult<Self> {
        Ok(Self {
            resource,
            path: clean_path(path)?,
        })
    }

    /// Encode as `<resource id>/<relative path>`; an empty path never
    /// produces a trailing slash.
    pub fn format(&self) -> String {
        if self.path.is_empty() {
            self.resource.format()
        } else {
            format!("{}/{}", self.resource.format(), self.path)
        }
    }

    pub fn parse(s: &str) -> StoreResult<Self> {
        match s.split_once('/') {
            Some((id, path)) => Self::new(ResourceId::parse(id)?, path),
            None => Ok(Self {
                resource: ResourceId::parse(s)?,
                path: String::new(),
            }),
        }
    }
}

impl std::fmt::Display for Reference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.format())
    }
}

/// Normalize a relative path: drop empty and `.` segments, resolve `..`
/// against preceding segments. A path that would climb above its starting
/// point escapes the space and is rejected.
pub fn clean_path(path: &str) -> StoreResult<String> {
    let mut segments: Vec<&str> = Vec::new();
    for seg in path.split('/') {
        match seg {
            "" | "." => {}
            ".." => {
                if segments.pop().is_none() {
                    return Err(StoreError::InvalidReference);
                }
            }
            _ => segments.push(seg),
        }
    }
    Ok(segments.join("/"))
}

/// Generate a fresh opaque node id: a random v4 UUID rendered as 32 hex
/// characters. Random ids are safe to mint from any process sharing the
/// storage root and give the sharder uniformly distributed prefixes.
pub fn new_opaque_id() -> String {
    Uuid::new_v4().simple().to_string()
}
