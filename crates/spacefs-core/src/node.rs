// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Resolved node handles
//!
//! A `Node` is a transient, per-request value: only its backing directory
//! entry and attribute set persist. Back-references (parent, space root) are
//! carried as ids and re-resolved on demand, never as retained pointers, so
//! no reference cycle can form.

use crate::id::ResourceId;
use std::path::{Path, PathBuf};

#[derive(Clone, Debug)]
pub struct Node {
    id: ResourceId,
    /// Id of the root node of this node's space. `space_root.space_id` is
    /// always equal to `id.space_id`.
    space_root: ResourceId,
    /// Derived from the id via sharding; never stored on disk.
    internal_path: PathBuf,
    exists: bool,
}

impl Node {
    pub(crate) fn new(
        id: ResourceId,
        space_root: ResourceId,
        internal_path: PathBuf,
        exists: bool,
    ) -> Self {
        debug_assert_eq!(id.space_id, space_root.space_id);
        Self {
            id,
            space_root,
            internal_path,
            exists,
        }
    }

    pub fn id(&self) -> &ResourceId {
        &self.id
    }

    pub fn space_root(&self) -> &ResourceId {
        &self.space_root
    }

    /// Sharded on-disk directory of this node.
    pub fn internal_path(&self) -> &Path {
        &self.internal_path
    }

    pub fn exists(&self) -> bool {
        self.exists
    }

    /// A space root is stored as a node whose opaque id equals its space id.
    pub fn is_space_root(&self) -> bool {
        self.id.opaque_id == self.id.space_id
    }

    pub(crate) fn mark_exists(&mut self, exists: bool) {
        self.exists = exists;
    }
}
