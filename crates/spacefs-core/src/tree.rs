// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Tree mutations and time propagation
//!
//! `Tree` wires the resolver, metadata backend, lock manager and time
//! manager together behind the operations a storage-provider service calls.
//! Every mutation follows the same shape: resolve, take the exclusive lock,
//! apply, stamp mtime, propagate tmtime toward the space root, release.
//! Reads never take locks.

use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};
use crate::id::{new_opaque_id, Reference, ResourceId};
use crate::lock::{LockKind, LockManager};
use crate::lookup::Lookup;
use crate::metadata::{
    create_metadata_backend, MetadataBackend, ATTR_NAME, ATTR_PARENT_ID, ATTR_REFERENCE,
};
use crate::node::Node;
use crate::time::TimeManager;
use chrono::{DateTime, Utc};
use std::fs;
use std::sync::Arc;

pub struct Tree {
    lookup: Lookup,
    times: TimeManager,
    locks: LockManager,
}

impl Tree {
    pub fn new(config: &StoreConfig) -> Self {
        let backend = create_metadata_backend(config.metadata_backend);
        Self::with_backend(config, backend)
    }

    /// Construct with an explicit backend (tests inject mocks here).
    pub fn with_backend(config: &StoreConfig, backend: Arc<dyn MetadataBackend>) -> Self {
        Self {
            lookup: Lookup::new(config, Arc::clone(&backend)),
            times: TimeManager::new(backend),
            locks: LockManager::from_config(config),
        }
    }

    pub fn lookup(&self) -> &Lookup {
        &self.lookup
    }

    pub fn times(&self) -> &TimeManager {
        &self.times
    }

    pub fn locks(&self) -> &LockManager {
        &self.locks
    }

    pub fn resolve(&self, reference: &Reference) -> StoreResult<Node> {
        self.lookup.node_from_reference(reference)
    }

    pub fn path(&self, node: &Node) -> StoreResult<String> {
        self.lookup.path(node)
    }

    /// Initialize a space: creates the root node directory
    /// (`spaces/<sharded id>/nodes/<sharded id>`) and stamps its mtime.
    pub fn create_space(&self, storage_id: &str, space_id: &str) -> StoreResult<Node> {
        if space_id.is_empty() {
            return Err(StoreError::InvalidId);
        }
        let id = ResourceId::new(storage_id, space_id, "");
        let mut root = self.lookup.node_from_id(&id)?;
        if let Some(parent) = root.internal_path().parent() {
            fs::create_dir_all(parent)?;
        }
        // create_dir, not create_dir_all: the root directory itself is the
        // claim, so of two racing initializers exactly one wins
        match fs::create_dir(root.internal_path()) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(StoreError::AlreadyExists);
            }
            Err(e) => return Err(e.into()),
        }
        root.mark_exists(true);
        self.lookup
            .backend()
            .set(root.internal_path(), ATTR_NAME, b"")?;
        self.times.set_mtime(&root, Some(Utc::now()))?;
        Ok(root)
    }

    /// Create a child node under `parent` with a generated opaque id. The
    /// parent is locked exclusively for the link + attribute writes; the
    /// parent's mtime changes and its ancestors' tmtime are propagated.
    pub fn create_node(&self, parent: &Node, name: &str) -> StoreResult<Node> {
        self.create_node_with_id(parent, name, &new_opaque_id())
    }

    /// Like `create_node`, with a caller-supplied opaque id (migrations,
    /// deterministic tests).
    pub fn create_node_with_id(
        &self,
        parent: &Node,
        name: &str,
        opaque_id: &str,
    ) -> StoreResult<Node> {
        if name.is_empty() || name.contains('/') {
            return Err(StoreError::InvalidReference);
        }
        if !parent.exists() {
            return Err(StoreError::NotFound);
        }

        let lock = self.locks.lock(parent.internal_path(), LockKind::Exclusive)?;

        let link = parent.internal_path().join(name);
        if fs::symlink_metadata(&link).is_ok() {
            return Err(StoreError::AlreadyExists);
        }

        let id = ResourceId::new(
            parent.id().storage_id.clone(),
            parent.id().space_id.clone(),
            opaque_id.to_string(),
        );
        let mut child = self.lookup.node_from_id(&id)?;
        fs::create_dir_all(child.internal_path())?;
        child.mark_exists(true);

        let backend = self.lookup.backend();
        backend.set(child.internal_path(), ATTR_NAME, name.as_bytes())?;
        backend.set(
            child.internal_path(),
            ATTR_PARENT_ID,
            parent.id().format().as_bytes(),
        )?;

        let target = self
            .lookup
            .child_link_target(&parent.id().opaque_id, opaque_id);
        std::os::unix::fs::symlink(&target, &link)?;

        let now = Utc::now();
        self.times.set_mtime(&child, Some(now))?;
        self.times.set_mtime(parent, Some(now))?;
        lock.release()?;

        self.propagate_tmtime(parent, now);
        Ok(child)
    }

    /// Turn a node into a reference marker pointing at another resource
    /// (mounted share): resolution through this node jumps to the target.
    pub fn set_reference(&self, node: &Node, target: &ResourceId) -> StoreResult<()> {
        if !node.exists() {
            return Err(StoreError::NotFound);
        }
        let lock = self.locks.lock(node.internal_path(), LockKind::Exclusive)?;
        self.lookup.backend().set(
            node.internal_path(),
            ATTR_REFERENCE,
            target.format().as_bytes(),
        )?;
        lock.release()
    }

    /// Soft-delete: stamp the deletion time and unlink the child entry from
    /// the parent. The node directory and its attributes stay behind for the
    /// trash; permanent deletion removes them later.
    pub fn soft_delete(&self, node: &Node) -> StoreResult<()> {
        if !node.exists() {
            return Err(StoreError::NotFound);
        }
        if node.is_space_root() {
            return Err(StoreError::InvalidReference);
        }
        let name = self.lookup.name(node)?;
        let parent = self.lookup.parent(node)?;

        let lock = self.locks.lock(parent.internal_path(), LockKind::Exclusive)?;
        let now = Utc::now();
        self.times.set_dtime(node, Some(now))?;
        match fs::remove_file(parent.internal_path().join(&name)) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        self.times.set_mtime(&parent, Some(now))?;
        lock.release()?;

        self.propagate_tmtime(&parent, now);
        Ok(())
    }

    /// Restore a soft-deleted node under its recorded parent and name.
    pub fn restore(&self, node: &Node) -> StoreResult<()> {
        if !node.exists() {
            return Err(StoreError::NotFound);
        }
        let name = self.lookup.name(node)?;
        let parent = self.lookup.parent(node)?;
        if !parent.exists() {
            return Err(StoreError::NotFound);
        }

        let lock = self.locks.lock(parent.internal_path(), LockKind::Exclusive)?;
        let link = parent.internal_path().join(&name);
        if fs::symlink_metadata(&link).is_ok() {
            return Err(StoreError::AlreadyExists);
        }
        let target = self
            .lookup
            .child_link_target(&parent.id().opaque_id, &node.id().opaque_id);
        std::os::unix::fs::symlink(&target, &link)?;
        self.times.set_dtime(node, None)?;

        let now = Utc::now();
        self.times.set_mtime(&parent, Some(now))?;
        lock.release()?;

        self.propagate_tmtime(&parent, now);
        Ok(())
    }

    /// Propagate a new modification time to every strict ancestor of `node`
    /// up to the space root: each ancestor's tmtime becomes
    /// `max(current tmtime, t)`. Ancestors are locked one at a time, never
    /// the whole chain, so tmtime is eventually (not strictly) consistent
    /// under concurrent writers. A failing ancestor is logged and skipped;
    /// the caller's own mtime write has already succeeded.
    pub fn propagate_tmtime(&self, node: &Node, t: DateTime<Utc>) {
        // refresh the node's own tmtime first in case an earlier propagation
        // left a now-stale explicit attribute on it
        if let Err(e) = self.bump_tmtime(node, t) {
            tracing::warn!(node = %node.id(), error = %e, "tmtime refresh failed");
        }
        let mut current = node.clone();
        while !current.is_space_root() {
            current = match self.lookup.parent(&current) {
                Ok(parent) => parent,
                Err(e) => {
                    tracing::warn!(
                        node = %current.id(),
                        error = %e,
                        "tmtime propagation lost the parent chain"
                    );
                    return;
                }
            };
            if let Err(e) = self.bump_tmtime(&current, t) {
                tracing::warn!(
                    node = %current.id(),
                    error = %e,
                    "tmtime propagation failed for ancestor"
                );
            }
        }
    }

    fn bump_tmtime(&self, ancestor: &Node, t: DateTime<Utc>) -> StoreResult<()> {
        let lock = self.locks.lock(ancestor.internal_path(), LockKind::Exclusive)?;
        let current = self.times.tmtime(ancestor)?;
        if t > current {
            self.times.set_tmtime(ancestor, Some(t))?;
        }
        lock.release()
    }
}
