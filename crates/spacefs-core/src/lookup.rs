// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Resolver: references to nodes, nodes back to human-readable paths
//!
//! On-disk layout (fixed for compatibility):
//! `root/spaces/<sharded spaceID>/nodes/<sharded opaqueID>`. A directory
//! node's children are symlinks named after the child inside the node
//! directory, targeting the sharded child directory; the child's opaque id
//! is recovered by un-sharding the link target. The authoritative parent
//! pointer is the child's `parentid` attribute.

use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};
use crate::id::{clean_path, Reference, ResourceId};
use crate::metadata::{MetadataBackend, ATTR_NAME, ATTR_PARENT_ID, ATTR_REFERENCE};
use crate::node::Node;
use crate::shard::{shard, unshard};
use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

pub struct Lookup {
    root: PathBuf,
    shard_depth: usize,
    shard_width: usize,
    backend: Arc<dyn MetadataBackend>,
}

impl Lookup {
    pub fn new(config: &StoreConfig, backend: Arc<dyn MetadataBackend>) -> Self {
        Self {
            root: config.root.clone(),
            shard_depth: config.shard_depth,
            shard_width: config.shard_width,
            backend,
        }
    }

    pub fn backend(&self) -> &Arc<dyn MetadataBackend> {
        &self.backend
    }

    pub(crate) fn shard_id(&self, id: &str) -> PathBuf {
        shard(id, self.shard_depth, self.shard_width)
    }

    /// `root/spaces/<sharded spaceID>/nodes`
    pub(crate) fn nodes_dir(&self, space_id: &str) -> PathBuf {
        self.root
            .join("spaces")
            .join(self.shard_id(space_id))
            .join("nodes")
    }

    pub(crate) fn node_dir(&self, space_id: &str, opaque_id: &str) -> PathBuf {
        self.nodes_dir(space_id).join(self.shard_id(opaque_id))
    }

    /// Relative symlink target from a parent's node directory to a child's,
    /// climbing out of the parent's shard levels first.
    pub(crate) fn child_link_target(&self, parent_opaque: &str, child_opaque: &str) -> PathBuf {
        let mut target = PathBuf::new();
        for _ in self.shard_id(parent_opaque).components() {
            target.push("..");
        }
        target.push(self.shard_id(child_opaque));
        target
    }

    /// Resolve a bare resource id to a node. An empty opaque id denotes the
    /// space root, whose opaque id equals the space id.
    pub fn node_from_id(&self, id: &ResourceId) -> StoreResult<Node> {
        if id.space_id.is_empty() {
            return Err(StoreError::InvalidReference);
        }
        let opaque_id = if id.opaque_id.is_empty() {
            id.space_id.clone()
        } else {
            id.opaque_id.clone()
        };
        let internal_path = self.node_dir(&id.space_id, &opaque_id);
        let exists = fs::symlink_metadata(&internal_path).is_ok();
        let space_root = ResourceId::new(
            id.storage_id.clone(),
            id.space_id.clone(),
            id.space_id.clone(),
        );
        Ok(Node::new(
            ResourceId::new(id.storage_id.clone(), id.space_id.clone(), opaque_id),
            space_root,
            internal_path,
            exists,
        ))
    }

    /// Resolve a reference: the base node, then the relative path if any,
    /// dereferencing reference markers along the way.
    pub fn node_from_reference(&self, reference: &Reference) -> StoreResult<Node> {
        let base = self.node_from_id(&reference.resource)?;
        if reference.path.is_empty() {
            return Ok(base);
        }
        self.walk_path(&base, &reference.path, true, |_| Ok(()))
    }

    /// Resolve one child entry under `parent` by name. A missing entry
    /// yields a non-existing node carrying the would-be link location.
    pub fn child_of(&self, parent: &Node, name: &str) -> StoreResult<Node> {
        let link = parent.internal_path().join(name);
        match fs::read_link(&link) {
            Ok(target) => {
                let opaque_id = unshard(&target);
                self.node_from_id(&ResourceId::new(
                    parent.id().storage_id.clone(),
                    parent.id().space_id.clone(),
                    opaque_id,
                ))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Node::new(
                ResourceId::new(
                    parent.id().storage_id.clone(),
                    parent.id().space_id.clone(),
                    String::new(),
                ),
                parent.space_root().clone(),
                link,
                false,
            )),
            Err(e) => Err(e.into()),
        }
    }

    /// Walk `path` segment by segment below `root`, invoking `visit` on each
    /// resolved node. A missing non-terminal segment fails `NotFound`
    /// immediately; the terminal segment may not exist (callers create it).
    pub fn walk_path<F>(
        &self,
        root: &Node,
        path: &str,
        follow_references: bool,
        mut visit: F,
    ) -> StoreResult<Node>
    where
        F: FnMut(&Node) -> StoreResult<()>,
    {
        let clean = clean_path(path)?;
        let mut current = root.clone();
        if follow_references {
            // the base node may itself be a mounted-share marker
            current = self.follow_reference(current)?;
        }
        if clean.is_empty() {
            return Ok(current);
        }
        let segments: Vec<&str> = clean.split('/').collect();
        let last = segments.len() - 1;
        for (i, segment) in segments.iter().enumerate() {
            if !current.exists() {
                return Err(StoreError::NotFound);
            }
            let mut child = self.child_of(&current, segment)?;
            if !child.exists() {
                if i == last {
                    return Ok(child);
                }
                tracing::trace!(segment, "walk aborted at missing segment");
                return Err(StoreError::NotFound);
            }
            if follow_references {
                child = self.follow_reference(child)?;
            }
            visit(&child)?;
            current = child;
        }
        Ok(current)
    }

    /// If the node carries a reference marker, jump to the target resource
    /// (possibly in a different space, e.g. a mounted share).
    fn follow_reference(&self, node: Node) -> StoreResult<Node> {
        match self.backend.get(node.internal_path(), ATTR_REFERENCE) {
            Ok(raw) => {
                let target = String::from_utf8(raw)
                    .map_err(|_| StoreError::InvalidReference)?;
                self.node_from_id(&ResourceId::parse(&target)?)
            }
            Err(StoreError::NotFound) => Ok(node),
            Err(e) => Err(e),
        }
    }

    /// The node's name, as recorded by its parent at creation time.
    pub fn name(&self, node: &Node) -> StoreResult<String> {
        let raw = self.backend.get(node.internal_path(), ATTR_NAME)?;
        String::from_utf8(raw).map_err(|_| {
            StoreError::Backend(io::Error::new(
                io::ErrorKind::InvalidData,
                "node name is not valid UTF-8",
            ))
        })
    }

    /// The node's parent, looked up through its `parentid` attribute. Space
    /// roots have no parent.
    pub fn parent(&self, node: &Node) -> StoreResult<Node> {
        if node.is_space_root() {
            return Err(StoreError::NotFound);
        }
        let raw = self.backend.get(node.internal_path(), ATTR_PARENT_ID)?;
        let parent_id = String::from_utf8(raw).map_err(|_| StoreError::InvalidReference)?;
        self.node_from_id(&ResourceId::parse(&parent_id)?)
    }

    /// Inverse of `walk_path`: reconstruct the human-readable path of a node
    /// by walking parent ids up to the space root. The chain is expected to
    /// terminate; a repeated id means a corrupted parent chain and aborts
    /// the walk instead of looping.
    pub fn path(&self, node: &Node) -> StoreResult<String> {
        let mut segments = Vec::new();
        let mut seen = HashSet::new();
        let mut current = node.clone();
        while !current.is_space_root() {
            if !seen.insert(current.id().opaque_id.clone()) {
                return Err(StoreError::InvalidReference);
            }
            segments.push(self.name(&current)?);
            current = self.parent(&current)?;
        }
        segments.reverse();
        Ok(format!("/{}", segments.join("/")))
    }
}
