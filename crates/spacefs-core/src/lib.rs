// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! spacefs-core: decomposed-node storage addressing and consistency
//!
//! The library a storage-provider service builds on: resource-id codec,
//! deterministic id-to-path sharding, pluggable per-node metadata storage,
//! path-named advisory locks, and modification-time tracking with tree-time
//! propagation, all on top of a plain filesystem.

pub mod config;
pub mod error;
pub mod id;
pub mod lock;
pub mod lookup;
pub mod metadata;
pub mod node;
pub mod shard;
pub mod time;
pub mod tree;

pub use config::{MetadataBackendKind, StoreConfig};
pub use error::{StoreError, StoreResult};
pub use id::{new_opaque_id, Reference, ResourceId};
pub use lock::{LockHandle, LockKind, LockManager};
pub use lookup::Lookup;
pub use metadata::{create_metadata_backend, MetadataBackend, SidecarBackend, XattrBackend};
pub use node::Node;
pub use shard::{shard, unshard};
pub use time::TimeManager;
pub use tree::Tree;
