// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Store configuration

use serde::Deserialize;
use std::path::PathBuf;

/// Which metadata backend a storage root uses. Chosen at deployment time and
/// never mixed within one root.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetadataBackendKind {
    /// Extended attributes on the node directory itself.
    Xattr,
    /// One serialized JSON document per node in a sibling `.meta` file.
    #[default]
    Sidecar,
}

/// Configuration for one storage root.
#[derive(Clone, Debug, Deserialize)]
pub struct StoreConfig {
    /// Directory all spaces of this storage provider live under.
    pub root: PathBuf,
    #[serde(default = "default_shard_depth")]
    pub shard_depth: usize,
    #[serde(default = "default_shard_width")]
    pub shard_width: usize,
    #[serde(default)]
    pub metadata_backend: MetadataBackendKind,
    /// Number of attempts before lock acquisition gives up.
    #[serde(default = "default_max_acquire_lock_cycles")]
    pub max_acquire_lock_cycles: u32,
    /// Linear backoff factor: attempt `n` sleeps `n * factor` milliseconds.
    #[serde(default = "default_lock_cycle_duration_factor_ms")]
    pub lock_cycle_duration_factor_ms: u64,
}

fn default_shard_depth() -> usize {
    4
}

fn default_shard_width() -> usize {
    2
}

fn default_max_acquire_lock_cycles() -> u32 {
    20
}

fn default_lock_cycle_duration_factor_ms() -> u64 {
    30
}

impl StoreConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            shard_depth: default_shard_depth(),
            shard_width: default_shard_width(),
            metadata_backend: MetadataBackendKind::default(),
            max_acquire_lock_cycles: default_max_acquire_lock_cycles(),
            lock_cycle_duration_factor_ms: default_lock_cycle_duration_factor_ms(),
        }
    }

    pub fn with_backend(mut self, kind: MetadataBackendKind) -> Self {
        self.metadata_backend = kind;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_minimal_json() {
        let cfg: StoreConfig = serde_json::from_str(r#"{"root": "/var/lib/spacefs"}"#).unwrap();
        assert_eq!(cfg.root, PathBuf::from("/var/lib/spacefs"));
        assert_eq!(cfg.shard_depth, 4);
        assert_eq!(cfg.shard_width, 2);
        assert_eq!(cfg.metadata_backend, MetadataBackendKind::Sidecar);
        assert_eq!(cfg.max_acquire_lock_cycles, 20);
        assert_eq!(cfg.lock_cycle_duration_factor_ms, 30);
    }

    #[test]
    fn test_backend_kind_snake_case() {
        let cfg: StoreConfig =
            serde_json::from_str(r#"{"root": "/srv", "metadata_backend": "xattr"}"#).unwrap();
        assert_eq!(cfg.metadata_backend, MetadataBackendKind::Xattr);
    }
}
