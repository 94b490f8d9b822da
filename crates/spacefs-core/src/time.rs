// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Per-node time attributes
//!
//! Four timestamps per node, all stored RFC3339 with nanoseconds:
//! `mtime` (falls back to the backing file's native modification time),
//! `tmtime` (most recent mtime anywhere in the subtree, falls back to
//! `mtime`), `ctime` (not tracked separately, aliased to mtime) and `dtime`
//! (set only while a node sits in the trash). Setters take `None` to clear
//! the attribute.

use crate::error::{StoreError, StoreResult};
use crate::metadata::{MetadataBackend, ATTR_DTIME, ATTR_MTIME, ATTR_TMTIME};
use crate::node::Node;
use chrono::{DateTime, SecondsFormat, Utc};
use std::fs;
use std::io;
use std::sync::Arc;

pub struct TimeManager {
    backend: Arc<dyn MetadataBackend>,
}

impl TimeManager {
    pub fn new(backend: Arc<dyn MetadataBackend>) -> Self {
        Self { backend }
    }

    fn get_time_attr(&self, node: &Node, key: &str) -> StoreResult<Option<DateTime<Utc>>> {
        match self.backend.get(node.internal_path(), key) {
            Ok(raw) => Ok(Some(parse_time(&raw)?)),
            Err(StoreError::NotFound) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn set_time_attr(&self, node: &Node, key: &str, t: Option<DateTime<Utc>>) -> StoreResult<()> {
        match t {
            Some(t) => self.backend.set(
                node.internal_path(),
                key,
                t.to_rfc3339_opts(SecondsFormat::Nanos, true).as_bytes(),
            ),
            None => self.backend.remove(node.internal_path(), key, false),
        }
    }

    /// The node's own last-modification time. Falls back to the native
    /// filesystem mtime of the node directory when no attribute is set.
    pub fn mtime(&self, node: &Node) -> StoreResult<DateTime<Utc>> {
        if let Some(t) = self.get_time_attr(node, ATTR_MTIME)? {
            return Ok(t);
        }
        let modified = fs::metadata(node.internal_path())?.modified()?;
        Ok(DateTime::<Utc>::from(modified))
    }

    pub fn set_mtime(&self, node: &Node, t: Option<DateTime<Utc>>) -> StoreResult<()> {
        self.set_time_attr(node, ATTR_MTIME, t)
    }

    /// Tree-modification time: the most recent mtime in the node's subtree.
    /// Falls back to the node's own mtime when never propagated to.
    pub fn tmtime(&self, node: &Node) -> StoreResult<DateTime<Utc>> {
        if let Some(t) = self.get_time_attr(node, ATTR_TMTIME)? {
            return Ok(t);
        }
        self.mtime(node)
    }

    pub fn set_tmtime(&self, node: &Node, t: Option<DateTime<Utc>>) -> StoreResult<()> {
        self.set_time_attr(node, ATTR_TMTIME, t)
    }

    /// Creation time is not tracked separately from mtime.
    pub fn ctime(&self, node: &Node) -> StoreResult<DateTime<Utc>> {
        self.mtime(node)
    }

    pub fn set_ctime(&self, node: &Node, t: Option<DateTime<Utc>>) -> StoreResult<()> {
        self.set_mtime(node, t)
    }

    /// Deletion time; `None` unless the node is soft-deleted.
    pub fn dtime(&self, node: &Node) -> StoreResult<Option<DateTime<Utc>>> {
        self.get_time_attr(node, ATTR_DTIME)
    }

    pub fn set_dtime(&self, node: &Node, t: Option<DateTime<Utc>>) -> StoreResult<()> {
        self.set_time_attr(node, ATTR_DTIME, t)
    }
}

fn parse_time(raw: &[u8]) -> StoreResult<DateTime<Utc>> {
    let s = std::str::from_utf8(raw)
        .map_err(|e| StoreError::Backend(io::Error::new(io::ErrorKind::InvalidData, e)))?;
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::Backend(io::Error::new(io::ErrorKind::InvalidData, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::id::ResourceId;
    use crate::lookup::Lookup;
    use crate::metadata::SidecarBackend;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn setup(tmp: &TempDir) -> (TimeManager, Node) {
        let backend: Arc<dyn MetadataBackend> = Arc::new(SidecarBackend::new());
        let lookup = Lookup::new(&StoreConfig::new(tmp.path()), Arc::clone(&backend));
        let id = ResourceId::new("st", "sp", "op1");
        let dir = lookup.node_dir("sp", "op1");
        fs::create_dir_all(&dir).unwrap();
        let node = lookup.node_from_id(&id).unwrap();
        (TimeManager::new(backend), node)
    }

    fn ts(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn test_mtime_round_trip_with_nanos() {
        let tmp = TempDir::new().unwrap();
        let (tm, node) = setup(&tmp);
        let t = Utc.timestamp_opt(1_700_000_000, 123_456_789).unwrap();
        tm.set_mtime(&node, Some(t)).unwrap();
        assert_eq!(tm.mtime(&node).unwrap(), t);
    }

    #[test]
    fn test_mtime_falls_back_to_native() {
        let tmp = TempDir::new().unwrap();
        let (tm, node) = setup(&tmp);
        let native = DateTime::<Utc>::from(
            fs::metadata(node.internal_path()).unwrap().modified().unwrap(),
        );
        let got = tm.mtime(&node).unwrap();
        assert_eq!(got, native);
    }

    #[test]
    fn test_tmtime_falls_back_to_mtime() {
        let tmp = TempDir::new().unwrap();
        let (tm, node) = setup(&tmp);
        let t = ts("2024-06-01T12:00:00.5Z");
        tm.set_mtime(&node, Some(t)).unwrap();
        assert_eq!(tm.tmtime(&node).unwrap(), t);

        let later = ts("2024-06-02T00:00:00Z");
        tm.set_tmtime(&node, Some(later)).unwrap();
        assert_eq!(tm.tmtime(&node).unwrap(), later);
        // the node's own mtime is untouched by tmtime writes
        assert_eq!(tm.mtime(&node).unwrap(), t);
    }

    #[test]
    fn test_clearing_resets_to_fallback() {
        let tmp = TempDir::new().unwrap();
        let (tm, node) = setup(&tmp);
        let t = ts("2024-06-01T12:00:00Z");
        tm.set_mtime(&node, Some(t)).unwrap();
        tm.set_tmtime(&node, Some(t)).unwrap();

        tm.set_tmtime(&node, None).unwrap();
        assert_eq!(tm.tmtime(&node).unwrap(), t);
        // clearing an already-absent attribute is fine
        tm.set_tmtime(&node, None).unwrap();
    }

    #[test]
    fn test_ctime_is_mtime_alias() {
        let tmp = TempDir::new().unwrap();
        let (tm, node) = setup(&tmp);
        let t = ts("2023-01-01T00:00:00Z");
        tm.set_ctime(&node, Some(t)).unwrap();
        assert_eq!(tm.mtime(&node).unwrap(), t);
        assert_eq!(tm.ctime(&node).unwrap(), t);
    }

    #[test]
    fn test_dtime_absent_by_default() {
        let tmp = TempDir::new().unwrap();
        let (tm, node) = setup(&tmp);
        assert_eq!(tm.dtime(&node).unwrap(), None);
        let t = ts("2024-03-01T08:30:00Z");
        tm.set_dtime(&node, Some(t)).unwrap();
        assert_eq!(tm.dtime(&node).unwrap(), Some(t));
        tm.set_dtime(&node, None).unwrap();
        assert_eq!(tm.dtime(&node).unwrap(), None);
    }

    #[test]
    fn test_garbage_timestamp_is_backend_error() {
        let tmp = TempDir::new().unwrap();
        let (tm, node) = setup(&tmp);
        let backend = SidecarBackend::new();
        backend
            .set(node.internal_path(), ATTR_MTIME, b"not-a-time")
            .unwrap();
        assert!(matches!(
            tm.mtime(&node),
            Err(StoreError::Backend(_))
        ));
    }
}
