// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Pluggable per-node metadata storage
//!
//! Every node carries a string-keyed, byte-valued attribute set. Reserved
//! keys (`name`, `parentid`, `reference`, `mtime`, `tmtime`, `dtime`) share
//! the namespace with free-form application attributes; the distinction is a
//! documented contract, not a type. Backends must make a single-key write
//! crash-atomic; multi-key atomicity is the caller's job via the lock
//! manager.

use crate::error::{StoreError, StoreResult};
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const ATTR_NAME: &str = "name";
pub const ATTR_PARENT_ID: &str = "parentid";
pub const ATTR_REFERENCE: &str = "reference";
pub const ATTR_MTIME: &str = "mtime";
pub const ATTR_TMTIME: &str = "tmtime";
pub const ATTR_DTIME: &str = "dtime";

/// Capability interface for per-node attribute storage.
#[cfg_attr(test, mockall::automock)]
pub trait MetadataBackend: Send + Sync {
    /// Read one attribute; fails `NotFound` when the key is absent.
    fn get(&self, node_path: &Path, key: &str) -> StoreResult<Vec<u8>>;

    /// Write one attribute. The write is atomic with respect to concurrent
    /// readers of the same key.
    fn set(&self, node_path: &Path, key: &str, value: &[u8]) -> StoreResult<()>;

    /// Remove one attribute. An already-absent key is success unless the
    /// caller asks for strict semantics.
    fn remove(&self, node_path: &Path, key: &str, strict: bool) -> StoreResult<()>;

    /// Enumerate all attributes of a node (recursive scans, migrations).
    fn all(&self, node_path: &Path) -> StoreResult<HashMap<String, Vec<u8>>>;
}

/// Select the configured backend. Exactly one implementation serves a
/// storage root for its whole lifetime.
pub fn create_metadata_backend(
    kind: crate::config::MetadataBackendKind,
) -> Arc<dyn MetadataBackend> {
    match kind {
        crate::config::MetadataBackendKind::Xattr => Arc::new(XattrBackend::new()),
        crate::config::MetadataBackendKind::Sidecar => Arc::new(SidecarBackend::new()),
    }
}

/// Attribute storage in extended attributes of the node directory itself.
/// Keys live under the `user.sfs.` namespace on disk; callers always use
/// bare keys.
pub struct XattrBackend {
    prefix: &'static str,
}

impl XattrBackend {
    const PREFIX: &'static str = "user.sfs.";

    pub fn new() -> Self {
        Self {
            prefix: Self::PREFIX,
        }
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }
}

impl Default for XattrBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn attr_missing(err: &io::Error) -> bool {
    if err.kind() == io::ErrorKind::NotFound {
        return true;
    }
    #[cfg(target_os = "linux")]
    if err.raw_os_error() == Some(libc::ENODATA) {
        return true;
    }
    #[cfg(target_os = "macos")]
    if err.raw_os_error() == Some(libc::ENOATTR) {
        return true;
    }
    false
}

impl MetadataBackend for XattrBackend {
    fn get(&self, node_path: &Path, key: &str) -> StoreResult<Vec<u8>> {
        match xattr::get(node_path, self.full_key(key)) {
            Ok(Some(value)) => Ok(value),
            Ok(None) => Err(StoreError::NotFound),
            Err(e) if attr_missing(&e) => Err(StoreError::NotFound),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, node_path: &Path, key: &str, value: &[u8]) -> StoreResult<()> {
        xattr::set(node_path, self.full_key(key), value)?;
        Ok(())
    }

    fn remove(&self, node_path: &Path, key: &str, strict: bool) -> StoreResult<()> {
        match xattr::remove(node_path, self.full_key(key)) {
            Ok(()) => Ok(()),
            Err(e) if attr_missing(&e) => {
                if strict {
                    Err(StoreError::NotFound)
                } else {
                    Ok(())
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    fn all(&self, node_path: &Path) -> StoreResult<HashMap<String, Vec<u8>>> {
        let mut out = HashMap::new();
        for name in xattr::list(node_path)? {
            let name = name.to_string_lossy().into_owned();
            if let Some(bare) = name.strip_prefix(self.prefix) {
                if let Some(value) = xattr::get(node_path, &name)? {
                    out.insert(bare.to_string(), value);
                }
            }
        }
        Ok(out)
    }
}

/// Attribute storage in one JSON document per node, kept in a `.meta` file
/// sibling to the node directory. Writes go through a temp file and
/// `rename`, so a concurrent reader sees either the old or the new document,
/// never a torn one.
pub struct SidecarBackend;

impl SidecarBackend {
    pub fn new() -> Self {
        Self
    }

    fn sidecar_path(node_path: &Path) -> PathBuf {
        let mut os = node_path.as_os_str().to_os_string();
        os.push(".meta");
        PathBuf::from(os)
    }

    fn load(node_path: &Path) -> StoreResult<HashMap<String, Vec<u8>>> {
        match fs::read(Self::sidecar_path(node_path)) {
            Ok(bytes) => {
                serde_json::from_slice(&bytes).map_err(|e| StoreError::Backend(e.into()))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn store(node_path: &Path, attrs: &HashMap<String, Vec<u8>>) -> StoreResult<()> {
        let sidecar = Self::sidecar_path(node_path);
        let mut tmp = sidecar.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        let bytes = serde_json::to_vec(attrs).map_err(|e| StoreError::Backend(e.into()))?;
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, &sidecar)?;
        Ok(())
    }
}

impl Default for SidecarBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MetadataBackend for SidecarBackend {
    fn get(&self, node_path: &Path, key: &str) -> StoreResult<Vec<u8>> {
        Self::load(node_path)?
            .remove(key)
            .ok_or(StoreError::NotFound)
    }

    fn set(&self, node_path: &Path, key: &str, value: &[u8]) -> StoreResult<()> {
        let mut attrs = Self::load(node_path)?;
        attrs.insert(key.to_string(), value.to_vec());
        Self::store(node_path, &attrs)
    }

    fn remove(&self, node_path: &Path, key: &str, strict: bool) -> StoreResult<()> {
        let mut attrs = Self::load(node_path)?;
        match attrs.remove(key) {
            Some(_) => Self::store(node_path, &attrs),
            None if strict => Err(StoreError::NotFound),
            None => Ok(()),
        }
    }

    fn all(&self, node_path: &Path) -> StoreResult<HashMap<String, Vec<u8>>> {
        Self::load(node_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn node_dir(tmp: &TempDir) -> PathBuf {
        let dir = tmp.path().join("node");
        fs::create_dir(&dir).unwrap();
        dir
    }

    #[test]
    fn test_sidecar_set_get_remove() {
        let tmp = TempDir::new().unwrap();
        let dir = node_dir(&tmp);
        let backend = SidecarBackend::new();

        assert!(matches!(
            backend.get(&dir, "k"),
            Err(StoreError::NotFound)
        ));

        backend.set(&dir, "k", b"v1").unwrap();
        assert_eq!(backend.get(&dir, "k").unwrap(), b"v1");

        backend.set(&dir, "k", b"v2").unwrap();
        assert_eq!(backend.get(&dir, "k").unwrap(), b"v2");

        backend.remove(&dir, "k", false).unwrap();
        assert!(matches!(
            backend.get(&dir, "k"),
            Err(StoreError::NotFound)
        ));
    }

    #[test]
    fn test_sidecar_remove_absent() {
        let tmp = TempDir::new().unwrap();
        let dir = node_dir(&tmp);
        let backend = SidecarBackend::new();

        // lenient removal of an absent key is success
        backend.remove(&dir, "missing", false).unwrap();
        assert!(matches!(
            backend.remove(&dir, "missing", true),
            Err(StoreError::NotFound)
        ));
    }

    #[test]
    fn test_sidecar_all() {
        let tmp = TempDir::new().unwrap();
        let dir = node_dir(&tmp);
        let backend = SidecarBackend::new();

        backend.set(&dir, ATTR_NAME, b"readme.txt").unwrap();
        backend.set(&dir, "app.color", b"green").unwrap();

        let all = backend.all(&dir).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[ATTR_NAME], b"readme.txt");
        assert_eq!(all["app.color"], b"green");
    }

    #[test]
    fn test_sidecar_survives_binary_values() {
        let tmp = TempDir::new().unwrap();
        let dir = node_dir(&tmp);
        let backend = SidecarBackend::new();

        let value = vec![0u8, 159, 146, 150, 255];
        backend.set(&dir, "blob", &value).unwrap();
        assert_eq!(backend.get(&dir, "blob").unwrap(), value);
    }

    /// Not every filesystem backing a tmpdir supports user xattrs; probe
    /// first and skip when they are unavailable.
    fn xattr_supported(dir: &Path) -> bool {
        xattr::set(dir, "user.sfs.probe", b"1").is_ok()
    }

    #[test]
    fn test_xattr_set_get_remove() {
        let tmp = TempDir::new().unwrap();
        let dir = node_dir(&tmp);
        if !xattr_supported(&dir) {
            return;
        }
        let backend = XattrBackend::new();

        backend.set(&dir, "k", b"v").unwrap();
        assert_eq!(backend.get(&dir, "k").unwrap(), b"v");

        backend.remove(&dir, "k", false).unwrap();
        assert!(matches!(
            backend.get(&dir, "k"),
            Err(StoreError::NotFound)
        ));
        backend.remove(&dir, "k", false).unwrap();
        assert!(matches!(
            backend.remove(&dir, "k", true),
            Err(StoreError::NotFound)
        ));
    }

    #[test]
    fn test_xattr_all_strips_namespace() {
        let tmp = TempDir::new().unwrap();
        let dir = node_dir(&tmp);
        if !xattr_supported(&dir) {
            return;
        }
        let backend = XattrBackend::new();

        backend.set(&dir, ATTR_MTIME, b"2024-01-01T00:00:00Z").unwrap();
        let all = backend.all(&dir).unwrap();
        assert!(all.contains_key(ATTR_MTIME));
        assert!(all.keys().all(|k| !k.starts_with("user.")));
    }
}
