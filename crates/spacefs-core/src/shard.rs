// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Deterministic id-to-path sharding
//!
//! Random ids (UUID-like) dropped into one flat directory make directory
//! scans degenerate once the node count grows. `shard` nests the first
//! characters of the id into fixed-width directory levels so no single
//! directory holds more than `16^width` children for hex ids. The mapping is
//! pure and reversible, which matters because node paths are always derived
//! from the id, never stored.

use std::path::{Component, Path, PathBuf};

/// Split the first `depth * width` characters of `id` into `depth` segments
/// of `width` characters and append the remainder as the final segment.
/// Sharding stops early when the remaining id no longer fills more than one
/// segment, so short ids never panic and the final segment is never empty.
pub fn shard(id: &str, depth: usize, width: usize) -> PathBuf {
    let mut out = PathBuf::new();
    let mut rest = id;
    for _ in 0..depth {
        if rest.chars().count() <= width {
            break;
        }
        let split = rest
            .char_indices()
            .nth(width)
            .map(|(i, _)| i)
            .unwrap_or(rest.len());
        let (seg, tail) = rest.split_at(split);
        out.push(seg);
        rest = tail;
    }
    out.push(rest);
    out
}

/// Inverse of `shard`: concatenate the path segments back into the id.
/// `.` and `..` components are skipped so relative child-link targets can be
/// fed in directly.
pub fn unshard(path: &Path) -> String {
    let mut id = String::new();
    for component in path.components() {
        if let Component::Normal(seg) = component {
            id.push_str(&seg.to_string_lossy());
        }
    }
    id
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shard_long_id() {
        let expected: PathBuf = ["ab", "cd", "ef", "gh"].iter().collect();
        assert_eq!(shard("abcdefgh", 4, 2), expected);
    }

    #[test]
    fn test_shard_remainder_after_depth() {
        let p = shard("aabbccddrest", 2, 2);
        let expected: PathBuf = ["aa", "bb", "ccddrest"].iter().collect();
        assert_eq!(p, expected);
    }

    #[test]
    fn test_shard_short_id_stops_early() {
        assert_eq!(shard("abc", 4, 2), PathBuf::from("ab").join("c"));
        assert_eq!(shard("ab", 4, 2), PathBuf::from("ab"));
        assert_eq!(shard("a", 4, 2), PathBuf::from("a"));
    }

    #[test]
    fn test_shard_is_deterministic() {
        let a = shard("4c510ada-c86b-4815-8820-42cdf82c3d51", 4, 2);
        let b = shard("4c510ada-c86b-4815-8820-42cdf82c3d51", 4, 2);
        assert_eq!(a, b);
    }

    #[test]
    fn test_unshard_inverts_shard() {
        for id in ["abcdefgh", "abc", "ab", "a", "4c510ada-c86b"] {
            assert_eq!(unshard(&shard(id, 4, 2)), id);
        }
    }

    #[test]
    fn test_unshard_skips_relative_components() {
        let target: PathBuf = ["..", "..", "ab", "cd", "ef"].iter().collect();
        assert_eq!(unshard(&target), "abcdef");
    }
}
