// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Error types for the spacefs storage core

use std::io;

/// Core storage error type.
///
/// Mapping guidance for a hosting service: `NotFound` is a 404-equivalent,
/// `InvalidId`/`InvalidReference` are 400-equivalents, everything else
/// surfaces as an internal error.
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("not found")]
    NotFound,
    #[error("already exists")]
    AlreadyExists,
    #[error("invalid id")]
    InvalidId,
    #[error("invalid reference")]
    InvalidReference,
    #[error("could not acquire lock")]
    AcquireLockFailed,
    #[error("lock path is empty")]
    PathEmpty,
    #[error("backend error: {0}")]
    Backend(#[from] io::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

impl StoreError {
    /// True when the error is the caller's fault rather than the store's.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            StoreError::NotFound
                | StoreError::AlreadyExists
                | StoreError::InvalidId
                | StoreError::InvalidReference
        )
    }
}
