/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("invalid config: {0}")]
    InvalidConfig(&'static str),
    #[error("request failed with status code {0}")]
    UnexpectedStatusCode(u16),
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("empty checksum response")]
    EmptyChecksum,
    #[error("checksum mismatch: remote {remote}, downloaded {downloaded}")]
    ChecksumMismatch { remote: String, downloaded: String },
    #[error("no entry ending with {suffix} found in archive, seen entries: {seen:?}")]
    DbEntryNotFound {
        suffix: &'static str,
        seen: Vec<String>,
    },
    #[error("io failed: {0}")]
    Io(#[from] io::Error),
}

impl SyncError {
    /// Whether this error came from talking to the remote source,
    /// so it can be skipped over when network errors are to be ignored.
    pub fn is_network(&self) -> bool {
        matches!(
            self,
            SyncError::UnexpectedStatusCode(_) | SyncError::Request(_) | SyncError::EmptyChecksum
        )
    }
}
