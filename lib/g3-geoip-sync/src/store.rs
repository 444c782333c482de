/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::fs;
use tokio::sync::{OwnedRwLockWriteGuard, RwLock};

use crate::SyncError;

pub(crate) const DB_FILE_NAME: &str = "db.mmdb";
pub(crate) const TEMP_DB_FILE_NAME: &str = "tempDb.mmdb";
pub(crate) const CHECKPOINT_FILE_NAME: &str = "lastChecked.txt";
pub(crate) const DB_SUFFIX: &str = ".mmdb";

pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Held while the on-disk db file is being swapped. Dropping it reopens
/// the store to readers, also when the swap itself failed.
pub(crate) struct ReplaceGuard {
    _gate: OwnedRwLockWriteGuard<()>,
}

/// On-disk home of the synced db file, its staging file and the
/// last-checked timestamp.
///
/// Readers and the replace sequence share an async rw-lock, so a read
/// issued while a replace is underway sees either the old complete file
/// or the new complete file, never the gap between remove and rename.
pub(crate) struct ArtifactStore {
    db_path: PathBuf,
    temp_db_path: PathBuf,
    checkpoint_path: PathBuf,
    replace_gate: Arc<RwLock<()>>,
}

impl ArtifactStore {
    pub(crate) fn new(dir: &Path) -> Self {
        ArtifactStore {
            db_path: dir.join(DB_FILE_NAME),
            temp_db_path: dir.join(TEMP_DB_FILE_NAME),
            checkpoint_path: dir.join(CHECKPOINT_FILE_NAME),
            replace_gate: Arc::new(RwLock::new(())),
        }
    }

    pub(crate) fn temp_db_path(&self) -> &Path {
        &self.temp_db_path
    }

    /// Millisecond timestamp of the last completed remote check.
    /// A missing or unparsable file means "never checked".
    pub(crate) async fn read_checkpoint(&self) -> Result<Option<u64>, SyncError> {
        match fs::read_to_string(&self.checkpoint_path).await {
            Ok(s) => Ok(s.trim().parse::<u64>().ok()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub(crate) async fn write_checkpoint(&self, now_millis: u64) -> Result<(), SyncError> {
        fs::write(&self.checkpoint_path, format!("{now_millis}")).await?;
        Ok(())
    }

    pub(crate) async fn read_artifact(&self) -> Result<Option<Vec<u8>>, SyncError> {
        let _gate = self.replace_gate.read().await;
        match fs::read(&self.db_path).await {
            Ok(buf) => Ok(Some(buf)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Close the store to readers until the staged file is committed.
    pub(crate) async fn begin_replace(&self) -> ReplaceGuard {
        ReplaceGuard {
            _gate: self.replace_gate.clone().write_owned().await,
        }
    }

    /// Swap the staged temp file in for the db file. The old file may be
    /// absent; any other failure propagates after the guard is dropped.
    pub(crate) async fn commit_replace(&self, guard: ReplaceGuard) -> Result<(), SyncError> {
        match fs::remove_file(&self.db_path).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        fs::rename(&self.temp_db_path, &self.db_path).await?;
        drop(guard);
        Ok(())
    }
}
