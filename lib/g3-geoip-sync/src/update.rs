/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use log::{debug, info, warn};
use tokio::fs;

use crate::checksum::sha256_hex;
use crate::source::{HttpSource, RemoteSource};
use crate::store::{ArtifactStore, DB_SUFFIX, now_millis};
use crate::unpack::unpack_db_entry;
use crate::{GeoipSyncConfig, SyncError};

type ChangeCallback = Box<dyn Fn(&str, &[u8]) + Send + Sync>;

/// Keeps the on-disk db file in sync with the remote source.
///
/// A check cycle compares the checksum of the local file against the remote
/// one and downloads, verifies and commits a new file when they differ.
/// Subscribers registered with [`on_change`](Self::on_change) see every
/// committed update, strictly after it reached the disk.
pub struct GeoipUpdater<S: RemoteSource = HttpSource> {
    config: GeoipSyncConfig,
    store: ArtifactStore,
    source: S,
    checking: AtomicBool,
    subscribers: Mutex<Vec<ChangeCallback>>,
}

impl GeoipUpdater {
    pub async fn new(config: GeoipSyncConfig) -> Result<Arc<Self>, SyncError> {
        config.check()?;
        let source = HttpSource::new(&config)?;
        Self::with_source(config, source).await
    }

    /// Construct and start the periodic check task.
    pub async fn spawn(config: GeoipSyncConfig) -> Result<Arc<Self>, SyncError> {
        let updater = Self::new(config).await?;
        updater.spawn_run();
        Ok(updater)
    }
}

impl<S: RemoteSource> GeoipUpdater<S> {
    pub async fn with_source(config: GeoipSyncConfig, source: S) -> Result<Arc<Self>, SyncError> {
        config.check()?;
        fs::create_dir_all(&config.storage_dir).await?;
        let store = ArtifactStore::new(&config.storage_dir);
        Ok(Arc::new(GeoipUpdater {
            config,
            store,
            source,
            checking: AtomicBool::new(false),
            subscribers: Mutex::new(Vec::new()),
        }))
    }

    /// Register a callback invoked with `(checksum, buffer)` after each
    /// committed update. There is no unregister; callbacks live as long as
    /// the updater and must not call back into it.
    pub fn on_change<F>(&self, callback: F)
    where
        F: Fn(&str, &[u8]) + Send + Sync + 'static,
    {
        self.subscribers.lock().unwrap().push(Box::new(callback));
    }

    /// The committed db file, or `None` before the first sync. Waits out an
    /// in-progress replace, never observes a half written file.
    pub async fn current_buffer(&self) -> Result<Option<Vec<u8>>, SyncError> {
        self.store.read_artifact().await
    }

    /// Drive check cycles on the configured interval. The first cycle runs
    /// right away. The task stops once it holds the last reference.
    pub fn spawn_run(self: &Arc<Self>) {
        let updater = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(updater.config.check_interval);
            loop {
                interval.tick().await;
                if let Err(e) = updater.run_check_cycle().await {
                    warn!("{} db update check failed: {e}", updater.config.edition_id);
                }
                if Arc::strong_count(&updater) == 1 {
                    break;
                }
            }
        });
    }

    /// Run one check cycle. If a cycle is already in flight this returns
    /// right away without doing anything.
    pub async fn run_check_cycle(&self) -> Result<(), SyncError> {
        if self
            .checking
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("{} db check already in progress", self.config.edition_id);
            return Ok(());
        }
        let r = self.check_once().await;
        self.checking.store(false, Ordering::Release);
        match r {
            Err(e) if e.is_network() && self.config.ignore_network_errors => {
                warn!(
                    "ignored network error while checking {} db: {e}",
                    self.config.edition_id
                );
                Ok(())
            }
            r => r,
        }
    }

    async fn check_once(&self) -> Result<(), SyncError> {
        if let Some(last_checked) = self.store.read_checkpoint().await? {
            let elapsed = now_millis().saturating_sub(last_checked);
            if elapsed <= self.config.hash_check_interval.as_millis() as u64 {
                debug!(
                    "{} db checked {elapsed}ms ago, not due yet",
                    self.config.edition_id
                );
                return Ok(());
            }
        }

        if self.config.verbose {
            info!("checking {} db against remote", self.config.edition_id);
        }
        let local_digest = self.store.read_artifact().await?.map(|buf| sha256_hex(&buf));
        let remote_digest = self.source.fetch_digest().await?;
        if local_digest.as_deref() != Some(remote_digest.as_str()) {
            self.download_and_install(&remote_digest).await?;
        } else if self.config.verbose {
            info!("{} db is up to date", self.config.edition_id);
        }

        self.store.write_checkpoint(now_millis()).await?;
        Ok(())
    }

    async fn download_and_install(&self, remote_digest: &str) -> Result<(), SyncError> {
        if self.config.verbose {
            info!("downloading {} db", self.config.edition_id);
        }
        let archive = self.source.fetch_archive().await?;

        let downloaded = sha256_hex(&archive);
        if downloaded != remote_digest {
            return Err(SyncError::ChecksumMismatch {
                remote: remote_digest.to_string(),
                downloaded,
            });
        }

        let temp_path = self.store.temp_db_path().to_path_buf();
        let buf =
            tokio::task::spawn_blocking(move || unpack_db_entry(&archive, DB_SUFFIX, &temp_path))
                .await
                .map_err(|e| SyncError::Io(io::Error::other(e)))??;

        let guard = self.store.begin_replace().await;
        self.store.commit_replace(guard).await?;

        let subscribers = self.subscribers.lock().unwrap();
        for callback in subscribers.iter() {
            callback(remote_digest, &buf);
        }
        drop(subscribers);

        if self.config.verbose {
            info!(
                "{} db updated, checksum {remote_digest}",
                self.config.edition_id
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use std::path::Path;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Notify;

    fn make_archive(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
        for (name, data) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, *data).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap()
    }

    #[derive(Default)]
    struct FakeInner {
        digest: Mutex<String>,
        archive: Mutex<Vec<u8>>,
        status: Mutex<Option<u16>>,
        digest_fetches: AtomicUsize,
        archive_fetches: AtomicUsize,
        gate: Mutex<Option<Arc<Notify>>>,
    }

    #[derive(Clone, Default)]
    struct FakeSource {
        inner: Arc<FakeInner>,
    }

    impl FakeSource {
        fn serving(archive: Vec<u8>) -> Self {
            let source = FakeSource::default();
            *source.inner.digest.lock().unwrap() = sha256_hex(&archive);
            *source.inner.archive.lock().unwrap() = archive;
            source
        }

        fn digest_fetches(&self) -> usize {
            self.inner.digest_fetches.load(Ordering::SeqCst)
        }

        fn archive_fetches(&self) -> usize {
            self.inner.archive_fetches.load(Ordering::SeqCst)
        }
    }

    impl RemoteSource for FakeSource {
        async fn fetch_digest(&self) -> Result<String, SyncError> {
            let gate = self.inner.gate.lock().unwrap().clone();
            if let Some(gate) = gate {
                gate.notified().await;
            }
            self.inner.digest_fetches.fetch_add(1, Ordering::SeqCst);
            if let Some(code) = *self.inner.status.lock().unwrap() {
                return Err(SyncError::UnexpectedStatusCode(code));
            }
            Ok(self.inner.digest.lock().unwrap().clone())
        }

        async fn fetch_archive(&self) -> Result<Bytes, SyncError> {
            self.inner.archive_fetches.fetch_add(1, Ordering::SeqCst);
            if let Some(code) = *self.inner.status.lock().unwrap() {
                return Err(SyncError::UnexpectedStatusCode(code));
            }
            Ok(Bytes::from(self.inner.archive.lock().unwrap().clone()))
        }
    }

    async fn new_updater(dir: &Path, source: FakeSource) -> Arc<GeoipUpdater<FakeSource>> {
        let config = GeoipSyncConfig::new("GeoLite2-Country", dir, "test-key");
        GeoipUpdater::with_source(config, source).await.unwrap()
    }

    #[tokio::test]
    async fn empty_license_key_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let config = GeoipSyncConfig::new("GeoLite2-Country", dir.path(), "");
        let err = GeoipUpdater::with_source(config, FakeSource::default())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, SyncError::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn fresh_download_commits_and_notifies() {
        let dir = tempfile::tempdir().unwrap();
        let archive = make_archive(&[("GeoLite2-Country.mmdb", b"fresh db bytes")]);
        let source = FakeSource::serving(archive);
        let updater = new_updater(dir.path(), source.clone()).await;

        let notified: Arc<Mutex<Option<(String, Vec<u8>)>>> = Arc::new(Mutex::new(None));
        let seen = notified.clone();
        updater.on_change(move |digest, buf| {
            *seen.lock().unwrap() = Some((digest.to_string(), buf.to_vec()));
        });

        updater.run_check_cycle().await.unwrap();

        let committed = std::fs::read(dir.path().join("db.mmdb")).unwrap();
        assert_eq!(committed, b"fresh db bytes");

        let (digest, buf) = notified.lock().unwrap().take().unwrap();
        assert_eq!(digest, *source.inner.digest.lock().unwrap());
        assert_eq!(buf, b"fresh db bytes");

        assert!(updater.store.read_checkpoint().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn matching_digest_skips_download() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path()).unwrap();
        std::fs::write(dir.path().join("db.mmdb"), b"local db").unwrap();

        let source = FakeSource::default();
        *source.inner.digest.lock().unwrap() = sha256_hex(b"local db");
        let updater = new_updater(dir.path(), source.clone()).await;

        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();
        updater.on_change(move |_, _| flag.store(true, Ordering::SeqCst));

        updater.run_check_cycle().await.unwrap();

        assert_eq!(source.digest_fetches(), 1);
        assert_eq!(source.archive_fetches(), 0);
        assert!(!fired.load(Ordering::SeqCst));
        // a no-change cycle still makes checkpoint progress
        assert!(updater.store.read_checkpoint().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn recent_checkpoint_skips_remote_check() {
        let dir = tempfile::tempdir().unwrap();
        let source = FakeSource::default();
        let updater = new_updater(dir.path(), source.clone()).await;

        let five_minutes_ago = now_millis() - 5 * 60 * 1000;
        updater.store.write_checkpoint(five_minutes_ago).await.unwrap();

        updater.run_check_cycle().await.unwrap();

        assert_eq!(source.digest_fetches(), 0);
        assert_eq!(source.archive_fetches(), 0);
        assert_eq!(
            updater.store.read_checkpoint().await.unwrap(),
            Some(five_minutes_ago)
        );
    }

    #[tokio::test]
    async fn stale_checkpoint_triggers_remote_check() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path()).unwrap();
        std::fs::write(dir.path().join("db.mmdb"), b"local db").unwrap();

        let source = FakeSource::default();
        *source.inner.digest.lock().unwrap() = sha256_hex(b"local db");
        let updater = new_updater(dir.path(), source.clone()).await;

        let two_hours_ago = now_millis() - 2 * 3600 * 1000;
        updater.store.write_checkpoint(two_hours_ago).await.unwrap();

        updater.run_check_cycle().await.unwrap();

        assert_eq!(source.digest_fetches(), 1);
        let checkpoint = updater.store.read_checkpoint().await.unwrap().unwrap();
        assert!(checkpoint > two_hours_ago);
    }

    #[tokio::test]
    async fn checksum_mismatch_leaves_disk_untouched() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path()).unwrap();
        std::fs::write(dir.path().join("db.mmdb"), b"good old db").unwrap();

        let archive = make_archive(&[("GeoLite2-Country.mmdb", b"tampered")]);
        let source = FakeSource::default();
        *source.inner.digest.lock().unwrap() = "deadbeef".to_string();
        *source.inner.archive.lock().unwrap() = archive;
        let updater = new_updater(dir.path(), source).await;

        let err = updater.run_check_cycle().await.err().unwrap();
        assert!(matches!(err, SyncError::ChecksumMismatch { .. }));

        let on_disk = std::fs::read(dir.path().join("db.mmdb")).unwrap();
        assert_eq!(on_disk, b"good old db");
        assert!(updater.store.read_checkpoint().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn archive_without_db_entry_fails_with_names() {
        let dir = tempfile::tempdir().unwrap();
        let archive = make_archive(&[("GeoLite2-Country.csv", b"network,country")]);
        let source = FakeSource::serving(archive);
        let updater = new_updater(dir.path(), source).await;

        let err = updater.run_check_cycle().await.err().unwrap();
        match err {
            SyncError::DbEntryNotFound { seen, .. } => {
                assert_eq!(seen, vec!["GeoLite2-Country.csv".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!dir.path().join("db.mmdb").exists());
    }

    #[tokio::test]
    async fn ignored_network_error_leaves_checkpoint_alone() {
        let dir = tempfile::tempdir().unwrap();
        let source = FakeSource::default();
        *source.inner.status.lock().unwrap() = Some(503);

        let mut config = GeoipSyncConfig::new("GeoLite2-Country", dir.path(), "test-key");
        config.ignore_network_errors = true;
        let updater = GeoipUpdater::with_source(config, source).await.unwrap();

        updater.run_check_cycle().await.unwrap();
        assert!(updater.store.read_checkpoint().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn network_error_propagates_by_default() {
        let dir = tempfile::tempdir().unwrap();
        let source = FakeSource::default();
        *source.inner.status.lock().unwrap() = Some(503);
        let updater = new_updater(dir.path(), source).await;

        let err = updater.run_check_cycle().await.err().unwrap();
        assert!(matches!(err, SyncError::UnexpectedStatusCode(503)));
    }

    #[tokio::test]
    async fn overlapping_cycle_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let archive = make_archive(&[("GeoLite2-Country.mmdb", b"db")]);
        let source = FakeSource::serving(archive);
        let gate = Arc::new(Notify::new());
        *source.inner.gate.lock().unwrap() = Some(gate.clone());

        let updater = new_updater(dir.path(), source.clone()).await;

        let first = updater.clone();
        let first_cycle = tokio::spawn(async move { first.run_check_cycle().await });
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert!(!first_cycle.is_finished());

        // second trigger returns immediately without a second check
        updater.run_check_cycle().await.unwrap();
        assert_eq!(source.digest_fetches(), 0);

        gate.notify_one();
        first_cycle.await.unwrap().unwrap();
        assert_eq!(source.digest_fetches(), 1);
        assert_eq!(source.archive_fetches(), 1);
    }
}
