/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::path::PathBuf;
use std::time::Duration;

use crate::SyncError;

const MAXMIND_DOWNLOAD_URL: &str = "https://download.maxmind.com/app/geoip_download";

#[derive(Clone)]
pub struct GeoipSyncConfig {
    pub edition_id: String,
    pub storage_dir: PathBuf,
    pub license_key: String,
    pub download_url: String,
    pub ignore_network_errors: bool,
    pub verbose: bool,
    /// How often a check cycle is scheduled.
    pub check_interval: Duration,
    /// How long a cycle trusts the last remote checksum comparison.
    pub hash_check_interval: Duration,
}

impl GeoipSyncConfig {
    pub fn new<E, D, K>(edition_id: E, storage_dir: D, license_key: K) -> Self
    where
        E: Into<String>,
        D: Into<PathBuf>,
        K: Into<String>,
    {
        GeoipSyncConfig {
            edition_id: edition_id.into(),
            storage_dir: storage_dir.into(),
            license_key: license_key.into(),
            download_url: MAXMIND_DOWNLOAD_URL.to_string(),
            ignore_network_errors: false,
            verbose: false,
            check_interval: Duration::from_secs(600),
            hash_check_interval: Duration::from_secs(3600),
        }
    }

    pub(crate) fn check(&self) -> Result<(), SyncError> {
        if self.license_key.is_empty() {
            return Err(SyncError::InvalidConfig("license key is required"));
        }
        if self.edition_id.is_empty() {
            return Err(SyncError::InvalidConfig("edition id is required"));
        }
        Ok(())
    }
}
