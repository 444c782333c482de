/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::future::Future;

use bytes::Bytes;

use crate::{GeoipSyncConfig, SyncError};

const SUFFIX_CHECKSUM: &str = "tar.gz.sha256";
const SUFFIX_ARCHIVE: &str = "tar.gz";

/// Where db archives and their checksums come from.
pub trait RemoteSource: Send + Sync + 'static {
    /// Checksum of the current remote archive, for comparison against
    /// the local file and the downloaded bytes.
    fn fetch_digest(&self) -> impl Future<Output = Result<String, SyncError>> + Send;

    /// The full remote archive.
    fn fetch_archive(&self) -> impl Future<Output = Result<Bytes, SyncError>> + Send;
}

/// The MaxMind download endpoint:
/// `GET {url}?edition_id=..&license_key=..&suffix={tar.gz|tar.gz.sha256}`
pub struct HttpSource {
    client: reqwest::Client,
    url: String,
    edition_id: String,
    license_key: String,
}

impl HttpSource {
    pub(crate) fn new(config: &GeoipSyncConfig) -> Result<Self, SyncError> {
        let client = reqwest::Client::builder().build()?;
        Ok(HttpSource {
            client,
            url: config.download_url.clone(),
            edition_id: config.edition_id.clone(),
            license_key: config.license_key.clone(),
        })
    }

    async fn fetch(&self, suffix: &str) -> Result<Bytes, SyncError> {
        let rsp = self
            .client
            .get(&self.url)
            .query(&[
                ("edition_id", self.edition_id.as_str()),
                ("license_key", self.license_key.as_str()),
                ("suffix", suffix),
            ])
            .send()
            .await?;
        let status = rsp.status();
        if !status.is_success() {
            return Err(SyncError::UnexpectedStatusCode(status.as_u16()));
        }
        Ok(rsp.bytes().await?)
    }
}

impl RemoteSource for HttpSource {
    async fn fetch_digest(&self) -> Result<String, SyncError> {
        let body = self.fetch(SUFFIX_CHECKSUM).await?;
        // the body is "<checksum>  <filename>", only the first token counts
        let text = String::from_utf8_lossy(&body);
        text.split_whitespace()
            .next()
            .map(|s| s.to_string())
            .ok_or(SyncError::EmptyChecksum)
    }

    async fn fetch_archive(&self) -> Result<Bytes, SyncError> {
        self.fetch(SUFFIX_ARCHIVE).await
    }
}
