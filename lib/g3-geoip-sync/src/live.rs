/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::net::IpAddr;
use std::sync::Arc;

use ip_network::IpNetwork;
use log::warn;

use crate::db::{self, CityRecord, MaxmindDbLoader};
use crate::handle::HotSwapDbHandle;
use crate::update::GeoipUpdater;
use crate::{GeoipSyncConfig, SyncError};

/// An always-fresh queryable geoip db: a background updater keeps the disk
/// copy in sync and every committed update is swapped into memory without
/// disturbing in-flight lookups.
pub struct SyncedGeoipDb {
    updater: Arc<GeoipUpdater>,
    handle: Arc<HotSwapDbHandle<MaxmindDbLoader>>,
}

impl SyncedGeoipDb {
    pub async fn spawn(config: GeoipSyncConfig) -> Result<Self, SyncError> {
        let updater = GeoipUpdater::new(config).await?;
        let handle = Arc::new(HotSwapDbHandle::new(MaxmindDbLoader));

        let swap = handle.clone();
        updater.on_change(move |digest, buf| {
            if let Err(e) = swap.load_new_db(buf) {
                warn!("failed to load updated geoip db {digest}: {e}");
            }
        });
        updater.spawn_run();

        // pick up a previously synced file so lookups need not wait for the
        // next remote change
        if let Some(buf) = updater.current_buffer().await? {
            if let Err(e) = handle.load_if_empty(&buf) {
                warn!("failed to load on-disk geoip db: {e}");
            }
        }

        Ok(SyncedGeoipDb { updater, handle })
    }

    pub fn updater(&self) -> &Arc<GeoipUpdater> {
        &self.updater
    }

    /// City lookup against the current db version. Before the first version
    /// is available this waits for it.
    pub async fn lookup_city(&self, ip: IpAddr) -> anyhow::Result<Option<CityRecord>> {
        self.handle
            .with_db(|reader| async move { db::lookup_city(&reader, ip) })
            .await
    }

    /// Like [`lookup_city`](Self::lookup_city), also reporting the network
    /// the record was registered for.
    pub async fn lookup_prefix(
        &self,
        ip: IpAddr,
    ) -> anyhow::Result<Option<(CityRecord, IpNetwork)>> {
        self.handle
            .with_db(|reader| async move { db::lookup_prefix(&reader, ip) })
            .await
    }
}
