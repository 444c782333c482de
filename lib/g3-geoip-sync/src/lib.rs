/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

mod error;
pub use error::SyncError;

mod config;
pub use config::GeoipSyncConfig;

mod checksum;

mod store;

mod source;
pub use source::{HttpSource, RemoteSource};

mod unpack;

mod update;
pub use update::GeoipUpdater;

mod db;
pub use db::{CityRecord, DbLoader, MaxmindDbLoader, lookup_city, lookup_prefix};

mod handle;
pub use handle::HotSwapDbHandle;

mod live;
pub use live::SyncedGeoipDb;
