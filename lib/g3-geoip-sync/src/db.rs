/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::collections::BTreeMap;
use std::net::IpAddr;

use anyhow::anyhow;
use ip_network::IpNetwork;
use maxminddb::{MaxMindDBError, Reader, geoip2};

/// Turns a verified db buffer into a queryable instance.
///
/// Dropping the instance is its disposal; the hot-swap handle decides when
/// the owning reference goes away.
pub trait DbLoader: Send + Sync + 'static {
    type Db: Send + Sync + 'static;

    fn load(&self, buf: &[u8]) -> anyhow::Result<Self::Db>;
}

pub struct MaxmindDbLoader;

impl DbLoader for MaxmindDbLoader {
    type Db = Reader<Vec<u8>>;

    fn load(&self, buf: &[u8]) -> anyhow::Result<Self::Db> {
        Reader::from_source(buf.to_vec()).map_err(|e| anyhow!("failed to open mmdb reader: {e}"))
    }
}

/// Owned city lookup result. The mmdb reader hands out string slices that
/// borrow from the loaded buffer; copying them out lets a result outlive
/// the db version it was computed against.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CityRecord {
    pub country_code: Option<String>,
    pub country_name: Option<String>,
    pub city_name: Option<String>,
    pub continent_code: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub time_zone: Option<String>,
}

fn name_en(names: Option<&BTreeMap<&str, &str>>) -> Option<String> {
    names.and_then(|m| m.get("en")).map(|s| (*s).to_string())
}

impl<'a> From<geoip2::City<'a>> for CityRecord {
    fn from(v: geoip2::City<'a>) -> Self {
        CityRecord {
            country_code: v
                .country
                .as_ref()
                .and_then(|c| c.iso_code)
                .map(str::to_string),
            country_name: v.country.as_ref().and_then(|c| name_en(c.names.as_ref())),
            city_name: v.city.as_ref().and_then(|c| name_en(c.names.as_ref())),
            continent_code: v
                .continent
                .as_ref()
                .and_then(|c| c.code)
                .map(str::to_string),
            latitude: v.location.as_ref().and_then(|l| l.latitude),
            longitude: v.location.as_ref().and_then(|l| l.longitude),
            time_zone: v
                .location
                .as_ref()
                .and_then(|l| l.time_zone)
                .map(str::to_string),
        }
    }
}

pub fn lookup_city(reader: &Reader<Vec<u8>>, ip: IpAddr) -> anyhow::Result<Option<CityRecord>> {
    match reader.lookup::<geoip2::City>(ip) {
        Ok(v) => Ok(Some(CityRecord::from(v))),
        Err(MaxMindDBError::AddressNotFoundError(_)) => Ok(None),
        Err(e) => Err(anyhow!("city lookup for {ip} failed: {e}")),
    }
}

pub fn lookup_prefix(
    reader: &Reader<Vec<u8>>,
    ip: IpAddr,
) -> anyhow::Result<Option<(CityRecord, IpNetwork)>> {
    match reader.lookup_prefix::<geoip2::City>(ip) {
        Ok((v, prefix_len)) => {
            let net = IpNetwork::new_truncate(ip, prefix_len as u8)
                .map_err(|e| anyhow!("invalid prefix length {prefix_len} for {ip}: {e}"))?;
            Ok(Some((CityRecord::from(v), net)))
        }
        Err(MaxMindDBError::AddressNotFoundError(_)) => Ok(None),
        Err(e) => Err(anyhow!("prefix lookup for {ip} failed: {e}")),
    }
}
