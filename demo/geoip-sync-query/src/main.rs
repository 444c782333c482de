/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::net::IpAddr;
use std::path::PathBuf;

use clap::{Arg, ArgAction, Command, ValueHint, value_parser};

use g3_geoip_sync::{GeoipSyncConfig, SyncedGeoipDb};

const ARG_EDITION_ID: &str = "edition-id";
const ARG_LICENSE_KEY: &str = "license-key";
const ARG_STORAGE_DIR: &str = "storage-dir";
const ARG_VERBOSE: &str = "verbose";
const ARG_IP_LIST: &str = "ip-list";

fn build_cli_args() -> Command {
    Command::new(env!("CARGO_PKG_NAME"))
        .arg(
            Arg::new(ARG_EDITION_ID)
                .help("MaxMind edition id, e.g. GeoLite2-City")
                .long(ARG_EDITION_ID)
                .num_args(1)
                .default_value("GeoLite2-City"),
        )
        .arg(
            Arg::new(ARG_LICENSE_KEY)
                .help("MaxMind license key")
                .long(ARG_LICENSE_KEY)
                .num_args(1)
                .required(true),
        )
        .arg(
            Arg::new(ARG_STORAGE_DIR)
                .help("Directory to keep the synced db file in")
                .long(ARG_STORAGE_DIR)
                .num_args(1)
                .required(true)
                .value_parser(value_parser!(PathBuf))
                .value_hint(ValueHint::DirPath),
        )
        .arg(
            Arg::new(ARG_VERBOSE)
                .long(ARG_VERBOSE)
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new(ARG_IP_LIST)
                .action(ArgAction::Append)
                .required(true)
                .value_parser(value_parser!(IpAddr)),
        )
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = build_cli_args().get_matches();

    let mut config = GeoipSyncConfig::new(
        args.get_one::<String>(ARG_EDITION_ID).unwrap().as_str(),
        args.get_one::<PathBuf>(ARG_STORAGE_DIR).unwrap().clone(),
        args.get_one::<String>(ARG_LICENSE_KEY).unwrap().as_str(),
    );
    config.verbose = args.get_flag(ARG_VERBOSE);

    println!("# syncing {} db", config.edition_id);
    let db = SyncedGeoipDb::spawn(config).await?;

    for ip in args.get_many::<IpAddr>(ARG_IP_LIST).unwrap() {
        println!("# check for IP {ip}");
        match db.lookup_prefix(*ip).await? {
            Some((r, net)) => {
                println!("network: {net}");
                if let Some(country) = r.country_code.as_deref() {
                    print!("country: {country}");
                    if let Some(name) = r.country_name.as_deref() {
                        print!("/{name}");
                    }
                    println!();
                }
                if let Some(city) = r.city_name.as_deref() {
                    println!("city: {city}");
                }
                if let (Some(lat), Some(lon)) = (r.latitude, r.longitude) {
                    println!("location: {lat},{lon}");
                }
            }
            None => {
                println!("no record found");
            }
        }
    }

    Ok(())
}
