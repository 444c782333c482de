/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;

use flate2::read::GzDecoder;

use crate::SyncError;

/// Pull the single entry ending with `suffix` out of a gzip'd tar archive.
///
/// The matching entry is written to `temp_path` and accumulated in memory
/// in one read loop, so the staged file and the returned buffer always hold
/// the same bytes. Entries that do not match are drained so the decoder
/// keeps its position in the stream.
pub(crate) fn unpack_db_entry(
    archive: &[u8],
    suffix: &'static str,
    temp_path: &Path,
) -> Result<Vec<u8>, SyncError> {
    let mut tar = tar::Archive::new(GzDecoder::new(archive));
    let mut seen = Vec::new();
    let mut found: Option<Vec<u8>> = None;

    for entry in tar.entries()? {
        let mut entry = entry?;
        let name = entry
            .path()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default();

        if found.is_none() && name.ends_with(suffix) {
            let mut file = File::create(temp_path)?;
            let mut buf = Vec::with_capacity(entry.size() as usize);
            let mut chunk = [0u8; 32 * 1024];
            loop {
                let n = entry.read(&mut chunk)?;
                if n == 0 {
                    break;
                }
                file.write_all(&chunk[..n])?;
                buf.extend_from_slice(&chunk[..n]);
            }
            file.flush()?;
            found = Some(buf);
        } else {
            io::copy(&mut entry, &mut io::sink())?;
        }
        seen.push(name);
    }

    found.ok_or(SyncError::DbEntryNotFound { suffix, seen })
}
