/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::future::Future;
use std::sync::{Arc, Mutex};

use rustc_hash::FxHashMap;
use tokio::sync::watch;

use crate::db::DbLoader;

struct VersionSlot<D> {
    db: Arc<D>,
    active: usize,
    retiring: bool,
}

struct HandleState<D> {
    current: Option<u64>,
    next_id: u64,
    slots: FxHashMap<u64, VersionSlot<D>>,
}

/// Serves lookups against the current db version while updates swap a new
/// version in underneath.
///
/// Versions live in a side table keyed by a monotonic generation id. Each
/// slot counts its in-flight operations; a version that is replaced while
/// operations are still running is marked retiring and dropped by whichever
/// operation brings the count back to zero. Each version is dropped once.
pub struct HotSwapDbHandle<L: DbLoader> {
    loader: L,
    state: Mutex<HandleState<L::Db>>,
    loaded_tx: watch::Sender<bool>,
}

struct BorrowedDb<'a, L: DbLoader> {
    handle: &'a HotSwapDbHandle<L>,
    id: u64,
    db: Arc<L::Db>,
}

impl<L: DbLoader> Drop for BorrowedDb<'_, L> {
    fn drop(&mut self) {
        self.handle.release(self.id);
    }
}

impl<L: DbLoader> HotSwapDbHandle<L> {
    pub fn new(loader: L) -> Self {
        let (loaded_tx, _) = watch::channel(false);
        HotSwapDbHandle {
            loader,
            state: Mutex::new(HandleState {
                current: None,
                next_id: 1,
                slots: FxHashMap::default(),
            }),
            loaded_tx,
        }
    }

    /// Load `buf` and make it the current version. The previous version is
    /// dropped right away if idle, or left to retire with its last borrower.
    pub fn load_new_db(&self, buf: &[u8]) -> anyhow::Result<()> {
        let db = self.loader.load(buf)?;

        let mut state = self.state.lock().unwrap();
        let id = state.next_id;
        state.next_id += 1;
        state.slots.insert(
            id,
            VersionSlot {
                db: Arc::new(db),
                active: 0,
                retiring: false,
            },
        );
        if let Some(old_id) = state.current.replace(id) {
            if state.slots.get(&old_id).is_some_and(|s| s.active == 0) {
                state.slots.remove(&old_id);
            } else if let Some(old) = state.slots.get_mut(&old_id) {
                old.retiring = true;
            }
        }
        drop(state);

        self.loaded_tx.send_replace(true);
        Ok(())
    }

    /// Load `buf` only if no version has ever been loaded. Used to pick up
    /// an already synced on-disk file at startup without clobbering a newer
    /// version a concurrent update may have published.
    pub fn load_if_empty(&self, buf: &[u8]) -> anyhow::Result<bool> {
        let db = self.loader.load(buf)?;

        let mut state = self.state.lock().unwrap();
        if state.current.is_some() {
            return Ok(false);
        }
        let id = state.next_id;
        state.next_id += 1;
        state.slots.insert(
            id,
            VersionSlot {
                db: Arc::new(db),
                active: 0,
                retiring: false,
            },
        );
        state.current = Some(id);
        drop(state);

        self.loaded_tx.send_replace(true);
        Ok(true)
    }

    async fn acquire_current(&self) -> BorrowedDb<'_, L> {
        let mut rx = self.loaded_tx.subscribe();
        loop {
            {
                let mut state = self.state.lock().unwrap();
                if let Some(id) = state.current {
                    if let Some(slot) = state.slots.get_mut(&id) {
                        slot.active += 1;
                        return BorrowedDb {
                            handle: self,
                            id,
                            db: slot.db.clone(),
                        };
                    }
                }
            }
            // nothing loaded yet, wait out the first load
            let _ = rx.wait_for(|loaded| *loaded).await;
        }
    }

    fn release(&self, id: u64) {
        let mut state = self.state.lock().unwrap();
        let mut retire = false;
        if let Some(slot) = state.slots.get_mut(&id) {
            slot.active -= 1;
            retire = slot.retiring && slot.active == 0;
        }
        if retire {
            state.slots.remove(&id);
        }
    }

    /// Run `op` against the version that is current when the call starts.
    /// That version stays alive until `op` finishes, also when a newer one
    /// is loaded in the meantime.
    pub async fn with_db<F, Fut, T>(&self, op: F) -> T
    where
        F: FnOnce(Arc<L::Db>) -> Fut,
        Fut: Future<Output = T>,
    {
        let borrowed = self.acquire_current().await;
        op(borrowed.db.clone()).await
    }
}
