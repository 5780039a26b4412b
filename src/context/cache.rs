//! Two-tier system-context cache.
//!
//! The process-local tier is a single snapshot behind a readers-writer lock;
//! the on-disk tier is a [`DiskStore`]. A snapshot younger than [`EXPIRY`] is
//! served as is. Within the following [`GRACE`] window it is still served,
//! but one background refresh is started. Anything older is rebuilt before
//! the caller gets an answer.

use super::SystemContext;
use super::detector::ContextSource;
use super::disk::{CacheRecord, DiskStore};
use crate::clock::TimeProvider;
use anyhow::Result;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{RwLock, RwLockWriteGuard};
use tokio::task::{self, JoinHandle};
use tracing::{debug, info, warn};

/// Age (seconds) below which a snapshot is fresh.
pub const EXPIRY: u64 = 5 * 60;
/// Extra seconds during which a stale snapshot is still served.
pub const GRACE: u64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Freshness {
    Fresh,
    StaleUsable,
    Expired,
}

impl Freshness {
    pub fn classify(built_at: u64, now: u64) -> Self {
        let age = now.saturating_sub(built_at);
        if age < EXPIRY {
            Freshness::Fresh
        } else if age < EXPIRY + GRACE {
            Freshness::StaleUsable
        } else {
            Freshness::Expired
        }
    }
}

impl fmt::Display for Freshness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Freshness::Fresh => "fresh",
            Freshness::StaleUsable => "stale",
            Freshness::Expired => "expired",
        })
    }
}

/// Snapshot of the on-disk tier for `config cache status`.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStatus {
    pub path: PathBuf,
    pub exists: bool,
    pub built_at: Option<u64>,
    pub age_secs: Option<u64>,
    pub freshness: Option<Freshness>,
    pub tool_count: Option<usize>,
    pub fingerprint: Option<String>,
    pub refreshing: bool,
}

struct Snapshot {
    context: Arc<SystemContext>,
    built_at: u64,
}

struct Inner {
    source: Arc<dyn ContextSource>,
    clock: Arc<dyn TimeProvider>,
    disk: Option<DiskStore>,
    current: RwLock<Option<Snapshot>>,
    refreshing: AtomicBool,
    background: Mutex<Option<JoinHandle<()>>>,
}

impl Inner {
    /// Collects a new snapshot, publishes it to both tiers and returns it.
    async fn rebuild(&self, slot: &mut RwLockWriteGuard<'_, Option<Snapshot>>) -> Arc<SystemContext> {
        let context = Arc::new(self.source.collect().await);
        let built_at = self.clock.now();
        self.persist(&context, built_at).await;
        **slot = Some(Snapshot {
            context: Arc::clone(&context),
            built_at,
        });
        context
    }

    /// Installs an already collected snapshot; the lock is held only to swap.
    async fn publish(&self, context: SystemContext) {
        let context = Arc::new(context);
        let built_at = self.clock.now();
        self.persist(&context, built_at).await;
        *self.current.write().await = Some(Snapshot { context, built_at });
    }

    /// File locking and the rename block, so the write runs off the runtime.
    async fn persist(&self, context: &SystemContext, built_at: u64) {
        let Some(disk) = self.disk.clone() else {
            return;
        };
        let record = CacheRecord::new(context.clone(), built_at);
        match task::spawn_blocking(move || disk.store(&record)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!("Could not persist context cache: {:#}", e),
            Err(e) => debug!("Context cache writer did not finish: {}", e),
        }
    }

    async fn load_disk(&self) -> Option<CacheRecord> {
        let disk = self.disk.clone()?;
        task::spawn_blocking(move || disk.load()).await.ok().flatten()
    }
}

/// Clears the in-progress flag when the refresh task ends, panics included.
struct RefreshingGuard<'a>(&'a AtomicBool);

impl Drop for RefreshingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Cheap to clone; clones share the same tiers.
#[derive(Clone)]
pub struct ContextCache {
    inner: Arc<Inner>,
}

impl ContextCache {
    pub fn new(source: Arc<dyn ContextSource>, clock: Arc<dyn TimeProvider>, disk: Option<DiskStore>) -> Self {
        Self {
            inner: Arc::new(Inner {
                source,
                clock,
                disk,
                current: RwLock::new(None),
                refreshing: AtomicBool::new(false),
                background: Mutex::new(None),
            }),
        }
    }

    /// Returns a usable snapshot, rebuilding or scheduling a refresh as the
    /// freshness policy requires.
    pub async fn get(&self) -> Arc<SystemContext> {
        {
            let current = self.inner.current.read().await;
            if let Some(snapshot) = current.as_ref() {
                match Freshness::classify(snapshot.built_at, self.inner.clock.now()) {
                    Freshness::Fresh => return Arc::clone(&snapshot.context),
                    Freshness::StaleUsable => {
                        let context = Arc::clone(&snapshot.context);
                        drop(current);
                        self.trigger_background_refresh();
                        return context;
                    }
                    Freshness::Expired => {}
                }
            }
        }

        let mut current = self.inner.current.write().await;
        let now = self.inner.clock.now();

        // Another caller may have rebuilt while we waited for the write lock.
        if let Some(snapshot) = current.as_ref() {
            match Freshness::classify(snapshot.built_at, now) {
                Freshness::Fresh => return Arc::clone(&snapshot.context),
                Freshness::StaleUsable => {
                    let context = Arc::clone(&snapshot.context);
                    drop(current);
                    self.trigger_background_refresh();
                    return context;
                }
                Freshness::Expired => {}
            }
        }

        // The disk tier may hold a newer record written by another process.
        let memory_built_at = current.as_ref().map(|snapshot| snapshot.built_at);
        if let Some(record) = self.inner.load_disk().await {
            let freshness = Freshness::classify(record.built_at, now);
            let newer = memory_built_at.is_none_or(|built_at| record.built_at > built_at);
            debug!("Found context cache on disk ({}, newer: {})", freshness, newer);
            if newer && freshness != Freshness::Expired {
                let context = Arc::new(record.context);
                *current = Some(Snapshot {
                    context: Arc::clone(&context),
                    built_at: record.built_at,
                });
                if freshness == Freshness::StaleUsable {
                    drop(current);
                    self.trigger_background_refresh();
                }
                return context;
            }
        }

        info!("Building system context");
        self.inner.rebuild(&mut current).await
    }

    /// Rebuilds in the foreground regardless of age.
    pub async fn refresh(&self) -> Arc<SystemContext> {
        let mut current = self.inner.current.write().await;
        self.inner.rebuild(&mut current).await
    }

    /// Starts a background refresh unless one is already running.
    ///
    /// Returns whether this call started it.
    pub fn trigger_background_refresh(&self) -> bool {
        if self
            .inner
            .refreshing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Context refresh already in progress");
            return false;
        }

        debug!("Starting background context refresh");
        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            let _reset = RefreshingGuard(&inner.refreshing);
            let context = inner.source.collect().await;
            inner.publish(context).await;
            debug!("Background context refresh finished");
        });
        *self.inner.background.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        true
    }

    pub fn is_refreshing(&self) -> bool {
        self.inner.refreshing.load(Ordering::Acquire)
    }

    /// Waits up to `limit` for a running background refresh.
    ///
    /// The binary calls this before exiting so a refresh it started can
    /// publish. Returns whether the refresh finished in time.
    pub async fn wait_for_background(&self, limit: Duration) -> bool {
        let handle = self
            .inner
            .background
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(handle) = handle else {
            return true;
        };
        match tokio::time::timeout(limit, handle).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                warn!("Background context refresh failed: {}", e);
                true
            }
            Err(_) => {
                debug!("Background context refresh still running after {:?}", limit);
                false
            }
        }
    }

    /// Drops both tiers. Returns whether a disk record existed.
    pub async fn clear(&self) -> Result<bool> {
        *self.inner.current.write().await = None;
        match self.inner.disk.clone() {
            Some(disk) => task::spawn_blocking(move || disk.clear()).await?,
            None => Ok(false),
        }
    }

    /// Describes the on-disk tier.
    pub fn status(&self) -> Option<CacheStatus> {
        let disk = self.inner.disk.as_ref()?;
        let now = self.inner.clock.now();
        let record = disk.load();
        Some(CacheStatus {
            path: disk.path().to_path_buf(),
            exists: disk.path().exists(),
            built_at: record.as_ref().map(|r| r.built_at),
            age_secs: record.as_ref().map(|r| now.saturating_sub(r.built_at)),
            freshness: record.as_ref().map(|r| Freshness::classify(r.built_at, now)),
            tool_count: record.as_ref().map(|r| r.context.tools.total()),
            fingerprint: record.map(|r| r.fingerprint),
            refreshing: self.is_refreshing(),
        })
    }
}
