//! Optimistic, locally persisted view of the settings document.
//!
//! The cache answers reads from memory, applies edits immediately and pushes
//! them through the durable write queue. Fetched server state is overlaid
//! with every edit the backend has not acknowledged yet, so a background sync
//! never rolls the UI back.

use anyhow::Result;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::collection::DocumentCollection;
use crate::db::{self, Pool};
use crate::model::{Settings, SettingsPatch};
use crate::settings;
use crate::theme::ThemeSink;

/// Local storage key of the settings snapshot.
pub const SNAPSHOT_KEY: &str = "blogdesk.settings";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// Nothing loaded; defaults are showing.
    Uninitialized,
    /// Showing the local snapshot and/or local edits.
    Cached,
    /// Confirmed against the backend at least once.
    Synced,
}

struct State {
    phase: Phase,
    settings: Settings,
    /// Edits not yet acknowledged by the backend, by version.
    pending: BTreeMap<i64, SettingsPatch>,
    next_version: i64,
    /// Bumped on every acknowledgement; a fetch that spans a bump is stale.
    epoch: u64,
}

enum LocalWrite {
    Snapshot(Settings),
    Patch {
        snapshot: Settings,
        patch: SettingsPatch,
        version: i64,
        document_id: Option<String>,
    },
    Flush(oneshot::Sender<()>),
}

pub struct SettingsCache {
    state: RwLock<State>,
    remote: Arc<dyn DocumentCollection>,
    collection: String,
    sink: Arc<dyn ThemeSink>,
    tx: Mutex<Option<mpsc::UnboundedSender<LocalWrite>>>,
    writer: Mutex<Option<JoinHandle<()>>>,
}

impl SettingsCache {
    /// Load the local snapshot and the unacknowledged edits, apply them to
    /// `sink` and start the local writer. Never touches the network.
    #[instrument(skip_all, fields(collection = %collection))]
    pub async fn init(
        pool: Pool,
        remote: Arc<dyn DocumentCollection>,
        collection: String,
        sink: Arc<dyn ThemeSink>,
    ) -> Arc<Self> {
        let snapshot = match db::load_snapshot(&pool, SNAPSHOT_KEY).await {
            Ok(Some(raw)) => match serde_json::from_str::<Settings>(&raw) {
                Ok(s) => Some(s),
                Err(err) => {
                    warn!(?err, "ignoring malformed settings snapshot");
                    None
                }
            },
            Ok(None) => None,
            Err(err) => {
                warn!(?err, "failed to load settings snapshot");
                None
            }
        };
        let pending: BTreeMap<i64, SettingsPatch> = match db::list_pending_writes(&pool).await {
            Ok(writes) => writes
                .into_iter()
                .filter(|w| w.collection == collection)
                .map(|w| (w.version, w.patch))
                .collect(),
            Err(err) => {
                warn!(?err, "failed to load pending settings writes");
                BTreeMap::new()
            }
        };

        let phase = if snapshot.is_some() {
            Phase::Cached
        } else {
            Phase::Uninitialized
        };
        let settings = snapshot.unwrap_or_default();
        sink.apply(&settings);
        info!(?phase, pending = pending.len(), "settings cache initialized");

        let next_version = pending.keys().next_back().map_or(1, |v| v + 1);
        let (tx, rx) = mpsc::unbounded_channel();
        let writer = tokio::spawn(run_writer(pool, rx, collection.clone()));

        Arc::new(Self {
            state: RwLock::new(State {
                phase,
                settings,
                pending,
                next_version,
                epoch: 0,
            }),
            remote,
            collection,
            sink,
            tx: Mutex::new(Some(tx)),
            writer: Mutex::new(Some(writer)),
        })
    }

    fn read(&self) -> RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    fn send(&self, write: LocalWrite) -> bool {
        let guard = self.tx.lock().unwrap_or_else(|e| e.into_inner());
        match guard.as_ref() {
            Some(tx) => tx.send(write).is_ok(),
            None => false,
        }
    }

    /// Current settings, or the defaults when nothing is loaded.
    pub fn snapshot(&self) -> Settings {
        self.read().settings.clone()
    }

    pub fn phase(&self) -> Phase {
        self.read().phase
    }

    /// Number of local edits the backend has not acknowledged.
    pub fn unacknowledged(&self) -> usize {
        self.read().pending.len()
    }

    /// Apply `patch` now and queue it for the backend. Returns the version
    /// tag of the edit.
    pub fn mutate(&self, patch: SettingsPatch) -> i64 {
        let (snapshot, version) = {
            let mut st = self.write();
            let version = st.next_version;
            st.next_version += 1;
            st.settings.merge(&patch);
            st.pending.insert(version, patch.clone());
            if st.phase == Phase::Uninitialized {
                st.phase = Phase::Cached;
            }
            self.sink.apply(&st.settings);
            (st.settings.clone(), version)
        };
        debug!(version, "settings mutated locally");
        let document_id = snapshot.id.clone();
        if !self.send(LocalWrite::Patch {
            snapshot,
            patch,
            version,
            document_id,
        }) {
            warn!(version, "settings cache torn down; edit kept in memory only");
        }
        version
    }

    /// The backend confirmed every edit up to `version`.
    pub fn acknowledge(&self, version: i64) {
        let mut st = self.write();
        st.pending.retain(|v, _| *v > version);
        st.epoch += 1;
    }

    /// Fetch in the background once the session is ready. Failures are
    /// logged and leave the cache as it was.
    pub fn start_sync(self: &Arc<Self>) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            match this.fetch().await {
                Ok(Some(_)) => {}
                Ok(None) => debug!("background settings sync superseded by an acknowledgement"),
                Err(err) => warn!(?err, "background settings sync failed"),
            }
        })
    }

    /// Fetch from the backend now, bypassing the cache.
    ///
    /// A fetch that spans an acknowledgement is thrown away and retried once.
    /// If the retry is stale too, the local view is returned unchanged and
    /// the phase is left as it was.
    pub async fn refresh(&self) -> Result<Settings> {
        for attempt in 1..=2 {
            if let Some(view) = self.fetch().await? {
                return Ok(view);
            }
            info!(attempt, "refreshed settings were stale; discarded");
        }
        Ok(self.snapshot())
    }

    /// `None` when the result was discarded because an acknowledgement
    /// landed while the request was in flight.
    #[instrument(skip(self), fields(collection = %self.collection))]
    async fn fetch(&self) -> Result<Option<Settings>> {
        let epoch = self.read().epoch;
        let server = settings::get_or_create(self.remote.as_ref(), &self.collection).await?;

        let view = {
            let mut st = self.write();
            if st.settings.id.is_none() {
                st.settings.id = server.id.clone();
            }
            if st.epoch != epoch {
                debug!("discarding settings fetched before the last acknowledgement");
                return Ok(None);
            }
            let mut view = server;
            for patch in st.pending.values() {
                view.merge(patch);
            }
            st.settings = view.clone();
            st.phase = Phase::Synced;
            self.sink.apply(&view);
            view
        };
        self.send(LocalWrite::Snapshot(view.clone()));
        Ok(Some(view))
    }

    /// Wait until every local write queued so far is persisted.
    pub async fn flush(&self) {
        let (done, wait) = oneshot::channel();
        if self.send(LocalWrite::Flush(done)) {
            let _ = wait.await;
        }
    }

    /// Stop accepting local writes and wait for the queued ones.
    pub async fn teardown(&self) {
        drop(self.tx.lock().unwrap_or_else(|e| e.into_inner()).take());
        let writer = self.writer.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(writer) = writer {
            if let Err(err) = writer.await {
                warn!(?err, "settings writer ended abnormally");
            }
        }
    }
}

async fn run_writer(pool: Pool, mut rx: mpsc::UnboundedReceiver<LocalWrite>, collection: String) {
    while let Some(write) = rx.recv().await {
        let res = match write {
            LocalWrite::Snapshot(settings) => persist_snapshot(&pool, &settings).await,
            LocalWrite::Patch {
                snapshot,
                patch,
                version,
                document_id,
            } => persist_patch(&pool, &collection, &snapshot, &patch, version, document_id).await,
            LocalWrite::Flush(done) => {
                let _ = done.send(());
                Ok(())
            }
        };
        if let Err(err) = res {
            warn!(?err, "failed to persist local settings");
        }
    }
    debug!("settings writer stopped");
}

async fn persist_snapshot(pool: &Pool, settings: &Settings) -> Result<()> {
    let raw = serde_json::to_string(settings)?;
    db::save_snapshot(pool, SNAPSHOT_KEY, &raw).await
}

async fn persist_patch(
    pool: &Pool,
    collection: &str,
    snapshot: &Settings,
    patch: &SettingsPatch,
    version: i64,
    document_id: Option<String>,
) -> Result<()> {
    persist_snapshot(pool, snapshot).await?;
    db::enqueue_write(pool, collection, document_id.as_deref(), patch, version).await?;
    Ok(())
}
