//! The video library: single owned state container with snapshot persistence
//! and synchronous change notifications.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use tracing::{debug, info, warn};

use crate::analytics::{demo_video, DEMO_VIDEO_ID};
use crate::error::Result;
use crate::models::{Video, VideoPatch, VideoStatus};

const SNAPSHOT_VERSION: u32 = 1;

/// Durable key-value slot the store snapshot lives in.
pub trait SnapshotBackend: Send + Sync {
    fn read(&self, key: &str) -> Result<Option<String>>;
    fn write(&self, key: &str, contents: &str) -> Result<()>;
}

/// One JSON file per key inside `dir`.
pub struct FileSnapshotBackend {
    dir: PathBuf,
}

impl FileSnapshotBackend {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }
}

impl SnapshotBackend for FileSnapshotBackend {
    fn read(&self, key: &str) -> Result<Option<String>> {
        match std::fs::read_to_string(self.path(key)) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, key: &str, contents: &str) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.path(key);
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, contents)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }
}

#[derive(Default)]
pub struct MemorySnapshotBackend {
    entries: Mutex<HashMap<String, String>>,
}

impl SnapshotBackend for MemorySnapshotBackend {
    fn read(&self, key: &str) -> Result<Option<String>> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(key).cloned())
    }

    fn write(&self, key: &str, contents: &str) -> Result<()> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key.to_string(), contents.to_string());
        Ok(())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreState {
    pub videos: Vec<Video>,
    pub selected_video_id: Option<String>,
}

#[derive(Serialize)]
struct SnapshotOut<'a> {
    version: u32,
    state: &'a StoreState,
}

#[derive(Deserialize)]
struct SnapshotIn {
    version: u32,
    state: StoreState,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum StoreEvent {
    VideoAdded { id: String },
    VideoUpdated { id: String },
    VideoDeleted { id: String },
    SelectionChanged { id: Option<String> },
}

enum Hydration {
    Restored(StoreState),
    Missing,
    /// Present but unusable; carries the raw entry when it could be read.
    Rejected(Option<String>),
}

pub fn backup_key(namespace: &str) -> String {
    format!("{}.bak", namespace)
}

type Listener = Arc<dyn Fn(&StoreEvent) + Send + Sync>;

#[derive(Default)]
struct Listeners {
    next_id: u64,
    entries: Vec<(u64, Listener)>,
}

/// Detaches its listener when dropped.
#[must_use = "dropping a subscription unsubscribes the listener"]
pub struct Subscription {
    id: u64,
    listeners: Weak<Mutex<Listeners>>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(listeners) = self.listeners.upgrade() {
            let mut listeners = listeners.lock().unwrap_or_else(PoisonError::into_inner);
            listeners.entries.retain(|(id, _)| *id != self.id);
        }
    }
}

pub struct VideoStore {
    state: RwLock<StoreState>,
    backend: Box<dyn SnapshotBackend>,
    namespace: String,
    listeners: Arc<Mutex<Listeners>>,
}

impl VideoStore {
    /// Rehydrates from the backend, seeding the demo library on first run.
    ///
    /// An entry that cannot be used is copied to `<namespace>.bak` and left in
    /// place; the seeded library is only written back by the next mutation.
    pub fn open(backend: Box<dyn SnapshotBackend>, namespace: impl Into<String>) -> Self {
        let namespace = namespace.into();
        let (state, persist_seed) = match Self::hydrate(backend.as_ref(), &namespace) {
            Hydration::Restored(state) => (state, false),
            Hydration::Missing => (Self::seed(), true),
            Hydration::Rejected(contents) => {
                if let Some(contents) = contents {
                    Self::back_up(backend.as_ref(), &namespace, &contents);
                }
                (Self::seed(), false)
            }
        };

        let store = Self {
            state: RwLock::new(state),
            backend,
            namespace,
            listeners: Arc::new(Mutex::new(Listeners::default())),
        };

        if persist_seed {
            info!("[store] Seeded library with demo video");
            store.persist(&store.snapshot());
        }
        store
    }

    pub fn in_memory(namespace: impl Into<String>) -> Self {
        Self::open(Box::new(MemorySnapshotBackend::default()), namespace)
    }

    fn hydrate(backend: &dyn SnapshotBackend, namespace: &str) -> Hydration {
        let contents = match backend.read(namespace) {
            Ok(Some(contents)) => contents,
            Ok(None) => return Hydration::Missing,
            Err(e) => {
                warn!("[store] Failed to read snapshot '{}': {}", namespace, e);
                return Hydration::Rejected(None);
            }
        };

        match serde_json::from_str::<SnapshotIn>(&contents) {
            Ok(snapshot) if snapshot.version <= SNAPSHOT_VERSION => {
                info!(
                    "[store] Rehydrated {} videos from snapshot '{}'",
                    snapshot.state.videos.len(),
                    namespace
                );
                Hydration::Restored(snapshot.state)
            }
            Ok(snapshot) => {
                warn!(
                    "[store] Snapshot '{}' has unsupported version {}, starting fresh",
                    namespace, snapshot.version
                );
                Hydration::Rejected(Some(contents))
            }
            Err(e) => {
                warn!("[store] Snapshot '{}' is unreadable, starting fresh: {}", namespace, e);
                Hydration::Rejected(Some(contents))
            }
        }
    }

    fn back_up(backend: &dyn SnapshotBackend, namespace: &str, contents: &str) {
        let key = backup_key(namespace);
        match backend.write(&key, contents) {
            Ok(()) => info!("[store] Kept unusable snapshot '{}' as '{}'", namespace, key),
            Err(e) => warn!("[store] Failed to back up snapshot '{}': {}", namespace, e),
        }
    }

    fn seed() -> StoreState {
        StoreState {
            videos: vec![demo_video()],
            selected_video_id: Some(DEMO_VIDEO_ID.to_string()),
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, StoreState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    // Write failures leave the in-memory state authoritative. Writes are
    // synchronous and happen under the state lock, which keeps them ordered.
    fn persist(&self, state: &StoreState) {
        let snapshot = SnapshotOut {
            version: SNAPSHOT_VERSION,
            state,
        };
        let result = serde_json::to_string(&snapshot)
            .map_err(Into::into)
            .and_then(|json| self.backend.write(&self.namespace, &json));
        if let Err(e) = result {
            warn!("[store] Failed to persist snapshot '{}': {}", self.namespace, e);
        }
    }

    /// Runs one mutation under the write lock, persisting if it produced
    /// events. Listeners are called after the lock is released.
    fn mutate<R>(&self, f: impl FnOnce(&mut StoreState) -> (R, Vec<StoreEvent>)) -> R {
        let (result, events) = {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            let (result, events) = f(&mut state);
            if !events.is_empty() {
                self.persist(&state);
            }
            (result, events)
        };

        for event in &events {
            self.notify(event);
        }
        result
    }

    fn notify(&self, event: &StoreEvent) {
        let listeners: Vec<Listener> = {
            let listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
            listeners.entries.iter().map(|(_, l)| l.clone()).collect()
        };
        for listener in listeners {
            listener(event);
        }
    }

    /// Appends a fully formed record. A record whose id is already present is ignored.
    pub fn add_video(&self, video: Video) -> bool {
        self.mutate(|state| {
            if state.videos.iter().any(|v| v.id == video.id) {
                warn!("[store] Ignoring duplicate video id {}", video.id);
                return (false, Vec::new());
            }
            debug!("[store] Added video {} ({})", video.id, video.name);
            let event = StoreEvent::VideoAdded {
                id: video.id.clone(),
            };
            state.videos.push(video);
            (true, vec![event])
        })
    }

    /// Merges `patch` into the matching record. Unknown ids are a no-op.
    pub fn update_video(&self, id: &str, patch: VideoPatch) -> Option<Video> {
        self.mutate(|state| {
            let Some(video) = state.videos.iter_mut().find(|v| v.id == id) else {
                return (None, Vec::new());
            };
            apply_patch(video, patch);
            (
                Some(video.clone()),
                vec![StoreEvent::VideoUpdated { id: id.to_string() }],
            )
        })
    }

    /// Removes the matching record, clearing the selection if it pointed at it.
    pub fn delete_video(&self, id: &str) -> bool {
        self.mutate(|state| {
            let before = state.videos.len();
            state.videos.retain(|v| v.id != id);
            if state.videos.len() == before {
                return (false, Vec::new());
            }

            let mut events = vec![StoreEvent::VideoDeleted { id: id.to_string() }];
            if state.selected_video_id.as_deref() == Some(id) {
                state.selected_video_id = None;
                events.push(StoreEvent::SelectionChanged { id: None });
            }
            (true, events)
        })
    }

    /// Sets the selection. Existence is the caller's responsibility.
    pub fn select_video(&self, id: Option<String>) {
        self.mutate(|state| {
            state.selected_video_id = id.clone();
            ((), vec![StoreEvent::SelectionChanged { id }])
        })
    }

    pub fn selected_video(&self) -> Option<Video> {
        let state = self.read();
        let id = state.selected_video_id.as_deref()?;
        state.videos.iter().find(|v| v.id == id).cloned()
    }

    pub fn selected_video_id(&self) -> Option<String> {
        self.read().selected_video_id.clone()
    }

    pub fn get(&self, id: &str) -> Option<Video> {
        self.read().videos.iter().find(|v| v.id == id).cloned()
    }

    pub fn videos(&self) -> Vec<Video> {
        self.read().videos.clone()
    }

    pub fn len(&self) -> usize {
        self.read().videos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> StoreState {
        self.read().clone()
    }

    /// Registers a listener called synchronously after every mutation.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&StoreEvent) + Send + Sync + 'static,
    {
        let mut listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        let id = listeners.next_id;
        listeners.next_id += 1;
        listeners.entries.push((id, Arc::new(listener)));

        Subscription {
            id,
            listeners: Arc::downgrade(&self.listeners),
        }
    }
}

fn apply_patch(video: &mut Video, patch: VideoPatch) {
    if let Some(name) = patch.name {
        video.name = name;
    }
    if let Some(thumbnail) = patch.thumbnail {
        video.thumbnail = Some(thumbnail);
    }
    if let Some(duration) = patch.duration {
        video.duration = Some(duration);
    }
    match (video.status, patch.status) {
        (VideoStatus::Processing, Some(VideoStatus::Completed)) if video.analytics.is_some() => {
            video.status = VideoStatus::Completed;
        }
        (current, Some(requested)) if current != requested => {
            debug!(
                "[store] Ignoring status change {:?} -> {:?} for {}",
                current, requested, video.id
            );
        }
        _ => {}
    }
}
