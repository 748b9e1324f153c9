use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};

use crate::prelude::*;

/// Convenience alias for UTC DT
pub type UtcDT = DateTime<Utc>;

/// Platform handle for an open location subscription
pub type WatchId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, specta::Type)]
/// A single reading from the device's location stream. Each new one replaces the last, no
/// history is kept.
pub struct LivePosition {
    pub lat: f64,
    pub lng: f64,
    /// Radius of uncertainty in meters, when the platform reports one
    pub accuracy_meters: Option<f64>,
    pub observed_at: UtcDT,
}

impl LivePosition {
    pub fn new(lat: f64, lng: f64, accuracy_meters: Option<f64>) -> Self {
        Self {
            lat,
            lng,
            accuracy_meters,
            observed_at: Utc::now(),
        }
    }
}

/// Something pushed by a [LocationSource] subscription
#[derive(Debug, Clone, PartialEq)]
pub enum PositionEvent {
    Update(LivePosition),
    /// The platform gave up on the subscription (permission revoked, hardware off, ...)
    Error(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchOptions {
    pub enable_high_accuracy: bool,
    pub timeout_ms: u32,
    /// How old a cached reading may be, zero means always take a fresh one
    pub maximum_age_ms: u32,
}

/// High accuracy, never reuse a cached reading
pub const WATCH_OPTIONS: WatchOptions = WatchOptions {
    enable_high_accuracy: true,
    timeout_ms: 10000,
    maximum_age_ms: 0,
};

pub type PositionCallback = Box<dyn Fn(PositionEvent) + Send + Sync>;

/// The device's continuous location stream
pub trait LocationSource: Send + Sync {
    /// Open a subscription that calls `callback` on every reading. An error here means the
    /// platform lacks or denies the capability.
    fn watch(&self, options: WatchOptions, callback: PositionCallback) -> Result<WatchId>;
    /// Close a subscription previously opened with [LocationSource::watch]
    fn clear_watch(&self, id: WatchId) -> Result;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, specta::Type)]
pub enum WatchState {
    Idle,
    Watching,
    /// The platform refused us, terminal for this page
    Unavailable,
}

/// What the location button should look like for a given [WatchState]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, specta::Type)]
pub struct WatchControl {
    pub state: WatchState,
    pub label: String,
    /// CSS class for the button
    pub style: String,
}

impl WatchState {
    pub fn control(self) -> WatchControl {
        let (label, style) = match self {
            Self::Idle => ("Usar mi ubicación", "btn-light"),
            Self::Watching => ("Ubicación lista", "btn-success"),
            Self::Unavailable => ("No disponible", "btn-warning"),
        };
        WatchControl {
            state: self,
            label: label.to_string(),
            style: style.to_string(),
        }
    }
}

struct WatchSlot {
    state: WatchState,
    id: Option<WatchId>,
}

/// Owns at most one [LocationSource] subscription at a time and tracks the
/// Idle -> Watching -> Idle cycle driven by the location button.
pub struct PositionWatcher<L: LocationSource> {
    source: L,
    slot: Mutex<WatchSlot>,
    /// Bumped whenever a subscription is closed, callbacks from older subscriptions compare
    /// against it and drop their events
    generation: Arc<AtomicU64>,
}

impl<L: LocationSource> PositionWatcher<L> {
    pub fn new(source: L) -> Self {
        Self {
            source,
            slot: Mutex::new(WatchSlot {
                state: WatchState::Idle,
                id: None,
            }),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    pub async fn state(&self) -> WatchState {
        self.slot.lock().await.state
    }

    pub async fn is_watching(&self) -> bool {
        self.state().await == WatchState::Watching
    }

    /// Begin watching, any subscription already open is closed first.
    pub async fn start<U, E>(&self, on_update: U, on_error: E) -> WatchState
    where
        U: Fn(LivePosition) + Send + Sync + 'static,
        E: Fn(String) + Send + Sync + 'static,
    {
        let mut slot = self.slot.lock().await;
        self.start_locked(&mut slot, on_update, on_error);
        slot.state
    }

    /// Stop watching, does nothing if we aren't.
    pub async fn stop(&self) -> WatchState {
        let mut slot = self.slot.lock().await;
        self.stop_locked(&mut slot);
        slot.state
    }

    /// Single-control behaviour of the location button: start when idle, stop when watching,
    /// nothing once unavailable.
    pub async fn toggle<U, E>(&self, on_update: U, on_error: E) -> WatchState
    where
        U: Fn(LivePosition) + Send + Sync + 'static,
        E: Fn(String) + Send + Sync + 'static,
    {
        let mut slot = self.slot.lock().await;
        match slot.state {
            WatchState::Idle => self.start_locked(&mut slot, on_update, on_error),
            WatchState::Watching => self.stop_locked(&mut slot),
            WatchState::Unavailable => {}
        }
        slot.state
    }

    /// The stream reported an error, close it and stay unavailable. No retries.
    pub async fn mark_unavailable(&self, why: &str) -> WatchState {
        warn!("Location stream failed: {why}");
        let mut slot = self.slot.lock().await;
        self.close_subscription(&mut slot);
        slot.state = WatchState::Unavailable;
        slot.state
    }

    fn start_locked<U, E>(&self, slot: &mut WatchSlot, on_update: U, on_error: E)
    where
        U: Fn(LivePosition) + Send + Sync + 'static,
        E: Fn(String) + Send + Sync + 'static,
    {
        if slot.state == WatchState::Unavailable {
            return;
        }

        self.close_subscription(slot);

        let generation = self.generation.load(Ordering::Acquire);
        let current = self.generation.clone();
        let callback: PositionCallback = Box::new(move |event| {
            if current.load(Ordering::Acquire) != generation {
                return;
            }
            match event {
                PositionEvent::Update(position) => on_update(position),
                PositionEvent::Error(why) => on_error(why),
            }
        });

        match self.source.watch(WATCH_OPTIONS, callback) {
            Ok(id) => {
                info!("Watching location (subscription {id})");
                slot.id = Some(id);
                slot.state = WatchState::Watching;
            }
            Err(why) => {
                warn!("Location is unavailable: {why:?}");
                slot.state = WatchState::Unavailable;
            }
        }
    }

    fn stop_locked(&self, slot: &mut WatchSlot) {
        self.close_subscription(slot);
        if slot.state == WatchState::Watching {
            info!("Stopped watching location");
            slot.state = WatchState::Idle;
        }
    }

    fn close_subscription(&self, slot: &mut WatchSlot) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        if let Some(id) = slot.id.take() {
            if let Err(why) = self.source.clear_watch(id) {
                warn!("Failed to clear location watch {id}: {why:?}");
            }
        }
    }
}

/// The latitude / longitude / label inputs shared between the location control and the scan
/// form
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, specta::Type)]
pub struct LocationFields {
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    /// Human readable place name, filled in by reverse geocoding
    pub label: Option<String>,
}

impl LocationFields {
    pub fn set_position(&mut self, position: &LivePosition) {
        self.lat = Some(position.lat);
        self.lng = Some(position.lng);
    }
}

pub type SharedLocationFields = Arc<RwLock<LocationFields>>;

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex as StdMutex};

    use super::*;
    use crate::tests::MockLocation;

    type Seen = Arc<StdMutex<Vec<LivePosition>>>;

    fn recorder() -> (Seen, impl Fn(LivePosition) + Send + Sync + 'static) {
        let seen = Seen::default();
        let sink = seen.clone();
        (seen, move |pos| sink.lock().unwrap().push(pos))
    }

    #[tokio::test]
    async fn test_start_forwards_updates() {
        let source = MockLocation::default();
        let watcher = PositionWatcher::new(source.clone());
        let (seen, on_update) = recorder();

        let state = watcher.start(on_update, |_| {}).await;
        assert_eq!(state, WatchState::Watching);
        assert_eq!(source.last_options(), Some(WATCH_OPTIONS));

        source.emit_position(1.0, 2.0, Some(5.0));
        source.emit_position(3.0, 4.0, None);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!((seen[0].lat, seen[0].lng), (1.0, 2.0));
        assert_eq!((seen[1].lat, seen[1].lng), (3.0, 4.0));
    }

    #[tokio::test]
    async fn test_toggle_twice_returns_to_idle() {
        let source = MockLocation::default();
        let watcher = PositionWatcher::new(source.clone());
        let (seen, on_update) = recorder();

        assert_eq!(watcher.toggle(on_update, |_| {}).await, WatchState::Watching);
        source.emit_position(1.0, 1.0, None);

        let (_, unused) = recorder();
        let state = watcher.toggle(unused, |_| {}).await;
        assert_eq!(state, WatchState::Idle);
        assert_eq!(state.control(), WatchState::Idle.control());
        assert_eq!(source.active_watches(), 0);

        source.emit_position(2.0, 2.0, None);
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_start_while_watching_replaces_subscription() {
        let source = MockLocation::default();
        let watcher = PositionWatcher::new(source.clone());
        let (first, on_first) = recorder();
        let (second, on_second) = recorder();

        watcher.start(on_first, |_| {}).await;
        watcher.start(on_second, |_| {}).await;

        assert_eq!(source.active_watches(), 1);
        assert_eq!(source.total_watches(), 2);

        source.emit_position(5.0, 5.0, None);
        assert!(first.lock().unwrap().is_empty());
        assert_eq!(second.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_denied_is_terminal() {
        let source = MockLocation::denied();
        let watcher = PositionWatcher::new(source.clone());

        let (_, on_update) = recorder();
        assert_eq!(
            watcher.toggle(on_update, |_| {}).await,
            WatchState::Unavailable
        );

        let (_, on_update) = recorder();
        assert_eq!(
            watcher.toggle(on_update, |_| {}).await,
            WatchState::Unavailable
        );
        assert_eq!(source.total_watches(), 0);
    }

    #[tokio::test]
    async fn test_stream_error_marks_unavailable() {
        let source = MockLocation::default();
        let watcher = PositionWatcher::new(source.clone());
        let errors = Arc::new(StdMutex::new(Vec::<String>::new()));
        let sink = errors.clone();

        let (_, on_update) = recorder();
        watcher
            .start(on_update, move |why| sink.lock().unwrap().push(why))
            .await;
        source.emit_error("permission revoked");
        assert_eq!(*errors.lock().unwrap(), vec!["permission revoked".to_string()]);

        let state = watcher.mark_unavailable("permission revoked").await;
        assert_eq!(state, WatchState::Unavailable);
        assert_eq!(source.active_watches(), 0);
        assert_eq!(watcher.stop().await, WatchState::Unavailable);
    }

    #[test]
    fn test_controls_are_distinct() {
        let idle = WatchState::Idle.control();
        let watching = WatchState::Watching.control();
        let unavailable = WatchState::Unavailable.control();
        assert_ne!(idle.label, watching.label);
        assert_ne!(idle.style, watching.style);
        assert_ne!(watching.style, unavailable.style);
        assert_ne!(idle.label, unavailable.label);
    }
}
