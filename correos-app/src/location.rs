use chrono::{DateTime, Utc};
use correos_logic::{
    LivePosition, LocationSource, PositionCallback, PositionEvent, WatchId, WatchOptions,
    prelude::*,
};
use tauri::AppHandle;
use tauri_plugin_geolocation::{GeolocationExt, PositionOptions, WatchEvent};

pub struct TauriLocation(AppHandle);

impl TauriLocation {
    pub fn new(app: AppHandle) -> Self {
        Self(app)
    }
}

fn to_position_event(event: WatchEvent) -> PositionEvent {
    match event {
        WatchEvent::Position(pos) => {
            let coords = pos.coords;
            let observed_at = i64::try_from(pos.timestamp)
                .ok()
                .and_then(DateTime::from_timestamp_millis)
                .unwrap_or_else(Utc::now);
            PositionEvent::Update(LivePosition {
                lat: coords.latitude,
                lng: coords.longitude,
                accuracy_meters: Some(coords.accuracy),
                observed_at,
            })
        }
        WatchEvent::Error(why) => PositionEvent::Error(why),
    }
}

impl LocationSource for TauriLocation {
    fn watch(&self, options: WatchOptions, callback: PositionCallback) -> Result<WatchId> {
        let options = PositionOptions {
            enable_high_accuracy: options.enable_high_accuracy,
            timeout: options.timeout_ms,
            maximum_age: options.maximum_age_ms,
        };
        self.0
            .geolocation()
            .watch_position(options, move |event| callback(to_position_event(event)))
            .context("Geolocation is not available")
    }

    fn clear_watch(&self, id: WatchId) -> Result {
        self.0
            .geolocation()
            .clear_watch(id)
            .context("Failed to clear location watch")
    }
}
