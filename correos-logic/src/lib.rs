mod geocode;
mod location;
mod map;
mod navbar;
mod page;
mod scan;
mod updates;

pub use geocode::{GeocodeClient, Geocoder};
pub use location::{
    LivePosition, LocationFields, LocationSource, PositionCallback, PositionEvent,
    PositionWatcher, SharedLocationFields, UtcDT, WATCH_OPTIONS, WatchControl, WatchId,
    WatchOptions, WatchState,
};
pub use map::{
    Bounds, DEFAULT_ACCURACY_METERS, FALLBACK_CENTER, FALLBACK_ZOOM, LIVE_ZOOM_FLOOR, LatLng,
    LayerId, MAP_LIBRARY_URL, MapCommand, MapView, MapWidget, ShipmentEvent,
};
pub use navbar::{NavBarController, NavBarFrame, NavBarView};
pub use page::{PageHandles, PageInput, PageParts, PageServices, Subscription, TrackingPage};
pub use scan::{
    Alert, AlertKind, Eta, NETWORK_ERROR_MESSAGE, ScanForm, ScanFormController, ScanFormView,
    ScanOutcome, ScanResult, ScanSubmission, ScanSubmitter, VALIDATION_MESSAGE,
};
pub use updates::{Notifier, StateUpdateSender};

pub mod prelude {
    use anyhow::Error as AnyhowError;
    use std::result::Result as StdResult;
    pub type Result<T = (), E = AnyhowError> = StdResult<T, E>;
    pub use anyhow::Context;
}
