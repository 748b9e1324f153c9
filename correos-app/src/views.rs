use std::{
    marker::PhantomData,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};

use correos_logic::{
    Alert, Bounds, LatLng, LayerId, MapCommand, MapWidget, NavBarFrame, NavBarView, Notifier,
    ScanFormView, StateUpdateSender, prelude::*,
};
use log::error;
use serde::{Deserialize, Serialize};
use tauri::AppHandle;
use tauri_plugin_notification::NotificationExt;
use tauri_specta::Event;

/// The location fields or location button changed
#[derive(Serialize, Deserialize, Clone, Default, Debug, specta::Type, tauri_specta::Event)]
pub struct PageStateUpdate;

/// A command for the map widget running in the webview
#[derive(Serialize, Deserialize, Clone, Debug, specta::Type, tauri_specta::Event)]
pub struct MapUpdate(MapCommand);

/// New look for the navigation bar
#[derive(Serialize, Deserialize, Clone, Debug, specta::Type, tauri_specta::Event)]
pub struct NavBarUpdate(NavBarFrame);

/// The mobile menu was opened (true) or closed (false)
#[derive(Serialize, Deserialize, Clone, Debug, specta::Type, tauri_specta::Event)]
pub struct MenuToggled(bool);

/// Message to render in the scan result area
#[derive(Serialize, Deserialize, Clone, Debug, specta::Type, tauri_specta::Event)]
pub struct ScanAlert(Alert);

/// The package codes input should be emptied
#[derive(Serialize, Deserialize, Clone, Default, Debug, specta::Type, tauri_specta::Event)]
pub struct ClearScanCodes;

fn emit<E: Event + Serialize + Clone>(app: &AppHandle, event: E) {
    if let Err(why) = event.emit(app) {
        error!("Error sending event to UI: {why:?}");
    }
}

pub struct TauriStateUpdateSender<E: Clone + Default + Event + Serialize>(
    AppHandle,
    PhantomData<E>,
);

impl<E: Serialize + Clone + Default + Event> TauriStateUpdateSender<E> {
    pub fn new(app: &AppHandle) -> Self {
        Self(app.clone(), PhantomData)
    }
}

impl<E: Serialize + Clone + Default + Event + Send + Sync> StateUpdateSender for TauriStateUpdateSender<E> {
    fn send_update(&self) {
        emit(&self.0, E::default());
    }
}

/// Shows toasts as system notifications
pub struct TauriNotifier(AppHandle);

impl TauriNotifier {
    pub fn new(app: &AppHandle) -> Self {
        Self(app.clone())
    }
}

impl Notifier for TauriNotifier {
    fn notify(&self, message: &str) {
        if let Err(why) = self
            .0
            .notification()
            .builder()
            .title("Correos")
            .body(message)
            .show()
        {
            error!("Failed to show notification: {why:?}");
        }
    }
}

/// Last zoom level reported by the webview map, stored as f64 bits. NaN until the webview
/// reports one.
#[derive(Clone)]
pub struct ZoomCell(Arc<AtomicU64>);

impl Default for ZoomCell {
    fn default() -> Self {
        Self(Arc::new(AtomicU64::new(f64::NAN.to_bits())))
    }
}

impl ZoomCell {
    pub fn get(&self) -> Option<f64> {
        Some(f64::from_bits(self.0.load(Ordering::Acquire))).filter(|z| z.is_finite())
    }

    pub fn set(&self, zoom: f64) {
        self.0.store(zoom.to_bits(), Ordering::Release);
    }

    /// The webview is picking a new zoom on its own, it'll report it back
    pub fn forget(&self) {
        self.set(f64::NAN);
    }
}

/// Whether Leaflet is present in the webview. Starts from what the page reported when it
/// opened, a page reload brings it back to absent.
pub struct MapLibrary(AtomicBool);

impl MapLibrary {
    pub fn reported(present: bool) -> Self {
        Self(AtomicBool::new(present))
    }

    pub fn is_present(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// The webview was asked to load the library, it queues commands until it has
    fn requested(&self) {
        self.0.store(true, Ordering::Release);
    }
}

/// Leaflet map living in the webview, driven through [MapUpdate] events. The webview queues
/// commands until the library has finished loading.
pub struct WebviewMap {
    app: AppHandle,
    zoom: ZoomCell,
    library: MapLibrary,
}

impl WebviewMap {
    pub fn new(app: &AppHandle, zoom: ZoomCell, library: MapLibrary) -> Self {
        Self {
            app: app.clone(),
            zoom,
            library,
        }
    }

    fn send(&self, command: MapCommand) {
        emit(&self.app, MapUpdate(command));
    }
}

impl MapWidget for WebviewMap {
    fn library_loaded(&self) -> bool {
        self.library.is_present()
    }

    async fn load_library(&self, url: &str) -> Result {
        self.send(MapCommand::LoadLibrary {
            url: url.to_string(),
        });
        self.library.requested();
        Ok(())
    }

    fn mount(&self, container: &str) -> Result {
        MapUpdate(MapCommand::Mount {
            container: container.to_string(),
        })
        .emit(&self.app)
        .context("Failed to reach the webview")
    }

    fn add_tile_layer(&self, id: LayerId, url_template: &str, max_zoom: u8) {
        self.send(MapCommand::AddTileLayer {
            id,
            url_template: url_template.to_string(),
            max_zoom,
        });
    }

    fn add_marker(&self, id: LayerId, at: LatLng, popup: Option<&str>) {
        self.send(MapCommand::AddMarker {
            id,
            at,
            popup: popup.map(str::to_string),
        });
    }

    fn add_circle(&self, id: LayerId, at: LatLng, radius_meters: f64) {
        self.send(MapCommand::AddCircle {
            id,
            at,
            radius_meters,
        });
    }

    fn move_layer(&self, id: LayerId, to: LatLng) {
        self.send(MapCommand::MoveLayer { id, to });
    }

    fn set_circle_radius(&self, id: LayerId, radius_meters: f64) {
        self.send(MapCommand::SetCircleRadius { id, radius_meters });
    }

    fn fit_bounds(&self, bounds: Bounds, padding_px: u32) {
        self.zoom.forget();
        self.send(MapCommand::FitBounds { bounds, padding_px });
    }

    fn set_view(&self, center: LatLng, zoom: f64) {
        self.zoom.set(zoom);
        self.send(MapCommand::SetView { center, zoom });
    }

    fn zoom(&self) -> Option<f64> {
        self.zoom.get()
    }

    fn invalidate_size(&self) {
        self.send(MapCommand::InvalidateSize);
    }
}

pub struct WebviewNavBar(AppHandle);

impl WebviewNavBar {
    pub fn new(app: &AppHandle) -> Self {
        Self(app.clone())
    }
}

impl NavBarView for WebviewNavBar {
    fn apply(&self, frame: &NavBarFrame) {
        emit(&self.0, NavBarUpdate(*frame));
    }

    fn set_menu_open(&self, open: bool) {
        emit(&self.0, MenuToggled(open));
    }
}

pub struct WebviewScanForm(AppHandle);

impl WebviewScanForm {
    pub fn new(app: &AppHandle) -> Self {
        Self(app.clone())
    }
}

impl ScanFormView for WebviewScanForm {
    fn show_alert(&self, alert: Alert) {
        emit(&self.0, ScanAlert(alert));
    }

    fn clear_codes(&self) {
        emit(&self.0, ClearScanCodes);
    }
}
