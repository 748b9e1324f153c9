use std::sync::Arc;

use anyhow::Context;
use correos_logic::{
    PageHandles, PageParts, PageServices, ScanFormController, SharedLocationFields,
    ShipmentEvent, TrackingPage,
};
use correos_transport::{HttpScanSubmitter, NominatimGeocoder};
use log::{error, info, warn};
use serde::Deserialize;
use tauri::{AppHandle, Manager};
use tauri_plugin_dialog::{DialogExt, MessageDialogKind};
use tokio::sync::RwLock;

use crate::{
    Result,
    location::TauriLocation,
    views::{
        MapLibrary, PageStateUpdate, TauriNotifier, TauriStateUpdateSender, WebviewMap,
        WebviewNavBar, WebviewScanForm, ZoomCell,
    },
};

pub struct TauriServices;

impl PageServices for TauriServices {
    type Location = TauriLocation;
    type Geocoder = NominatimGeocoder;
    type Map = WebviewMap;
    type NavBar = WebviewNavBar;
    type Notifier = TauriNotifier;
    type Updates = TauriStateUpdateSender<PageStateUpdate>;
}

pub type Page = TrackingPage<TauriServices>;
pub type ScanController = ScanFormController<HttpScanSubmitter, WebviewScanForm, TauriNotifier>;

pub struct TrackingSession {
    pub page: Arc<Page>,
    pub handles: PageHandles,
    pub zoom: ZoomCell,
}

pub enum AppState {
    /// No tracking page is open
    Idle,
    Tracking(TrackingSession),
}

pub type AppStateHandle = RwLock<AppState>;

/// What the webview knows about the page being opened
#[derive(Debug, Clone, Deserialize, specta::Type)]
pub struct TrackingPageInfo {
    /// Id of the map element
    pub container: String,
    /// JSON array from the map element's `data-events` attribute
    pub events_json: String,
    /// Height of the navigation bar
    pub menu_height: f64,
    /// Whether Leaflet is already loaded in the page
    pub map_library_loaded: bool,
}

/// Lives for the whole app, shared by every page
pub struct AppContext {
    pub fields: SharedLocationFields,
    pub scan: ScanController,
}

impl AppContext {
    pub fn new(app: &AppHandle) -> anyhow::Result<Self> {
        let fields = SharedLocationFields::default();
        let submitter = HttpScanSubmitter::for_configured_server()?;
        let scan = ScanController::new(
            submitter,
            WebviewScanForm::new(app),
            TauriNotifier::new(app),
            fields.clone(),
        );
        Ok(Self { fields, scan })
    }
}

fn error_dialog(app: &AppHandle, msg: &str) {
    app.dialog()
        .message(msg)
        .kind(MessageDialogKind::Error)
        .show(|_| {});
}

impl AppState {
    pub fn get_page(&self) -> Result<Arc<Page>> {
        match self {
            AppState::Tracking(session) => Ok(session.page.clone()),
            AppState::Idle => Err("No tracking page open".to_string()),
        }
    }

    pub fn get_session(&self) -> Result<&TrackingSession> {
        match self {
            AppState::Tracking(session) => Ok(session),
            AppState::Idle => Err("No tracking page open".to_string()),
        }
    }

    /// Open the tracking page, replacing any page already open
    pub async fn open_tracking(
        &mut self,
        app: AppHandle,
        fields: SharedLocationFields,
        info: TrackingPageInfo,
    ) -> Result {
        if matches!(self, AppState::Tracking(_)) {
            self.close_tracking();
        }

        let events = ShipmentEvent::parse_list(&info.events_json);
        let zoom = ZoomCell::default();

        let parts = NominatimGeocoder::openstreetmap().map(|geocoder| PageParts::<TauriServices> {
            location: TauriLocation::new(app.clone()),
            geocoder,
            map: WebviewMap::new(
                &app,
                zoom.clone(),
                MapLibrary::reported(info.map_library_loaded),
            ),
            navbar: WebviewNavBar::new(&app),
            notifier: TauriNotifier::new(&app),
            updates: TauriStateUpdateSender::new(&app),
            fields,
        });

        let res = match parts {
            Ok(parts) => Page::init(parts, &info.container, &events, info.menu_height).await,
            Err(why) => Err(why),
        }
        .context("Couldn't open the tracking page");

        match res {
            Ok((page, handles)) => {
                Self::page_loop(app, page.clone());
                *self = AppState::Tracking(TrackingSession {
                    page,
                    handles,
                    zoom,
                });
                Ok(())
            }
            Err(why) => {
                error!("{why:?}");
                error_dialog(&app, &format!("{why:#}"));
                Err(why.to_string())
            }
        }
    }

    fn page_loop(app: AppHandle, page: Arc<Page>) {
        tauri::async_runtime::spawn(async move {
            match page.main_loop().await {
                Ok(()) => info!("Tracking page closed"),
                Err(why) => {
                    error!("Tracking page error: {why:?}");
                    let state_handle = app.state::<AppStateHandle>();
                    state_handle.write().await.close_tracking();
                }
            }
        });
    }

    pub fn close_tracking(&mut self) {
        if let AppState::Tracking(session) = self {
            session.handles.dispose();
        } else {
            warn!("No tracking page to close");
        }
        *self = AppState::Idle;
    }
}
