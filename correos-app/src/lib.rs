mod location;
mod state;
mod views;

use correos_logic::{LocationFields, ScanForm, ScanOutcome, WatchControl};
use log::LevelFilter;
use tauri::{AppHandle, Manager, State};
use tauri_specta::{ErrorHandlingMode, collect_commands, collect_events};
use tokio::sync::RwLock;

use std::result::Result as StdResult;

use crate::{
    state::{AppContext, AppState, AppStateHandle, TrackingPageInfo},
    views::{ClearScanCodes, MapUpdate, MenuToggled, NavBarUpdate, PageStateUpdate, ScanAlert},
};

type Result<T = (), E = String> = StdResult<T, E>;

// == TRACKING PAGE COMMANDS ==

#[tauri::command]
#[specta::specta]
/// Open the tracking page described by `page`. Map drawing arrives as [MapUpdate] events, the
/// initial body padding as a [NavBarUpdate].
async fn open_tracking(
    page: TrackingPageInfo,
    app: AppHandle,
    context: State<'_, AppContext>,
    state: State<'_, AppStateHandle>,
) -> Result {
    let fields = context.fields.clone();
    let mut state = state.write().await;
    state.open_tracking(app, fields, page).await
}

#[tauri::command]
#[specta::specta]
/// Close the tracking page, stopping the location watch and every listener
async fn close_tracking(state: State<'_, AppStateHandle>) -> Result {
    state.write().await.close_tracking();
    Ok(())
}

#[tauri::command]
#[specta::specta]
/// The location button was pressed, returns how the button should now look
async fn toggle_location(state: State<'_, AppStateHandle>) -> Result<WatchControl> {
    let page = state.read().await.get_page()?;
    Ok(page.toggle_location().await)
}

#[tauri::command]
#[specta::specta]
/// Current look of the location button, call after receiving [PageStateUpdate]
async fn get_watch_control(state: State<'_, AppStateHandle>) -> Result<WatchControl> {
    let page = state.read().await.get_page()?;
    Ok(page.watch_control().await)
}

#[tauri::command]
#[specta::specta]
/// Current latitude, longitude and location label, call after receiving [PageStateUpdate]
async fn get_location_fields(context: State<'_, AppContext>) -> Result<LocationFields> {
    Ok(context.fields.read().await.clone())
}

#[tauri::command]
#[specta::specta]
/// The page scrolled to `y`, `menu_height` is the navigation bar's current height
async fn report_scroll(y: f64, menu_height: f64, state: State<'_, AppStateHandle>) -> Result {
    let input = state.read().await.get_page()?.input();
    input.scrolled(y, menu_height).await;
    Ok(())
}

#[tauri::command]
#[specta::specta]
/// The viewport was resized
async fn report_resize(menu_height: f64, state: State<'_, AppStateHandle>) -> Result {
    let input = state.read().await.get_page()?.input();
    input.resized(menu_height).await;
    Ok(())
}

#[tauri::command]
#[specta::specta]
/// The map's zoom level changed (user zoom or bounds fitting)
async fn report_map_zoom(zoom: f64, state: State<'_, AppStateHandle>) -> Result {
    state.read().await.get_session()?.zoom.set(zoom);
    Ok(())
}

#[tauri::command]
#[specta::specta]
/// The mobile menu button was pressed, returns whether the menu is now open
async fn toggle_menu(state: State<'_, AppStateHandle>) -> Result<bool> {
    let page = state.read().await.get_page()?;
    Ok(page.toggle_menu().await)
}

// == SCAN FORM COMMANDS ==

#[tauri::command]
#[specta::specta]
/// Submit the scan form. The message to show arrives as a [ScanAlert] event, the outcome is also
/// returned.
async fn submit_scan(form: ScanForm, context: State<'_, AppContext>) -> Result<ScanOutcome> {
    Ok(context.scan.submit(&form).await)
}

pub fn mk_specta() -> tauri_specta::Builder {
    tauri_specta::Builder::<tauri::Wry>::new()
        .error_handling(ErrorHandlingMode::Throw)
        .commands(collect_commands![
            open_tracking,
            close_tracking,
            toggle_location,
            get_watch_control,
            get_location_fields,
            report_scroll,
            report_resize,
            report_map_zoom,
            toggle_menu,
            submit_scan,
        ])
        .events(collect_events![
            PageStateUpdate,
            MapUpdate,
            NavBarUpdate,
            MenuToggled,
            ScanAlert,
            ClearScanCodes
        ])
}

#[cfg_attr(mobile, tauri::mobile_entry_point)]
pub fn run() {
    let state = RwLock::new(AppState::Idle);

    let builder = mk_specta();

    tauri::Builder::default()
        .plugin(tauri_plugin_dialog::init())
        .plugin(tauri_plugin_notification::init())
        .plugin(
            tauri_plugin_log::Builder::new()
                .level(LevelFilter::Debug)
                .build(),
        )
        .plugin(tauri_plugin_geolocation::init())
        .invoke_handler(builder.invoke_handler())
        .manage(state)
        .setup(move |app| {
            builder.mount_events(app);

            let context = AppContext::new(app.handle())?;
            app.manage(context);

            Ok(())
        })
        .run(tauri::generate_context!())
        .expect("error while running tauri application");
}
