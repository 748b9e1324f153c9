use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicU64, Ordering},
};

use anyhow::bail;
use log::{debug, info};
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;

use crate::{
    geocode::{GeocodeClient, Geocoder},
    location::{
        LocationFields, LocationSource, PositionEvent, PositionWatcher, SharedLocationFields,
        WatchControl, WatchState,
    },
    map::{MOUNT_RELAYOUT_DELAY, MapView, MapWidget, ShipmentEvent},
    navbar::{NavBarController, NavBarFrame, NavBarView},
    prelude::*,
    updates::{Notifier, StateUpdateSender},
};

/// Most scroll samples drawn in a single frame, anything queued together is coalesced
const SCROLL_BURST: usize = 32;
const INPUT_QUEUE: usize = 32;

/// (scroll offset, menu height)
type ScrollSample = (f64, f64);

/// A position event tagged with the watch epoch it was produced under
type StampedEvent = (u64, PositionEvent);

/// The platform pieces a [TrackingPage] is assembled from
pub trait PageServices: 'static {
    type Location: LocationSource + 'static;
    type Geocoder: Geocoder + 'static;
    type Map: MapWidget + 'static;
    type NavBar: NavBarView + 'static;
    type Notifier: Notifier + 'static;
    type Updates: StateUpdateSender + 'static;
}

pub struct PageParts<S: PageServices> {
    pub location: S::Location,
    pub geocoder: S::Geocoder,
    pub map: S::Map,
    pub navbar: S::NavBar,
    pub notifier: S::Notifier,
    pub updates: S::Updates,
    /// Location inputs, shared with the scan form
    pub fields: SharedLocationFields,
}

/// A listener registered by [TrackingPage::init]. Disposing (or dropping) it stops exactly that
/// listener.
pub struct Subscription {
    name: &'static str,
    token: CancellationToken,
}

impl Subscription {
    fn new(name: &'static str, token: CancellationToken) -> Self {
        Self { name, token }
    }

    pub fn dispose(&self) {
        if !self.token.is_cancelled() {
            debug!("Disposing {} subscription", self.name);
            self.token.cancel();
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Every listener of a page, disposing `page` tears down the rest along with the event loop
pub struct PageHandles {
    pub scroll: Subscription,
    pub resize: Subscription,
    pub watch: Subscription,
    page: Subscription,
}

impl PageHandles {
    pub fn dispose(&self) {
        self.page.dispose();
    }

    pub fn is_disposed(&self) -> bool {
        self.page.is_disposed()
    }
}

struct PageTokens {
    page: CancellationToken,
    scroll: CancellationToken,
    resize: CancellationToken,
    watch: CancellationToken,
}

/// Viewport events pushed by the host into the page loop
#[derive(Clone)]
pub struct PageInput {
    scroll: mpsc::Sender<ScrollSample>,
    resize: mpsc::Sender<f64>,
}

impl PageInput {
    pub async fn scrolled(&self, y: f64, menu_height: f64) {
        // Closed once the scroll subscription is disposed
        self.scroll.send((y, menu_height)).await.ok();
    }

    pub async fn resized(&self, menu_height: f64) {
        self.resize.send(menu_height).await.ok();
    }
}

struct PageReceivers {
    positions: mpsc::UnboundedReceiver<StampedEvent>,
    scroll: mpsc::Receiver<ScrollSample>,
    resize: mpsc::Receiver<f64>,
}

/// The tracking page: live location, map, and navigation bar wired together around one
/// cooperative event loop.
pub struct TrackingPage<S: PageServices> {
    watcher: PositionWatcher<S::Location>,
    map: Mutex<MapView<S::Map>>,
    navbar: Mutex<NavBarController<S::NavBar>>,
    geocoder: Arc<GeocodeClient<S::Geocoder>>,
    fields: SharedLocationFields,
    notifier: S::Notifier,
    updates: Arc<S::Updates>,
    positions: mpsc::UnboundedSender<StampedEvent>,
    input: PageInput,
    receivers: Mutex<Option<PageReceivers>>,
    /// Set on every start so the first reading gets announced
    first_fix: AtomicBool,
    /// Bumped on every press of the location button, events queued under an older epoch are
    /// dropped by the loop
    watch_epoch: AtomicU64,
    tokens: PageTokens,
}

impl<S: PageServices> TrackingPage<S> {
    /// Mount the map in `container` with `events` and register the page's listeners. The body
    /// padding is applied right away for a bar `menu_height` tall, everything else waits for
    /// [TrackingPage::main_loop].
    pub async fn init(
        parts: PageParts<S>,
        container: &str,
        events: &[ShipmentEvent],
        menu_height: f64,
    ) -> Result<(Arc<Self>, PageHandles)> {
        let mut map = MapView::new(parts.map);
        map.initialize(container, events)
            .await
            .context("Failed to set up the map")?;

        let (ptx, prx) = mpsc::unbounded_channel();
        let (stx, srx) = mpsc::channel(INPUT_QUEUE);
        let (rtx, rrx) = mpsc::channel(INPUT_QUEUE);

        let page_token = CancellationToken::new();
        let handles = PageHandles {
            scroll: Subscription::new("scroll", page_token.child_token()),
            resize: Subscription::new("resize", page_token.child_token()),
            watch: Subscription::new("location watch", page_token.child_token()),
            page: Subscription::new("page", page_token.clone()),
        };

        let tokens = PageTokens {
            page: page_token,
            scroll: handles.scroll.token.clone(),
            resize: handles.resize.token.clone(),
            watch: handles.watch.token.clone(),
        };

        let mut navbar = NavBarController::new(parts.navbar);
        navbar.on_resize(menu_height);

        let page = Self {
            watcher: PositionWatcher::new(parts.location),
            map: Mutex::new(map),
            navbar: Mutex::new(navbar),
            geocoder: Arc::new(GeocodeClient::new(parts.geocoder)),
            fields: parts.fields,
            notifier: parts.notifier,
            updates: Arc::new(parts.updates),
            positions: ptx,
            input: PageInput {
                scroll: stx,
                resize: rtx,
            },
            receivers: Mutex::new(Some(PageReceivers {
                positions: prx,
                scroll: srx,
                resize: rrx,
            })),
            first_fix: AtomicBool::new(false),
            watch_epoch: AtomicU64::new(0),
            tokens,
        };

        info!("Tracking page ready with {} shipment events", events.len());

        Ok((Arc::new(page), handles))
    }

    pub fn input(&self) -> PageInput {
        self.input.clone()
    }

    pub fn fields(&self) -> SharedLocationFields {
        self.fields.clone()
    }

    pub async fn location_fields(&self) -> LocationFields {
        self.fields.read().await.clone()
    }

    pub async fn watch_control(&self) -> WatchControl {
        self.watcher.state().await.control()
    }

    pub async fn navbar_frame(&self) -> NavBarFrame {
        self.navbar.lock().await.frame()
    }

    /// The location button was pressed
    pub async fn toggle_location(&self) -> WatchControl {
        if self.tokens.watch.is_cancelled() {
            return self.watch_control().await;
        }

        self.first_fix.store(true, Ordering::Release);
        let epoch = self.watch_epoch.fetch_add(1, Ordering::AcqRel) + 1;

        let updates = self.positions.clone();
        let errors = self.positions.clone();
        let state = self
            .watcher
            .toggle(
                move |position| {
                    updates.send((epoch, PositionEvent::Update(position))).ok();
                },
                move |why| {
                    errors.send((epoch, PositionEvent::Error(why))).ok();
                },
            )
            .await;

        self.updates.send_update();
        state.control()
    }

    /// The mobile menu button was pressed, returns whether the menu is now open
    pub async fn toggle_menu(&self) -> bool {
        self.navbar.lock().await.toggle_menu()
    }

    fn spawn_label_lookup(&self, lat: f64, lng: f64) {
        let geocoder = self.geocoder.clone();
        let fields = self.fields.clone();
        let updates = self.updates.clone();
        // Not tied to the watch, a label arriving after stop is still taken
        tokio::spawn(async move {
            if geocoder.fill_label(&fields, lat, lng).await {
                updates.send_update();
            }
        });
    }

    async fn handle_position_event(&self, epoch: u64, event: PositionEvent) {
        if epoch != self.watch_epoch.load(Ordering::Acquire) {
            debug!("Dropping location event from an earlier watch");
            return;
        }

        match event {
            PositionEvent::Update(position) => {
                if self.watcher.state().await != WatchState::Watching {
                    return;
                }

                self.fields.write().await.set_position(&position);
                self.map.lock().await.update_live_position(&position);

                if self.first_fix.swap(false, Ordering::AcqRel) {
                    self.notifier.notify(&format!(
                        "Coordenadas: {:.5}, {:.5}",
                        position.lat, position.lng
                    ));
                }

                self.spawn_label_lookup(position.lat, position.lng);
                self.updates.send_update();
            }
            PositionEvent::Error(why) => {
                self.watcher.mark_unavailable(&why).await;
                self.updates.send_update();
            }
        }
    }

    /// Main loop of the page, runs until the page handles are disposed.
    pub async fn main_loop(&self) -> Result {
        let Some(mut rx) = self.receivers.lock().await.take() else {
            bail!("Page loop is already running");
        };

        let relayout = tokio::time::sleep(MOUNT_RELAYOUT_DELAY);
        tokio::pin!(relayout);
        let mut relayout_pending = true;

        let mut watch_live = true;
        let mut scroll_live = true;
        let mut resize_live = true;
        let mut scroll_buf = Vec::with_capacity(SCROLL_BURST);

        loop {
            tokio::select! {
                biased;

                _ = self.tokens.page.cancelled() => {
                    break;
                }

                _ = self.tokens.watch.cancelled(), if watch_live => {
                    watch_live = false;
                    rx.positions.close();
                    self.watcher.stop().await;
                    self.updates.send_update();
                }

                _ = self.tokens.scroll.cancelled(), if scroll_live => {
                    scroll_live = false;
                    rx.scroll.close();
                }

                _ = self.tokens.resize.cancelled(), if resize_live => {
                    resize_live = false;
                    rx.resize.close();
                }

                _ = &mut relayout, if relayout_pending => {
                    relayout_pending = false;
                    self.map.lock().await.relayout();
                }

                Some((epoch, event)) = rx.positions.recv(), if watch_live => {
                    self.handle_position_event(epoch, event).await;
                }

                n = rx.scroll.recv_many(&mut scroll_buf, SCROLL_BURST), if scroll_live => {
                    if n == 0 {
                        scroll_live = false;
                    } else {
                        self.navbar.lock().await.on_scroll_burst(&scroll_buf);
                        scroll_buf.clear();
                    }
                }

                Some(menu_height) = rx.resize.recv(), if resize_live => {
                    self.map.lock().await.relayout();
                    self.navbar.lock().await.on_resize(menu_height);
                }
            }
        }

        self.watcher.stop().await;
        info!("Tracking page torn down");

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::task::{JoinHandle, yield_now};

    use super::*;
    use crate::{
        map::{LIVE_ZOOM_FLOOR, MapCommand},
        tests::{
            CountingSender, MockGeocoder, MockLocation, MockMap, MockNavBar, MockNotifier,
            MockServices,
        },
    };

    type TestPage = TrackingPage<MockServices>;

    const MENU_HEIGHT: f64 = 72.0;

    struct Harness {
        page: Arc<TestPage>,
        handles: PageHandles,
        location: MockLocation,
        map: MockMap,
        navbar: MockNavBar,
        notifier: MockNotifier,
        updates: CountingSender,
        fields: SharedLocationFields,
    }

    async fn settle() {
        for _ in 0..20 {
            yield_now().await;
        }
    }

    impl Harness {
        async fn new(geocoder: MockGeocoder, events: &[ShipmentEvent]) -> Self {
            tokio::time::pause();
            let location = MockLocation::default();
            let map = MockMap::default();
            let navbar = MockNavBar::default();
            let notifier = MockNotifier::default();
            let updates = CountingSender::default();
            let fields = SharedLocationFields::default();

            let parts = PageParts::<MockServices> {
                location: location.clone(),
                geocoder,
                map: map.clone(),
                navbar: navbar.clone(),
                notifier: notifier.clone(),
                updates: updates.clone(),
                fields: fields.clone(),
            };

            let (page, handles) = TestPage::init(parts, "map-seguimiento", events, MENU_HEIGHT)
                .await
                .expect("Page should init");

            Self {
                page,
                handles,
                location,
                map,
                navbar,
                notifier,
                updates,
                fields,
            }
        }

        fn start(&self) -> JoinHandle<Result> {
            let page = self.page.clone();
            tokio::spawn(async move { page.main_loop().await })
        }
    }

    #[tokio::test]
    async fn test_position_flow() {
        let h = Harness::new(MockGeocoder::answering("Av. Libertador 1234"), &[]).await;
        let _loop = h.start();

        let control = h.page.toggle_location().await;
        assert_eq!(control, WatchState::Watching.control());

        h.location.emit_position(-33.44, -70.65, Some(8.0));
        settle().await;
        h.location.emit_position(-33.45, -70.66, Some(10.0));
        settle().await;

        let fields = h.fields.read().await.clone();
        assert_eq!(fields.lat, Some(-33.45));
        assert_eq!(fields.lng, Some(-70.66));
        assert_eq!(fields.label.as_deref(), Some("Av. Libertador 1234"));

        assert_eq!(h.map.marker_count(), 1);
        assert_eq!(h.map.circle_count(), 1);
        assert_eq!(h.map.zoom_level(), Some(LIVE_ZOOM_FLOOR));

        assert_eq!(
            h.notifier.messages(),
            vec!["Coordenadas: -33.44000, -70.65000"]
        );
        assert!(h.updates.count() > 0);
    }

    #[tokio::test]
    async fn test_toggle_off_stops_updates() {
        let h = Harness::new(MockGeocoder::failing(), &[]).await;
        let _loop = h.start();

        h.page.toggle_location().await;
        h.location.emit_position(1.0, 1.0, None);
        settle().await;

        let control = h.page.toggle_location().await;
        assert_eq!(control, WatchState::Idle.control());
        assert_eq!(h.location.active_watches(), 0);

        h.location.emit_position(2.0, 2.0, None);
        settle().await;
        assert_eq!(h.fields.read().await.lat, Some(1.0));
        assert_eq!(h.fields.read().await.label, None);
    }

    #[tokio::test]
    async fn test_each_start_announces_first_fix() {
        let h = Harness::new(MockGeocoder::failing(), &[]).await;
        let _loop = h.start();

        h.page.toggle_location().await;
        h.location.emit_position(1.0, 2.0, None);
        h.location.emit_position(1.5, 2.5, None);
        settle().await;
        h.page.toggle_location().await;
        h.page.toggle_location().await;
        h.location.emit_position(3.0, 4.0, None);
        settle().await;

        assert_eq!(
            h.notifier.messages(),
            vec![
                "Coordenadas: 1.00000, 2.00000",
                "Coordenadas: 3.00000, 4.00000"
            ]
        );
    }

    #[tokio::test]
    async fn test_stream_error_is_terminal() {
        let h = Harness::new(MockGeocoder::failing(), &[]).await;
        let _loop = h.start();

        h.page.toggle_location().await;
        h.location.emit_error("denied");
        settle().await;

        assert_eq!(
            h.page.watch_control().await,
            WatchState::Unavailable.control()
        );
        assert_eq!(h.location.active_watches(), 0);
        assert_eq!(
            h.page.toggle_location().await,
            WatchState::Unavailable.control()
        );
        assert_eq!(h.location.total_watches(), 1);
    }

    #[tokio::test]
    async fn test_late_label_overtakes() {
        let geocoder = MockGeocoder::scripted(vec![
            (Duration::from_millis(300), "Primero"),
            (Duration::from_millis(100), "Segundo"),
        ]);
        let h = Harness::new(geocoder, &[]).await;
        let _loop = h.start();

        h.page.toggle_location().await;
        h.location.emit_position(1.0, 1.0, None);
        settle().await;
        h.location.emit_position(2.0, 2.0, None);
        settle().await;

        // Stopping doesn't cancel lookups already running
        h.page.toggle_location().await;

        tokio::time::sleep(Duration::from_millis(150)).await;
        settle().await;
        assert_eq!(h.fields.read().await.label.as_deref(), Some("Segundo"));

        tokio::time::sleep(Duration::from_millis(200)).await;
        settle().await;
        assert_eq!(h.fields.read().await.label.as_deref(), Some("Primero"));
    }

    #[tokio::test]
    async fn test_relayout_after_mount_and_resize() {
        let h = Harness::new(MockGeocoder::failing(), &[]).await;
        let _loop = h.start();
        settle().await;
        assert_eq!(h.map.invalidations(), 0);

        tokio::time::sleep(MOUNT_RELAYOUT_DELAY + Duration::from_millis(10)).await;
        settle().await;
        assert_eq!(h.map.invalidations(), 1);

        h.page.input().resized(64.0).await;
        settle().await;
        assert_eq!(h.map.invalidations(), 2);
        assert_eq!(h.navbar.frames().last().map(|f| f.body_padding), Some(64.0));
    }

    #[tokio::test]
    async fn test_scroll_burst_coalesced() {
        let h = Harness::new(MockGeocoder::failing(), &[]).await;
        let input = h.page.input();
        input.scrolled(10.0, 60.0).await;
        input.scrolled(30.0, 60.0).await;
        input.scrolled(90.0, 60.0).await;

        let _loop = h.start();
        settle().await;

        let frames = h.navbar.frames();
        assert_eq!(frames.len(), 2);
        assert!(frames[1].shrink);
        assert!(frames[1].hidden);
        assert_eq!(h.page.navbar_frame().await, frames[1]);
    }

    #[tokio::test]
    async fn test_disposing_watch_subscription() {
        let h = Harness::new(MockGeocoder::failing(), &[]).await;
        let _loop = h.start();

        h.page.toggle_location().await;
        assert_eq!(h.location.active_watches(), 1);

        h.handles.watch.dispose();
        settle().await;
        assert_eq!(h.location.active_watches(), 0);
        assert_eq!(h.page.watch_control().await, WatchState::Idle.control());

        // Location control no longer responds
        h.page.toggle_location().await;
        assert_eq!(h.location.total_watches(), 1);

        // Other listeners keep working
        h.page.input().scrolled(20.0, 60.0).await;
        settle().await;
        assert_eq!(h.navbar.frames().len(), 2);
    }

    #[tokio::test]
    async fn test_disposing_scroll_subscription() {
        let h = Harness::new(MockGeocoder::failing(), &[]).await;
        let _loop = h.start();

        h.handles.scroll.dispose();
        settle().await;
        h.page.input().scrolled(20.0, 60.0).await;
        settle().await;
        assert_eq!(h.navbar.frames().len(), 1);
    }

    #[tokio::test]
    async fn test_dispose_page_ends_loop() {
        let h = Harness::new(MockGeocoder::failing(), &[]).await;
        let main = h.start();

        h.page.toggle_location().await;
        h.handles.dispose();

        main.await.expect("Loop panicked").expect("Loop failed");
        assert!(h.handles.watch.is_disposed());
        assert!(h.handles.scroll.is_disposed());
        assert_eq!(h.location.active_watches(), 0);
    }

    #[tokio::test]
    async fn test_loop_runs_once() {
        let h = Harness::new(MockGeocoder::failing(), &[]).await;
        let _loop = h.start();
        settle().await;
        assert!(h.page.main_loop().await.is_err());
    }

    #[tokio::test]
    async fn test_events_drawn_on_init() {
        let events = [
            ShipmentEvent {
                lat: -33.4,
                lng: -70.6,
                label: Some("En bodega".to_string()),
            },
            ShipmentEvent {
                lat: -33.0,
                lng: -71.6,
                label: None,
            },
        ];
        let h = Harness::new(MockGeocoder::failing(), &events).await;
        assert_eq!(h.map.marker_count(), 2);
        assert!(
            h.map
                .calls()
                .iter()
                .any(|c| matches!(c, MapCommand::FitBounds { .. }))
        );
    }

    #[tokio::test]
    async fn test_body_padding_applied_on_init() {
        let h = Harness::new(MockGeocoder::failing(), &[]).await;

        assert_eq!(
            h.navbar.frames(),
            vec![NavBarFrame {
                shrink: false,
                hidden: false,
                body_padding: MENU_HEIGHT,
            }]
        );
        assert_eq!(h.page.navbar_frame().await.body_padding, MENU_HEIGHT);
    }

    #[tokio::test]
    async fn test_queued_position_from_previous_watch_dropped() {
        let h = Harness::new(MockGeocoder::answering("Antigua"), &[]).await;

        h.page.toggle_location().await;
        h.location.emit_position(9.0, 9.0, None);
        h.page.toggle_location().await;
        h.page.toggle_location().await;

        let _loop = h.start();
        settle().await;

        assert_eq!(h.fields.read().await.clone(), LocationFields::default());
        assert!(h.notifier.messages().is_empty());
        assert_eq!(h.map.marker_count(), 0);

        // The first reading of the new watch is still announced
        h.location.emit_position(1.0, 2.0, None);
        settle().await;
        assert_eq!(h.fields.read().await.lat, Some(1.0));
        assert_eq!(h.notifier.messages(), vec!["Coordenadas: 1.00000, 2.00000"]);
    }

    #[tokio::test]
    async fn test_queued_error_from_previous_watch_dropped() {
        let h = Harness::new(MockGeocoder::failing(), &[]).await;

        h.page.toggle_location().await;
        h.location.emit_error("old subscription error");
        h.page.toggle_location().await;
        h.page.toggle_location().await;

        let _loop = h.start();
        settle().await;

        assert_eq!(h.page.watch_control().await, WatchState::Watching.control());
        assert_eq!(h.location.active_watches(), 1);
    }
}
