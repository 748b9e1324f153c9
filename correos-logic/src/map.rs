use std::time::Duration;

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{location::LivePosition, prelude::*};

/// Handle for a marker, circle or tile layer placed on the map
pub type LayerId = Uuid;

pub const MAP_LIBRARY_URL: &str = "https://unpkg.com/leaflet@1.9.4/dist/leaflet.js";
pub const TILE_URL_TEMPLATE: &str = "https://{s}.tile.openstreetmap.org/{z}/{x}/{y}.png";
pub const TILE_MAX_ZOOM: u8 = 18;

/// Where the map sits when there's nothing to show (Santiago)
pub const FALLBACK_CENTER: LatLng = LatLng {
    lat: -33.45,
    lng: -70.6667,
};
pub const FALLBACK_ZOOM: f64 = 11.0;

/// Padding in pixels kept around the event markers when fitting the view
pub const FIT_PADDING_PX: u32 = 20;

/// Following the live position never zooms out past this
pub const LIVE_ZOOM_FLOOR: f64 = 16.0;

/// Radius used when the device doesn't report an accuracy
pub const DEFAULT_ACCURACY_METERS: f64 = 20.0;

/// How long after mounting the widget is asked to measure itself again
pub const MOUNT_RELAYOUT_DELAY: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, specta::Type)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

impl LatLng {
    pub const fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }
}

impl From<&LivePosition> for LatLng {
    fn from(p: &LivePosition) -> Self {
        Self::new(p.lat, p.lng)
    }
}

/// A point recorded for a shipment, supplied by the server when the page loads
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, specta::Type)]
pub struct ShipmentEvent {
    pub lat: f64,
    pub lng: f64,
    #[serde(default)]
    pub label: Option<String>,
}

impl ShipmentEvent {
    /// Parse the JSON array carried by the map container. Anything unreadable means no events.
    pub fn parse_list(raw: &str) -> Vec<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return vec![];
        }
        serde_json::from_str(raw).unwrap_or_else(|why| {
            warn!("Ignoring malformed shipment events: {why}");
            vec![]
        })
    }

    pub fn position(&self) -> LatLng {
        LatLng::new(self.lat, self.lng)
    }
}

/// Axis-aligned box in lat/lng space
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, specta::Type)]
pub struct Bounds {
    pub south_west: LatLng,
    pub north_east: LatLng,
}

impl Bounds {
    /// Smallest box covering every point, [None] if there are none
    pub fn from_points(points: impl IntoIterator<Item = LatLng>) -> Option<Self> {
        points.into_iter().fold(None, |acc, p| {
            Some(match acc {
                None => Self {
                    south_west: p,
                    north_east: p,
                },
                Some(b) => Self {
                    south_west: LatLng::new(b.south_west.lat.min(p.lat), b.south_west.lng.min(p.lng)),
                    north_east: LatLng::new(b.north_east.lat.max(p.lat), b.north_east.lng.max(p.lng)),
                },
            })
        })
    }

    pub fn contains(&self, p: LatLng) -> bool {
        (self.south_west.lat..=self.north_east.lat).contains(&p.lat)
            && (self.south_west.lng..=self.north_east.lng).contains(&p.lng)
    }
}

/// Serializable form of every call made on a [MapWidget], used to drive a widget living in
/// another process (a webview) and to record calls in tests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, specta::Type)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum MapCommand {
    LoadLibrary {
        url: String,
    },
    Mount {
        container: String,
    },
    AddTileLayer {
        id: LayerId,
        url_template: String,
        max_zoom: u8,
    },
    AddMarker {
        id: LayerId,
        at: LatLng,
        popup: Option<String>,
    },
    AddCircle {
        id: LayerId,
        at: LatLng,
        radius_meters: f64,
    },
    MoveLayer {
        id: LayerId,
        to: LatLng,
    },
    SetCircleRadius {
        id: LayerId,
        radius_meters: f64,
    },
    FitBounds {
        bounds: Bounds,
        padding_px: u32,
    },
    SetView {
        center: LatLng,
        zoom: f64,
    },
    InvalidateSize,
}

/// The map widget primitives [MapView] draws with
pub trait MapWidget: Send + Sync {
    /// Whether the mapping library is already present
    fn library_loaded(&self) -> bool;
    /// Fetch the mapping library, resolves once it can be used
    fn load_library(&self, url: &str) -> impl Future<Output = Result> + Send;
    /// Create the map inside the given container
    fn mount(&self, container: &str) -> Result;
    fn add_tile_layer(&self, id: LayerId, url_template: &str, max_zoom: u8);
    fn add_marker(&self, id: LayerId, at: LatLng, popup: Option<&str>);
    fn add_circle(&self, id: LayerId, at: LatLng, radius_meters: f64);
    fn move_layer(&self, id: LayerId, to: LatLng);
    fn set_circle_radius(&self, id: LayerId, radius_meters: f64);
    fn fit_bounds(&self, bounds: Bounds, padding_px: u32);
    fn set_view(&self, center: LatLng, zoom: f64);
    /// Current zoom level, `None` while the widget hasn't settled on one (right after fitting
    /// bounds)
    fn zoom(&self) -> Option<f64>;
    /// Re-measure the container, needed when it was resized or revealed after mounting
    fn invalidate_size(&self);
}

struct LiveLayers {
    marker: LayerId,
    accuracy: LayerId,
}

/// Map with a fixed set of shipment event markers and a single live "you are here" marker
pub struct MapView<W: MapWidget> {
    widget: W,
    events: Vec<LayerId>,
    live: Option<LiveLayers>,
    mounted: bool,
}

fn accuracy_radius(position: &LivePosition) -> f64 {
    position
        .accuracy_meters
        .filter(|a| a.is_finite() && *a > 0.0)
        .unwrap_or(DEFAULT_ACCURACY_METERS)
}

impl<W: MapWidget> MapView<W> {
    pub fn new(widget: W) -> Self {
        Self {
            widget,
            events: vec![],
            live: None,
            mounted: false,
        }
    }

    pub fn widget(&self) -> &W {
        &self.widget
    }

    pub fn is_mounted(&self) -> bool {
        self.mounted
    }

    /// Mount the map in `container` and draw one marker per event, framing all of them.
    pub async fn initialize(&mut self, container: &str, events: &[ShipmentEvent]) -> Result {
        if self.mounted {
            anyhow::bail!("Map already initialized");
        }

        if !self.widget.library_loaded() {
            self.widget
                .load_library(MAP_LIBRARY_URL)
                .await
                .context("Failed to load the map library")?;
        }

        self.widget
            .mount(container)
            .with_context(|| format!("Failed to mount map in {container}"))?;
        self.mounted = true;

        self.widget
            .add_tile_layer(Uuid::new_v4(), TILE_URL_TEMPLATE, TILE_MAX_ZOOM);

        for event in events {
            let id = Uuid::new_v4();
            self.widget
                .add_marker(id, event.position(), event.label.as_deref());
            self.events.push(id);
        }

        if let Some(bounds) = Bounds::from_points(events.iter().map(ShipmentEvent::position)) {
            self.widget.fit_bounds(bounds, FIT_PADDING_PX);
        } else {
            self.widget.set_view(FALLBACK_CENTER, FALLBACK_ZOOM);
        }

        debug!("Map mounted in {container} with {} events", events.len());

        Ok(())
    }

    /// Move the live marker (creating it on the first call) and its accuracy circle.
    pub fn update_live_position(&mut self, position: &LivePosition) {
        if !self.mounted {
            return;
        }

        let at = LatLng::from(position);
        let radius = accuracy_radius(position);

        if let Some(live) = &self.live {
            self.widget.move_layer(live.marker, at);
            self.widget.move_layer(live.accuracy, at);
            self.widget.set_circle_radius(live.accuracy, radius);
        } else {
            let live = LiveLayers {
                marker: Uuid::new_v4(),
                accuracy: Uuid::new_v4(),
            };
            self.widget.add_marker(live.marker, at, None);
            self.widget.add_circle(live.accuracy, at, radius);
            self.live = Some(live);
        }

        match self.widget.zoom() {
            Some(zoom) if zoom < LIVE_ZOOM_FLOOR => self.widget.set_view(at, LIVE_ZOOM_FLOOR),
            Some(_) => {}
            None => debug!("Map zoom not known yet, leaving the view alone"),
        }
    }

    pub fn relayout(&self) {
        if self.mounted {
            self.widget.invalidate_size();
        }
    }

    pub fn event_marker_count(&self) -> usize {
        self.events.len()
    }
}
