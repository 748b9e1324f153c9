use log::debug;

use crate::{location::SharedLocationFields, prelude::*};

/// Reverse geocoding service, turns coordinates into a place name
pub trait Geocoder: Send + Sync {
    fn reverse(&self, lat: f64, lng: f64) -> impl Future<Output = Result<String>> + Send;
}

/// Best-effort wrapper around a [Geocoder], failures are swallowed and never retried
pub struct GeocodeClient<G: Geocoder> {
    geocoder: G,
}

impl<G: Geocoder> GeocodeClient<G> {
    pub fn new(geocoder: G) -> Self {
        Self { geocoder }
    }

    pub async fn reverse_geocode(&self, lat: f64, lng: f64) -> Option<String> {
        match self.geocoder.reverse(lat, lng).await {
            Ok(label) if !label.trim().is_empty() => Some(label),
            Ok(_) => {
                debug!("Reverse geocoding ({lat}, {lng}) gave an empty label");
                None
            }
            Err(why) => {
                debug!("Reverse geocoding ({lat}, {lng}) failed: {why:?}");
                None
            }
        }
    }

    /// Look up a label and write it into `fields`, leaving the old label alone on failure.
    /// Returns whether the label was replaced.
    pub async fn fill_label(&self, fields: &SharedLocationFields, lat: f64, lng: f64) -> bool {
        if let Some(label) = self.reverse_geocode(lat, lng).await {
            fields.write().await.label = Some(label);
            true
        } else {
            false
        }
    }
}
