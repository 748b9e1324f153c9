use anyhow::bail;
use reqwest::{Client, Url, header::ACCEPT};
use serde::Deserialize;

use correos_logic::{Geocoder, prelude::*};

use crate::server::{GEOCODER_URL, USER_AGENT};

#[derive(Deserialize)]
struct ReverseResponse {
    display_name: Option<String>,
}

/// Reverse geocoding through a Nominatim instance
pub struct NominatimGeocoder {
    client: Client,
    url: Url,
}

impl NominatimGeocoder {
    pub fn new(url: &str) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .context("Failed to build HTTP client")?;
        Self::with_client(client, url)
    }

    pub fn with_client(client: Client, url: &str) -> Result<Self> {
        let url = Url::parse(url).with_context(|| format!("Invalid geocoder URL {url}"))?;
        Ok(Self { client, url })
    }

    /// The public OpenStreetMap instance
    pub fn openstreetmap() -> Result<Self> {
        Self::new(GEOCODER_URL)
    }

    fn reverse_url(&self, lat: f64, lng: f64) -> Url {
        let mut url = self.url.clone();
        url.query_pairs_mut()
            .append_pair("format", "jsonv2")
            .append_pair("lat", &lat.to_string())
            .append_pair("lon", &lng.to_string());
        url
    }
}

impl Geocoder for NominatimGeocoder {
    async fn reverse(&self, lat: f64, lng: f64) -> Result<String> {
        let body = self
            .client
            .get(self.reverse_url(lat, lng))
            .header(ACCEPT, "application/json")
            .send()
            .await
            .context("Could not reach geocoder")?
            .error_for_status()
            .context("Geocoder returned error")?
            .bytes()
            .await
            .context("Failed to read geocoder response")?;

        let resp = serde_json::from_slice::<ReverseResponse>(&body)
            .context("Unreadable geocoder response")?;

        match resp.display_name {
            Some(name) if !name.trim().is_empty() => Ok(name),
            _ => bail!("Geocoder response has no display name"),
        }
    }
}
