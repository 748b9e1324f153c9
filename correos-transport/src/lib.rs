mod geocode;
mod scan;
mod server;

pub use geocode::NominatimGeocoder;
pub use scan::HttpScanSubmitter;
pub use server::{GEOCODER_URL, SERVER_HTTP_URL};
