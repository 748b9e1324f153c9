const fn server_host() -> &'static str {
    if let Some(host) = option_env!("CORREOS_SERVER_HOST") {
        host
    } else {
        "localhost"
    }
}

const fn server_port() -> u16 {
    if let Some(port) = option_env!("CORREOS_SERVER_PORT") {
        const_str::parse!(port, u16)
    } else {
        8000
    }
}

const fn server_http_proto() -> &'static str {
    match option_env!("CORREOS_SERVER_SECURE") {
        Some(secure) if const_str::eq_ignore_ascii_case!(secure, "true") => "https",
        Some(secure) if const_str::equal!(secure, "1") => "https",
        _ => "http",
    }
}

const SERVER_HOST: &str = server_host();
const SERVER_PORT: u16 = server_port();
const SERVER_HTTP_PROTO: &str = server_http_proto();

pub const SERVER_HTTP_URL: &str =
    const_str::concat!(SERVER_HTTP_PROTO, "://", SERVER_HOST, ":", SERVER_PORT);

const SCAN_PATH: &str = "/envios/scan/";
/// Page hosting the scan form, visiting it hands out the CSRF cookie
const SCAN_FORM_PATH: &str = "/envios/";

pub const GEOCODER_URL: &str = "https://nominatim.openstreetmap.org/reverse";

/// Nominatim refuses requests without an identifying agent
pub const USER_AGENT: &str = concat!("CorreosChile/", env!("CARGO_PKG_VERSION"));

pub fn scan_url(base: &str) -> String {
    format!("{}{SCAN_PATH}", base.trim_end_matches('/'))
}

pub fn scan_form_url(base: &str) -> String {
    format!("{}{SCAN_FORM_PATH}", base.trim_end_matches('/'))
}
