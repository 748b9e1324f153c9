use anyhow::anyhow;
use log::{debug, info};
use reqwest::{
    Client, Response, StatusCode,
    header::{ACCEPT, COOKIE, REFERER, SET_COOKIE},
};
use tokio::sync::Mutex;

use correos_logic::{ScanResult, ScanSubmission, ScanSubmitter, prelude::*};

use crate::server::{self, SERVER_HTTP_URL};

const CSRF_HEADER: &str = "X-CSRFToken";
const CSRF_COOKIE: &str = "csrftoken";

/// Value of the CSRF cookie set by `resp`, if any
fn csrf_cookie(resp: &Response) -> Option<String> {
    resp.headers()
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter_map(|v| v.split(';').next())
        .filter_map(|pair| pair.trim().strip_prefix(CSRF_COOKIE)?.strip_prefix('='))
        .find(|token| !token.is_empty())
        .map(str::to_string)
}

/// Posts scans to the tracking server as JSON
pub struct HttpScanSubmitter {
    client: Client,
    url: String,
    form_url: String,
    /// Token fetched from the server, used when the form didn't carry one
    session_token: Mutex<Option<String>>,
}

impl HttpScanSubmitter {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self::with_client(client, base_url))
    }

    pub fn with_client(client: Client, base_url: &str) -> Self {
        Self {
            client,
            url: server::scan_url(base_url),
            form_url: server::scan_form_url(base_url),
            session_token: Mutex::new(None),
        }
    }

    /// Submitter for the server this build was configured with
    pub fn for_configured_server() -> Result<Self> {
        Self::new(SERVER_HTTP_URL)
    }

    /// CSRF token from the server's cookie, fetched from the scan form page on first use
    async fn session_token(&self) -> Result<String> {
        let mut cached = self.session_token.lock().await;
        if let Some(token) = cached.as_ref() {
            return Ok(token.clone());
        }

        let resp = self
            .client
            .get(&self.form_url)
            .send()
            .await
            .context("Could not reach the scan form page")?;

        let token = csrf_cookie(&resp)
            .ok_or_else(|| anyhow!("Server didn't hand out a CSRF token"))?;
        info!("Got a CSRF token from {}", self.form_url);
        *cached = Some(token.clone());
        Ok(token)
    }
}

impl ScanSubmitter for HttpScanSubmitter {
    async fn submit(&self, csrf_token: &str, submission: &ScanSubmission) -> Result<ScanResult> {
        let fetched = csrf_token.is_empty();
        let token = if fetched {
            self.session_token().await?
        } else {
            csrf_token.to_string()
        };

        let mut req = self
            .client
            .post(&self.url)
            .header(ACCEPT, "application/json")
            .header(REFERER, &self.form_url)
            .header(CSRF_HEADER, &token)
            .json(submission);
        if fetched {
            req = req.header(COOKIE, format!("{CSRF_COOKIE}={token}"));
        }

        let resp = req.send().await.context("Could not send scan")?;

        // Rejected scans come back as 4xx with a normal body, only the body decides
        let status = resp.status();
        if fetched && status == StatusCode::FORBIDDEN {
            debug!("Fetched CSRF token was refused, dropping it");
            self.session_token.lock().await.take();
        }
        let body = resp
            .bytes()
            .await
            .context("Failed to read scan response")?;

        let result = serde_json::from_slice::<ScanResult>(&body)
            .with_context(|| format!("Unreadable scan response (HTTP {status})"))?;

        debug!("Scan response (HTTP {status}): ok={}", result.ok);

        Ok(result)
    }
}
