use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::{location::SharedLocationFields, prelude::*, updates::Notifier};

/// Shown when the form is submitted without a shipment code or codes
pub const VALIDATION_MESSAGE: &str = "Complete envío y códigos.";
/// Shown when the request itself failed (no connection, unreadable response)
pub const NETWORK_ERROR_MESSAGE: &str = "Error de red";
const UNKNOWN_ERROR_MESSAGE: &str = "Error";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, specta::Type)]
pub enum AlertKind {
    Info,
    Success,
    Warning,
    Danger,
}

/// Message rendered in the scan result area
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, specta::Type)]
pub struct Alert {
    pub kind: AlertKind,
    pub text: String,
}

impl Alert {
    fn new(kind: AlertKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
        }
    }
}

/// Raw values of the scan form at the moment it's submitted
#[derive(Debug, Clone, Default, Serialize, Deserialize, specta::Type)]
pub struct ScanForm {
    pub shipment_code: String,
    /// Package codes, one per line or comma separated
    pub codes_text: String,
    /// Value of the hidden CSRF field
    pub csrf_token: String,
    /// Location typed by hand, takes precedence over the geocoded label
    pub location_label: Option<String>,
}

/// Body posted to the scan endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanSubmission {
    #[serde(rename = "envio_codigo")]
    pub shipment_code: String,
    #[serde(rename = "codigos_text")]
    pub package_codes_raw: String,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    #[serde(rename = "ubicacion")]
    pub location_label: Option<String>,
}

impl ScanSubmission {
    /// Individual package codes in the raw text, blanks dropped
    pub fn package_codes(&self) -> Vec<&str> {
        self.package_codes_raw
            .split(['\n', '\r', ','])
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, specta::Type)]
pub struct Eta {
    #[serde(rename = "eta_label")]
    pub label: String,
    #[serde(rename = "km_restante")]
    pub km_remaining: f64,
}

/// Response of the scan endpoint, both for accepted and rejected scans
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, specta::Type)]
pub struct ScanResult {
    pub ok: bool,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(rename = "envio_codigo", default)]
    pub shipment_code: String,
    /// Number of codes the server processed
    #[serde(default)]
    pub total: u32,
    #[serde(rename = "marcados_entregados", default)]
    pub delivered_count: u32,
    #[serde(rename = "creados", default)]
    pub created_count: u32,
    #[serde(rename = "estado_envio", default)]
    pub shipment_status: String,
    #[serde(default)]
    pub eta: Option<Eta>,
}

impl ScanResult {
    /// The ETA, if the server sent one worth showing
    pub fn eta(&self) -> Option<&Eta> {
        self.eta.as_ref().filter(|eta| !eta.label.is_empty())
    }

    pub fn summary(&self) -> String {
        let mut text = format!(
            "Envío {}: {} entregados, {} creados. Estado: {}",
            self.shipment_code, self.delivered_count, self.created_count, self.shipment_status
        );
        if let Some(eta) = self.eta() {
            text.push_str(&format!(" | ETA: {} (~{} km)", eta.label, eta.km_remaining));
        }
        text
    }

    fn toast(&self) -> String {
        let mut text = format!("Procesado envío {}", self.shipment_code);
        if let Some(eta) = self.eta() {
            text.push_str(&format!(" · ETA {}", eta.label));
        }
        text
    }
}

/// Posts scans to the server. An error means the request failed, a rejected scan is still an
/// `Ok` with [ScanResult::ok] unset.
pub trait ScanSubmitter: Send + Sync {
    fn submit(
        &self,
        csrf_token: &str,
        submission: &ScanSubmission,
    ) -> impl Future<Output = Result<ScanResult>> + Send;
}

/// The parts of the scan form the controller writes to
pub trait ScanFormView: Send + Sync {
    fn show_alert(&self, alert: Alert);
    fn clear_codes(&self);
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, specta::Type)]
pub enum ScanOutcome {
    /// Required fields missing, nothing was sent
    Invalid,
    /// The server refused the scan, contains its error message
    Rejected(String),
    Accepted(ScanResult),
    /// The request didn't make it or the response couldn't be read
    TransportFailed,
}

pub struct ScanFormController<S: ScanSubmitter, V: ScanFormView, N: Notifier> {
    submitter: S,
    view: V,
    notifier: N,
    fields: SharedLocationFields,
}

impl<S: ScanSubmitter, V: ScanFormView, N: Notifier> ScanFormController<S, V, N> {
    pub fn new(submitter: S, view: V, notifier: N, fields: SharedLocationFields) -> Self {
        Self {
            submitter,
            view,
            notifier,
            fields,
        }
    }

    async fn build_submission(&self, form: &ScanForm) -> ScanSubmission {
        let fields = self.fields.read().await;
        let typed_label = form
            .location_label
            .as_deref()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string);
        ScanSubmission {
            shipment_code: form.shipment_code.trim().to_string(),
            package_codes_raw: form.codes_text.trim().to_string(),
            lat: fields.lat,
            lng: fields.lng,
            location_label: typed_label.or_else(|| fields.label.clone()),
        }
    }

    /// Validate, send and render the result of one scan
    pub async fn submit(&self, form: &ScanForm) -> ScanOutcome {
        let submission = self.build_submission(form).await;

        if submission.shipment_code.is_empty() || submission.package_codes().is_empty() {
            self.view
                .show_alert(Alert::new(AlertKind::Warning, VALIDATION_MESSAGE));
            return ScanOutcome::Invalid;
        }

        info!(
            "Submitting {} package codes for shipment {}",
            submission.package_codes().len(),
            submission.shipment_code
        );

        match self.submitter.submit(&form.csrf_token, &submission).await {
            Ok(result) if result.ok => {
                self.view
                    .show_alert(Alert::new(AlertKind::Success, result.summary()));
                self.notifier.notify(&result.toast());
                self.view.clear_codes();
                ScanOutcome::Accepted(result)
            }
            Ok(result) => {
                let error = result
                    .error
                    .filter(|e| !e.is_empty())
                    .unwrap_or_else(|| UNKNOWN_ERROR_MESSAGE.to_string());
                info!("Scan rejected: {error}");
                self.view
                    .show_alert(Alert::new(AlertKind::Danger, error.clone()));
                ScanOutcome::Rejected(error)
            }
            Err(why) => {
                warn!("Scan request failed: {why:?}");
                self.view
                    .show_alert(Alert::new(AlertKind::Danger, NETWORK_ERROR_MESSAGE));
                ScanOutcome::TransportFailed
            }
        }
    }
}
