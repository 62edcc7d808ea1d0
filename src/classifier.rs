use crate::{
    error::{
        AuthErrorKind,
        BootstrapError,
        ServiceError,
        TransportCode,
    },
    timeout::Step,
};
use serde::Serialize;

const HTML_MARKERS: [&str; 2] = ["<!DOCTYPE html", "<html"];

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Infrastructure outage; surfaces as the maintenance screen.
    Transient,
    /// Credential exchange could not reach the network at all.
    Fatal,
    Other,
}

pub fn classify(error: &BootstrapError) -> Severity {
    match error {
        BootstrapError::Timeout { .. } => Severity::Transient,
        BootstrapError::Service(inner) | BootstrapError::SessionExpired(inner) => {
            if is_server_unavailable(inner) {
                Severity::Transient
            } else {
                Severity::Other
            }
        }
        BootstrapError::Authentication(auth) => {
            if is_server_unavailable(&auth.source) {
                Severity::Transient
            } else {
                match auth.kind {
                    AuthErrorKind::NetworkError => Severity::Fatal,
                    AuthErrorKind::Other => Severity::Other,
                }
            }
        }
        BootstrapError::CharacterRequired => Severity::Other,
    }
}

/// Whether a raw service failure looks like a gateway or backend outage
/// rather than an application-level rejection.
pub fn is_server_unavailable(error: &ServiceError) -> bool {
    if error.code == Some(TransportCode::BadResponse) {
        return true;
    }
    if error.message.contains(Step::ProfileFetch.label()) {
        return true;
    }
    if error.status == Some(502) || error.message.contains("502") {
        return true;
    }
    error
        .body
        .as_deref()
        .is_some_and(|body| HTML_MARKERS.iter().any(|marker| body.contains(marker)))
}
