use crate::timeout::Step;
use serde::{
    Deserialize,
    Serialize,
};
use std::{
    fmt,
    time::Duration,
};
use thiserror::Error;

pub type Result<T, E = BootstrapError> = std::result::Result<T, E>;

/// Transport-level code attached to a failed request, when the client
/// reports one.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportCode {
    /// The server answered, but the response could not be used.
    BadResponse,
    NetworkUnreachable,
    Aborted,
    Other(String),
}

impl fmt::Display for TransportCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportCode::BadResponse => write!(f, "ERR_BAD_RESPONSE"),
            TransportCode::NetworkUnreachable => write!(f, "ERR_NETWORK"),
            TransportCode::Aborted => write!(f, "ECONNABORTED"),
            TransportCode::Other(code) => write!(f, "{code}"),
        }
    }
}

/// A failed call to the backend or the host SDK.
#[derive(Clone, Debug, Default, Eq, PartialEq, Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct ServiceError {
    #[serde(default)]
    pub code: Option<TransportCode>,
    #[serde(default)]
    pub status: Option<u16>,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub body: Option<String>,
}

impl ServiceError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::default()
        }
    }

    pub fn with_status(status: u16, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            ..Self::new(message)
        }
    }

    pub fn with_code(code: TransportCode, message: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            ..Self::new(message)
        }
    }

    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn is_forbidden(&self) -> bool {
        self.status == Some(403)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthErrorKind {
    NetworkError,
    Other,
}

/// Credential exchange failure, typed by the auth gateway itself.
#[derive(Clone, Debug, Eq, PartialEq, Error, Serialize, Deserialize)]
#[error("credential exchange failed ({kind:?}): {source}")]
pub struct AuthError {
    pub kind: AuthErrorKind,
    #[source]
    pub source: ServiceError,
}

impl AuthError {
    pub fn network(source: ServiceError) -> Self {
        Self {
            kind: AuthErrorKind::NetworkError,
            source,
        }
    }

    pub fn other(source: ServiceError) -> Self {
        Self {
            kind: AuthErrorKind::Other,
            source,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Error, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileError {
    #[error("account has no character yet")]
    CharacterRequired,
    #[error(transparent)]
    Service(#[from] ServiceError),
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("storage payload is not valid json: {0}")]
    Json(#[from] serde_json::Error),
}

/// Every failure the orchestrator can catch while driving a bootstrap run.
#[derive(Clone, Debug, Error)]
pub enum BootstrapError {
    #[error("{} timed out after {}ms", .step.label(), .after.as_millis())]
    Timeout { step: Step, after: Duration },
    #[error(transparent)]
    Service(#[from] ServiceError),
    #[error(transparent)]
    Authentication(#[from] AuthError),
    #[error("account has no character yet")]
    CharacterRequired,
    #[error("session expired: {0}")]
    SessionExpired(ServiceError),
}

impl From<ProfileError> for BootstrapError {
    fn from(err: ProfileError) -> Self {
        match err {
            ProfileError::CharacterRequired => BootstrapError::CharacterRequired,
            ProfileError::Service(inner) if inner.is_forbidden() => {
                BootstrapError::SessionExpired(inner)
            }
            ProfileError::Service(inner) => BootstrapError::Service(inner),
        }
    }
}
