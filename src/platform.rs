use crate::error::ServiceError;
use url::Url;

/// Browser inputs captured once at process start.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Environment {
    pub url: Url,
    pub language_tag: String,
    pub timezone: String,
    pub user_agent: String,
}

impl Environment {
    pub fn is_in_host(&self, marker: &str) -> bool {
        !marker.is_empty() && self.user_agent.contains(marker)
    }
}

/// Host SDK running the app inside its webview.
pub trait PlatformSession {
    /// One-time handshake with the embedding container.
    fn init(&self, app_id: &str) -> impl Future<Output = Result<(), ServiceError>>;

    /// Credential the host hands out when the user is already logged in.
    fn access_token(&self) -> Option<String>;
}
