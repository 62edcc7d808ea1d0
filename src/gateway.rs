use crate::{
    error::{
        AuthError,
        ProfileError,
        ServiceError,
    },
    referral::SpecialKind,
};
use serde::{
    Deserialize,
    Serialize,
};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    New,
    Existing,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct AuthSession {
    pub token: String,
    pub account: AccountStatus,
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub user_id: String,
    #[serde(default)]
    pub nickname: Option<String>,
    /// Timezone the backend last recorded for this user.
    #[serde(default)]
    pub timezone: Option<String>,
}

/// Backend credential exchange.
pub trait AuthGateway {
    fn exchange(
        &self,
        platform_token: &str,
        referral_code: Option<&str>,
    ) -> impl Future<Output = Result<AuthSession, AuthError>>;
}

/// Backend profile and reward endpoints used while bootstrapping.
pub trait ProfileLoader {
    fn load(&self, token: &str) -> impl Future<Output = Result<Profile, ProfileError>>;

    fn update_timezone(
        &self,
        token: &str,
        timezone: &str,
    ) -> impl Future<Output = Result<(), ServiceError>>;

    /// Whether a promotion reward is waiting for this user.
    fn pending_promotion(
        &self,
        token: &str,
        kind: SpecialKind,
    ) -> impl Future<Output = Result<bool, ServiceError>>;
}

pub trait Navigator {
    fn navigate(&self, path: &str);
}
