use crate::locale::Locale;
use color_eyre::eyre::{
    Result,
    WrapErr,
    eyre,
};
use serde::{
    Deserialize,
    Serialize,
};
use std::{
    fs,
    path::Path,
    time::Duration,
};

pub const APP_ID_ENV: &str = "BOOTSTRAP_APP_ID";
pub const STEP_TIMEOUT_ENV: &str = "BOOTSTRAP_STEP_TIMEOUT_MS";

const DEFAULT_STEP_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_MAX_AUTH_RETRIES: u32 = 3;
const DEFAULT_MAX_PROFILE_RETRIES: u32 = 1;

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BootstrapConfig {
    /// Host-platform application id, handed opaquely to the handshake.
    pub app_id: String,
    pub step_timeout_ms: u64,
    pub max_auth_retries: u32,
    pub max_profile_retries: u32,
    pub default_locale: Locale,
    /// Substring of the user agent that identifies the host in-app browser.
    pub host_user_agent_marker: String,
    /// Host app name shown in the "log in through the host" message.
    pub host_name: String,
    pub referral: ReferralConfig,
    pub token_key: String,
    pub routes: NavigationRoutes,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReferralConfig {
    pub from_portal_sentinel: String,
    pub portal_promotion_sentinel: String,
    pub external_reward_sentinel: String,
    /// The app's own route names; a path segment equal to one of these is
    /// navigation, not a referral.
    pub known_routes: Vec<String>,
    pub code_key: String,
    pub mission_key: String,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NavigationRoutes {
    pub connect: String,
    pub create_character: String,
    pub promotion: String,
    pub home: String,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            app_id: String::new(),
            step_timeout_ms: DEFAULT_STEP_TIMEOUT_MS,
            max_auth_retries: DEFAULT_MAX_AUTH_RETRIES,
            max_profile_retries: DEFAULT_MAX_PROFILE_RETRIES,
            default_locale: Locale::En,
            host_user_agent_marker: "Line/".to_string(),
            host_name: "LINE".to_string(),
            referral: ReferralConfig::default(),
            token_key: "accessToken".to_string(),
            routes: NavigationRoutes::default(),
        }
    }
}

impl Default for ReferralConfig {
    fn default() -> Self {
        let known_routes = [
            "connect",
            "create-character",
            "home",
            "promotion",
            "dice",
            "board",
            "spin",
            "rps",
            "shop",
            "ranking",
            "mypage",
            "wallet",
            "maintenance",
        ];
        Self {
            from_portal_sentinel: "fromportal".to_string(),
            portal_promotion_sentinel: "portalpromotion".to_string(),
            external_reward_sentinel: "mission".to_string(),
            known_routes: known_routes.iter().map(|route| route.to_string()).collect(),
            code_key: "referralCode".to_string(),
            mission_key: "missionFlag".to_string(),
        }
    }
}

impl Default for NavigationRoutes {
    fn default() -> Self {
        Self {
            connect: "/connect".to_string(),
            create_character: "/create-character".to_string(),
            promotion: "/promotion".to_string(),
            home: "/home".to_string(),
        }
    }
}

impl BootstrapConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .wrap_err_with(|| format!("failed to read config {}", path.display()))?;
        let config: Self = serde_json::from_str(&contents)
            .wrap_err_with(|| format!("invalid config payload in {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_env_overrides(mut self) -> Result<Self> {
        if let Ok(app_id) = std::env::var(APP_ID_ENV) {
            self.app_id = app_id;
        }
        if let Ok(raw) = std::env::var(STEP_TIMEOUT_ENV) {
            self.step_timeout_ms = raw
                .trim()
                .parse()
                .wrap_err_with(|| format!("{STEP_TIMEOUT_ENV} must be milliseconds, got {raw:?}"))?;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.step_timeout_ms == 0 {
            return Err(eyre!("step_timeout_ms must be greater than zero"));
        }
        let referral = &self.referral;
        let sentinels = [
            &referral.from_portal_sentinel,
            &referral.portal_promotion_sentinel,
            &referral.external_reward_sentinel,
        ];
        if sentinels.iter().any(|sentinel| sentinel.is_empty()) {
            return Err(eyre!("referral sentinels must not be empty"));
        }
        if referral.code_key == referral.mission_key {
            return Err(eyre!(
                "referral code_key and mission_key must differ (both are {:?})",
                referral.code_key
            ));
        }
        Ok(())
    }

    pub fn step_timeout(&self) -> Duration {
        Duration::from_millis(self.step_timeout_ms)
    }
}
