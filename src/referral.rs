use crate::{
    config::ReferralConfig,
    error::StorageError,
    storage::KeyValueStore,
};
use serde::{
    Deserialize,
    Serialize,
};
use std::fmt;
use url::Url;

const STATE_PARAM: &str = "liff.state";
const REFERRER_PARAM: &str = "liff.referrer";
const ROUTE_PREFIX: &str = "#/";
const CODE_MIN_LEN: usize = 4;
const CODE_MAX_LEN: usize = 16;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SpecialKind {
    FromPortal,
    PortalPromotion,
    ExternalReward,
}

impl SpecialKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SpecialKind::FromPortal => "FROM_PORTAL",
            SpecialKind::PortalPromotion => "PORTAL_PROMOTION",
            SpecialKind::ExternalReward => "EXTERNAL_REWARD",
        }
    }

    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "FROM_PORTAL" => Some(SpecialKind::FromPortal),
            "PORTAL_PROMOTION" => Some(SpecialKind::PortalPromotion),
            "EXTERNAL_REWARD" => Some(SpecialKind::ExternalReward),
            _ => None,
        }
    }

    /// Portal markers live in the code slot, the reward marker in the
    /// mission slot.
    fn uses_mission_slot(self) -> bool {
        matches!(self, SpecialKind::ExternalReward)
    }
}

impl fmt::Display for SpecialKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Referral classification of the launch URL. A generic code and a special
/// kind can never both be present.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Referral {
    #[default]
    None,
    Code(String),
    Special(SpecialKind),
}

impl Referral {
    pub fn code(&self) -> Option<&str> {
        match self {
            Referral::Code(code) => Some(code),
            _ => None,
        }
    }

    pub fn special_kind(&self) -> Option<SpecialKind> {
        match self {
            Referral::Special(kind) => Some(*kind),
            _ => None,
        }
    }

    /// Value handed to the credential exchange: whatever the code slot holds.
    pub fn exchange_code(&self) -> Option<&str> {
        match self {
            Referral::Code(code) => Some(code),
            Referral::Special(kind) if !kind.uses_mission_slot() => Some(kind.as_str()),
            _ => None,
        }
    }

    /// Whether a promotion reward may be waiting for this user.
    pub fn has_pending_promotion(&self) -> bool {
        matches!(
            self,
            Referral::Special(SpecialKind::PortalPromotion | SpecialKind::ExternalReward)
        )
    }

    /// Clears both slots, then writes at most one of them.
    pub fn persist(
        &self,
        store: &impl KeyValueStore,
        config: &ReferralConfig,
    ) -> Result<(), StorageError> {
        store.remove(&config.code_key)?;
        store.remove(&config.mission_key)?;
        match self {
            Referral::None => Ok(()),
            Referral::Code(code) => store.set(&config.code_key, code),
            Referral::Special(kind) if kind.uses_mission_slot() => {
                store.set(&config.mission_key, kind.as_str())
            }
            Referral::Special(kind) => store.set(&config.code_key, kind.as_str()),
        }
    }

    /// Reads back what [`Referral::persist`] wrote. The mission slot wins if
    /// both are somehow populated.
    pub fn load(
        store: &impl KeyValueStore,
        config: &ReferralConfig,
    ) -> Result<Self, StorageError> {
        if let Some(flag) = store.get(&config.mission_key)? {
            if let Some(kind) = SpecialKind::parse(&flag) {
                return Ok(Referral::Special(kind));
            }
        }
        let referral = match store.get(&config.code_key)? {
            Some(value) => match SpecialKind::parse(&value) {
                Some(kind) => Referral::Special(kind),
                None => Referral::Code(value),
            },
            None => Referral::None,
        };
        Ok(referral)
    }
}

/// Candidate code carried by the URL, before any classification: the
/// `#/` fragment, then a `#/` value of `liff.state`, then the last path
/// segment.
pub fn extract_candidate(url: &Url) -> Option<String> {
    // `Url::fragment` drops the leading `#`.
    if let Some(rest) = url.fragment().and_then(|fragment| fragment.strip_prefix('/')) {
        return Some(rest.to_string());
    }
    if let Some(rest) = query_param(url, STATE_PARAM)
        .and_then(|state| state.strip_prefix(ROUTE_PREFIX).map(str::to_string))
    {
        return Some(rest);
    }
    url.path_segments()
        .and_then(|segments| segments.last().map(str::to_string))
}

pub fn resolve(url: &Url, config: &ReferralConfig) -> Referral {
    if query_param(url, REFERRER_PARAM).is_some() {
        return Referral::Special(SpecialKind::PortalPromotion);
    }
    match extract_candidate(url) {
        Some(candidate) => classify_candidate(&candidate, config),
        None => Referral::None,
    }
}

/// Resolves the URL and persists the result. Storage failures are logged and
/// never change the classification.
pub fn resolve_and_persist(
    url: &Url,
    config: &ReferralConfig,
    store: &impl KeyValueStore,
) -> Referral {
    let referral = resolve(url, config);
    if let Err(err) = referral.persist(store, config) {
        tracing::warn!(%err, ?referral, "failed to persist referral classification");
    }
    tracing::debug!(?referral, "resolved referral");
    referral
}

fn classify_candidate(candidate: &str, config: &ReferralConfig) -> Referral {
    if candidate == config.from_portal_sentinel {
        Referral::Special(SpecialKind::FromPortal)
    } else if candidate == config.portal_promotion_sentinel {
        Referral::Special(SpecialKind::PortalPromotion)
    } else if candidate == config.external_reward_sentinel {
        Referral::Special(SpecialKind::ExternalReward)
    } else if config.known_routes.iter().any(|route| route == candidate) {
        Referral::None
    } else if is_generic_code(candidate) {
        Referral::Code(candidate.to_string())
    } else {
        Referral::None
    }
}

pub fn is_generic_code(candidate: &str) -> bool {
    (CODE_MIN_LEN..=CODE_MAX_LEN).contains(&candidate.len())
        && candidate.bytes().all(|b| b.is_ascii_alphanumeric())
}

fn query_param(url: &Url, name: &str) -> Option<String> {
    url.query_pairs()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use crate::storage::InMemoryStore;

    fn parse(raw: &str) -> Url {
        Url::parse(raw).unwrap()
    }

    fn config() -> ReferralConfig {
        ReferralConfig::default()
    }

    #[test]
    fn resolve__reads_code_from_fragment() {
        // given
        let url = parse("https://app.example/#/PROMO123");

        // when
        let referral = resolve(&url, &config());

        // then
        assert_eq!(referral, Referral::Code("PROMO123".to_string()));
        assert_eq!(referral.code(), Some("PROMO123"));
        assert_eq!(referral.special_kind(), None);
    }

    #[test]
    fn resolve__reads_code_from_encoded_liff_state() {
        let url = parse("https://app.example/?liff.state=%23%2FABCD1234");

        assert_eq!(resolve(&url, &config()), Referral::Code("ABCD1234".to_string()));
    }

    #[test]
    fn resolve__ignores_liff_state_without_route_prefix() {
        let url = parse("https://app.example/?liff.state=ABCD1234");

        assert_eq!(resolve(&url, &config()), Referral::None);
    }

    #[test]
    fn resolve__falls_back_to_last_path_segment() {
        let url = parse("https://app.example/invite/FRIEND42");

        assert_eq!(resolve(&url, &config()), Referral::Code("FRIEND42".to_string()));
    }

    #[test]
    fn resolve__referrer_param_wins_over_everything() {
        // given
        let url = parse("https://app.example/CODE9999?liff.referrer=x&liff.state=%23%2FSTATE123#/FRAG1234");

        // when
        let referral = resolve(&url, &config());

        // then
        assert_eq!(referral, Referral::Special(SpecialKind::PortalPromotion));
        assert_eq!(referral.code(), None);
    }

    #[test]
    fn resolve__maps_sentinels_to_special_kinds() {
        let cases = [
            ("https://app.example/#/fromportal", SpecialKind::FromPortal),
            ("https://app.example/#/portalpromotion", SpecialKind::PortalPromotion),
            ("https://app.example/mission", SpecialKind::ExternalReward),
        ];
        for (raw, expected) in cases {
            assert_eq!(resolve(&parse(raw), &config()), Referral::Special(expected), "{raw}");
        }
    }

    #[test]
    fn resolve__known_route_is_not_a_referral() {
        let url = parse("https://app.example/ranking");

        assert_eq!(resolve(&url, &config()), Referral::None);
    }

    #[test]
    fn resolve__non_alphanumeric_candidate_is_not_a_referral() {
        let url = parse("https://app.example/#/home/settings");

        assert_eq!(resolve(&url, &config()), Referral::None);
    }

    #[test]
    fn is_generic_code__enforces_length_bounds() {
        assert!(!is_generic_code("abc"));
        assert!(is_generic_code("abcd"));
        assert!(is_generic_code("abcdefghij123456"));
        assert!(!is_generic_code("abcdefghij1234567"));
        assert!(!is_generic_code("ab-cd"));
    }

    #[test]
    fn persist__clears_stale_mission_flag_when_writing_code() {
        // given
        let store = InMemoryStore::with_entries([("missionFlag", "EXTERNAL_REWARD")]);
        let referral = Referral::Code("PROMO123".to_string());

        // when
        referral.persist(&store, &config()).unwrap();

        // then
        let stored = store.snapshot();
        assert_eq!(stored.get("referralCode").map(String::as_str), Some("PROMO123"));
        assert!(!stored.contains_key("missionFlag"));
    }

    #[test]
    fn persist__external_reward_uses_mission_slot_and_clears_code() {
        // given
        let store = InMemoryStore::with_entries([("referralCode", "OLDCODE1")]);
        let referral = Referral::Special(SpecialKind::ExternalReward);

        // when
        referral.persist(&store, &config()).unwrap();

        // then
        let stored = store.snapshot();
        assert_eq!(stored.get("missionFlag").map(String::as_str), Some("EXTERNAL_REWARD"));
        assert!(!stored.contains_key("referralCode"));
    }

    #[test]
    fn persist__none_clears_both_slots() {
        let store = InMemoryStore::with_entries([
            ("referralCode", "OLDCODE1"),
            ("missionFlag", "EXTERNAL_REWARD"),
        ]);

        Referral::None.persist(&store, &config()).unwrap();

        assert!(store.snapshot().is_empty());
    }

    #[test]
    fn resolve_and_persist__referrer_clears_stored_mission_flag() {
        // given
        let store = InMemoryStore::with_entries([("missionFlag", "EXTERNAL_REWARD")]);
        let url = parse("https://app.example/?liff.referrer=x");

        // when
        let referral = resolve_and_persist(&url, &config(), &store);

        // then
        assert_eq!(referral, Referral::Special(SpecialKind::PortalPromotion));
        let stored = store.snapshot();
        assert!(!stored.contains_key("missionFlag"));
        assert_eq!(
            stored.get("referralCode").map(String::as_str),
            Some("PORTAL_PROMOTION")
        );
    }

    #[test]
    fn load__reads_back_what_persist_wrote() {
        let store = InMemoryStore::new();
        for referral in [
            Referral::None,
            Referral::Code("ZXCV5678".to_string()),
            Referral::Special(SpecialKind::FromPortal),
            Referral::Special(SpecialKind::ExternalReward),
        ] {
            referral.persist(&store, &config()).unwrap();
            assert_eq!(Referral::load(&store, &config()).unwrap(), referral);
        }
    }

    #[test]
    fn exchange_code__passes_portal_markers_but_not_mission_flag() {
        assert_eq!(
            Referral::Special(SpecialKind::FromPortal).exchange_code(),
            Some("FROM_PORTAL")
        );
        assert_eq!(Referral::Special(SpecialKind::ExternalReward).exchange_code(), None);
        assert_eq!(Referral::Code("ABCD".to_string()).exchange_code(), Some("ABCD"));
    }
}
