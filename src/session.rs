use crate::{
    error::StorageError,
    gateway::{
        AccountStatus,
        Profile,
    },
    locale::Locale,
    referral::Referral,
    storage::KeyValueStore,
};
use std::sync::{
    Arc,
    PoisonError,
    RwLock,
    RwLockReadGuard,
    RwLockWriteGuard,
};

/// Holder of the bearer credential.
pub trait TokenStore {
    fn token(&self) -> Option<String>;

    fn store(&self, token: &str) -> Result<(), StorageError>;

    fn clear(&self) -> Result<(), StorageError>;
}

/// [`TokenStore`] kept in a single key of a [`KeyValueStore`].
#[derive(Clone, Debug)]
pub struct StoredTokens<S> {
    store: S,
    key: String,
}

impl<S> StoredTokens<S> {
    pub fn new(store: S, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
        }
    }
}

impl<S: KeyValueStore> TokenStore for StoredTokens<S> {
    fn token(&self) -> Option<String> {
        match self.store.get(&self.key) {
            Ok(token) => token.filter(|token| !token.is_empty()),
            Err(err) => {
                tracing::warn!(%err, "failed to read stored credential; treating as absent");
                None
            }
        }
    }

    fn store(&self, token: &str) -> Result<(), StorageError> {
        self.store.set(&self.key, token)
    }

    fn clear(&self) -> Result<(), StorageError> {
        self.store.remove(&self.key)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SessionData {
    pub locale: Locale,
    pub referral: Referral,
    pub account: Option<AccountStatus>,
    pub profile: Option<Profile>,
}

/// User/session data shared with the rest of the app. Writes are
/// crate-private and only issued by the orchestrator; everyone else reads
/// through a [`SessionView`].
#[derive(Clone, Debug, Default)]
pub struct SessionState {
    inner: Arc<RwLock<SessionData>>,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn view(&self) -> SessionView {
        SessionView {
            inner: self.inner.clone(),
        }
    }

    pub(crate) fn set_locale(&self, locale: Locale) {
        self.write().locale = locale;
    }

    pub(crate) fn set_referral(&self, referral: Referral) {
        self.write().referral = referral;
    }

    pub(crate) fn set_account(&self, account: AccountStatus) {
        self.write().account = Some(account);
    }

    pub(crate) fn set_profile(&self, profile: Profile) {
        self.write().profile = Some(profile);
    }

    fn write(&self) -> RwLockWriteGuard<'_, SessionData> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Read-only handle onto [`SessionState`].
#[derive(Clone, Debug)]
pub struct SessionView {
    inner: Arc<RwLock<SessionData>>,
}

impl SessionView {
    pub fn snapshot(&self) -> SessionData {
        self.read().clone()
    }

    pub fn locale(&self) -> Locale {
        self.read().locale
    }

    pub fn referral(&self) -> Referral {
        self.read().referral.clone()
    }

    pub fn account(&self) -> Option<AccountStatus> {
        self.read().account
    }

    pub fn profile(&self) -> Option<Profile> {
        self.read().profile.clone()
    }

    fn read(&self) -> RwLockReadGuard<'_, SessionData> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }
}
