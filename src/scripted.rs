//! Scripted collaborators for dry runs and tests.
//!
//! Each collaborator answers from a queue of [`Reply`] values. Once the queue
//! runs dry the last reply repeats; a script that never had any reply hangs
//! forever, which the orchestrator then sees as a timeout.

use crate::{
    error::{
        AuthError,
        ProfileError,
        ServiceError,
    },
    gateway::{
        AccountStatus,
        AuthGateway,
        AuthSession,
        Navigator,
        Profile,
        ProfileLoader,
    },
    platform::PlatformSession,
    referral::SpecialKind,
};
use color_eyre::eyre::{
    Result,
    WrapErr,
};
use serde::Deserialize;
use std::{
    collections::VecDeque,
    fs,
    path::Path,
    sync::{
        Arc,
        Mutex,
        MutexGuard,
        PoisonError,
    },
    time::Duration,
};

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reply<T, E> {
    Ok(T),
    Err(E),
    Delayed {
        after_ms: u64,
        reply: Box<Reply<T, E>>,
    },
    Never,
}

impl<T, E> Reply<T, E> {
    pub fn delayed(after: Duration, reply: Reply<T, E>) -> Self {
        Reply::Delayed {
            after_ms: after.as_millis() as u64,
            reply: Box::new(reply),
        }
    }

    pub async fn play(self) -> std::result::Result<T, E> {
        let mut reply = self;
        loop {
            match reply {
                Reply::Ok(value) => return Ok(value),
                Reply::Err(err) => return Err(err),
                Reply::Delayed {
                    after_ms,
                    reply: next,
                } => {
                    tokio::time::sleep(Duration::from_millis(after_ms)).await;
                    reply = *next;
                }
                Reply::Never => return futures::future::pending().await,
            }
        }
    }
}

#[derive(Debug)]
struct ScriptState<T, E> {
    queue: VecDeque<Reply<T, E>>,
    last: Option<Reply<T, E>>,
    calls: usize,
}

#[derive(Clone, Debug)]
pub struct Script<T, E> {
    inner: Arc<Mutex<ScriptState<T, E>>>,
}

impl<T: Clone, E: Clone> Script<T, E> {
    pub fn new(replies: impl IntoIterator<Item = Reply<T, E>>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ScriptState {
                queue: replies.into_iter().collect(),
                last: None,
                calls: 0,
            })),
        }
    }

    pub fn calls(&self) -> usize {
        self.lock().calls
    }

    fn next(&self) -> Reply<T, E> {
        let mut state = self.lock();
        state.calls += 1;
        match state.queue.pop_front() {
            Some(reply) => {
                state.last = Some(reply.clone());
                reply
            }
            None => state.last.clone().unwrap_or(Reply::Never),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ScriptState<T, E>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

type Log<T> = Arc<Mutex<Vec<T>>>;

fn push<T>(log: &Log<T>, entry: T) {
    log.lock().unwrap_or_else(PoisonError::into_inner).push(entry);
}

fn entries<T: Clone>(log: &Log<T>) -> Vec<T> {
    log.lock().unwrap_or_else(PoisonError::into_inner).clone()
}

#[derive(Clone, Debug)]
pub struct ScriptedPlatform {
    init: Script<(), ServiceError>,
    access_token: Option<String>,
    app_ids: Log<String>,
}

impl ScriptedPlatform {
    pub fn new(
        init: impl IntoIterator<Item = Reply<(), ServiceError>>,
        access_token: Option<&str>,
    ) -> Self {
        Self {
            init: Script::new(init),
            access_token: access_token.map(str::to_string),
            app_ids: Log::default(),
        }
    }

    pub fn init_calls(&self) -> usize {
        self.init.calls()
    }

    pub fn app_ids(&self) -> Vec<String> {
        entries(&self.app_ids)
    }
}

impl PlatformSession for ScriptedPlatform {
    async fn init(&self, app_id: &str) -> std::result::Result<(), ServiceError> {
        push(&self.app_ids, app_id.to_string());
        self.init.next().play().await
    }

    fn access_token(&self) -> Option<String> {
        self.access_token.clone()
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ExchangeCall {
    pub platform_token: String,
    pub referral_code: Option<String>,
}

#[derive(Clone, Debug)]
pub struct ScriptedAuth {
    exchange: Script<AuthSession, AuthError>,
    calls: Log<ExchangeCall>,
}

impl ScriptedAuth {
    pub fn new(exchange: impl IntoIterator<Item = Reply<AuthSession, AuthError>>) -> Self {
        Self {
            exchange: Script::new(exchange),
            calls: Log::default(),
        }
    }

    pub fn calls(&self) -> Vec<ExchangeCall> {
        entries(&self.calls)
    }
}

impl AuthGateway for ScriptedAuth {
    async fn exchange(
        &self,
        platform_token: &str,
        referral_code: Option<&str>,
    ) -> std::result::Result<AuthSession, AuthError> {
        push(
            &self.calls,
            ExchangeCall {
                platform_token: platform_token.to_string(),
                referral_code: referral_code.map(str::to_string),
            },
        );
        self.exchange.next().play().await
    }
}

#[derive(Clone, Debug)]
pub struct ScriptedProfiles {
    load: Script<Profile, ProfileError>,
    timezone: Script<(), ServiceError>,
    promotion: Script<bool, ServiceError>,
    loaded_with: Log<String>,
    timezone_updates: Log<String>,
    promotion_checks: Log<SpecialKind>,
}

impl ScriptedProfiles {
    pub fn new(load: impl IntoIterator<Item = Reply<Profile, ProfileError>>) -> Self {
        Self {
            load: Script::new(load),
            timezone: Script::new([Reply::Ok(())]),
            promotion: Script::new([Reply::Ok(false)]),
            loaded_with: Log::default(),
            timezone_updates: Log::default(),
            promotion_checks: Log::default(),
        }
    }

    pub fn with_timezone(
        mut self,
        replies: impl IntoIterator<Item = Reply<(), ServiceError>>,
    ) -> Self {
        self.timezone = Script::new(replies);
        self
    }

    pub fn with_promotion(
        mut self,
        replies: impl IntoIterator<Item = Reply<bool, ServiceError>>,
    ) -> Self {
        self.promotion = Script::new(replies);
        self
    }

    /// Tokens each profile fetch was issued with, in call order.
    pub fn loaded_with(&self) -> Vec<String> {
        entries(&self.loaded_with)
    }

    pub fn timezone_updates(&self) -> Vec<String> {
        entries(&self.timezone_updates)
    }

    pub fn promotion_checks(&self) -> Vec<SpecialKind> {
        entries(&self.promotion_checks)
    }
}

impl ProfileLoader for ScriptedProfiles {
    async fn load(&self, token: &str) -> std::result::Result<Profile, ProfileError> {
        push(&self.loaded_with, token.to_string());
        self.load.next().play().await
    }

    async fn update_timezone(
        &self,
        _token: &str,
        timezone: &str,
    ) -> std::result::Result<(), ServiceError> {
        push(&self.timezone_updates, timezone.to_string());
        self.timezone.next().play().await
    }

    async fn pending_promotion(
        &self,
        _token: &str,
        kind: SpecialKind,
    ) -> std::result::Result<bool, ServiceError> {
        push(&self.promotion_checks, kind);
        self.promotion.next().play().await
    }
}

#[derive(Clone, Debug, Default)]
pub struct RecordingNavigator {
    paths: Log<String>,
}

impl RecordingNavigator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn paths(&self) -> Vec<String> {
        entries(&self.paths)
    }
}

impl Navigator for RecordingNavigator {
    fn navigate(&self, path: &str) {
        push(&self.paths, path.to_string());
    }
}

/// JSON description of how every collaborator answers during a dry run.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Scenario {
    pub stored_token: Option<String>,
    pub platform_token: Option<String>,
    pub init: Vec<Reply<(), ServiceError>>,
    pub exchange: Vec<Reply<AuthSession, AuthError>>,
    pub profile: Vec<Reply<Profile, ProfileError>>,
    pub timezone: Vec<Reply<(), ServiceError>>,
    pub promotion: Vec<Reply<bool, ServiceError>>,
}

impl Default for Scenario {
    fn default() -> Self {
        Self {
            stored_token: None,
            platform_token: Some("platform-token".to_string()),
            init: vec![Reply::Ok(())],
            exchange: vec![Reply::Ok(AuthSession {
                token: "session-token".to_string(),
                account: AccountStatus::Existing,
            })],
            profile: vec![Reply::Ok(Profile {
                user_id: "dry-run".to_string(),
                ..Profile::default()
            })],
            timezone: vec![Reply::Ok(())],
            promotion: vec![Reply::Ok(false)],
        }
    }
}

impl Scenario {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .wrap_err_with(|| format!("failed to read scenario {}", path.display()))?;
        serde_json::from_str(&contents)
            .wrap_err_with(|| format!("invalid scenario payload in {}", path.display()))
    }

    pub fn platform(&self) -> ScriptedPlatform {
        ScriptedPlatform::new(self.init.clone(), self.platform_token.as_deref())
    }

    pub fn auth(&self) -> ScriptedAuth {
        ScriptedAuth::new(self.exchange.clone())
    }

    pub fn profiles(&self) -> ScriptedProfiles {
        ScriptedProfiles::new(self.profile.clone())
            .with_timezone(self.timezone.clone())
            .with_promotion(self.promotion.clone())
    }
}
