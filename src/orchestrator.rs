use crate::{
    classifier::{
        Severity,
        classify,
    },
    config::{
        BootstrapConfig,
        NavigationRoutes,
    },
    error::BootstrapError,
    gateway::{
        AccountStatus,
        AuthGateway,
        Navigator,
        Profile,
        ProfileLoader,
    },
    locale::{
        FatalReason,
        Locale,
    },
    platform::{
        Environment,
        PlatformSession,
    },
    referral::{
        self,
        Referral,
    },
    session::{
        SessionState,
        SessionView,
        TokenStore,
    },
    storage::KeyValueStore,
    timeout::{
        Step,
        race,
    },
};
use chrono::{
    DateTime,
    Utc,
};
use serde::Serialize;
use std::sync::{
    Arc,
    Mutex,
    MutexGuard,
    PoisonError,
    atomic::{
        AtomicBool,
        Ordering,
    },
};
use tracing::{
    debug,
    error,
    info,
    warn,
};

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BootstrapPhase {
    #[default]
    Idle,
    DetectingEnvironment,
    InitializingPlatform,
    ResolvingToken,
    Authenticating,
    LoadingProfile,
    NeedsCharacter,
    Ready,
    ServerUnavailable,
    Fatal,
}

impl BootstrapPhase {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            BootstrapPhase::NeedsCharacter
                | BootstrapPhase::Ready
                | BootstrapPhase::ServerUnavailable
                | BootstrapPhase::Fatal
        )
    }

    /// Forward-only, except the two retry edges out of `LoadingProfile`.
    pub fn can_transition_to(self, next: BootstrapPhase) -> bool {
        if self.is_terminal() {
            return false;
        }
        match (self, next) {
            (BootstrapPhase::LoadingProfile, BootstrapPhase::ResolvingToken)
            | (BootstrapPhase::LoadingProfile, BootstrapPhase::LoadingProfile) => true,
            _ => next.rank() > self.rank(),
        }
    }

    fn rank(self) -> u8 {
        match self {
            BootstrapPhase::Idle => 0,
            BootstrapPhase::DetectingEnvironment => 1,
            BootstrapPhase::InitializingPlatform => 2,
            BootstrapPhase::ResolvingToken => 3,
            BootstrapPhase::Authenticating => 4,
            BootstrapPhase::LoadingProfile => 5,
            BootstrapPhase::NeedsCharacter
            | BootstrapPhase::Ready
            | BootstrapPhase::ServerUnavailable
            | BootstrapPhase::Fatal => 6,
        }
    }
}

/// What the UI shows for the current phase.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UiPhase {
    Splash,
    Error { message: String },
    Maintenance,
    Proceed,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NavigationTarget {
    ConnectWallet,
    CharacterCreation,
    Promotion,
    Home,
}

impl NavigationTarget {
    pub fn path(self, routes: &NavigationRoutes) -> &str {
        match self {
            NavigationTarget::ConnectWallet => &routes.connect,
            NavigationTarget::CharacterCreation => &routes.create_character,
            NavigationTarget::Promotion => &routes.promotion,
            NavigationTarget::Home => &routes.home,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize)]
pub struct RetryBudget {
    pub auth_retries: u32,
    pub profile_retries: u32,
}

/// Cleared when the UI that started the run goes away. Once cleared, the run
/// applies no more state writes, token writes or navigation.
#[derive(Clone, Debug)]
pub struct MountGuard(Arc<AtomicBool>);

impl Default for MountGuard {
    fn default() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }
}

impl MountGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_mounted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn unmount(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct BootstrapReport {
    pub phase: BootstrapPhase,
    pub ui: UiPhase,
    pub navigation: Option<NavigationTarget>,
    pub navigation_path: Option<String>,
    pub fatal: Option<FatalReason>,
    pub retries: RetryBudget,
    pub history: Vec<BootstrapPhase>,
    pub mounted: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

pub struct Collaborators<Platform, Auth, Profiles, Store, Tokens, Nav> {
    pub platform: Platform,
    pub auth: Auth,
    pub profiles: Profiles,
    pub store: Store,
    pub tokens: Tokens,
    pub navigator: Nav,
}

#[derive(Debug, Default)]
struct RunState {
    phase: BootstrapPhase,
    history: Vec<BootstrapPhase>,
    budget: RetryBudget,
    locale: Locale,
    fatal: Option<FatalReason>,
    message: Option<String>,
    navigation: Option<NavigationTarget>,
}

impl RunState {
    fn ui_phase(&self) -> UiPhase {
        match self.phase {
            BootstrapPhase::ServerUnavailable => UiPhase::Maintenance,
            BootstrapPhase::Fatal => UiPhase::Error {
                message: self.message.clone().unwrap_or_default(),
            },
            BootstrapPhase::Ready | BootstrapPhase::NeedsCharacter => UiPhase::Proceed,
            _ => UiPhase::Splash,
        }
    }
}

/// The run was abandoned because the mount guard was cleared.
#[derive(Debug)]
struct Unmounted;

type Flow<T = ()> = Result<T, Unmounted>;

enum Credential {
    Stored(String),
    Platform(String),
}

/// Drives one session bootstrap from launch URL to a single terminal phase.
pub struct Orchestrator<Platform, Auth, Profiles, Store, Tokens, Nav> {
    config: BootstrapConfig,
    environment: Environment,
    collaborators: Collaborators<Platform, Auth, Profiles, Store, Tokens, Nav>,
    session: SessionState,
    guard: MountGuard,
    started: AtomicBool,
    state: Mutex<RunState>,
}

impl<Platform, Auth, Profiles, Store, Tokens, Nav>
    Orchestrator<Platform, Auth, Profiles, Store, Tokens, Nav>
{
    pub fn new(
        config: BootstrapConfig,
        environment: Environment,
        collaborators: Collaborators<Platform, Auth, Profiles, Store, Tokens, Nav>,
    ) -> Self {
        Self {
            config,
            environment,
            collaborators,
            session: SessionState::new(),
            guard: MountGuard::new(),
            started: AtomicBool::new(false),
            state: Mutex::new(RunState::default()),
        }
    }

    pub fn with_session(mut self, session: SessionState) -> Self {
        self.session = session;
        self
    }

    pub fn guard(&self) -> MountGuard {
        self.guard.clone()
    }

    pub fn unmount(&self) {
        self.guard.unmount();
    }

    pub fn session(&self) -> SessionView {
        self.session.view()
    }

    pub fn collaborators(
        &self,
    ) -> &Collaborators<Platform, Auth, Profiles, Store, Tokens, Nav> {
        &self.collaborators
    }

    pub fn phase(&self) -> BootstrapPhase {
        self.lock().phase
    }

    pub fn ui_phase(&self) -> UiPhase {
        self.lock().ui_phase()
    }

    pub fn retry_budget(&self) -> RetryBudget {
        self.lock().budget
    }

    fn lock(&self) -> MutexGuard<'_, RunState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_mounted(&self) -> Flow {
        if self.guard.is_mounted() {
            Ok(())
        } else {
            Err(Unmounted)
        }
    }

    fn enter(&self, next: BootstrapPhase) -> Flow {
        self.transition(next, |_| {})
    }

    fn transition(&self, next: BootstrapPhase, update: impl FnOnce(&mut RunState)) -> Flow {
        if let Err(unmounted) = self.ensure_mounted() {
            debug!(?next, "unmounted; discarding transition");
            return Err(unmounted);
        }
        let mut state = self.lock();
        debug_assert!(
            state.phase.can_transition_to(next),
            "illegal bootstrap transition {:?} -> {next:?}",
            state.phase
        );
        info!(from = ?state.phase, to = ?next, "bootstrap transition");
        state.phase = next;
        state.history.push(next);
        update(&mut *state);
        Ok(())
    }

    fn fail(&self, reason: FatalReason) -> Flow {
        let host_name = &self.config.host_name;
        self.transition(BootstrapPhase::Fatal, |state| {
            state.fatal = Some(reason);
            state.message = Some(state.locale.message(reason, host_name));
        })
    }

    fn try_auth_retry(&self) -> Flow<bool> {
        self.ensure_mounted()?;
        let mut state = self.lock();
        if state.budget.auth_retries < self.config.max_auth_retries {
            state.budget.auth_retries += 1;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn try_profile_retry(&self) -> Flow<bool> {
        self.ensure_mounted()?;
        let mut state = self.lock();
        if state.budget.profile_retries < self.config.max_profile_retries {
            state.budget.profile_retries += 1;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn report(&self, started_at: DateTime<Utc>) -> BootstrapReport {
        let state = self.lock();
        BootstrapReport {
            phase: state.phase,
            ui: state.ui_phase(),
            navigation: state.navigation,
            navigation_path: state
                .navigation
                .map(|target| target.path(&self.config.routes).to_string()),
            fatal: state.fatal,
            retries: state.budget,
            history: state.history.clone(),
            mounted: self.guard.is_mounted(),
            started_at,
            finished_at: Utc::now(),
        }
    }
}

impl<Platform, Auth, Profiles, Store, Tokens, Nav>
    Orchestrator<Platform, Auth, Profiles, Store, Tokens, Nav>
where
    Platform: PlatformSession,
    Auth: AuthGateway,
    Profiles: ProfileLoader,
    Store: KeyValueStore,
    Tokens: TokenStore,
    Nav: Navigator,
{
    /// Runs the bootstrap. Only the first call does anything; later calls
    /// return `None` straight away.
    pub async fn start(&self) -> Option<BootstrapReport> {
        if self.started.swap(true, Ordering::SeqCst) {
            debug!("bootstrap already started; ignoring");
            return None;
        }
        let started_at = Utc::now();
        if self.run().await.is_err() {
            info!(phase = ?self.phase(), "bootstrap abandoned after unmount");
        }
        Some(self.report(started_at))
    }

    async fn run(&self) -> Flow {
        self.enter(BootstrapPhase::DetectingEnvironment)?;
        let referral = referral::resolve_and_persist(
            &self.environment.url,
            &self.config.referral,
            &self.collaborators.store,
        );
        let locale =
            Locale::resolve(&self.environment.language_tag, self.config.default_locale);
        self.lock().locale = locale;
        self.session.set_locale(locale);
        self.session.set_referral(referral.clone());
        info!(%locale, ?referral, "environment detected");

        if !self
            .environment
            .is_in_host(&self.config.host_user_agent_marker)
        {
            info!("outside the host container; skipping platform login");
            return self.finish(BootstrapPhase::Ready, NavigationTarget::ConnectWallet);
        }

        self.enter(BootstrapPhase::InitializingPlatform)?;
        let init = race(
            Step::PlatformInit,
            self.config.step_timeout(),
            self.collaborators.platform.init(&self.config.app_id),
        )
        .await;
        if let Err(err) = init {
            return match classify(&err) {
                Severity::Transient => {
                    warn!(%err, "platform handshake unavailable");
                    self.enter(BootstrapPhase::ServerUnavailable)
                }
                Severity::Fatal | Severity::Other => {
                    error!(%err, "platform handshake failed");
                    self.clear_tokens()?;
                    self.fail(FatalReason::InitializationFailed)
                }
            };
        }

        'session: loop {
            self.enter(BootstrapPhase::ResolvingToken)?;
            let credential = match self.collaborators.tokens.token() {
                Some(token) => Credential::Stored(token),
                None => match self.collaborators.platform.access_token() {
                    Some(token) => Credential::Platform(token),
                    None => {
                        warn!("no stored or host credential");
                        return self.fail(FatalReason::HostLoginRequired);
                    }
                },
            };

            self.enter(BootstrapPhase::Authenticating)?;
            let token = match credential {
                Credential::Stored(token) => {
                    debug!("resuming stored session");
                    self.ensure_mounted()?;
                    self.session.set_account(AccountStatus::Existing);
                    token
                }
                Credential::Platform(platform_token) => {
                    let exchanged = race(
                        Step::TokenExchange,
                        self.config.step_timeout(),
                        self.collaborators
                            .auth
                            .exchange(&platform_token, referral.exchange_code()),
                    )
                    .await;
                    match exchanged {
                        Ok(session) => {
                            self.store_token(&session.token)?;
                            self.session.set_account(session.account);
                            if session.account == AccountStatus::New {
                                return self.finish(
                                    BootstrapPhase::NeedsCharacter,
                                    NavigationTarget::CharacterCreation,
                                );
                            }
                            session.token
                        }
                        Err(err) => return self.fail_authentication(&err),
                    }
                }
            };

            // the generic retry clears the persisted credential first
            let mut cleared = false;
            loop {
                self.enter(BootstrapPhase::LoadingProfile)?;
                let loaded = race(
                    Step::ProfileFetch,
                    self.config.step_timeout(),
                    self.collaborators.profiles.load(&token),
                )
                .await;
                let err = match loaded {
                    Ok(profile) => {
                        if cleared {
                            self.store_token(&token)?;
                        }
                        return self.complete(profile, &token).await;
                    }
                    Err(err) => err,
                };
                if classify(&err) == Severity::Transient {
                    warn!(%err, "profile backend unavailable");
                    return self.enter(BootstrapPhase::ServerUnavailable);
                }
                match err {
                    BootstrapError::CharacterRequired => {
                        return self.finish(
                            BootstrapPhase::NeedsCharacter,
                            NavigationTarget::CharacterCreation,
                        );
                    }
                    BootstrapError::SessionExpired(_) => {
                        self.clear_tokens()?;
                        if self.try_auth_retry()? {
                            warn!(
                                retries = self.retry_budget().auth_retries,
                                "session expired; re-authenticating"
                            );
                            continue 'session;
                        }
                        warn!("session retries exhausted; staying on profile load");
                        return Ok(());
                    }
                    other => {
                        if self.try_profile_retry()? {
                            warn!(err = %other, "profile load failed; retrying once");
                            self.clear_tokens()?;
                            cleared = true;
                            continue;
                        }
                        error!(err = %other, "profile load failed after retry");
                        return self.fail(FatalReason::RetryRequired);
                    }
                }
            }
        }
    }

    fn fail_authentication(&self, err: &BootstrapError) -> Flow {
        match classify(err) {
            Severity::Transient => {
                warn!(%err, "auth backend unavailable");
                self.enter(BootstrapPhase::ServerUnavailable)
            }
            Severity::Fatal => {
                error!(%err, "credential exchange could not reach the network");
                self.fail(FatalReason::NetworkError)
            }
            Severity::Other => {
                error!(%err, "credential exchange rejected");
                self.fail(FatalReason::AuthenticationFailed)
            }
        }
    }

    /// Profile is in hand. The promotion check decides where `Ready` lands;
    /// timezone reconciliation runs after navigation so it never holds the
    /// user on the splash screen.
    async fn complete(&self, profile: Profile, token: &str) -> Flow {
        self.ensure_mounted()?;
        self.session.set_profile(profile.clone());
        let target = self.promotion_target(token).await;
        self.finish(BootstrapPhase::Ready, target)?;
        self.sync_timezone(token, &profile).await;
        Ok(())
    }

    async fn sync_timezone(&self, token: &str, profile: &Profile) {
        let local = self.environment.timezone.as_str();
        if local.is_empty() || profile.timezone.as_deref() == Some(local) {
            return;
        }
        if !self.guard.is_mounted() {
            debug!("unmounted; skipping timezone reconciliation");
            return;
        }
        let updated = race(
            Step::TimezoneSync,
            self.config.step_timeout(),
            self.collaborators.profiles.update_timezone(token, local),
        )
        .await;
        match updated {
            Ok(()) => info!(timezone = local, "timezone reconciled"),
            Err(err) => warn!(%err, "timezone reconciliation failed; ignoring"),
        }
    }

    async fn promotion_target(&self, token: &str) -> NavigationTarget {
        let pending =
            match Referral::load(&self.collaborators.store, &self.config.referral) {
                Ok(referral) => referral,
                Err(err) => {
                    warn!(%err, "failed to read pending referral");
                    return NavigationTarget::Home;
                }
            };
        let Some(kind) = pending
            .special_kind()
            .filter(|_| pending.has_pending_promotion())
        else {
            return NavigationTarget::Home;
        };
        let checked = race(
            Step::PromotionCheck,
            self.config.step_timeout(),
            self.collaborators.profiles.pending_promotion(token, kind),
        )
        .await;
        match checked {
            Ok(true) => NavigationTarget::Promotion,
            Ok(false) => NavigationTarget::Home,
            Err(err) => {
                warn!(%err, %kind, "promotion check failed; using default landing");
                NavigationTarget::Home
            }
        }
    }

    fn finish(&self, phase: BootstrapPhase, target: NavigationTarget) -> Flow {
        self.transition(phase, |state| state.navigation = Some(target))?;
        self.ensure_mounted()?;
        let path = target.path(&self.config.routes);
        info!(path, "navigating");
        self.collaborators.navigator.navigate(path);
        Ok(())
    }

    fn store_token(&self, token: &str) -> Flow {
        self.ensure_mounted()?;
        if let Err(err) = self.collaborators.tokens.store(token) {
            warn!(%err, "failed to persist credential");
        }
        Ok(())
    }

    fn clear_tokens(&self) -> Flow {
        self.ensure_mounted()?;
        if let Err(err) = self.collaborators.tokens.clear() {
            warn!(%err, "failed to clear credential");
        }
        Ok(())
    }
}
