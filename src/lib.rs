pub mod classifier;

pub mod config;

pub mod error;

pub mod gateway;

pub mod locale;

pub mod orchestrator;

pub mod platform;

pub mod referral;

pub mod scripted;

pub mod session;

pub mod storage;

pub mod timeout;

pub use config::BootstrapConfig;
pub use error::{
    BootstrapError,
    Result,
};
pub use orchestrator::{
    BootstrapPhase,
    BootstrapReport,
    Collaborators,
    MountGuard,
    NavigationTarget,
    Orchestrator,
    UiPhase,
};
pub use platform::Environment;
pub use referral::{
    Referral,
    SpecialKind,
};
