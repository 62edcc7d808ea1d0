use color_eyre::eyre::{
    Result,
    WrapErr,
    eyre,
};
use minigame_bootstrap::{
    BootstrapConfig,
    Collaborators,
    Environment,
    Orchestrator,
    scripted::{
        RecordingNavigator,
        Scenario,
    },
    session::{
        StoredTokens,
        TokenStore,
    },
    storage::{
        FileStore,
        InMemoryStore,
        KeyValueStore,
    },
};
use std::{
    path::{
        Path,
        PathBuf,
    },
    sync::OnceLock,
};
use tracing_appender::{
    non_blocking::WorkerGuard,
    rolling,
};
use tracing_subscriber::{
    EnvFilter,
    fmt,
};
use url::Url;

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) Line/14.1.0 LIFF";
const DEFAULT_LANGUAGE: &str = "en-US";
const DEFAULT_TIMEZONE: &str = "UTC";

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

struct CliArgs {
    url: Url,
    scenario: Option<PathBuf>,
    config: Option<PathBuf>,
    store: Option<PathBuf>,
    language: String,
    timezone: String,
    user_agent: String,
    log_dir: Option<PathBuf>,
}

fn print_usage_and_exit() -> ! {
    println!(
        "Usage: minigame-bootstrap --url <url> [--scenario <file>] [--config <file>]\n\
         [--store <file>] [--language <tag>] [--timezone <tz>] [--user-agent <ua>]\n\
         [--log-dir <dir>]\n\
         \n\
         Flags:\n\
           --url <url>         Launch URL the app was opened with\n\
           --scenario <file>   JSON scenario scripting every backend/host reply\n\
           --config <file>     JSON bootstrap config (defaults built in)\n\
           --store <file>      Persist storage slots to this JSON file between runs\n\
           --language <tag>    Browser language tag (default {DEFAULT_LANGUAGE})\n\
           --timezone <tz>     Local timezone identifier (default {DEFAULT_TIMEZONE})\n\
           --user-agent <ua>   Browser user agent (default: host in-app browser)\n\
           --log-dir <dir>     Write daily-rolling logs into this directory"
    );
    std::process::exit(0);
}

fn expand_path(raw: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(raw).into_owned())
}

fn parse_cli_args() -> Result<CliArgs> {
    let mut args = std::env::args().skip(1);
    let mut url: Option<Url> = None;
    let mut scenario = None;
    let mut config = None;
    let mut store = None;
    let mut language = None;
    let mut timezone = None;
    let mut user_agent = None;
    let mut log_dir = None;

    fn once<T>(slot: &mut Option<T>, flag: &str, value: T) -> Result<()> {
        if slot.is_some() {
            return Err(eyre!("{flag} may only be specified once"));
        }
        *slot = Some(value);
        Ok(())
    }

    while let Some(arg) = args.next() {
        let flag = arg.as_str();
        if matches!(flag, "--help" | "-h") {
            print_usage_and_exit();
        }
        let value = args
            .next()
            .ok_or_else(|| eyre!("{flag} requires an argument"))?;
        match flag {
            "--url" => {
                let parsed = Url::parse(&value)
                    .wrap_err_with(|| format!("--url is not a valid URL: {value}"))?;
                once(&mut url, flag, parsed)?;
            }
            "--scenario" => once(&mut scenario, flag, expand_path(&value))?,
            "--config" => once(&mut config, flag, expand_path(&value))?,
            "--store" => once(&mut store, flag, expand_path(&value))?,
            "--language" => once(&mut language, flag, value)?,
            "--timezone" => once(&mut timezone, flag, value)?,
            "--user-agent" => once(&mut user_agent, flag, value)?,
            "--log-dir" => once(&mut log_dir, flag, expand_path(&value))?,
            other => return Err(eyre!("Unknown argument: {other}")),
        }
    }

    Ok(CliArgs {
        url: url.ok_or_else(|| eyre!("Specify the launch URL with --url <url>"))?,
        scenario,
        config,
        store,
        language: language.unwrap_or_else(|| DEFAULT_LANGUAGE.to_string()),
        timezone: timezone.unwrap_or_else(|| DEFAULT_TIMEZONE.to_string()),
        user_agent: user_agent.unwrap_or_else(|| DEFAULT_USER_AGENT.to_string()),
        log_dir,
    })
}

/// Logs go to a daily rolling file under `log_dir`, or to stderr so stdout
/// only ever carries the report.
fn init_tracing(log_dir: Option<&Path>) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match log_dir {
        Some(dir) => {
            let appender = rolling::daily(dir, "bootstrap.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let _ = LOG_GUARD.set(guard);
            let _ = fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .try_init();
        }
        None => {
            let _ = fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .try_init();
        }
    }
}

async fn run_with_store<S>(args: CliArgs, config: BootstrapConfig, store: S) -> Result<()>
where
    S: KeyValueStore + Clone,
{
    let scenario = match &args.scenario {
        Some(path) => Scenario::load(path)?,
        None => Scenario::default(),
    };
    let tokens = StoredTokens::new(store.clone(), config.token_key.clone());
    if let Some(token) = &scenario.stored_token {
        tokens
            .store(token)
            .wrap_err("failed to seed stored credential")?;
    }
    let environment = Environment {
        url: args.url,
        language_tag: args.language,
        timezone: args.timezone,
        user_agent: args.user_agent,
    };
    let orchestrator = Orchestrator::new(
        config,
        environment,
        Collaborators {
            platform: scenario.platform(),
            auth: scenario.auth(),
            profiles: scenario.profiles(),
            store,
            tokens,
            navigator: RecordingNavigator::new(),
        },
    );
    let report = orchestrator
        .start()
        .await
        .ok_or_else(|| eyre!("bootstrap was already started"))?;
    let json =
        serde_json::to_string_pretty(&report).wrap_err("failed to serialize report")?;
    println!("{json}");
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let args = parse_cli_args()?;
    init_tracing(args.log_dir.as_deref());
    tracing::info!(url = %args.url, "starting bootstrap dry run");
    let config = match &args.config {
        Some(path) => BootstrapConfig::load(path)?,
        None => BootstrapConfig::default(),
    }
    .with_env_overrides()?;
    match args.store.clone() {
        Some(path) => {
            let store = FileStore::open(&path)
                .wrap_err_with(|| format!("failed to open store {}", path.display()))?;
            run_with_store(args, config, store).await
        }
        None => run_with_store(args, config, InMemoryStore::new()).await,
    }
}
