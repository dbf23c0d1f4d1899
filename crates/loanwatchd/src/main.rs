// # loanwatchd - Library Loan Daemon
//
// Thin integration layer: all loan logic lives in loanwatch-core and the
// portal specifics in loanwatch-provider-bibliotheek.
//
// The loanwatchd daemon is responsible for:
// 1. Reading configuration from environment variables
// 2. Initializing logging and the runtime
// 3. Building the library service, state store and engine
// 4. Consuming engine events (logging, optional auto-extension)
// 5. Shutting down cleanly on SIGTERM/SIGINT
//
// ## Configuration
//
// All configuration is done via environment variables:
//
// ### Service
// - `LOANWATCH_USERNAME`: Portal login (required)
// - `LOANWATCH_PASSWORD`: Portal password (required)
// - `LOANWATCH_BASE_URL`: Portal base URL override (optional)
// - `LOANWATCH_AUTH_BASE_URL`: Login base URL override (optional, follows
//   `LOANWATCH_BASE_URL` when unset)
// - `LOANWATCH_MODE`: `dry-run` fetches renewal forms without submitting them
//
// ### State Store
// - `LOANWATCH_STATE_STORE_TYPE`: Type of state store (file, memory)
// - `LOANWATCH_STATE_STORE_PATH`: Path to state file (for file store)
//
// ### Engine
// - `LOANWATCH_POLL_INTERVAL_SECS`: Seconds between refreshes
// - `LOANWATCH_WARNING_DAYS`: Days left at which a loan is "expiring soon"
// - `LOANWATCH_AUTO_EXTEND_DAYS`: Renew loans with at most this many days
//   left whenever one starts expiring (optional)
//
// ### Logging
// - `LOANWATCH_LOG_LEVEL`: trace, debug, info, warn, error
//
// ## Example
//
// ```bash
// export LOANWATCH_USERNAME=lezer@example.be
// export LOANWATCH_PASSWORD=...
// export LOANWATCH_STATE_STORE_TYPE=file
// export LOANWATCH_STATE_STORE_PATH=/var/lib/loanwatch/state.json
// export LOANWATCH_AUTO_EXTEND_DAYS=2
//
// loanwatchd
// ```

use anyhow::{Context, Result};
use loanwatch_core::config::{EngineConfig, LoanwatchConfig, ServiceConfig, StateStoreConfig};
use loanwatch_core::{
    EngineEvent, FileStateStore, LibraryService, LoanEngine, LoanEvent, MemoryStateStore, StateStore,
};
use loanwatch_provider_bibliotheek::BibliotheekService;
use std::env;
use std::process::ExitCode;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{Level, debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

/// Accepted range for `LOANWATCH_POLL_INTERVAL_SECS`
const POLL_INTERVAL_RANGE: std::ops::RangeInclusive<u64> = 60..=86_400;

/// Accepted range for the day thresholds
const DAYS_RANGE: std::ops::RangeInclusive<i64> = 0..=60;

/// Upper bound on draining the event consumer after the engine stopped
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Exit codes for different termination scenarios
///
/// These codes follow systemd conventions:
/// - 0: Clean shutdown
/// - 1: Configuration or startup error
/// - 2: Runtime error (unexpected)
#[derive(Debug, Clone, Copy)]
enum LoanwatchExitCode {
    /// Clean shutdown (normal exit)
    CleanShutdown = 0,
    /// Configuration error or startup failure
    ConfigError = 1,
    /// Runtime error (unexpected failure)
    RuntimeError = 2,
}

impl From<LoanwatchExitCode> for ExitCode {
    fn from(code: LoanwatchExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

/// Application configuration
struct Config {
    username: String,
    password: String,
    base_url: Option<String>,
    auth_base_url: Option<String>,
    dry_run: bool,
    state_store_type: String,
    state_store_path: Option<String>,
    poll_interval_secs: Option<u64>,
    warning_days: Option<i64>,
    auto_extend_days: Option<i64>,
    log_level: String,
}

// Keeps the password out of logs
impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("username", &self.username)
            .field("password", &"<REDACTED>")
            .field("base_url", &self.base_url)
            .field("auth_base_url", &self.auth_base_url)
            .field("dry_run", &self.dry_run)
            .field("state_store_type", &self.state_store_type)
            .field("state_store_path", &self.state_store_path)
            .field("poll_interval_secs", &self.poll_interval_secs)
            .field("warning_days", &self.warning_days)
            .field("auto_extend_days", &self.auto_extend_days)
            .field("log_level", &self.log_level)
            .finish()
    }
}

impl Config {
    /// Load configuration from environment variables
    fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through a variable lookup
    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        Ok(Self {
            username: var("LOANWATCH_USERNAME").context("LOANWATCH_USERNAME is not set")?,
            password: var("LOANWATCH_PASSWORD").context("LOANWATCH_PASSWORD is not set")?,
            base_url: var("LOANWATCH_BASE_URL"),
            auth_base_url: var("LOANWATCH_AUTH_BASE_URL"),
            dry_run: var("LOANWATCH_MODE").is_some_and(|mode| mode.eq_ignore_ascii_case("dry-run")),
            state_store_type: var("LOANWATCH_STATE_STORE_TYPE").unwrap_or_else(|| "file".to_string()),
            state_store_path: var("LOANWATCH_STATE_STORE_PATH"),
            poll_interval_secs: parse_number(&var, "LOANWATCH_POLL_INTERVAL_SECS")?,
            warning_days: parse_number(&var, "LOANWATCH_WARNING_DAYS")?,
            auto_extend_days: parse_number(&var, "LOANWATCH_AUTO_EXTEND_DAYS")?,
            log_level: var("LOANWATCH_LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
        })
    }

    /// Validate the configuration
    ///
    /// Checks value ranges, enumerations and the state file location.
    /// Credentials are only screened for placeholders.
    fn validate(&self) -> Result<()> {
        if self.username.trim().is_empty() {
            anyhow::bail!(
                "LOANWATCH_USERNAME is required. \
                Set it via: export LOANWATCH_USERNAME=you@example.be"
            );
        }

        // Check for obvious placeholder passwords (common mistake)
        let password_lower = self.password.to_lowercase();
        if password_lower.contains("your_password")
            || password_lower.contains("replace_me")
            || password_lower == "password"
        {
            anyhow::bail!(
                "LOANWATCH_PASSWORD appears to be a placeholder. \
                Use the password of your library account."
            );
        }

        for (key, url) in [
            ("LOANWATCH_BASE_URL", &self.base_url),
            ("LOANWATCH_AUTH_BASE_URL", &self.auth_base_url),
        ] {
            if let Some(url) = url
                && !url.starts_with("https://")
                && !url.starts_with("http://")
            {
                anyhow::bail!("{} must use HTTP or HTTPS scheme. Got: {}", key, url);
            }
        }

        // Validate state store type
        match self.state_store_type.as_str() {
            "file" | "memory" => {}
            _ => anyhow::bail!(
                "LOANWATCH_STATE_STORE_TYPE '{}' is not supported. \
                Supported types: file, memory",
                self.state_store_type
            ),
        }

        // Validate state store path for file store
        if self.state_store_type == "file" {
            let Some(ref path) = self.state_store_path else {
                anyhow::bail!(
                    "LOANWATCH_STATE_STORE_PATH is required when LOANWATCH_STATE_STORE_TYPE=file. \
                    Set it via: export LOANWATCH_STATE_STORE_PATH=/var/lib/loanwatch/state.json"
                );
            };

            if let Some(parent) = std::path::Path::new(path).parent()
                && !parent.as_os_str().is_empty()
                && !parent.exists()
            {
                anyhow::bail!(
                    "LOANWATCH_STATE_STORE_PATH parent directory does not exist: {}. \
                        Create it first: sudo mkdir -p {}",
                    parent.display(),
                    parent.display()
                );
            }
        }

        // Validate numeric ranges
        if let Some(interval) = self.poll_interval_secs
            && !POLL_INTERVAL_RANGE.contains(&interval)
        {
            anyhow::bail!(
                "LOANWATCH_POLL_INTERVAL_SECS must be between {} and {} seconds. Got: {}",
                POLL_INTERVAL_RANGE.start(),
                POLL_INTERVAL_RANGE.end(),
                interval
            );
        }

        for (name, value) in [
            ("LOANWATCH_WARNING_DAYS", self.warning_days),
            ("LOANWATCH_AUTO_EXTEND_DAYS", self.auto_extend_days),
        ] {
            if let Some(days) = value
                && !DAYS_RANGE.contains(&days)
            {
                anyhow::bail!(
                    "{} must be between {} and {} days. Got: {}",
                    name,
                    DAYS_RANGE.start(),
                    DAYS_RANGE.end(),
                    days
                );
            }
        }

        // Validate log level
        self.log_level()?;

        Ok(())
    }

    fn log_level(&self) -> Result<Level> {
        match self.log_level.to_lowercase().as_str() {
            "trace" => Ok(Level::TRACE),
            "debug" => Ok(Level::DEBUG),
            "info" => Ok(Level::INFO),
            "warn" => Ok(Level::WARN),
            "error" => Ok(Level::ERROR),
            _ => anyhow::bail!(
                "LOANWATCH_LOG_LEVEL '{}' is not valid. \
                Valid levels: trace, debug, info, warn, error",
                self.log_level
            ),
        }
    }

    /// Translate into the core configuration
    fn to_loanwatch_config(&self) -> LoanwatchConfig {
        let mut engine = EngineConfig::default();
        if let Some(secs) = self.poll_interval_secs {
            engine.poll_interval_secs = secs;
        }
        if let Some(days) = self.warning_days {
            engine.warning_threshold_days = days;
        }

        let state_store = match (self.state_store_type.as_str(), &self.state_store_path) {
            ("file", Some(path)) => StateStoreConfig::File { path: path.clone() },
            _ => StateStoreConfig::Memory,
        };

        LoanwatchConfig {
            service: ServiceConfig::Bibliotheek {
                username: self.username.clone(),
                password: self.password.clone(),
                base_url: self.base_url.clone(),
                auth_base_url: self.auth_base_url.clone(),
                dry_run: self.dry_run,
            },
            state_store,
            engine,
        }
    }
}

/// Parse an optional numeric variable, rejecting garbage instead of defaulting
fn parse_number<T>(var: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    var(key)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .map_err(|e| anyhow::anyhow!("{} is not a valid number ({}): {}", key, raw, e))
        })
        .transpose()
}

fn main() -> ExitCode {
    // Load configuration from environment
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return LoanwatchExitCode::ConfigError.into();
        }
    };

    // Validate configuration
    if let Err(e) = config.validate() {
        eprintln!("Configuration validation error: {}", e);
        return LoanwatchExitCode::ConfigError.into();
    }

    // Initialize tracing
    let log_level = config.log_level().unwrap_or(Level::INFO);
    let subscriber = FmtSubscriber::builder().with_max_level(log_level).finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return LoanwatchExitCode::ConfigError.into();
    }

    info!("Starting loanwatchd daemon");
    debug!("Configuration loaded: {:?}", config);

    // Enter tokio runtime
    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return LoanwatchExitCode::RuntimeError.into();
        }
    };

    let result = rt.block_on(async {
        if let Err(e) = run_daemon(config).await {
            error!("Daemon error: {:#}", e);
            LoanwatchExitCode::RuntimeError
        } else {
            LoanwatchExitCode::CleanShutdown
        }
    });

    result.into()
}

/// Run the daemon
async fn run_daemon(config: Config) -> Result<()> {
    let core_config = config.to_loanwatch_config();
    core_config.validate()?;

    let service = BibliotheekService::from_config(&core_config.service, core_config.engine.request_timeout())?;
    info!("Library service: {}", service.service_name());

    let state_store: Box<dyn StateStore> = match &core_config.state_store {
        StateStoreConfig::File { path } => {
            info!("State store: file ({})", path);
            Box::new(FileStateStore::new(path).await?)
        }
        StateStoreConfig::Memory => {
            warn!("State store: memory (events will repeat after restart)");
            Box::new(MemoryStateStore::new())
        }
    };

    let (engine, events) = LoanEngine::new(Box::new(service), state_store, &core_config.engine)?;
    let engine = Arc::new(engine);

    if let Some(days) = config.auto_extend_days {
        info!("Auto-extension enabled for loans with at most {} day(s) left", days);
    }
    let consumer = tokio::spawn(consume_events(events, Arc::downgrade(&engine), config.auto_extend_days));

    // Translate OS signals into the engine's shutdown channel
    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let signals = tokio::spawn(async move {
        match wait_for_shutdown_signal().await {
            Ok(signal) => info!("Received shutdown signal: {}", signal),
            Err(e) => error!("Signal handling error: {}", e),
        }
        let _ = shutdown_tx.send(());
    });

    info!("Starting loan engine");
    engine.run_with_shutdown(Some(shutdown_rx)).await?;

    signals.abort();

    // The consumer drains and ends once the engine, and with it the event
    // sender, is gone
    drop(engine);
    match tokio::time::timeout(SHUTDOWN_TIMEOUT, consumer).await {
        Ok(_) => info!("Shutting down daemon"),
        Err(_) => warn!("Event consumer still busy after {:?}, exiting anyway", SHUTDOWN_TIMEOUT),
    }

    Ok(())
}

/// Log engine events and drive auto-extension
///
/// Expiring loans of one refresh are coalesced into a single
/// `extend_loans` call once that refresh reports success. The engine is
/// held weakly so that dropping it closes the channel.
async fn consume_events(
    mut events: mpsc::Receiver<EngineEvent>,
    engine: Weak<LoanEngine>,
    auto_extend_days: Option<i64>,
) {
    let mut expiring_seen = false;

    while let Some(event) = events.recv().await {
        match &event {
            EngineEvent::Started { poll_interval_secs } => {
                info!("Engine started (refresh every {}s)", poll_interval_secs);
            }
            EngineEvent::Loan(LoanEvent::DaysChanged {
                new_min,
                previous_min,
                loan_count,
            }) => {
                info!(
                    "Minimum days remaining changed: {:?} -> {:?} ({} loan(s))",
                    previous_min, new_min, loan_count
                );
            }
            EngineEvent::Loan(LoanEvent::LoanExpiringSoon { loan, days_left }) => {
                warn!("Loan expiring soon: \"{}\" ({} day(s) left)", loan.title, days_left);
                expiring_seen = true;
            }
            EngineEvent::Loan(LoanEvent::LoanOverdue { loan, days_overdue }) => {
                warn!("Loan overdue: \"{}\" ({} day(s) late)", loan.title, days_overdue);
            }
            EngineEvent::RefreshSucceeded { loan_count, min_days } => {
                info!("Refresh succeeded: {} loan(s), minimum days {:?}", loan_count, min_days);
            }
            EngineEvent::RefreshFailed { error } => {
                error!("Refresh failed: {}", error);
            }
            EngineEvent::ExtensionCompleted {
                extended,
                failed_batches,
            } => {
                info!("Extension completed: {} extended, {} batch(es) failed", extended, failed_batches);
            }
            EngineEvent::Stopped { reason } => {
                info!("Engine stopped: {}", reason);
            }
        }

        if matches!(event, EngineEvent::RefreshSucceeded { .. }) && std::mem::take(&mut expiring_seen) {
            if let (Some(days), Some(engine)) = (auto_extend_days, engine.upgrade()) {
                if let Err(e) = engine.extend_loans(days).await {
                    error!("Auto-extension failed: {}", e);
                }
            }
        }
    }
}

/// Wait for shutdown signals (SIGTERM, SIGINT)
///
/// # Returns
///
/// Returns the name of the signal received.
#[cfg(unix)]
async fn wait_for_shutdown_signal() -> Result<&'static str> {
    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGINT handler: {}", e))?;

    Ok(tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    })
}

/// Wait for shutdown signals (SIGINT only)
///
/// Fallback implementation for non-Unix platforms.
#[cfg(not(unix))]
async fn wait_for_shutdown_signal() -> Result<&'static str> {
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to wait for CTRL-C: {}", e))?;
    Ok("SIGINT")
}
