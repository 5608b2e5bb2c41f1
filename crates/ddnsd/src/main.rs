// # ddnsd - DDNS Daemon
//
// Thin integration layer around `ddns_core::DdnsService`. All update,
// detection and scheduling logic lives in the library crates; this binary
// only:
//
// 1. Reads and validates configuration from environment variables
// 2. Initializes tracing and the tokio runtime
// 3. Opens the file-backed domain store, credential vault and settings
// 4. Registers the provider adapters and IP detection strategies
// 5. Starts the scheduler when auto start is on, then waits for a signal
//    and drains in-flight updates before exiting
//
// ## Configuration
//
// - `DDNS_DATA_DIR`: directory holding `domains.json`, `vault.json` and
//   `settings.json` (default `./ddns-data`)
// - `DDNS_LOG_LEVEL`: error, warn, info, debug or trace (default info)
// - `DDNS_VAULT_SECRET`: secret the vault key is derived from
// - `DDNS_EPHEMERAL_VAULT`: `1` keeps credentials in memory only; the
//   secret is then not required
// - `DDNS_AUTO_START`: overrides the persisted `auto_start` setting
// - `DDNS_IP_SERVICES_V4` / `DDNS_IP_SERVICES_V6`: comma-separated URLs
//   replacing the built-in HTTP echo services
//
// ## Example
//
// ```bash
// export DDNS_DATA_DIR=/var/lib/ddns
// export DDNS_VAULT_SECRET=change-this-long-random-string
// export DDNS_AUTO_START=1
//
// ddnsd
// ```

use anyhow::{Context, Result};
use ddns_core::{
    CredentialVault, DdnsServiceBuilder, EngineConfig, FileDomainStore, IpSource,
    ProviderRegistry, SettingsStore,
};
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{Level, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

/// Upper bound on the drain after a shutdown signal
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Exit codes for different termination scenarios
///
/// These codes follow systemd conventions:
/// - 0: Clean shutdown
/// - 1: Configuration error
/// - 2: Runtime error
/// - 3: Storage could not be opened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DdnsExitCode {
    /// Clean shutdown (normal exit)
    CleanShutdown = 0,
    /// Configuration error or startup failure
    ConfigError = 1,
    /// Runtime error (unexpected failure)
    RuntimeError = 2,
    /// Domain store, vault or settings file unusable
    StorageError = 3,
}

impl From<DdnsExitCode> for ExitCode {
    fn from(code: DdnsExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

/// A startup or runtime failure tagged with the exit code it maps to
#[derive(Debug)]
struct Fatal {
    code: DdnsExitCode,
    error: anyhow::Error,
}

trait FatalExt<T> {
    fn fatal(self, code: DdnsExitCode) -> std::result::Result<T, Fatal>;
}

impl<T, E> FatalExt<T> for std::result::Result<T, E>
where
    E: Into<anyhow::Error>,
{
    fn fatal(self, code: DdnsExitCode) -> std::result::Result<T, Fatal> {
        self.map_err(|e| Fatal {
            code,
            error: e.into(),
        })
    }
}

/// Application configuration
#[derive(Debug, Clone, PartialEq)]
struct Config {
    data_dir: PathBuf,
    log_level: String,
    vault_secret: Option<String>,
    ephemeral_vault: bool,
    auto_start: Option<bool>,
    ip_services_v4: Option<Vec<String>>,
    ip_services_v6: Option<Vec<String>>,
}

impl Config {
    /// Load configuration from environment variables
    fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Ok(Self {
            data_dir: non_empty("DDNS_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./ddns-data")),
            log_level: non_empty("DDNS_LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            vault_secret: non_empty("DDNS_VAULT_SECRET"),
            ephemeral_vault: non_empty("DDNS_EPHEMERAL_VAULT")
                .map(|v| parse_flag("DDNS_EPHEMERAL_VAULT", &v))
                .transpose()?
                .unwrap_or(false),
            auto_start: non_empty("DDNS_AUTO_START")
                .map(|v| parse_flag("DDNS_AUTO_START", &v))
                .transpose()?,
            ip_services_v4: non_empty("DDNS_IP_SERVICES_V4").map(|v| parse_list(&v)),
            ip_services_v6: non_empty("DDNS_IP_SERVICES_V6").map(|v| parse_list(&v)),
        })
    }

    /// Validate the configuration
    fn validate(&self) -> Result<()> {
        if self.vault_secret.is_none() && !self.ephemeral_vault {
            anyhow::bail!(
                "DDNS_VAULT_SECRET is required. \
                Set it via: export DDNS_VAULT_SECRET=<long random string>, \
                or set DDNS_EPHEMERAL_VAULT=1 to keep credentials in memory only"
            );
        }

        if let Some(secret) = &self.vault_secret
            && secret.len() < 8
        {
            anyhow::bail!(
                "DDNS_VAULT_SECRET appears too short ({} chars, min 8)",
                secret.len()
            );
        }

        match self.log_level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!(
                "DDNS_LOG_LEVEL '{}' is not valid. \
                Valid levels: trace, debug, info, warn, error",
                self.log_level
            ),
        }

        for (key, urls) in [
            ("DDNS_IP_SERVICES_V4", &self.ip_services_v4),
            ("DDNS_IP_SERVICES_V6", &self.ip_services_v6),
        ] {
            let Some(urls) = urls else { continue };
            if urls.is_empty() {
                anyhow::bail!("{} must list at least one URL", key);
            }
            for url in urls {
                if !url.starts_with("https://") && !url.starts_with("http://") {
                    anyhow::bail!("{} must use HTTP or HTTPS URLs. Got: {}", key, url);
                }
            }
        }

        Ok(())
    }

    /// Plain-HTTP echo services, reported once tracing is up
    fn insecure_services(&self) -> Vec<&str> {
        self.ip_services_v4
            .iter()
            .chain(self.ip_services_v6.iter())
            .flatten()
            .filter(|url| url.starts_with("http://"))
            .map(String::as_str)
            .collect()
    }

    fn level(&self) -> Level {
        match self.log_level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        }
    }
}

fn parse_flag(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => anyhow::bail!("{} must be a boolean (1/0, true/false). Got: {}", key, other),
    }
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn main() -> ExitCode {
    // Load configuration from environment
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return DdnsExitCode::ConfigError.into();
        }
    };

    // Validate configuration
    if let Err(e) = config.validate() {
        eprintln!("Configuration validation error: {}", e);
        return DdnsExitCode::ConfigError.into();
    }

    let subscriber = FmtSubscriber::builder()
        .with_max_level(config.level())
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return DdnsExitCode::ConfigError.into();
    }

    info!("Starting ddnsd daemon");
    for url in config.insecure_services() {
        warn!(url = %url, "IP echo service uses HTTP (not HTTPS)");
    }

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return DdnsExitCode::RuntimeError.into();
        }
    };

    let result = rt.block_on(async {
        match run_daemon(config).await {
            Ok(()) => DdnsExitCode::CleanShutdown,
            Err(fatal) => {
                error!(code = fatal.code as u8, "Daemon error: {:#}", fatal.error);
                fatal.code
            }
        }
    });

    result.into()
}

/// Detection strategies in chain order: HTTP, DNS, interface
#[cfg_attr(not(feature = "http"), allow(unused_variables))]
fn ip_sources(config: &Config) -> Result<Vec<Arc<dyn IpSource>>> {
    #[allow(unused_mut)]
    let mut sources: Vec<Arc<dyn IpSource>> = Vec::new();

    #[cfg(feature = "http")]
    {
        let source = match (&config.ip_services_v4, &config.ip_services_v6) {
            (None, None) => ddns_ip_http::HttpIpSource::new(),
            (v4, v6) => ddns_ip_http::HttpIpSource::with_endpoints(
                v4.clone().unwrap_or_else(|| {
                    ddns_ip_http::DEFAULT_V4_SERVICES.iter().map(|s| s.to_string()).collect()
                }),
                v6.clone().unwrap_or_else(|| {
                    ddns_ip_http::DEFAULT_V6_SERVICES.iter().map(|s| s.to_string()).collect()
                }),
            ),
        }
        .context("Failed to build HTTP IP source")?;
        info!("Registering HTTP IP source");
        sources.push(Arc::new(source));
    }

    #[cfg(feature = "dns")]
    {
        info!("Registering DNS IP source");
        sources.push(Arc::new(ddns_ip_dns::DnsIpSource::new()));
    }

    #[cfg(feature = "interface")]
    {
        info!("Registering interface IP source");
        sources.push(Arc::new(ddns_ip_interface::InterfaceIpSource::new()));
    }

    Ok(sources)
}

/// Run the daemon
async fn run_daemon(config: Config) -> std::result::Result<(), Fatal> {
    let engine_config = EngineConfig::default();

    tokio::fs::create_dir_all(&config.data_dir)
        .await
        .with_context(|| format!("Failed to create data directory {}", config.data_dir.display()))
        .fatal(DdnsExitCode::StorageError)?;

    let domains = FileDomainStore::open(config.data_dir.join("domains.json"))
        .await
        .context("Failed to open domain store")
        .fatal(DdnsExitCode::StorageError)?;

    let vault = match &config.vault_secret {
        Some(secret) if !config.ephemeral_vault => {
            CredentialVault::open(config.data_dir.join("vault.json"), secret)
                .await
                .context("Failed to open credential vault")
                .fatal(DdnsExitCode::StorageError)?
        }
        _ => {
            warn!("Using an ephemeral credential vault; credentials are lost on exit");
            CredentialVault::ephemeral()
        }
    };

    let settings = SettingsStore::open(config.data_dir.join("settings.json"))
        .await
        .context("Failed to open settings")
        .fatal(DdnsExitCode::StorageError)?;

    let providers = ProviderRegistry::new();
    ddns_providers::register_all(&providers, &engine_config)
        .context("Failed to register providers")
        .fatal(DdnsExitCode::RuntimeError)?;

    let sources = ip_sources(&config).fatal(DdnsExitCode::RuntimeError)?;

    let service = DdnsServiceBuilder::new()
        .config(engine_config)
        .domain_store(Arc::new(domains))
        .vault(vault)
        .settings(settings)
        .providers(providers)
        .ip_sources(sources)
        .build()
        .await
        .context("Failed to build DDNS service")
        .fatal(DdnsExitCode::RuntimeError)?;

    match service
        .start_if_auto_start(config.auto_start)
        .await
        .context("Failed to start scheduler")
        .fatal(DdnsExitCode::RuntimeError)?
    {
        Some(status) => info!(active_tasks = status.active_tasks, "Scheduler started"),
        None => info!("Auto start disabled; scheduler idle"),
    }

    let signal = wait_for_shutdown()
        .await
        .fatal(DdnsExitCode::RuntimeError)?;
    info!("Received shutdown signal: {}", signal);
    info!("Shutting down daemon");

    match tokio::time::timeout(SHUTDOWN_TIMEOUT, service.shutdown()).await {
        Ok(result) => result
            .context("Shutdown failed")
            .fatal(DdnsExitCode::RuntimeError)?,
        Err(_) => {
            return Err(anyhow::anyhow!("Shutdown timeout after {:?}", SHUTDOWN_TIMEOUT))
                .fatal(DdnsExitCode::RuntimeError);
        }
    }

    info!("Shutdown complete");
    Ok(())
}

/// Wait for SIGTERM or SIGINT
#[cfg(unix)]
async fn wait_for_shutdown() -> Result<&'static str> {
    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGINT handler: {}", e))?;

    Ok(tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    })
}

/// Wait for CTRL-C
///
/// Fallback implementation for non-Unix platforms.
#[cfg(not(unix))]
async fn wait_for_shutdown() -> Result<&'static str> {
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to wait for CTRL-C: {}", e))?;
    Ok("SIGINT")
}
