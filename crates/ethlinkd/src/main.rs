// # ethlinkd - Wired Link Daemon
//
// The ethlinkd daemon is a thin integration layer. It is responsible for:
// 1. Reading configuration from environment variables
// 2. Initializing logging and the runtime
// 3. Building the link driver and the settings source
// 4. Running the link state tracker until a shutdown signal arrives
//
// All link logic lives in ethlink-core.
//
// ## Configuration
//
// All configuration is done via environment variables:
//
// ### Link
// - `ETHLINK_INTERFACE`: Interface to manage (default: eth0)
// - `ETHLINK_POLL_INTERVAL_MS`: Link monitor poll interval (default: 2000)
// - `ETHLINK_ENABLE`: Enable the link at startup (default: true)
//
// ### Driver
// - `ETHLINK_DRIVER_MODULE`: Kernel module to load on enable (optional)
// - `ETHLINK_DHCP_COMMAND`: One-shot DHCP client, interface appended
//   (default: `udhcpc -n -q -f -i`)
//
// ### Settings
// - `ETHLINK_SETTINGS_PATH`: JSON file holding the static addressing
//   settings; in-memory settings (dynamic addressing) when unset
//
// ### Logging
// - `ETHLINK_LOG_LEVEL`: trace, debug, info, warn, error (default: info)
//
// ## Signals
//
// - `SIGHUP`: Reload the settings file
// - `SIGTERM` / `SIGINT`: Disable the link and exit
//
// ## Example
//
// ```bash
// export ETHLINK_INTERFACE=eth0
// export ETHLINK_SETTINGS_PATH=/var/lib/ethlink/settings.json
//
// ethlinkd
// ```

use anyhow::Result;
use ethlink_core::config::{LinkConfig, SettingsConfig};
use ethlink_core::settings::{FileSettingsSource, MemorySettingsSource, SettingsWatcher};
use ethlink_core::tracker::{LinkNotification, LinkStateTracker};
use ethlink_core::{DriverControl, SettingsSource};
use std::env;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{Level, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

/// How long disabling the link may take on shutdown
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Exit codes for different termination scenarios
///
/// These codes follow systemd conventions:
/// - 0: Clean shutdown
/// - 1: Configuration or startup error
/// - 2: Runtime error (unexpected)
#[derive(Debug, Clone, Copy)]
enum EthlinkExitCode {
    /// Clean shutdown (normal exit)
    CleanShutdown = 0,
    /// Configuration error or startup failure
    ConfigError = 1,
    /// Runtime error (unexpected failure)
    RuntimeError = 2,
}

impl From<EthlinkExitCode> for ExitCode {
    fn from(code: EthlinkExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

/// Application configuration
struct Config {
    interface: String,
    poll_interval_ms: Option<u64>,
    enable: bool,
    driver_module: Option<String>,
    dhcp_command: Option<Vec<String>>,
    settings_path: Option<String>,
    log_level: String,
}

impl Config {
    /// Load configuration from environment variables
    fn from_env() -> Result<Self> {
        Ok(Self {
            interface: env::var("ETHLINK_INTERFACE").unwrap_or_else(|_| "eth0".to_string()),
            poll_interval_ms: env::var("ETHLINK_POLL_INTERVAL_MS")
                .ok()
                .map(|s| s.parse())
                .transpose()
                .map_err(|e| anyhow::anyhow!("ETHLINK_POLL_INTERVAL_MS is not a number: {}", e))?,
            enable: env::var("ETHLINK_ENABLE")
                .map(|s| !matches!(s.to_lowercase().as_str(), "0" | "false" | "no"))
                .unwrap_or(true),
            driver_module: env::var("ETHLINK_DRIVER_MODULE")
                .ok()
                .filter(|s| !s.is_empty()),
            dhcp_command: env::var("ETHLINK_DHCP_COMMAND")
                .ok()
                .map(|s| s.split_whitespace().map(String::from).collect()),
            settings_path: env::var("ETHLINK_SETTINGS_PATH").ok(),
            log_level: env::var("ETHLINK_LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }

    /// Build the core link configuration
    fn link_config(&self) -> LinkConfig {
        let mut link = LinkConfig::new().with_interface(&self.interface);
        if let Some(interval) = self.poll_interval_ms {
            link.monitor.poll_interval_ms = interval;
        }
        link.settings = match &self.settings_path {
            Some(path) => SettingsConfig::File { path: path.clone() },
            None => SettingsConfig::Memory,
        };
        link
    }

    /// Validate the configuration
    fn validate(&self) -> Result<()> {
        self.link_config().validate()?;

        if let Some(interval) = self.poll_interval_ms
            && !(100..=60_000).contains(&interval)
        {
            anyhow::bail!(
                "ETHLINK_POLL_INTERVAL_MS must be between 100 and 60000. Got: {}",
                interval
            );
        }

        if self.dhcp_command.as_ref().is_some_and(|c| c.is_empty()) {
            anyhow::bail!("ETHLINK_DHCP_COMMAND cannot be empty");
        }

        if let Some(path) = &self.settings_path
            && let Some(parent) = std::path::Path::new(path).parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            anyhow::bail!(
                "ETHLINK_SETTINGS_PATH parent directory does not exist: {}. \
                    Create it first: sudo mkdir -p {}",
                parent.display(),
                parent.display()
            );
        }

        match self.log_level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!(
                "ETHLINK_LOG_LEVEL '{}' is not valid. \
                Valid levels: trace, debug, info, warn, error",
                self.log_level
            ),
        }

        Ok(())
    }
}

fn main() -> ExitCode {
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return EthlinkExitCode::ConfigError.into();
        }
    };

    if let Err(e) = config.validate() {
        eprintln!("Configuration validation error: {}", e);
        return EthlinkExitCode::ConfigError.into();
    }

    let log_level = match config.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder().with_max_level(log_level).finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return EthlinkExitCode::ConfigError.into();
    }

    info!("Starting ethlinkd on {}", config.interface);

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return EthlinkExitCode::RuntimeError.into();
        }
    };

    let result = rt.block_on(async {
        if let Err(e) = run_daemon(config).await {
            error!("Daemon error: {}", e);
            EthlinkExitCode::RuntimeError
        } else {
            EthlinkExitCode::CleanShutdown
        }
    });

    result.into()
}

#[cfg(feature = "sysfs")]
fn create_driver(config: &Config) -> Result<Arc<dyn DriverControl>> {
    let mut sysfs = ethlink_sysfs::SysfsConfig::new(&config.interface);
    sysfs.driver_module = config.driver_module.clone();
    if let Some(command) = &config.dhcp_command {
        sysfs.dhcp_command = command.clone();
    }
    Ok(Arc::new(ethlink_sysfs::SysfsDriver::new(sysfs)?))
}

#[cfg(not(feature = "sysfs"))]
fn create_driver(_config: &Config) -> Result<Arc<dyn DriverControl>> {
    anyhow::bail!("ethlinkd was built without a link driver; enable the `sysfs` feature")
}

/// Run the daemon
async fn run_daemon(config: Config) -> Result<()> {
    let link_config = config.link_config();
    let driver = create_driver(&config)?;

    // Keep the concrete file source around for SIGHUP reloads
    let (settings, file_settings): (Arc<dyn SettingsSource>, Option<Arc<FileSettingsSource>>) =
        match &link_config.settings {
            SettingsConfig::File { path } => {
                info!("Static settings file: {}", path);
                let file = Arc::new(FileSettingsSource::new(path).await?);
                (file.clone(), Some(file))
            }
            SettingsConfig::Memory => {
                info!("No settings file configured, using dynamic addressing");
                (Arc::new(MemorySettingsSource::new()), None)
            }
        };

    // The watcher needs the tracker's queue, the tracker needs the initial
    // configuration: route the watcher through a forwarding channel.
    let (watch_tx, mut watch_rx) = mpsc::unbounded_channel();
    let watcher = SettingsWatcher::new(settings, watch_tx).await?;

    let (tracker, handle, notifications) =
        LinkStateTracker::new(driver, watcher.config(), &link_config)?;
    let tracker_task = tokio::spawn(tracker.run());

    let inbox = handle.sender();
    let forward_task = tokio::spawn(async move {
        while let Some(input) = watch_rx.recv().await {
            if inbox.send(input).is_err() {
                break;
            }
        }
    });
    let watcher_task = watcher.spawn();
    let log_task = tokio::spawn(log_notifications(notifications));

    if config.enable {
        if handle.enable().await {
            info!("Link {} enabled", config.interface);
        } else {
            warn!("Failed to enable link {}", config.interface);
        }
    } else {
        info!("Link {} left disabled (ETHLINK_ENABLE)", config.interface);
    }

    let signal = wait_for_shutdown(file_settings).await?;
    info!("Received shutdown signal: {}", signal);

    match tokio::time::timeout(SHUTDOWN_TIMEOUT, handle.disable()).await {
        Ok(true) => info!("Link {} disabled", config.interface),
        Ok(false) => warn!("Failed to disable link {}", config.interface),
        Err(_) => warn!("Disabling link timed out after {:?}", SHUTDOWN_TIMEOUT),
    }

    handle.shutdown();
    watcher_task.abort();
    forward_task.abort();

    let result = tokio::time::timeout(SHUTDOWN_TIMEOUT, tracker_task).await;
    log_task.abort();

    match result {
        Ok(Ok(run_result)) => run_result?,
        Ok(Err(e)) => anyhow::bail!("Tracker task failed: {}", e),
        Err(_) => anyhow::bail!("Shutdown timeout after {:?}", SHUTDOWN_TIMEOUT),
    }

    info!("Shutting down daemon");
    Ok(())
}

async fn log_notifications(mut notifications: mpsc::Receiver<LinkNotification>) {
    while let Some(notification) = notifications.recv().await {
        match notification {
            LinkNotification::DetailedStateChanged { state, lease } => {
                info!("Link state: {} ({})", state, lease)
            }
            LinkNotification::ConfigurationChanged { lease } => {
                info!("Link configuration changed: {}", lease)
            }
            LinkNotification::EnabledStateChanged { state, previous } => {
                info!("Link {} -> {}", previous, state)
            }
        }
    }
}

/// Wait for SIGTERM or SIGINT, reloading the settings file on SIGHUP
///
/// # Returns
///
/// Returns the name of the terminating signal.
#[cfg(unix)]
async fn wait_for_shutdown(settings: Option<Arc<FileSettingsSource>>) -> Result<&'static str> {
    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGINT handler: {}", e))?;
    let mut sighup = signal(SignalKind::hangup())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGHUP handler: {}", e))?;

    loop {
        tokio::select! {
            _ = sigterm.recv() => return Ok("SIGTERM"),
            _ = sigint.recv() => return Ok("SIGINT"),
            _ = sighup.recv() => match &settings {
                Some(file) => {
                    if let Err(e) = file.reload().await {
                        error!("Failed to reload {}: {}", file.path().display(), e);
                    }
                }
                None => info!("SIGHUP ignored: no settings file configured"),
            },
        }
    }
}

/// Wait for CTRL-C
///
/// Fallback implementation for non-Unix platforms.
#[cfg(not(unix))]
async fn wait_for_shutdown(_settings: Option<Arc<FileSettingsSource>>) -> Result<&'static str> {
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to wait for CTRL-C: {}", e))?;
    Ok("SIGINT")
}
