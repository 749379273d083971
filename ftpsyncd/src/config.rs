use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, ensure};
use clap::{ArgAction, Parser};
use ftpsync_core::FtpConfig;

use crate::network::{DEFAULT_DISCOVER_PREFIX, NetworkConfig};
use crate::sync::backoff::Backoff;
use crate::sync::engine::EngineSettings;
use crate::sync::scheduler::{
    DEFAULT_CAPACITY_RETRIES, DEFAULT_MAX_CONCURRENCY, DEFAULT_MAX_RETRIES, SchedulerConfig,
};

const DEFAULT_HOST: &str = "10.0.0.1";
const DEFAULT_REMOTE_ROOT: &str = "/user";
const DEFAULT_INTERVAL_SECS: u64 = 10;
const MAX_INTERVAL_SECS: u64 = 7 * 24 * 60 * 60;
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Mirror a remote FTP directory tree into a local directory.
#[derive(Debug, Parser)]
#[command(name = "ftpsyncd", version, about, disable_help_flag = true)]
pub struct CliArgs {
    /// FTP server host
    #[arg(short = 'h', long, env = "FTPSYNC_HOST", default_value = DEFAULT_HOST)]
    pub host: String,

    /// FTP server port
    #[arg(long, env = "FTPSYNC_PORT", default_value_t = 21)]
    pub port: u16,

    #[arg(short, long, env = "FTPSYNC_USER", default_value = "anonymous")]
    pub user: String,

    #[arg(
        short,
        long,
        env = "FTPSYNC_PASSWORD",
        default_value = "anonymous@",
        hide_env_values = true,
        hide_default_value = true
    )]
    pub password: String,

    /// Remote directory to mirror
    #[arg(short, long, env = "FTPSYNC_REMOTE_DIR", default_value = DEFAULT_REMOTE_ROOT)]
    pub remote_dir: String,

    /// Local mirror directory, created when missing
    #[arg(short, long, env = "FTPSYNC_LOCAL_DIR")]
    pub local_dir: String,

    /// Use explicit FTPS (AUTH TLS)
    #[arg(short, long, env = "FTPSYNC_SECURE")]
    pub secure: bool,

    /// Accept any FTPS server certificate (self-signed devices)
    #[arg(long, env = "FTPSYNC_INSECURE_TLS")]
    pub insecure_tls: bool,

    /// Keep syncing every `interval` seconds until interrupted
    #[arg(short, long, env = "FTPSYNC_DAEMON")]
    pub daemon: bool,

    /// Seconds between cycles in daemon mode
    #[arg(short, long, env = "FTPSYNC_INTERVAL", default_value_t = DEFAULT_INTERVAL_SECS)]
    pub interval: u64,

    /// Maximum simultaneous downloads
    #[arg(short, long, env = "FTPSYNC_CONCURRENCY", default_value_t = DEFAULT_MAX_CONCURRENCY)]
    pub concurrency: usize,

    /// Only mirror these extensions (comma separated, e.g. "tif,jpg")
    #[arg(short, long, env = "FTPSYNC_FILE_TYPES", value_delimiter = ',')]
    pub file_types: Vec<String>,

    /// Retries per file before it is given up for the cycle
    #[arg(long, env = "FTPSYNC_MAX_RETRIES", default_value_t = DEFAULT_MAX_RETRIES)]
    pub max_retries: u32,

    /// Refusals tolerated at a single connection before the cycle is aborted
    #[arg(long, env = "FTPSYNC_CAPACITY_RETRIES", default_value_t = DEFAULT_CAPACITY_RETRIES)]
    pub capacity_retries: u32,

    /// Network timeout in seconds
    #[arg(long, env = "FTPSYNC_TIMEOUT", default_value_t = DEFAULT_TIMEOUT_SECS)]
    pub timeout: u64,

    /// Wireless network to join before syncing
    #[arg(long, env = "FTPSYNC_SSID")]
    pub ssid: Option<String>,

    #[arg(long, env = "FTPSYNC_WIFI_PASSWORD", hide_env_values = true)]
    pub wifi_password: Option<String>,

    /// Join the first visible network whose name contains the discover prefix
    #[arg(long, env = "FTPSYNC_AUTO_DISCOVER")]
    pub auto_discover: bool,

    #[arg(long, env = "FTPSYNC_DISCOVER_PREFIX", default_value = DEFAULT_DISCOVER_PREFIX)]
    pub discover_prefix: String,

    /// Print help
    #[arg(long, action = ArgAction::Help)]
    help: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub ftp: FtpConfig,
    pub remote_root: String,
    pub local_root: PathBuf,
    pub daemon: bool,
    pub interval: Duration,
    pub concurrency: usize,
    pub max_retries: u32,
    pub capacity_retries: u32,
    pub file_types: Vec<String>,
    pub network: NetworkConfig,
}

impl CliArgs {
    pub fn into_config(self) -> anyhow::Result<SyncConfig> {
        let host = self.host.trim().to_string();
        ensure!(!host.is_empty(), "host must not be empty");
        ensure!(self.concurrency >= 1, "concurrency must be at least 1");
        ensure!(self.interval >= 1, "interval must be at least 1 second");
        ensure!(
            self.interval <= MAX_INTERVAL_SECS,
            "interval must not exceed {MAX_INTERVAL_SECS} seconds"
        );
        ensure!(self.timeout >= 1, "timeout must be at least 1 second");

        let remote_root = normalize_remote_root(&self.remote_dir)?;
        let local_dir = self.local_dir.trim();
        ensure!(!local_dir.is_empty(), "local directory must not be empty");
        let local_root = if local_dir.starts_with('~') {
            let home = dirs::home_dir().context("home directory is unavailable")?;
            expand_with_home(local_dir, &home)
        } else {
            PathBuf::from(local_dir)
        };

        let mut ftp = FtpConfig::new(host, self.user, self.password);
        ftp.port = self.port;
        ftp.secure = self.secure;
        ftp.insecure_tls = self.insecure_tls;
        ftp.timeout = Duration::from_secs(self.timeout);

        Ok(SyncConfig {
            ftp,
            remote_root,
            local_root,
            daemon: self.daemon,
            interval: Duration::from_secs(self.interval),
            concurrency: self.concurrency,
            max_retries: self.max_retries,
            capacity_retries: self.capacity_retries,
            file_types: normalize_file_types(&self.file_types),
            network: NetworkConfig {
                ssid: self.ssid.filter(|ssid| !ssid.is_empty()),
                password: self.wifi_password,
                auto_discover: self.auto_discover,
                discover_prefix: self.discover_prefix,
            },
        })
    }
}

impl SyncConfig {
    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            remote_root: self.remote_root.clone(),
            local_root: self.local_root.clone(),
            file_types: self.file_types.clone(),
            scheduler: SchedulerConfig {
                max_concurrency: self.concurrency,
                max_retries: self.max_retries,
                capacity_retries: self.capacity_retries,
                backoff: Backoff::default(),
            },
        }
    }
}

fn normalize_remote_root(value: &str) -> anyhow::Result<String> {
    let value = value.trim();
    ensure!(!value.is_empty(), "remote directory must not be empty");
    let trimmed = value.trim_end_matches('/');
    Ok(if trimmed.is_empty() {
        "/".to_string()
    } else {
        trimmed.to_string()
    })
}

fn normalize_file_types(values: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for value in values {
        let extension = value.trim().trim_start_matches('.').to_ascii_lowercase();
        if !extension.is_empty() && !out.contains(&extension) {
            out.push(extension);
        }
    }
    out
}

fn expand_with_home(value: &str, home: &Path) -> PathBuf {
    if value == "~" {
        return home.to_path_buf();
    }
    if let Some(rest) = value.strip_prefix("~/") {
        return home.join(rest);
    }
    PathBuf::from(value)
}
