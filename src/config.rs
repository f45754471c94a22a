use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use tracing::trace;

/// Storage backend configuration
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StorageConfig {
    /// In-memory storage (no persistence)
    #[serde(rename = "none")]
    None,

    /// SQLite database (default for most deployments)
    Sqlite {
        /// Path to the SQLite database file
        #[serde(default = "default_sqlite_path")]
        path: PathBuf,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Sqlite {
            path: default_sqlite_path(),
        }
    }
}

fn default_sqlite_path() -> PathBuf {
    PathBuf::from("./fleetwatch.db")
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,

    #[serde(default)]
    pub alerts: AlertsConfig,

    /// Operational API (optional - disabled when absent)
    pub api: Option<ApiSettings>,

    #[serde(default)]
    pub initial_data: InitialData,

    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "debug".to_string()
}

/// Polling, retention and self-check timings
#[derive(Debug, Clone, serde::Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Per-request timeout for agent calls
    #[serde(default = "default_poll_timeout")]
    pub poll_timeout_secs: u64,

    /// Upper bound on in-flight polls within one tick
    #[serde(default = "default_max_concurrent_polls")]
    pub max_concurrent_polls: usize,

    #[serde(default = "default_ttl_days")]
    pub metrics_ttl_days: u32,

    #[serde(default = "default_cleanup_interval_hours")]
    pub cleanup_interval_hours: u64,

    #[serde(default = "default_self_check_interval")]
    pub self_check_interval_secs: u64,

    /// Shared secret sent to agents in the `X-MONITORING-SECRET` header
    pub agent_secret: Option<String>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            poll_timeout_secs: default_poll_timeout(),
            max_concurrent_polls: default_max_concurrent_polls(),
            metrics_ttl_days: default_ttl_days(),
            cleanup_interval_hours: default_cleanup_interval_hours(),
            self_check_interval_secs: default_self_check_interval(),
            agent_secret: None,
        }
    }
}

impl MetricsConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_secs(self.poll_timeout_secs.max(1))
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_hours.max(1) * 3600)
    }

    pub fn self_check_interval(&self) -> Duration {
        Duration::from_secs(self.self_check_interval_secs.max(1))
    }
}

fn default_poll_interval() -> u64 {
    15
}

fn default_poll_timeout() -> u64 {
    10
}

fn default_max_concurrent_polls() -> usize {
    64
}

fn default_ttl_days() -> u32 {
    30
}

fn default_cleanup_interval_hours() -> u64 {
    24
}

fn default_self_check_interval() -> u64 {
    300
}

/// Notification channels and meta-alert tuning
#[derive(Debug, Clone, serde::Deserialize)]
pub struct AlertsConfig {
    pub telegram: Option<TelegramConfig>,

    pub email: Option<EmailConfig>,

    /// Meta-alert fires when the failure rate of a window reaches this value
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold_percent: f64,

    /// Length of the meta-alert window
    #[serde(default = "default_alert_interval")]
    pub interval_seconds: u64,

    /// Safety-net refresh period for the alert rule cache
    #[serde(default = "default_rule_refresh")]
    pub rule_refresh_secs: u64,
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            telegram: None,
            email: None,
            failure_threshold_percent: default_failure_threshold(),
            interval_seconds: default_alert_interval(),
            rule_refresh_secs: default_rule_refresh(),
        }
    }
}

fn default_failure_threshold() -> f64 {
    90.0
}

fn default_alert_interval() -> u64 {
    60
}

fn default_rule_refresh() -> u64 {
    300
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct TelegramConfig {
    pub token: String,

    #[serde(default)]
    pub chat_ids: Vec<String>,

    #[serde(default = "default_telegram_api")]
    pub api_base: String,
}

fn default_telegram_api() -> String {
    "https://api.telegram.org".to_string()
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct EmailConfig {
    pub smtp_host: String,

    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,

    pub username: String,

    pub password: String,

    #[serde(default)]
    pub to: Vec<String>,
}

fn default_smtp_port() -> u16 {
    587
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct ApiSettings {
    #[serde(default = "default_api_bind")]
    pub bind: SocketAddr,

    pub auth_token: Option<String>,

    #[serde(default = "default_true")]
    pub enable_cors: bool,
}

fn default_api_bind() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

fn default_true() -> bool {
    true
}

/// Hosts seeded into an empty roster at startup
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct InitialData {
    #[serde(default)]
    pub hosts: Vec<HostSeed>,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct HostSeed {
    pub hostname: String,
    pub ip_address: String,
    #[serde(default = "crate::util::get_default_port")]
    pub agent_port: u16,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub processes: Vec<String>,
    #[serde(default)]
    pub containers: Vec<String>,
    #[serde(default)]
    pub alerts: Vec<RuleSeed>,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct RuleSeed {
    pub metric_name: String,
    pub threshold_value: f64,
    pub condition: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

pub fn read_config_file(path: &str) -> anyhow::Result<Config> {
    let file_content = std::fs::read_to_string(path)?;
    parse_config(&file_content)
}

pub fn parse_config(content: &str) -> anyhow::Result<Config> {
    serde_json::from_str(content)
        .map_err(|e| anyhow::anyhow!("Invalid configuration file provided: {e}"))
        .inspect(|config| trace!("loaded config: {config:?}"))
}
