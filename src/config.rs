use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration: {0}")]
    Source(#[from] config::ConfigError),

    /// Required settings absent. Fatal: the process exits before any record
    /// is touched.
    #[error("missing required setting `{0}` (set it in deskhand.toml or the environment)")]
    MissingRequired(&'static str),
}

/// Main configuration structure for deskhand.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct DeskhandConfig {
    /// Employees database (shared with the HR portal).
    pub database: DatabaseConfig,
    /// Workstation provisioning provider.
    pub compute: ComputeConfig,
    /// Welcome-mail delivery. Optional: absent credentials disable sending.
    pub smtp: SmtpConfig,
    /// Batch run bounds.
    pub runner: RunnerConfig,
    /// Logging settings.
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub name: String,
    /// Database user (required, no default).
    pub user: String,
    /// Database password (required, no default).
    pub password: String,
    pub max_connections: u32,
    pub connect_timeout_seconds: u64,
    /// Apply pending migrations on startup.
    pub auto_migrate: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5432,
            name: "hr_employees".to_string(),
            user: String::new(),
            password: String::new(),
            max_connections: 5,
            connect_timeout_seconds: 10,
            auto_migrate: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ComputeConfig {
    /// Base URL of the compute REST API.
    pub api_base: String,
    /// Provider project identifier.
    pub project: String,
    /// Zone the workstations are created in.
    pub zone: String,
    /// Project hosting the boot image family.
    pub image_project: String,
    /// Boot image family for new workstations.
    pub image_family: String,
    /// Machine profile, fixed for every workstation.
    pub machine_type: String,
    pub network: String,
    pub subnetwork: String,
    pub disk_size_gb: u32,
    /// Seconds between operation status checks.
    pub poll_interval_seconds: u64,
    /// Poll budget before a creation counts as timed out.
    pub max_poll_attempts: u32,
    /// Timeout applied to each individual API request.
    pub request_timeout_seconds: u64,
}

impl Default for ComputeConfig {
    fn default() -> Self {
        Self {
            api_base: "https://compute.googleapis.com/compute/v1".to_string(),
            project: "innovatech-hr".to_string(),
            zone: "europe-west1-b".to_string(),
            image_project: "windows-cloud".to_string(),
            image_family: "windows-2019".to_string(),
            machine_type: "e2-standard-2".to_string(),
            network: "innovatech-vpc".to_string(),
            subnetwork: "innovatech-vpc-automation".to_string(),
            disk_size_gb: 50,
            poll_interval_seconds: 5,
            max_poll_attempts: 60,
            request_timeout_seconds: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SmtpConfig {
    pub server: String,
    pub port: u16,
    /// SMTP user; doubles as the From address. Optional.
    pub user: Option<String>,
    /// SMTP password. Optional.
    pub password: Option<String>,
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            server: "smtp.gmail.com".to_string(),
            port: 587,
            user: None,
            password: None,
        }
    }
}

impl SmtpConfig {
    /// Sending is enabled only when both credentials are present.
    pub fn is_configured(&self) -> bool {
        self.user.is_some() && self.password.is_some()
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Wall-clock budget for a whole batch pass, in seconds. Records still
    /// pending when it expires are failed, not silently dropped.
    pub run_deadline_seconds: u64,
    /// Budget for a single record's workflow, in seconds.
    pub record_timeout_seconds: u64,
    /// Claims older than this are treated as abandoned by a crashed run.
    pub claim_stale_seconds: u64,
    /// Lockfile guarding against overlapping local runs.
    pub lock_path: String,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            run_deadline_seconds: 3600,
            record_timeout_seconds: 900,
            claim_stale_seconds: 1800,
            lock_path: ".deskhand/run.lock".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level used when RUST_LOG is unset.
    pub log_level: String,
    /// Emit JSON log lines instead of human-readable ones.
    pub json_logs: bool,
    /// Directory receiving run metric events.
    pub metrics_dir: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: true,
            metrics_dir: ".deskhand/metrics".to_string(),
        }
    }
}

impl DeskhandConfig {
    /// Load configuration from multiple sources with precedence:
    /// 1. Built-in defaults
    /// 2. deskhand.toml
    /// 3. Environment variables (prefixed with DESKHAND_)
    /// 4. Legacy portal variables (DB_*, GCP_*, HR_SMTP_*)
    pub fn load() -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        if Path::new("deskhand.toml").exists() {
            builder = builder.add_source(File::with_name("deskhand"));
        }

        builder = builder.add_source(
            Environment::with_prefix("DESKHAND")
                .separator("_")
                .try_parsing(true),
        );

        let config = builder.build()?;
        let mut deskhand_config: DeskhandConfig = config.try_deserialize()?;

        // The HR portal and the legacy automation scripts configure the
        // database and mail relay through these plain variables; honor them so
        // both halves can share one environment.
        apply_env_override(&mut deskhand_config.database.host, "DB_HOST");
        if let Ok(port) = std::env::var("DB_PORT") {
            if let Ok(port) = port.parse() {
                deskhand_config.database.port = port;
            }
        }
        apply_env_override(&mut deskhand_config.database.name, "DB_NAME");
        apply_env_override(&mut deskhand_config.database.user, "DB_USER");
        apply_env_override(&mut deskhand_config.database.password, "DB_PASSWORD");
        apply_env_override(&mut deskhand_config.compute.project, "GCP_PROJECT");
        apply_env_override(&mut deskhand_config.compute.zone, "GCP_ZONE");
        if deskhand_config.smtp.user.is_none() {
            deskhand_config.smtp.user = std::env::var("HR_SMTP_USER").ok();
        }
        if deskhand_config.smtp.password.is_none() {
            deskhand_config.smtp.password = std::env::var("HR_SMTP_PASS").ok();
        }

        deskhand_config.validate()?;
        Ok(deskhand_config)
    }

    /// Missing database credentials abort startup; missing SMTP credentials
    /// merely disable the welcome mail.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.database.user.is_empty() {
            return Err(ConfigError::MissingRequired("database.user"));
        }
        if self.database.password.is_empty() {
            return Err(ConfigError::MissingRequired("database.password"));
        }
        Ok(())
    }

    /// Load .env file if it exists.
    pub fn load_env_file() {
        if Path::new(".env").exists() && dotenvy::dotenv().is_ok() {
            tracing::debug!("Loaded environment variables from .env file");
        }
    }
}

fn apply_env_override(target: &mut String, var: &str) {
    if let Ok(value) = std::env::var(var) {
        if !value.is_empty() {
            *target = value;
        }
    }
}
