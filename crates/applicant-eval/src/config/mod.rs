use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};

use crate::orchestrator::DependencyPolicy;

const DEFAULT_MONITOR_HISTORY: usize = 100;
const DEFAULT_MONITOR_WINDOW: usize = 20;
const DEFAULT_MAX_REMEDIATION_ATTEMPTS: u32 = 2;

/// Distinguishes runtime behavior for different stages of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Test,
    Production,
}

impl AppEnvironment {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "test" | "ci" => Self::Test,
            _ => Self::Development,
        }
    }
}

/// Top-level configuration for the application.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub pipeline: PipelineConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = AppEnvironment::from_str(
            &env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
        );

        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort)?;

        let log_level = env::var("APP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig { log_level },
            pipeline: PipelineConfig::from_env()?,
        })
    }
}

/// Settings controlling the HTTP server binding.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        if self.host.eq_ignore_ascii_case("localhost") {
            return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), self.port));
        }

        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|source| ConfigError::InvalidHost { source })?;

        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Tracing controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
}

/// Knobs for the monitor ledger, the remediation loop, and step dependency handling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    pub monitor_history: usize,
    pub monitor_window: usize,
    pub max_remediation_attempts: u32,
    pub dependency_policy: DependencyPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            monitor_history: DEFAULT_MONITOR_HISTORY,
            monitor_window: DEFAULT_MONITOR_WINDOW,
            max_remediation_attempts: DEFAULT_MAX_REMEDIATION_ATTEMPTS,
            dependency_policy: DependencyPolicy::SkipDependents,
        }
    }
}

impl PipelineConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let monitor_history = positive_from_env("APP_MONITOR_HISTORY", defaults.monitor_history)?;
        let monitor_window = positive_from_env("APP_MONITOR_WINDOW", defaults.monitor_window)?;

        let max_remediation_attempts = match env::var("APP_MAX_REMEDIATION_ATTEMPTS") {
            Ok(raw) => raw
                .trim()
                .parse::<u32>()
                .map_err(|_| ConfigError::InvalidNumber {
                    key: "APP_MAX_REMEDIATION_ATTEMPTS",
                    value: raw,
                })?,
            Err(_) => defaults.max_remediation_attempts,
        };

        let dependency_policy = match env::var("APP_DEPENDENCY_POLICY") {
            Ok(raw) => match raw.trim().to_ascii_lowercase().as_str() {
                "skip" | "skip_dependents" => DependencyPolicy::SkipDependents,
                "run" | "run_dependents" => DependencyPolicy::RunDependents,
                _ => return Err(ConfigError::InvalidDependencyPolicy(raw)),
            },
            Err(_) => defaults.dependency_policy,
        };

        Ok(Self {
            monitor_history,
            monitor_window,
            max_remediation_attempts,
            dependency_policy,
        })
    }
}

fn positive_from_env(key: &'static str, default: usize) -> Result<usize, ConfigError> {
    let Ok(raw) = env::var(key) else {
        return Ok(default);
    };

    match raw.trim().parse::<usize>() {
        Ok(value) if value > 0 => Ok(value),
        _ => Err(ConfigError::InvalidNumber { key, value: raw }),
    }
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    InvalidNumber { key: &'static str, value: String },
    InvalidDependencyPolicy(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidNumber { key, value } => {
                write!(f, "{key} must be a positive integer (found '{value}')")
            }
            ConfigError::InvalidDependencyPolicy(value) => write!(
                f,
                "APP_DEPENDENCY_POLICY must be 'skip' or 'run' (found '{value}')"
            ),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidHost { source } => Some(source),
            ConfigError::InvalidPort
            | ConfigError::InvalidNumber { .. }
            | ConfigError::InvalidDependencyPolicy(_) => None,
        }
    }
}
