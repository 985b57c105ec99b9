use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use chrono::Local;

use crate::workflows::scrutinio::{AttendancePolicy, GradingPolicy, SchoolCalendar};

const DEFAULT_DOCUMENTS_DIR: &str = "./archivi/scrutini";
const DEFAULT_SCHOOL_WEEKS: u16 = 33;

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
    pub documents: DocumentConfig,
    pub grading: GradingConfig,
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

        let root = env::var("APP_DOCUMENTS_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_DOCUMENTS_DIR));

        let school_weeks = match env::var("APP_SCHOOL_WEEKS") {
            Ok(raw) => raw
                .trim()
                .parse::<u16>()
                .ok()
                .filter(|weeks| *weeks > 0)
                .ok_or(ConfigError::InvalidSchoolWeeks)?,
            Err(_) => DEFAULT_SCHOOL_WEEKS,
        };
        let school_year = match env::var("APP_SCHOOL_YEAR") {
            Ok(raw) => Some(
                raw.trim()
                    .parse::<i32>()
                    .map_err(|_| ConfigError::InvalidSchoolYear)?,
            ),
            Err(_) => None,
        };

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig { log_level },
            documents: DocumentConfig { root },
            grading: GradingConfig {
                school_weeks,
                school_year,
            },
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

/// Tracing and metrics controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
}

/// Where generated session documents live.
#[derive(Debug, Clone)]
pub struct DocumentConfig {
    pub root: PathBuf,
}

#[derive(Debug, Clone)]
pub struct GradingConfig {
    pub school_weeks: u16,
    /// Start year of the school calendar; the year in progress when unset.
    pub school_year: Option<i32>,
}

impl GradingConfig {
    pub fn policy(&self) -> GradingPolicy {
        let calendar = match self.school_year {
            Some(year) => SchoolCalendar::for_school_year(year),
            None => SchoolCalendar::containing(Local::now().date_naive()),
        };
        GradingPolicy::new(calendar, AttendancePolicy::new(self.school_weeks))
    }
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    InvalidSchoolWeeks,
    InvalidSchoolYear,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidSchoolWeeks => {
                write!(f, "APP_SCHOOL_WEEKS must be a positive number of weeks")
            }
            ConfigError::InvalidSchoolYear => {
                write!(f, "APP_SCHOOL_YEAR must be a calendar year such as 2024")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidHost { source } => Some(source),
            ConfigError::InvalidPort
            | ConfigError::InvalidSchoolWeeks
            | ConfigError::InvalidSchoolYear => None,
        }
    }
}
