use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

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
    pub smtp: SmtpConfig,
    pub search: SearchConfig,
    pub links: LinkConfig,
    pub forms: FormsConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup, e.g. a map in tests.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let or = |key: &str, default: &str| var(key).unwrap_or_else(|| default.to_string());

        let environment = AppEnvironment::from_str(&or("APP_ENV", "development"));

        let host = or("APP_HOST", "127.0.0.1");
        let port = or("APP_PORT", "1337")
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort)?;

        let telemetry = TelemetryConfig {
            log_level: or("APP_LOG_LEVEL", "info"),
            format: LogFormat::from_str(&or("APP_LOG_FORMAT", "compact")),
        };

        let smtp_user = var("SMTP_USER");
        let smtp = SmtpConfig {
            host: or("SMTP_HOST", "localhost"),
            port: parse_number(&var, "SMTP_PORT", 587)?,
            secure: parse_flag(&var, "SMTP_SECURE", false)?,
            from: var("SMTP_FROM")
                .or_else(|| smtp_user.clone())
                .unwrap_or_else(|| "no-reply@localhost".to_string()),
            password: var("SMTP_PASS"),
            user: smtp_user,
            timeout: Duration::from_secs(parse_number(&var, "SMTP_TIMEOUT_SECS", 30)?),
        };

        let search = SearchConfig {
            node: var("ELASTIC_NODE"),
            username: var("ELASTIC_USERNAME"),
            password: var("ELASTIC_PASSWORD"),
            alias: var("ELASTIC_ALIAS")
                .or_else(|| var("ELASTIC_ALIAS_NAME"))
                .unwrap_or_else(|| "strapi-plugin-elasticsearch-index".to_string()),
            tls_reject_unauthorized: parse_flag(&var, "ELASTIC_TLS_REJECT_UNAUTHORIZED", true)?,
        };

        let links = LinkConfig {
            server_url: trim_url(or("SERVER_URL", "http://localhost:1337")),
            admin_url: trim_url(or("ADMIN_URL", "http://localhost:1337")),
            app_name: or("APP_NAME", "Admission Forms"),
        };

        let forms = FormsConfig {
            seed_admission_form: parse_flag(&var, "SEED_ADMISSION_FORM", false)?,
            schema_dir: var("FORMS_DIR").map(PathBuf::from),
            upload_dir: PathBuf::from(or("UPLOAD_DIR", "public/uploads")),
            max_upload_bytes: parse_number(&var, "UPLOAD_MAX_BYTES", 25 * 1024 * 1024)?,
            pdf_timeout: Duration::from_secs(parse_number(&var, "PDF_TIMEOUT_SECS", 30)?),
        };

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry,
            smtp,
            search,
            links,
            forms,
        })
    }
}

fn parse_number<T, F>(var: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    match var(key) {
        Some(raw) => raw.trim().parse::<T>().map_err(|_| ConfigError::InvalidNumber {
            key,
            value: raw,
        }),
        None => Ok(default),
    }
}

fn parse_flag<F>(var: &F, key: &'static str, default: bool) -> Result<bool, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match var(key) {
        Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(true),
            "false" | "0" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::InvalidFlag { key, value: raw }),
        },
        None => Ok(default),
    }
}

fn trim_url(url: String) -> String {
    url.trim_end_matches('/').to_string()
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

/// Log line rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Compact,
    Json,
}

impl LogFormat {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "json" => Self::Json,
            _ => Self::Compact,
        }
    }
}

/// Tracing controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
    pub format: LogFormat,
}

/// Outbound mail relay used for submission notifications.
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    /// Implicit TLS (usually port 465). When false the relay is upgraded with STARTTLS if offered.
    pub secure: bool,
    pub user: Option<String>,
    pub password: Option<String>,
    pub from: String,
    pub timeout: Duration,
}

/// Elasticsearch connection used by the search passthrough.
#[derive(Debug, Clone)]
pub struct SearchConfig {
    pub node: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub alias: String,
    pub tls_reject_unauthorized: bool,
}

/// Base URLs used when generating links in responses and emails.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    pub server_url: String,
    pub admin_url: String,
    pub app_name: String,
}

#[derive(Debug, Clone)]
pub struct FormsConfig {
    pub seed_admission_form: bool,
    pub schema_dir: Option<PathBuf>,
    pub upload_dir: PathBuf,
    pub max_upload_bytes: usize,
    pub pdf_timeout: Duration,
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    InvalidNumber { key: &'static str, value: String },
    InvalidFlag { key: &'static str, value: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidNumber { key, value } => {
                write!(f, "{key} must be a non-negative number (got '{value}')")
            }
            ConfigError::InvalidFlag { key, value } => {
                write!(f, "{key} must be true or false (got '{value}')")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidHost { source } => Some(source),
            _ => None,
        }
    }
}
