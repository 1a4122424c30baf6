//! Application configuration loaded from environment variables.

use std::fmt;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl LogFormat {
    fn parse(value: &str) -> Self {
        if value.eq_ignore_ascii_case("json") {
            LogFormat::Json
        } else {
            LogFormat::Text
        }
    }
}

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`: bind address (default: `"0.0.0.0"`)
/// - `PORT`: listen port (default: `3000`)
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `LOG_FORMAT`: `text` or `json` (default: `text`)
/// - `DATABASE_URL`: PostgreSQL URL; in-memory stores when unset
/// - `PAYMENT_GATEWAY_URL`: gateway base URL; in-memory gateway when unset
/// - `PAYMENT_GATEWAY_API_KEY`: bearer token for the gateway
/// - `PAYMENT_CALLBACK_URL` / `PAYMENT_ERROR_URL`: browser return URLs
/// - `WEBHOOK_SECRET`: HMAC secret; webhook POSTs are rejected when unset
/// - `WEBHOOK_TOLERANCE_SECS`: allowed clock skew (default: `300`)
#[derive(Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub database_url: Option<String>,
    pub payment_gateway_url: Option<String>,
    pub payment_gateway_api_key: Option<String>,
    pub payment_callback_url: Option<String>,
    pub payment_error_url: Option<String>,
    pub webhook_secret: Option<String>,
    pub webhook_tolerance_secs: u64,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Self {
            host: non_empty("HOST").unwrap_or(defaults.host),
            port: non_empty("PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            log_level: non_empty("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: non_empty("LOG_FORMAT")
                .map(|f| LogFormat::parse(&f))
                .unwrap_or(defaults.log_format),
            database_url: non_empty("DATABASE_URL"),
            payment_gateway_url: non_empty("PAYMENT_GATEWAY_URL"),
            payment_gateway_api_key: non_empty("PAYMENT_GATEWAY_API_KEY"),
            payment_callback_url: non_empty("PAYMENT_CALLBACK_URL"),
            payment_error_url: non_empty("PAYMENT_ERROR_URL"),
            webhook_secret: non_empty("WEBHOOK_SECRET"),
            webhook_tolerance_secs: non_empty("WEBHOOK_TOLERANCE_SECS")
                .and_then(|t| t.parse().ok())
                .unwrap_or(defaults.webhook_tolerance_secs),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            database_url: None,
            payment_gateway_url: None,
            payment_gateway_api_key: None,
            payment_callback_url: None,
            payment_error_url: None,
            webhook_secret: None,
            webhook_tolerance_secs: 300,
        }
    }
}

// Secrets are never printed.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |v: &Option<String>| v.as_ref().map(|_| "<redacted>");
        f.debug_struct("Config")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("log_level", &self.log_level)
            .field("log_format", &self.log_format)
            .field("database_url", &redact(&self.database_url))
            .field("payment_gateway_url", &self.payment_gateway_url)
            .field("payment_gateway_api_key", &redact(&self.payment_gateway_api_key))
            .field("payment_callback_url", &self.payment_callback_url)
            .field("payment_error_url", &self.payment_error_url)
            .field("webhook_secret", &redact(&self.webhook_secret))
            .field("webhook_tolerance_secs", &self.webhook_tolerance_secs)
            .finish()
    }
}
