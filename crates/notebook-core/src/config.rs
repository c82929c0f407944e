//! Runtime configuration, loaded once from the process environment.

use std::collections::HashSet;

use crate::error::{Error, Result};

/// Process-wide configuration for the notebook runtime.
///
/// Loaded once at startup via [`Config::from_env`] and shared read-only
/// (behind an `Arc`) across every component that needs it.
#[derive(Debug, Clone)]
pub struct Config {
    /// Object-store endpoint (e.g. `http://minio:9000`).
    pub object_store_endpoint: String,
    /// Object-store access key.
    pub object_store_access_key: String,
    /// Object-store secret key.
    pub object_store_secret_key: String,
    /// Bucket holding component sources and assets.
    pub object_store_bucket: String,
    /// Whether to require TLS when talking to the object store.
    pub object_store_secure: bool,

    /// Maximum number of concurrently live sessions.
    pub max_sessions: usize,
    /// Idle timeout, in minutes, before a session is eligible for expiry.
    pub session_timeout_minutes: u64,

    /// Maximum accepted length (in characters) of a cell's source.
    pub max_code_length: usize,
    /// Top-level module names a cell is permitted to import.
    pub allowed_imports: HashSet<String>,
    /// Top-level module names a cell is never permitted to import.
    pub blocked_imports: HashSet<String>,

    /// Point count above which a plot is tagged with a `webgl` rendering hint.
    pub webgl_threshold: usize,
    /// Output size, in bytes, above which output content is gzip-compressed.
    pub max_output_size_bytes: usize,

    /// Address the RPC surface binds to (`host:port`).
    pub bind_address: String,
}

impl Config {
    /// Load configuration from the process environment, falling back to
    /// defaults for anything unset, then validate it.
    pub fn from_env() -> Result<Self> {
        let config = Self {
            object_store_endpoint: env_or("OBJECT_STORE_ENDPOINT", "http://localhost:9000"),
            object_store_access_key: env_or("OBJECT_STORE_ACCESS_KEY", ""),
            object_store_secret_key: env_or("OBJECT_STORE_SECRET_KEY", ""),
            object_store_bucket: env_or("OBJECT_STORE_BUCKET", "notebooks"),
            object_store_secure: env_or("OBJECT_STORE_SECURE", "false") == "true",

            max_sessions: env_parse("MAX_SESSIONS", 100)?,
            session_timeout_minutes: env_parse("SESSION_TIMEOUT_MINUTES", 240)?,

            max_code_length: env_parse("MAX_CODE_LENGTH", 25_000)?,
            allowed_imports: default_allowed_imports(),
            blocked_imports: default_blocked_imports(),

            webgl_threshold: env_parse("WEBGL_THRESHOLD", 1_000)?,
            max_output_size_bytes: env_parse("MAX_OUTPUT_SIZE_MB", 50)? * 1024 * 1024,

            bind_address: env_or("BIND_ADDRESS", "127.0.0.1:8000"),
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.max_sessions == 0 {
            return Err(Error::Configuration("MAX_SESSIONS must be positive".into()));
        }
        if self.session_timeout_minutes == 0 {
            return Err(Error::Configuration(
                "SESSION_TIMEOUT_MINUTES must be positive".into(),
            ));
        }
        if self.max_code_length == 0 {
            return Err(Error::Configuration("MAX_CODE_LENGTH must be positive".into()));
        }
        if self.bind_address.parse::<std::net::SocketAddr>().is_err() {
            return Err(Error::Configuration(format!(
                "invalid bind address: {}",
                self.bind_address
            )));
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            object_store_endpoint: "http://localhost:9000".to_string(),
            object_store_access_key: String::new(),
            object_store_secret_key: String::new(),
            object_store_bucket: "notebooks".to_string(),
            object_store_secure: false,
            max_sessions: 100,
            session_timeout_minutes: 240,
            max_code_length: 25_000,
            allowed_imports: default_allowed_imports(),
            blocked_imports: default_blocked_imports(),
            webgl_threshold: 1_000,
            max_output_size_bytes: 50 * 1024 * 1024,
            bind_address: "127.0.0.1:8000".to_string(),
        }
    }
}

fn default_allowed_imports() -> HashSet<String> {
    [
        "numpy", "pandas", "matplotlib", "plotly", "notebook_sdk", "math", "statistics",
        "random", "datetime", "json", "scipy", "seaborn",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_blocked_imports() -> HashSet<String> {
    [
        "os", "subprocess", "sys", "socket", "urllib", "requests", "http", "builtins",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> Result<T> {
    match std::env::var(key) {
        Ok(value) => value
            .parse()
            .map_err(|_| Error::Configuration(format!("invalid value for {key}: {value}"))),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.max_sessions, 100);
        assert_eq!(config.session_timeout_minutes, 240);
        assert!(config.allowed_imports.contains("pandas"));
        assert!(config.blocked_imports.contains("os"));
    }

    #[test]
    fn test_validate_rejects_zero_cap() {
        let mut config = Config::default();
        config.max_sessions = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_bind_address() {
        let mut config = Config::default();
        config.bind_address = "not-an-address".to_string();
        assert!(config.validate().is_err());
    }
}
