use std::fmt;
use std::path::PathBuf;

use crate::csrf::DEFAULT_TOKEN_TTL_SECS;
use crate::rate_limit::RateLimitConfig;

/// Process configuration, read once at startup.
#[derive(Clone)]
pub struct AppConfig {
    pub db_path: PathBuf,
    pub host: String,
    pub port: u16,
    pub secret_key: Option<String>,
    pub csrf_ttl_secs: i64,
    pub threads_per_page: u32,
    pub comments_per_page: u32,
    pub enable_hsts: bool,
    pub rate_limit: RateLimitConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("forum.db"),
            host: "127.0.0.1".to_string(),
            port: 8080,
            secret_key: None,
            csrf_ttl_secs: DEFAULT_TOKEN_TTL_SECS,
            threads_per_page: 20,
            comments_per_page: 50,
            enable_hsts: false,
            rate_limit: RateLimitConfig::default(),
        }
    }
}

impl AppConfig {
    /// Unset or unparsable variables fall back to their defaults.
    pub fn from_env() -> Self {
        fn parsed<T: std::str::FromStr>(name: &str, default: T) -> T {
            std::env::var(name).ok().and_then(|v| v.trim().parse().ok()).unwrap_or(default)
        }
        fn flag(name: &str, default: bool) -> bool {
            std::env::var(name).map(|v| v == "1" || v.eq_ignore_ascii_case("true")).unwrap_or(default)
        }
        let d = Self::default();
        Self {
            db_path: std::env::var_os("FORUM_DB_PATH").map(PathBuf::from).unwrap_or(d.db_path),
            host: std::env::var("HOST").unwrap_or(d.host),
            port: parsed("PORT", d.port),
            secret_key: std::env::var("SECRET_KEY").ok(),
            csrf_ttl_secs: parsed("CSRF_TTL_SECS", d.csrf_ttl_secs).max(1),
            threads_per_page: parsed("THREADS_PER_PAGE", d.threads_per_page).max(1),
            comments_per_page: parsed("COMMENTS_PER_PAGE", d.comments_per_page).max(1),
            enable_hsts: flag("ENABLE_HSTS", d.enable_hsts),
            rate_limit: RateLimitConfig::from_env(),
        }
    }
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppConfig")
            .field("db_path", &self.db_path)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("secret_key", &self.secret_key.as_ref().map(|_| "[REDACTED]"))
            .field("csrf_ttl_secs", &self.csrf_ttl_secs)
            .field("threads_per_page", &self.threads_per_page)
            .field("comments_per_page", &self.comments_per_page)
            .field("enable_hsts", &self.enable_hsts)
            .field("rate_limit", &self.rate_limit)
            .finish()
    }
}
