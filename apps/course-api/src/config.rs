use std::time::Duration;

/// Course API configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL connection string.
    pub database_url: String,
    /// Maximum pooled database connections.
    pub db_pool_size: usize,
    /// Upper bound on waiting for a free pooled connection.
    pub db_pool_timeout: Duration,
    /// HS256 secret shared with the auth service.
    pub auth_jwt_secret: String,
    /// Port the HTTP server binds to.
    pub port: u16,
    /// Upper bound on waiting for a session lock.
    pub lock_timeout: Duration,
    /// Retries after a busy transaction before giving up.
    pub tx_max_retries: u32,
    /// Base backoff between retries; grows linearly with the attempt.
    pub tx_retry_backoff: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Panics with a descriptive message if a required variable is missing.
    pub fn from_env() -> Self {
        Self {
            database_url: required_var("DATABASE_URL"),
            db_pool_size: parsed_var("DB_POOL_SIZE", 20),
            db_pool_timeout: Duration::from_millis(parsed_var("DB_POOL_TIMEOUT_MS", 5000)),
            auth_jwt_secret: required_var("AUTH_JWT_SECRET"),
            port: parsed_var("PORT", 4100),
            lock_timeout: Duration::from_millis(parsed_var("LOCK_TIMEOUT_MS", 2000)),
            tx_max_retries: parsed_var("TX_MAX_RETRIES", 3),
            tx_retry_backoff: Duration::from_millis(parsed_var("TX_RETRY_BACKOFF_MS", 25)),
        }
    }
}

fn required_var(name: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| panic!("{name} env var is required"))
}

fn parsed_var<T: std::str::FromStr>(name: &str, default: T) -> T {
    parse_or(std::env::var(name).ok().as_deref(), default)
}

fn parse_or<T: std::str::FromStr>(raw: Option<&str>, default: T) -> T {
    raw.and_then(|v| v.trim().parse().ok()).unwrap_or(default)
}
