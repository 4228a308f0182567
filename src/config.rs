// src/config.rs

use dotenvy::dotenv;
use std::env;
use std::str::FromStr;

/// Minimum number of non-blank choices a question must carry.
pub const MIN_CHOICES: usize = 2;

/// Maximum number of choices per question.
pub const MAX_CHOICES: usize = 20;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub jwt_secret: String,
    /// Token lifetime in seconds.
    pub jwt_expiration: u64,
    pub rust_log: String,
    pub admin_username: Option<String>,
    pub admin_password: Option<String>,
    pub port: u16,
    pub rate_limit: RateLimitConfig,
}

/// Per-route budgets: `*_limit` requests per `window_secs`, per client.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub window_secs: u64,
    pub save_limit: u32,
    pub submit_limit: u32,
    pub auth_limit: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_secs: 60,
            save_limit: 60,
            submit_limit: 10,
            auth_limit: 20,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        dotenv().ok();

        let database_url = env::var("DATABASE_URL").expect("DATABASE_URL must be set");

        let jwt_secret = env::var("JWT_SECRET").expect("JWT_SECRET must be set");

        let rust_log = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

        let defaults = RateLimitConfig::default();
        let rate_limit = RateLimitConfig {
            window_secs: env_or("RATE_LIMIT_WINDOW_SECS", defaults.window_secs),
            save_limit: env_or("SAVE_RATE_LIMIT", defaults.save_limit),
            submit_limit: env_or("SUBMIT_RATE_LIMIT", defaults.submit_limit),
            auth_limit: env_or("AUTH_RATE_LIMIT", defaults.auth_limit),
        };

        Self {
            database_url,
            jwt_secret,
            jwt_expiration: env_or("JWT_EXPIRATION", 86_400),
            rust_log,
            admin_username: env::var("ADMIN_USERNAME").ok(),
            admin_password: env::var("ADMIN_PASSWORD").ok(),
            port: env_or("PORT", 3000),
            rate_limit,
        }
    }
}

/// Reads and parses an environment variable, falling back on absence or garbage.
fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
