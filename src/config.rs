//! Runtime configuration
//!
//! Everything comes from environment variables (a `.env` file is loaded in
//! `main` before this runs) with defaults suitable for local development.

use std::env;
use std::path::PathBuf;
use tracing::warn;

const DEFAULT_JWT_SECRET: &str = "dev-secret-change-me";

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    /// None means the default path under the home directory.
    pub db_path: Option<PathBuf>,
    pub jwt_secret: String,
    pub cmc_api_key: String,
    /// TTL for cached market responses, in seconds.
    pub market_cache_ttl_secs: i64,
    pub rate_limit_window_secs: i64,
    pub rate_limit_max_requests: u32,
}

impl Config {
    pub fn from_env() -> Self {
        let jwt_secret = env::var("JWT_SECRET").unwrap_or_else(|_| {
            warn!("JWT_SECRET not set, using the development default");
            DEFAULT_JWT_SECRET.to_string()
        });

        let cmc_api_key = env::var("COINMARKETCAP_API_KEY").unwrap_or_else(|_| {
            warn!("COINMARKETCAP_API_KEY not set, market requests will be rejected upstream");
            String::new()
        });

        Self {
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env_parsed("PORT", 8080),
            db_path: env::var("CRYPTOFOLIO_DB").ok().map(PathBuf::from),
            jwt_secret,
            cmc_api_key,
            market_cache_ttl_secs: env_parsed("MARKET_CACHE_TTL_SECS", 300),
            rate_limit_window_secs: env_parsed("RATE_LIMIT_WINDOW_SECS", 15 * 60),
            rate_limit_max_requests: env_parsed("RATE_LIMIT_MAX_REQUESTS", 100),
        }
    }
}

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    parse_or(key, env::var(key).ok(), default)
}

fn parse_or<T: std::str::FromStr>(key: &str, raw: Option<String>, default: T) -> T {
    match raw {
        Some(raw) => match raw.parse() {
            Ok(value) => value,
            Err(_) => {
                warn!("Ignoring unparseable {}={:?}", key, raw);
                default
            }
        },
        None => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_or_falls_back_on_missing_or_garbage() {
        assert_eq!(parse_or::<u16>("PORT", None, 42), 42);
        assert_eq!(parse_or::<u16>("PORT", Some("not-a-number".to_string()), 7), 7);
        assert_eq!(parse_or::<u16>("PORT", Some("9090".to_string()), 7), 9090);
    }
}
