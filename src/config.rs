// ⚙️ Configuration - environment first, `.env` as a fallback source

use serde::Deserialize;
use std::path::PathBuf;

pub const DEFAULT_DB_PATH: &str = "heysave.db";
pub const DEFAULT_ADDR: &str = "127.0.0.1:3000";
pub const DEFAULT_LOG_FILTER: &str = "heysave=info,tower_http=info";

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// SQLite database file
    pub database_path: PathBuf,

    /// Bind address for the HTTP server
    pub server_addr: String,

    /// `tracing` env-filter directive
    pub log_filter: String,

    /// Emit JSON log lines instead of the pretty format
    pub json_logs: bool,

    /// Registration step 2 asks for a billing address as well as the card
    pub require_address: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            database_path: PathBuf::from(DEFAULT_DB_PATH),
            server_addr: DEFAULT_ADDR.to_string(),
            log_filter: DEFAULT_LOG_FILTER.to_string(),
            json_logs: false,
            require_address: true,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup (the process environment in production)
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = AppConfig::default();

        AppConfig {
            database_path: lookup("HEYSAVE_DB")
                .map(PathBuf::from)
                .unwrap_or(defaults.database_path),
            server_addr: lookup("HEYSAVE_ADDR").unwrap_or(defaults.server_addr),
            log_filter: lookup("RUST_LOG").unwrap_or(defaults.log_filter),
            json_logs: lookup("LOG_FORMAT")
                .map(|v| v.eq_ignore_ascii_case("json"))
                .unwrap_or(defaults.json_logs),
            require_address: lookup("HEYSAVE_REQUIRE_ADDRESS")
                .and_then(|v| parse_bool(&v))
                .unwrap_or(defaults.require_address),
        }
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_nothing_set() {
        let config = AppConfig::from_lookup(|_| None);
        assert_eq!(config.database_path, PathBuf::from("heysave.db"));
        assert_eq!(config.server_addr, "127.0.0.1:3000");
        assert!(config.require_address);
        assert!(!config.json_logs);
    }

    #[test]
    fn test_overrides() {
        let config = AppConfig::from_lookup(lookup_from(&[
            ("HEYSAVE_DB", "/tmp/hs.db"),
            ("LOG_FORMAT", "JSON"),
            ("HEYSAVE_REQUIRE_ADDRESS", "no"),
        ]));
        assert_eq!(config.database_path, PathBuf::from("/tmp/hs.db"));
        assert!(config.json_logs);
        assert!(!config.require_address);
    }

    #[test]
    fn test_malformed_bool_keeps_default() {
        let config = AppConfig::from_lookup(lookup_from(&[("HEYSAVE_REQUIRE_ADDRESS", "maybe")]));
        assert!(config.require_address);
    }
}
