//! CLI configuration via environment variables
//!
//! Settings that affect the configuration pass itself are read by
//! `keel_config::ConfigLoader`; this only covers how the CLI behaves.

use std::env;

/// CLI configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Log filter directives (KEEL_LOG=debug, KEEL_LOG=keel_build=trace)
    pub log_filter: Option<String>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self {
            log_filter: env::var("KEEL_LOG")
                .ok()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_filter_from_env() {
        env::set_var("KEEL_LOG", " debug ");
        let config = Config::from_env();
        assert_eq!(config.log_filter.as_deref(), Some("debug"));

        env::set_var("KEEL_LOG", "");
        assert!(Config::from_env().log_filter.is_none());

        env::remove_var("KEEL_LOG");
        assert!(Config::from_env().log_filter.is_none());
    }
}
