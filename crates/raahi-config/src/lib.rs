//! Environment configuration — only the variables the dispatch core
//! itself reads (§6). Everything else (onboarding, KYC, fare rules,
//! push fan-out, auth issuance) belongs to external collaborators and
//! is configured there, not here.
//!
//! Modeled after `database::DatabaseConnectionInfo::from_env`, but
//! upgraded from an `Option`-returning helper to a descriptive
//! `Result` since a lot more variables are required here and a silent
//! `None` would be unhelpful at startup.

use std::env;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),
    #[error("invalid value for environment variable {name}: {value}")]
    Invalid { name: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub internal_shared_secret: String,

    pub sse_port: u16,
    pub broker_tcp_port: u16,
    pub broker_ws_port: u16,
    pub socket_port: u16,

    pub max_k_ring: u32,
    pub h3_resolution: u8,

    pub platform_commission_rate: f64,
    pub stop_riding_penalty: f64,

    /// Fire-and-forget notification target for terminal/key ride
    /// transitions (§6 ambient wiring). Absent means notifications are
    /// a no-op rather than a startup error — this collaborator is
    /// optional, unlike the database.
    pub webhook_url: Option<String>,
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    env::var(name).map_err(|_| ConfigError::Missing(name))
}

fn required_parsed<T: std::str::FromStr>(name: &'static str) -> Result<T, ConfigError> {
    let raw = required(name)?;
    raw.parse()
        .map_err(|_| ConfigError::Invalid { name, value: raw })
}

fn optional_parsed<T: std::str::FromStr>(
    name: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value: raw }),
        Err(_) => Ok(default),
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            database_url: required("DATABASE_URL")?,
            internal_shared_secret: required("INTERNAL_SHARED_SECRET")?,
            sse_port: optional_parsed("SSE_PORT", 8080)?,
            broker_tcp_port: optional_parsed("BROKER_TCP_PORT", 1883)?,
            broker_ws_port: optional_parsed("BROKER_WS_PORT", 8083)?,
            socket_port: optional_parsed("SOCKET_PORT", 8084)?,
            max_k_ring: optional_parsed("MAX_K_RING", 3)?,
            h3_resolution: optional_parsed("H3_RESOLUTION", 9)?,
            platform_commission_rate: optional_parsed("PLATFORM_COMMISSION_RATE", 0.20)?,
            stop_riding_penalty: optional_parsed("STOP_RIDING_PENALTY", 50.0)?,
            webhook_url: env::var("WEBHOOK_URL").ok(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Environment variables are process-global, so these tests are
    // serialized through a mutex to avoid interfering with each other.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn clear_env() {
        for key in [
            "DATABASE_URL",
            "INTERNAL_SHARED_SECRET",
            "MAX_K_RING",
            "H3_RESOLUTION",
            "PLATFORM_COMMISSION_RATE",
        ] {
            env::remove_var(key);
        }
    }

    #[test]
    fn missing_required_var_is_an_error() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::Missing("DATABASE_URL")));
    }

    #[test]
    fn defaults_apply_when_optional_vars_absent() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        env::set_var("DATABASE_URL", "postgres://localhost/raahi");
        env::set_var("INTERNAL_SHARED_SECRET", "shh");

        let config = Config::from_env().unwrap();
        assert_eq!(config.max_k_ring, 3);
        assert_eq!(config.h3_resolution, 9);
        assert!((config.platform_commission_rate - 0.20).abs() < 1e-9);

        clear_env();
    }

    #[test]
    fn invalid_numeric_var_is_an_error() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        env::set_var("DATABASE_URL", "postgres://localhost/raahi");
        env::set_var("INTERNAL_SHARED_SECRET", "shh");
        env::set_var("MAX_K_RING", "not-a-number");

        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "MAX_K_RING", .. }));

        clear_env();
    }
}
