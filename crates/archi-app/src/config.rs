use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;

use crate::controller::{ControllerConfig, DEFAULT_SKETCH_SCALE};
use crate::poller::PollConfig;

#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub api_url: String,
    pub poll_interval: Duration,
    pub poll_max_attempts: Option<u32>,
    pub request_timeout: Duration,
    pub session_file: PathBuf,
    pub sketch_scale: f32,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:8000".to_string(),
            poll_interval: Duration::from_secs(5),
            poll_max_attempts: None,
            request_timeout: Duration::from_secs(30),
            session_file: PathBuf::from(".archisynth/session.json"),
            sketch_scale: DEFAULT_SKETCH_SCALE,
        }
    }
}

impl AppConfig {
    /// Read `.env` if there is one, then the `ARCHI_*` environment variables.
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let defaults = Self::default();

        let poll_interval_secs: u64 = parse(&lookup, "ARCHI_POLL_INTERVAL_SECS")?
            .unwrap_or(defaults.poll_interval.as_secs());
        anyhow::ensure!(
            poll_interval_secs > 0,
            "ARCHI_POLL_INTERVAL_SECS must be at least 1"
        );
        let request_timeout_secs: u64 = parse(&lookup, "ARCHI_REQUEST_TIMEOUT_SECS")?
            .unwrap_or(defaults.request_timeout.as_secs());
        let sketch_scale: f32 =
            parse(&lookup, "ARCHI_SKETCH_SCALE")?.unwrap_or(defaults.sketch_scale);
        anyhow::ensure!(
            sketch_scale.is_finite() && sketch_scale > 0.0,
            "ARCHI_SKETCH_SCALE must be a positive number"
        );

        Ok(Self {
            api_url: lookup("ARCHI_API_URL").unwrap_or(defaults.api_url),
            poll_interval: Duration::from_secs(poll_interval_secs),
            poll_max_attempts: parse(&lookup, "ARCHI_POLL_MAX_ATTEMPTS")?,
            request_timeout: Duration::from_secs(request_timeout_secs),
            session_file: lookup("ARCHI_SESSION_FILE")
                .map(PathBuf::from)
                .unwrap_or(defaults.session_file),
            sketch_scale,
        })
    }

    pub fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            poll: PollConfig {
                interval: self.poll_interval,
                max_attempts: self.poll_max_attempts,
            },
            sketch_scale: self.sketch_scale,
        }
    }
}

fn parse<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> anyhow::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    lookup(key)
        .filter(|raw| !raw.trim().is_empty())
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .with_context(|| format!("{key} must be a number, got {raw:?}"))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = AppConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, AppConfig::default());

        let controller = config.controller_config();
        assert_eq!(controller.poll.interval, Duration::from_secs(5));
        assert_eq!(controller.poll.max_attempts, None);
        assert_eq!(controller.sketch_scale, 2.0);
    }

    #[test]
    fn test_overrides() {
        let config = AppConfig::from_lookup(lookup(&[
            ("ARCHI_API_URL", "https://api.example"),
            ("ARCHI_POLL_INTERVAL_SECS", "2"),
            ("ARCHI_POLL_MAX_ATTEMPTS", "60"),
            ("ARCHI_REQUEST_TIMEOUT_SECS", " 10 "),
            ("ARCHI_SESSION_FILE", "/tmp/archi/session.json"),
            ("ARCHI_SKETCH_SCALE", "1.5"),
        ]))
        .unwrap();

        assert_eq!(config.api_url, "https://api.example");
        assert_eq!(config.poll_interval, Duration::from_secs(2));
        assert_eq!(config.poll_max_attempts, Some(60));
        assert_eq!(config.request_timeout, Duration::from_secs(10));
        assert_eq!(config.session_file, PathBuf::from("/tmp/archi/session.json"));
        assert_eq!(config.sketch_scale, 1.5);
    }

    #[test]
    fn test_malformed_numbers_are_errors() {
        let err = AppConfig::from_lookup(lookup(&[("ARCHI_POLL_INTERVAL_SECS", "soon")]))
            .unwrap_err();
        assert!(err.to_string().contains("ARCHI_POLL_INTERVAL_SECS"));

        assert!(AppConfig::from_lookup(lookup(&[("ARCHI_SKETCH_SCALE", "-1")])).is_err());
    }

    #[test]
    fn test_zero_poll_interval_is_rejected() {
        let err = AppConfig::from_lookup(lookup(&[("ARCHI_POLL_INTERVAL_SECS", "0")])).unwrap_err();
        assert!(err.to_string().contains("ARCHI_POLL_INTERVAL_SECS"));
    }
}
