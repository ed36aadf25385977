use std::env;
use std::path::PathBuf;
use std::time::Duration;

use chess_core::clock::DEFAULT_CLOCK_SECONDS;

use crate::error::{ClientError, Result};

#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// API prefix, e.g. `http://localhost:8080/api`
    pub api_url: String,
    pub poll_interval: Duration,
    /// One-shot early poll after a game view is activated
    pub initial_sync_delay: Duration,
    pub clock_tick: Duration,
    pub invitation_poll_interval: Duration,
    pub default_clock_seconds: i64,
    pub http_timeout: Duration,
    /// Where the credential and identity survive restarts
    pub session_file: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:8080/api".to_string(),
            poll_interval: Duration::from_millis(1500),
            initial_sync_delay: Duration::from_millis(800),
            clock_tick: Duration::from_millis(1000),
            invitation_poll_interval: Duration::from_millis(2000),
            default_clock_seconds: DEFAULT_CLOCK_SECONDS,
            http_timeout: Duration::from_secs(10),
            session_file: None,
        }
    }
}

impl ClientConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        let millis = |name: &str| {
            var(name)
                .and_then(|v| v.parse().ok())
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis)
        };
        let api_url = match var("CHESS_API_URL") {
            Some(url) => {
                let url = url.trim().trim_end_matches('/').to_string();
                if !(url.starts_with("http://") || url.starts_with("https://")) {
                    return Err(ClientError::Config("CHESS_API_URL must be an http(s) URL"));
                }
                url
            }
            None => defaults.api_url,
        };
        Ok(Self {
            api_url,
            poll_interval: millis("POLL_INTERVAL_MS").unwrap_or(defaults.poll_interval),
            initial_sync_delay: millis("INITIAL_SYNC_DELAY_MS")
                .unwrap_or(defaults.initial_sync_delay),
            clock_tick: millis("CLOCK_TICK_MS").unwrap_or(defaults.clock_tick),
            invitation_poll_interval: millis("INVITATION_POLL_MS")
                .unwrap_or(defaults.invitation_poll_interval),
            default_clock_seconds: var("DEFAULT_CLOCK_SECONDS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.default_clock_seconds),
            http_timeout: var("HTTP_TIMEOUT_SECS")
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.http_timeout),
            session_file: var("CHESS_SESSION_FILE").map(PathBuf::from),
        })
    }
}
