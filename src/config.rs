//! Webmail endpoint and timing configuration

use crate::error::{Error, Result};
use std::env;
use std::time::Duration;

/// Endpoints, timeouts and polling policy for the webmail server.
#[derive(Debug, Clone)]
pub struct WebmailConfig {
    /// Full URL of the XIMSS login endpoint.
    pub login_url: String,
    /// Scheme and host serving `/Session/...` requests, without a
    /// trailing slash.
    pub session_url: String,
    /// When false, authentication asks the server to skip IP-origin
    /// checks (`DisableIPWatch=1`).
    pub ip_check: bool,
    pub request_timeout: Duration,
    pub longpoll_connect_timeout: Duration,
    pub longpoll_total_timeout: Duration,
    pub file_timeout: Duration,
    pub retry_delay: Duration,
    pub revalidate_interval: Duration,
}

impl Default for WebmailConfig {
    fn default() -> Self {
        Self {
            login_url: "https://mailstudent.bmstu.ru/XIMSSLogin/".to_string(),
            session_url: "https://student.bmstu.ru".to_string(),
            ip_check: false,
            request_timeout: Duration::from_secs(10),
            longpoll_connect_timeout: Duration::from_secs(5),
            longpoll_total_timeout: Duration::from_secs(30),
            file_timeout: Duration::from_secs(60),
            retry_delay: Duration::from_secs(5),
            revalidate_interval: Duration::from_secs(5 * 60 * 60),
        }
    }
}

impl WebmailConfig {
    /// Load configuration from environment variables
    ///
    /// Reads from `.env` file if present. All variables are optional:
    /// - `WEBMAIL_LOGIN_URL` (default: `https://mailstudent.bmstu.ru/XIMSSLogin/`)
    /// - `WEBMAIL_SESSION_URL` (default: `https://student.bmstu.ru`)
    /// - `WEBMAIL_IP_CHECK` (default: `false`)
    /// - `WEBMAIL_RETRY_DELAY_SECS` (default: `5`)
    /// - `WEBMAIL_REVALIDATE_INTERVAL_SECS` (default: `18000`)
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = Self::default();
        Ok(Self {
            login_url: env::var("WEBMAIL_LOGIN_URL").unwrap_or(defaults.login_url),
            session_url: env::var("WEBMAIL_SESSION_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or(defaults.session_url),
            ip_check: match env::var("WEBMAIL_IP_CHECK") {
                Ok(raw) => parse_bool("WEBMAIL_IP_CHECK", &raw)?,
                Err(_) => defaults.ip_check,
            },
            retry_delay: secs_var("WEBMAIL_RETRY_DELAY_SECS")?.unwrap_or(defaults.retry_delay),
            revalidate_interval: secs_var("WEBMAIL_REVALIDATE_INTERVAL_SECS")?
                .unwrap_or(defaults.revalidate_interval),
            ..defaults
        })
    }
}

fn secs_var(name: &str) -> Result<Option<Duration>> {
    env::var(name).map_or(Ok(None), |raw| {
        raw.trim()
            .parse::<u64>()
            .map(|secs| Some(Duration::from_secs(secs)))
            .map_err(|e| Error::Config(format!("Invalid {name}: {e}")))
    })
}

fn parse_bool(name: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(Error::Config(format!("Invalid {name}: {other}"))),
    }
}
