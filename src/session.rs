//! Session state threaded through every protocol call
//!
//! A [`SessionState`] is never mutated in place: each call on
//! [`SessionClient`](crate::SessionClient) takes one by reference and
//! returns the successor, so the counters of one user's session cannot
//! race with anything else.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::LazyLock;

static SESSION_TOKEN_PATTERN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new("^[0-9]{6}-[a-zA-Z0-9]{20}$").ok());

/// Credentials a user hands over when activating.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Secret {
    Password(String),
    /// A session id obtained elsewhere, e.g. copied from a browser.
    SessionToken(String),
}

impl Secret {
    /// Classify raw user input as a session token or a password.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        if is_session_token(raw) {
            Self::SessionToken(raw.to_string())
        } else {
            Self::Password(raw.to_string())
        }
    }
}

/// Whether `raw` has the shape of a resumable session id
/// (six digits, a dash, twenty alphanumerics).
#[must_use]
pub fn is_session_token(raw: &str) -> bool {
    SESSION_TOKEN_PATTERN
        .as_ref()
        .is_some_and(|pattern| pattern.is_match(raw))
}

/// Per-token protocol state.
///
/// The counters are scoped to `session_token`: a fresh token always
/// starts from zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    pub login_name: String,
    pub session_token: String,
    pub request_seq: u64,
    pub command_seq: u64,
    pub rand_seq: u64,
    pub ack_seq: u64,
    #[serde(default)]
    pub cookies: BTreeMap<String, String>,
    pub last_revalidated_at: DateTime<Utc>,
    /// Set once the inbox view has been opened for this token.
    #[serde(default)]
    pub inbox_open: bool,
}

impl SessionState {
    /// Initial state for a token the server just issued.
    #[must_use]
    pub fn new(login_name: impl Into<String>, session_token: impl Into<String>) -> Self {
        Self {
            login_name: login_name.into(),
            session_token: session_token.into(),
            request_seq: 0,
            command_seq: 0,
            rand_seq: 0,
            ack_seq: 0,
            cookies: BTreeMap::new(),
            last_revalidated_at: Utc::now(),
            inbox_open: false,
        }
    }

    /// Successor after a `/sync` request carrying `commands` commands.
    #[must_use]
    pub(crate) fn after_sync(&self, commands: u64) -> Self {
        Self {
            request_seq: self.request_seq + 1,
            rand_seq: self.rand_seq + 1,
            command_seq: self.command_seq + commands,
            ..self.clone()
        }
    }

    /// Successor after a long-poll; `ack_seq` is the server's `respSeq`
    /// when it sent one.
    #[must_use]
    pub(crate) fn after_poll(&self, ack_seq: Option<u64>) -> Self {
        Self {
            rand_seq: self.rand_seq + 1,
            ack_seq: ack_seq.unwrap_or(self.ack_seq),
            ..self.clone()
        }
    }

    #[must_use]
    pub(crate) fn with_cookies(self, cookies: BTreeMap<String, String>) -> Self {
        Self { cookies, ..self }
    }

    #[must_use]
    pub(crate) fn with_inbox_open(self) -> Self {
        Self {
            inbox_open: true,
            ..self
        }
    }

    /// The `Cookie` header value for this session, if any cookies are
    /// held.
    #[must_use]
    pub fn cookie_header(&self) -> Option<String> {
        if self.cookies.is_empty() {
            return None;
        }
        Some(
            self.cookies
                .iter()
                .map(|(name, value)| format!("{name}={value}"))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }
}
