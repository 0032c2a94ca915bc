//! Error types for ximss-poller

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// The server answered HTTP 550: the session token is dead.
    #[error("session is no longer authorized")]
    Unauthorized,

    /// Authenticate or revalidate came back without a session element.
    #[error("authentication rejected for {0}")]
    AuthFailure(String),

    #[error("unexpected HTTP status {status} from {url}")]
    Status { status: u16, url: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("XML error: {0}")]
    Xml(String),

    #[error("Mail rendering error: {0}")]
    Render(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Whether the failure is worth retrying on the same session.
    ///
    /// Network failures, non-2xx statuses other than 550 and garbled
    /// responses are transient. Everything else needs a state change.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Status { .. } | Self::Http(_) | Self::Xml(_))
    }
}

impl From<quick_xml::Error> for Error {
    fn from(e: quick_xml::Error) -> Self {
        Self::Xml(e.to_string())
    }
}

impl From<quick_xml::DeError> for Error {
    fn from(e: quick_xml::DeError) -> Self {
        Self::Xml(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
