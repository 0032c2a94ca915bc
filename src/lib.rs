//! XIMSS webmail poller
//!
//! Keeps a long-poll session open against a CommuniGate XIMSS webmail
//! server for each registered user and forwards every newly arrived
//! message (rendered text plus streamed attachments) to a
//! [`Notifier`].
//!
//! - [`SessionClient`] speaks the wire protocol. It is stateless: every
//!   call takes a [`SessionState`] and returns its successor.
//! - [`render_page`] turns the server's HTML message page into
//!   forwarding text.
//! - [`PollingEngine`] drives one user's session through login,
//!   polling, renewal and re-login.
//! - [`Supervisor`] runs one engine per user on top of a [`Store`].

mod client;
mod config;
mod engine;
mod error;
mod flag;
mod mail;
mod notifier;
mod protocol;
mod render;
mod session;
mod store;
mod supervisor;

pub use client::{LONGPOLL_MAX_WAIT, SessionClient, UNAUTHORIZED_STATUS};
pub use config::WebmailConfig;
pub use engine::{Outcome, Phase, PollingEngine};
pub use error::{Error, Result};
pub use flag::Flag;
pub use mail::{
    Address, Attachment, AttachmentRef, ContentStream, Mail, MailBody, MailHeader, ReportMode,
};
pub use notifier::Notifier;
pub use protocol::{INBOX_VIEW, PollEvent, PollResponse, classify_poll, has_notification, scan_poll};
pub use render::{RenderedPage, normalize, render, render_page};
pub use session::{Secret, SessionState, is_session_token};
pub use store::{JsonFileStore, MemoryStore, Store, StoredPassword, UserContext, UserId};
pub use supervisor::Supervisor;
