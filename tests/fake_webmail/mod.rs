#![allow(dead_code)]

//! Fake XIMSS webmail server for integration testing
//!
//! This module provides an in-process HTTP server that speaks enough
//! of the webmail session protocol to test `SessionClient` and the
//! polling engine end-to-end:
//!
//! login -> prefsRead -> sessionadmin -> openInbox -> long-poll ->
//! folderSync -> message page -> attachments
//!
//! ## Module layout
//!
//! - `server` -- TCP listener, routing and request recording
//! - `handlers/` -- one file per endpoint (login, sync, long-poll, ...)
//! - `webmail` -- test data model (accounts, messages, poll script)
//! - `http` -- minimal HTTP/1.1 request parsing and response writing
//! - `recorder` -- a `Notifier` that records what the engine delivers

mod handlers;
mod http;
pub mod recorder;
mod server;

pub use recorder::{Event, RecordingNotifier};
pub use server::{FakeWebmail, Op, Recorded};
pub use webmail::{PollReply, WebmailBuilder};
