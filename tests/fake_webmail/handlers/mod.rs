//! Endpoint handlers for the fake webmail server.
//!
//! Each handler lives in its own module and answers a single endpoint
//! (login, `/sync`, long-poll, message page, attachment, sessionadmin).
//! Handlers run under the state lock and never block.

mod attachment;
mod sync;

pub use attachment::handle_attachment;
pub use login::handle_login;
pub use long_poll::handle_long_poll;
pub use message::handle_message;
pub use session_admin::handle_session_admin;
pub use sync::{SyncKind, handle_sync};
