//! Mail headers, rendered bodies and the delivered [`Mail`] unit

use crate::error::Error;
use crate::flag::Flag;
use bytes::Bytes;
use chrono::{DateTime, NaiveDateTime, Utc};
use futures::stream::BoxStream;
use std::fmt;

/// What a folder report says happened to a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportMode {
    /// A message arrived. The only mode that is new mail.
    Added,
    /// Flags of a known message changed.
    Updated,
    Removed,
    /// The folder changed; details must be synced.
    Notify,
    /// Browse results carry no mode.
    Listed,
    Other(String),
}

impl ReportMode {
    #[must_use]
    pub fn parse(raw: Option<&str>) -> Self {
        match raw {
            None => Self::Listed,
            Some("added") => Self::Added,
            Some("updated") => Self::Updated,
            Some("removed") => Self::Removed,
            Some("notify") => Self::Notify,
            Some(other) => Self::Other(other.to_string()),
        }
    }
}

/// A mailbox address with its display name.
///
/// When the server sends no `realName`, `name` repeats the address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Address {
    pub address: String,
    pub name: String,
}

/// One message as listed by folder sync or browse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailHeader {
    pub uid: String,
    pub mode: ReportMode,
    pub flags: Vec<Flag>,
    pub local_time: Option<NaiveDateTime>,
    pub utc_time: Option<DateTime<Utc>>,
    pub recipients: Vec<Address>,
    pub from: Address,
    pub subject: Option<String>,
}

impl MailHeader {
    #[must_use]
    pub fn is_new(&self) -> bool {
        self.mode == ReportMode::Added
    }
}

/// A download link found on a rendered message page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentRef {
    /// Server-relative download path.
    pub reference: String,
    pub name: String,
}

/// Attachment content, streamed from the server on demand.
pub type ContentStream = BoxStream<'static, std::result::Result<Bytes, Error>>;

pub struct Attachment {
    pub name: String,
    pub content: ContentStream,
}

impl fmt::Debug for Attachment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Attachment")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
pub struct MailBody {
    /// Forwarding text: plain text with `<a>`/`<blockquote>` markup.
    pub text: String,
    pub attachments: Vec<Attachment>,
}

/// The unit handed to a [`Notifier`](crate::Notifier).
#[derive(Debug)]
pub struct Mail {
    pub header: MailHeader,
    pub body: MailBody,
}
