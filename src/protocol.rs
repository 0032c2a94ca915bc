//! XIMSS command documents and response parsing
//!
//! Requests to `/Session/{token}/sync` carry an `<XIMSS>` document with
//! one or more commands. Every command gets an `id` taken from the
//! session's command counter, so a batch of five commands consumes five
//! ids. Responses are parsed with `quick-xml`: serde structs for the
//! login and folder-report documents, the pull reader for the
//! long-poll envelope where only a couple of attributes matter.

use crate::error::Result;
use crate::flag::Flag;
use crate::mail::{Address, MailHeader, ReportMode};
use chrono::{DateTime, NaiveDateTime, Utc};
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use serde::Deserialize;
use tracing::debug;

/// Server-side name of the opened INBOX view.
pub const INBOX_VIEW: &str = "INBOX-MM-1";

/// The exact fragment the server sends when the inbox view changed.
pub const INBOX_CHANGED_MARKER: &str = r#"<folderReport folder="INBOX-MM-1" mode="notify"/>"#;

/// Folder-sync page size.
pub const SYNC_LIMIT: u32 = 300;

const FOLDER_FIELDS: [&str; 15] = [
    "FLAGS",
    "E-From",
    "Subject",
    "Pty",
    "Content-Type",
    "INTERNALDATE",
    "SIZE",
    "E-To",
    "E-Cc",
    "E-Reply-To",
    "X-Color",
    "Disposition-Notification-To",
    "X-Request-DSN",
    "References",
    "Message-ID",
];

/// A single XIMSS command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command<'a> {
    ListKnownValues,
    MailboxList { filter: &'a str },
    /// Open INBOX as [`INBOX_VIEW`], newest first.
    FolderOpen,
    SetSessionOption { name: &'a str, value: &'a str },
    FolderSync { limit: u32 },
    FolderBrowse { first: u32, last: u32 },
    PrefsRead { name: &'a str },
}

impl Command<'_> {
    fn fragment(&self, id: u64) -> String {
        match self {
            Self::ListKnownValues => format!(r#"<listKnownValues id="{id}"/>"#),
            Self::MailboxList { filter } => {
                format!(r#"<mailboxList filter="{filter}" pureFolder="yes" id="{id}"/>"#)
            }
            Self::FolderOpen => {
                let fields: String = FOLDER_FIELDS
                    .iter()
                    .map(|field| format!("<field>{field}</field>"))
                    .collect();
                format!(
                    r#"<folderOpen mailbox="INBOX" sortField="INTERNALDATE" sortOrder="desc" folder="{INBOX_VIEW}" id="{id}">{fields}</folderOpen>"#
                )
            }
            Self::SetSessionOption { name, value } => {
                format!(r#"<setSessionOption name="{name}" value="{value}" id="{id}"/>"#)
            }
            Self::FolderSync { limit } => {
                format!(r#"<folderSync folder="{INBOX_VIEW}" limit="{limit}" id="{id}"/>"#)
            }
            Self::FolderBrowse { first, last } => format!(
                r#"<folderBrowse folder="{INBOX_VIEW}" id="{id}"><index from="{first}" till="{last}"/></folderBrowse>"#
            ),
            Self::PrefsRead { name } => {
                format!(r#"<prefsRead id="{id}"><name>{name}</name></prefsRead>"#)
            }
        }
    }
}

/// Build an `<XIMSS>` document numbering `commands` from `first_id`.
#[must_use]
pub fn document(commands: &[Command<'_>], first_id: u64) -> String {
    let mut out = String::from("<XIMSS>");
    for (id, command) in (first_id..).zip(commands) {
        out.push_str(&command.fragment(id));
    }
    out.push_str("</XIMSS>");
    out
}

/// The commands sent by `open_inbox`, in order.
#[must_use]
pub fn open_inbox_commands() -> [Command<'static>; 5] {
    [
        Command::ListKnownValues,
        Command::MailboxList { filter: "%" },
        Command::MailboxList { filter: "%/%" },
        Command::FolderOpen,
        Command::SetSessionOption {
            name: "reportMailboxChanges",
            value: "yes",
        },
    ]
}

// -- login --

#[derive(Debug, Deserialize)]
struct LoginDocument {
    #[serde(default)]
    session: Option<RawSession>,
}

#[derive(Debug, Deserialize)]
struct RawSession {
    #[serde(rename = "@urlID")]
    url_id: String,
}

/// Extract the session token from a login response, `None` when the
/// server did not open a session.
pub fn parse_login(xml: &str) -> Result<Option<String>> {
    let doc: LoginDocument = quick_xml::de::from_str(xml)?;
    Ok(doc
        .session
        .map(|s| s.url_id)
        .filter(|token| !token.is_empty()))
}

// -- folder reports --

#[derive(Debug, Deserialize)]
struct ReportDocument {
    #[serde(rename = "folderReport", default)]
    reports: Vec<RawFolderReport>,
}

#[derive(Debug, Deserialize)]
struct RawFolderReport {
    #[serde(rename = "@mode", default)]
    mode: Option<String>,
    #[serde(rename = "@UID", default)]
    uid: Option<String>,
    #[serde(rename = "FLAGS", default)]
    flags: Option<String>,
    #[serde(rename = "INTERNALDATE", default)]
    internal_date: Option<RawDate>,
    #[serde(rename = "E-From", default)]
    from: Option<RawAddress>,
    #[serde(rename = "Subject", default)]
    subject: Option<String>,
    #[serde(rename = "E-To", default)]
    to: Vec<RawAddress>,
}

#[derive(Debug, Deserialize)]
struct RawDate {
    #[serde(rename = "@localTime", default)]
    local_time: Option<String>,
    #[serde(rename = "$text", default)]
    utc: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawAddress {
    #[serde(rename = "@realName", default)]
    real_name: Option<String>,
    #[serde(rename = "$text", default)]
    address: String,
}

impl From<RawAddress> for Address {
    fn from(raw: RawAddress) -> Self {
        let name = raw
            .real_name
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| raw.address.clone());
        Self {
            address: raw.address,
            name,
        }
    }
}

fn parse_local_time(raw: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(raw, "%Y%m%dT%H%M%S").ok()
}

fn parse_utc_time(raw: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(raw, "%Y%m%dT%H%M%SZ")
        .ok()
        .map(|t| t.and_utc())
}

/// Parse every `folderReport` carrying a UID into a [`MailHeader`].
///
/// Reports of every mode are returned; callers pick what they need.
pub fn parse_folder_reports(xml: &str) -> Result<Vec<MailHeader>> {
    let doc: ReportDocument = quick_xml::de::from_str(xml)?;
    let headers = doc
        .reports
        .into_iter()
        .filter_map(|raw| {
            let Some(uid) = raw.uid else {
                debug!("skipping folderReport without UID (mode {:?})", raw.mode);
                return None;
            };
            let (local_time, utc_time) = raw.internal_date.map_or((None, None), |date| {
                (
                    date.local_time.as_deref().and_then(parse_local_time),
                    date.utc.as_deref().map(str::trim).and_then(parse_utc_time),
                )
            });
            let from = raw.from.map_or_else(
                || Address {
                    address: String::new(),
                    name: String::new(),
                },
                Address::from,
            );
            Some(MailHeader {
                uid,
                mode: ReportMode::parse(raw.mode.as_deref()),
                flags: raw.flags.as_deref().map(Flag::parse_list).unwrap_or_default(),
                local_time,
                utc_time,
                recipients: raw.to.into_iter().map(Address::from).collect(),
                from,
                subject: raw.subject.filter(|s| !s.is_empty()),
            })
        })
        .collect();
    Ok(headers)
}

// -- long-poll envelope --

/// What a long-poll response means for the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollEvent {
    /// The inbox view changed; headers must be synced.
    Notification,
    /// A well-formed response with nothing for the inbox.
    Keepalive,
    /// Not a recognisable XIMSS document.
    Unknown,
}

/// A scanned long-poll response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollResponse {
    pub event: PollEvent,
    /// The root's `respSeq`, the next value to acknowledge.
    pub resp_seq: Option<u64>,
}

fn attribute(element: &BytesStart<'_>, name: &[u8]) -> Option<String> {
    element
        .attributes()
        .flatten()
        .find(|attr| attr.key.as_ref() == name)
        .and_then(|attr| attr.unescape_value().ok().map(|v| v.into_owned()))
}

fn is_inbox_notify(element: &BytesStart<'_>) -> bool {
    element.name().as_ref() == b"folderReport"
        && attribute(element, b"folder").as_deref() == Some(INBOX_VIEW)
        && attribute(element, b"mode").as_deref() == Some("notify")
}

/// Scan a long-poll response for the notification marker and the
/// root's `respSeq`.
#[must_use]
pub fn scan_poll(raw: &str) -> PollResponse {
    let mut reader = Reader::from_str(raw);
    let mut root_seen = false;
    let mut is_ximss = false;
    let mut resp_seq = None;
    let mut notify = false;
    let mut well_formed = true;

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e) | Event::Empty(ref e)) => {
                if !root_seen {
                    root_seen = true;
                    is_ximss = e.name().as_ref() == b"XIMSS";
                    resp_seq = attribute(e, b"respSeq").and_then(|v| v.trim().parse().ok());
                }
                notify |= is_inbox_notify(e);
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                debug!("long-poll response is not well-formed XML: {e}");
                well_formed = false;
                break;
            }
        }
    }

    let event = if raw.contains(INBOX_CHANGED_MARKER) || notify {
        PollEvent::Notification
    } else if well_formed && is_ximss {
        PollEvent::Keepalive
    } else {
        PollEvent::Unknown
    };
    PollResponse { event, resp_seq }
}

/// Classify a raw long-poll response.
#[must_use]
pub fn classify_poll(raw: &str) -> PollEvent {
    scan_poll(raw).event
}

/// Whether a raw long-poll response reports an inbox change.
#[must_use]
pub fn has_notification(raw: &str) -> bool {
    classify_poll(raw) == PollEvent::Notification
}
