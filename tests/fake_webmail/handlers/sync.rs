//! `/Session/<token>/sync` handler.
//!
//! The command in the body decides the answer. Every answer ends with
//! a `<response>` element echoing the first command id.

use crate::fake_webmail::http::{Request, Response};
use crate::fake_webmail::webmail::Webmail;

/// Which request the client sent through `/sync`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncKind {
    PrefsRead,
    OpenInbox,
    FolderSync,
    FolderBrowse,
    Unknown,
}

impl SyncKind {
    pub fn of(body: &str) -> Self {
        if body.contains("<prefsRead") {
            Self::PrefsRead
        } else if body.contains("<folderOpen") {
            Self::OpenInbox
        } else if body.contains("<folderSync") {
            Self::FolderSync
        } else if body.contains("<folderBrowse") {
            Self::FolderBrowse
        } else {
            Self::Unknown
        }
    }
}

fn first_id(body: &str) -> &str {
    body.split("id=\"")
        .nth(1)
        .and_then(|rest| rest.split('"').next())
        .unwrap_or("0")
}

pub fn handle_sync(webmail: &mut Webmail, token: &str, request: &Request) -> Response {
    let id = first_id(&request.body);
    match SyncKind::of(&request.body) {
        SyncKind::PrefsRead => Response::xml(format!(
            r#"<XIMSS><prefs id="{id}"><Language>english</Language></prefs><response id="{id}"/></XIMSS>"#
        ))
        .with_header("Set-Cookie", &format!("SESSIONID=cookie-{token}; Path=/; HttpOnly")),
        SyncKind::OpenInbox => Response::xml(format!(
            r#"<XIMSS><knownValues id="{id}"/><mailbox mailbox="INBOX" id="{id}"/><folderReport folder="INBOX-MM-1" mode="init" messages="{}"/><response id="{id}"/></XIMSS>"#,
            webmail.messages.len()
        )),
        SyncKind::FolderSync => {
            let reports: String = webmail.pending_reports.drain(..).collect();
            Response::xml(format!(r#"<XIMSS>{reports}<response id="{id}"/></XIMSS>"#))
        }
        SyncKind::FolderBrowse => {
            let reports: String = webmail
                .messages
                .values()
                .rev()
                .map(|m| m.report(None))
                .collect();
            Response::xml(format!(r#"<XIMSS>{reports}<response id="{id}"/></XIMSS>"#))
        }
        SyncKind::Unknown => Response::xml(format!(
            r#"<XIMSS><response id="{id}" errorText="unknown command"/></XIMSS>"#
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognises_commands() {
        assert_eq!(SyncKind::of(r#"<XIMSS><prefsRead id="1"/></XIMSS>"#), SyncKind::PrefsRead);
        assert_eq!(
            SyncKind::of(r#"<XIMSS><listKnownValues id="1"/><folderOpen id="4"/></XIMSS>"#),
            SyncKind::OpenInbox
        );
        assert_eq!(SyncKind::of("<XIMSS/>"), SyncKind::Unknown);
    }

    #[test]
    fn echoes_first_id() {
        assert_eq!(first_id(r#"<XIMSS><folderSync folder="INBOX-MM-1" limit="300" id="12"/></XIMSS>"#), "12");
    }
}
