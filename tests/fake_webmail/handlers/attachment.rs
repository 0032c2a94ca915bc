//! Attachment download handler, keyed by request path.

use crate::fake_webmail::http::Response;
use crate::fake_webmail::webmail::Webmail;

pub fn handle_attachment(webmail: &Webmail, path: &str) -> Response {
    webmail
        .attachments
        .get(path)
        .map_or_else(|| Response::status(404), |content| Response::bytes(content.clone()))
}
