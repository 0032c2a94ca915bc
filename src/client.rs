//! XIMSS session client
//!
//! Every operation takes the current [`SessionState`] by reference and
//! returns its successor; nothing here keeps per-user state. The two
//! `reqwest` clients (and their connection pools) are shared by every
//! user of the process.

use crate::config::WebmailConfig;
use crate::error::{Error, Result};
use crate::mail::{Attachment, AttachmentRef, MailHeader};
use crate::protocol::{self, Command, INBOX_VIEW, SYNC_LIMIT};
use crate::session::{Secret, SessionState};
use futures::{StreamExt, TryStreamExt};
use reqwest::header::{COOKIE, SET_COOKIE};
use reqwest::multipart::Form;
use reqwest::{Method, RequestBuilder, Response};
use tracing::{debug, info, warn};

/// The protocol's "session is gone" status.
pub const UNAUTHORIZED_STATUS: u16 = 550;

/// Seconds the server may hold a long-poll open.
pub const LONGPOLL_MAX_WAIT: u32 = 20;

const CLIENT_VERSION: &str = "6.1";

const CLIENT_INFO: &str =
    r#"{"platform":"Linux x86_64","clientName":"hSamoware","browser":"Firefox 122"}"#;

/// Stateless client for the webmail session protocol.
#[derive(Debug, Clone)]
pub struct SessionClient {
    config: WebmailConfig,
    http: reqwest::Client,
    longpoll: reqwest::Client,
}

impl SessionClient {
    /// Build the shared HTTP clients.
    ///
    /// # Errors
    ///
    /// Returns an error if the TLS backend cannot be initialised.
    pub fn new(config: WebmailConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(config.request_timeout)
            .timeout(config.request_timeout)
            .build()?;
        let longpoll = reqwest::Client::builder()
            .connect_timeout(config.longpoll_connect_timeout)
            .timeout(config.longpoll_total_timeout)
            .build()?;
        Ok(Self {
            config,
            http,
            longpoll,
        })
    }

    #[must_use]
    pub const fn config(&self) -> &WebmailConfig {
        &self.config
    }

    /// Open a new session with a password or a resumable session id.
    ///
    /// # Errors
    ///
    /// [`Error::AuthFailure`] when the server opens no session;
    /// transport errors otherwise.
    pub async fn authenticate(&self, login_name: &str, secret: &Secret) -> Result<SessionState> {
        debug!("logging in for {login_name}");
        match self.login_request(login_name, secret).await? {
            Some(token) => {
                info!("successful login for {login_name}");
                Ok(SessionState::new(login_name, token))
            }
            None => {
                debug!("login response for {login_name} has no session element");
                Err(Error::AuthFailure(login_name.to_string()))
            }
        }
    }

    /// Renew a session before the server expires it.
    ///
    /// Returns `None` when the server rejects the token. The new state
    /// starts from fresh counters.
    ///
    /// # Errors
    ///
    /// Transport errors only.
    pub async fn revalidate(&self, login_name: &str, token: &str) -> Result<Option<SessionState>> {
        debug!("revalidating session for {login_name}");
        let secret = Secret::SessionToken(token.to_string());
        let renewed = self.login_request(login_name, &secret).await?;
        if renewed.is_none() {
            debug!("revalidation response for {login_name} has no session element");
        }
        Ok(renewed.map(|token| SessionState::new(login_name, token)))
    }

    /// Read client preferences (which hands out the session cookies) and
    /// register this client with the server.
    ///
    /// # Errors
    ///
    /// [`Error::Unauthorized`] on HTTP 550, transport errors otherwise.
    pub async fn set_session_info(&self, state: &SessionState) -> Result<SessionState> {
        let response = self
            .send_sync(
                Method::POST,
                state,
                &[Command::PrefsRead { name: "Language" }],
                "setSessionInfo",
            )
            .await?;
        let mut cookies = state.cookies.clone();
        cookies.extend(response_cookies(&response));
        response.text().await?;
        let next = state.after_sync(1).with_cookies(cookies);

        let url = format!(
            "{}/Session/{}/sessionadmin.wcgp",
            self.config.session_url, state.session_token
        );
        let form = Form::new()
            .text("op", "setSessionInfo")
            .text("paramType", "json")
            .text("param", CLIENT_INFO)
            .text("session", state.session_token.clone());
        let response = with_cookies(self.http.post(&url).multipart(form), &next)
            .send()
            .await?;
        match response.status().as_u16() {
            UNAUTHORIZED_STATUS => return Err(Error::Unauthorized),
            code if !response.status().is_success() => {
                warn!("sessionadmin answered {code} for {}", state.login_name);
            }
            _ => {}
        }
        Ok(next)
    }

    /// Open the INBOX view and subscribe to change notifications.
    ///
    /// # Errors
    ///
    /// [`Error::Unauthorized`] on HTTP 550, transport errors otherwise.
    pub async fn open_inbox(&self, state: &SessionState) -> Result<SessionState> {
        let commands = protocol::open_inbox_commands();
        let response = self
            .send_sync(Method::GET, state, &commands, "openInbox")
            .await?;
        let text = response.text().await?;
        debug!("openInbox response for {}: {text}", state.login_name);
        Ok(state.after_sync(commands.len() as u64).with_inbox_open())
    }

    /// Wait for the server to report a change.
    ///
    /// Returns the raw response, to be classified with
    /// [`classify_poll`](crate::classify_poll).
    ///
    /// # Errors
    ///
    /// [`Error::Unauthorized`] on HTTP 550, transport errors otherwise
    /// (including the long-poll timeout).
    pub async fn long_poll(&self, state: &SessionState) -> Result<(String, SessionState)> {
        let url = format!(
            "{}/Session/{}/?ackSeq={}&maxWait={LONGPOLL_MAX_WAIT}&random={}",
            self.config.session_url, state.session_token, state.ack_seq, state.rand_seq
        );
        let response = with_cookies(self.longpoll.get(&url), state).send().await?;
        let response = check_status(response, &url, "longPoll").await?;
        let raw = response.text().await?;
        debug!("long-poll response for {}: {raw}", state.login_name);
        let scanned = protocol::scan_poll(&raw);
        Ok((raw, state.after_poll(scanned.resp_seq)))
    }

    /// Sync the INBOX view: reports of every mode since the last sync.
    ///
    /// # Errors
    ///
    /// [`Error::Unauthorized`] on HTTP 550, transport or XML errors
    /// otherwise.
    pub async fn fetch_new_headers(
        &self,
        state: &SessionState,
    ) -> Result<(Vec<MailHeader>, SessionState)> {
        let response = self
            .send_sync(
                Method::GET,
                state,
                &[Command::FolderSync { limit: SYNC_LIMIT }],
                "folderSync",
            )
            .await?;
        let text = response.text().await?;
        debug!("folderSync response for {}: {text}", state.login_name);
        let headers = protocol::parse_folder_reports(&text)?;
        Ok((headers, state.after_sync(1)))
    }

    /// List messages `first..=last` of the INBOX view, newest first.
    ///
    /// # Errors
    ///
    /// [`Error::Unauthorized`] on HTTP 550, transport or XML errors
    /// otherwise.
    pub async fn browse_headers(
        &self,
        state: &SessionState,
        first: u32,
        last: u32,
    ) -> Result<(Vec<MailHeader>, SessionState)> {
        let response = self
            .send_sync(
                Method::POST,
                state,
                &[Command::FolderBrowse { first, last }],
                "folderBrowse",
            )
            .await?;
        let text = response.text().await?;
        let headers = protocol::parse_folder_reports(&text)?;
        Ok((headers, state.after_sync(1)))
    }

    /// Fetch the server-rendered HTML page of one message.
    ///
    /// # Errors
    ///
    /// [`Error::Unauthorized`] on HTTP 550, transport errors otherwise.
    pub async fn fetch_body(&self, state: &SessionState, uid: &str) -> Result<String> {
        let url = format!(
            "{}/Session/{}/FORMAT/Samoware/{INBOX_VIEW}/{uid}",
            self.config.session_url, state.session_token
        );
        let response = with_cookies(self.http.get(&url), state).send().await?;
        let response = check_status(response, &url, "fetchBody").await?;
        Ok(response.text().await?)
    }

    /// Start downloading an attachment. The body is streamed, bounded by
    /// the file timeout rather than the request timeout.
    ///
    /// # Errors
    ///
    /// [`Error::Unauthorized`] on HTTP 550, transport errors otherwise.
    pub async fn open_attachment(
        &self,
        state: &SessionState,
        attachment: &AttachmentRef,
    ) -> Result<Attachment> {
        let url = if attachment.reference.starts_with("http://")
            || attachment.reference.starts_with("https://")
        {
            attachment.reference.clone()
        } else {
            format!("{}{}", self.config.session_url, attachment.reference)
        };
        let request = self.http.get(&url).timeout(self.config.file_timeout);
        let response = with_cookies(request, state).send().await?;
        let response = check_status(response, &url, "openAttachment").await?;
        Ok(Attachment {
            name: attachment.name.clone(),
            content: response.bytes_stream().map_err(Error::from).boxed(),
        })
    }

    // -- private helpers --

    async fn login_request(&self, login_name: &str, secret: &Secret) -> Result<Option<String>> {
        let mut params = vec![
            ("errorAsXML", "1"),
            ("EnableUseCookie", "1"),
            ("x2auth", "1"),
            ("canUpdatePwd", "1"),
            ("version", CLIENT_VERSION),
            ("userName", login_name),
        ];
        match secret {
            Secret::SessionToken(token) => params.push(("sessionid", token.as_str())),
            Secret::Password(password) => params.push(("password", password.as_str())),
        }
        if !self.config.ip_check {
            params.push(("DisableIPWatch", "1"));
        }

        let response = self
            .http
            .get(&self.config.login_url)
            .query(&params)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            warn!("received {status} from login endpoint for {login_name}");
            return Err(Error::Status {
                status: status.as_u16(),
                url: self.config.login_url.clone(),
            });
        }
        let text = response.text().await?;
        protocol::parse_login(&text)
    }

    async fn send_sync(
        &self,
        method: Method,
        state: &SessionState,
        commands: &[Command<'_>],
        op: &str,
    ) -> Result<Response> {
        let url = format!(
            "{}/Session/{}/sync?reqSeq={}&random={}",
            self.config.session_url, state.session_token, state.request_seq, state.rand_seq
        );
        let body = protocol::document(commands, state.command_seq);
        let request = self.http.request(method, &url).body(body);
        let response = with_cookies(request, state).send().await?;
        check_status(response, &url, op).await
    }
}

fn with_cookies(request: RequestBuilder, state: &SessionState) -> RequestBuilder {
    match state.cookie_header() {
        Some(cookies) => request.header(COOKIE, cookies),
        None => request,
    }
}

fn response_cookies(response: &Response) -> Vec<(String, String)> {
    response
        .headers()
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .filter_map(|raw| {
            let pair = raw.split(';').next()?;
            let (name, value) = pair.split_once('=')?;
            Some((name.trim().to_string(), value.trim().to_string()))
        })
        .collect()
}

async fn check_status(response: Response, url: &str, op: &str) -> Result<Response> {
    let status = response.status();
    if status.as_u16() == UNAUTHORIZED_STATUS {
        let body = response.text().await.unwrap_or_default();
        warn!("received 550 in {op}, session unauthorized. response: {body}");
        return Err(Error::Unauthorized);
    }
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        warn!("received non 2xx code in {op}: {status}. response: {body}");
        return Err(Error::Status {
            status: status.as_u16(),
            url: url.to_string(),
        });
    }
    Ok(response)
}
