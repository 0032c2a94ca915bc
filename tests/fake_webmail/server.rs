//! In-process fake XIMSS webmail server for integration testing
//!
//! # How the session protocol works (overview)
//!
//! A client logs in over plain HTTP GET and receives a session token.
//! Everything else lives under `/Session/<token>/`:
//!
//! ```text
//!   GET  /XIMSSLogin/?userName=..&password=..   -> <session urlID=".."/>
//!   POST /Session/<t>/sync?reqSeq=0&random=0     <prefsRead>  (sets cookies)
//!   POST /Session/<t>/sessionadmin.wcgp          client registration
//!   GET  /Session/<t>/sync?reqSeq=1&random=1     <folderOpen> and friends
//!   GET  /Session/<t>/?ackSeq=0&maxWait=20       long-poll, held open
//!   GET  /Session/<t>/sync?...                   <folderSync> after a notify
//!   GET  /Session/<t>/FORMAT/Samoware/INBOX-MM-1/<uid>   message page
//! ```
//!
//! A dead token gets HTTP 550 on any session URL.
//!
//! Every request is recorded so tests can assert on the exact sequence
//! and parameters the client sent.

use super::handlers::{
    SyncKind, handle_attachment, handle_login, handle_long_poll, handle_message,
    handle_session_admin, handle_sync,
};
use super::http::{Request, Response, read_request, write_response};
use super::webmail::Webmail;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::BufReader;
use tokio::net::TcpListener;
use ximss_poller::WebmailConfig;

/// How long an idle long-poll is held before the empty envelope.
const IDLE_HOLD: Duration = Duration::from_millis(100);

/// What a recorded request was.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Login,
    PrefsRead,
    SessionAdmin,
    OpenInbox,
    FolderSync,
    FolderBrowse,
    LongPoll,
    Message,
    Attachment,
    Other,
}

/// One request as the server saw it.
#[derive(Debug, Clone)]
pub struct Recorded {
    pub op: Op,
    /// Session token from the URL, for `/Session/...` requests.
    pub token: Option<String>,
    pub method: String,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub cookie: Option<String>,
    pub body: String,
    /// The status the server answered with.
    pub status: u16,
}

impl Recorded {
    pub fn param(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Default)]
struct Shared {
    webmail: Webmail,
    requests: Vec<Recorded>,
}

/// A fake webmail server on localhost with an OS-assigned port.
///
/// The server runs until the `FakeWebmail` is dropped (the accept
/// task is aborted).
pub struct FakeWebmail {
    port: u16,
    shared: Arc<Mutex<Shared>>,
    handle: tokio::task::JoinHandle<()>,
}

impl Drop for FakeWebmail {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

impl FakeWebmail {
    /// Start a new fake server with the given state.
    pub async fn start(webmail: Webmail) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind to ephemeral port");
        let port = listener.local_addr().unwrap().port();
        let shared = Arc::new(Mutex::new(Shared {
            webmail,
            requests: Vec::new(),
        }));

        let state = shared.clone();
        let handle = tokio::spawn(async move {
            loop {
                let Ok((stream, _addr)) = listener.accept().await else {
                    break;
                };
                let state = state.clone();
                tokio::spawn(async move {
                    handle_connection(stream, &state).await;
                });
            }
        });

        Self {
            port,
            shared,
            handle,
        }
    }

    pub const fn port(&self) -> u16 {
        self.port
    }

    pub fn login_url(&self) -> String {
        format!("http://127.0.0.1:{}/XIMSSLogin/", self.port)
    }

    pub fn session_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    /// Client configuration pointing at this server, with short retry
    /// delays.
    pub fn config(&self) -> WebmailConfig {
        WebmailConfig {
            login_url: self.login_url(),
            session_url: self.session_url(),
            retry_delay: Duration::from_millis(20),
            ..WebmailConfig::default()
        }
    }

    /// Every request so far, in arrival order.
    pub fn requests(&self) -> Vec<Recorded> {
        self.shared.lock().unwrap().requests.clone()
    }

    /// The recorded requests of one kind.
    pub fn requests_of(&self, op: Op) -> Vec<Recorded> {
        self.requests().into_iter().filter(|r| r.op == op).collect()
    }

    /// The sequence of request kinds so far.
    pub fn ops(&self) -> Vec<Op> {
        self.requests().iter().map(|r| r.op).collect()
    }

    /// Mutate server state while a client is running.
    pub fn with_state<T>(&self, f: impl FnOnce(&mut Webmail) -> T) -> T {
        f(&mut self.shared.lock().unwrap().webmail)
    }

    /// Wait (up to five seconds) until `n` requests of kind `op` arrived.
    ///
    /// # Panics
    ///
    /// Panics on timeout, listing what did arrive.
    pub async fn wait_for(&self, op: Op, n: usize) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while self.requests_of(op).len() < n {
            assert!(
                tokio::time::Instant::now() < deadline,
                "timed out waiting for {n} x {op:?}; saw {:?}",
                self.ops()
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

async fn handle_connection(stream: tokio::net::TcpStream, shared: &Mutex<Shared>) {
    let mut reader = BufReader::new(stream);
    let Ok(Some(request)) = read_request(&mut reader).await else {
        return;
    };

    let (response, hold) = {
        let mut shared = shared.lock().unwrap();
        let (op, token, response, hold) = route(&mut shared.webmail, &request);
        shared.requests.push(Recorded {
            op,
            token,
            method: request.method.clone(),
            path: request.path.clone(),
            query: request.query.clone(),
            cookie: request.header("Cookie").map(str::to_string),
            body: request.body.clone(),
            status: response.status,
        });
        (response, hold)
    };

    if hold {
        tokio::time::sleep(IDLE_HOLD).await;
    }
    let _ = write_response(&mut reader, &response).await;
}

/// Dispatch a request to its handler.
fn route(webmail: &mut Webmail, request: &Request) -> (Op, Option<String>, Response, bool) {
    if request.path.starts_with("/XIMSSLogin") {
        return (Op::Login, None, handle_login(webmail, request), false);
    }

    let Some(rest) = request.path.strip_prefix("/Session/") else {
        let response = handle_attachment(webmail, &request.path);
        return (Op::Attachment, None, response, false);
    };
    let (token, rest) = rest.split_once('/').unwrap_or((rest, ""));
    let owned_token = Some(token.to_string());

    let op = match rest {
        "" => Op::LongPoll,
        "sync" => match SyncKind::of(&request.body) {
            SyncKind::PrefsRead => Op::PrefsRead,
            SyncKind::OpenInbox => Op::OpenInbox,
            SyncKind::FolderSync => Op::FolderSync,
            SyncKind::FolderBrowse => Op::FolderBrowse,
            SyncKind::Unknown => Op::Other,
        },
        "sessionadmin.wcgp" => Op::SessionAdmin,
        r if r.starts_with("FORMAT/Samoware/INBOX-MM-1/") => Op::Message,
        _ => Op::Attachment,
    };

    if !webmail.live_tokens.contains(token) {
        return (op, owned_token, Response::status(550), false);
    }

    let (response, hold) = match op {
        Op::LongPoll => handle_long_poll(webmail),
        Op::PrefsRead | Op::OpenInbox | Op::FolderSync | Op::FolderBrowse | Op::Other => {
            (handle_sync(webmail, token, request), false)
        }
        Op::SessionAdmin => (handle_session_admin(webmail, token, request), false),
        Op::Message => {
            let uid = rest.rsplit('/').next().unwrap_or_default();
            (handle_message(webmail, uid), false)
        }
        Op::Attachment | Op::Login => (handle_attachment(webmail, &request.path), false),
    };
    (op, owned_token, response, hold)
}
