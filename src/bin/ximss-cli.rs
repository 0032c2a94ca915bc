#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc)]

//! CLI for the XIMSS webmail poller

use async_trait::async_trait;
use clap::{Parser, Subcommand};
use futures::TryStreamExt;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use ximss_poller::{
    JsonFileStore, Mail, Notifier, Secret, SessionClient, Store, Supervisor, UserContext, UserId,
    WebmailConfig,
};

const DEFAULT_STORE_DIR: &str = "sessions";

#[derive(Parser)]
#[command(name = "ximss-cli")]
#[command(about = "Forward new webmail messages from XIMSS long-poll sessions")]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Directory holding one session file per user
    /// (default: $XIMSS_STORE_DIR or ./sessions)
    #[arg(long, global = true)]
    store: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Log in once and print the session state
    Login {
        /// Webmail login name
        login: String,

        /// Password or session id
        secret: String,
    },

    /// Log a user in and store the session for `run`
    Activate {
        /// User id in the front-end
        user_id: UserId,

        /// Webmail login name
        login: String,

        /// Password or session id
        secret: String,
    },

    /// Forget a stored user
    Deactivate {
        /// User id in the front-end
        user_id: UserId,
    },

    /// List stored users
    Users,

    /// Render a saved message page as forwarding text
    Render {
        /// HTML file as served by the webmail
        file: PathBuf,
    },

    /// Poll every stored user until interrupted
    Run,
}

#[derive(Serialize)]
struct UserRow<'a> {
    user_id: UserId,
    login_name: &'a str,
    password_stored: bool,
    inbox_open: bool,
    last_revalidated_at: String,
}

#[derive(Serialize)]
struct RenderedOutput<'a> {
    text: &'a str,
    attachments: Vec<(&'a str, &'a str)>,
}

/// Prints delivered mail to stdout.
struct LogNotifier {
    json: bool,
}

#[async_trait]
impl Notifier for LogNotifier {
    async fn deliver(&self, user_id: UserId, mail: Mail) {
        let Mail { header, body } = mail;
        let mut attachments = Vec::with_capacity(body.attachments.len());
        for attachment in body.attachments {
            let size = attachment
                .content
                .try_fold(0usize, |acc, chunk| async move {
                    Ok::<_, ximss_poller::Error>(acc + chunk.len())
                })
                .await;
            match size {
                Ok(size) => attachments.push((attachment.name, size)),
                Err(e) => warn!("failed to download {}: {e}", attachment.name),
            }
        }

        if self.json {
            let line = serde_json::json!({
                "user_id": user_id,
                "uid": header.uid,
                "from": header.from.address,
                "subject": header.subject,
                "text": body.text,
                "attachments": attachments,
            });
            println!("{line}");
        } else {
            println!("--- user {user_id}, message {} ---", header.uid);
            println!("From:    {} <{}>", header.from.name, header.from.address);
            println!("Subject: {}", header.subject.as_deref().unwrap_or("(no subject)"));
            println!("\n{}\n", body.text);
            for (name, size) in &attachments {
                println!("  [{name}, {size} bytes]");
            }
        }
    }

    async fn notify_expired(&self, user_id: UserId) {
        warn!("session for user {user_id} expired; activate again");
    }

    async fn notify_cannot_revalidate(&self, user_id: UserId) {
        warn!("session for user {user_id} could not be renewed; activate again");
    }

    async fn notify_cannot_relogin(&self, user_id: UserId) {
        warn!("stored password for user {user_id} was rejected; activate again");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    match &args.command {
        Command::Login { login, secret } => cmd_login(&args, login, secret).await?,
        Command::Activate {
            user_id,
            login,
            secret,
        } => cmd_activate(&args, *user_id, login, secret).await?,
        Command::Deactivate { user_id } => cmd_deactivate(&args, *user_id).await?,
        Command::Users => cmd_users(&args).await?,
        Command::Render { file } => cmd_render(&args, file).await?,
        Command::Run => cmd_run(&args).await?,
    }

    Ok(())
}

fn store_dir(args: &Args) -> PathBuf {
    args.store.clone().unwrap_or_else(|| {
        std::env::var_os("XIMSS_STORE_DIR")
            .map_or_else(|| PathBuf::from(DEFAULT_STORE_DIR), PathBuf::from)
    })
}

fn client() -> anyhow::Result<Arc<SessionClient>> {
    let config = WebmailConfig::from_env()?;
    Ok(Arc::new(SessionClient::new(config)?))
}

async fn supervisor(args: &Args) -> anyhow::Result<Supervisor> {
    let store = JsonFileStore::open(store_dir(args)).await?;
    Ok(Supervisor::new(
        client()?,
        Arc::new(store),
        Arc::new(LogNotifier { json: args.json }),
    ))
}

async fn cmd_login(args: &Args, login: &str, secret: &str) -> anyhow::Result<()> {
    let client = client()?;
    let state = client.authenticate(login, &Secret::parse(secret)).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&state)?);
    } else {
        println!("Login:   {}", state.login_name);
        println!("Session: {}", state.session_token);
    }

    Ok(())
}

async fn cmd_activate(
    args: &Args,
    user_id: UserId,
    login: &str,
    secret: &str,
) -> anyhow::Result<()> {
    let supervisor = supervisor(args).await?;
    supervisor.activate(user_id, login, secret).await?;
    supervisor.shutdown().await;
    println!("Activated user {user_id} as {login}");
    Ok(())
}

async fn cmd_deactivate(args: &Args, user_id: UserId) -> anyhow::Result<()> {
    let store = JsonFileStore::open(store_dir(args)).await?;
    let known = store.load(user_id).await?.is_some();
    store.remove(user_id).await?;
    if known {
        println!("Deactivated user {user_id}");
    } else {
        println!("User {user_id} was not active");
    }
    Ok(())
}

async fn cmd_users(args: &Args) -> anyhow::Result<()> {
    let store = JsonFileStore::open(store_dir(args)).await?;
    let contexts = store.load_all().await?;
    let rows: Vec<UserRow<'_>> = contexts.iter().map(user_row).collect();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    if rows.is_empty() {
        println!("No stored users.");
        return Ok(());
    }
    println!(
        "{:<12} {:<24} {:<9} {:<6} {}",
        "User", "Login", "Password", "Inbox", "Revalidated"
    );
    println!("{}", "-".repeat(80));
    for row in &rows {
        println!(
            "{:<12} {:<24} {:<9} {:<6} {}",
            row.user_id,
            row.login_name,
            if row.password_stored { "yes" } else { "no" },
            if row.inbox_open { "open" } else { "-" },
            row.last_revalidated_at,
        );
    }
    println!("\n{} user(s)", rows.len());
    Ok(())
}

fn user_row(context: &UserContext) -> UserRow<'_> {
    UserRow {
        user_id: context.user_id,
        login_name: &context.login_name,
        password_stored: context.password.is_present(),
        inbox_open: context.session.inbox_open,
        last_revalidated_at: context
            .session
            .last_revalidated_at
            .format("%Y-%m-%d %H:%M")
            .to_string(),
    }
}

async fn cmd_render(args: &Args, file: &Path) -> anyhow::Result<()> {
    let html = tokio::fs::read_to_string(file).await?;
    let page = ximss_poller::render_page(&html)?;

    if args.json {
        let output = RenderedOutput {
            text: &page.text,
            attachments: page
                .attachments
                .iter()
                .map(|a| (a.name.as_str(), a.reference.as_str()))
                .collect(),
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        println!("{}", page.text);
        for attachment in &page.attachments {
            println!("  [{}] {}", attachment.name, attachment.reference);
        }
    }

    Ok(())
}

async fn cmd_run(args: &Args) -> anyhow::Result<()> {
    let supervisor = supervisor(args).await?;
    let started = supervisor.start().await?;
    if started == 0 {
        warn!("no stored users; use `activate` first");
    }

    tokio::signal::ctrl_c().await?;
    info!("interrupted, stopping engines");
    supervisor.shutdown().await;
    Ok(())
}
