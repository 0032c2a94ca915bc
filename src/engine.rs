//! Per-user polling state machine
//!
//! ```text
//!   Authenticated --setSessionInfo/openInbox--> Polling
//!   Polling --interval elapsed--> Revalidating
//!   Polling --550--> Relogging (password stored) | Expired
//!   Revalidating --renewed--> Authenticated
//!   Revalidating --rejected--> Relogging (password stored) | Expired
//!   Relogging --ok--> Authenticated
//!   Relogging --rejected--> Expired
//!   any --cancelled--> Stopped
//! ```
//!
//! Transient failures stay in the current phase after a retry delay.
//! Messages reported as added stay queued until delivered, so a failed
//! body fetch is retried without losing the rest of its batch.
//! The [`UserContext`] is saved after every successful step.

use crate::client::SessionClient;
use crate::error::Error;
use crate::mail::{Mail, MailBody, MailHeader};
use crate::notifier::Notifier;
use crate::protocol::{self, PollEvent};
use crate::render;
use crate::session::{Secret, SessionState};
use crate::store::{Store, UserContext, UserId};
use chrono::Utc;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// A token is held but the inbox view is not open yet.
    Authenticated,
    Polling,
    Revalidating,
    Relogging,
    Expired,
    Stopped,
}

/// How an engine finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The session cannot be recovered; the user was notified and the
    /// stored context removed.
    Expired,
    Stopped,
}

#[derive(Debug, Clone, Copy)]
enum Notice {
    Expired,
    CannotRevalidate,
    CannotRelogin,
}

/// Drives one user's session until it expires or is cancelled.
pub struct PollingEngine {
    client: Arc<SessionClient>,
    store: Arc<dyn Store>,
    notifier: Arc<dyn Notifier>,
    context: UserContext,
    phase: Phase,
    retry_count: u32,
    /// Added messages not yet delivered, oldest report first.
    pending: VecDeque<MailHeader>,
    cancel: CancellationToken,
}

impl PollingEngine {
    /// Build an engine for a stored or freshly authenticated context.
    ///
    /// A context whose inbox is already open resumes polling directly;
    /// otherwise the engine first finishes opening the session.
    #[must_use]
    pub fn new(
        client: Arc<SessionClient>,
        store: Arc<dyn Store>,
        notifier: Arc<dyn Notifier>,
        context: UserContext,
        cancel: CancellationToken,
    ) -> Self {
        let phase = if context.session.inbox_open {
            Phase::Polling
        } else {
            Phase::Authenticated
        };
        Self {
            client,
            store,
            notifier,
            context,
            phase,
            retry_count: 0,
            pending: VecDeque::new(),
            cancel,
        }
    }

    #[must_use]
    pub const fn phase(&self) -> Phase {
        self.phase
    }

    const fn user_id(&self) -> UserId {
        self.context.user_id
    }

    /// Run until the session expires or the cancellation token fires.
    pub async fn run(mut self) -> Outcome {
        info!(
            "starting engine for user {} ({}) in {:?}",
            self.user_id(),
            self.context.login_name,
            self.phase
        );
        loop {
            if self.cancel.is_cancelled() {
                self.phase = Phase::Stopped;
            }
            self.phase = match self.phase {
                Phase::Authenticated => self.open_session().await,
                Phase::Polling => self.poll().await,
                Phase::Revalidating => self.revalidate().await,
                Phase::Relogging => self.relogin().await,
                Phase::Expired => {
                    info!("engine for user {} expired", self.user_id());
                    return Outcome::Expired;
                }
                Phase::Stopped => {
                    info!("engine for user {} stopped", self.user_id());
                    return Outcome::Stopped;
                }
            };
        }
    }

    // -- phases --

    async fn open_session(&mut self) -> Phase {
        let session = &self.context.session;
        match self.guarded(self.client.set_session_info(session)).await {
            None => return Phase::Stopped,
            Some(Err(e)) => return self.recover(e).await,
            Some(Ok(next)) => self.advance(next).await,
        }

        let session = &self.context.session;
        match self.guarded(self.client.open_inbox(session)).await {
            None => Phase::Stopped,
            Some(Err(e)) => self.recover(e).await,
            Some(Ok(next)) => {
                self.advance(next).await;
                debug!("inbox open for user {}", self.user_id());
                Phase::Polling
            }
        }
    }

    async fn poll(&mut self) -> Phase {
        if !self.pending.is_empty() {
            return self.deliver_pending().await;
        }
        if self.revalidation_due() {
            return Phase::Revalidating;
        }

        let session = &self.context.session;
        let raw = match self.guarded(self.client.long_poll(session)).await {
            None => return Phase::Stopped,
            Some(Err(e)) => return self.recover(e).await,
            Some(Ok((raw, next))) => {
                self.advance(next).await;
                raw
            }
        };

        match protocol::classify_poll(&raw) {
            PollEvent::Notification => self.drain_inbox().await,
            PollEvent::Keepalive => Phase::Polling,
            PollEvent::Unknown => {
                warn!(
                    "unrecognised long-poll response for user {}, retrying in {:?}",
                    self.user_id(),
                    self.client.config().retry_delay
                );
                self.back_off().await
            }
        }
    }

    async fn drain_inbox(&mut self) -> Phase {
        let session = &self.context.session;
        let headers = match self.guarded(self.client.fetch_new_headers(session)).await {
            None => return Phase::Stopped,
            Some(Err(e)) => return self.recover(e).await,
            Some(Ok((headers, next))) => {
                self.advance(next).await;
                headers
            }
        };

        self.pending.extend(headers.into_iter().filter(MailHeader::is_new));
        self.deliver_pending().await
    }

    /// Forward queued messages in order. A message leaves the queue only
    /// once it was delivered or found unrenderable.
    async fn deliver_pending(&mut self) -> Phase {
        while let Some(header) = self.pending.front().cloned() {
            if let Err(phase) = self.forward(header).await {
                debug!(
                    "{} message(s) still queued for user {}",
                    self.pending.len(),
                    self.user_id()
                );
                return phase;
            }
            self.pending.pop_front();
            self.retry_count = 0;
        }
        Phase::Polling
    }

    /// Fetch, render and deliver one new message.
    async fn forward(&mut self, header: MailHeader) -> std::result::Result<(), Phase> {
        let session = &self.context.session;
        let html = match self.guarded(self.client.fetch_body(session, &header.uid)).await {
            None => return Err(Phase::Stopped),
            Some(Err(e)) => return Err(self.recover(e).await),
            Some(Ok(html)) => html,
        };

        let page = match render::render_page(&html) {
            Ok(page) => page,
            Err(e) => {
                warn!("skipping message {} for user {}: {e}", header.uid, self.user_id());
                return Ok(());
            }
        };

        let mut attachments = Vec::with_capacity(page.attachments.len());
        for reference in &page.attachments {
            let session = &self.context.session;
            match self.guarded(self.client.open_attachment(session, reference)).await {
                None => return Err(Phase::Stopped),
                Some(Ok(attachment)) => attachments.push(attachment),
                Some(Err(e)) => warn!(
                    "skipping attachment {} of message {}: {e}",
                    reference.name, header.uid
                ),
            }
        }

        info!("delivering message {} to user {}", header.uid, self.user_id());
        let mail = Mail {
            header,
            body: MailBody {
                text: page.text,
                attachments,
            },
        };
        self.notifier.deliver(self.user_id(), mail).await;
        Ok(())
    }

    async fn revalidate(&mut self) -> Phase {
        let login_name = &self.context.login_name;
        let token = &self.context.session.session_token;
        match self.guarded(self.client.revalidate(login_name, token)).await {
            None => Phase::Stopped,
            Some(Err(e)) => self.recover(e).await,
            Some(Ok(Some(renewed))) => {
                info!("revalidated session for user {}", self.user_id());
                self.advance(renewed).await;
                Phase::Authenticated
            }
            Some(Ok(None)) => {
                info!("revalidation refused for user {}", self.user_id());
                if self.stored_password().await.is_some() {
                    Phase::Relogging
                } else {
                    self.expire(Notice::CannotRevalidate).await
                }
            }
        }
    }

    async fn relogin(&mut self) -> Phase {
        let Some(password) = self.stored_password().await else {
            return self.expire(Notice::Expired).await;
        };
        let secret = Secret::Password(password);
        let login_name = &self.context.login_name;
        match self.guarded(self.client.authenticate(login_name, &secret)).await {
            None => Phase::Stopped,
            Some(Ok(session)) => {
                info!("logged in again for user {}", self.user_id());
                self.advance(session).await;
                Phase::Authenticated
            }
            Some(Err(Error::AuthFailure(_))) => self.expire(Notice::CannotRelogin).await,
            Some(Err(e)) => self.recover(e).await,
        }
    }

    // -- helpers --

    /// Await `fut` unless the engine is cancelled first.
    async fn guarded<T: Send>(&self, fut: impl Future<Output = T> + Send) -> Option<T> {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => None,
            out = fut => Some(out),
        }
    }

    /// Adopt the successor state and persist it.
    async fn advance(&mut self, session: SessionState) {
        self.context = self.context.with_session(session);
        self.retry_count = 0;
        if let Err(e) = self.store.save(&self.context).await {
            error!("failed to save context for user {}: {e}", self.user_id());
        }
    }

    fn revalidation_due(&self) -> bool {
        let interval = self.client.config().revalidate_interval;
        (Utc::now() - self.context.session.last_revalidated_at)
            .to_std()
            .is_ok_and(|elapsed| elapsed >= interval)
    }

    async fn stored_password(&self) -> Option<String> {
        match self.store.load_password(self.user_id()).await {
            Ok(password) => password.as_deref().map(str::to_string),
            Err(e) => {
                error!("failed to load password for user {}: {e}", self.user_id());
                self.context.password.as_deref().map(str::to_string)
            }
        }
    }

    async fn recover(&mut self, err: Error) -> Phase {
        if matches!(err, Error::Unauthorized) {
            info!("session for user {} is no longer authorized", self.user_id());
            return if self.stored_password().await.is_some() {
                Phase::Relogging
            } else {
                self.expire(Notice::Expired).await
            };
        }

        self.retry_count += 1;
        let delay = self.client.config().retry_delay;
        warn!(
            "{err} for user {} in {:?} (attempt {}), retrying in {delay:?}",
            self.user_id(),
            self.phase,
            self.retry_count
        );
        self.back_off().await
    }

    /// Sleep the retry delay, then stay in the current phase.
    async fn back_off(&self) -> Phase {
        let delay = self.client.config().retry_delay;
        match self.guarded(tokio::time::sleep(delay)).await {
            None => Phase::Stopped,
            Some(()) => self.phase,
        }
    }

    async fn expire(&self, notice: Notice) -> Phase {
        let user_id = self.user_id();
        info!("session for user {user_id} expired: {notice:?}");
        if let Err(e) = self.store.remove(user_id).await {
            error!("failed to remove context for user {user_id}: {e}");
        }
        match notice {
            Notice::Expired => self.notifier.notify_expired(user_id).await,
            Notice::CannotRevalidate => self.notifier.notify_cannot_revalidate(user_id).await,
            Notice::CannotRelogin => self.notifier.notify_cannot_relogin(user_id).await,
        }
        Phase::Expired
    }
}
