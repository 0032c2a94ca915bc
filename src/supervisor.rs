//! One polling engine per active user

use crate::client::SessionClient;
use crate::engine::{Outcome, PollingEngine};
use crate::error::Result;
use crate::notifier::Notifier;
use crate::session::Secret;
use crate::store::{Store, StoredPassword, UserContext, UserId};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

struct Handle {
    cancel: CancellationToken,
    task: JoinHandle<Outcome>,
}

/// Owns the engines of every active user.
///
/// Engines share one [`SessionClient`], one [`Store`] and one
/// [`Notifier`]. Each runs on its own task under a child of the
/// supervisor's cancellation token, so [`shutdown`](Self::shutdown)
/// stops them all.
pub struct Supervisor {
    client: Arc<SessionClient>,
    store: Arc<dyn Store>,
    notifier: Arc<dyn Notifier>,
    shutdown: CancellationToken,
    engines: Mutex<HashMap<UserId, Handle>>,
}

impl Supervisor {
    #[must_use]
    pub fn new(
        client: Arc<SessionClient>,
        store: Arc<dyn Store>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            client,
            store,
            notifier,
            shutdown: CancellationToken::new(),
            engines: Mutex::new(HashMap::new()),
        }
    }

    /// Resume an engine for every stored context.
    ///
    /// Returns the number of engines started.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be listed.
    pub async fn start(&self) -> Result<usize> {
        let contexts = self.store.load_all().await?;
        let count = contexts.len();
        for context in contexts {
            self.spawn(context).await;
        }
        info!("resumed {count} stored session(s)");
        Ok(count)
    }

    /// Authenticate a user and start polling for them.
    ///
    /// `secret` is either a password or a session id copied from an
    /// open webmail session. Only a password is kept for re-login.
    /// A running engine for the same user is replaced.
    ///
    /// # Errors
    ///
    /// [`Error::AuthFailure`](crate::Error::AuthFailure) when the
    /// credentials are rejected; transport or store errors otherwise.
    /// Nothing is stored on failure.
    pub async fn activate(&self, user_id: UserId, login_name: &str, secret: &str) -> Result<()> {
        let secret = Secret::parse(secret);
        let session = self.client.authenticate(login_name, &secret).await?;
        let password = match secret {
            Secret::Password(password) => StoredPassword::Present(password),
            Secret::SessionToken(_) => StoredPassword::Absent,
        };
        let context = UserContext {
            user_id,
            login_name: login_name.to_string(),
            password,
            session,
        };

        self.stop(user_id).await;
        self.store.save(&context).await?;
        self.spawn(context).await;
        info!("activated user {user_id} as {login_name}");
        Ok(())
    }

    /// Stop polling for a user and forget their context.
    ///
    /// Returns whether an engine was running.
    ///
    /// # Errors
    ///
    /// Returns an error if the stored context cannot be removed.
    pub async fn deactivate(&self, user_id: UserId) -> Result<bool> {
        let was_running = self.stop(user_id).await;
        self.store.remove(user_id).await?;
        info!("deactivated user {user_id}");
        Ok(was_running)
    }

    /// Users whose engine is still running.
    pub async fn active_users(&self) -> Vec<UserId> {
        let engines = self.engines.lock().await;
        let mut users: Vec<_> = engines
            .iter()
            .filter(|(_, handle)| !handle.task.is_finished())
            .map(|(user_id, _)| *user_id)
            .collect();
        users.sort_unstable();
        users
    }

    /// Cancel every engine and wait for them to finish.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let handles: Vec<_> = self.engines.lock().await.drain().collect();
        for (user_id, handle) in handles {
            join(user_id, handle.task).await;
        }
        info!("all engines stopped");
    }

    async fn spawn(&self, context: UserContext) {
        let user_id = context.user_id;
        let cancel = self.shutdown.child_token();
        let engine = PollingEngine::new(
            Arc::clone(&self.client),
            Arc::clone(&self.store),
            Arc::clone(&self.notifier),
            context,
            cancel.clone(),
        );
        let task = tokio::spawn(engine.run());

        let mut engines = self.engines.lock().await;
        engines.retain(|_, handle| !handle.task.is_finished());
        if let Some(previous) = engines.insert(user_id, Handle { cancel, task }) {
            previous.cancel.cancel();
        }
    }

    async fn stop(&self, user_id: UserId) -> bool {
        let handle = self.engines.lock().await.remove(&user_id);
        let Some(handle) = handle else {
            return false;
        };
        let was_running = !handle.task.is_finished();
        handle.cancel.cancel();
        join(user_id, handle.task).await;
        was_running
    }
}

async fn join(user_id: UserId, task: JoinHandle<Outcome>) {
    match task.await {
        Ok(outcome) => info!("engine for user {user_id} finished: {outcome:?}"),
        Err(e) => warn!("engine for user {user_id} panicked or was aborted: {e}"),
    }
}
