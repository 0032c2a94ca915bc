//! Durable per-user session storage
//!
//! The engine saves the [`UserContext`] after every successful protocol
//! step, so a restarted process resumes with the exact counters it
//! stopped at. Writes for one user are serialized; different users
//! never wait on each other.

use crate::error::{Error, Result};
use crate::session::SessionState;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::warn;

/// Identifier of a user in the command front-end.
pub type UserId = i64;

/// A password kept for automatic re-login.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum StoredPassword {
    #[default]
    Absent,
    Present(String),
}

impl StoredPassword {
    #[must_use]
    pub fn as_deref(&self) -> Option<&str> {
        match self {
            Self::Absent => None,
            Self::Present(password) => Some(password),
        }
    }

    #[must_use]
    pub const fn is_present(&self) -> bool {
        matches!(self, Self::Present(_))
    }
}

/// Everything needed to resume polling for one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserContext {
    pub user_id: UserId,
    pub login_name: String,
    #[serde(default)]
    pub password: StoredPassword,
    pub session: SessionState,
}

impl UserContext {
    /// Same user, next session state.
    #[must_use]
    pub fn with_session(&self, session: SessionState) -> Self {
        Self {
            session,
            ..self.clone()
        }
    }
}

/// Persistence for [`UserContext`]s, keyed by user.
///
/// # Errors
///
/// Every method fails with [`Error::Store`], [`Error::Io`] or
/// [`Error::Json`] when the backing storage cannot be used. A missing
/// user is not an error.
#[async_trait]
pub trait Store: Send + Sync {
    /// # Errors
    ///
    /// See the trait documentation.
    async fn load(&self, user_id: UserId) -> Result<Option<UserContext>>;

    /// Every stored context, ordered by user id.
    ///
    /// # Errors
    ///
    /// See the trait documentation.
    async fn load_all(&self) -> Result<Vec<UserContext>>;

    /// Insert or replace the context of `context.user_id`.
    ///
    /// # Errors
    ///
    /// See the trait documentation.
    async fn save(&self, context: &UserContext) -> Result<()>;

    /// Forget a user. Removing an unknown user succeeds.
    ///
    /// # Errors
    ///
    /// See the trait documentation.
    async fn remove(&self, user_id: UserId) -> Result<()>;

    /// # Errors
    ///
    /// See the trait documentation.
    async fn load_password(&self, user_id: UserId) -> Result<StoredPassword>;
}

/// Process-local store, mostly useful for tests and one-shot runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    users: Mutex<HashMap<UserId, UserContext>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn users(&self) -> Result<std::sync::MutexGuard<'_, HashMap<UserId, UserContext>>> {
        self.users
            .lock()
            .map_err(|_| Error::Store("memory store lock poisoned".to_string()))
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn load(&self, user_id: UserId) -> Result<Option<UserContext>> {
        Ok(self.users()?.get(&user_id).cloned())
    }

    async fn load_all(&self) -> Result<Vec<UserContext>> {
        let mut all: Vec<_> = self.users()?.values().cloned().collect();
        all.sort_by_key(|c| c.user_id);
        Ok(all)
    }

    async fn save(&self, context: &UserContext) -> Result<()> {
        self.users()?.insert(context.user_id, context.clone());
        Ok(())
    }

    async fn remove(&self, user_id: UserId) -> Result<()> {
        self.users()?.remove(&user_id);
        Ok(())
    }

    async fn load_password(&self, user_id: UserId) -> Result<StoredPassword> {
        Ok(self
            .users()?
            .get(&user_id)
            .map(|c| c.password.clone())
            .unwrap_or_default())
    }
}

/// One pretty-printed JSON file per user under a directory.
///
/// Files are replaced atomically (write to a temporary file, then
/// rename), so a crash never leaves a half-written context behind.
#[derive(Debug)]
pub struct JsonFileStore {
    dir: PathBuf,
    locks: Mutex<HashMap<UserId, Arc<tokio::sync::Mutex<()>>>>,
}

impl JsonFileStore {
    /// Open (and create if needed) a store rooted at `dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self {
            dir,
            locks: Mutex::new(HashMap::new()),
        })
    }

    fn path_for(&self, user_id: UserId) -> PathBuf {
        self.dir.join(format!("{user_id}.json"))
    }

    fn lock_for(&self, user_id: UserId) -> Result<Arc<tokio::sync::Mutex<()>>> {
        let mut locks = self
            .locks
            .lock()
            .map_err(|_| Error::Store("file store lock table poisoned".to_string()))?;
        Ok(locks.entry(user_id).or_default().clone())
    }

    async fn read(path: &Path) -> Result<Option<UserContext>> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl Store for JsonFileStore {
    async fn load(&self, user_id: UserId) -> Result<Option<UserContext>> {
        let lock = self.lock_for(user_id)?;
        let _guard = lock.lock().await;
        Self::read(&self.path_for(user_id)).await
    }

    async fn load_all(&self) -> Result<Vec<UserContext>> {
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        let mut all = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let Some(user_id) = path
                .file_name()
                .and_then(|name| name.to_str())
                .and_then(|name| name.strip_suffix(".json"))
                .and_then(|stem| stem.parse::<UserId>().ok())
            else {
                continue;
            };
            let lock = self.lock_for(user_id)?;
            let _guard = lock.lock().await;
            match Self::read(&path).await {
                Ok(Some(context)) => all.push(context),
                Ok(None) => {}
                Err(e) => warn!("skipping unreadable context {}: {e}", path.display()),
            }
        }
        all.sort_by_key(|c| c.user_id);
        Ok(all)
    }

    async fn save(&self, context: &UserContext) -> Result<()> {
        let lock = self.lock_for(context.user_id)?;
        let _guard = lock.lock().await;
        let path = self.path_for(context.user_id);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(context)?).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn remove(&self, user_id: UserId) -> Result<()> {
        let lock = self.lock_for(user_id)?;
        let _guard = lock.lock().await;
        match tokio::fs::remove_file(self.path_for(user_id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn load_password(&self, user_id: UserId) -> Result<StoredPassword> {
        Ok(self
            .load(user_id)
            .await?
            .map(|c| c.password)
            .unwrap_or_default())
    }
}
