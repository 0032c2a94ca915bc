//! Outbound notifications

use crate::mail::Mail;
use crate::store::UserId;
use async_trait::async_trait;

/// Receives new mail and terminal session notices for a user.
///
/// Implementations own any user-facing wording and their own delivery
/// retries; the engine calls each method exactly once per event.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn deliver(&self, user_id: UserId, mail: Mail);

    /// The session was revoked and no password is stored to log in again.
    async fn notify_expired(&self, user_id: UserId);

    /// Proactive renewal was refused and no password is stored.
    async fn notify_cannot_revalidate(&self, user_id: UserId);

    /// The stored password no longer opens a session.
    async fn notify_cannot_relogin(&self, user_id: UserId);
}
