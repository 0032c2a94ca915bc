//! A `Notifier` that records everything the engine hands it.
//!
//! Attachment streams are drained on delivery so tests can compare
//! content.

use async_trait::async_trait;
use futures::TryStreamExt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use ximss_poller::{Mail, Notifier, UserId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Delivered {
        user_id: UserId,
        uid: String,
        subject: Option<String>,
        text: String,
        attachments: Vec<(String, Vec<u8>)>,
    },
    Expired(UserId),
    CannotRevalidate(UserId),
    CannotRelogin(UserId),
}

#[derive(Debug, Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<Event>>,
}

impl RecordingNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    /// Wait (up to five seconds) until at least `n` events arrived.
    ///
    /// # Panics
    ///
    /// Panics on timeout.
    pub async fn wait_for(&self, n: usize) -> Vec<Event> {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let events = self.events();
            if events.len() >= n {
                return events;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "timed out waiting for {n} events; saw {events:?}"
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    fn push(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn deliver(&self, user_id: UserId, mail: Mail) {
        let mut attachments = Vec::new();
        for attachment in mail.body.attachments {
            let chunks: Vec<_> = attachment.content.try_collect().await.unwrap();
            attachments.push((attachment.name, chunks.concat()));
        }
        self.push(Event::Delivered {
            user_id,
            uid: mail.header.uid,
            subject: mail.header.subject,
            text: mail.body.text,
            attachments,
        });
    }

    async fn notify_expired(&self, user_id: UserId) {
        self.push(Event::Expired(user_id));
    }

    async fn notify_cannot_revalidate(&self, user_id: UserId) {
        self.push(Event::CannotRevalidate(user_id));
    }

    async fn notify_cannot_relogin(&self, user_id: UserId) {
        self.push(Event::CannotRelogin(user_id));
    }
}
