use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, RwLock};

use crate::types::Notification;

pub const NOTIFICATION_CAPACITY: usize = 200;

/// Append-only operator notification log.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn append(&self, title: &str, message: &str) -> Result<Notification>;
    /// Newest first.
    async fn list(&self) -> Result<Vec<Notification>>;
    /// Returns how many entries flipped from unread to read.
    async fn mark_all_read(&self) -> Result<usize>;
    async fn unread_count(&self) -> Result<usize>;
}

/// Keeps the most recent [`NOTIFICATION_CAPACITY`] entries.
#[derive(Clone)]
pub struct InMemoryNotificationLog {
    entries: Arc<RwLock<VecDeque<Notification>>>,
    capacity: usize,
}

impl InMemoryNotificationLog {
    pub fn new() -> Self {
        Self::with_capacity(NOTIFICATION_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Arc::new(RwLock::new(VecDeque::with_capacity(capacity))),
            capacity: capacity.max(1),
        }
    }
}

impl Default for InMemoryNotificationLog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NotificationSink for InMemoryNotificationLog {
    async fn append(&self, title: &str, message: &str) -> Result<Notification> {
        let notification = Notification::new(title, message);
        let mut entries = self
            .entries
            .write()
            .map_err(|_| anyhow!("notification log lock poisoned"))?;
        entries.push_front(notification.clone());
        entries.truncate(self.capacity);
        Ok(notification)
    }

    async fn list(&self) -> Result<Vec<Notification>> {
        let entries = self
            .entries
            .read()
            .map_err(|_| anyhow!("notification log lock poisoned"))?;
        Ok(entries.iter().cloned().collect())
    }

    async fn mark_all_read(&self) -> Result<usize> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| anyhow!("notification log lock poisoned"))?;
        let mut flipped = 0;
        for n in entries.iter_mut().filter(|n| !n.read) {
            n.read = true;
            flipped += 1;
        }
        Ok(flipped)
    }

    async fn unread_count(&self) -> Result<usize> {
        let entries = self
            .entries
            .read()
            .map_err(|_| anyhow!("notification log lock poisoned"))?;
        Ok(entries.iter().filter(|n| !n.read).count())
    }
}
