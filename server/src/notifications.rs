//! Notification Store (spec §4.6): a per-user list of notifications, with
//! retention, a debounced atomic persist, and the interactive-response
//! bookkeeping used by `/api/notifications/:id/{action,cancel}`.
//!
//! The debounce scheduler is grounded on this repository's general pattern
//! of coalescing frequent writes behind a single atomic file swap (see
//! `util::write_atomically`); here a background task batches bursts of
//! `add`/`markRead` calls into one persist every `debounce` window instead
//! of writing on every call.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, Mutex};

use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub id: String,
    pub created_at: u64,
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub read: bool,
    /// Non-null for notifications that expect a user response
    /// (approve/cancel with optional captured input).
    #[serde(default)]
    pub interactive: bool,
    #[serde(default)]
    pub action_key: Option<String>,
    #[serde(default)]
    pub responded: bool,
    #[serde(default)]
    pub response: Option<Value>,
    /// Ids of masked/secret inputs captured for this notification; values
    /// themselves are never stored (spec §4.6).
    #[serde(default)]
    pub masked_input_ids: Vec<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistedDocument {
    users: HashMap<String, UserNotifications>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct UserNotifications {
    notifications: Vec<NotificationRecord>,
}

struct Inner {
    by_user: HashMap<String, Vec<NotificationRecord>>,
}

/// Per-user notification store with retention and debounced persistence.
pub struct NotificationStore {
    path: PathBuf,
    retention_days: u64,
    retention_count: usize,
    inner: Mutex<Inner>,
    dirty_tx: mpsc::UnboundedSender<()>,
}

impl NotificationStore {
    pub fn load(path: PathBuf, retention_days: u64, retention_count: usize, debounce: Duration) -> anyhow::Result<Arc<Self>> {
        let doc: PersistedDocument = match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => PersistedDocument::default(),
            Err(e) => return Err(e.into()),
        };
        let by_user = doc
            .users
            .into_iter()
            .map(|(user, v)| (user, v.notifications))
            .collect();

        let (dirty_tx, dirty_rx) = mpsc::unbounded_channel();
        let store = Arc::new(Self {
            path,
            retention_days,
            retention_count,
            inner: Mutex::new(Inner { by_user }),
            dirty_tx,
        });
        spawn_debounced_persister(Arc::clone(&store), dirty_rx, debounce);
        Ok(store)
    }

    fn mark_dirty(&self) {
        let _ = self.dirty_tx.send(());
    }

    pub async fn add(&self, user: &str, title: String, body: String, interactive: bool, action_key: Option<String>) -> NotificationRecord {
        let record = NotificationRecord {
            id: uuid::Uuid::new_v4().to_string(),
            created_at: crate::auth::token::now_secs(),
            title,
            body,
            read: false,
            interactive,
            action_key,
            responded: false,
            response: None,
            masked_input_ids: Vec::new(),
        };

        let mut inner = self.inner.lock().await;
        let list = inner.by_user.entry(user.to_string()).or_default();
        list.insert(0, record.clone());
        self.apply_retention(list);
        drop(inner);
        self.mark_dirty();
        record
    }

    fn apply_retention(&self, list: &mut Vec<NotificationRecord>) {
        let cutoff = crate::auth::token::now_secs().saturating_sub(self.retention_days * 86_400);
        list.retain(|n| n.created_at >= cutoff);
        list.truncate(self.retention_count);
    }

    pub async fn list(&self, user: &str) -> Vec<NotificationRecord> {
        self.inner
            .lock()
            .await
            .by_user
            .get(user)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn get_by_id(&self, user: &str, id: &str) -> Option<NotificationRecord> {
        self.inner
            .lock()
            .await
            .by_user
            .get(user)
            .and_then(|list| list.iter().find(|n| n.id == id).cloned())
    }

    pub async fn mark_read(&self, user: &str, id: &str) -> bool {
        let mut inner = self.inner.lock().await;
        let found = inner
            .by_user
            .get_mut(user)
            .and_then(|list| list.iter_mut().find(|n| n.id == id))
            .map(|n| n.read = true)
            .is_some();
        drop(inner);
        if found {
            self.mark_dirty();
        }
        found
    }

    /// Marks every unread notification read, returning the count actually
    /// flipped. Idempotent: a call with nothing left unread returns 0
    /// (spec §8).
    pub async fn mark_all_read(&self, user: &str) -> usize {
        let updated = {
            let mut inner = self.inner.lock().await;
            match inner.by_user.get_mut(user) {
                Some(list) => {
                    let mut count = 0;
                    for n in list.iter_mut() {
                        if !n.read {
                            n.read = true;
                            count += 1;
                        }
                    }
                    count
                }
                None => 0,
            }
        };
        if updated > 0 {
            self.mark_dirty();
        }
        updated
    }

    pub async fn delete(&self, user: &str, id: &str) -> bool {
        let removed = {
            let mut inner = self.inner.lock().await;
            match inner.by_user.get_mut(user) {
                Some(list) => {
                    let before = list.len();
                    list.retain(|n| n.id != id);
                    list.len() != before
                }
                None => false,
            }
        };
        if removed {
            self.mark_dirty();
        }
        removed
    }

    pub async fn clear_all(&self, user: &str) {
        {
            let mut inner = self.inner.lock().await;
            inner.by_user.insert(user.to_string(), Vec::new());
        }
        self.mark_dirty();
    }

    /// Records the outcome of an interactive notification. Strict
    /// single-use: a notification already responded to is a 409 (spec §6).
    pub async fn set_response(&self, user: &str, id: &str, response: Value, masked_input_ids: Vec<String>) -> AppResult<NotificationRecord> {
        let mut inner = self.inner.lock().await;
        let list = inner
            .by_user
            .get_mut(user)
            .ok_or_else(|| AppError::NotFound(format!("notification {id}")))?;
        let record = list
            .iter_mut()
            .find(|n| n.id == id)
            .ok_or_else(|| AppError::NotFound(format!("notification {id}")))?;
        if !record.interactive {
            return Err(AppError::Invalid("notification is not interactive".into()));
        }
        if record.responded {
            return Err(AppError::Conflict("notification already responded to".into()));
        }
        record.responded = true;
        record.response = Some(response);
        record.masked_input_ids = masked_input_ids;
        let result = record.clone();
        drop(inner);
        self.mark_dirty();
        Ok(result)
    }

    /// Forces a synchronous persist, bypassing the debounce window. Used at
    /// shutdown so no pending notification write is lost.
    pub async fn flush(&self) -> anyhow::Result<()> {
        let inner = self.inner.lock().await;
        let doc = PersistedDocument {
            users: inner
                .by_user
                .iter()
                .map(|(user, notifications)| {
                    (
                        user.clone(),
                        UserNotifications {
                            notifications: notifications.clone(),
                        },
                    )
                })
                .collect(),
        };
        drop(inner);
        let json = serde_json::to_vec_pretty(&doc)?;
        crate::util::write_atomically(&self.path, &json, 0o600)
    }
}

fn spawn_debounced_persister(store: Arc<NotificationStore>, mut dirty_rx: mpsc::UnboundedReceiver<()>, debounce: Duration) {
    tokio::spawn(async move {
        while dirty_rx.recv().await.is_some() {
            // Drain any additional pending signals that arrived during the
            // debounce window so a burst of calls collapses into one write.
            tokio::time::sleep(debounce).await;
            while dirty_rx.try_recv().is_ok() {}
            if let Err(err) = store.flush().await {
                tracing::warn!(%err, "failed to persist notifications");
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> Arc<NotificationStore> {
        let dir = std::env::temp_dir().join(format!("termhub-notif-test-{}", uuid::Uuid::new_v4()));
        NotificationStore::load(dir.join("notifications.json"), 30, 500, Duration::from_millis(10)).unwrap()
    }

    #[tokio::test]
    async fn add_then_list_round_trips() {
        let store = store().await;
        store.add("alice", "t".into(), "b".into(), false, None).await;
        let list = store.list("alice").await;
        assert_eq!(list.len(), 1);
        assert!(!list[0].read);
    }

    #[tokio::test]
    async fn retention_count_caps_list_length() {
        let store = NotificationStore::load(
            std::env::temp_dir().join(format!("termhub-notif-test-{}", uuid::Uuid::new_v4())).join("n.json"),
            30,
            2,
            Duration::from_millis(10),
        )
        .unwrap();
        for i in 0..5 {
            store.add("alice", format!("t{i}"), "b".into(), false, None).await;
        }
        assert_eq!(store.list("alice").await.len(), 2);
    }

    #[tokio::test]
    async fn responding_twice_conflicts() {
        let store = store().await;
        let record = store.add("alice", "t".into(), "b".into(), true, Some("k".into())).await;
        store
            .set_response("alice", &record.id, serde_json::json!({"ok": true}), vec![])
            .await
            .unwrap();
        let err = store
            .set_response("alice", &record.id, serde_json::json!({"ok": true}), vec![])
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn non_interactive_response_is_rejected() {
        let store = store().await;
        let record = store.add("alice", "t".into(), "b".into(), false, None).await;
        let err = store
            .set_response("alice", &record.id, serde_json::json!({}), vec![])
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Invalid(_)));
    }

    #[tokio::test]
    async fn mark_all_read_is_idempotent() {
        let store = store().await;
        store.add("alice", "t1".into(), "b".into(), false, None).await;
        store.add("alice", "t2".into(), "b".into(), false, None).await;
        let updated = store.mark_all_read("alice").await;
        assert_eq!(updated, 2);
        let updated_again = store.mark_all_read("alice").await;
        assert_eq!(updated_again, 0);
    }
}
