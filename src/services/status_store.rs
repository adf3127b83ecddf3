//! In-memory task status store with TTL eviction.
//!
//! A single actor task owns every record. Handles talk to it over an mpsc
//! mailbox, so writes are applied in arrival order and no lock is shared
//! between callers. Expiry is driven by one deferred wake-up: the first
//! write arms it, and each time it fires the actor sweeps expired records
//! and re-arms it for another TTL. An abandoned record is therefore gone at
//! most two TTLs after its last write, with no further traffic needed.

use chrono::Utc;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::instrument;

use crate::models::task::{JobStatusRecord, StatusUpdate};

/// Default record lifetime after its last write.
pub const DEFAULT_STATUS_TTL: Duration = Duration::from_secs(5 * 60);

const STORE_CHANNEL_BUFFER: usize = 1024;

/// Upper bound on the distance to the next cleanup wake-up. Longer TTLs
/// just see extra sweeps that find nothing to remove.
const MAX_WAKEUP_DELAY: Duration = Duration::from_secs(24 * 60 * 60);

enum StoreMessage {
    Get {
        id: String,
        respond_to: oneshot::Sender<JobStatusRecord>,
    },
    Set {
        id: String,
        update: StatusUpdate,
        respond_to: oneshot::Sender<JobStatusRecord>,
    },
    Create {
        id: String,
        update: StatusUpdate,
        respond_to: oneshot::Sender<Option<JobStatusRecord>>,
    },
    Remove {
        id: String,
        respond_to: oneshot::Sender<bool>,
    },
    Cleanup {
        respond_to: oneshot::Sender<usize>,
    },
    PendingWakeup {
        respond_to: oneshot::Sender<Option<Instant>>,
    },
    Len {
        respond_to: oneshot::Sender<usize>,
    },
}

/// Handle to the status store actor. Cheap to clone.
///
/// The actor runs until the last handle is dropped.
#[derive(Clone)]
pub struct JobStatusStore {
    sender: mpsc::Sender<StoreMessage>,
}

impl JobStatusStore {
    /// Spawn the store actor on the current tokio runtime.
    pub fn new(ttl: Duration) -> Self {
        let (sender, receiver) = mpsc::channel(STORE_CHANNEL_BUFFER);
        let actor = StatusStoreActor::new(receiver, ttl);
        tokio::spawn(actor.run());
        Self { sender }
    }

    /// Current record for `id`, or the empty record when unknown or expired.
    pub async fn get_status(&self, id: &str) -> Result<JobStatusRecord, StoreError> {
        self.request(|respond_to| StoreMessage::Get {
            id: id.to_string(),
            respond_to,
        })
        .await
    }

    /// Merge `update` onto the record for `id`, creating it on first write.
    ///
    /// Always stamps the record with the current time and returns the merged
    /// result.
    pub async fn set_status(
        &self,
        id: &str,
        update: StatusUpdate,
    ) -> Result<JobStatusRecord, StoreError> {
        self.request(|respond_to| StoreMessage::Set {
            id: id.to_string(),
            update,
            respond_to,
        })
        .await
    }

    /// Write `update` as a new record for `id` unless a live one exists.
    ///
    /// Returns `None` when the id is taken. The check and the write happen in
    /// one actor step, so of several concurrent creates for one id exactly
    /// one succeeds.
    pub async fn create_status(
        &self,
        id: &str,
        update: StatusUpdate,
    ) -> Result<Option<JobStatusRecord>, StoreError> {
        self.request(|respond_to| StoreMessage::Create {
            id: id.to_string(),
            update,
            respond_to,
        })
        .await
    }

    /// Drop the record for `id`. Returns whether a live record was removed.
    pub async fn remove_status(&self, id: &str) -> Result<bool, StoreError> {
        self.request(|respond_to| StoreMessage::Remove {
            id: id.to_string(),
            respond_to,
        })
        .await
    }

    /// Remove every expired record now. Returns how many were removed.
    pub async fn cleanup(&self) -> Result<usize, StoreError> {
        self.request(|respond_to| StoreMessage::Cleanup { respond_to })
            .await
    }

    /// Deadline of the scheduled cleanup wake-up, if one is armed.
    pub async fn pending_wakeup(&self) -> Result<Option<Instant>, StoreError> {
        self.request(|respond_to| StoreMessage::PendingWakeup { respond_to })
            .await
    }

    /// Number of records currently held, expired or not.
    pub async fn len(&self) -> Result<usize, StoreError> {
        self.request(|respond_to| StoreMessage::Len { respond_to })
            .await
    }

    async fn request<T>(
        &self,
        message: impl FnOnce(oneshot::Sender<T>) -> StoreMessage,
    ) -> Result<T, StoreError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(message(tx))
            .await
            .map_err(|_| StoreError::Unavailable)?;
        rx.await.map_err(|_| StoreError::Unavailable)
    }
}

struct StatusStoreActor {
    receiver: mpsc::Receiver<StoreMessage>,
    records: HashMap<String, JobStatusRecord>,
    ttl: Duration,
    record_ttl: chrono::Duration,
    wakeup: Option<Instant>,
}

impl StatusStoreActor {
    fn new(receiver: mpsc::Receiver<StoreMessage>, ttl: Duration) -> Self {
        Self {
            receiver,
            records: HashMap::new(),
            ttl,
            record_ttl: chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX),
            wakeup: None,
        }
    }

    #[instrument(skip_all, name = "task_status_store", fields(ttl_secs = self.ttl.as_secs()))]
    async fn run(mut self) {
        tracing::info!("Task status store started");

        loop {
            let wakeup = self.wakeup;
            tokio::select! {
                msg = self.receiver.recv() => match msg {
                    Some(message) => self.handle_message(message),
                    None => break,
                },
                () = wait_for(wakeup) => self.on_wakeup(),
            }
        }

        tracing::info!(
            records_remaining = self.records.len(),
            "Task status store stopped"
        );
    }

    fn handle_message(&mut self, message: StoreMessage) {
        match message {
            StoreMessage::Get { id, respond_to } => {
                let _ = respond_to.send(self.get(&id));
            }
            StoreMessage::Set {
                id,
                update,
                respond_to,
            } => {
                let record = self.set(id, update);
                let _ = respond_to.send(record);
            }
            StoreMessage::Create {
                id,
                update,
                respond_to,
            } => {
                let created = if self.get(&id).exists() {
                    None
                } else {
                    Some(self.set(id, update))
                };
                let _ = respond_to.send(created);
            }
            StoreMessage::Remove { id, respond_to } => {
                let live = self.get(&id).exists();
                self.records.remove(&id);
                metrics::gauge!("task_status_records").set(self.records.len() as f64);
                let _ = respond_to.send(live);
            }
            StoreMessage::Cleanup { respond_to } => {
                let _ = respond_to.send(self.cleanup());
            }
            StoreMessage::PendingWakeup { respond_to } => {
                let _ = respond_to.send(self.wakeup);
            }
            StoreMessage::Len { respond_to } => {
                let _ = respond_to.send(self.records.len());
            }
        }
    }

    fn get(&self, id: &str) -> JobStatusRecord {
        match self.records.get(id) {
            Some(record) if !record.is_expired(Utc::now(), self.record_ttl) => record.clone(),
            _ => JobStatusRecord::default(),
        }
    }

    fn set(&mut self, id: String, update: StatusUpdate) -> JobStatusRecord {
        let now = Utc::now();
        let mut record = self
            .records
            .remove(&id)
            .filter(|existing| !existing.is_expired(now, self.record_ttl))
            .unwrap_or_default();

        record.id = Some(id.clone());
        record.apply(update);
        record.updated_at = Some(now);

        self.records.insert(id, record.clone());
        metrics::gauge!("task_status_records").set(self.records.len() as f64);

        self.schedule_wakeup();
        record
    }

    /// Arm the wake-up unless one is already pending.
    fn schedule_wakeup(&mut self) {
        if self.wakeup.is_none() {
            self.wakeup = Some(self.next_wakeup());
            tracing::debug!("Cleanup wake-up scheduled");
        }
    }

    fn cleanup(&mut self) -> usize {
        let now = Utc::now();
        let before = self.records.len();
        self.records
            .retain(|_, record| !record.is_expired(now, self.record_ttl));
        let removed = before - self.records.len();

        if removed > 0 {
            metrics::counter!("task_status_records_evicted_total").increment(removed as u64);
            tracing::debug!(
                removed,
                remaining = self.records.len(),
                "Expired task records removed"
            );
        }
        metrics::gauge!("task_status_records").set(self.records.len() as f64);
        removed
    }

    fn on_wakeup(&mut self) {
        self.wakeup = None;
        self.cleanup();
        // Re-arm unconditionally; eviction stops if this ever lapses.
        self.wakeup = Some(self.next_wakeup());
    }

    fn next_wakeup(&self) -> Instant {
        Instant::now() + self.ttl.min(MAX_WAKEUP_DELAY)
    }
}

async fn wait_for(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Task status store is not running")]
    Unavailable,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::task::TaskStatus;

    #[tokio::test]
    async fn test_unknown_id_returns_empty_record() {
        let store = JobStatusStore::new(DEFAULT_STATUS_TTL);

        let record = store.get_status("never-written").await.unwrap();

        assert_eq!(record, JobStatusRecord::default());
        assert!(!record.exists());
        assert_eq!(store.pending_wakeup().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_first_write_creates_record() {
        let store = JobStatusStore::new(DEFAULT_STATUS_TTL);

        let before = Utc::now();
        let record = store
            .set_status("abc123", StatusUpdate::with_status(TaskStatus::Waiting))
            .await
            .unwrap();

        assert_eq!(record.id.as_deref(), Some("abc123"));
        assert_eq!(record.status, Some(TaskStatus::Waiting));
        assert!(record.updated_at.unwrap() >= before);
        assert_eq!(store.get_status("abc123").await.unwrap(), record);
    }

    #[tokio::test]
    async fn test_merge_keeps_last_supplied_value_per_field() {
        let store = JobStatusStore::new(DEFAULT_STATUS_TTL);

        store
            .set_status(
                "t1",
                StatusUpdate {
                    status: Some(TaskStatus::Processing),
                    progress: Some(10),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        store
            .set_status(
                "t1",
                StatusUpdate {
                    image_url: Some("https://cdn.example/a.png".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let last = store
            .set_status(
                "t1",
                StatusUpdate {
                    progress: Some(70),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let record = store.get_status("t1").await.unwrap();
        assert_eq!(record.status, Some(TaskStatus::Processing));
        assert_eq!(record.progress, Some(70));
        assert_eq!(record.image_url.as_deref(), Some("https://cdn.example/a.png"));
        assert_eq!(record.updated_at, last.updated_at);
    }

    #[tokio::test]
    async fn test_wakeup_scheduled_once() {
        let store = JobStatusStore::new(DEFAULT_STATUS_TTL);

        store
            .set_status("a", StatusUpdate::with_status(TaskStatus::Waiting))
            .await
            .unwrap();
        let first = store.pending_wakeup().await.unwrap();
        assert!(first.is_some());

        store
            .set_status("b", StatusUpdate::with_status(TaskStatus::Waiting))
            .await
            .unwrap();
        store
            .set_status("a", StatusUpdate::with_status(TaskStatus::Processing))
            .await
            .unwrap();

        assert_eq!(store.pending_wakeup().await.unwrap(), first);
    }

    fn record_written_at(id: &str, updated_at: chrono::DateTime<Utc>) -> JobStatusRecord {
        JobStatusRecord {
            id: Some(id.to_string()),
            status: Some(TaskStatus::Waiting),
            updated_at: Some(updated_at),
            ..Default::default()
        }
    }

    #[test]
    fn test_cleanup_removes_only_expired_records() {
        // Drive the actor state directly so no wake-up races the sweep.
        let (_sender, receiver) = mpsc::channel(1);
        let mut actor = StatusStoreActor::new(receiver, Duration::from_secs(60));
        let now = Utc::now();
        actor.records.insert(
            "old".to_string(),
            record_written_at("old", now - chrono::Duration::seconds(61)),
        );
        actor.records.insert(
            "fresh".to_string(),
            record_written_at("fresh", now - chrono::Duration::seconds(30)),
        );

        let removed = actor.cleanup();

        assert_eq!(removed, 1);
        assert!(!actor.get("old").exists());
        assert!(actor.get("fresh").exists());
        assert_eq!(actor.records.len(), 1);
    }

    #[tokio::test]
    async fn test_create_status_refuses_live_id() {
        let store = JobStatusStore::new(DEFAULT_STATUS_TTL);

        let created = store
            .create_status("job-1", StatusUpdate::with_status(TaskStatus::Waiting))
            .await
            .unwrap();
        assert_eq!(created.unwrap().status, Some(TaskStatus::Waiting));

        let again = store
            .create_status("job-1", StatusUpdate::with_status(TaskStatus::Waiting))
            .await
            .unwrap();
        assert!(again.is_none());

        assert!(store.remove_status("job-1").await.unwrap());
        assert!(!store.get_status("job-1").await.unwrap().exists());
        assert!(!store.remove_status("job-1").await.unwrap());
    }

    #[tokio::test]
    async fn test_concurrent_creates_for_one_id_admit_exactly_one() {
        let store = JobStatusStore::new(DEFAULT_STATUS_TTL);

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move {
                    store
                        .create_status("contested", StatusUpdate::with_status(TaskStatus::Waiting))
                        .await
                })
            })
            .collect();
        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap().unwrap().is_some() {
                winners += 1;
            }
        }

        assert_eq!(winners, 1);
        assert_eq!(store.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_huge_ttl_does_not_overflow_wakeup() {
        let store = JobStatusStore::new(Duration::MAX);

        store
            .set_status("long-lived", StatusUpdate::with_status(TaskStatus::Waiting))
            .await
            .unwrap();

        let wakeup = store.pending_wakeup().await.unwrap().unwrap();
        assert!(wakeup <= Instant::now() + MAX_WAKEUP_DELAY);
        assert!(store.get_status("long-lived").await.unwrap().exists());
    }

    #[tokio::test]
    async fn test_expired_record_hidden_before_sweep() {
        let store = JobStatusStore::new(Duration::from_millis(100));

        store
            .set_status("t1", StatusUpdate::with_status(TaskStatus::Finished))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert!(!store.get_status("t1").await.unwrap().exists());

        // A late write starts over instead of reviving stale fields.
        let record = store
            .set_status(
                "t1",
                StatusUpdate {
                    progress: Some(5),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(record.status, None);
        assert_eq!(record.progress, Some(5));
    }

    #[tokio::test]
    async fn test_wakeup_evicts_abandoned_records_and_rearms() {
        let ttl = Duration::from_millis(100);
        let store = JobStatusStore::new(ttl);

        store
            .set_status("abandoned", StatusUpdate::with_status(TaskStatus::Processing))
            .await
            .unwrap();
        let first = store.pending_wakeup().await.unwrap().unwrap();

        // Within two TTLs the record must be gone with no further writes.
        tokio::time::sleep(ttl * 2 + Duration::from_millis(100)).await;

        assert_eq!(store.len().await.unwrap(), 0);
        let rearmed = store.pending_wakeup().await.unwrap().unwrap();
        assert!(rearmed > first);
    }

    #[tokio::test]
    async fn test_concurrent_writes_to_same_id_are_not_lost() {
        let store = JobStatusStore::new(DEFAULT_STATUS_TTL);

        let status = {
            let store = store.clone();
            tokio::spawn(async move {
                store
                    .set_status("shared", StatusUpdate::with_status(TaskStatus::Processing))
                    .await
            })
        };
        let progress = {
            let store = store.clone();
            tokio::spawn(async move {
                store
                    .set_status(
                        "shared",
                        StatusUpdate {
                            progress: Some(55),
                            ..Default::default()
                        },
                    )
                    .await
            })
        };
        let image = {
            let store = store.clone();
            tokio::spawn(async move {
                store
                    .set_status(
                        "shared",
                        StatusUpdate {
                            image_url: Some("https://cdn.example/x.png".to_string()),
                            ..Default::default()
                        },
                    )
                    .await
            })
        };

        status.await.unwrap().unwrap();
        progress.await.unwrap().unwrap();
        image.await.unwrap().unwrap();

        let record = store.get_status("shared").await.unwrap();
        assert_eq!(record.status, Some(TaskStatus::Processing));
        assert_eq!(record.progress, Some(55));
        assert_eq!(record.image_url.as_deref(), Some("https://cdn.example/x.png"));
    }

    #[tokio::test]
    async fn test_many_ids_written_concurrently() {
        let store = JobStatusStore::new(DEFAULT_STATUS_TTL);

        let handles: Vec<_> = (0..64)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move {
                    store
                        .set_status(&format!("task-{i}"), StatusUpdate::with_status(TaskStatus::Waiting))
                        .await
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(store.len().await.unwrap(), 64);
    }
}
