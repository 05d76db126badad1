//! Head registry: the authoritative in-memory view of the fleet.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;

use fleet_common::{HeadRecord, HeadStatus, RegisterHeadRequest};

use crate::error::{FleetError, Result};

/// Snapshots taken around a status update.
#[derive(Debug, Clone)]
pub struct StatusChange {
    pub previous: HeadRecord,
    pub current: HeadRecord,
}

impl StatusChange {
    pub fn load_changed(&self) -> bool {
        self.previous.current_load != self.current.current_load
    }

    pub fn status_changed(&self) -> bool {
        self.previous.status != self.current.status
    }
}

/// Registry of known heads, keyed by head id.
#[derive(Debug, Default)]
pub struct HeadRegistry {
    heads: RwLock<HashMap<String, HeadRecord>>,
    next_sequence: AtomicU64,
    next_revision: AtomicU64,
}

impl HeadRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite a head.
    ///
    /// A re-registered head keeps its registration order, first registration
    /// time and load history.
    pub async fn register(&self, request: RegisterHeadRequest) -> HeadRecord {
        let now = Utc::now();
        let mut heads = self.heads.write().await;

        let (sequence, registered_at, load_history) = match heads.get(&request.head_id) {
            Some(existing) => (
                existing.sequence,
                existing.registered_at,
                existing.load_history.clone(),
            ),
            None => (
                self.next_sequence.fetch_add(1, Ordering::SeqCst),
                now,
                VecDeque::new(),
            ),
        };

        let record = HeadRecord {
            head_id: request.head_id.clone(),
            endpoint: request.endpoint,
            status: HeadStatus::Active,
            current_load: request.current_load,
            load_history,
            region: request.region,
            model_type: request.model_type,
            version: request.version,
            metadata: request.metadata,
            last_heartbeat: now,
            registered_at,
            sequence,
            revision: self.bump_revision(),
        };
        heads.insert(request.head_id, record.clone());
        record
    }

    /// Apply a heartbeat or status transition to a known head.
    pub async fn update_status(
        &self,
        head_id: &str,
        status: HeadStatus,
        current_load: u32,
        timestamp: DateTime<Utc>,
    ) -> Result<StatusChange> {
        let mut heads = self.heads.write().await;
        let head = heads
            .get_mut(head_id)
            .ok_or_else(|| FleetError::HeadNotFound(head_id.to_string()))?;

        let previous = head.clone();
        head.status = status;
        head.current_load = current_load;
        head.record_load(current_load);
        head.last_heartbeat = timestamp;
        head.revision = self.bump_revision();

        Ok(StatusChange {
            previous,
            current: head.clone(),
        })
    }

    /// Take a head out of rotation without touching its load or heartbeat.
    pub async fn deactivate(&self, head_id: &str) -> Result<StatusChange> {
        let mut heads = self.heads.write().await;
        let head = heads
            .get_mut(head_id)
            .ok_or_else(|| FleetError::HeadNotFound(head_id.to_string()))?;

        let previous = head.clone();
        head.status = HeadStatus::Inactive;
        head.revision = self.bump_revision();

        Ok(StatusChange {
            previous,
            current: head.clone(),
        })
    }

    /// Active heads serving `model_type`, in registration order.
    pub async fn list_active(&self, model_type: &str) -> Vec<HeadRecord> {
        let mut active: Vec<HeadRecord> = self
            .heads
            .read()
            .await
            .values()
            .filter(|h| h.is_active() && h.model_type == model_type)
            .cloned()
            .collect();
        active.sort_by_key(|h| h.sequence);
        active
    }

    /// Every head, in registration order.
    pub async fn get_all(&self) -> Vec<HeadRecord> {
        let mut all: Vec<HeadRecord> = self.heads.read().await.values().cloned().collect();
        all.sort_by_key(|h| h.sequence);
        all
    }

    pub async fn get(&self, head_id: &str) -> Option<HeadRecord> {
        self.heads.read().await.get(head_id).cloned()
    }

    pub async fn count(&self) -> usize {
        self.heads.read().await.len()
    }

    pub async fn active_count(&self) -> usize {
        self.heads
            .read()
            .await
            .values()
            .filter(|h| h.is_active())
            .count()
    }

    /// Mark active heads with no heartbeat within `timeout` as inactive.
    ///
    /// Returns the updated snapshots.
    pub async fn mark_stale(&self, timeout: Duration) -> Vec<HeadRecord> {
        let now = Utc::now();
        let mut marked = vec![];
        let mut heads = self.heads.write().await;

        for head in heads.values_mut() {
            if !head.is_active() {
                continue;
            }
            let age = now - head.last_heartbeat;
            if age > timeout {
                tracing::warn!(
                    head_id = %head.head_id,
                    age_secs = age.num_seconds(),
                    "Marking stale head inactive"
                );
                head.status = HeadStatus::Inactive;
                head.revision = self.bump_revision();
                marked.push(head.clone());
            }
        }

        marked.sort_by_key(|h| h.sequence);
        marked
    }

    /// Load persisted records, replacing any in-memory entries with the same id.
    ///
    /// Registration order follows `registered_at`; sequence numbers are
    /// reassigned so later registrations sort after restored heads.
    pub async fn restore(&self, mut records: Vec<HeadRecord>) -> usize {
        records.sort_by(|a, b| {
            a.registered_at
                .cmp(&b.registered_at)
                .then_with(|| a.sequence.cmp(&b.sequence))
        });

        let mut heads = self.heads.write().await;
        let count = records.len();
        for mut record in records {
            record.sequence = self.next_sequence.fetch_add(1, Ordering::SeqCst);
            record.revision = self.bump_revision();
            heads.insert(record.head_id.clone(), record);
        }
        count
    }

    /// Next revision number. Only called with the map's write lock held.
    fn bump_revision(&self) -> u64 {
        self.next_revision.fetch_add(1, Ordering::SeqCst) + 1
    }
}
