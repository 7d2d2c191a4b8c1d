//! Push request ledger.
//!
//! Holds every challenge the device has seen, deduplicated by id and nonce.
//! Expiry flips status in place; records are only deleted explicitly.

use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::debug;

use crate::types::{PushRequest, PushRequestStatus};

/// Default age after which pending requests expire (2 minutes).
pub const DEFAULT_MAX_AGE_MS: i64 = 2 * 60 * 1000;

/// Shared ledger of push requests.
///
/// Clones share the same records. Check-and-insert runs under one write
/// lock, so concurrent adds of one nonce yield exactly one success.
#[derive(Debug, Clone, Default)]
pub struct RequestLedger {
    inner: Arc<RwLock<Vec<PushRequest>>>,
}

impl RequestLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append unless a record with the same id or nonce exists.
    pub async fn add(&self, request: PushRequest) -> bool {
        let mut records = self.inner.write().await;
        if records
            .iter()
            .any(|r| r.id == request.id || r.nonce == request.nonce)
        {
            debug!(id = %request.id, nonce = %request.nonce, "duplicate push request ignored");
            return false;
        }
        records.push(request);
        true
    }

    /// Set the status of the record with `id`; no-op when absent.
    pub async fn update_status(&self, id: &str, status: PushRequestStatus) {
        let mut records = self.inner.write().await;
        if let Some(record) = records.iter_mut().find(|r| r.id == id) {
            *record = PushRequest {
                status,
                ..record.clone()
            };
        }
    }

    /// Mark pending records at least `max_age_ms` old as expired. Returns the
    /// number of records changed.
    pub async fn expire_stale(&self, max_age_ms: i64, now_ms: i64) -> usize {
        let mut records = self.inner.write().await;
        let mut expired = 0;
        for record in records.iter_mut() {
            let age = now_ms.saturating_sub(record.sent_at);
            if record.status == PushRequestStatus::Pending && age >= max_age_ms {
                record.status = PushRequestStatus::Expired;
                expired += 1;
            }
        }
        if expired > 0 {
            debug!(expired, "expired stale push requests");
        }
        expired
    }

    pub async fn get_by_id(&self, id: &str) -> Option<PushRequest> {
        self.inner.read().await.iter().find(|r| r.id == id).cloned()
    }

    pub async fn get_by_nonce(&self, nonce: &str) -> Option<PushRequest> {
        self.inner
            .read()
            .await
            .iter()
            .find(|r| r.nonce == nonce)
            .cloned()
    }

    pub async fn pending(&self) -> Vec<PushRequest> {
        self.inner
            .read()
            .await
            .iter()
            .filter(|r| r.is_pending())
            .cloned()
            .collect()
    }

    /// Remove one record. Returns whether it existed.
    pub async fn remove(&self, id: &str) -> bool {
        let mut records = self.inner.write().await;
        let before = records.len();
        records.retain(|r| r.id != id);
        records.len() != before
    }

    pub async fn clear_all(&self) {
        self.inner.write().await.clear();
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }

    /// Copy of all records in insertion order.
    pub async fn snapshot(&self) -> Vec<PushRequest> {
        self.inner.read().await.clone()
    }

    /// Replace all records.
    pub async fn restore(&self, records: Vec<PushRequest>) {
        *self.inner.write().await = records;
    }
}
