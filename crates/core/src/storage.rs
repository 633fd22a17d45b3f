use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::domain::refill::{ApprovalRecord, RefillRequest, RefillRequestId, RefillStatus};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("storage backend failure: {0}")]
    Backend(String),
    #[error("corrupt stored record: {0}")]
    Decode(String),
}

/// Scope handed to `query_requests`. Produced by the visibility filter; both
/// fields are conjunctive and `None` means unrestricted.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RequestFilter {
    pub requestor: Option<String>,
    pub status: Option<RefillStatus>,
}

impl RequestFilter {
    pub fn matches(&self, request: &RefillRequest) -> bool {
        if let Some(requestor) = &self.requestor {
            if &request.requestor != requestor {
                return false;
            }
        }
        if let Some(status) = self.status {
            if request.status != status {
                return false;
            }
        }
        true
    }
}

/// Narrow storage interface consumed by the workflow engine. The store is the
/// sole arbiter of conflicting writes: `commit_decision` applies the status
/// transition and the audit append as one atomic unit, conditional on the
/// request still holding `expected` status.
#[async_trait]
pub trait RefillRequestStore: Send + Sync {
    async fn insert_request(&self, request: &RefillRequest) -> Result<(), StoreError>;

    async fn get_request(
        &self,
        id: &RefillRequestId,
    ) -> Result<Option<RefillRequest>, StoreError>;

    /// Requests matching `filter`, ordered by `created_at` ascending, each
    /// joined with its approval history ordered by timestamp ascending.
    async fn query_requests(
        &self,
        filter: &RequestFilter,
    ) -> Result<Vec<RefillRequest>, StoreError>;

    /// Conditional update keyed on the current status. Returns `false` when the
    /// precondition no longer holds; nothing is written in that case.
    async fn commit_decision(
        &self,
        id: &RefillRequestId,
        expected: RefillStatus,
        new_status: RefillStatus,
        updated_at: DateTime<Utc>,
        record: &ApprovalRecord,
    ) -> Result<bool, StoreError>;
}

/// Reference store used by engine tests and local tooling. A single mutex
/// guards the map, which makes `commit_decision` one critical section.
#[derive(Default)]
pub struct InMemoryRefillStore {
    requests: Mutex<HashMap<String, RefillRequest>>,
}

impl InMemoryRefillStore {
    fn with_requests<T>(&self, f: impl FnOnce(&mut HashMap<String, RefillRequest>) -> T) -> T {
        match self.requests.lock() {
            Ok(mut requests) => f(&mut requests),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }
}

#[async_trait]
impl RefillRequestStore for InMemoryRefillStore {
    async fn insert_request(&self, request: &RefillRequest) -> Result<(), StoreError> {
        self.with_requests(|requests| {
            if requests.contains_key(&request.request_id.0) {
                return Err(StoreError::Backend(format!(
                    "duplicate request id `{}`",
                    request.request_id.0
                )));
            }
            requests.insert(request.request_id.0.clone(), request.clone());
            Ok(())
        })
    }

    async fn get_request(
        &self,
        id: &RefillRequestId,
    ) -> Result<Option<RefillRequest>, StoreError> {
        Ok(self.with_requests(|requests| requests.get(&id.0).cloned()))
    }

    async fn query_requests(
        &self,
        filter: &RequestFilter,
    ) -> Result<Vec<RefillRequest>, StoreError> {
        let mut matched = self.with_requests(|requests| {
            requests.values().filter(|request| filter.matches(request)).cloned().collect::<Vec<_>>()
        });
        matched.sort_by(|left, right| {
            left.created_at.cmp(&right.created_at).then_with(|| left.request_id.0.cmp(&right.request_id.0))
        });
        Ok(matched)
    }

    async fn commit_decision(
        &self,
        id: &RefillRequestId,
        expected: RefillStatus,
        new_status: RefillStatus,
        updated_at: DateTime<Utc>,
        record: &ApprovalRecord,
    ) -> Result<bool, StoreError> {
        self.with_requests(|requests| {
            let Some(request) = requests.get_mut(&id.0) else {
                return Ok(false);
            };
            if request.status != expected {
                return Ok(false);
            }
            request.status = new_status;
            request.updated_at = updated_at;
            request.approval_history.push(record.clone());
            Ok(true)
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal::Decimal;

    use crate::domain::principal::Role;
    use crate::domain::refill::{
        ApprovalAction, ApprovalRecord, RefillRequest, RefillRequestId, RefillStatus,
    };

    use super::{InMemoryRefillStore, RefillRequestStore, RequestFilter, StoreError};

    fn request(id: &str, requestor: &str) -> RefillRequest {
        let now = Utc::now();
        RefillRequest {
            request_id: RefillRequestId(id.to_string()),
            atm_id: "ATM-7".to_string(),
            requested_amount: Decimal::new(50_000, 2),
            requestor: requestor.to_string(),
            status: RefillStatus::Pending,
            created_at: now,
            updated_at: now,
            approval_history: Vec::new(),
        }
    }

    fn record(approver: &str) -> ApprovalRecord {
        ApprovalRecord {
            approver: approver.to_string(),
            role: Role::BranchManager,
            action: ApprovalAction::Approve,
            comment: None,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn insert_then_get_round_trip() {
        let store = InMemoryRefillStore::default();
        let request = request("RR-1", "alice");

        store.insert_request(&request).await.expect("insert");
        let found = store.get_request(&request.request_id).await.expect("get");

        assert_eq!(found, Some(request));
    }

    #[tokio::test]
    async fn duplicate_insert_is_rejected() {
        let store = InMemoryRefillStore::default();
        let request = request("RR-1", "alice");

        store.insert_request(&request).await.expect("first insert");
        let error = store.insert_request(&request).await.expect_err("second insert must fail");

        assert!(matches!(error, StoreError::Backend(_)));
    }

    #[tokio::test]
    async fn query_applies_requestor_and_status_scope() {
        let store = InMemoryRefillStore::default();
        store.insert_request(&request("RR-1", "alice")).await.expect("insert 1");
        store.insert_request(&request("RR-2", "bob")).await.expect("insert 2");

        let own = store
            .query_requests(&RequestFilter {
                requestor: Some("alice".to_string()),
                status: None,
            })
            .await
            .expect("query");
        assert_eq!(own.len(), 1);
        assert_eq!(own[0].requestor, "alice");

        let approved = store
            .query_requests(&RequestFilter {
                requestor: None,
                status: Some(RefillStatus::Approved),
            })
            .await
            .expect("query");
        assert!(approved.is_empty());
    }

    #[tokio::test]
    async fn commit_decision_fails_precondition_after_first_commit() {
        let store = InMemoryRefillStore::default();
        let pending = request("RR-1", "alice");
        store.insert_request(&pending).await.expect("insert");

        let now = Utc::now();
        let first = store
            .commit_decision(
                &pending.request_id,
                RefillStatus::Pending,
                RefillStatus::Approved,
                now,
                &record("bob"),
            )
            .await
            .expect("first commit");
        assert!(first);

        let second = store
            .commit_decision(
                &pending.request_id,
                RefillStatus::Pending,
                RefillStatus::Refused,
                now,
                &record("carol"),
            )
            .await
            .expect("second commit");
        assert!(!second);

        let stored = store.get_request(&pending.request_id).await.expect("get").expect("exists");
        assert_eq!(stored.status, RefillStatus::Approved);
        assert_eq!(stored.approval_history.len(), 1);
        assert_eq!(stored.approval_history[0].approver, "bob");
    }
}
