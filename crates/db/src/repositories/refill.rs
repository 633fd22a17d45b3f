use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{QueryBuilder, Row};

use cashpoint_core::domain::principal::Role;
use cashpoint_core::domain::refill::{
    ApprovalAction, ApprovalRecord, RefillRequest, RefillRequestId, RefillStatus,
};
use cashpoint_core::storage::{RefillRequestStore, RequestFilter, StoreError};

use crate::DbPool;

pub struct SqlRefillStore {
    pool: DbPool,
}

impl SqlRefillStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn load_history(
        &self,
        request_id: &str,
    ) -> Result<Vec<ApprovalRecord>, StoreError> {
        let rows = sqlx::query(
            "SELECT approver, role, action, comment, timestamp
             FROM approval_record
             WHERE request_id = ?
             ORDER BY timestamp ASC, id ASC",
        )
        .bind(request_id)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        rows.iter().map(row_to_record).collect()
    }
}

fn backend(error: sqlx::Error) -> StoreError {
    StoreError::Backend(error.to_string())
}

fn decode(message: impl Into<String>) -> StoreError {
    StoreError::Decode(message.into())
}

fn parse_timestamp(raw: &str, column: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| decode(format!("invalid {column} timestamp `{raw}`: {e}")))
}

fn row_to_record(row: &sqlx::sqlite::SqliteRow) -> Result<ApprovalRecord, StoreError> {
    let approver: String = row.try_get("approver").map_err(|e| decode(e.to_string()))?;
    let role_str: String = row.try_get("role").map_err(|e| decode(e.to_string()))?;
    let action_str: String = row.try_get("action").map_err(|e| decode(e.to_string()))?;
    let comment: Option<String> = row.try_get("comment").map_err(|e| decode(e.to_string()))?;
    let timestamp_str: String = row.try_get("timestamp").map_err(|e| decode(e.to_string()))?;

    Ok(ApprovalRecord {
        approver,
        role: Role::parse(&role_str)
            .ok_or_else(|| decode(format!("unknown role `{role_str}`")))?,
        action: ApprovalAction::parse(&action_str)
            .ok_or_else(|| decode(format!("unknown approval action `{action_str}`")))?,
        comment,
        timestamp: parse_timestamp(&timestamp_str, "approval_record.timestamp")?,
    })
}

fn row_to_request(row: &sqlx::sqlite::SqliteRow) -> Result<RefillRequest, StoreError> {
    let request_id: String = row.try_get("request_id").map_err(|e| decode(e.to_string()))?;
    let atm_id: String = row.try_get("atm_id").map_err(|e| decode(e.to_string()))?;
    let amount_str: String =
        row.try_get("requested_amount").map_err(|e| decode(e.to_string()))?;
    let requestor: String = row.try_get("requestor").map_err(|e| decode(e.to_string()))?;
    let status_str: String = row.try_get("status").map_err(|e| decode(e.to_string()))?;
    let created_at_str: String = row.try_get("created_at").map_err(|e| decode(e.to_string()))?;
    let updated_at_str: String = row.try_get("updated_at").map_err(|e| decode(e.to_string()))?;

    Ok(RefillRequest {
        request_id: RefillRequestId(request_id),
        atm_id,
        requested_amount: Decimal::from_str(&amount_str)
            .map_err(|e| decode(format!("invalid requested_amount `{amount_str}`: {e}")))?,
        requestor,
        status: RefillStatus::parse(&status_str)
            .ok_or_else(|| decode(format!("unknown status `{status_str}`")))?,
        created_at: parse_timestamp(&created_at_str, "refill_request.created_at")?,
        updated_at: parse_timestamp(&updated_at_str, "refill_request.updated_at")?,
        approval_history: Vec::new(),
    })
}

fn bind_record<'q>(
    query: sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>>,
    request_id: &'q str,
    record: &'q ApprovalRecord,
) -> sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>> {
    query
        .bind(request_id)
        .bind(&record.approver)
        .bind(record.role.as_str())
        .bind(record.action.as_str())
        .bind(record.comment.as_deref())
        .bind(record.timestamp.to_rfc3339())
}

const INSERT_RECORD_SQL: &str =
    "INSERT INTO approval_record (request_id, approver, role, action, comment, timestamp)
     VALUES (?, ?, ?, ?, ?, ?)";

#[async_trait]
impl RefillRequestStore for SqlRefillStore {
    async fn insert_request(&self, request: &RefillRequest) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;

        sqlx::query(
            "INSERT INTO refill_request
                 (request_id, atm_id, requested_amount, requestor, status, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&request.request_id.0)
        .bind(&request.atm_id)
        .bind(request.requested_amount.to_string())
        .bind(&request.requestor)
        .bind(request.status.as_str())
        .bind(request.created_at.to_rfc3339())
        .bind(request.updated_at.to_rfc3339())
        .execute(&mut *tx)
        .await
        .map_err(backend)?;

        // The initial `requested` entry (if any) lands in the same transaction
        // as the request itself.
        for record in &request.approval_history {
            bind_record(sqlx::query(INSERT_RECORD_SQL), &request.request_id.0, record)
                .execute(&mut *tx)
                .await
                .map_err(backend)?;
        }

        tx.commit().await.map_err(backend)?;
        Ok(())
    }

    async fn get_request(
        &self,
        id: &RefillRequestId,
    ) -> Result<Option<RefillRequest>, StoreError> {
        let row = sqlx::query(
            "SELECT request_id, atm_id, requested_amount, requestor, status, created_at, updated_at
             FROM refill_request WHERE request_id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        let Some(row) = row else {
            return Ok(None);
        };

        let mut request = row_to_request(&row)?;
        request.approval_history = self.load_history(&request.request_id.0).await?;
        Ok(Some(request))
    }

    async fn query_requests(
        &self,
        filter: &RequestFilter,
    ) -> Result<Vec<RefillRequest>, StoreError> {
        let mut builder = QueryBuilder::new(
            "SELECT request_id, atm_id, requested_amount, requestor, status, created_at, updated_at
             FROM refill_request",
        );

        let mut prefix = " WHERE ";
        if let Some(requestor) = &filter.requestor {
            builder.push(prefix).push("requestor = ").push_bind(requestor.as_str());
            prefix = " AND ";
        }
        if let Some(status) = filter.status {
            builder.push(prefix).push("status = ").push_bind(status.as_str());
        }
        builder.push(" ORDER BY created_at ASC, request_id ASC");

        let rows = builder.build().fetch_all(&self.pool).await.map_err(backend)?;

        let mut requests = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut request = row_to_request(row)?;
            request.approval_history = self.load_history(&request.request_id.0).await?;
            requests.push(request);
        }
        Ok(requests)
    }

    async fn commit_decision(
        &self,
        id: &RefillRequestId,
        expected: RefillStatus,
        new_status: RefillStatus,
        updated_at: DateTime<Utc>,
        record: &ApprovalRecord,
    ) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;

        // Conditional update: the status write only lands while the request
        // still holds `expected`, which serializes racing decisions.
        let updated = sqlx::query(
            "UPDATE refill_request SET status = ?, updated_at = ?
             WHERE request_id = ? AND status = ?",
        )
        .bind(new_status.as_str())
        .bind(updated_at.to_rfc3339())
        .bind(&id.0)
        .bind(expected.as_str())
        .execute(&mut *tx)
        .await
        .map_err(backend)?;

        if updated.rows_affected() == 0 {
            tx.rollback().await.map_err(backend)?;
            return Ok(false);
        }

        bind_record(sqlx::query(INSERT_RECORD_SQL), &id.0, record)
            .execute(&mut *tx)
            .await
            .map_err(backend)?;

        tx.commit().await.map_err(backend)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use rust_decimal::Decimal;

    use cashpoint_core::domain::principal::Role;
    use cashpoint_core::domain::refill::{
        ApprovalAction, ApprovalRecord, RefillRequest, RefillRequestId, RefillStatus,
    };
    use cashpoint_core::storage::{RefillRequestStore, RequestFilter};

    use super::SqlRefillStore;
    use crate::{connect_with_settings, migrations};

    async fn setup() -> sqlx::SqlitePool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        pool
    }

    fn sample_request(id: &str, requestor: &str) -> RefillRequest {
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

    fn decision_record(approver: &str, action: ApprovalAction) -> ApprovalRecord {
        ApprovalRecord {
            approver: approver.to_string(),
            role: Role::BranchManager,
            action,
            comment: Some("counted and verified".to_string()),
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn insert_and_get_round_trip_preserves_amount_and_status() {
        let pool = setup().await;
        let store = SqlRefillStore::new(pool);

        let request = sample_request("RR-001", "alice");
        store.insert_request(&request).await.expect("insert");

        let found =
            store.get_request(&request.request_id).await.expect("get").expect("should exist");
        assert_eq!(found.requested_amount, Decimal::new(50_000, 2));
        assert_eq!(found.status, RefillStatus::Pending);
        assert_eq!(found.requestor, "alice");
        assert!(found.approval_history.is_empty());
    }

    #[tokio::test]
    async fn insert_persists_initial_requested_entry_with_the_request() {
        let pool = setup().await;
        let store = SqlRefillStore::new(pool);

        let mut request = sample_request("RR-001", "alice");
        request.approval_history.push(ApprovalRecord {
            approver: "alice".to_string(),
            role: Role::Staff,
            action: ApprovalAction::Requested,
            comment: Some("cassette two is empty".to_string()),
            timestamp: request.created_at,
        });
        store.insert_request(&request).await.expect("insert");

        let found =
            store.get_request(&request.request_id).await.expect("get").expect("should exist");
        assert_eq!(found.approval_history.len(), 1);
        assert_eq!(found.approval_history[0].action, ApprovalAction::Requested);
        assert_eq!(found.approval_history[0].role, Role::Staff);
    }

    #[tokio::test]
    async fn commit_decision_applies_once_and_rejects_the_second_attempt() {
        let pool = setup().await;
        let store = SqlRefillStore::new(pool);

        let request = sample_request("RR-001", "alice");
        store.insert_request(&request).await.expect("insert");

        let now = Utc::now();
        let first = store
            .commit_decision(
                &request.request_id,
                RefillStatus::Pending,
                RefillStatus::Approved,
                now,
                &decision_record("bob", ApprovalAction::Approve),
            )
            .await
            .expect("first commit");
        assert!(first);

        let second = store
            .commit_decision(
                &request.request_id,
                RefillStatus::Pending,
                RefillStatus::Refused,
                Utc::now(),
                &decision_record("carol", ApprovalAction::Refuse),
            )
            .await
            .expect("second commit");
        assert!(!second);

        // The losing attempt must leave no trace: one transition, one record.
        let found =
            store.get_request(&request.request_id).await.expect("get").expect("should exist");
        assert_eq!(found.status, RefillStatus::Approved);
        assert_eq!(found.approval_history.len(), 1);
        assert_eq!(found.approval_history[0].approver, "bob");
        assert!(found.updated_at >= found.created_at);
    }

    #[tokio::test]
    async fn query_scopes_by_requestor_and_status() {
        let pool = setup().await;
        let store = SqlRefillStore::new(pool);

        store.insert_request(&sample_request("RR-001", "alice")).await.expect("insert 1");
        store.insert_request(&sample_request("RR-002", "bob")).await.expect("insert 2");
        let third = sample_request("RR-003", "alice");
        store.insert_request(&third).await.expect("insert 3");
        store
            .commit_decision(
                &third.request_id,
                RefillStatus::Pending,
                RefillStatus::Approved,
                Utc::now(),
                &decision_record("bob", ApprovalAction::Approve),
            )
            .await
            .expect("approve third");

        let alices = store
            .query_requests(&RequestFilter {
                requestor: Some("alice".to_string()),
                status: None,
            })
            .await
            .expect("query by requestor");
        assert_eq!(alices.len(), 2);
        assert!(alices.iter().all(|request| request.requestor == "alice"));

        let pending = store
            .query_requests(&RequestFilter {
                requestor: None,
                status: Some(RefillStatus::Pending),
            })
            .await
            .expect("query by status");
        assert_eq!(pending.len(), 2);

        let alice_approved = store
            .query_requests(&RequestFilter {
                requestor: Some("alice".to_string()),
                status: Some(RefillStatus::Approved),
            })
            .await
            .expect("query by both");
        assert_eq!(alice_approved.len(), 1);
        assert_eq!(alice_approved[0].request_id.0, "RR-003");
    }

    #[tokio::test]
    async fn history_is_returned_in_timestamp_order() {
        let pool = setup().await;
        let store = SqlRefillStore::new(pool);

        let earlier = Utc::now() - Duration::minutes(5);
        let mut request = sample_request("RR-001", "alice");
        request.approval_history.push(ApprovalRecord {
            approver: "alice".to_string(),
            role: Role::Staff,
            action: ApprovalAction::Requested,
            comment: None,
            timestamp: earlier,
        });
        store.insert_request(&request).await.expect("insert");
        store
            .commit_decision(
                &request.request_id,
                RefillStatus::Pending,
                RefillStatus::Refused,
                Utc::now(),
                &decision_record("carol", ApprovalAction::Refuse),
            )
            .await
            .expect("refuse");

        let found =
            store.get_request(&request.request_id).await.expect("get").expect("should exist");
        assert_eq!(found.approval_history.len(), 2);
        assert_eq!(found.approval_history[0].action, ApprovalAction::Requested);
        assert_eq!(found.approval_history[1].action, ApprovalAction::Refuse);
        assert!(
            found.approval_history[0].timestamp <= found.approval_history[1].timestamp,
            "history must be ordered by timestamp ascending",
        );
    }
}
