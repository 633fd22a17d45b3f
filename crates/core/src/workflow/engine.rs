use chrono::Utc;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::domain::principal::Principal;
use crate::domain::refill::{
    ApprovalAction, ApprovalRecord, Decision, RefillRequest, RefillRequestId, RefillStatus,
};
use crate::errors::WorkflowError;
use crate::storage::RefillRequestStore;
use crate::workflow::visibility::VisibilityScope;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CreateRefillRequest {
    pub atm_id: String,
    pub requested_amount: Decimal,
    pub comment: Option<String>,
}

/// The request lifecycle state machine. Owns no mutable state of its own; the
/// injected store is the only shared resource, and its conditional commit
/// serializes concurrent transitions on the same request.
pub struct WorkflowEngine<S> {
    store: S,
}

impl<S> WorkflowEngine<S>
where
    S: RefillRequestStore,
{
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Create a new refill request in `Pending` status. When the requestor
    /// supplied a comment, the request is persisted together with its initial
    /// `requested` history entry in a single insert.
    pub async fn create(
        &self,
        input: CreateRefillRequest,
        principal: &Principal,
    ) -> Result<RefillRequest, WorkflowError> {
        if !principal.role.may_create() {
            return Err(WorkflowError::Unauthorized {
                role: principal.role,
                operation: "create refill requests",
            });
        }

        let atm_id = input.atm_id.trim();
        if atm_id.is_empty() {
            return Err(WorkflowError::InvalidInput("atm_id must not be empty".to_string()));
        }
        if principal.username.trim().is_empty() {
            return Err(WorkflowError::InvalidInput("requestor must not be empty".to_string()));
        }
        if input.requested_amount <= Decimal::ZERO {
            return Err(WorkflowError::InvalidInput(format!(
                "requested_amount must be positive, got {}",
                input.requested_amount
            )));
        }

        let now = Utc::now();
        let comment =
            input.comment.map(|comment| comment.trim().to_string()).filter(|c| !c.is_empty());
        let approval_history = comment
            .map(|comment| {
                vec![ApprovalRecord {
                    approver: principal.username.clone(),
                    role: principal.role,
                    action: ApprovalAction::Requested,
                    comment: Some(comment),
                    timestamp: now,
                }]
            })
            .unwrap_or_default();

        let request = RefillRequest {
            request_id: RefillRequestId(Uuid::new_v4().to_string()),
            atm_id: atm_id.to_string(),
            requested_amount: input.requested_amount,
            requestor: principal.username.clone(),
            status: RefillStatus::Pending,
            created_at: now,
            updated_at: now,
            approval_history,
        };

        self.store.insert_request(&request).await?;
        Ok(request)
    }

    /// Apply an approve/refuse decision. The status transition, the
    /// `updated_at` stamp, and the audit record are committed as one atomic
    /// unit; when two actors race, the store's conditional commit picks
    /// exactly one winner and the loser gets `AlreadyProcessed`.
    pub async fn act(
        &self,
        request_id: &RefillRequestId,
        decision: Decision,
        principal: &Principal,
        comment: Option<String>,
    ) -> Result<RefillRequest, WorkflowError> {
        if !principal.role.may_decide() {
            return Err(WorkflowError::Unauthorized {
                role: principal.role,
                operation: "act on refill requests",
            });
        }

        let Some(request) = self.store.get_request(request_id).await? else {
            return Err(WorkflowError::NotFound { request_id: request_id.clone() });
        };
        if request.status != RefillStatus::Pending {
            return Err(WorkflowError::AlreadyProcessed {
                request_id: request_id.clone(),
                status: request.status,
            });
        }

        let now = Utc::now();
        let record = ApprovalRecord {
            approver: principal.username.clone(),
            role: principal.role,
            action: decision.record_action(),
            comment: comment.map(|c| c.trim().to_string()).filter(|c| !c.is_empty()),
            timestamp: now,
        };

        let committed = self
            .store
            .commit_decision(request_id, RefillStatus::Pending, decision.target_status(), now, &record)
            .await?;
        if !committed {
            // Lost the race: report the status that won.
            let status = match self.store.get_request(request_id).await? {
                Some(current) => current.status,
                None => return Err(WorkflowError::NotFound { request_id: request_id.clone() }),
            };
            return Err(WorkflowError::AlreadyProcessed {
                request_id: request_id.clone(),
                status,
            });
        }

        let mut updated = request;
        updated.status = decision.target_status();
        updated.updated_at = now;
        updated.approval_history.push(record);
        Ok(updated)
    }

    /// Requests visible to the principal, ordered by creation time. Scoping is
    /// delegated to the visibility filter; the explicit status filter only
    /// narrows it.
    pub async fn list(
        &self,
        principal: &Principal,
        status_filter: Option<RefillStatus>,
    ) -> Result<Vec<RefillRequest>, WorkflowError> {
        let filter = VisibilityScope::list_filter(principal, status_filter);
        Ok(self.store.query_requests(&filter).await?)
    }

    /// Audit trail for one request, timestamp ascending. A principal outside
    /// the visibility scope (and not the requestor) gets `NotFound`, so
    /// request existence is never leaked to unauthorized callers.
    pub async fn audit_trail(
        &self,
        request_id: &RefillRequestId,
        principal: &Principal,
    ) -> Result<Vec<ApprovalRecord>, WorkflowError> {
        let Some(request) = self.store.get_request(request_id).await? else {
            return Err(WorkflowError::NotFound { request_id: request_id.clone() });
        };
        if !VisibilityScope::permits_audit(principal, &request) {
            return Err(WorkflowError::NotFound { request_id: request_id.clone() });
        }
        Ok(request.approval_history)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rust_decimal::Decimal;

    use crate::domain::principal::{Principal, Role};
    use crate::domain::refill::{ApprovalAction, Decision, RefillRequestId, RefillStatus};
    use crate::errors::WorkflowError;
    use crate::storage::InMemoryRefillStore;

    use super::{CreateRefillRequest, WorkflowEngine};

    fn engine() -> WorkflowEngine<InMemoryRefillStore> {
        WorkflowEngine::new(InMemoryRefillStore::default())
    }

    fn staff(username: &str) -> Principal {
        Principal::new(username, Role::Staff)
    }

    fn branch_manager(username: &str) -> Principal {
        Principal::new(username, Role::BranchManager)
    }

    fn create_input(amount: Decimal, comment: Option<&str>) -> CreateRefillRequest {
        CreateRefillRequest {
            atm_id: "ATM-7".to_string(),
            requested_amount: amount,
            comment: comment.map(ToString::to_string),
        }
    }

    #[tokio::test]
    async fn create_returns_pending_request_with_empty_history() {
        let engine = engine();

        let request = engine
            .create(create_input(Decimal::new(50_000, 2), None), &staff("alice"))
            .await
            .expect("create");

        assert_eq!(request.status, RefillStatus::Pending);
        assert_eq!(request.requestor, "alice");
        assert_eq!(request.atm_id, "ATM-7");
        assert!(request.approval_history.is_empty());
        assert_eq!(request.created_at, request.updated_at);
    }

    #[tokio::test]
    async fn create_with_comment_records_initial_requested_entry() {
        let engine = engine();

        let request = engine
            .create(
                create_input(Decimal::new(50_000, 2), Some("cassette nearly empty")),
                &staff("alice"),
            )
            .await
            .expect("create");

        assert_eq!(request.approval_history.len(), 1);
        let entry = &request.approval_history[0];
        assert_eq!(entry.action, ApprovalAction::Requested);
        assert_eq!(entry.approver, "alice");
        assert_eq!(entry.role, Role::Staff);
        assert_eq!(entry.comment.as_deref(), Some("cassette nearly empty"));
    }

    #[tokio::test]
    async fn create_rejects_non_positive_amounts() {
        let engine = engine();

        for amount in [Decimal::new(-1_000, 2), Decimal::ZERO] {
            let error = engine
                .create(create_input(amount, None), &staff("alice"))
                .await
                .expect_err("non-positive amount must fail");
            assert!(matches!(error, WorkflowError::InvalidInput(_)));
        }
    }

    #[tokio::test]
    async fn create_rejects_blank_atm_id() {
        let engine = engine();

        let error = engine
            .create(
                CreateRefillRequest {
                    atm_id: "   ".to_string(),
                    requested_amount: Decimal::new(50_000, 2),
                    comment: None,
                },
                &staff("alice"),
            )
            .await
            .expect_err("blank atm_id must fail");

        assert!(matches!(error, WorkflowError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn create_is_denied_for_every_non_staff_role() {
        let engine = engine();

        for role in [Role::BranchManager, Role::HeadOfficer, Role::VaultManager] {
            let error = engine
                .create(create_input(Decimal::new(50_000, 2), None), &Principal::new("mgr", role))
                .await
                .expect_err("non-staff create must fail");
            assert!(matches!(error, WorkflowError::Unauthorized { .. }));
        }
    }

    #[tokio::test]
    async fn created_request_is_immediately_visible_to_the_requestor() {
        let engine = engine();
        let alice = staff("alice");

        let created = engine
            .create(create_input(Decimal::new(50_000, 2), None), &alice)
            .await
            .expect("create");

        let listed = engine.list(&alice, None).await.expect("list");
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].request_id, created.request_id);
    }

    #[tokio::test]
    async fn approve_transitions_status_and_appends_exactly_one_record() {
        let engine = engine();
        let created = engine
            .create(create_input(Decimal::new(50_000, 2), None), &staff("alice"))
            .await
            .expect("create");

        let updated = engine
            .act(&created.request_id, Decision::Approve, &branch_manager("bob"), None)
            .await
            .expect("approve");

        assert_eq!(updated.status, RefillStatus::Approved);
        assert_eq!(updated.approval_history.len(), 1);
        assert_eq!(updated.approval_history[0].action, ApprovalAction::Approve);
        assert_eq!(updated.approval_history[0].approver, "bob");
        assert_eq!(updated.approval_history[0].role, Role::BranchManager);
        assert!(updated.updated_at >= updated.created_at);
    }

    #[tokio::test]
    async fn refuse_transitions_to_refused() {
        let engine = engine();
        let created = engine
            .create(create_input(Decimal::new(50_000, 2), None), &staff("alice"))
            .await
            .expect("create");

        let updated = engine
            .act(
                &created.request_id,
                Decision::Refuse,
                &Principal::new("carol", Role::HeadOfficer),
                Some("over branch limit".to_string()),
            )
            .await
            .expect("refuse");

        assert_eq!(updated.status, RefillStatus::Refused);
        assert_eq!(updated.approval_history[0].comment.as_deref(), Some("over branch limit"));
    }

    #[tokio::test]
    async fn vault_manager_and_staff_may_not_act() {
        let engine = engine();
        let created = engine
            .create(create_input(Decimal::new(50_000, 2), None), &staff("alice"))
            .await
            .expect("create");

        for principal in
            [Principal::new("dave", Role::VaultManager), Principal::new("alice", Role::Staff)]
        {
            let error = engine
                .act(&created.request_id, Decision::Refuse, &principal, None)
                .await
                .expect_err("act must be denied");
            assert!(matches!(error, WorkflowError::Unauthorized { .. }));
        }

        // The denied attempts must not have touched the request.
        let trail =
            engine.audit_trail(&created.request_id, &staff("alice")).await.expect("audit");
        assert!(trail.is_empty());
    }

    #[tokio::test]
    async fn act_on_unknown_request_is_not_found() {
        let engine = engine();

        let error = engine
            .act(
                &RefillRequestId("missing".to_string()),
                Decision::Approve,
                &branch_manager("bob"),
                None,
            )
            .await
            .expect_err("unknown request must fail");

        assert!(matches!(error, WorkflowError::NotFound { .. }));
    }

    #[tokio::test]
    async fn second_sequential_act_returns_already_processed() {
        let engine = engine();
        let created = engine
            .create(create_input(Decimal::new(50_000, 2), None), &staff("alice"))
            .await
            .expect("create");

        engine
            .act(&created.request_id, Decision::Approve, &branch_manager("bob"), None)
            .await
            .expect("first act");
        let error = engine
            .act(&created.request_id, Decision::Refuse, &branch_manager("bob"), None)
            .await
            .expect_err("second act must fail");

        assert_eq!(
            error,
            WorkflowError::AlreadyProcessed {
                request_id: created.request_id.clone(),
                status: RefillStatus::Approved,
            }
        );

        // Exactly one transition, exactly one record.
        let trail = engine
            .audit_trail(&created.request_id, &branch_manager("bob"))
            .await
            .expect("audit");
        assert_eq!(trail.len(), 1);
    }

    #[tokio::test]
    async fn concurrent_acts_admit_exactly_one_winner() {
        let engine = Arc::new(engine());
        let created = engine
            .create(create_input(Decimal::new(50_000, 2), None), &staff("alice"))
            .await
            .expect("create");

        let mut handles = Vec::new();
        for i in 0..8 {
            let engine = Arc::clone(&engine);
            let request_id = created.request_id.clone();
            let decision = if i % 2 == 0 { Decision::Approve } else { Decision::Refuse };
            handles.push(tokio::spawn(async move {
                let approver = branch_manager(&format!("mgr-{i}"));
                engine.act(&request_id, decision, &approver, None).await
            }));
        }

        let mut winners = Vec::new();
        let mut losers = 0;
        for handle in handles {
            match handle.await.expect("task join") {
                Ok(updated) => winners.push(updated),
                Err(error) => {
                    assert!(matches!(error, WorkflowError::AlreadyProcessed { .. }));
                    losers += 1;
                }
            }
        }

        assert_eq!(winners.len(), 1);
        assert_eq!(losers, 7);

        // Final state matches whichever decision committed, with one record.
        let trail = engine
            .audit_trail(&created.request_id, &branch_manager("auditor"))
            .await
            .expect("audit");
        assert_eq!(trail.len(), 1);
        let expected_status = match trail[0].action {
            ApprovalAction::Approve => RefillStatus::Approved,
            ApprovalAction::Refuse => RefillStatus::Refused,
            ApprovalAction::Requested => panic!("creation entry cannot win the race"),
        };
        assert_eq!(winners[0].status, expected_status);
    }

    #[tokio::test]
    async fn staff_list_never_contains_foreign_requests() {
        let engine = engine();
        engine
            .create(create_input(Decimal::new(50_000, 2), None), &staff("alice"))
            .await
            .expect("create alice");
        engine
            .create(create_input(Decimal::new(30_000, 2), None), &staff("bob"))
            .await
            .expect("create bob");

        let listed = engine.list(&staff("alice"), None).await.expect("list");
        assert!(!listed.is_empty());
        assert!(listed.iter().all(|request| request.requestor == "alice"));
    }

    #[tokio::test]
    async fn branch_manager_default_list_is_the_pending_queue() {
        let engine = engine();
        let first = engine
            .create(create_input(Decimal::new(50_000, 2), None), &staff("alice"))
            .await
            .expect("create");
        engine
            .create(create_input(Decimal::new(30_000, 2), None), &staff("bob"))
            .await
            .expect("create");
        engine
            .act(&first.request_id, Decision::Approve, &branch_manager("bob"), None)
            .await
            .expect("approve");

        let queue = engine.list(&branch_manager("bob"), None).await.expect("list");
        assert_eq!(queue.len(), 1);
        assert_eq!(queue[0].status, RefillStatus::Pending);

        let approved = engine
            .list(&branch_manager("bob"), Some(RefillStatus::Approved))
            .await
            .expect("list approved");
        assert_eq!(approved.len(), 1);
        assert_eq!(approved[0].request_id, first.request_id);
    }

    #[tokio::test]
    async fn history_length_is_monotonically_non_decreasing() {
        let engine = engine();
        let created = engine
            .create(
                create_input(Decimal::new(50_000, 2), Some("low on twenties")),
                &staff("alice"),
            )
            .await
            .expect("create");
        assert_eq!(created.approval_history.len(), 1);

        let updated = engine
            .act(&created.request_id, Decision::Approve, &branch_manager("bob"), None)
            .await
            .expect("approve");
        assert_eq!(updated.approval_history.len(), 2);

        // Ordered by timestamp ascending: requested first, decision last.
        assert_eq!(updated.approval_history[0].action, ApprovalAction::Requested);
        assert_eq!(updated.approval_history[1].action, ApprovalAction::Approve);
        assert!(updated.approval_history[0].timestamp <= updated.approval_history[1].timestamp);
    }

    #[tokio::test]
    async fn audit_trail_is_hidden_from_unrelated_staff() {
        let engine = engine();
        let created = engine
            .create(create_input(Decimal::new(50_000, 2), Some("note")), &staff("alice"))
            .await
            .expect("create");

        let error = engine
            .audit_trail(&created.request_id, &staff("eve"))
            .await
            .expect_err("foreign staff must not see the trail");
        // Denied access is indistinguishable from a missing request.
        assert_eq!(error, WorkflowError::NotFound { request_id: created.request_id.clone() });

        let own = engine.audit_trail(&created.request_id, &staff("alice")).await.expect("own");
        assert_eq!(own.len(), 1);
        let privileged = engine
            .audit_trail(&created.request_id, &Principal::new("dave", Role::VaultManager))
            .await
            .expect("vault manager may inspect trails");
        assert_eq!(privileged.len(), 1);
    }
}
