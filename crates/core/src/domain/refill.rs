use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::principal::Role;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RefillRequestId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefillStatus {
    Pending,
    Approved,
    Refused,
}

impl RefillStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Refused => "refused",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "refused" => Some(Self::Refused),
            _ => None,
        }
    }

    /// Approved and Refused are terminal: no transition leaves them.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Approved | Self::Refused)
    }
}

/// What an approval-history entry records. `Requested` is only ever written at
/// creation time when the requestor supplied a comment.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalAction {
    Requested,
    Approve,
    Refuse,
}

impl ApprovalAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Requested => "requested",
            Self::Approve => "approve",
            Self::Refuse => "refuse",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "requested" => Some(Self::Requested),
            "approve" => Some(Self::Approve),
            "refuse" => Some(Self::Refuse),
            _ => None,
        }
    }
}

/// The two verbs a decision maker may apply to a pending request. Kept apart
/// from [`ApprovalAction`] so `requested` is unrepresentable as an act verb.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approve,
    Refuse,
}

impl Decision {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "approve" => Some(Self::Approve),
            "refuse" => Some(Self::Refuse),
            _ => None,
        }
    }

    pub fn target_status(&self) -> RefillStatus {
        match self {
            Self::Approve => RefillStatus::Approved,
            Self::Refuse => RefillStatus::Refused,
        }
    }

    pub fn record_action(&self) -> ApprovalAction {
        match self {
            Self::Approve => ApprovalAction::Approve,
            Self::Refuse => ApprovalAction::Refuse,
        }
    }
}

/// One immutable audit-trail entry. The role is captured at action time so the
/// trail stays historically accurate even if the approver's role later changes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRecord {
    pub approver: String,
    pub role: Role,
    pub action: ApprovalAction,
    pub comment: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefillRequest {
    pub request_id: RefillRequestId,
    pub atm_id: String,
    pub requested_amount: Decimal,
    pub requestor: String,
    pub status: RefillStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub approval_history: Vec<ApprovalRecord>,
}

impl RefillRequest {
    pub fn can_transition_to(&self, next: RefillStatus) -> bool {
        matches!(
            (self.status, next),
            (RefillStatus::Pending, RefillStatus::Approved)
                | (RefillStatus::Pending, RefillStatus::Refused)
        )
    }
}
