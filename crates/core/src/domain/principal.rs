use serde::{Deserialize, Serialize};

/// Fixed organizational roles. The authorization matrix is defined over this
/// closed set, so an unknown role token can never reach the workflow engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    #[serde(rename = "atm_operations_staff")]
    Staff,
    #[serde(rename = "branch_operations_manager")]
    BranchManager,
    #[serde(rename = "head_office_authorization_officer")]
    HeadOfficer,
    #[serde(rename = "vault_manager")]
    VaultManager,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Staff => "atm_operations_staff",
            Self::BranchManager => "branch_operations_manager",
            Self::HeadOfficer => "head_office_authorization_officer",
            Self::VaultManager => "vault_manager",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "atm_operations_staff" => Some(Self::Staff),
            "branch_operations_manager" => Some(Self::BranchManager),
            "head_office_authorization_officer" => Some(Self::HeadOfficer),
            "vault_manager" => Some(Self::VaultManager),
            _ => None,
        }
    }

    /// Only ATM operations staff submit refill requests.
    pub fn may_create(&self) -> bool {
        matches!(self, Self::Staff)
    }

    /// Only branch managers and head office officers decide on requests.
    pub fn may_decide(&self) -> bool {
        matches!(self, Self::BranchManager | Self::HeadOfficer)
    }
}

/// An authenticated actor: username plus the role held at resolution time.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub username: String,
    pub role: Role,
}

impl Principal {
    pub fn new(username: impl Into<String>, role: Role) -> Self {
        Self { username: username.into(), role }
    }
}

#[cfg(test)]
mod tests {
    use super::Role;

    #[test]
    fn role_round_trips_from_storage_encoding() {
        let cases = [Role::Staff, Role::BranchManager, Role::HeadOfficer, Role::VaultManager];

        for role in cases {
            let decoded = Role::parse(role.as_str());
            assert_eq!(decoded, Some(role));
        }
    }

    #[test]
    fn unknown_role_token_is_rejected() {
        assert_eq!(Role::parse("intern"), None);
        assert_eq!(Role::parse(""), None);
    }

    #[test]
    fn only_staff_may_create() {
        assert!(Role::Staff.may_create());
        assert!(!Role::BranchManager.may_create());
        assert!(!Role::HeadOfficer.may_create());
        assert!(!Role::VaultManager.may_create());
    }

    #[test]
    fn only_managers_and_head_office_may_decide() {
        assert!(!Role::Staff.may_decide());
        assert!(Role::BranchManager.may_decide());
        assert!(Role::HeadOfficer.may_decide());
        assert!(!Role::VaultManager.may_decide());
    }
}
