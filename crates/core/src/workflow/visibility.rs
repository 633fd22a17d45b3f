use crate::domain::principal::{Principal, Role};
use crate::domain::refill::{RefillRequest, RefillStatus};
use crate::storage::RequestFilter;

/// Role-derived visibility scope. This is the single authoritative access
/// predicate: `list` and audit-trail retrieval both go through it, so the
/// scoping rules cannot drift apart per endpoint.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VisibilityScope {
    requestor: Option<String>,
}

impl VisibilityScope {
    pub fn for_principal(principal: &Principal) -> Self {
        let requestor = match principal.role {
            Role::Staff => Some(principal.username.clone()),
            Role::BranchManager | Role::HeadOfficer | Role::VaultManager => None,
        };
        Self { requestor }
    }

    pub fn permits(&self, request: &RefillRequest) -> bool {
        match &self.requestor {
            Some(requestor) => &request.requestor == requestor,
            None => true,
        }
    }

    /// Store filter for a list call. An explicit status filter narrows the
    /// role scope; when absent, the role's customary default applies. Nothing
    /// here can widen the requestor restriction.
    pub fn list_filter(
        principal: &Principal,
        status_filter: Option<RefillStatus>,
    ) -> RequestFilter {
        let scope = Self::for_principal(principal);
        RequestFilter {
            requestor: scope.requestor,
            status: status_filter.or_else(|| default_status_filter(principal.role)),
        }
    }

    /// Audit trails are visible to anyone inside the role scope, and always to
    /// the original requestor.
    pub fn permits_audit(principal: &Principal, request: &RefillRequest) -> bool {
        Self::for_principal(principal).permits(request)
            || request.requestor == principal.username
    }
}

/// Work-queue defaults: branch managers review pending requests, vault
/// managers schedule approved ones. Head office sees everything unfiltered.
fn default_status_filter(role: Role) -> Option<RefillStatus> {
    match role {
        Role::BranchManager => Some(RefillStatus::Pending),
        Role::VaultManager => Some(RefillStatus::Approved),
        Role::Staff | Role::HeadOfficer => None,
    }
}
