use crate::models::{FlowId, UserId};

/// Scope used for flow permission grants in the surrounding team service.
pub const FLOW_ROLE_SCOPE: &str = "flow";

/// Can read a team's flows.
pub const FLOW_ROLE_READ: &str = "flow_read";
/// Can edit a team's flow drafts.
pub const FLOW_ROLE_EDIT: &str = "flow_edit";
/// Can copy flows or subtrees into a team's flows.
pub const FLOW_ROLE_COPY: &str = "flow_copy";
/// Can publish a team's flows.
pub const FLOW_ROLE_PUBLISH: &str = "flow_publish";
/// Can archive a team's flows.
pub const FLOW_ROLE_ARCHIVE: &str = "flow_archive";

pub const ALL_FLOW_PERMISSION_ROLES: &[&str] = &[
    FLOW_ROLE_READ,
    FLOW_ROLE_EDIT,
    FLOW_ROLE_COPY,
    FLOW_ROLE_PUBLISH,
    FLOW_ROLE_ARCHIVE,
];

pub fn is_flow_permission_role(role_name: &str) -> bool {
    ALL_FLOW_PERMISSION_ROLES
        .iter()
        .any(|known| *known == role_name)
}

/// Permission decisions live in the surrounding service; the engine only
/// asks and reports a refusal as `Forbidden`. Implementations receive the
/// trusted actor id, never one sourced from request payloads.
pub trait AccessPolicy {
    fn allows(&self, actor: UserId, flow_id: FlowId, role: &str) -> bool;
}

/// Policy for embedding and tests: everything is permitted.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl AccessPolicy for AllowAll {
    fn allows(&self, _actor: UserId, _flow_id: FlowId, _role: &str) -> bool {
        true
    }
}

/// Denies a fixed role everywhere. Useful for exercising refusal paths.
#[derive(Debug, Clone)]
pub struct DenyRole(pub &'static str);

impl AccessPolicy for DenyRole {
    fn allows(&self, _actor: UserId, _flow_id: FlowId, role: &str) -> bool {
        role != self.0
    }
}
