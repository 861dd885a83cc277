//! Identity propagation and role handling
//!
//! Tenant and user identity is carried as an explicit value through the
//! call chain rather than through ambient task-local state, so that every
//! storage operation binds its tenant in the predicate.

use serde::{Deserialize, Serialize};

/// Permission tier for a user within a tenant.
///
/// Roles form a total order: `Viewer < Editor < Admin < SuperAdmin`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Viewer,
    Editor,
    Admin,
    SuperAdmin,
}

impl Role {
    /// Parse a role token. Tokens are matched case-insensitively; unknown
    /// tokens are rejected.
    pub fn parse(token: &str) -> Option<Role> {
        match token.trim().to_lowercase().as_str() {
            "viewer" => Some(Role::Viewer),
            "editor" => Some(Role::Editor),
            "admin" => Some(Role::Admin),
            "super_admin" => Some(Role::SuperAdmin),
            _ => None,
        }
    }

    /// Wire representation of the role.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Viewer => "viewer",
            Role::Editor => "editor",
            Role::Admin => "admin",
            Role::SuperAdmin => "super_admin",
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Role::Viewer => 1,
            Role::Editor => 2,
            Role::Admin => 3,
            Role::SuperAdmin => 4,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalize a list of raw role tokens: lowercase, dedupe, drop unknowns.
/// An empty result defaults to `[Viewer]`.
pub fn normalize_roles<S: AsRef<str>>(tokens: &[S]) -> Vec<Role> {
    let mut result: Vec<Role> = Vec::with_capacity(tokens.len());
    for token in tokens {
        if let Some(role) = Role::parse(token.as_ref()) {
            if !result.contains(&role) {
                result.push(role);
            }
        }
    }
    if result.is_empty() {
        result.push(Role::Viewer);
    }
    result
}

/// Returns true when any of the input roles meets or exceeds the required tier.
pub fn has_at_least(roles: &[Role], required: Role) -> bool {
    roles.iter().any(|role| role.rank() >= required.rank())
}

/// Returns the top tier within the supplied role set.
pub fn highest_role(roles: &[Role]) -> Role {
    roles
        .iter()
        .copied()
        .max_by_key(|role| role.rank())
        .unwrap_or(Role::Viewer)
}

/// Authenticated identity scoped to a request or activity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub tenant_id: String,
    pub user_id: String,
    pub roles: Vec<Role>,
}

impl Identity {
    /// Build an identity, normalizing the supplied role tokens.
    pub fn new<S: AsRef<str>>(tenant_id: impl Into<String>, user_id: impl Into<String>, roles: &[S]) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            user_id: user_id.into(),
            roles: normalize_roles(roles),
        }
    }

    /// The tenant this identity is scoped to.
    ///
    /// Callers that require a tenant must treat an empty value as
    /// unauthenticated rather than defaulting it.
    pub fn tenant(&self) -> crate::Result<&str> {
        if self.tenant_id.trim().is_empty() {
            return Err(crate::Error::Unauthenticated(
                "missing tenant context".to_string(),
            ));
        }
        Ok(&self.tenant_id)
    }

    pub fn has_at_least(&self, required: Role) -> bool {
        has_at_least(&self.roles, required)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_known_roles() {
        assert_eq!(Role::parse("viewer"), Some(Role::Viewer));
        assert_eq!(Role::parse("EDITOR"), Some(Role::Editor));
        assert_eq!(Role::parse(" admin "), Some(Role::Admin));
        assert_eq!(Role::parse("super_admin"), Some(Role::SuperAdmin));
        assert_eq!(Role::parse("root"), None);
    }

    #[test]
    fn test_normalize_dedupes_and_drops_unknown() {
        let roles = normalize_roles(&["admin", "Admin", "bogus", "viewer"]);
        assert_eq!(roles, vec![Role::Admin, Role::Viewer]);
    }

    #[test]
    fn test_normalize_empty_defaults_to_viewer() {
        let roles = normalize_roles(&[] as &[&str]);
        assert_eq!(roles, vec![Role::Viewer]);

        let roles = normalize_roles(&["unknown"]);
        assert_eq!(roles, vec![Role::Viewer]);
    }

    #[test]
    fn test_has_at_least_compares_by_rank() {
        let roles = vec![Role::Editor];
        assert!(has_at_least(&roles, Role::Viewer));
        assert!(has_at_least(&roles, Role::Editor));
        assert!(!has_at_least(&roles, Role::Admin));

        let mixed = vec![Role::Viewer, Role::SuperAdmin];
        assert!(has_at_least(&mixed, Role::Admin));
    }

    #[test]
    fn test_highest_role() {
        assert_eq!(highest_role(&[Role::Viewer, Role::Admin]), Role::Admin);
        assert_eq!(highest_role(&[]), Role::Viewer);
    }

    #[test]
    fn test_identity_requires_tenant() {
        let identity = Identity::new("", "user-1", &["viewer"]);
        assert!(identity.tenant().is_err());

        let identity = Identity::new("tenant-1", "user-1", &["viewer"]);
        assert_eq!(identity.tenant().unwrap(), "tenant-1");
    }
}
