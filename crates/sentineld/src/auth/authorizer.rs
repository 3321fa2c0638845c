//! Role-based authorization with wildcard permissions.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{PoisonError, RwLock};

use thiserror::Error;

const WILDCARD: &str = "*";

/// An allowed `resource:action` pair. Either side may be `*`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Permission {
    resource: String,
    action: String,
}

impl Permission {
    /// Creates a permission.
    #[must_use]
    pub fn new(resource: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            action: action.into(),
        }
    }

    /// Resource part.
    #[must_use]
    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// Action part.
    #[must_use]
    pub fn action(&self) -> &str {
        &self.action
    }

    /// Whether this permission covers `action` on `resource`.
    #[must_use]
    pub fn matches(&self, resource: &str, action: &str) -> bool {
        (self.resource == WILDCARD || self.resource == resource)
            && (self.action == WILDCARD || self.action == action)
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}:{}", self.resource, self.action)
    }
}

/// Error returned when a permission string is not `resource:action`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("permission `{0}` is not of the form resource:action")]
pub struct PermissionParseError(String);

impl FromStr for Permission {
    type Err = PermissionParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.split_once(':') {
            Some((resource, action)) if !resource.is_empty() && !action.is_empty() => {
                Ok(Self::new(resource, action))
            }
            _ => Err(PermissionParseError(value.to_owned())),
        }
    }
}

/// Maps roles to the permissions they grant.
#[derive(Debug, Default)]
pub struct RoleAuthorizer {
    roles: RwLock<BTreeMap<String, Vec<Permission>>>,
}

impl RoleAuthorizer {
    /// Creates an authorizer without roles; every check is denied.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an authorizer seeded with `admin`, `user` and `guest`.
    #[must_use]
    pub fn with_default_roles() -> Self {
        let authorizer = Self::new();
        authorizer.add_role("admin", [Permission::new(WILDCARD, WILDCARD)]);
        authorizer.add_role(
            "user",
            [Permission::new("user", "read"), Permission::new("user", "update")],
        );
        authorizer.add_role("guest", [Permission::new(WILDCARD, "read")]);
        authorizer
    }

    /// Grants `permissions` to `role`, keeping any it already had.
    pub fn add_role(&self, role: &str, permissions: impl IntoIterator<Item = Permission>) {
        let mut roles = self.roles.write().unwrap_or_else(PoisonError::into_inner);
        let granted = roles.entry(role.to_owned()).or_default();
        for permission in permissions {
            if !granted.contains(&permission) {
                granted.push(permission);
            }
        }
    }

    /// Whether `role` may perform `action` on `resource`.
    #[must_use]
    pub fn authorize(&self, role: &str, resource: &str, action: &str) -> bool {
        if role.is_empty() || resource.is_empty() || action.is_empty() {
            return false;
        }
        self.roles
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(role)
            .is_some_and(|granted| {
                granted
                    .iter()
                    .any(|permission| permission.matches(resource, action))
            })
    }

    /// Known role names, sorted.
    #[must_use]
    pub fn roles(&self) -> Vec<String> {
        self.roles
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    /// Permissions granted to `role`.
    #[must_use]
    pub fn permissions(&self, role: &str) -> Option<Vec<Permission>> {
        self.roles
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(role)
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::{fixture, rstest};

    #[fixture]
    fn authorizer() -> RoleAuthorizer {
        RoleAuthorizer::with_default_roles()
    }

    #[rstest]
    #[case::admin_anything("admin", "billing", "delete", true)]
    #[case::user_reads_users("user", "user", "read", true)]
    #[case::user_updates_users("user", "user", "update", true)]
    #[case::user_cannot_delete("user", "user", "delete", false)]
    #[case::user_other_resource("user", "billing", "read", false)]
    #[case::guest_reads_anything("guest", "billing", "read", true)]
    #[case::guest_cannot_write("guest", "user", "update", false)]
    #[case::unknown_role("auditor", "user", "read", false)]
    #[case::empty_role("", "user", "read", false)]
    fn seeded_roles(
        authorizer: RoleAuthorizer,
        #[case] role: &str,
        #[case] resource: &str,
        #[case] action: &str,
        #[case] allowed: bool,
    ) {
        assert_eq!(authorizer.authorize(role, resource, action), allowed);
    }

    #[rstest]
    fn seeded_role_names(authorizer: RoleAuthorizer) {
        assert_eq!(authorizer.roles(), ["admin", "guest", "user"]);
    }

    #[rstest]
    fn adding_to_a_role_keeps_existing_grants(authorizer: RoleAuthorizer) {
        authorizer.add_role("user", ["report:read".parse().expect("permission")]);

        assert!(authorizer.authorize("user", "report", "read"));
        assert!(authorizer.authorize("user", "user", "update"));
        assert_eq!(authorizer.permissions("user").map(|granted| granted.len()), Some(3));
    }

    #[rstest]
    #[case::no_colon("userread")]
    #[case::empty_action("user:")]
    fn malformed_permissions_are_rejected(#[case] raw: &str) {
        assert!(raw.parse::<Permission>().is_err());
    }
}
