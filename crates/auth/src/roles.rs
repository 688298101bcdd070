use serde::{Deserialize, Serialize};

use aquaops_core::DomainError;

use crate::permissions::{self, Capability};

/// Closed set of organization roles.
///
/// Each variant carries a constant capability set; adding a role forces every
/// `match` below to be revisited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Owner,
    Admin,
    Supervisor,
    Operator,
    Viewer,
}

const OWNER_CAPABILITIES: &[&str] = &["*"];

const ADMIN_CAPABILITIES: &[&str] = &[
    "plants:*",
    "maintenance:*",
    "emergencies:*",
    "opex:*",
    "checklists:*",
    "tickets:*",
    "users:*",
    "api_keys:*",
    "audit:read",
    "settings:*",
    "billing:read",
];

const SUPERVISOR_CAPABILITIES: &[&str] = &[
    "plants:read",
    "plants:update",
    "maintenance:*",
    "emergencies:*",
    "checklists:*",
    "tickets:*",
    "opex:read",
    "opex:create",
    "users:read",
];

const OPERATOR_CAPABILITIES: &[&str] = &[
    "plants:read",
    "maintenance:read",
    "maintenance:update",
    "emergencies:read",
    "emergencies:create",
    "checklists:read",
    "checklists:complete",
    "tickets:read",
    "tickets:create",
];

const VIEWER_CAPABILITIES: &[&str] = &[
    "plants:read",
    "maintenance:read",
    "emergencies:read",
    "opex:read",
    "checklists:read",
    "tickets:read",
];

impl Role {
    pub const ALL: [Role; 5] = [
        Role::Owner,
        Role::Admin,
        Role::Supervisor,
        Role::Operator,
        Role::Viewer,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Owner => "owner",
            Role::Admin => "admin",
            Role::Supervisor => "supervisor",
            Role::Operator => "operator",
            Role::Viewer => "viewer",
        }
    }

    /// The constant capability set granted to this role.
    pub fn capabilities(&self) -> &'static [&'static str] {
        match self {
            Role::Owner => OWNER_CAPABILITIES,
            Role::Admin => ADMIN_CAPABILITIES,
            Role::Supervisor => SUPERVISOR_CAPABILITIES,
            Role::Operator => OPERATOR_CAPABILITIES,
            Role::Viewer => VIEWER_CAPABILITIES,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Role::Owner => "Organization owner with every capability, including billing and ownership transfer",
            Role::Admin => "Administrator managing plants, operations, users and API keys",
            Role::Supervisor => "Operations supervisor for maintenance, emergencies, checklists and tickets",
            Role::Operator => "Plant operator executing tasks and reporting emergencies",
            Role::Viewer => "Read-only access to operational data",
        }
    }

    /// Owner and admin see every plant; the other roles are confined to
    /// their assigned plant when they have one.
    pub fn is_plant_restricted(&self) -> bool {
        !matches!(self, Role::Owner | Role::Admin)
    }

    /// Privilege rank, higher is more privileged.
    pub fn rank(&self) -> u8 {
        match self {
            Role::Owner => 4,
            Role::Admin => 3,
            Role::Supervisor => 2,
            Role::Operator => 1,
            Role::Viewer => 0,
        }
    }

    /// Does this role's capability set satisfy `required`?
    pub fn grants(&self, required: &Capability) -> bool {
        self.capabilities()
            .iter()
            .any(|granted| permissions::grants(granted, required.as_str()))
    }

    /// Can a holder of this role delegate `scope` (e.g. to an API key)?
    ///
    /// Wildcard scopes are only coverable by an equal or broader wildcard.
    pub fn covers(&self, scope: &Capability) -> bool {
        if scope.is_wildcard() {
            return self.capabilities().contains(&permissions::GLOBAL_WILDCARD);
        }
        self.grants(scope)
    }
}

impl core::fmt::Display for Role {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for Role {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Role::ALL
            .into_iter()
            .find(|role| role.as_str() == s)
            .ok_or_else(|| DomainError::validation(format!("unknown role '{s}'")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cap(s: &'static str) -> Capability {
        Capability::from_static(s)
    }

    #[test]
    fn owner_has_global_wildcard() {
        assert!(Role::Owner.grants(&cap("billing:manage")));
        assert!(Role::Owner.grants(&cap("anything:at_all")));
    }

    #[test]
    fn only_owner_holds_the_global_wildcard() {
        for role in Role::ALL {
            let has_global = role.capabilities().contains(&"*");
            assert_eq!(has_global, role == Role::Owner, "{role}");
        }
    }

    #[test]
    fn admin_cannot_manage_billing() {
        assert!(Role::Admin.grants(&cap("billing:read")));
        assert!(!Role::Admin.grants(&cap("billing:manage")));
    }

    #[test]
    fn viewer_is_read_only() {
        for c in VIEWER_CAPABILITIES {
            assert!(c.ends_with(":read"), "{c}");
        }
        assert!(!Role::Viewer.grants(&cap("plants:create")));
    }

    #[test]
    fn covers_prevents_wildcard_escalation() {
        assert!(Role::Admin.covers(&cap("maintenance:*")));
        assert!(Role::Admin.covers(&cap("plants:read")));
        assert!(!Role::Admin.covers(&cap("*")));
        assert!(!Role::Admin.covers(&cap("billing:*")));
        assert!(Role::Owner.covers(&cap("*")));
        assert!(!Role::Operator.covers(&cap("maintenance:*")));
    }

    #[test]
    fn plant_restriction_excludes_owner_and_admin() {
        assert!(!Role::Owner.is_plant_restricted());
        assert!(!Role::Admin.is_plant_restricted());
        assert!(Role::Supervisor.is_plant_restricted());
        assert!(Role::Operator.is_plant_restricted());
    }

    #[test]
    fn from_str_roundtrips() {
        for role in Role::ALL {
            assert_eq!(role.as_str().parse::<Role>().unwrap(), role);
        }
        assert!("root".parse::<Role>().is_err());
    }

    #[test]
    fn capability_tables_are_well_formed() {
        for role in Role::ALL {
            for c in role.capabilities() {
                assert!(Capability::parse(*c).is_ok(), "{role}: {c}");
            }
        }
    }
}
