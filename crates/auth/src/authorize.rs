use serde::Serialize;
use thiserror::Error;

use aquaops_core::PlantId;

use crate::{Actor, Capability, Principal, Role, permissions};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    /// A user's role does not grant the capability.
    #[error("permission denied: missing capability '{0}'")]
    PermissionDenied(String),

    /// An API key's scopes do not cover the capability.
    #[error("api key scope insufficient: missing capability '{0}'")]
    ScopeInsufficient(String),
}

/// Deterministic capability check.
///
/// Depends only on the principal's role (or key scopes) and `required`.
pub fn has_permission(principal: &Principal, required: &Capability) -> bool {
    match &principal.actor {
        Actor::User { role, .. } => role.grants(required),
        Actor::ApiKey { scopes, .. } => scopes
            .iter()
            .any(|scope| permissions::grants(scope.as_str(), required.as_str())),
    }
}

/// Authorize a principal within its organization.
///
/// - No IO
/// - No panics
pub fn authorize(principal: &Principal, required: &Capability) -> Result<(), AuthzError> {
    if has_permission(principal, required) {
        return Ok(());
    }
    let missing = required.as_str().to_string();
    Err(match principal.actor {
        Actor::User { .. } => AuthzError::PermissionDenied(missing),
        Actor::ApiKey { .. } => AuthzError::ScopeInsufficient(missing),
    })
}

/// Plant scoping: users below admin who are assigned to a plant may only
/// touch that plant. API keys are organization-wide.
pub fn authorize_plant(principal: &Principal, plant_id: PlantId) -> Result<(), AuthzError> {
    match (&principal.actor, principal.plant_id) {
        (Actor::User { role, .. }, Some(assigned)) if role.is_plant_restricted() && assigned != plant_id => {
            Err(AuthzError::PermissionDenied(format!("plant:{plant_id}")))
        }
        _ => Ok(()),
    }
}

/// Plant filter to apply to list queries, `None` meaning every plant.
pub fn plant_scope(principal: &Principal) -> Option<PlantId> {
    match &principal.actor {
        Actor::User { role, .. } if role.is_plant_restricted() => principal.plant_id,
        _ => None,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Authorization Explanation
// ─────────────────────────────────────────────────────────────────────────────

/// Detailed explanation of an authorization decision.
#[derive(Debug, Clone, Serialize)]
pub struct AuthorizationExplanation {
    pub required_capability: String,
    pub granted: bool,
    pub reason: String,
    pub principal: PrincipalState,
    /// The granted capability that matched, if any.
    pub matched_by: Option<String>,
    pub denial_reason: Option<DenialReason>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PrincipalState {
    pub actor: String,
    pub organization_id: String,
    pub role: Option<Role>,
    pub plant_id: Option<PlantId>,
    pub effective_capabilities: Vec<String>,
    pub has_wildcard: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct DenialReason {
    pub kind: DenialKind,
    pub message: String,
    pub suggestions: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialKind {
    MissingPermission,
    MissingScope,
}

/// Explain why an authorization decision was made (or would be made).
///
/// The `granted` flag always agrees with [`has_permission`].
pub fn explain_authorization(principal: &Principal, required: &Capability) -> AuthorizationExplanation {
    let required_str = required.as_str();
    let mut effective = principal.effective_capabilities();
    effective.sort();

    let matched_by = effective
        .iter()
        .find(|granted| permissions::grants(granted, required_str))
        .cloned();

    let state = PrincipalState {
        actor: principal.label(),
        organization_id: principal.organization_id.to_string(),
        role: principal.role(),
        plant_id: principal.plant_id,
        has_wildcard: effective.iter().any(|c| c == permissions::GLOBAL_WILDCARD),
        effective_capabilities: effective,
    };

    match matched_by {
        Some(granted) => {
            let reason = if granted == permissions::GLOBAL_WILDCARD {
                "Principal holds the global wildcard '*'".to_string()
            } else if granted == required_str {
                format!("Principal holds '{required_str}' exactly")
            } else {
                format!("'{granted}' covers '{required_str}'")
            };
            AuthorizationExplanation {
                required_capability: required_str.to_string(),
                granted: true,
                reason,
                principal: state,
                matched_by: Some(granted),
                denial_reason: None,
            }
        }
        None => {
            let (kind, suggestions) = match &principal.actor {
                Actor::User { .. } => {
                    let roles: Vec<&str> = Role::ALL
                        .iter()
                        .filter(|r| r.grants(required))
                        .map(|r| r.as_str())
                        .collect();
                    (
                        DenialKind::MissingPermission,
                        vec![format!("Roles granting '{required_str}': {}", roles.join(", "))],
                    )
                }
                Actor::ApiKey { .. } => (
                    DenialKind::MissingScope,
                    vec![format!(
                        "Issue a key with scope '{required_str}' or '{}:*'",
                        required.resource().unwrap_or("*")
                    )],
                ),
            };
            AuthorizationExplanation {
                required_capability: required_str.to_string(),
                granted: false,
                reason: format!("No granted capability covers '{required_str}'"),
                principal: state,
                matched_by: None,
                denial_reason: Some(DenialReason {
                    kind,
                    message: format!("Missing required capability: '{required_str}'"),
                    suggestions,
                }),
            }
        }
    }
}

/// Role definition with its granted capabilities (for the admin UI).
#[derive(Debug, Clone, Serialize)]
pub struct RoleDefinition {
    pub name: Role,
    pub capabilities: Vec<&'static str>,
    pub description: &'static str,
    pub plant_restricted: bool,
}

/// Catalogue of every role, most privileged first.
pub fn role_definitions() -> Vec<RoleDefinition> {
    Role::ALL
        .iter()
        .map(|role| RoleDefinition {
            name: *role,
            capabilities: role.capabilities().to_vec(),
            description: role.description(),
            plant_restricted: role.is_plant_restricted(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use aquaops_core::{ApiKeyId, OrganizationId, UserId};
    use proptest::prelude::*;

    fn user(role: Role, plant: Option<PlantId>) -> Principal {
        Principal::user(OrganizationId::new(), UserId::new(), role, plant)
    }

    fn key(scopes: &[&'static str]) -> Principal {
        Principal::api_key(
            OrganizationId::new(),
            ApiKeyId::new(),
            scopes.iter().copied().map(Capability::from_static).collect(),
        )
    }

    #[test]
    fn users_get_permission_denied() {
        let p = user(Role::Viewer, None);
        assert!(authorize(&p, &Capability::from_static("plants:read")).is_ok());
        assert_eq!(
            authorize(&p, &Capability::from_static("plants:create")),
            Err(AuthzError::PermissionDenied("plants:create".into()))
        );
    }

    #[test]
    fn api_keys_get_scope_insufficient() {
        let p = key(&["plants:read"]);
        assert!(authorize(&p, &Capability::from_static("plants:read")).is_ok());
        for denied in ["plants:create", "plants:update", "plants:delete"] {
            assert_eq!(
                authorize(&p, &Capability::from_static(denied)),
                Err(AuthzError::ScopeInsufficient(denied.into()))
            );
        }
    }

    #[test]
    fn resource_wildcard_scope() {
        let p = key(&["maintenance:*"]);
        assert!(authorize(&p, &Capability::from_static("maintenance:read")).is_ok());
        assert_eq!(
            authorize(&p, &Capability::from_static("users:delete")),
            Err(AuthzError::ScopeInsufficient("users:delete".into()))
        );
    }

    #[test]
    fn plant_restriction() {
        let home = PlantId::new();
        let other = PlantId::new();

        let op = user(Role::Operator, Some(home));
        assert!(authorize_plant(&op, home).is_ok());
        assert!(authorize_plant(&op, other).is_err());
        assert_eq!(plant_scope(&op), Some(home));

        let admin = user(Role::Admin, Some(home));
        assert!(authorize_plant(&admin, other).is_ok());
        assert_eq!(plant_scope(&admin), None);

        let unassigned = user(Role::Operator, None);
        assert!(authorize_plant(&unassigned, other).is_ok());

        assert!(authorize_plant(&key(&["plants:read"]), other).is_ok());
    }

    #[test]
    fn explanation_agrees_with_decision() {
        let p = user(Role::Supervisor, None);
        let ok = explain_authorization(&p, &Capability::from_static("maintenance:delete"));
        assert!(ok.granted);
        assert_eq!(ok.matched_by.as_deref(), Some("maintenance:*"));

        let denied = explain_authorization(&p, &Capability::from_static("users:delete"));
        assert!(!denied.granted);
        assert_eq!(denied.denial_reason.unwrap().kind, DenialKind::MissingPermission);
    }

    #[test]
    fn role_catalogue_lists_every_role() {
        let defs = role_definitions();
        assert_eq!(defs.len(), Role::ALL.len());
        assert_eq!(defs[0].capabilities, vec!["*"]);
    }

    fn any_role() -> impl Strategy<Value = Role> {
        prop::sample::select(Role::ALL.to_vec())
    }

    fn any_capability() -> impl Strategy<Value = Capability> {
        ("[a-z_]{1,12}", prop_oneof!["[a-z_]{1,10}", Just("*".to_string())])
            .prop_map(|(r, a)| Capability::parse(format!("{r}:{a}")).unwrap())
    }

    proptest! {
        #[test]
        fn decision_depends_only_on_role_and_capability(
            role in any_role(),
            cap in any_capability(),
        ) {
            let a = user(role, Some(PlantId::new()));
            let b = user(role, None);
            prop_assert_eq!(has_permission(&a, &cap), has_permission(&b, &cap));
            prop_assert_eq!(has_permission(&a, &cap), has_permission(&a, &cap));
            prop_assert_eq!(has_permission(&a, &cap), explain_authorization(&a, &cap).granted);
        }

        #[test]
        fn owner_always_allowed(cap in any_capability()) {
            prop_assert!(has_permission(&user(Role::Owner, None), &cap));
        }

        #[test]
        fn key_scopes_match_like_roles(role in any_role(), cap in any_capability()) {
            let scoped = key(role.capabilities());
            prop_assert_eq!(has_permission(&scoped, &cap), has_permission(&user(role, None), &cap));
        }
    }
}
