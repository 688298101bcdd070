use serde::{Deserialize, Serialize};

use aquaops_core::{ApiKeyId, OrganizationId, PlantId, UserId};

use crate::{Capability, Role};

/// Who is acting: a human session or a machine API key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Actor {
    User {
        user_id: UserId,
        role: Role,
        /// Set when the session was minted by a super-admin impersonating the user.
        impersonator: Option<String>,
    },
    ApiKey {
        api_key_id: ApiKeyId,
        scopes: Vec<Capability>,
    },
}

/// A fully resolved caller for authorization decisions.
///
/// Construction is decoupled from storage and transport: the identity
/// resolver builds it, the permission engine only reads it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub organization_id: OrganizationId,
    pub actor: Actor,
    pub plant_id: Option<PlantId>,
}

impl Principal {
    pub fn user(organization_id: OrganizationId, user_id: UserId, role: Role, plant_id: Option<PlantId>) -> Self {
        Self {
            organization_id,
            actor: Actor::User {
                user_id,
                role,
                impersonator: None,
            },
            plant_id,
        }
    }

    pub fn api_key(organization_id: OrganizationId, api_key_id: ApiKeyId, scopes: Vec<Capability>) -> Self {
        Self {
            organization_id,
            actor: Actor::ApiKey { api_key_id, scopes },
            plant_id: None,
        }
    }

    pub fn with_impersonator(mut self, label: impl Into<String>) -> Self {
        if let Actor::User { impersonator, .. } = &mut self.actor {
            *impersonator = Some(label.into());
        }
        self
    }

    pub fn user_id(&self) -> Option<UserId> {
        match &self.actor {
            Actor::User { user_id, .. } => Some(*user_id),
            Actor::ApiKey { .. } => None,
        }
    }

    pub fn role(&self) -> Option<Role> {
        match &self.actor {
            Actor::User { role, .. } => Some(*role),
            Actor::ApiKey { .. } => None,
        }
    }

    pub fn is_api_key(&self) -> bool {
        matches!(self.actor, Actor::ApiKey { .. })
    }

    pub fn impersonator(&self) -> Option<&str> {
        match &self.actor {
            Actor::User { impersonator, .. } => impersonator.as_deref(),
            Actor::ApiKey { .. } => None,
        }
    }

    /// Stable audit label: `user:<id>` or `api_key:<id>`.
    pub fn label(&self) -> String {
        match &self.actor {
            Actor::User { user_id, .. } => format!("user:{user_id}"),
            Actor::ApiKey { api_key_id, .. } => format!("api_key:{api_key_id}"),
        }
    }

    /// Capability strings in effect for this caller, role table or key scopes.
    pub fn effective_capabilities(&self) -> Vec<String> {
        match &self.actor {
            Actor::User { role, .. } => role.capabilities().iter().map(|c| c.to_string()).collect(),
            Actor::ApiKey { scopes, .. } => scopes.iter().map(|c| c.as_str().to_string()).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_distinguish_actor_kinds() {
        let org = OrganizationId::new();
        let user = UserId::new();
        let key = ApiKeyId::new();

        assert_eq!(Principal::user(org, user, Role::Viewer, None).label(), format!("user:{user}"));
        assert_eq!(Principal::api_key(org, key, vec![]).label(), format!("api_key:{key}"));
    }

    #[test]
    fn impersonator_only_attaches_to_users() {
        let org = OrganizationId::new();
        let p = Principal::user(org, UserId::new(), Role::Admin, None).with_impersonator("super_admin");
        assert_eq!(p.impersonator(), Some("super_admin"));

        let k = Principal::api_key(org, ApiKeyId::new(), vec![]).with_impersonator("super_admin");
        assert_eq!(k.impersonator(), None);
    }
}
