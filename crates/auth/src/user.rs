//! Organization members and the owner/role-change policy.
//!
//! Exactly one owner per organization is kept procedurally: the owner cannot
//! be deleted or demoted, and nobody becomes owner except through a transfer
//! performed by the current owner.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use aquaops_core::{DomainError, OrganizationId, PlantId, UserId};

use crate::Role;

// ─────────────────────────────────────────────────────────────────────────────
// User Status
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum UserStatus {
    /// Can authenticate.
    #[default]
    Active,
    /// Created by an admin, has not set a password yet.
    Invited,
    Suspended,
}

impl UserStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserStatus::Active => "active",
            UserStatus::Invited => "invited",
            UserStatus::Suspended => "suspended",
        }
    }
}

impl core::fmt::Display for UserStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for UserStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(UserStatus::Active),
            "invited" => Ok(UserStatus::Invited),
            "suspended" => Ok(UserStatus::Suspended),
            other => Err(DomainError::validation(format!("unknown user status '{other}'"))),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// User
// ─────────────────────────────────────────────────────────────────────────────

/// A member of one organization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub organization_id: OrganizationId,
    pub email: String,
    pub name: String,
    pub role: Role,
    pub plant_id: Option<PlantId>,
    pub status: UserStatus,
    #[serde(skip)]
    pub password_hash: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for [`User::new_member`].
#[derive(Debug, Clone)]
pub struct NewUser {
    pub organization_id: OrganizationId,
    pub email: String,
    pub name: String,
    pub role: Role,
    pub plant_id: Option<PlantId>,
    /// Already hashed; `None` leaves the user invited.
    pub password_hash: Option<String>,
}

impl User {
    /// The founding owner created at registration.
    pub fn founding_owner(
        organization_id: OrganizationId,
        email: &str,
        name: &str,
        password_hash: String,
        now: DateTime<Utc>,
    ) -> Result<Self, DomainError> {
        Self::build(
            NewUser {
                organization_id,
                email: email.to_string(),
                name: name.to_string(),
                role: Role::Owner,
                plant_id: None,
                password_hash: Some(password_hash),
            },
            now,
        )
    }

    /// A member added by an existing user acting as `actor_role`.
    pub fn new_member(input: NewUser, actor_role: Role, now: DateTime<Utc>) -> Result<Self, DomainError> {
        if input.role == Role::Owner {
            return Err(DomainError::forbidden("owner role is only granted by ownership transfer"));
        }
        ensure_can_grant(actor_role, input.role)?;
        Self::build(input, now)
    }

    fn build(input: NewUser, now: DateTime<Utc>) -> Result<Self, DomainError> {
        let email = normalize_email(&input.email)?;
        let name = input.name.trim();
        if name.is_empty() || name.len() > 200 {
            return Err(DomainError::validation("name must be 1-200 characters"));
        }
        let status = if input.password_hash.is_some() {
            UserStatus::Active
        } else {
            UserStatus::Invited
        };
        Ok(Self {
            id: UserId::new(),
            organization_id: input.organization_id,
            email,
            name: name.to_string(),
            role: input.role,
            plant_id: input.plant_id,
            status,
            password_hash: input.password_hash,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn is_active(&self) -> bool {
        self.status == UserStatus::Active
    }

    pub fn is_owner(&self) -> bool {
        self.role == Role::Owner
    }

    /// Change this user's role on behalf of `actor`.
    pub fn change_role(&mut self, actor: &User, role: Role, now: DateTime<Utc>) -> Result<(), DomainError> {
        ensure_same_organization(actor, self)?;
        if self.is_owner() {
            return Err(DomainError::forbidden("the owner cannot be demoted; transfer ownership instead"));
        }
        if role == Role::Owner {
            return Err(DomainError::forbidden("owner role is only granted by ownership transfer"));
        }
        if actor.id == self.id {
            return Err(DomainError::forbidden("users cannot change their own role"));
        }
        ensure_can_grant(actor.role, role)?;
        ensure_can_grant(actor.role, self.role)?;
        self.role = role;
        self.updated_at = now;
        Ok(())
    }

    /// Check that `actor` may delete this user.
    pub fn ensure_deletable_by(&self, actor: &User) -> Result<(), DomainError> {
        ensure_same_organization(actor, self)?;
        if self.is_owner() {
            return Err(DomainError::forbidden("the owner cannot be deleted"));
        }
        if actor.id == self.id {
            return Err(DomainError::forbidden("users cannot delete themselves"));
        }
        ensure_can_grant(actor.role, self.role)
    }
}

/// Hand ownership from `current_owner` to `new_owner`; the previous owner
/// becomes admin.
pub fn transfer_ownership(
    current_owner: &mut User,
    new_owner: &mut User,
    now: DateTime<Utc>,
) -> Result<(), DomainError> {
    ensure_same_organization(current_owner, new_owner)?;
    if !current_owner.is_owner() {
        return Err(DomainError::forbidden("only the owner can transfer ownership"));
    }
    if current_owner.id == new_owner.id {
        return Err(DomainError::validation("user already owns the organization"));
    }
    if !new_owner.is_active() {
        return Err(DomainError::validation("ownership can only go to an active user"));
    }
    current_owner.role = Role::Admin;
    current_owner.updated_at = now;
    new_owner.role = Role::Owner;
    new_owner.plant_id = None;
    new_owner.updated_at = now;
    Ok(())
}

/// No privilege escalation: an actor may only hand out roles at or below
/// their own rank, and only owners and admins manage users at all.
pub fn ensure_can_grant(actor_role: Role, target_role: Role) -> Result<(), DomainError> {
    if !matches!(actor_role, Role::Owner | Role::Admin) {
        return Err(DomainError::forbidden(format!("role '{actor_role}' cannot manage users")));
    }
    if target_role.rank() > actor_role.rank() {
        return Err(DomainError::forbidden(format!(
            "role '{actor_role}' cannot grant '{target_role}'"
        )));
    }
    Ok(())
}

pub fn normalize_email(email: &str) -> Result<String, DomainError> {
    let email = email.trim().to_lowercase();
    let valid = email.len() <= 254
        && email
            .split_once('@')
            .is_some_and(|(local, domain)| !local.is_empty() && domain.contains('.') && !domain.starts_with('.'));
    if valid {
        Ok(email)
    } else {
        Err(DomainError::validation("invalid email format"))
    }
}

fn ensure_same_organization(a: &User, b: &User) -> Result<(), DomainError> {
    if a.organization_id != b.organization_id {
        return Err(DomainError::NotFound);
    }
    Ok(())
}
