//! `aquaops-auth`: pure authentication/authorization boundary (zero-trust).
//!
//! This crate is intentionally decoupled from HTTP and storage. It owns the
//! credential codec (Argon2id hashing, signed session tokens), the closed role
//! model, capability matching and the permission engine shared by session and
//! API-key callers.

pub mod api_key;
pub mod authorize;
pub mod claims;
pub mod codec;
pub mod permissions;
pub mod principal;
pub mod roles;
pub mod user;

pub use api_key::{ApiKey, ApiKeyError, ApiKeyStatus, GeneratedApiKey, NewApiKey, API_KEY_PREFIX};
pub use authorize::{
    AuthorizationExplanation, AuthzError, RoleDefinition, authorize, authorize_plant, explain_authorization,
    has_permission, plant_scope, role_definitions,
};
pub use claims::{SessionClaims, TokenKind, TokenValidationError, validate_claims};
pub use codec::{CodecError, SecretHasher, SessionSubject, TokenCodec, TokenError};
pub use permissions::{Capability, CapabilityError};
pub use principal::{Actor, Principal};
pub use roles::Role;
pub use user::{NewUser, User, UserStatus, transfer_ownership};
