//! Error responses: `{"error": <stable code>, "message": <text>}`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use aquaops_auth::{ApiKeyError, AuthzError, CodecError};
use aquaops_core::DomainError;
use aquaops_infra::{IdentityError, RateLimited, StoreError, SubscriptionManagerError, TenantError};

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("authentication required")]
    Unauthenticated,

    #[error("organization is not active")]
    TenantInactive,

    #[error("{0}")]
    PermissionDenied(String),

    #[error("{0}")]
    ScopeInsufficient(String),

    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    #[error("not found")]
    NotFound,

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    RateLimited(String),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn validation(msg: impl Into<String>) -> Self {
        ApiError::Validation(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        ApiError::Internal(msg.into())
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Unauthenticated => "unauthenticated",
            ApiError::TenantInactive => "tenant_inactive",
            ApiError::PermissionDenied(_) => "permission_denied",
            ApiError::ScopeInsufficient(_) => "scope_insufficient",
            ApiError::InvalidSignature(_) => "invalid_signature",
            ApiError::NotFound => "not_found",
            ApiError::Validation(_) => "validation_error",
            ApiError::Conflict(_) => "conflict",
            ApiError::RateLimited(_) => "rate_limited",
            ApiError::Internal(_) => "internal_error",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthenticated => StatusCode::UNAUTHORIZED,
            ApiError::TenantInactive | ApiError::PermissionDenied(_) | ApiError::ScopeInsufficient(_) => {
                StatusCode::FORBIDDEN
            }
            ApiError::InvalidSignature(_) | ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let message = match &self {
            ApiError::Internal(detail) => {
                tracing::error!(error = %detail, "request failed");
                "internal error".to_string()
            }
            other => other.to_string(),
        };
        json_error(self.status(), self.code(), message)
    }
}

pub fn json_error(status: StatusCode, code: &'static str, message: impl Into<String>) -> Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

// ─────────────────────────────────────────────────────────────────────────────
// Conversions
// ─────────────────────────────────────────────────────────────────────────────

impl From<DomainError> for ApiError {
    fn from(e: DomainError) -> Self {
        match e {
            DomainError::Validation(msg) => ApiError::Validation(msg),
            DomainError::InvalidId(msg) => ApiError::Validation(format!("invalid identifier: {msg}")),
            DomainError::NotFound => ApiError::NotFound,
            DomainError::Forbidden(msg) => ApiError::PermissionDenied(msg),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound => ApiError::NotFound,
            StoreError::Conflict(msg) => ApiError::Conflict(msg),
            StoreError::Backend(msg) => ApiError::Internal(msg),
        }
    }
}

impl From<AuthzError> for ApiError {
    fn from(e: AuthzError) -> Self {
        let message = e.to_string();
        match e {
            AuthzError::PermissionDenied(_) => ApiError::PermissionDenied(message),
            AuthzError::ScopeInsufficient(_) => ApiError::ScopeInsufficient(message),
        }
    }
}

impl From<IdentityError> for ApiError {
    fn from(e: IdentityError) -> Self {
        match e {
            IdentityError::Unauthenticated => ApiError::Unauthenticated,
            IdentityError::TenantInactive => ApiError::TenantInactive,
            IdentityError::Backend(msg) => ApiError::Internal(msg),
        }
    }
}

impl From<TenantError> for ApiError {
    fn from(e: TenantError) -> Self {
        match e {
            TenantError::Unauthenticated => ApiError::Unauthenticated,
            TenantError::TenantInactive => ApiError::TenantInactive,
            TenantError::Store(e) => e.into(),
        }
    }
}

impl From<RateLimited> for ApiError {
    fn from(e: RateLimited) -> Self {
        ApiError::RateLimited(e.to_string())
    }
}

impl From<CodecError> for ApiError {
    fn from(e: CodecError) -> Self {
        ApiError::Internal(e.to_string())
    }
}

impl From<ApiKeyError> for ApiError {
    fn from(e: ApiKeyError) -> Self {
        match e {
            ApiKeyError::Domain(e) => e.into(),
            ApiKeyError::Codec(e) => e.into(),
        }
    }
}

impl From<SubscriptionManagerError> for ApiError {
    fn from(e: SubscriptionManagerError) -> Self {
        match e {
            SubscriptionManagerError::InvalidSignature(reason) => ApiError::InvalidSignature(reason.to_string()),
            SubscriptionManagerError::Malformed(msg) => ApiError::Validation(msg),
            SubscriptionManagerError::NotFound => ApiError::NotFound,
            SubscriptionManagerError::Rejected(e) => ApiError::Conflict(e.to_string()),
            SubscriptionManagerError::Store(e) => e.into(),
        }
    }
}
