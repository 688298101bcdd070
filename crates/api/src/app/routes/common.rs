use std::str::FromStr;

use chrono::Duration;

use crate::app::errors::ApiError;
use crate::middleware::SESSION_COOKIE;

/// Path ids that fail to parse cannot name anything in the tenant.
pub fn parse_id<T: FromStr>(raw: &str) -> Result<T, ApiError> {
    raw.parse().map_err(|_| ApiError::NotFound)
}

pub fn session_cookie(token: &str, ttl: Duration, secure: bool) -> String {
    let secure = if secure { "; Secure" } else { "" };
    format!(
        "{SESSION_COOKIE}={token}; HttpOnly; SameSite=Lax; Path=/; Max-Age={}{secure}",
        ttl.num_seconds()
    )
}

pub fn expired_session_cookie(secure: bool) -> String {
    session_cookie("", Duration::zero(), secure)
}

/// Argon2 work off the async executor.
pub async fn blocking<T, F>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ApiError::internal(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cookie_attributes() {
        let cookie = session_cookie("abc", Duration::hours(12), true);
        assert_eq!(cookie, "session=abc; HttpOnly; SameSite=Lax; Path=/; Max-Age=43200; Secure");
        assert!(expired_session_cookie(false).ends_with("Max-Age=0"));
    }

    #[test]
    fn unparsable_ids_are_not_found() {
        assert!(matches!(parse_id::<aquaops_core::UserId>("nope"), Err(ApiError::NotFound)));
    }
}
