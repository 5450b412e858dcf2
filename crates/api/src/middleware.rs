use axum::{
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};
use tracing::debug;

use forgecrm_core::{EmailAddress, UserId};

use crate::app::errors::json_error;
use crate::context::SessionContext;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_EMAIL_HEADER: &str = "x-user-email";
pub const USER_NAME_HEADER: &str = "x-user-name";

/// Derive [`SessionContext`] from the forwarded identity headers.
pub async fn session_middleware(mut req: axum::http::Request<axum::body::Body>, next: Next) -> Response {
    let session = match session_from_headers(req.headers()) {
        Ok(session) => session,
        Err(message) => return json_error(StatusCode::UNAUTHORIZED, "unauthenticated", message),
    };
    req.extensions_mut().insert(session);
    next.run(req).await
}

fn session_from_headers(headers: &HeaderMap) -> Result<SessionContext, &'static str> {
    let raw_id = header(headers, USER_ID_HEADER).ok_or("missing session user")?;
    let user_id: UserId = raw_id.parse().map_err(|_| "invalid session user id")?;

    // A malformed address is treated as absent; test mode then falls back.
    let email = header(headers, USER_EMAIL_HEADER).and_then(|raw| match EmailAddress::parse(raw) {
        Ok(email) => Some(email),
        Err(e) => {
            debug!(error = %e, "ignoring session email");
            None
        }
    });
    let full_name = header(headers, USER_NAME_HEADER).map(str::to_string);

    Ok(SessionContext::new(user_id, email, full_name))
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn session_requires_a_valid_user_id() {
        let mut headers = HeaderMap::new();
        assert_eq!(session_from_headers(&headers), Err("missing session user"));

        headers.insert(USER_ID_HEADER, HeaderValue::from_static("not-a-uuid"));
        assert_eq!(session_from_headers(&headers), Err("invalid session user id"));
    }

    #[test]
    fn optional_identity_fields_are_carried() {
        let user_id = UserId::new();
        let mut headers = HeaderMap::new();
        headers.insert(USER_ID_HEADER, HeaderValue::from_str(&user_id.to_string()).unwrap());
        headers.insert(USER_EMAIL_HEADER, HeaderValue::from_static("grace@forge.test"));
        headers.insert(USER_NAME_HEADER, HeaderValue::from_static("Grace"));

        let session = session_from_headers(&headers).unwrap();
        assert_eq!(session.user_id(), user_id);
        assert_eq!(session.initiator().display_name(), "Grace");
        assert_eq!(session.email().map(|e| e.as_str()), Some("grace@forge.test"));
    }

    #[test]
    fn malformed_email_is_dropped() {
        let mut headers = HeaderMap::new();
        headers.insert(USER_ID_HEADER, HeaderValue::from_str(&UserId::new().to_string()).unwrap());
        headers.insert(USER_EMAIL_HEADER, HeaderValue::from_static("nope"));
        assert!(session_from_headers(&headers).unwrap().email().is_none());
    }
}
