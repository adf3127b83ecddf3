//! Bearer token middleware for protected routes.
//!
//! A missing or malformed `Authorization` header gets 400; a well-formed
//! token that fails verification gets 401. Neither response says why.

use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::instrument;

use crate::app_state::AppState;

const BEARER_PREFIX: &str = "Bearer";

/// Verify the caller's bearer token and attach the resulting
/// [`Identity`](crate::models::auth::Identity) to the request extensions.
#[instrument(skip_all, name = "middleware.auth")]
pub async fn require_bearer(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    let token = match req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(parse_bearer)
    {
        Some(token) => token.to_string(),
        None => {
            tracing::debug!("Missing or malformed Authorization header");
            return challenge(StatusCode::BAD_REQUEST, "invalid_request", "Bad Request");
        }
    };

    match state.verifier.verify(&token).await {
        Ok(identity) => {
            req.extensions_mut().insert(identity);
            next.run(req).await
        }
        Err(_) => challenge(StatusCode::UNAUTHORIZED, "invalid_token", "Unauthorized"),
    }
}

fn challenge(status: StatusCode, error: &str, body: &'static str) -> Response {
    (
        status,
        [(
            header::WWW_AUTHENTICATE,
            format!("{BEARER_PREFIX} error=\"{error}\""),
        )],
        body,
    )
        .into_response()
}

/// Extract the token from `Bearer <token>`.
///
/// Accepts one or more spaces after the scheme and trailing spaces. The
/// token must be a non-empty run of `A-Z a-z 0-9 . _ ~ + / -` optionally
/// followed by `=` padding.
pub fn parse_bearer(value: &str) -> Option<&str> {
    let rest = value.strip_prefix(BEARER_PREFIX)?;
    let token_start = rest.trim_start_matches(' ');
    if token_start.len() == rest.len() {
        return None;
    }
    let token = token_start.trim_end_matches(' ');

    let body_len = token
        .find(|c: char| !is_token_char(c))
        .unwrap_or(token.len());
    if body_len == 0 {
        return None;
    }
    let padding = token.get(body_len..)?;
    if !padding.chars().all(|c| c == '=') {
        return None;
    }

    Some(token)
}

fn is_token_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '~' | '+' | '/' | '-')
}
