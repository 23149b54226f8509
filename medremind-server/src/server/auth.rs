use axum::http::{Request, header};
use axum::middleware::Next;
use axum::response::Response;

use super::{AppError, AppState};

/// Guards the cron trigger: the caller must present `Authorization: Bearer
/// <cron_secret>`. Rejections happen before the handler runs, so an
/// unauthorized call has no side effects.
pub async fn require_cron_secret(
    axum::extract::State(state): axum::extract::State<AppState>,
    req: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, AppError> {
    let unauthorized = || Err(AppError::unauthorized());
    let header_val = match req.headers().get(header::AUTHORIZATION) {
        Some(v) => v,
        None => {
            tracing::warn!("cron: missing authorization header");
            return unauthorized();
        }
    };
    let header_str = header_val.to_str().map_err(|_| AppError::unauthorized())?;
    let Some(token) = bearer_token(header_str) else {
        return unauthorized();
    };
    let expected = state.config.cron_secret.as_bytes();
    if expected.is_empty() || !constant_time_eq(token.as_bytes(), expected) {
        tracing::warn!("cron: secret mismatch");
        return unauthorized();
    }
    Ok(next.run(req).await)
}

fn bearer_token(header: &str) -> Option<&str> {
    let prefix = "Bearer ";
    header.strip_prefix(prefix).map(str::trim).filter(|t| !t.is_empty())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
