//! Principal extraction middleware

use crate::auth::Principal;
use crate::error::AppError;
use axum::{extract::Request, middleware::Next, response::Response};

pub const PRINCIPAL_HEADER: &str = "x-principal";

/// Put the caller's principal into request extensions for handlers to use
pub async fn principal_middleware(mut request: Request, next: Next) -> Result<Response, AppError> {
    let raw = request
        .headers()
        .get(PRINCIPAL_HEADER)
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| AppError::Unauthenticated("Missing X-Principal header".to_string()))?;

    let principal =
        Principal::parse(raw).map_err(|e| AppError::Unauthenticated(e.to_string()))?;

    request.extensions_mut().insert(principal);

    Ok(next.run(request).await)
}
