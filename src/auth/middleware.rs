//! Access-control gates, applied as route layers in order:
//! `require_authenticated` then `require_role`. `populate_if_authenticated` is
//! the non-failing variant for pages that only branch on identity.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use tracing::{debug, warn};

use super::cookies::bearer_token;
use super::repo_types::RoleSet;
use super::services::CurrentUser;
use crate::errors::AppError;
use crate::state::AppState;

pub async fn require_authenticated(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = bearer_token(req.headers(), &state.config.cookie.name).ok_or(
        AppError::Unauthorized("You are not logged in! Please log in to get access."),
    )?;
    let current = state.auth.authenticate(&token).await?;
    debug!(user_id = %current.id(), "request authenticated");
    req.extensions_mut().insert(current);
    Ok(next.run(req).await)
}

pub async fn require_role(
    State(allowed): State<RoleSet>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let current = req.extensions().get::<CurrentUser>().ok_or(AppError::Unauthorized(
        "You are not logged in! Please log in to get access.",
    ))?;
    if !allowed.contains(current.role()) {
        warn!(user_id = %current.id(), role = %current.role(), "role not permitted");
        return Err(AppError::Forbidden);
    }
    Ok(next.run(req).await)
}

pub async fn populate_if_authenticated(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Response {
    if let Some(token) = bearer_token(req.headers(), &state.config.cookie.name) {
        match state.auth.authenticate(&token).await {
            Ok(current) => {
                req.extensions_mut().insert(current);
            }
            Err(e) => debug!(error = %e, "ignoring unusable token"),
        }
    }
    next.run(req).await
}
