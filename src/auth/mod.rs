use axum::{
    middleware::from_fn_with_state,
    routing::{delete, get, patch, post},
    Router,
};

use crate::state::AppState;
use self::repo_types::{Role, RoleSet};

pub mod claims;
mod cookies;
pub mod dto;
pub mod extractors;
pub mod handlers;
pub mod jwt;
pub mod memory;
pub mod middleware;
pub mod password;
pub mod repo;
pub mod repo_types;
pub mod reset;
pub mod services;
mod validate;

/// `/users` routes. Public first, then the authenticated block, then admin-only.
pub fn router(state: AppState) -> Router<AppState> {
    let public = Router::new()
        .route("/signup", post(handlers::signup))
        .route("/login", post(handlers::login))
        .route("/logout", get(handlers::logout))
        .route("/forgotPassword", post(handlers::forgot_password))
        .route("/resetPassword/:token", patch(handlers::reset_password));

    let soft = Router::new()
        .route("/session", get(handlers::session))
        .route_layer(from_fn_with_state(
            state.clone(),
            middleware::populate_if_authenticated,
        ));

    let protected = Router::new()
        .route("/updateMyPassword", patch(handlers::update_password))
        .route("/me", get(handlers::get_me))
        .route("/updateMe", patch(handlers::update_me))
        .route("/deleteMe", delete(handlers::delete_me))
        .route_layer(from_fn_with_state(
            state.clone(),
            middleware::require_authenticated,
        ));

    // layers run bottom-up: authenticate, then check the role
    let admin = Router::new()
        .route("/", get(handlers::list_users))
        .route(
            "/:id",
            get(handlers::get_user)
                .patch(handlers::update_user)
                .delete(handlers::deactivate_user),
        )
        .route_layer(from_fn_with_state(
            RoleSet::of([Role::Admin]),
            middleware::require_role,
        ))
        .route_layer(from_fn_with_state(state, middleware::require_authenticated));

    Router::new().nest("/users", public.merge(soft).merge(protected).merge(admin))
}
