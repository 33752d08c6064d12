use axum::{
    extract::State,
    http::{header::SET_COOKIE, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use cookie::Cookie;
use tracing::instrument;
use uuid::Uuid;

use super::{
    cookies::{cleared_cookie, token_cookie},
    dto::{
        AdminUpdateRequest, AuthResponse, ForgotPasswordRequest, LoginRequest, MessageResponse,
        PublicUser, ResetPasswordRequest, SignupRequest, UpdateMeRequest, UpdatePasswordRequest,
        UserData, UserResponse, UsersData, UsersResponse,
    },
    extractors::{AppJson, AppPath, AuthUser, MaybeUser},
    repo_types::User,
    services::Session,
};
use crate::{errors::AppError, state::AppState};

fn set_cookie(cookie: Cookie<'_>) -> Result<[(axum::http::HeaderName, HeaderValue); 1], AppError> {
    let value = HeaderValue::from_str(&cookie.to_string()).map_err(anyhow::Error::from)?;
    Ok([(SET_COOKIE, value)])
}

fn session_response(
    state: &AppState,
    status: StatusCode,
    session: Session,
) -> Result<Response, AppError> {
    let cookie = token_cookie(&state.config.cookie, &session.token, state.auth.token_ttl());
    let body = AuthResponse {
        status: "success",
        token: session.token,
        data: UserData {
            user: Some(PublicUser::from(&session.user)),
        },
    };
    Ok((status, set_cookie(cookie)?, Json(body)).into_response())
}

fn user_response(user: &User) -> Json<UserResponse> {
    Json(UserResponse {
        status: "success",
        data: UserData {
            user: Some(PublicUser::from(user)),
        },
    })
}

#[instrument(skip(state, payload))]
pub async fn signup(
    State(state): State<AppState>,
    AppJson(payload): AppJson<SignupRequest>,
) -> Result<Response, AppError> {
    let session = state.auth.signup(payload).await?;
    session_response(&state, StatusCode::CREATED, session)
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    AppJson(payload): AppJson<LoginRequest>,
) -> Result<Response, AppError> {
    let session = state.auth.login(payload).await?;
    session_response(&state, StatusCode::OK, session)
}

#[instrument(skip(state))]
pub async fn logout(State(state): State<AppState>) -> Result<Response, AppError> {
    let cookie = cleared_cookie(&state.config.cookie);
    Ok((
        set_cookie(cookie)?,
        Json(MessageResponse {
            status: "success",
            message: "Logged out",
        }),
    )
        .into_response())
}

#[instrument(skip(state, payload))]
pub async fn forgot_password(
    State(state): State<AppState>,
    AppJson(payload): AppJson<ForgotPasswordRequest>,
) -> Result<Json<MessageResponse>, AppError> {
    state
        .auth
        .request_password_reset(payload.email.as_deref())
        .await?;
    Ok(Json(MessageResponse {
        status: "success",
        message: "Token sent to email!",
    }))
}

#[instrument(skip_all)]
pub async fn reset_password(
    State(state): State<AppState>,
    AppPath(token): AppPath<String>,
    AppJson(payload): AppJson<ResetPasswordRequest>,
) -> Result<Response, AppError> {
    let session = state
        .auth
        .reset_password(
            &token,
            payload.password.as_deref(),
            payload.password_confirm.as_deref(),
        )
        .await?;
    session_response(&state, StatusCode::OK, session)
}

#[instrument(skip_all, fields(user_id = %current.id()))]
pub async fn update_password(
    State(state): State<AppState>,
    AuthUser(current): AuthUser,
    AppJson(payload): AppJson<UpdatePasswordRequest>,
) -> Result<Response, AppError> {
    let session = state.auth.update_password(&current, payload).await?;
    session_response(&state, StatusCode::OK, session)
}

#[instrument(skip_all, fields(user_id = %current.id()))]
pub async fn get_me(AuthUser(current): AuthUser) -> Json<UserResponse> {
    user_response(&current.user)
}

#[instrument(skip_all, fields(user_id = %current.id()))]
pub async fn update_me(
    State(state): State<AppState>,
    AuthUser(current): AuthUser,
    AppJson(payload): AppJson<UpdateMeRequest>,
) -> Result<Json<UserResponse>, AppError> {
    let user = state.auth.update_me(&current, payload).await?;
    Ok(user_response(&user))
}

#[instrument(skip_all, fields(user_id = %current.id()))]
pub async fn delete_me(
    State(state): State<AppState>,
    AuthUser(current): AuthUser,
) -> Result<StatusCode, AppError> {
    state.auth.deactivate(current.id()).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Reports who is logged in without ever rejecting the request.
#[instrument(skip_all)]
pub async fn session(MaybeUser(current): MaybeUser) -> Json<UserResponse> {
    Json(UserResponse {
        status: "success",
        data: UserData {
            user: current.map(|c| PublicUser::from(&c.user)),
        },
    })
}

#[instrument(skip(state))]
pub async fn list_users(State(state): State<AppState>) -> Result<Json<UsersResponse>, AppError> {
    let users: Vec<PublicUser> = state
        .auth
        .list_users()
        .await?
        .iter()
        .map(PublicUser::from)
        .collect();
    Ok(Json(UsersResponse {
        status: "success",
        results: users.len(),
        data: UsersData { users },
    }))
}

#[instrument(skip(state))]
pub async fn get_user(
    State(state): State<AppState>,
    AppPath(id): AppPath<Uuid>,
) -> Result<Json<UserResponse>, AppError> {
    let user = state.auth.get_user(id).await?;
    Ok(user_response(&user))
}

#[instrument(skip(state, payload))]
pub async fn update_user(
    State(state): State<AppState>,
    AppPath(id): AppPath<Uuid>,
    AppJson(payload): AppJson<AdminUpdateRequest>,
) -> Result<Json<UserResponse>, AppError> {
    let user = state.auth.admin_update(id, payload).await?;
    Ok(user_response(&user))
}

#[instrument(skip(state))]
pub async fn deactivate_user(
    State(state): State<AppState>,
    AppPath(id): AppPath<Uuid>,
) -> Result<StatusCode, AppError> {
    state.auth.deactivate(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
