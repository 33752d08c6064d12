//! Error taxonomy and the single boundary that turns errors into HTTP responses.

use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection},
        Request,
    },
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::{error, warn};

use crate::auth::repo::StoreError;
use crate::mail::MailError;

const GENERIC_MESSAGE: &str = "Something went wrong, please try again later.";

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{}", .0.join(". "))]
    Validation(Vec<String>),
    #[error("Duplicate field value: {0}, please use another value")]
    Conflict(String),
    #[error("{0}")]
    Authentication(&'static str),
    #[error("{0}")]
    Unauthorized(&'static str),
    #[error("You do not have permission to perform this action")]
    Forbidden,
    #[error("{0}")]
    NotFound(&'static str),
    #[error("Token is invalid or has expired")]
    ResetTokenInvalid,
    #[error("There was an error sending the email. Try again later!")]
    EmailDelivery(#[source] MailError),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn validation(msg: impl Into<String>) -> Self {
        AppError::Validation(vec![msg.into()])
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) | AppError::ResetTokenInvalid => StatusCode::BAD_REQUEST,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Authentication(_) | AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::EmailDelivery(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Expected failures whose message is safe to show the client.
    pub fn is_operational(&self) -> bool {
        !matches!(self, AppError::Internal(_))
    }
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Duplicate(value) => AppError::Conflict(value),
            other => AppError::Internal(other.into()),
        }
    }
}

impl From<MailError> for AppError {
    fn from(e: MailError) -> Self {
        AppError::EmailDelivery(e)
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::validation(rejection.body_text())
    }
}

impl From<PathRejection> for AppError {
    fn from(rejection: PathRejection) -> Self {
        AppError::validation(rejection.body_text())
    }
}

/// Full error chain, carried on the response for the development-mode layer.
#[derive(Debug, Clone)]
pub struct ErrorDetail(pub String);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = if self.is_operational() {
            self.to_string()
        } else {
            GENERIC_MESSAGE.to_string()
        };
        match &self {
            AppError::Internal(e) => error!(error = ?e, "internal error"),
            AppError::EmailDelivery(e) => error!(error = %e, "email delivery failed"),
            other => warn!(%status, error = %other, "request rejected"),
        }
        let detail = format!("{:#}", anyhow::Error::from(self));
        let mut res = (status, Json(json!({
            "status": status_label(status),
            "message": message,
        })))
            .into_response();
        res.extensions_mut().insert(ErrorDetail(detail));
        res
    }
}

fn status_label(status: StatusCode) -> &'static str {
    if status.is_client_error() {
        "fail"
    } else {
        "error"
    }
}

/// Development-only layer that exposes the full error chain in the body.
pub async fn expose_error_detail(req: Request, next: Next) -> Response {
    let res = next.run(req).await;
    let Some(ErrorDetail(detail)) = res.extensions().get::<ErrorDetail>().cloned() else {
        return res;
    };
    let status = res.status();
    let message = if status.is_server_error() {
        GENERIC_MESSAGE.to_string()
    } else {
        detail.clone()
    };
    (status, Json(json!({
        "status": status_label(status),
        "message": message,
        "detail": detail,
    })))
        .into_response()
}
