//! HTTP error mapping.
//!
//! | Variant | Status | `code` |
//! |---------|--------|--------|
//! | `Rejected` | 400 (401 for `invalid_credentials`) | reason code |
//! | `BadRequest` | 400 | `bad_request` |
//! | `Unauthorized` | 401 | `unauthorized` |
//! | `AccountNotFound` | 404 | `account_not_found` |
//! | `Ledger` | 500 | `storage_error` |
//! | `Unavailable` | 503 | `unavailable` |

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use readearn_ledger::{LedgerError, Outcome, RejectReason};
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Rejected(RejectReason),

    #[error("{0}")]
    BadRequest(String),

    #[error("missing or invalid credentials")]
    Unauthorized,

    #[error("account not found")]
    AccountNotFound,

    #[error("ledger failure: {0}")]
    Ledger(LedgerError),

    #[error("{0}")]
    Unavailable(String),
}

impl From<LedgerError> for ApiError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::AccountNotFound(_) => ApiError::AccountNotFound,
            other => ApiError::Ledger(other),
        }
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Rejected(RejectReason::InvalidCredentials) => StatusCode::UNAUTHORIZED,
            ApiError::Rejected(_) | ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::AccountNotFound => StatusCode::NOT_FOUND,
            ApiError::Ledger(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Rejected(reason) => reason.code(),
            ApiError::BadRequest(_) => "bad_request",
            ApiError::Unauthorized => "unauthorized",
            ApiError::AccountNotFound => "account_not_found",
            ApiError::Ledger(_) => "storage_error",
            ApiError::Unavailable(_) => "unavailable",
        }
    }
}

/// `{applied:false, code, message, retryAfterSecs?}`.
pub fn rejection_body(reason: &RejectReason) -> Value {
    let mut body = json!({
        "applied": false,
        "code": reason.code(),
        "message": reason.to_string(),
    });
    if let Some(secs) = reason.retry_after_secs() {
        body["retryAfterSecs"] = json!(secs);
    }
    body
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            ApiError::Rejected(reason) => rejection_body(reason),
            ApiError::Ledger(e) => {
                error!(error = %e, "request failed on ledger error");
                json!({ "applied": false, "code": self.code(), "message": "storage unavailable, nothing was applied" })
            }
            other => json!({ "applied": false, "code": other.code(), "message": other.to_string() }),
        };
        (status, Json(body)).into_response()
    }
}

/// Success envelope: the result's fields plus `"applied": true`.
#[derive(Debug, Serialize)]
pub struct Applied<T> {
    pub applied: bool,
    #[serde(flatten)]
    pub result: T,
}

impl<T> Applied<T> {
    pub fn new(result: T) -> Self {
        Self {
            applied: true,
            result,
        }
    }
}

/// Applied outcomes become `200`, rejections become [`ApiError::Rejected`].
pub fn respond<T: Serialize>(outcome: Outcome<T>) -> Result<Json<Applied<T>>, ApiError> {
    match outcome {
        Outcome::Applied(result) => Ok(Json(Applied::new(result))),
        Outcome::Rejected(reason) => Err(ApiError::Rejected(reason)),
    }
}

/// Inline JSON for an outcome nested inside a larger response.
pub fn outcome_value<T: Serialize>(outcome: &Outcome<T>) -> Value {
    match outcome {
        Outcome::Applied(result) => {
            let mut body = serde_json::to_value(result).unwrap_or(Value::Null);
            match body.as_object_mut() {
                Some(map) => {
                    map.insert("applied".into(), Value::Bool(true));
                    body
                }
                None => json!({ "applied": true, "result": body }),
            }
        }
        Outcome::Rejected(reason) => rejection_body(reason),
    }
}
