//! Request and response bodies for the HTTP entry points

use std::convert::Infallible;

use axum::extract::{FromRequest, Multipart, Request};
use axum::http::{header, StatusCode};
use axum::{Form, Json};
use serde::{Deserialize, Serialize};

use csrfbank_core::{PartySnapshot, TransferError, TransferReceipt};

/// Header carrying the anti-forgery token on the protected entry point.
/// Lowercase so it can be used as a static `HeaderName`.
pub const CSRF_HEADER: &str = "x-csrf-token";

/// Form body of both transfer entry points. Missing fields read as empty.
///
/// Accepted as `application/x-www-form-urlencoded` or `multipart/form-data`.
/// The extractor never rejects: a body it cannot read yields an empty form,
/// which the transfer path reports as an invalid amount after the token gate
/// has run.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TransferForm {
    #[serde(default)]
    pub to: String,
    #[serde(default)]
    pub amount: String,
}

impl<S> FromRequest<S> for TransferForm
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let is_multipart = req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("multipart/form-data"));

        let parsed = if is_multipart {
            read_multipart(req, state).await
        } else {
            Form::<TransferForm>::from_request(req, state)
                .await
                .map(|Form(form)| form)
                .map_err(|e| e.to_string())
        };

        Ok(parsed.unwrap_or_else(|reason| {
            tracing::debug!("Unreadable transfer body: {}", reason);
            TransferForm::default()
        }))
    }
}

async fn read_multipart<S>(req: Request, state: &S) -> Result<TransferForm, String>
where
    S: Send + Sync,
{
    let mut multipart = Multipart::from_request(req, state)
        .await
        .map_err(|e| e.to_string())?;

    let mut form = TransferForm::default();
    while let Some(field) = multipart.next_field().await.map_err(|e| e.to_string())? {
        let name = field.name().map(str::to_owned);
        match name.as_deref() {
            Some("to") => form.to = field.text().await.map_err(|e| e.to_string())?,
            Some("amount") => form.amount = field.text().await.map_err(|e| e.to_string())?,
            _ => {}
        }
    }
    Ok(form)
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TransferResponse {
    pub message: String,
    pub from: PartySnapshot,
    pub to: PartySnapshot,
    pub amount: i64,
}

impl From<TransferReceipt> for TransferResponse {
    fn from(receipt: TransferReceipt) -> Self {
        Self {
            message: receipt.channel.success_message().to_string(),
            from: receipt.from,
            to: receipt.to,
            amount: receipt.amount,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TokenResponse {
    pub username: String,
    pub token: String,
}

pub type ApiError = (StatusCode, Json<ErrorResponse>);

pub type ApiResult<T> = Result<(StatusCode, Json<T>), ApiError>;

pub fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

/// HTTP status for each transfer outcome
pub fn status_for(err: &TransferError) -> StatusCode {
    match err {
        TransferError::InvalidAmount(_)
        | TransferError::InvalidSender
        | TransferError::InvalidRecipient
        | TransferError::InsufficientBalance => StatusCode::BAD_REQUEST,
        TransferError::AuthorizationRejected => StatusCode::FORBIDDEN,
        TransferError::CommitFailure(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<TransferError> for ErrorResponse {
    fn from(err: TransferError) -> Self {
        Self {
            error: err.to_string(),
        }
    }
}
