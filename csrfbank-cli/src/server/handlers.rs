//! HTTP handlers
//!
//! Requests carry no session, so every handler acts as the configured
//! default identity. The store is synchronous; engine calls run on the
//! blocking pool.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::Json;

use csrfbank_core::services::StatusSummary;
use csrfbank_core::{BankContext, TransferError, TransferReceipt};

use super::state::AppState;
use super::types::{
    api_error, status_for, ApiError, ApiResult, ErrorResponse, TokenResponse, TransferForm,
    TransferResponse, CSRF_HEADER,
};

/// POST /transfer/unsafe
///
/// No token check: any page the user visits can submit this form.
pub async fn unsafe_transfer(
    State(state): State<Arc<AppState>>,
    form: TransferForm,
) -> ApiResult<TransferResponse> {
    run_transfer(&state, move |ctx| {
        ctx.unprotected_transfer(None, &form.to, &form.amount)
    })
    .await
}

/// POST /transfer/safe
///
/// Requires the token issued to the acting identity in the `X-CSRF-Token`
/// header.
pub async fn safe_transfer(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    form: TransferForm,
) -> ApiResult<TransferResponse> {
    let token = headers
        .get(CSRF_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);

    run_transfer(&state, move |ctx| {
        ctx.protected_transfer(None, token.as_deref(), &form.to, &form.amount)
    })
    .await
}

/// GET /csrf-token
pub async fn csrf_token(State(state): State<Arc<AppState>>) -> Json<TokenResponse> {
    let (username, token) = state.ctx.issue_token(None);
    Json(TokenResponse { username, token })
}

/// GET /status
pub async fn status(State(state): State<Arc<AppState>>) -> ApiResult<StatusSummary> {
    let ctx = Arc::clone(&state.ctx);
    let summary = tokio::task::spawn_blocking(move || ctx.status_service.get_status())
        .await
        .map_err(|e| {
            tracing::error!("Status task failed: {}", e);
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "Status unavailable")
        })?
        .map_err(|e| {
            tracing::error!("Status query failed: {}", e);
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "Status unavailable")
        })?;

    Ok((StatusCode::OK, Json(summary)))
}

async fn run_transfer<F>(state: &AppState, transfer: F) -> ApiResult<TransferResponse>
where
    F: FnOnce(&BankContext) -> Result<TransferReceipt, TransferError> + Send + 'static,
{
    let ctx = Arc::clone(&state.ctx);
    let outcome = tokio::task::spawn_blocking(move || transfer(&*ctx)).await;

    match outcome {
        Ok(Ok(receipt)) => Ok((StatusCode::OK, Json(TransferResponse::from(receipt)))),
        Ok(Err(e)) => Err(transfer_error(e)),
        Err(e) => {
            // The unit of work was dropped during unwinding and rolled back
            tracing::error!("Transfer task panicked: {}", e);
            Err(transfer_error(TransferError::CommitFailure(e.to_string())))
        }
    }
}

fn transfer_error(err: TransferError) -> ApiError {
    (status_for(&err), Json(ErrorResponse::from(err)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::extract::FromRequest;
    use axum::http::header::CONTENT_TYPE;
    use axum::http::{HeaderValue, Request};
    use csrfbank_core::adapters::memory::MemoryStore;
    use csrfbank_core::config::Config;
    use csrfbank_core::ports::LedgerStore;
    use csrfbank_core::SeedAccount;

    fn test_state() -> (Arc<MemoryStore>, Arc<AppState>) {
        let store = Arc::new(MemoryStore::with_seeds(&SeedAccount::defaults()));
        let ctx = BankContext::with_store(Config::default(), store.clone());
        (store, Arc::new(AppState::new(ctx)))
    }

    fn form(to: &str, amount: &str) -> TransferForm {
        TransferForm {
            to: to.to_string(),
            amount: amount.to_string(),
        }
    }

    async fn extract(req: Request<Body>) -> TransferForm {
        match TransferForm::from_request(req, &()).await {
            Ok(form) => form,
            Err(never) => match never {},
        }
    }

    fn multipart_request(to: &str, amount: &str) -> Request<Body> {
        let boundary = "transfer-form";
        let body = format!(
            "--{b}\r\nContent-Disposition: form-data; name=\"to\"\r\n\r\n{to}\r\n\
             --{b}\r\nContent-Disposition: form-data; name=\"amount\"\r\n\r\n{amount}\r\n\
             --{b}--\r\n",
            b = boundary,
            to = to,
            amount = amount
        );
        Request::builder()
            .method("POST")
            .header(CONTENT_TYPE, format!("multipart/form-data; boundary={}", boundary))
            .body(Body::from(body))
            .unwrap()
    }

    fn json_request() -> Request<Body> {
        Request::builder()
            .method("POST")
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"to":"bob","amount":"100"}"#))
            .unwrap()
    }

    fn balance(store: &MemoryStore, username: &str) -> i64 {
        store.find_by_username(username).unwrap().unwrap().balance
    }

    fn token_headers(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CSRF_HEADER, HeaderValue::from_str(token).unwrap());
        headers
    }

    #[tokio::test]
    async fn test_unsafe_transfer_success() {
        let (store, state) = test_state();

        let (status, Json(body)) = unsafe_transfer(State(state), form("bob", "100"))
            .await
            .unwrap();

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.message, "Transfer successful");
        assert_eq!(body.from.username, "alice");
        assert_eq!(body.from.balance, 900);
        assert_eq!(body.to.balance, 1100);
        assert_eq!(body.amount, 100);
        assert_eq!(balance(&store, "bob"), 1100);
    }

    #[tokio::test]
    async fn test_unsafe_transfer_errors() {
        let (store, state) = test_state();

        let cases = [
            ("bob", "abc", StatusCode::BAD_REQUEST, "Invalid amount"),
            ("bob", "", StatusCode::BAD_REQUEST, "Invalid amount"),
            ("bob", "0", StatusCode::BAD_REQUEST, "Amount must be positive"),
            ("carol", "10", StatusCode::BAD_REQUEST, "Invalid recipient"),
            ("bob", "1001", StatusCode::BAD_REQUEST, "Insufficient balance"),
        ];

        for (to, amount, expected_status, expected_error) in cases {
            let (status, Json(body)) = unsafe_transfer(State(state.clone()), form(to, amount))
                .await
                .unwrap_err();
            assert_eq!(status, expected_status);
            assert_eq!(body.error, expected_error);
        }

        assert_eq!(balance(&store, "alice"), 1000);
        assert_eq!(store.transfer_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unsafe_transfer_store_failure_is_500() {
        let (store, state) = test_state();
        store.fail_next_commit();

        let (status, Json(body)) = unsafe_transfer(State(state), form("bob", "100"))
            .await
            .unwrap_err();
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body.error, "Transfer failed");
        assert_eq!(balance(&store, "alice"), 1000);
    }

    #[tokio::test]
    async fn test_safe_transfer_without_token_is_forbidden() {
        let (store, state) = test_state();

        let (status, Json(body)) =
            safe_transfer(State(state.clone()), HeaderMap::new(), form("bob", "100"))
                .await
                .unwrap_err();
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body.error, "Invalid CSRF token");

        // gate runs before amount validation
        let (status, _) = safe_transfer(State(state), token_headers("nope"), form("bob", "abc"))
            .await
            .unwrap_err();
        assert_eq!(status, StatusCode::FORBIDDEN);

        assert_eq!(balance(&store, "alice"), 1000);
    }

    #[tokio::test]
    async fn test_safe_transfer_with_issued_token() {
        let (store, state) = test_state();

        let Json(issued) = csrf_token(State(state.clone())).await;
        assert_eq!(issued.username, "alice");
        assert_eq!(issued.token.len(), 44);

        let (status, Json(body)) =
            safe_transfer(State(state.clone()), token_headers(&issued.token), form("bob", "100"))
                .await
                .unwrap();
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.message, "Safe transfer successful");
        assert_eq!(balance(&store, "alice"), 900);

        // a valid token does not bypass validation
        let (status, Json(body)) =
            safe_transfer(State(state), token_headers(&issued.token), form("bob", "5000"))
                .await
                .unwrap_err();
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body.error, "Insufficient balance");
    }

    #[tokio::test]
    async fn test_reissued_token_replaces_old_one() {
        let (_, state) = test_state();

        let Json(first) = csrf_token(State(state.clone())).await;
        let Json(second) = csrf_token(State(state.clone())).await;
        assert_ne!(first.token, second.token);

        let (status, _) = safe_transfer(State(state), token_headers(&first.token), form("bob", "1"))
            .await
            .unwrap_err();
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_multipart_form_transfers() {
        let (store, state) = test_state();

        let form = extract(multipart_request("bob", "100")).await;
        let (status, Json(body)) = unsafe_transfer(State(state.clone()), form).await.unwrap();
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.amount, 100);

        let Json(issued) = csrf_token(State(state.clone())).await;
        let form = extract(multipart_request("bob", "50")).await;
        let (status, Json(body)) = safe_transfer(State(state), token_headers(&issued.token), form)
            .await
            .unwrap();
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.message, "Safe transfer successful");

        assert_eq!(balance(&store, "alice"), 850);
        assert_eq!(balance(&store, "bob"), 1150);
    }

    #[tokio::test]
    async fn test_unreadable_body_is_invalid_amount() {
        let (store, state) = test_state();

        let form = extract(json_request()).await;
        let (status, Json(body)) = unsafe_transfer(State(state.clone()), form)
            .await
            .unwrap_err();
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body.error, "Invalid amount");

        // without a token the gate answers first
        let form = extract(json_request()).await;
        let (status, Json(body)) = safe_transfer(State(state.clone()), HeaderMap::new(), form)
            .await
            .unwrap_err();
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body.error, "Invalid CSRF token");

        let Json(issued) = csrf_token(State(state.clone())).await;
        let form = extract(json_request()).await;
        let (status, Json(body)) = safe_transfer(State(state), token_headers(&issued.token), form)
            .await
            .unwrap_err();
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body.error, "Invalid amount");

        assert_eq!(balance(&store, "alice"), 1000);
        assert_eq!(store.transfer_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_status_endpoint() {
        let (_, state) = test_state();
        unsafe_transfer(State(state.clone()), form("bob", "10"))
            .await
            .unwrap();

        let (status, Json(summary)) = super::status(State(state)).await.unwrap();
        assert_eq!(status, StatusCode::OK);
        assert_eq!(summary.total_accounts, 2);
        assert_eq!(summary.total_transfers, 1);
        assert_eq!(summary.total_balance, 2000);
    }
}
