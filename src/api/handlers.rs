use std::collections::BTreeSet;
use std::sync::Arc;

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::Json,
    routing::{get, post},
    Router,
};
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::auth::{AuthenticatedUser, JwtValidator};
use crate::error::Error;
use crate::market::Symbol;
use crate::subscriptions::SubscriptionService;

/// Thin CRUD mirror of the push-side subscribe/unsubscribe: same service,
/// same store, same fan-out to live sessions, so both surfaces stay
/// consistent.
#[derive(Clone)]
pub struct ApiState {
    pub service: Arc<SubscriptionService>,
    pub verifier: Arc<JwtValidator>,
}

#[derive(Debug, Deserialize)]
pub struct SymbolRequest {
    pub symbol: String,
}

#[derive(Debug, Serialize)]
pub struct SubscriptionResponse {
    pub success: bool,
    pub message: String,
    pub subscriptions: BTreeSet<Symbol>,
}

impl SubscriptionResponse {
    fn ok(message: impl Into<String>, subscriptions: BTreeSet<Symbol>) -> Json<Self> {
        Json(Self {
            success: true,
            message: message.into(),
            subscriptions,
        })
    }

    fn err(message: impl Into<String>) -> Json<Self> {
        Json(Self {
            success: false,
            message: message.into(),
            subscriptions: BTreeSet::new(),
        })
    }
}

// Extract JWT token from Authorization header
fn extract_jwt_from_headers(headers: &HeaderMap) -> Option<String> {
    headers
        .get("Authorization")
        .and_then(|auth_header| auth_header.to_str().ok())
        .and_then(|auth_str| {
            auth_str
                .strip_prefix("Bearer ")
                .map(|token| token.to_string())
        })
}

// Authenticate request and resolve the caller's identity
fn authenticate_request(
    headers: &HeaderMap,
    verifier: &JwtValidator,
) -> Result<AuthenticatedUser, (StatusCode, &'static str)> {
    let token = extract_jwt_from_headers(headers)
        .ok_or((StatusCode::UNAUTHORIZED, "Missing Authorization header"))?;

    verifier
        .verify_token(&token)
        .map_err(|_| (StatusCode::UNAUTHORIZED, "Invalid or expired token"))
}

fn error_status(error: &Error) -> StatusCode {
    match error {
        Error::UnknownSymbol(_) | Error::AlreadySubscribed(_) | Error::NotSubscribed(_) => {
            StatusCode::BAD_REQUEST
        }
        Error::StoreUnavailable(_) => StatusCode::INTERNAL_SERVER_ERROR,
        Error::AuthenticationFailed(_) => StatusCode::UNAUTHORIZED,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

// GET /api/subscriptions - Current subscription set
pub async fn get_subscriptions(
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> Result<Json<SubscriptionResponse>, (StatusCode, Json<SubscriptionResponse>)> {
    let user = authenticate_request(&headers, &state.verifier)
        .map_err(|(status, msg)| (status, SubscriptionResponse::err(msg)))?;

    let subscriptions = state.service.current(&user.user_id);
    Ok(SubscriptionResponse::ok("OK", subscriptions))
}

// POST /api/subscriptions/subscribe - Add a symbol
pub async fn subscribe(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(request): Json<SymbolRequest>,
) -> Result<Json<SubscriptionResponse>, (StatusCode, Json<SubscriptionResponse>)> {
    let user = authenticate_request(&headers, &state.verifier)
        .map_err(|(status, msg)| (status, SubscriptionResponse::err(msg)))?;

    let result = Symbol::parse(&request.symbol)
        .and_then(|symbol| state.service.subscribe(&user.user_id, symbol));

    match result {
        Ok(subscriptions) => {
            info!("{} subscribed to {} via REST", user.user_id, request.symbol);
            Ok(SubscriptionResponse::ok(
                "Subscribed successfully",
                subscriptions,
            ))
        }
        Err(e) => {
            warn!("REST subscribe for {} failed: {}", user.user_id, e);
            Err((error_status(&e), SubscriptionResponse::err(e.to_string())))
        }
    }
}

// POST /api/subscriptions/unsubscribe - Remove a symbol
pub async fn unsubscribe(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(request): Json<SymbolRequest>,
) -> Result<Json<SubscriptionResponse>, (StatusCode, Json<SubscriptionResponse>)> {
    let user = authenticate_request(&headers, &state.verifier)
        .map_err(|(status, msg)| (status, SubscriptionResponse::err(msg)))?;

    let result = Symbol::parse(&request.symbol)
        .and_then(|symbol| state.service.unsubscribe(&user.user_id, symbol));

    match result {
        Ok(subscriptions) => {
            info!(
                "{} unsubscribed from {} via REST",
                user.user_id, request.symbol
            );
            Ok(SubscriptionResponse::ok(
                "Unsubscribed successfully",
                subscriptions,
            ))
        }
        Err(e) => {
            warn!("REST unsubscribe for {} failed: {}", user.user_id, e);
            Err((error_status(&e), SubscriptionResponse::err(e.to_string())))
        }
    }
}

// GET /api/health - Health check endpoint
pub async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "ticker_socket_api",
        "timestamp": chrono::Utc::now()
    }))
}

// Create the API router
pub fn create_api_router(state: ApiState) -> Router {
    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/subscriptions", get(get_subscriptions))
        .route("/subscriptions/subscribe", post(subscribe))
        .route("/subscriptions/unsubscribe", post(unsubscribe))
        .with_state(state);

    Router::new().nest("/api", api_routes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_bearer_extraction() {
        let mut headers = HeaderMap::new();
        assert!(extract_jwt_from_headers(&headers).is_none());

        headers.insert("Authorization", HeaderValue::from_static("Bearer abc.def"));
        assert_eq!(extract_jwt_from_headers(&headers).unwrap(), "abc.def");

        headers.insert("Authorization", HeaderValue::from_static("Basic abc"));
        assert!(extract_jwt_from_headers(&headers).is_none());
    }

    #[test]
    fn test_error_status_mapping() {
        assert_eq!(
            error_status(&Error::UnknownSymbol("AAPL".to_string())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            error_status(&Error::AlreadySubscribed(Symbol::GOOG)),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            error_status(&Error::StoreUnavailable("io".to_string())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
