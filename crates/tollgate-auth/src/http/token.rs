//! OAuth 2.0 token endpoint handler.
//!
//! ```ignore
//! POST /oauth/token
//! Content-Type: application/x-www-form-urlencoded
//! Authorization: Basic <base64(client_id:client_secret)>
//!
//! grant_type=authorization_code
//! &code=abc123
//! &redirect_uri=https://x/cb
//! ```

use std::sync::Arc;

use axum::{
    Form, Json, Router,
    extract::{State, rejection::FormRejection},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::post,
};
use tracing::{debug, warn};

use crate::error::AuthError;
use crate::oauth::client_auth::ClientCredentials;
use crate::oauth::coordinator::GrantCoordinator;
use crate::oauth::token::{TokenError, TokenRequest, TokenResponse};

/// Path of the token endpoint.
pub const TOKEN_PATH: &str = "/oauth/token";

/// State required for the token endpoint.
#[derive(Clone)]
pub struct TokenState {
    coordinator: Arc<GrantCoordinator>,
}

impl TokenState {
    /// Creates token state around a coordinator.
    pub fn new(coordinator: Arc<GrantCoordinator>) -> Self {
        Self { coordinator }
    }
}

/// Router exposing the token endpoint.
pub fn oauth_router(state: TokenState) -> Router {
    Router::new()
        .route(TOKEN_PATH, post(token_handler))
        .with_state(state)
}

/// OAuth 2.0 token endpoint handler.
///
/// Accepts an `application/x-www-form-urlencoded` body. Client errors are
/// answered with 400, server-side failures with 500.
pub async fn token_handler(
    State(state): State<TokenState>,
    headers: HeaderMap,
    form: Result<Form<TokenRequest>, FormRejection>,
) -> Response {
    let Form(request) = match form {
        Ok(form) => form,
        Err(rejection) => {
            debug!(error = %rejection, "Malformed token request body");
            return token_error_response(&AuthError::invalid_request(rejection.body_text()));
        }
    };

    let authorization = match headers.get(header::AUTHORIZATION).map(|v| v.to_str()) {
        None => None,
        Some(Ok(value)) => Some(value),
        Some(Err(_)) => {
            return token_error_response(&AuthError::invalid_client(
                "Malformed Authorization header",
            ));
        }
    };

    let result = match ClientCredentials::extract(authorization, &request) {
        Ok(credentials) => state.coordinator.grant(&credentials, &request).await,
        Err(e) => Err(e),
    };

    match result {
        Ok(response) => token_success_response(response),
        Err(e) => {
            warn!(
                client_id = ?request.client_id,
                grant_type = %request.grant_type,
                category = %e.category(),
                error = %e,
                "Token request failed"
            );
            token_error_response(&e)
        }
    }
}

fn token_success_response(response: TokenResponse) -> Response {
    (
        StatusCode::OK,
        [
            (header::CACHE_CONTROL, "no-store"),
            (header::PRAGMA, "no-cache"),
        ],
        Json(response),
    )
        .into_response()
}

/// Build an error response for the token endpoint.
fn token_error_response(error: &AuthError) -> Response {
    let token_error = TokenError::from(error);
    let status = StatusCode::from_u16(token_error.error.http_status())
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

    (
        status,
        [
            (header::CACHE_CONTROL, "no-store"),
            (header::PRAGMA, "no-cache"),
        ],
        Json(token_error),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OAuthConfig;
    use crate::storage::{InMemoryClientStorage, InMemoryTokenStore};
    use crate::types::{Client, GrantType};
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use tower::ServiceExt;

    fn router() -> Router {
        let clients = InMemoryClientStorage::new().with_client(
            Client {
                client_id: "svc".to_string(),
                name: "Service".to_string(),
                confidential: true,
                active: true,
                redirect_uris: vec![],
                scopes: vec!["read".to_string()],
                grant_types: vec![GrantType::ClientCredentials],
            },
            Some("s3cret"),
        );
        let coordinator = GrantCoordinator::new(
            Arc::new(InMemoryTokenStore::new()),
            Arc::new(clients),
            OAuthConfig::default(),
        )
        .unwrap();
        oauth_router(TokenState::new(Arc::new(coordinator)))
    }

    fn form_request(body: &'static str) -> Request<Body> {
        Request::post(TOKEN_PATH)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(body))
            .unwrap()
    }

    async fn json_body(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_client_credentials_success() {
        let response = router()
            .oneshot(form_request(
                "grant_type=client_credentials&client_id=svc&client_secret=s3cret",
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CACHE_CONTROL], "no-store");
        let body = json_body(response).await;
        assert_eq!(body["token_type"], "Bearer");
        assert_eq!(body["expires_in"], 3600);
        assert_eq!(body["scope"], "read");
        assert!(body.get("refresh_token").is_none());
    }

    #[tokio::test]
    async fn test_invalid_client_is_400() {
        let response = router()
            .oneshot(form_request(
                "grant_type=client_credentials&client_id=svc&client_secret=wrong",
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["error"], "invalid_client");
    }

    #[tokio::test]
    async fn test_unsupported_grant_type() {
        let response = router()
            .oneshot(form_request(
                "grant_type=urn:device_code&client_id=svc&client_secret=s3cret",
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["error"], "unsupported_grant_type");
    }

    #[tokio::test]
    async fn test_missing_grant_type_is_invalid_request() {
        let response = router()
            .oneshot(form_request("client_id=svc"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["error"], "invalid_request");
    }
}
