//! REST surface.
//!
//! Bearer-authenticated JSON endpoints next to the socket: presence
//! snapshot, conversation history, socket-less message posting and meeting
//! id minting.

use crate::handlers::AppState;
use axum::{
    async_trait,
    extract::{FromRequestParts, Path, State},
    http::{header::AUTHORIZATION, request::Parts, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use rtc_core::{
    generate_meeting_id, AuthError, PresenceEntry, RelayError, StoreError, StoredMessage,
};
use rtc_protocol::UserId;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error};

/// REST error type.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Unauthorized(#[from] AuthError),

    #[error(transparent)]
    Relay(#[from] RelayError),

    #[error("Store unavailable")]
    Store(#[from] StoreError),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Unavailable(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),
}

impl ApiError {
    fn parts(&self) -> (StatusCode, u16) {
        match self {
            ApiError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, 4001),
            ApiError::Relay(e) => {
                let status = match e {
                    RelayError::Authentication(_) => StatusCode::UNAUTHORIZED,
                    RelayError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
                    RelayError::Authorization(_) => StatusCode::FORBIDDEN,
                    RelayError::UnreachableTarget(_) => StatusCode::NOT_FOUND,
                    RelayError::Persistence(_) => StatusCode::SERVICE_UNAVAILABLE,
                };
                (status, e.code())
            }
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, 4040),
            ApiError::Store(_) | ApiError::Unavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, 5030),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, 4000),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.parts();
        if status.is_server_error() {
            error!(error = ?self, "Request failed");
        }

        let body = Json(json!({
            "error": {
                "code": code,
                "message": self.to_string(),
            }
        }));

        (status, body).into_response()
    }
}

/// Result type alias for API handlers.
pub type ApiResult<T> = Result<T, ApiError>;

/// Token from an `Authorization: Bearer` header.
pub(crate) fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|t| t.trim().to_string())
}

/// Identity of a bearer-authenticated request.
#[derive(Debug, Clone)]
pub struct AuthUser(pub UserId);

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers);
        let user = state.relay.authenticator().verify(token.as_deref())?;
        Ok(AuthUser(user))
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceResponse {
    pub count: usize,
    pub users: Vec<PresenceEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostMessage {
    pub recipient_id: UserId,
    pub content: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MeetingIdResponse {
    pub meeting_id: String,
}

/// When the directory is seeded from config, unknown users are a 404.
async fn ensure_known(state: &AppState, user: &UserId) -> ApiResult<()> {
    if state.config.users.is_empty() {
        return Ok(());
    }
    match state.relay.users().display_info(user).await? {
        Some(_) => Ok(()),
        None => Err(ApiError::NotFound(format!("User {} not found", user))),
    }
}

/// REST routes, mounted under `/api`.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/presence", get(presence))
        .route("/api/messages", post(post_message))
        .route("/api/messages/:user_id", get(history))
        .route("/api/meetings/id", get(meeting_id))
}

async fn presence(_: AuthUser, State(state): State<Arc<AppState>>) -> Json<PresenceResponse> {
    let users = state.relay.presence().snapshot();
    Json(PresenceResponse {
        count: users.len(),
        users,
    })
}

async fn history(
    AuthUser(me): AuthUser,
    Path(other): Path<String>,
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<Vec<StoredMessage>>> {
    if other.trim().is_empty() {
        return Err(ApiError::BadRequest("user id is empty".to_string()));
    }
    let other = UserId::new(other);
    ensure_known(&state, &other).await?;
    let messages = state.relay.messages().find_by_pair(&me, &other).await?;
    debug!(user = %me, peer = %other, count = messages.len(), "History served");
    Ok(Json(messages))
}

async fn post_message(
    AuthUser(me): AuthUser,
    State(state): State<Arc<AppState>>,
    Json(body): Json<PostMessage>,
) -> ApiResult<(StatusCode, Json<StoredMessage>)> {
    ensure_known(&state, &body.recipient_id).await?;
    let stored = state
        .relay
        .post_message(&me, &body.recipient_id, &body.content)
        .await?;
    crate::metrics::record_persisted();
    Ok((StatusCode::CREATED, Json(stored)))
}

async fn meeting_id(_: AuthUser) -> Json<MeetingIdResponse> {
    Json(MeetingIdResponse {
        meeting_id: generate_meeting_id(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::handlers::build_app;
    use axum::body::{to_bytes, Body};
    use axum::http::{HeaderValue, Request};
    use serde_json::Value;
    use std::time::Duration;
    use tower::ServiceExt;

    fn app_state() -> Arc<AppState> {
        let mut config = Config::default();
        config.auth.jwt_secret = "api-test-secret".into();
        config.metrics.enabled = false;
        Arc::new(AppState::new(config))
    }

    fn token(state: &AppState, id: &str) -> String {
        state
            .relay
            .authenticator()
            .issue(&UserId::new(id), Duration::from_secs(60))
            .unwrap()
    }

    async fn call(state: &Arc<AppState>, request: Request<Body>) -> (StatusCode, Value) {
        let response = build_app(Arc::clone(state)).oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    fn get(uri: &str, token: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri(uri);
        if let Some(token) = token {
            builder = builder.header(AUTHORIZATION, format!("Bearer {}", token));
        }
        builder.body(Body::empty()).unwrap()
    }

    fn post_json(uri: &str, token: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(AUTHORIZATION, format!("Bearer {}", token))
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_requires_bearer_token() {
        let state = app_state();
        let (status, body) = call(&state, get("/api/presence", None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"]["code"], 4001);
    }

    #[tokio::test]
    async fn test_post_then_history() {
        let state = app_state();
        let alice = token(&state, "alice");
        let bob = token(&state, "bob");

        let (status, created) = call(
            &state,
            post_json(
                "/api/messages",
                &alice,
                json!({"recipientId": "bob", "content": "offline hello"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["sender"], "alice");
        assert_eq!(created["read"], false);

        let (status, history) = call(&state, get("/api/messages/alice", Some(&bob))).await;
        assert_eq!(status, StatusCode::OK);
        let history = history.as_array().unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0]["content"], "offline hello");
        assert_eq!(history[0]["id"], created["id"]);
    }

    #[tokio::test]
    async fn test_unknown_user_is_not_found_when_seeded() {
        let mut config = Config::default();
        config.auth.jwt_secret = "api-test-secret".into();
        config.metrics.enabled = false;
        config.users.push(crate::config::UserSeed {
            id: "alice".into(),
            username: "Alice".into(),
            avatar: None,
        });
        let state = Arc::new(AppState::new(config));
        let bob = token(&state, "bob");

        let (status, body) = call(
            &state,
            post_json(
                "/api/messages",
                &bob,
                json!({"recipientId": "nobody", "content": "hello?"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["code"], 4040);

        let (status, _) = call(&state, get("/api/messages/nobody", Some(&bob))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = call(
            &state,
            post_json(
                "/api/messages",
                &bob,
                json!({"recipientId": "alice", "content": "hello alice"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert!(state
            .relay
            .messages()
            .find_by_pair(&UserId::new("bob"), &UserId::new("alice"))
            .await
            .unwrap()
            .iter()
            .any(|m| m.content == "hello alice"));
    }

    #[tokio::test]
    async fn test_post_rejects_blank_content() {
        let state = app_state();
        let alice = token(&state, "alice");

        let (status, body) = call(
            &state,
            post_json(
                "/api/messages",
                &alice,
                json!({"recipientId": "bob", "content": "   "}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["error"]["code"], 4220);
    }

    #[tokio::test]
    async fn test_presence_and_meeting_id() {
        let state = app_state();
        let alice = token(&state, "alice");

        let (status, presence) = call(&state, get("/api/presence", Some(&alice))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(presence["count"], 0);

        let (status, meeting) = call(&state, get("/api/meetings/id", Some(&alice))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            meeting["meetingId"].as_str().unwrap().len(),
            rtc_core::MEETING_ID_LENGTH
        );
    }

    #[tokio::test]
    async fn test_health() {
        let state = app_state();
        let (status, body) = call(&state, get("/health", None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["online"], 0);
    }

    #[test]
    fn test_bearer_token() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc.def"));
        assert_eq!(bearer_token(&headers).as_deref(), Some("abc.def"));

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic Zm9v"));
        assert_eq!(bearer_token(&headers), None);
    }

    #[test]
    fn test_error_status_and_code() {
        let cases = [
            (ApiError::from(AuthError::MissingCredential), StatusCode::UNAUTHORIZED, 4001),
            (
                ApiError::from(RelayError::Validation("empty".into())),
                StatusCode::UNPROCESSABLE_ENTITY,
                4220,
            ),
            (
                ApiError::from(RelayError::from(StoreError::Unavailable("down".into()))),
                StatusCode::SERVICE_UNAVAILABLE,
                5030,
            ),
            (
                ApiError::Unavailable("full".into()),
                StatusCode::SERVICE_UNAVAILABLE,
                5030,
            ),
        ];

        for (err, status, code) in cases {
            assert_eq!(err.parts(), (status, code));
            assert_eq!(err.into_response().status(), status);
        }
    }
}
