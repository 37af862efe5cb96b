//! Request/response handlers.
//!
//! Every route except `/healthz`, `/media` and `/ws` requires a bearer credential.
//! Failures are returned as `{"success": false, "message": ...}`.

use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{FromRequestParts, Path, Query, State, WebSocketUpgrade};
use axum::http::request::Parts;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use pairchat_proto::api::{
    AckResponse, FailureResponse, MessagesResponse, ProfileResponse, SendResponse, UsersResponse,
};
use pairchat_proto::message::{OutgoingContent, UserId};
use pairchat_proto::user::ProfileUpdate;

use crate::delivery::SendError;
use crate::state::{ProfileError, ServerState};
use crate::store::{MessageStore, StoreError};
use crate::ws;

type AppState<S> = State<Arc<ServerState<S>>>;

/// A failed request: status code plus a message for the client.
#[derive(Debug)]
pub struct ApiFailure {
    status: StatusCode,
    message: String,
}

impl ApiFailure {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiFailure {
    fn into_response(self) -> Response {
        (self.status, Json(FailureResponse::new(self.message))).into_response()
    }
}

impl From<SendError> for ApiFailure {
    fn from(e: SendError) -> Self {
        let status = match &e {
            SendError::Invalid(_) | SendError::SelfAddressed | SendError::Media(_) => {
                StatusCode::BAD_REQUEST
            }
            SendError::UnknownReceiver(_) => StatusCode::NOT_FOUND,
            SendError::Store(_) => {
                tracing::error!(error = %e, "send failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self::new(status, e.to_string())
    }
}

impl From<StoreError> for ApiFailure {
    fn from(e: StoreError) -> Self {
        tracing::error!(error = %e, "store request failed");
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    }
}

impl From<ProfileError> for ApiFailure {
    fn from(e: ProfileError) -> Self {
        let status = match e {
            ProfileError::UnknownUser => StatusCode::NOT_FOUND,
            ProfileError::Media(_) => StatusCode::BAD_REQUEST,
        };
        Self::new(status, e.to_string())
    }
}

impl From<JsonRejection> for ApiFailure {
    fn from(e: JsonRejection) -> Self {
        Self::new(e.status(), e.body_text())
    }
}

/// The user a request's bearer credential belongs to.
pub struct AuthUser(pub UserId);

impl<S: MessageStore> FromRequestParts<Arc<ServerState<S>>> for AuthUser {
    type Rejection = ApiFailure;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<ServerState<S>>,
    ) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .ok_or_else(|| {
                ApiFailure::new(StatusCode::UNAUTHORIZED, "Not authorized - no token provided")
            })?;
        state.identity.authenticate(token).map(Self).ok_or_else(|| {
            ApiFailure::new(StatusCode::UNAUTHORIZED, "Not authorized - invalid token")
        })
    }
}

/// `POST /api/messages/send/{receiverId}`
pub async fn send_message<S: MessageStore>(
    State(state): AppState<S>,
    AuthUser(me): AuthUser,
    Path(receiver_id): Path<String>,
    body: Result<Json<OutgoingContent>, JsonRejection>,
) -> Result<Json<SendResponse>, ApiFailure> {
    let Json(content) = body?;
    let new_message = state
        .delivery
        .send(&me, &UserId::new(receiver_id), content)
        .await?;
    Ok(Json(SendResponse {
        success: true,
        new_message,
    }))
}

/// `GET /api/messages/{peerId}`
pub async fn conversation<S: MessageStore>(
    State(state): AppState<S>,
    AuthUser(me): AuthUser,
    Path(peer_id): Path<String>,
) -> Result<Json<MessagesResponse>, ApiFailure> {
    let messages = state
        .delivery
        .conversation(&me, &UserId::new(peer_id))
        .await?;
    Ok(Json(MessagesResponse {
        success: true,
        messages,
    }))
}

/// `GET /api/messages/users`
pub async fn users<S: MessageStore>(
    State(state): AppState<S>,
    AuthUser(me): AuthUser,
) -> Result<Json<UsersResponse>, ApiFailure> {
    let users = state.directory.list_except(&me);
    let unseen_messages = state.store.count_unseen(&me).await?;
    Ok(Json(UsersResponse {
        success: true,
        users,
        unseen_messages,
    }))
}

/// `PATCH /api/messages/seen/{peerId}`
pub async fn mark_seen<S: MessageStore>(
    State(state): AppState<S>,
    AuthUser(me): AuthUser,
    Path(peer_id): Path<String>,
) -> Json<AckResponse> {
    state.delivery.mark_seen(&me, &UserId::new(peer_id)).await;
    Json(AckResponse { success: true })
}

/// `PUT /api/auth/update-profile`
pub async fn update_profile<S: MessageStore>(
    State(state): AppState<S>,
    AuthUser(me): AuthUser,
    body: Result<Json<ProfileUpdate>, JsonRejection>,
) -> Result<Json<ProfileResponse>, ApiFailure> {
    let Json(update) = body?;
    let user = state.update_profile(&me, update).await?;
    Ok(Json(ProfileResponse {
        success: true,
        user,
    }))
}

/// `GET /media/{key}`: serves an uploaded image. Unauthenticated so image
/// URLs work anywhere a message renders.
pub async fn media<S: MessageStore>(
    State(state): AppState<S>,
    Path(key): Path<String>,
) -> Result<Response, ApiFailure> {
    let image = state
        .media
        .load_image(&key)
        .ok_or_else(|| ApiFailure::new(StatusCode::NOT_FOUND, "Image not found"))?;
    Ok(([(header::CONTENT_TYPE, image.content_type)], image.bytes).into_response())
}

/// `GET /healthz`
pub async fn healthz() -> &'static str {
    "ok"
}

#[derive(Debug, serde::Deserialize)]
pub struct SocketParams {
    #[serde(rename = "userId")]
    user_id: Option<String>,
}

/// `GET /ws?userId=...`: upgrades to a WebSocket session.
pub async fn ws_upgrade<S: MessageStore>(
    upgrade: WebSocketUpgrade,
    State(state): AppState<S>,
    Query(params): Query<SocketParams>,
) -> impl IntoResponse {
    let user_id = params
        .user_id
        .filter(|id| !id.is_empty())
        .map(UserId::new);
    upgrade.on_upgrade(move |socket| ws::handle_socket(socket, state, user_id))
}
