//! services/api/src/web/chat.rs
//!
//! Message history and the prompt/reply endpoint.

use crate::error::{ApiError, ErrorBody};
use crate::web::extract::{ApiJson, ApiPath};
use crate::web::state::AppState;
use axum::{
    extract::State,
    response::Json,
    Extension,
};
use ruleset_chat_core::domain::{Message, Sender, User};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::error;
use utoipa::ToSchema;

#[derive(Serialize, Deserialize, ToSchema)]
pub struct MessageResponse {
    pub message_id: i64,
    #[schema(value_type = String, example = "assistant")]
    pub sender: Sender,
    pub content: String,
}

impl From<Message> for MessageResponse {
    fn from(message: Message) -> Self {
        Self {
            message_id: message.message_id,
            sender: message.sender,
            content: message.content,
        }
    }
}

#[derive(Deserialize, ToSchema)]
pub struct RespondRequest {
    pub prompt: String,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct RespondResponse {
    pub reply: String,
    pub prompt_message_id: i64,
    pub reply_message_id: i64,
}

/// List the messages of a chat session in chronological order.
#[utoipa::path(
    get,
    path = "/profiles/{profile_id}/sessions/{chatlog_id}/messages",
    params(
        ("profile_id" = i64, Path, description = "Profile id, unique per user"),
        ("chatlog_id" = i64, Path, description = "Chat session id")
    ),
    responses(
        (status = 200, description = "Messages ordered by message id", body = [MessageResponse]),
        (status = 401, description = "Missing or invalid token", body = ErrorBody),
        (status = 404, description = "No such session for this profile", body = ErrorBody)
    ),
    security(("bearer" = []))
)]
pub async fn list_messages_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    ApiPath((profile_id, chatlog_id)): ApiPath<(i64, i64)>,
) -> Result<Json<Vec<MessageResponse>>, ApiError> {
    let messages = state
        .conversations
        .messages(user.user_id, profile_id, chatlog_id)
        .await?
        .into_iter()
        .map(MessageResponse::from)
        .collect();
    Ok(Json(messages))
}

/// Send a prompt through the session's ruleset and model, and record the exchange.
///
/// The exchange runs on its own task, so it completes even if the client
/// disconnects while the provider is still answering.
#[utoipa::path(
    post,
    path = "/sessions/{chatlog_id}/messages",
    params(("chatlog_id" = i64, Path, description = "Chat session id")),
    request_body = RespondRequest,
    responses(
        (status = 200, description = "The model's reply", body = RespondResponse),
        (status = 400, description = "Missing or empty prompt", body = ErrorBody),
        (status = 401, description = "Missing or invalid token", body = ErrorBody),
        (status = 404, description = "No such session", body = ErrorBody),
        (status = 502, description = "The completion provider failed or timed out", body = ErrorBody)
    ),
    security(("bearer" = []))
)]
pub async fn respond_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    ApiPath(chatlog_id): ApiPath<i64>,
    ApiJson(req): ApiJson<RespondRequest>,
) -> Result<Json<RespondResponse>, ApiError> {
    let conversations = state.conversations.clone();
    let exchange = tokio::spawn(async move {
        conversations
            .respond(user.user_id, chatlog_id, &req.prompt)
            .await
    })
    .await
    .map_err(|e| {
        error!("Respond task for chat log {} failed: {}", chatlog_id, e);
        ApiError::Internal(e.to_string())
    })??;

    Ok(Json(RespondResponse {
        reply: exchange.reply.content,
        prompt_message_id: exchange.prompt.message_id,
        reply_message_id: exchange.reply.message_id,
    }))
}
