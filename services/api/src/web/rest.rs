//! services/api/src/web/rest.rs
//!
//! Contains the Axum handlers for the profile and session endpoints and the
//! master definition for the OpenAPI specification.

use crate::error::{ApiError, ErrorBody};
use crate::web::extract::{ApiJson, ApiPath};
use crate::web::{auth, chat, state::AppState};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
    Extension,
};
use ruleset_chat_core::domain::{Ruleset, User};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi, ToSchema,
};

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        auth::register_handler,
        auth::login_handler,
        auth::me_handler,
        create_profile_handler,
        list_profiles_handler,
        get_profile_handler,
        create_session_handler,
        list_sessions_handler,
        chat::list_messages_handler,
        chat::respond_handler,
    ),
    components(
        schemas(
            ErrorBody,
            auth::RegisterRequest,
            auth::LoginRequest,
            auth::AuthResponse,
            auth::UserResponse,
            CreateProfileRequest,
            CreateProfileResponse,
            ProfileSummaryResponse,
            ProfileResponse,
            CreateSessionResponse,
            chat::MessageResponse,
            chat::RespondRequest,
            chat::RespondResponse,
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Ruleset Chat API", description = "Model profiles with rulesets, and chat sessions relayed through them.")
    )
)]
pub struct ApiDoc;

impl ApiDoc {
    /// The document served at `/api-docs/openapi.json`, as pretty-printed JSON.
    pub fn pretty_json() -> Result<String, ApiError> {
        Self::openapi()
            .to_pretty_json()
            .map_err(|e| ApiError::Internal(format!("Failed to render the OpenAPI document: {}", e)))
    }
}

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

//=========================================================================================
// API Response and Payload Structs
//=========================================================================================

#[derive(Deserialize, ToSchema)]
pub struct CreateProfileRequest {
    pub profile_name: String,
    pub model: String,
    /// Any JSON document. Injected verbatim as a system instruction.
    #[schema(value_type = Object)]
    pub ruleset: Ruleset,
}

/// The response payload sent after successfully creating a profile.
#[derive(Serialize, Deserialize, ToSchema)]
pub struct CreateProfileResponse {
    pub profile_id: i64,
    pub chatlog_id: i64,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct ProfileSummaryResponse {
    pub profile_id: i64,
    pub profile_name: String,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct ProfileResponse {
    pub profile_id: i64,
    pub profile_name: String,
    pub model: String,
    #[schema(value_type = Object)]
    pub ruleset: Ruleset,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct CreateSessionResponse {
    pub chatlog_id: i64,
}

//=========================================================================================
// REST API Handlers
//=========================================================================================

/// Create a profile with its ruleset. A first chat session is opened for it.
#[utoipa::path(
    post,
    path = "/profiles",
    request_body = CreateProfileRequest,
    responses(
        (status = 201, description = "Profile created", body = CreateProfileResponse),
        (status = 400, description = "Missing field, or empty profile name or model", body = ErrorBody),
        (status = 401, description = "Missing or invalid token", body = ErrorBody),
        (status = 409, description = "Concurrent creation conflict", body = ErrorBody),
        (status = 500, description = "Internal server error", body = ErrorBody)
    ),
    security(("bearer" = []))
)]
pub async fn create_profile_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    ApiJson(req): ApiJson<CreateProfileRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let created = state
        .profiles
        .create(user.user_id, &req.profile_name, &req.model, &req.ruleset)
        .await?;
    let response = CreateProfileResponse {
        profile_id: created.profile.profile_id,
        chatlog_id: created.chatlog_id,
    };
    Ok((StatusCode::CREATED, Json(response)))
}

/// List the caller's profiles.
#[utoipa::path(
    get,
    path = "/profiles",
    responses(
        (status = 200, description = "Profiles in creation order", body = [ProfileSummaryResponse]),
        (status = 401, description = "Missing or invalid token", body = ErrorBody)
    ),
    security(("bearer" = []))
)]
pub async fn list_profiles_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
) -> Result<Json<Vec<ProfileSummaryResponse>>, ApiError> {
    let profiles = state
        .profiles
        .list(user.user_id)
        .await?
        .into_iter()
        .map(|p| ProfileSummaryResponse {
            profile_id: p.profile_id,
            profile_name: p.profile_name,
        })
        .collect();
    Ok(Json(profiles))
}

/// Fetch a profile's model and ruleset.
#[utoipa::path(
    get,
    path = "/profiles/{profile_id}",
    params(("profile_id" = i64, Path, description = "Profile id, unique per user")),
    responses(
        (status = 200, description = "The profile and its ruleset", body = ProfileResponse),
        (status = 401, description = "Missing or invalid token", body = ErrorBody),
        (status = 404, description = "No such profile", body = ErrorBody)
    ),
    security(("bearer" = []))
)]
pub async fn get_profile_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    ApiPath(profile_id): ApiPath<i64>,
) -> Result<Json<ProfileResponse>, ApiError> {
    let (profile, ruleset) = state.profiles.fetch(user.user_id, profile_id).await?;
    Ok(Json(ProfileResponse {
        profile_id: profile.profile_id,
        profile_name: profile.profile_name,
        model: profile.model,
        ruleset,
    }))
}

/// Open a new chat session for a profile.
#[utoipa::path(
    post,
    path = "/profiles/{profile_id}/sessions",
    params(("profile_id" = i64, Path, description = "Profile id, unique per user")),
    responses(
        (status = 201, description = "Session created", body = CreateSessionResponse),
        (status = 401, description = "Missing or invalid token", body = ErrorBody),
        (status = 404, description = "No such profile", body = ErrorBody)
    ),
    security(("bearer" = []))
)]
pub async fn create_session_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    ApiPath(profile_id): ApiPath<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let session = state.sessions.create(user.user_id, profile_id).await?;
    Ok((
        StatusCode::CREATED,
        Json(CreateSessionResponse {
            chatlog_id: session.chatlog_id,
        }),
    ))
}

/// List the chat sessions of a profile.
#[utoipa::path(
    get,
    path = "/profiles/{profile_id}/sessions",
    params(("profile_id" = i64, Path, description = "Profile id, unique per user")),
    responses(
        (status = 200, description = "Chat log ids, oldest first", body = [i64]),
        (status = 401, description = "Missing or invalid token", body = ErrorBody),
        (status = 404, description = "No such profile", body = ErrorBody)
    ),
    security(("bearer" = []))
)]
pub async fn list_sessions_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    ApiPath(profile_id): ApiPath<i64>,
) -> Result<Json<Vec<i64>>, ApiError> {
    Ok(Json(state.sessions.list(user.user_id, profile_id).await?))
}
