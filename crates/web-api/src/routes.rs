use axum::{
    extract::{Path, Query, State, WebSocketUpgrade},
    http::{HeaderMap, StatusCode},
    response::Response,
    routing::{delete, get, post},
    Json, Router,
};
use serde::Deserialize;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use uuid::Uuid;

use application::services::{
    AddParticipantRequest, ConversationSummary, CreateDirectRequest, CreateGroupRequest,
    DeleteConversationRequest, DeleteMessageRequest, GetHistoryRequest, LeaveGroupRequest,
    MessageHistoryPage, ModifyAdminRequest, RemoveParticipantRequest, RenameGroupRequest,
    SendMessageRequest,
};
use domain::{
    Attachment, Conversation, ConversationId, MessageId, PopulatedMessage, User, UserId, Username,
};

use crate::auth::RegisterResponse;
use crate::error::ApiError;
use crate::state::AppState;
use crate::ws_connection::WebSocketConnection;

#[derive(Debug, Deserialize)]
struct RegisterPayload {
    username: String,
    avatar_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CreateDirectPayload {
    other_id: Uuid,
}

#[derive(Debug, Deserialize)]
struct CreateGroupPayload {
    name: String,
    member_ids: Vec<Uuid>,
}

#[derive(Debug, Deserialize)]
struct RenamePayload {
    name: String,
}

#[derive(Debug, Deserialize)]
struct MemberPayload {
    user_id: Uuid,
}

#[derive(Debug, Deserialize)]
struct SendMessagePayload {
    #[serde(default)]
    content: String,
    #[serde(default)]
    attachments: Vec<Attachment>,
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    before: Option<Uuid>,
    limit: Option<u32>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .nest("/api/v1", api_routes())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register_user))
        .route("/conversations", get(list_conversations))
        .route("/conversations/direct", post(create_direct))
        .route("/conversations/group", post(create_group))
        .route(
            "/conversations/{conversation_id}",
            axum::routing::patch(rename_group).delete(delete_conversation),
        )
        .route(
            "/conversations/{conversation_id}/participants",
            post(add_participant).delete(remove_participant),
        )
        .route(
            "/conversations/{conversation_id}/admins",
            post(promote_admin).delete(demote_admin),
        )
        .route("/conversations/{conversation_id}/leave", post(leave_group))
        .route(
            "/conversations/{conversation_id}/messages",
            post(send_message).get(get_history),
        )
        .route("/messages/{message_id}", delete(delete_message))
        .route("/ws", get(websocket_upgrade))
}

async fn health() -> StatusCode {
    StatusCode::OK
}

/// 注册用户并签发凭证。账号体系由外部认证子系统负责，这个端点
/// 供开发环境和集成测试引导身份。
async fn register_user(
    State(state): State<AppState>,
    Json(payload): Json<RegisterPayload>,
) -> Result<(StatusCode, Json<RegisterResponse>), ApiError> {
    let username = Username::parse(payload.username)
        .map_err(|err| ApiError::bad_request(err.to_string()))?;
    if state
        .user_repository
        .find_by_username(&username)
        .await
        .map_err(application::ApplicationError::from)?
        .is_some()
    {
        return Err(ApiError::conflict("用户名已被占用"));
    }

    let user = state
        .user_repository
        .create(User::new(
            UserId::from(Uuid::new_v4()),
            username,
            payload.avatar_url,
            state.clock.now(),
        ))
        .await
        .map_err(application::ApplicationError::from)?;

    let token = state.jwt_service.generate_token(Uuid::from(user.id))?;
    Ok((StatusCode::CREATED, Json(RegisterResponse { user, token })))
}

async fn list_conversations(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<ConversationSummary>>, ApiError> {
    let caller = authenticate(&state, &headers)?;
    let summaries = state
        .conversation_service
        .list_conversations(caller)
        .await?;
    Ok(Json(summaries))
}

async fn create_direct(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateDirectPayload>,
) -> Result<(StatusCode, Json<Conversation>), ApiError> {
    let caller = authenticate(&state, &headers)?;
    let conversation = state
        .conversation_service
        .create_direct(CreateDirectRequest {
            creator_id: caller,
            other_id: UserId::from(payload.other_id),
        })
        .await?;
    Ok((StatusCode::CREATED, Json(conversation)))
}

async fn create_group(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateGroupPayload>,
) -> Result<(StatusCode, Json<Conversation>), ApiError> {
    let caller = authenticate(&state, &headers)?;
    let conversation = state
        .conversation_service
        .create_group(CreateGroupRequest {
            creator_id: caller,
            name: payload.name,
            member_ids: payload.member_ids.into_iter().map(UserId::from).collect(),
        })
        .await?;
    Ok((StatusCode::CREATED, Json(conversation)))
}

async fn rename_group(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    headers: HeaderMap,
    Json(payload): Json<RenamePayload>,
) -> Result<Json<Conversation>, ApiError> {
    let caller = authenticate(&state, &headers)?;
    let conversation = state
        .conversation_service
        .rename_group(RenameGroupRequest {
            conversation_id: ConversationId::from(conversation_id),
            caller_id: caller,
            name: payload.name,
        })
        .await?;
    Ok(Json(conversation))
}

async fn add_participant(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    headers: HeaderMap,
    Json(payload): Json<MemberPayload>,
) -> Result<Json<Conversation>, ApiError> {
    let caller = authenticate(&state, &headers)?;
    let conversation = state
        .conversation_service
        .add_participant(AddParticipantRequest {
            conversation_id: ConversationId::from(conversation_id),
            caller_id: caller,
            user_id: UserId::from(payload.user_id),
        })
        .await?;
    Ok(Json(conversation))
}

async fn remove_participant(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    headers: HeaderMap,
    Json(payload): Json<MemberPayload>,
) -> Result<Json<Conversation>, ApiError> {
    let caller = authenticate(&state, &headers)?;
    let conversation = state
        .conversation_service
        .remove_participant(RemoveParticipantRequest {
            conversation_id: ConversationId::from(conversation_id),
            caller_id: caller,
            user_id: UserId::from(payload.user_id),
        })
        .await?;
    Ok(Json(conversation))
}

async fn promote_admin(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    headers: HeaderMap,
    Json(payload): Json<MemberPayload>,
) -> Result<Json<Conversation>, ApiError> {
    let caller = authenticate(&state, &headers)?;
    let conversation = state
        .conversation_service
        .promote_admin(ModifyAdminRequest {
            conversation_id: ConversationId::from(conversation_id),
            caller_id: caller,
            user_id: UserId::from(payload.user_id),
        })
        .await?;
    Ok(Json(conversation))
}

async fn demote_admin(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    headers: HeaderMap,
    Json(payload): Json<MemberPayload>,
) -> Result<Json<Conversation>, ApiError> {
    let caller = authenticate(&state, &headers)?;
    let conversation = state
        .conversation_service
        .demote_admin(ModifyAdminRequest {
            conversation_id: ConversationId::from(conversation_id),
            caller_id: caller,
            user_id: UserId::from(payload.user_id),
        })
        .await?;
    Ok(Json(conversation))
}

async fn leave_group(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    let caller = authenticate(&state, &headers)?;
    state
        .conversation_service
        .leave_group(LeaveGroupRequest {
            conversation_id: ConversationId::from(conversation_id),
            caller_id: caller,
        })
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_conversation(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    let caller = authenticate(&state, &headers)?;
    state
        .conversation_service
        .delete_conversation(DeleteConversationRequest {
            conversation_id: ConversationId::from(conversation_id),
            caller_id: caller,
        })
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// REST 发消息与 socket 发消息共用同一条投递路径，
/// 已读游标和广播副作用完全一致。
async fn send_message(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    headers: HeaderMap,
    Json(payload): Json<SendMessagePayload>,
) -> Result<(StatusCode, Json<PopulatedMessage>), ApiError> {
    let caller = authenticate(&state, &headers)?;
    let message = state
        .event_router
        .send_message(SendMessageRequest {
            conversation_id: ConversationId::from(conversation_id),
            sender_id: caller,
            content: payload.content,
            attachments: payload.attachments,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(message)))
}

async fn get_history(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    headers: HeaderMap,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<MessageHistoryPage>, ApiError> {
    let caller = authenticate(&state, &headers)?;
    let page = state
        .message_service
        .get_history(GetHistoryRequest {
            conversation_id: ConversationId::from(conversation_id),
            caller_id: caller,
            before: query.before.map(MessageId::from),
            limit: query.limit,
        })
        .await?;
    Ok(Json(page))
}

async fn delete_message(
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    let caller = authenticate(&state, &headers)?;
    state
        .message_service
        .delete_message(DeleteMessageRequest {
            message_id: MessageId::from(message_id),
            caller_id: caller,
        })
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// 升级后的认证在第一帧握手里完成，见 ws_connection。
async fn websocket_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| WebSocketConnection::new(socket, state).run())
}

fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<UserId, ApiError> {
    let user_id = state.jwt_service.extract_user_from_headers(headers)?;
    Ok(UserId::from(user_id))
}
