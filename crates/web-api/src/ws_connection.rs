//! WebSocket 连接生命周期
//!
//! 升级完成后第一帧必须是携带凭证的握手事件；认证通过才注册连接并
//! 回发 connected 确认。此后单个任务同时驱动注册表投递的出站事件和
//! 客户端的入站帧。事件处理中的业务错误转成 socketError 回发，连接
//! 保持存活；只有认证失败和对端断开会结束连接。

use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use tokio::sync::mpsc;
use uuid::Uuid;

use application::{ApplicationError, RoomKey, services::SendMessageRequest};
use domain::{ClientEvent, ConnectionId, ServerEvent, User, UserId};

use crate::state::AppState;

pub struct WebSocketConnection {
    socket: WebSocket,
    state: AppState,
}

impl WebSocketConnection {
    pub fn new(socket: WebSocket, state: AppState) -> Self {
        Self { socket, state }
    }

    pub async fn run(self) {
        let state = self.state;
        let (mut sink, mut stream) = self.socket.split();

        let user = match authenticate(&state, &mut stream).await {
            Ok(user) => user,
            Err(err) => {
                let event = socket_error(&err);
                send_event(&mut sink, &event).await;
                let _ = sink.close().await;
                tracing::info!(error = %err, "WebSocket 握手认证失败，连接已关闭");
                return;
            }
        };

        let connection_id = ConnectionId::from(Uuid::new_v4());
        let (tx, mut rx) = mpsc::unbounded_channel();
        if let Err(err) = state.registry.register(connection_id, user.id, tx) {
            let event = ServerEvent::SocketError {
                code: "AT_CAPACITY".to_string(),
                message: err.to_string(),
            };
            send_event(&mut sink, &event).await;
            let _ = sink.close().await;
            tracing::warn!(user_id = %user.id, "连接数已达上限，拒绝新连接");
            return;
        }

        tracing::info!(connection_id = %connection_id, user_id = %user.id, "WebSocket 连接已建立");
        send_event(&mut sink, &ServerEvent::Connected).await;

        loop {
            tokio::select! {
                outbound = rx.recv() => {
                    match outbound {
                        Some(event) => {
                            if !send_event(&mut sink, &event).await {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                inbound = stream.next() => {
                    match inbound {
                        Some(Ok(frame)) => {
                            if handle_frame(&state, connection_id, &user, frame, &mut sink)
                                .await
                                .is_err()
                            {
                                break;
                            }
                        }
                        Some(Err(err)) => {
                            tracing::debug!(connection_id = %connection_id, error = %err, "WebSocket 读取失败");
                            break;
                        }
                        None => break,
                    }
                }
            }
        }

        // 无论哪条分支退出，注销恰好一次
        state.registry.unregister(connection_id);
        tracing::info!(connection_id = %connection_id, user_id = %user.id, "WebSocket 连接已断开");
    }
}

/// 等待并校验第一帧握手。任何偏差都是致命的：非文本帧、
/// 非握手事件、凭证无效或用户不存在。
async fn authenticate(
    state: &AppState,
    stream: &mut SplitStream<WebSocket>,
) -> Result<User, ApplicationError> {
    let frame = loop {
        match stream.next().await {
            Some(Ok(WsMessage::Text(text))) => break text,
            Some(Ok(WsMessage::Ping(_) | WsMessage::Pong(_))) => continue,
            Some(Ok(_)) | Some(Err(_)) | None => {
                return Err(ApplicationError::authentication("握手前连接中断"));
            }
        }
    };

    let event: ClientEvent = serde_json::from_str(&frame)
        .map_err(|_| ApplicationError::authentication("第一帧必须是握手事件"))?;
    let ClientEvent::Handshake { token } = event else {
        return Err(ApplicationError::authentication("第一帧必须是握手事件"));
    };

    let claims = state
        .jwt_service
        .verify_token(&token)
        .map_err(|_| ApplicationError::authentication("握手凭证无效"))?;
    state
        .user_repository
        .find_by_id(UserId::from(claims.user_id))
        .await?
        .ok_or_else(|| ApplicationError::authentication("凭证指向的用户不存在"))
}

/// 处理一个入站帧。返回 Err 表示连接应当结束。
async fn handle_frame(
    state: &AppState,
    connection_id: ConnectionId,
    user: &User,
    frame: WsMessage,
    sink: &mut SplitSink<WebSocket, WsMessage>,
) -> Result<(), ()> {
    let text = match frame {
        WsMessage::Text(text) => text,
        WsMessage::Ping(data) => {
            let _ = sink.send(WsMessage::Pong(data)).await;
            return Ok(());
        }
        WsMessage::Pong(_) | WsMessage::Binary(_) => return Ok(()),
        WsMessage::Close(_) => return Err(()),
    };

    let event: ClientEvent = match serde_json::from_str(&text) {
        Ok(event) => event,
        Err(err) => {
            // 格式错误只回发错误事件，连接保持存活
            let event = ServerEvent::SocketError {
                code: "MALFORMED".to_string(),
                message: err.to_string(),
            };
            send_event(sink, &event).await;
            return Ok(());
        }
    };

    match event {
        ClientEvent::Handshake { .. } => {
            let event = ServerEvent::SocketError {
                code: "MALFORMED".to_string(),
                message: "连接已完成握手".to_string(),
            };
            send_event(sink, &event).await;
        }
        ClientEvent::JoinConversation { conversation_id } => {
            state
                .registry
                .join_room(connection_id, RoomKey::Conversation(conversation_id));
        }
        ClientEvent::LeaveConversation { conversation_id } => {
            state
                .registry
                .leave_room(connection_id, RoomKey::Conversation(conversation_id));
        }
        ClientEvent::SendMessage {
            conversation_id,
            content,
            attachments,
        } => {
            let result = state
                .event_router
                .send_message(SendMessageRequest {
                    conversation_id,
                    sender_id: user.id,
                    content,
                    attachments,
                })
                .await;
            if let Err(err) = result {
                send_event(sink, &socket_error(&err)).await;
            }
        }
        ClientEvent::Typing { conversation_id } => {
            state
                .event_router
                .typing_started(connection_id, conversation_id, user.username.as_str());
        }
        ClientEvent::StopTyping { conversation_id } => {
            state
                .event_router
                .typing_stopped(connection_id, conversation_id);
        }
    }
    Ok(())
}

/// 序列化并发送一个事件，返回连接是否仍然可写。
async fn send_event(sink: &mut SplitSink<WebSocket, WsMessage>, event: &ServerEvent) -> bool {
    let payload = match serde_json::to_string(event) {
        Ok(json) => json,
        Err(err) => {
            tracing::warn!(error = %err, "事件序列化失败");
            return true;
        }
    };
    sink.send(WsMessage::Text(payload.into())).await.is_ok()
}

fn socket_error(err: &ApplicationError) -> ServerEvent {
    let code = match err {
        ApplicationError::Domain(_) => "VALIDATION",
        ApplicationError::Repository(_) => "STORAGE",
        ApplicationError::NotFound { .. } => "NOT_FOUND",
        ApplicationError::Forbidden { .. } => "FORBIDDEN",
        ApplicationError::Authentication { .. } => "AUTHENTICATION_FAILED",
    };
    ServerEvent::SocketError {
        code: code.to_string(),
        message: err.to_string(),
    }
}
