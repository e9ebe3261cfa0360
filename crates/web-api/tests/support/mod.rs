//! 集成测试支撑：内存存储装配的完整路由，跑在真实端口上。

use std::net::SocketAddr;
use std::sync::Arc;

use application::{
    ConnectionRegistry, MemoryStorage, RegistryPresence, SystemClock,
    services::{
        ConversationService, ConversationServiceDependencies, EventRouter,
        EventRouterDependencies, MessageService, MessageServiceDependencies,
    },
};
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use reqwest::Client;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio_tungstenite::{
    connect_async, tungstenite::Message as TungsteniteMessage, MaybeTlsStream, WebSocketStream,
};
use web_api::{router, AppState, JwtConfig, JwtService};

pub type WsClient = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

pub fn build_router() -> Router {
    let storage = MemoryStorage::new();
    let registry = Arc::new(ConnectionRegistry::new(64));
    let clock = Arc::new(SystemClock);
    let presence = Arc::new(RegistryPresence::new(registry.clone()));
    let jwt_service = Arc::new(JwtService::new(JwtConfig {
        secret: "integration-test-secret-with-enough-length".to_string(),
        expiration_hours: 1,
    }));

    let event_router = Arc::new(EventRouter::new(EventRouterDependencies {
        conversation_repository: Arc::new(storage.clone()),
        message_repository: Arc::new(storage.clone()),
        user_repository: Arc::new(storage.clone()),
        read_state_repository: Arc::new(storage.clone()),
        presence,
        registry: registry.clone(),
        clock: clock.clone(),
    }));
    let conversation_service = Arc::new(ConversationService::new(
        ConversationServiceDependencies {
            conversation_repository: Arc::new(storage.clone()),
            message_repository: Arc::new(storage.clone()),
            read_state_repository: Arc::new(storage.clone()),
            user_repository: Arc::new(storage.clone()),
            attachment_store: Arc::new(storage.clone()),
            registry: registry.clone(),
            clock: clock.clone(),
        },
    ));
    let message_service = Arc::new(MessageService::new(MessageServiceDependencies {
        conversation_repository: Arc::new(storage.clone()),
        message_repository: Arc::new(storage.clone()),
        read_state_repository: Arc::new(storage.clone()),
        user_repository: Arc::new(storage.clone()),
        attachment_store: Arc::new(storage.clone()),
        registry: registry.clone(),
        clock: clock.clone(),
    }));

    router(AppState {
        event_router,
        conversation_service,
        message_service,
        user_repository: Arc::new(storage),
        registry,
        jwt_service,
        clock,
    })
}

/// 启动测试服务器，返回监听地址。
pub async fn spawn_server() -> SocketAddr {
    let app = build_router();
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        axum::serve(listener, app.into_make_service()).await.ok();
    });
    addr
}

/// 注册一个用户，返回 (user json, token)。
pub async fn register(client: &Client, addr: SocketAddr, username: &str) -> (Value, String) {
    let response = client
        .post(format!("http://{addr}/api/v1/auth/register"))
        .json(&json!({ "username": username }))
        .send()
        .await
        .expect("register request");
    assert_eq!(response.status(), reqwest::StatusCode::CREATED);
    let body: Value = response.json().await.expect("register json");
    let token = body["token"].as_str().expect("token").to_string();
    (body["user"].clone(), token)
}

/// 建立 WebSocket 连接并完成握手，消费 connected 确认帧。
pub async fn connect_ws(addr: SocketAddr, token: &str) -> WsClient {
    let (mut ws, _) = connect_async(format!("ws://{addr}/api/v1/ws"))
        .await
        .expect("ws connect");
    ws.send(TungsteniteMessage::Text(
        json!({ "event": "handshake", "payload": { "token": token } })
            .to_string()
            .into(),
    ))
    .await
    .expect("send handshake");

    let ack = recv_event(&mut ws).await.expect("handshake ack");
    assert_eq!(ack["event"], "connected");
    ws
}

/// 读取下一个文本事件帧并解析为 JSON。
pub async fn recv_event(ws: &mut WsClient) -> Option<Value> {
    loop {
        let frame = tokio::time::timeout(std::time::Duration::from_secs(2), ws.next())
            .await
            .ok()??;
        match frame.ok()? {
            TungsteniteMessage::Text(text) => {
                return serde_json::from_str(&text).ok();
            }
            TungsteniteMessage::Close(_) => return None,
            _ => continue,
        }
    }
}

/// 发送一个客户端事件帧。
pub async fn send_event(ws: &mut WsClient, event: Value) {
    ws.send(TungsteniteMessage::Text(event.to_string().into()))
        .await
        .expect("send event");
}
