//! Web API 层。
//!
//! 提供 Axum 路由，将 HTTP 请求委托给应用层服务，并承载 WebSocket
//! 连接的生命周期（握手认证、事件分发、断连清理）。

mod auth;
mod error;
mod routes;
mod state;
mod ws_connection;

pub use auth::{JwtService, RegisterResponse};
pub use config::JwtConfig;
pub use routes::router;
pub use state::AppState;
