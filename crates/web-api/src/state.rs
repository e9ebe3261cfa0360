use std::sync::Arc;

use application::{
    Clock, ConnectionRegistry, UserRepository,
    services::{ConversationService, EventRouter, MessageService},
};

use crate::JwtService;

#[derive(Clone)]
pub struct AppState {
    pub event_router: Arc<EventRouter>,
    pub conversation_service: Arc<ConversationService>,
    pub message_service: Arc<MessageService>,
    pub user_repository: Arc<dyn UserRepository>,
    pub registry: Arc<ConnectionRegistry>,
    pub jwt_service: Arc<JwtService>,
    pub clock: Arc<dyn Clock>,
}
