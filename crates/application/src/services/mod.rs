mod conversation_service;
mod event_router;
mod message_service;

#[cfg(test)]
mod test_support;

#[cfg(test)]
mod message_service_tests;

pub use conversation_service::{
    AddParticipantRequest, ConversationService, ConversationServiceDependencies,
    ConversationSummary, CreateDirectRequest, CreateGroupRequest, DeleteConversationRequest,
    LeaveGroupRequest, ModifyAdminRequest, RemoveParticipantRequest, RenameGroupRequest,
};
pub use event_router::{EventRouter, EventRouterDependencies, SendMessageRequest};
pub use message_service::{
    DeleteMessageRequest, GetHistoryRequest, MessageHistoryPage, MessageService,
    MessageServiceDependencies,
};
