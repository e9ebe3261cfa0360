//! 聊天系统核心领域模型
//!
//! 包含用户、会话、消息、已读游标等核心实体，以及连接层的事件协议。

pub mod conversation;
pub mod errors;
pub mod events;
pub mod message;
pub mod read_state;
pub mod user;
pub mod value_objects;

// 重新导出常用类型
pub use conversation::{Conversation, ConversationKind, LeaveOutcome};
pub use errors::{DomainError, DomainResult, RepositoryError, RepositoryResult};
pub use events::{ClientEvent, ServerEvent};
pub use message::{Attachment, Message, PopulatedMessage, SenderProfile};
pub use read_state::ReadState;
pub use user::User;
pub use value_objects::{ConnectionId, ConversationId, MessageId, Timestamp, UserId, Username};
