use crate::errors::DomainError;
use crate::user::User;
use crate::value_objects::{ConversationId, MessageId, Timestamp, UserId, Username};

/// 消息附件引用。二进制内容由外部文件服务保存，这里只记录
/// 访问地址和存储键。
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Attachment {
    pub url: String,
    pub storage_key: String,
}

/// 消息实体。创建后不可变，只能被整体删除。
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    /// 文本内容，存在附件时允许为空
    pub content: String,
    pub attachments: Vec<Attachment>,
    pub created_at: Timestamp,
}

impl Message {
    pub fn new(
        id: MessageId,
        conversation_id: ConversationId,
        sender_id: UserId,
        content: impl Into<String>,
        attachments: Vec<Attachment>,
        created_at: Timestamp,
    ) -> Result<Self, DomainError> {
        let content = content.into();
        if content.trim().is_empty() && attachments.is_empty() {
            return Err(DomainError::invalid_argument(
                "content",
                "消息内容和附件不能同时为空",
            ));
        }
        if content.len() > 4096 {
            return Err(DomainError::invalid_argument("content", "too long"));
        }
        Ok(Self {
            id,
            conversation_id,
            sender_id,
            content,
            attachments,
            created_at,
        })
    }
}

/// 广播时随消息附带的发送者资料
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SenderProfile {
    pub id: UserId,
    pub username: Username,
    pub avatar_url: Option<String>,
}

impl From<&User> for SenderProfile {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            username: user.username.clone(),
            avatar_url: user.avatar_url.clone(),
        }
    }
}

/// 填充了发送者资料的消息，作为 newMessage 事件的载荷下发给客户端。
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PopulatedMessage {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender: SenderProfile,
    pub content: String,
    pub attachments: Vec<Attachment>,
    pub created_at: Timestamp,
}

impl PopulatedMessage {
    pub fn new(message: Message, sender: &User) -> Self {
        Self {
            id: message.id,
            conversation_id: message.conversation_id,
            sender: SenderProfile::from(sender),
            content: message.content,
            attachments: message.attachments,
            created_at: message.created_at,
        }
    }
}
