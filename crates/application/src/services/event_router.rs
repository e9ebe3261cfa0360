//! 事件路由器：消息发送与输入指示
//!
//! 单条发送在一个顺序任务里完成：校验 → 落库 → 在线状态 → 已读游标 →
//! 最后消息指针 → 广播。只有存储调用和在线状态查询是挂起点；任何持久化
//! 失败都发生在广播之前，未落库的消息不会被扇出。

use std::sync::Arc;

use domain::{
    Attachment, ConnectionId, ConversationId, Message, MessageId, PopulatedMessage, ServerEvent,
    UserId,
};
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::ApplicationError;
use crate::presence::PresenceOracle;
use crate::registry::{ConnectionRegistry, RoomKey};
use crate::repository::{
    ConversationRepository, MessageRepository, ReadStateRepository, UserRepository,
};

#[derive(Debug, Clone)]
pub struct SendMessageRequest {
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub content: String,
    pub attachments: Vec<Attachment>,
}

pub struct EventRouterDependencies {
    pub conversation_repository: Arc<dyn ConversationRepository>,
    pub message_repository: Arc<dyn MessageRepository>,
    pub user_repository: Arc<dyn UserRepository>,
    pub read_state_repository: Arc<dyn ReadStateRepository>,
    pub presence: Arc<dyn PresenceOracle>,
    pub registry: Arc<ConnectionRegistry>,
    pub clock: Arc<dyn Clock>,
}

pub struct EventRouter {
    deps: EventRouterDependencies,
}

impl EventRouter {
    pub fn new(deps: EventRouterDependencies) -> Self {
        Self { deps }
    }

    /// 消息发送主路径。
    ///
    /// 已读游标规则：发送者与在线成员推进 lastRead、未读数不动；离线
    /// 成员未读数原子 +1，并向其用户私有房间定向推送。房间广播发给
    /// 房间内全部连接，与步骤 5 的在线成员集合无关。
    pub async fn send_message(
        &self,
        request: SendMessageRequest,
    ) -> Result<PopulatedMessage, ApplicationError> {
        let conversation = self
            .deps
            .conversation_repository
            .find_by_id(request.conversation_id)
            .await?
            .ok_or_else(|| ApplicationError::not_found("conversation"))?;

        if !conversation.is_participant(request.sender_id) {
            return Err(ApplicationError::forbidden("send message"));
        }

        let sender = self
            .deps
            .user_repository
            .find_by_id(request.sender_id)
            .await?
            .ok_or_else(|| ApplicationError::not_found("sender"))?;

        let now = self.deps.clock.now();
        let message = Message::new(
            MessageId::from(Uuid::new_v4()),
            conversation.id,
            request.sender_id,
            request.content,
            request.attachments,
            now,
        )?;
        let message = self.deps.message_repository.create(message).await?;
        let populated = PopulatedMessage::new(message, &sender);

        let online = self
            .deps
            .presence
            .online_in_room(conversation.id, &conversation.participants)
            .await;

        let mut offline_members = Vec::new();
        for member in &conversation.participants {
            let is_sender = *member == request.sender_id;
            if is_sender || online.contains(member) {
                self.deps
                    .read_state_repository
                    .mark_read(conversation.id, *member, now)
                    .await?;
            } else {
                self.deps
                    .read_state_repository
                    .increment_unread(conversation.id, *member)
                    .await?;
                offline_members.push(*member);
            }
        }

        self.deps
            .conversation_repository
            .update_last_message(conversation.id, Some(populated.id), now)
            .await?;

        // 全部持久化完成之后才扇出
        let event = ServerEvent::NewMessage(populated.clone());
        for member in offline_members {
            self.deps.registry.notify_user(member, &event);
        }
        self.deps
            .registry
            .broadcast(RoomKey::Conversation(conversation.id), &event);

        Ok(populated)
    }

    /// 输入指示：向房间内其他连接广播发送者正在输入。尽力而为，
    /// 不校验成员资格，不持久化，永不向客户端报错。
    pub fn typing_started(
        &self,
        connection_id: ConnectionId,
        conversation_id: ConversationId,
        username: &str,
    ) {
        self.deps.registry.broadcast_except(
            RoomKey::Conversation(conversation_id),
            connection_id,
            &ServerEvent::Typing {
                username: username.to_string(),
            },
        );
    }

    /// 停止输入，无载荷。
    pub fn typing_stopped(&self, connection_id: ConnectionId, conversation_id: ConversationId) {
        self.deps.registry.broadcast_except(
            RoomKey::Conversation(conversation_id),
            connection_id,
            &ServerEvent::StopTyping,
        );
    }

    /// 向某用户私有房间定向投递事件，离线时静默无操作。
    pub fn notify_user(&self, user_id: UserId, event: &ServerEvent) {
        self.deps.registry.notify_user(user_id, event);
    }
}
