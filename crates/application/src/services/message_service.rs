//! 消息历史与删除服务
//!
//! 基于游标的历史分页（拉取即视为已读），以及发送者本人的消息删除。

use std::collections::HashMap;
use std::sync::Arc;

use domain::{
    ConversationId, MessageId, PopulatedMessage, ServerEvent, User, UserId,
};

use crate::clock::Clock;
use crate::error::ApplicationError;
use crate::registry::ConnectionRegistry;
use crate::repository::{
    AttachmentStore, ConversationRepository, MessageRepository, ReadStateRepository,
    UserRepository,
};

const DEFAULT_PAGE_SIZE: u32 = 50;
const MAX_PAGE_SIZE: u32 = 100;

#[derive(Debug, Clone)]
pub struct GetHistoryRequest {
    pub conversation_id: ConversationId,
    pub caller_id: UserId,
    pub before: Option<MessageId>,
    pub limit: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct DeleteMessageRequest {
    pub message_id: MessageId,
    pub caller_id: UserId,
}

/// 历史分页响应。消息按时间正序排列（最旧在前）。
#[derive(Debug, Clone, serde::Serialize)]
pub struct MessageHistoryPage {
    pub messages: Vec<PopulatedMessage>,
    pub has_more: bool,
    pub next_cursor: Option<MessageId>,
}

pub struct MessageServiceDependencies {
    pub conversation_repository: Arc<dyn ConversationRepository>,
    pub message_repository: Arc<dyn MessageRepository>,
    pub read_state_repository: Arc<dyn ReadStateRepository>,
    pub user_repository: Arc<dyn UserRepository>,
    pub attachment_store: Arc<dyn AttachmentStore>,
    pub registry: Arc<ConnectionRegistry>,
    pub clock: Arc<dyn Clock>,
}

pub struct MessageService {
    deps: MessageServiceDependencies,
}

impl MessageService {
    pub fn new(deps: MessageServiceDependencies) -> Self {
        Self { deps }
    }

    /// 拉取历史消息。拉取成功即把调用者的游标推进到当前时刻并清零未读。
    pub async fn get_history(
        &self,
        request: GetHistoryRequest,
    ) -> Result<MessageHistoryPage, ApplicationError> {
        let conversation = self
            .deps
            .conversation_repository
            .find_by_id(request.conversation_id)
            .await?
            .ok_or_else(|| ApplicationError::not_found("conversation"))?;
        if !conversation.is_participant(request.caller_id) {
            return Err(ApplicationError::forbidden("read history"));
        }

        let limit = request
            .limit
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, MAX_PAGE_SIZE);

        // 多取一条判断是否还有更早的页
        let mut newest_first = self
            .deps
            .message_repository
            .list_before(conversation.id, request.before, limit + 1)
            .await?;
        let has_more = newest_first.len() > limit as usize;
        newest_first.truncate(limit as usize);
        let next_cursor = if has_more {
            newest_first.last().map(|message| message.id)
        } else {
            None
        };

        let mut senders: HashMap<UserId, User> = HashMap::new();
        let mut messages = Vec::with_capacity(newest_first.len());
        for message in newest_first.into_iter().rev() {
            let sender = match senders.get(&message.sender_id) {
                Some(user) => user.clone(),
                None => {
                    let user = self
                        .deps
                        .user_repository
                        .find_by_id(message.sender_id)
                        .await?
                        .ok_or_else(|| ApplicationError::not_found("sender"))?;
                    senders.insert(message.sender_id, user.clone());
                    user
                }
            };
            messages.push(PopulatedMessage::new(message, &sender));
        }

        self.deps
            .read_state_repository
            .clear_unread(conversation.id, request.caller_id, self.deps.clock.now())
            .await?;

        Ok(MessageHistoryPage {
            messages,
            has_more,
            next_cursor,
        })
    }

    /// 删除一条消息（仅发送者本人）。清理附件二进制，必要时把会话的
    /// 最后消息指针回退到剩余最新一条，并定向通知其他成员。
    pub async fn delete_message(
        &self,
        request: DeleteMessageRequest,
    ) -> Result<(), ApplicationError> {
        let message = self
            .deps
            .message_repository
            .find_by_id(request.message_id)
            .await?
            .ok_or_else(|| ApplicationError::not_found("message"))?;
        if message.sender_id != request.caller_id {
            return Err(ApplicationError::forbidden("delete message"));
        }

        let conversation = self
            .deps
            .conversation_repository
            .find_by_id(message.conversation_id)
            .await?
            .ok_or_else(|| ApplicationError::not_found("conversation"))?;

        for attachment in &message.attachments {
            if let Err(err) = self.deps.attachment_store.remove(&attachment.storage_key).await {
                tracing::warn!(
                    message_id = %message.id,
                    storage_key = %attachment.storage_key,
                    error = %err,
                    "附件清理失败"
                );
            }
        }
        self.deps.message_repository.delete(message.id).await?;

        if conversation.last_message == Some(message.id) {
            let latest = self
                .deps
                .message_repository
                .find_latest(conversation.id)
                .await?;
            self.deps
                .conversation_repository
                .update_last_message(
                    conversation.id,
                    latest.map(|m| m.id),
                    self.deps.clock.now(),
                )
                .await?;
        }

        let event = ServerEvent::MessageDeleted(message.clone());
        for member in &conversation.participants {
            if *member != request.caller_id {
                self.deps.registry.notify_user(*member, &event);
            }
        }
        Ok(())
    }
}
