//! 会话生命周期服务
//!
//! 会话的创建、成员变更、离开与删除。每次变更都带着对核心可见的副作用：
//! 维护受影响成员的已读游标行，并通过用户私有房间通知已连接的客户端。
//! 删除遵循"先删后通知"：级联清理完成后才向成员推送事件，避免客户端
//! 回查到已删除的状态。

use std::sync::Arc;

use domain::{
    Conversation, ConversationId, LeaveOutcome, ReadState, ServerEvent, Timestamp, UserId,
};
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::ApplicationError;
use crate::registry::ConnectionRegistry;
use crate::repository::{
    AttachmentStore, ConversationRepository, MessageRepository, ReadStateRepository,
    UserRepository,
};

#[derive(Debug, Clone)]
pub struct CreateDirectRequest {
    pub creator_id: UserId,
    pub other_id: UserId,
}

#[derive(Debug, Clone)]
pub struct CreateGroupRequest {
    pub creator_id: UserId,
    pub name: String,
    pub member_ids: Vec<UserId>,
}

#[derive(Debug, Clone)]
pub struct RenameGroupRequest {
    pub conversation_id: ConversationId,
    pub caller_id: UserId,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct AddParticipantRequest {
    pub conversation_id: ConversationId,
    pub caller_id: UserId,
    pub user_id: UserId,
}

#[derive(Debug, Clone)]
pub struct RemoveParticipantRequest {
    pub conversation_id: ConversationId,
    pub caller_id: UserId,
    pub user_id: UserId,
}

#[derive(Debug, Clone)]
pub struct LeaveGroupRequest {
    pub conversation_id: ConversationId,
    pub caller_id: UserId,
}

#[derive(Debug, Clone)]
pub struct ModifyAdminRequest {
    pub conversation_id: ConversationId,
    pub caller_id: UserId,
    pub user_id: UserId,
}

#[derive(Debug, Clone)]
pub struct DeleteConversationRequest {
    pub conversation_id: ConversationId,
    pub caller_id: UserId,
}

/// 会话列表条目：会话本体加上调用者自己的已读游标。
#[derive(Debug, Clone, serde::Serialize)]
pub struct ConversationSummary {
    #[serde(flatten)]
    pub conversation: Conversation,
    pub unread_count: i64,
    pub last_read: Option<Timestamp>,
}

pub struct ConversationServiceDependencies {
    pub conversation_repository: Arc<dyn ConversationRepository>,
    pub message_repository: Arc<dyn MessageRepository>,
    pub read_state_repository: Arc<dyn ReadStateRepository>,
    pub user_repository: Arc<dyn UserRepository>,
    pub attachment_store: Arc<dyn AttachmentStore>,
    pub registry: Arc<ConnectionRegistry>,
    pub clock: Arc<dyn Clock>,
}

pub struct ConversationService {
    deps: ConversationServiceDependencies,
}

impl ConversationService {
    pub fn new(deps: ConversationServiceDependencies) -> Self {
        Self { deps }
    }

    /// 创建一对一会话。两人之间已有会话时直接返回既有会话。
    pub async fn create_direct(
        &self,
        request: CreateDirectRequest,
    ) -> Result<Conversation, ApplicationError> {
        self.require_user(request.other_id).await?;

        if let Some(existing) = self
            .deps
            .conversation_repository
            .find_direct_between(request.creator_id, request.other_id)
            .await?
        {
            return Ok(existing);
        }

        let now = self.deps.clock.now();
        let conversation = Conversation::new_direct(
            ConversationId::from(Uuid::new_v4()),
            "One on one chat",
            request.creator_id,
            request.other_id,
            now,
        )?;
        let conversation = self
            .deps
            .conversation_repository
            .create(conversation)
            .await?;

        self.create_read_states(&conversation, now).await?;
        self.deps.registry.notify_user(
            request.other_id,
            &ServerEvent::NewConversation(conversation.clone()),
        );
        Ok(conversation)
    }

    /// 创建群组会话。创建者成为唯一初始管理员。
    pub async fn create_group(
        &self,
        request: CreateGroupRequest,
    ) -> Result<Conversation, ApplicationError> {
        for member in &request.member_ids {
            self.require_user(*member).await?;
        }

        let now = self.deps.clock.now();
        let conversation = Conversation::new_group(
            ConversationId::from(Uuid::new_v4()),
            request.name,
            request.creator_id,
            request.member_ids,
            now,
        )?;
        let conversation = self
            .deps
            .conversation_repository
            .create(conversation)
            .await?;

        self.create_read_states(&conversation, now).await?;
        let event = ServerEvent::NewConversation(conversation.clone());
        for member in &conversation.participants {
            if *member != request.creator_id {
                self.deps.registry.notify_user(*member, &event);
            }
        }
        Ok(conversation)
    }

    /// 重命名群组（仅管理员）。
    pub async fn rename_group(
        &self,
        request: RenameGroupRequest,
    ) -> Result<Conversation, ApplicationError> {
        let mut conversation = self.require_group(request.conversation_id).await?;
        self.require_admin(&conversation, request.caller_id)?;

        let now = self.deps.clock.now();
        conversation.rename(request.name, now)?;
        let conversation = self
            .deps
            .conversation_repository
            .update(conversation)
            .await?;

        let event = ServerEvent::ConversationUpdated(conversation.clone());
        for member in &conversation.participants {
            self.deps.registry.notify_user(*member, &event);
        }
        Ok(conversation)
    }

    /// 拉人进群（仅管理员）。为新成员创建已读游标并定向通知。
    pub async fn add_participant(
        &self,
        request: AddParticipantRequest,
    ) -> Result<Conversation, ApplicationError> {
        let mut conversation = self.require_group(request.conversation_id).await?;
        self.require_admin(&conversation, request.caller_id)?;
        self.require_user(request.user_id).await?;

        let now = self.deps.clock.now();
        conversation.add_participant(request.user_id, now)?;
        let conversation = self
            .deps
            .conversation_repository
            .update(conversation)
            .await?;

        self.deps
            .read_state_repository
            .upsert(ReadState::new(conversation.id, request.user_id, now))
            .await?;
        self.deps.registry.notify_user(
            request.user_id,
            &ServerEvent::NewConversation(conversation.clone()),
        );
        Ok(conversation)
    }

    /// 移出成员（仅管理员）。删除其已读游标并定向通知被移出者。
    pub async fn remove_participant(
        &self,
        request: RemoveParticipantRequest,
    ) -> Result<Conversation, ApplicationError> {
        let mut conversation = self.require_group(request.conversation_id).await?;
        self.require_admin(&conversation, request.caller_id)?;

        let now = self.deps.clock.now();
        conversation.remove_participant(request.user_id, now)?;
        let conversation = self
            .deps
            .conversation_repository
            .update(conversation)
            .await?;

        self.deps
            .read_state_repository
            .remove(conversation.id, request.user_id)
            .await?;
        self.deps.registry.notify_user(
            request.user_id,
            &ServerEvent::ConversationLeft(conversation.clone()),
        );
        Ok(conversation)
    }

    /// 成员主动退群。管理员集合被清空时恰好提升一名剩余成员；最后一名
    /// 成员离开时删除整个会话并级联清理。
    pub async fn leave_group(&self, request: LeaveGroupRequest) -> Result<(), ApplicationError> {
        let mut conversation = self.require_group(request.conversation_id).await?;
        if !conversation.is_participant(request.caller_id) {
            return Err(ApplicationError::forbidden("leave conversation"));
        }

        let now = self.deps.clock.now();
        let outcome = conversation.leave(request.caller_id, now)?;

        self.deps
            .read_state_repository
            .remove(conversation.id, request.caller_id)
            .await?;

        match outcome {
            LeaveOutcome::Deleted => {
                self.cascade_delete(&conversation).await?;
            }
            LeaveOutcome::Left | LeaveOutcome::AdminPromoted(_) => {
                let conversation = self
                    .deps
                    .conversation_repository
                    .update(conversation)
                    .await?;
                let event = ServerEvent::ConversationUpdated(conversation.clone());
                for member in &conversation.participants {
                    self.deps.registry.notify_user(*member, &event);
                }
            }
        }
        Ok(())
    }

    /// 提升管理员（仅管理员，集合语义）。
    pub async fn promote_admin(
        &self,
        request: ModifyAdminRequest,
    ) -> Result<Conversation, ApplicationError> {
        let mut conversation = self.require_group(request.conversation_id).await?;
        self.require_admin(&conversation, request.caller_id)?;

        conversation.promote_admin(request.user_id, self.deps.clock.now())?;
        Ok(self
            .deps
            .conversation_repository
            .update(conversation)
            .await?)
    }

    /// 撤销管理员（仅管理员，不允许撤销最后一名）。
    pub async fn demote_admin(
        &self,
        request: ModifyAdminRequest,
    ) -> Result<Conversation, ApplicationError> {
        let mut conversation = self.require_group(request.conversation_id).await?;
        self.require_admin(&conversation, request.caller_id)?;

        conversation.demote_admin(request.user_id, self.deps.clock.now())?;
        Ok(self
            .deps
            .conversation_repository
            .update(conversation)
            .await?)
    }

    /// 删除会话。群组仅管理员可删；一对一任一成员可删。
    /// 先删后通知：级联完成后向其余前成员推送事件。
    pub async fn delete_conversation(
        &self,
        request: DeleteConversationRequest,
    ) -> Result<(), ApplicationError> {
        let conversation = self
            .deps
            .conversation_repository
            .find_by_id(request.conversation_id)
            .await?
            .ok_or_else(|| ApplicationError::not_found("conversation"))?;

        if !conversation.is_participant(request.caller_id) {
            return Err(ApplicationError::forbidden("delete conversation"));
        }
        if conversation.is_group() {
            self.require_admin(&conversation, request.caller_id)?;
        }

        self.cascade_delete(&conversation).await?;

        let event = ServerEvent::ConversationLeft(conversation.clone());
        for member in &conversation.participants {
            if *member != request.caller_id {
                self.deps.registry.notify_user(*member, &event);
            }
        }
        Ok(())
    }

    /// 用户的会话列表，按更新时间倒序，附带本人的未读数和已读游标。
    pub async fn list_conversations(
        &self,
        user_id: UserId,
    ) -> Result<Vec<ConversationSummary>, ApplicationError> {
        let conversations = self
            .deps
            .conversation_repository
            .list_for_user(user_id)
            .await?;

        let mut summaries = Vec::with_capacity(conversations.len());
        for conversation in conversations {
            let state = self
                .deps
                .read_state_repository
                .find(conversation.id, user_id)
                .await?;
            let (unread_count, last_read) = state
                .map(|s| (s.unread_count, s.last_read))
                .unwrap_or((0, None));
            summaries.push(ConversationSummary {
                conversation,
                unread_count,
                last_read,
            });
        }
        Ok(summaries)
    }

    async fn require_user(&self, user_id: UserId) -> Result<(), ApplicationError> {
        self.deps
            .user_repository
            .find_by_id(user_id)
            .await?
            .ok_or_else(|| ApplicationError::not_found("user"))?;
        Ok(())
    }

    async fn require_group(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Conversation, ApplicationError> {
        let conversation = self
            .deps
            .conversation_repository
            .find_by_id(conversation_id)
            .await?
            .ok_or_else(|| ApplicationError::not_found("conversation"))?;
        if !conversation.is_group() {
            return Err(ApplicationError::forbidden("group operation"));
        }
        Ok(conversation)
    }

    fn require_admin(
        &self,
        conversation: &Conversation,
        caller_id: UserId,
    ) -> Result<(), ApplicationError> {
        if !conversation.is_admin(caller_id) {
            return Err(ApplicationError::forbidden("admin operation"));
        }
        Ok(())
    }

    async fn create_read_states(
        &self,
        conversation: &Conversation,
        now: Timestamp,
    ) -> Result<(), ApplicationError> {
        for member in &conversation.participants {
            self.deps
                .read_state_repository
                .upsert(ReadState::new(conversation.id, *member, now))
                .await?;
        }
        Ok(())
    }

    /// 级联删除：消息及其附件二进制、已读游标行、会话记录。
    /// 附件清理失败记录日志后继续，不阻断删除。
    async fn cascade_delete(&self, conversation: &Conversation) -> Result<(), ApplicationError> {
        let messages = self
            .deps
            .message_repository
            .delete_all_in_conversation(conversation.id)
            .await?;
        for message in &messages {
            for attachment in &message.attachments {
                if let Err(err) = self.deps.attachment_store.remove(&attachment.storage_key).await
                {
                    tracing::warn!(
                        conversation_id = %conversation.id,
                        storage_key = %attachment.storage_key,
                        error = %err,
                        "附件清理失败"
                    );
                }
            }
        }
        self.deps
            .read_state_repository
            .remove_all_for_conversation(conversation.id)
            .await?;
        self.deps
            .conversation_repository
            .delete(conversation.id)
            .await?;
        Ok(())
    }
}
