//! 全部存储端口的内存实现
//!
//! 供单元/集成测试以及未配置数据库时的本地运行使用。已读游标的
//! 读改写在 map 写锁内完成，满足端口要求的按键原子性。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use domain::{
    Conversation, ConversationId, ConversationKind, Message, MessageId, ReadState,
    RepositoryError, RepositoryResult, Timestamp, User, UserId, Username,
};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::repository::{
    AttachmentStore, ConversationRepository, MessageRepository, ReadStateRepository,
    UserRepository,
};

#[derive(Default)]
struct MemoryInner {
    users: HashMap<UserId, User>,
    conversations: HashMap<ConversationId, Conversation>,
    messages: HashMap<MessageId, Message>,
    read_states: HashMap<(ConversationId, UserId), ReadState>,
    removed_blobs: Vec<String>,
}

/// 内存存储。克隆共享同一份状态。
#[derive(Clone, Default)]
pub struct MemoryStorage {
    inner: Arc<RwLock<MemoryInner>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// 已被"删除"的附件存储键（测试断言级联清理用）。
    pub async fn removed_blob_keys(&self) -> Vec<String> {
        self.inner.read().await.removed_blobs.clone()
    }
}

#[async_trait]
impl UserRepository for MemoryStorage {
    async fn create(&self, user: User) -> RepositoryResult<User> {
        let mut inner = self.inner.write().await;
        inner.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn find_by_id(&self, id: UserId) -> RepositoryResult<Option<User>> {
        Ok(self.inner.read().await.users.get(&id).cloned())
    }

    async fn find_by_username(&self, username: &Username) -> RepositoryResult<Option<User>> {
        Ok(self
            .inner
            .read()
            .await
            .users
            .values()
            .find(|user| user.username == *username)
            .cloned())
    }
}

#[async_trait]
impl ConversationRepository for MemoryStorage {
    async fn create(&self, conversation: Conversation) -> RepositoryResult<Conversation> {
        let mut inner = self.inner.write().await;
        inner
            .conversations
            .insert(conversation.id, conversation.clone());
        Ok(conversation)
    }

    async fn update(&self, conversation: Conversation) -> RepositoryResult<Conversation> {
        let mut inner = self.inner.write().await;
        if !inner.conversations.contains_key(&conversation.id) {
            return Err(RepositoryError::storage("conversation missing on update"));
        }
        inner
            .conversations
            .insert(conversation.id, conversation.clone());
        Ok(conversation)
    }

    async fn delete(&self, id: ConversationId) -> RepositoryResult<()> {
        let mut inner = self.inner.write().await;
        inner.conversations.remove(&id);
        Ok(())
    }

    async fn find_by_id(&self, id: ConversationId) -> RepositoryResult<Option<Conversation>> {
        Ok(self.inner.read().await.conversations.get(&id).cloned())
    }

    async fn find_direct_between(
        &self,
        a: UserId,
        b: UserId,
    ) -> RepositoryResult<Option<Conversation>> {
        Ok(self
            .inner
            .read()
            .await
            .conversations
            .values()
            .find(|conversation| {
                conversation.kind == ConversationKind::Direct
                    && conversation.is_participant(a)
                    && conversation.is_participant(b)
            })
            .cloned())
    }

    async fn list_for_user(&self, user_id: UserId) -> RepositoryResult<Vec<Conversation>> {
        let inner = self.inner.read().await;
        let mut items: Vec<Conversation> = inner
            .conversations
            .values()
            .filter(|conversation| conversation.is_participant(user_id))
            .cloned()
            .collect();
        items.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(items)
    }

    async fn update_last_message(
        &self,
        id: ConversationId,
        message_id: Option<MessageId>,
        now: Timestamp,
    ) -> RepositoryResult<()> {
        let mut inner = self.inner.write().await;
        let conversation = inner
            .conversations
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::storage("conversation missing on update"))?;
        conversation.record_last_message(message_id, now);
        Ok(())
    }
}

#[async_trait]
impl MessageRepository for MemoryStorage {
    async fn create(&self, message: Message) -> RepositoryResult<Message> {
        let mut inner = self.inner.write().await;
        inner.messages.insert(message.id, message.clone());
        Ok(message)
    }

    async fn find_by_id(&self, id: MessageId) -> RepositoryResult<Option<Message>> {
        Ok(self.inner.read().await.messages.get(&id).cloned())
    }

    async fn list_before(
        &self,
        conversation_id: ConversationId,
        before: Option<MessageId>,
        limit: u32,
    ) -> RepositoryResult<Vec<Message>> {
        let inner = self.inner.read().await;
        // 游标按 (created_at, id) 元组比较，时间戳相同的消息不会跨页丢失
        let cutoff = match before {
            Some(id) => match inner.messages.get(&id) {
                Some(message) => Some((message.created_at, Uuid::from(message.id))),
                None => return Ok(Vec::new()),
            },
            None => None,
        };
        let mut items: Vec<Message> = inner
            .messages
            .values()
            .filter(|message| message.conversation_id == conversation_id)
            .filter(|message| {
                cutoff.map_or(true, |cutoff| {
                    (message.created_at, Uuid::from(message.id)) < cutoff
                })
            })
            .cloned()
            .collect();
        items.sort_by(|a, b| {
            (b.created_at, Uuid::from(b.id)).cmp(&(a.created_at, Uuid::from(a.id)))
        });
        items.truncate(limit as usize);
        Ok(items)
    }

    async fn find_latest(
        &self,
        conversation_id: ConversationId,
    ) -> RepositoryResult<Option<Message>> {
        let inner = self.inner.read().await;
        Ok(inner
            .messages
            .values()
            .filter(|message| message.conversation_id == conversation_id)
            .max_by_key(|message| (message.created_at, Uuid::from(message.id)))
            .cloned())
    }

    async fn delete(&self, id: MessageId) -> RepositoryResult<()> {
        let mut inner = self.inner.write().await;
        inner.messages.remove(&id);
        Ok(())
    }

    async fn delete_all_in_conversation(
        &self,
        conversation_id: ConversationId,
    ) -> RepositoryResult<Vec<Message>> {
        let mut inner = self.inner.write().await;
        let removed_ids: Vec<MessageId> = inner
            .messages
            .values()
            .filter(|message| message.conversation_id == conversation_id)
            .map(|message| message.id)
            .collect();
        let mut removed = Vec::with_capacity(removed_ids.len());
        for id in removed_ids {
            if let Some(message) = inner.messages.remove(&id) {
                removed.push(message);
            }
        }
        Ok(removed)
    }
}

#[async_trait]
impl ReadStateRepository for MemoryStorage {
    async fn upsert(&self, state: ReadState) -> RepositoryResult<ReadState> {
        let mut inner = self.inner.write().await;
        inner
            .read_states
            .insert((state.conversation_id, state.user_id), state.clone());
        Ok(state)
    }

    async fn find(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
    ) -> RepositoryResult<Option<ReadState>> {
        Ok(self
            .inner
            .read()
            .await
            .read_states
            .get(&(conversation_id, user_id))
            .cloned())
    }

    async fn mark_read(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
        now: Timestamp,
    ) -> RepositoryResult<()> {
        let mut inner = self.inner.write().await;
        if let Some(state) = inner.read_states.get_mut(&(conversation_id, user_id)) {
            state.mark_read(now);
        }
        Ok(())
    }

    async fn clear_unread(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
        now: Timestamp,
    ) -> RepositoryResult<()> {
        let mut inner = self.inner.write().await;
        if let Some(state) = inner.read_states.get_mut(&(conversation_id, user_id)) {
            state.clear_unread(now);
        }
        Ok(())
    }

    async fn increment_unread(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
    ) -> RepositoryResult<()> {
        // 写锁内读改写，并发递增不丢失
        let mut inner = self.inner.write().await;
        if let Some(state) = inner.read_states.get_mut(&(conversation_id, user_id)) {
            state.increment_unread();
        }
        Ok(())
    }

    async fn remove(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
    ) -> RepositoryResult<()> {
        let mut inner = self.inner.write().await;
        inner.read_states.remove(&(conversation_id, user_id));
        Ok(())
    }

    async fn remove_all_for_conversation(
        &self,
        conversation_id: ConversationId,
    ) -> RepositoryResult<()> {
        let mut inner = self.inner.write().await;
        inner
            .read_states
            .retain(|(conversation, _), _| *conversation != conversation_id);
        Ok(())
    }
}

#[async_trait]
impl AttachmentStore for MemoryStorage {
    async fn remove(&self, storage_key: &str) -> RepositoryResult<()> {
        let mut inner = self.inner.write().await;
        inner.removed_blobs.push(storage_key.to_string());
        Ok(())
    }
}
