//! 存储端口定义
//!
//! 核心只通过这些窄接口访问持久化状态。已读游标的 `mark_read` /
//! `increment_unread` 必须由实现方按 (会话, 用户) 键原子执行，
//! 并发递增不允许丢失。

use async_trait::async_trait;
use domain::{
    Conversation, ConversationId, Message, MessageId, ReadState, RepositoryResult, Timestamp,
    User, UserId, Username,
};

/// 用户存储。账号由认证子系统管理，这里只有资料读取和测试/开发用的写入。
#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn create(&self, user: User) -> RepositoryResult<User>;
    async fn find_by_id(&self, id: UserId) -> RepositoryResult<Option<User>>;
    async fn find_by_username(&self, username: &Username) -> RepositoryResult<Option<User>>;
}

/// 会话存储
#[async_trait]
pub trait ConversationRepository: Send + Sync {
    async fn create(&self, conversation: Conversation) -> RepositoryResult<Conversation>;
    async fn update(&self, conversation: Conversation) -> RepositoryResult<Conversation>;
    async fn delete(&self, id: ConversationId) -> RepositoryResult<()>;
    async fn find_by_id(&self, id: ConversationId) -> RepositoryResult<Option<Conversation>>;
    /// 查找两名用户之间已存在的一对一会话
    async fn find_direct_between(
        &self,
        a: UserId,
        b: UserId,
    ) -> RepositoryResult<Option<Conversation>>;
    /// 用户参与的全部会话，按更新时间倒序
    async fn list_for_user(&self, user_id: UserId) -> RepositoryResult<Vec<Conversation>>;
    async fn update_last_message(
        &self,
        id: ConversationId,
        message_id: Option<MessageId>,
        now: Timestamp,
    ) -> RepositoryResult<()>;
}

/// 消息存储
#[async_trait]
pub trait MessageRepository: Send + Sync {
    async fn create(&self, message: Message) -> RepositoryResult<Message>;
    async fn find_by_id(&self, id: MessageId) -> RepositoryResult<Option<Message>>;
    /// 游标分页：返回 `before` 之前的消息，按创建时间倒序，最多 `limit` 条。
    /// `before` 为 None 时从最新一条开始。
    async fn list_before(
        &self,
        conversation_id: ConversationId,
        before: Option<MessageId>,
        limit: u32,
    ) -> RepositoryResult<Vec<Message>>;
    /// 会话中最新的一条消息
    async fn find_latest(
        &self,
        conversation_id: ConversationId,
    ) -> RepositoryResult<Option<Message>>;
    async fn delete(&self, id: MessageId) -> RepositoryResult<()>;
    /// 删除会话的全部消息，返回被删除的消息用于附件清理
    async fn delete_all_in_conversation(
        &self,
        conversation_id: ConversationId,
    ) -> RepositoryResult<Vec<Message>>;
}

/// 已读游标存储。
///
/// `mark_read` / `clear_unread` / `increment_unread` 是原子操作：
/// 实现必须在存储层串行化同一键上的并发更新（SQL 原子自增或行锁；
/// 内存实现持锁完成读改写），不允许应用层先读后写。
#[async_trait]
pub trait ReadStateRepository: Send + Sync {
    async fn upsert(&self, state: ReadState) -> RepositoryResult<ReadState>;
    async fn find(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
    ) -> RepositoryResult<Option<ReadState>>;
    /// 原子推进已读时间戳，未读数保持不变
    async fn mark_read(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
        now: Timestamp,
    ) -> RepositoryResult<()>;
    /// 原子推进已读时间戳并清零未读数
    async fn clear_unread(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
        now: Timestamp,
    ) -> RepositoryResult<()>;
    /// 原子未读数 +1
    async fn increment_unread(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
    ) -> RepositoryResult<()>;
    async fn remove(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
    ) -> RepositoryResult<()>;
    async fn remove_all_for_conversation(
        &self,
        conversation_id: ConversationId,
    ) -> RepositoryResult<()>;
}

/// 附件二进制内容的外部存储。删除失败由调用方记录日志后忽略，
/// 不阻断消息或会话的删除流程。
#[async_trait]
pub trait AttachmentStore: Send + Sync {
    async fn remove(&self, storage_key: &str) -> RepositoryResult<()>;
}
