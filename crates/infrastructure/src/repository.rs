//! 存储端口的 PostgreSQL 实现
//!
//! 每个仓储持有一个连接池克隆。涉及多表的写入（会话与成员、消息与附件）
//! 在事务里完成；已读游标的推进和未读数自增由单条 SQL 原子执行。

use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::{postgres::PgPoolOptions, FromRow, PgPool};
use uuid::Uuid;

use application::{
    ConversationRepository, MessageRepository, ReadStateRepository, UserRepository,
};
use domain::{
    Attachment, Conversation, ConversationId, ConversationKind, Message, MessageId, ReadState,
    RepositoryError, RepositoryResult, Timestamp, User, UserId, Username,
};

/// 建立连接池。迁移由宿主进程在启动时执行。
pub async fn connect_pool(url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(url)
        .await
}

fn map_sqlx_err(err: sqlx::Error) -> RepositoryError {
    RepositoryError::storage(err.to_string())
}

fn invalid_data(message: impl Into<String>) -> RepositoryError {
    RepositoryError::corrupted(message)
}

#[derive(Debug, FromRow)]
struct UserRecord {
    id: Uuid,
    username: String,
    avatar_url: Option<String>,
    created_at: Timestamp,
}

impl TryFrom<UserRecord> for User {
    type Error = RepositoryError;

    fn try_from(value: UserRecord) -> Result<Self, Self::Error> {
        let username =
            Username::parse(value.username).map_err(|err| invalid_data(err.to_string()))?;
        Ok(User {
            id: UserId::from(value.id),
            username,
            avatar_url: value.avatar_url,
            created_at: value.created_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct ConversationRecord {
    id: Uuid,
    name: String,
    is_group: bool,
    last_message_id: Option<Uuid>,
    created_at: Timestamp,
    updated_at: Timestamp,
}

#[derive(Debug, FromRow)]
struct MemberRecord {
    user_id: Uuid,
    is_admin: bool,
}

impl ConversationRecord {
    fn into_conversation(self, members: Vec<MemberRecord>) -> Conversation {
        let mut participants = Vec::with_capacity(members.len());
        let mut admins = Vec::new();
        for member in members {
            let user_id = UserId::from(member.user_id);
            participants.push(user_id);
            if member.is_admin {
                admins.push(user_id);
            }
        }
        Conversation {
            id: ConversationId::from(self.id),
            name: self.name,
            kind: if self.is_group {
                ConversationKind::Group
            } else {
                ConversationKind::Direct
            },
            participants,
            admins,
            last_message: self.last_message_id.map(MessageId::from),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct MessageRecord {
    id: Uuid,
    conversation_id: Uuid,
    sender_id: Uuid,
    content: String,
    created_at: Timestamp,
}

impl MessageRecord {
    fn into_message(self, attachments: Vec<Attachment>) -> Message {
        Message {
            id: MessageId::from(self.id),
            conversation_id: ConversationId::from(self.conversation_id),
            sender_id: UserId::from(self.sender_id),
            content: self.content,
            attachments,
            created_at: self.created_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct AttachmentRecord {
    message_id: Uuid,
    url: String,
    storage_key: String,
}

#[derive(Debug, FromRow)]
struct ReadStateRecord {
    conversation_id: Uuid,
    user_id: Uuid,
    last_read: Option<Timestamp>,
    unread_count: i64,
}

impl From<ReadStateRecord> for ReadState {
    fn from(value: ReadStateRecord) -> Self {
        ReadState {
            conversation_id: ConversationId::from(value.conversation_id),
            user_id: UserId::from(value.user_id),
            last_read: value.last_read,
            unread_count: value.unread_count,
        }
    }
}

#[derive(Clone)]
pub struct PgUserRepository {
    pool: PgPool,
}

impl PgUserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserRepository for PgUserRepository {
    async fn create(&self, user: User) -> RepositoryResult<User> {
        let record = sqlx::query_as::<_, UserRecord>(
            r#"
            INSERT INTO users (id, username, avatar_url, created_at)
            VALUES ($1, $2, $3, $4)
            RETURNING id, username, avatar_url, created_at
            "#,
        )
        .bind(Uuid::from(user.id))
        .bind(user.username.as_str())
        .bind(&user.avatar_url)
        .bind(user.created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        User::try_from(record)
    }

    async fn find_by_id(&self, id: UserId) -> RepositoryResult<Option<User>> {
        let record = sqlx::query_as::<_, UserRecord>(
            r#"SELECT id, username, avatar_url, created_at FROM users WHERE id = $1"#,
        )
        .bind(Uuid::from(id))
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        record.map(User::try_from).transpose()
    }

    async fn find_by_username(&self, username: &Username) -> RepositoryResult<Option<User>> {
        let record = sqlx::query_as::<_, UserRecord>(
            r#"SELECT id, username, avatar_url, created_at FROM users WHERE username = $1"#,
        )
        .bind(username.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        record.map(User::try_from).transpose()
    }
}

#[derive(Clone)]
pub struct PgConversationRepository {
    pool: PgPool,
}

impl PgConversationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn load_members(&self, id: Uuid) -> RepositoryResult<Vec<MemberRecord>> {
        sqlx::query_as::<_, MemberRecord>(
            r#"
            SELECT user_id, is_admin FROM conversation_members
            WHERE conversation_id = $1 ORDER BY ordinal
            "#,
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)
    }
}

#[async_trait]
impl ConversationRepository for PgConversationRepository {
    async fn create(&self, conversation: Conversation) -> RepositoryResult<Conversation> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_err)?;

        sqlx::query(
            r#"
            INSERT INTO conversations (id, name, is_group, last_message_id, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(Uuid::from(conversation.id))
        .bind(&conversation.name)
        .bind(conversation.is_group())
        .bind(conversation.last_message.map(Uuid::from))
        .bind(conversation.created_at)
        .bind(conversation.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_err)?;

        for (ordinal, member) in conversation.participants.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO conversation_members (conversation_id, user_id, is_admin, ordinal)
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(Uuid::from(conversation.id))
            .bind(Uuid::from(*member))
            .bind(conversation.is_admin(*member))
            .bind(ordinal as i32)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_err)?;
        }

        tx.commit().await.map_err(map_sqlx_err)?;
        Ok(conversation)
    }

    async fn update(&self, conversation: Conversation) -> RepositoryResult<Conversation> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_err)?;

        let result = sqlx::query(
            r#"
            UPDATE conversations
            SET name = $2, last_message_id = $3, updated_at = $4
            WHERE id = $1
            "#,
        )
        .bind(Uuid::from(conversation.id))
        .bind(&conversation.name)
        .bind(conversation.last_message.map(Uuid::from))
        .bind(conversation.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_err)?;
        if result.rows_affected() == 0 {
            return Err(RepositoryError::storage("会话不存在"));
        }

        // 成员集合整体替换，保持领域对象里的顺序
        sqlx::query(r#"DELETE FROM conversation_members WHERE conversation_id = $1"#)
            .bind(Uuid::from(conversation.id))
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_err)?;
        for (ordinal, member) in conversation.participants.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO conversation_members (conversation_id, user_id, is_admin, ordinal)
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(Uuid::from(conversation.id))
            .bind(Uuid::from(*member))
            .bind(conversation.is_admin(*member))
            .bind(ordinal as i32)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_err)?;
        }

        tx.commit().await.map_err(map_sqlx_err)?;
        Ok(conversation)
    }

    async fn delete(&self, id: ConversationId) -> RepositoryResult<()> {
        // 成员、消息、附件、已读游标由外键级联删除
        sqlx::query(r#"DELETE FROM conversations WHERE id = $1"#)
            .bind(Uuid::from(id))
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        Ok(())
    }

    async fn find_by_id(&self, id: ConversationId) -> RepositoryResult<Option<Conversation>> {
        let record = sqlx::query_as::<_, ConversationRecord>(
            r#"
            SELECT id, name, is_group, last_message_id, created_at, updated_at
            FROM conversations WHERE id = $1
            "#,
        )
        .bind(Uuid::from(id))
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        match record {
            Some(record) => {
                let members = self.load_members(record.id).await?;
                Ok(Some(record.into_conversation(members)))
            }
            None => Ok(None),
        }
    }

    async fn find_direct_between(
        &self,
        a: UserId,
        b: UserId,
    ) -> RepositoryResult<Option<Conversation>> {
        let record = sqlx::query_as::<_, ConversationRecord>(
            r#"
            SELECT c.id, c.name, c.is_group, c.last_message_id, c.created_at, c.updated_at
            FROM conversations c
            WHERE c.is_group = FALSE
              AND EXISTS (
                SELECT 1 FROM conversation_members
                WHERE conversation_id = c.id AND user_id = $1
              )
              AND EXISTS (
                SELECT 1 FROM conversation_members
                WHERE conversation_id = c.id AND user_id = $2
              )
            LIMIT 1
            "#,
        )
        .bind(Uuid::from(a))
        .bind(Uuid::from(b))
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        match record {
            Some(record) => {
                let members = self.load_members(record.id).await?;
                Ok(Some(record.into_conversation(members)))
            }
            None => Ok(None),
        }
    }

    async fn list_for_user(&self, user_id: UserId) -> RepositoryResult<Vec<Conversation>> {
        let records = sqlx::query_as::<_, ConversationRecord>(
            r#"
            SELECT c.id, c.name, c.is_group, c.last_message_id, c.created_at, c.updated_at
            FROM conversations c
            JOIN conversation_members m ON m.conversation_id = c.id
            WHERE m.user_id = $1
            ORDER BY c.updated_at DESC
            "#,
        )
        .bind(Uuid::from(user_id))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        let mut conversations = Vec::with_capacity(records.len());
        for record in records {
            let members = self.load_members(record.id).await?;
            conversations.push(record.into_conversation(members));
        }
        Ok(conversations)
    }

    async fn update_last_message(
        &self,
        id: ConversationId,
        message_id: Option<MessageId>,
        now: Timestamp,
    ) -> RepositoryResult<()> {
        sqlx::query(
            r#"UPDATE conversations SET last_message_id = $2, updated_at = $3 WHERE id = $1"#,
        )
        .bind(Uuid::from(id))
        .bind(message_id.map(Uuid::from))
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(())
    }
}

#[derive(Clone)]
pub struct PgMessageRepository {
    pool: PgPool,
}

impl PgMessageRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn load_attachments(
        &self,
        message_ids: &[Uuid],
    ) -> RepositoryResult<HashMap<Uuid, Vec<Attachment>>> {
        let records = sqlx::query_as::<_, AttachmentRecord>(
            r#"
            SELECT message_id, url, storage_key FROM message_attachments
            WHERE message_id = ANY($1) ORDER BY ordinal
            "#,
        )
        .bind(message_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        let mut by_message: HashMap<Uuid, Vec<Attachment>> = HashMap::new();
        for record in records {
            by_message
                .entry(record.message_id)
                .or_default()
                .push(Attachment {
                    url: record.url,
                    storage_key: record.storage_key,
                });
        }
        Ok(by_message)
    }

    async fn populate(&self, records: Vec<MessageRecord>) -> RepositoryResult<Vec<Message>> {
        let ids: Vec<Uuid> = records.iter().map(|record| record.id).collect();
        let mut attachments = self.load_attachments(&ids).await?;
        Ok(records
            .into_iter()
            .map(|record| {
                let list = attachments.remove(&record.id).unwrap_or_default();
                record.into_message(list)
            })
            .collect())
    }
}

#[async_trait]
impl MessageRepository for PgMessageRepository {
    async fn create(&self, message: Message) -> RepositoryResult<Message> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_err)?;

        sqlx::query(
            r#"
            INSERT INTO messages (id, conversation_id, sender_id, content, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(Uuid::from(message.id))
        .bind(Uuid::from(message.conversation_id))
        .bind(Uuid::from(message.sender_id))
        .bind(&message.content)
        .bind(message.created_at)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_err)?;

        for (ordinal, attachment) in message.attachments.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO message_attachments (message_id, url, storage_key, ordinal)
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(Uuid::from(message.id))
            .bind(&attachment.url)
            .bind(&attachment.storage_key)
            .bind(ordinal as i32)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_err)?;
        }

        tx.commit().await.map_err(map_sqlx_err)?;
        Ok(message)
    }

    async fn find_by_id(&self, id: MessageId) -> RepositoryResult<Option<Message>> {
        let record = sqlx::query_as::<_, MessageRecord>(
            r#"
            SELECT id, conversation_id, sender_id, content, created_at
            FROM messages WHERE id = $1
            "#,
        )
        .bind(Uuid::from(id))
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        match record {
            Some(record) => Ok(self.populate(vec![record]).await?.pop()),
            None => Ok(None),
        }
    }

    async fn list_before(
        &self,
        conversation_id: ConversationId,
        before: Option<MessageId>,
        limit: u32,
    ) -> RepositoryResult<Vec<Message>> {
        let records = sqlx::query_as::<_, MessageRecord>(
            r#"
            SELECT id, conversation_id, sender_id, content, created_at
            FROM messages
            WHERE conversation_id = $1
              AND ($2::uuid IS NULL OR (created_at, id) < (
                SELECT created_at, id FROM messages WHERE id = $2
              ))
            ORDER BY created_at DESC, id DESC
            LIMIT $3
            "#,
        )
        .bind(Uuid::from(conversation_id))
        .bind(before.map(Uuid::from))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        self.populate(records).await
    }

    async fn find_latest(
        &self,
        conversation_id: ConversationId,
    ) -> RepositoryResult<Option<Message>> {
        let record = sqlx::query_as::<_, MessageRecord>(
            r#"
            SELECT id, conversation_id, sender_id, content, created_at
            FROM messages WHERE conversation_id = $1
            ORDER BY created_at DESC, id DESC LIMIT 1
            "#,
        )
        .bind(Uuid::from(conversation_id))
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        match record {
            Some(record) => Ok(self.populate(vec![record]).await?.pop()),
            None => Ok(None),
        }
    }

    async fn delete(&self, id: MessageId) -> RepositoryResult<()> {
        // 附件行由外键级联删除
        sqlx::query(r#"DELETE FROM messages WHERE id = $1"#)
            .bind(Uuid::from(id))
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        Ok(())
    }

    async fn delete_all_in_conversation(
        &self,
        conversation_id: ConversationId,
    ) -> RepositoryResult<Vec<Message>> {
        let records = sqlx::query_as::<_, MessageRecord>(
            r#"
            SELECT id, conversation_id, sender_id, content, created_at
            FROM messages WHERE conversation_id = $1
            "#,
        )
        .bind(Uuid::from(conversation_id))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        let messages = self.populate(records).await?;

        sqlx::query(r#"DELETE FROM messages WHERE conversation_id = $1"#)
            .bind(Uuid::from(conversation_id))
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        Ok(messages)
    }
}

#[derive(Clone)]
pub struct PgReadStateRepository {
    pool: PgPool,
}

impl PgReadStateRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ReadStateRepository for PgReadStateRepository {
    async fn upsert(&self, state: ReadState) -> RepositoryResult<ReadState> {
        let record = sqlx::query_as::<_, ReadStateRecord>(
            r#"
            INSERT INTO read_states (conversation_id, user_id, last_read, unread_count)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (conversation_id, user_id)
            DO UPDATE SET last_read = EXCLUDED.last_read, unread_count = EXCLUDED.unread_count
            RETURNING conversation_id, user_id, last_read, unread_count
            "#,
        )
        .bind(Uuid::from(state.conversation_id))
        .bind(Uuid::from(state.user_id))
        .bind(state.last_read)
        .bind(state.unread_count)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(ReadState::from(record))
    }

    async fn find(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
    ) -> RepositoryResult<Option<ReadState>> {
        let record = sqlx::query_as::<_, ReadStateRecord>(
            r#"
            SELECT conversation_id, user_id, last_read, unread_count
            FROM read_states WHERE conversation_id = $1 AND user_id = $2
            "#,
        )
        .bind(Uuid::from(conversation_id))
        .bind(Uuid::from(user_id))
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(record.map(ReadState::from))
    }

    async fn mark_read(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
        now: Timestamp,
    ) -> RepositoryResult<()> {
        sqlx::query(
            r#"
            UPDATE read_states SET last_read = $3
            WHERE conversation_id = $1 AND user_id = $2
            "#,
        )
        .bind(Uuid::from(conversation_id))
        .bind(Uuid::from(user_id))
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(())
    }

    async fn clear_unread(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
        now: Timestamp,
    ) -> RepositoryResult<()> {
        sqlx::query(
            r#"
            UPDATE read_states SET last_read = $3, unread_count = 0
            WHERE conversation_id = $1 AND user_id = $2
            "#,
        )
        .bind(Uuid::from(conversation_id))
        .bind(Uuid::from(user_id))
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(())
    }

    async fn increment_unread(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
    ) -> RepositoryResult<()> {
        // 数据库端自增，并发调用不丢失
        sqlx::query(
            r#"
            UPDATE read_states SET unread_count = unread_count + 1
            WHERE conversation_id = $1 AND user_id = $2
            "#,
        )
        .bind(Uuid::from(conversation_id))
        .bind(Uuid::from(user_id))
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(())
    }

    async fn remove(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
    ) -> RepositoryResult<()> {
        sqlx::query(r#"DELETE FROM read_states WHERE conversation_id = $1 AND user_id = $2"#)
            .bind(Uuid::from(conversation_id))
            .bind(Uuid::from(user_id))
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        Ok(())
    }

    async fn remove_all_for_conversation(
        &self,
        conversation_id: ConversationId,
    ) -> RepositoryResult<()> {
        sqlx::query(r#"DELETE FROM read_states WHERE conversation_id = $1"#)
            .bind(Uuid::from(conversation_id))
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        Ok(())
    }
}
