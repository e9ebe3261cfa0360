use crate::value_objects::{ConversationId, Timestamp, UserId};

/// 每个 (会话, 用户) 组合的已读游标。
///
/// `last_read` 为 None 表示从未读过；`unread_count` 恒为非负，
/// 其递增必须在存储层按键原子执行（见应用层 ReadStateRepository 契约）。
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ReadState {
    pub conversation_id: ConversationId,
    pub user_id: UserId,
    pub last_read: Option<Timestamp>,
    pub unread_count: i64,
}

impl ReadState {
    /// 成员加入会话时创建的初始游标：视为刚刚读过，未读数为零。
    pub fn new(conversation_id: ConversationId, user_id: UserId, now: Timestamp) -> Self {
        Self {
            conversation_id,
            user_id,
            last_read: Some(now),
            unread_count: 0,
        }
    }

    /// 推进已读时间戳，未读数保持不变（消息送达路径使用）。
    pub fn mark_read(&mut self, now: Timestamp) {
        self.last_read = Some(now);
    }

    /// 推进已读时间戳并清零未读数（拉取历史消息时使用）。
    pub fn clear_unread(&mut self, now: Timestamp) {
        self.last_read = Some(now);
        self.unread_count = 0;
    }

    pub fn increment_unread(&mut self) {
        self.unread_count += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    #[test]
    fn test_mark_read_keeps_unread_count() {
        let mut state = ReadState::new(
            ConversationId::from(Uuid::new_v4()),
            UserId::from(Uuid::new_v4()),
            Utc::now(),
        );
        state.increment_unread();
        state.increment_unread();

        let now = Utc::now();
        state.mark_read(now);

        assert_eq!(state.last_read, Some(now));
        assert_eq!(state.unread_count, 2);
    }

    #[test]
    fn test_clear_unread_resets_counter() {
        let mut state = ReadState::new(
            ConversationId::from(Uuid::new_v4()),
            UserId::from(Uuid::new_v4()),
            Utc::now(),
        );
        state.increment_unread();

        let now = Utc::now();
        state.clear_unread(now);

        assert_eq!(state.unread_count, 0);
        assert_eq!(state.last_read, Some(now));
    }
}
