//! 在线状态查询
//!
//! 回答"会话的哪些成员当前有连接订阅着该会话的房间"。状态完全由
//! 连接注册表推导，没有独立存储。

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use domain::{ConversationId, UserId};

use crate::registry::{ConnectionRegistry, RoomKey};

/// 在线状态口径：成员在给定会话房间内至少有一个活跃连接。
#[async_trait]
pub trait PresenceOracle: Send + Sync {
    /// 返回 `members` 中当前在线且订阅了该会话房间的用户集合。
    async fn online_in_room(
        &self,
        conversation_id: ConversationId,
        members: &[UserId],
    ) -> HashSet<UserId>;
}

/// 基于连接注册表的实现。
pub struct RegistryPresence {
    registry: Arc<ConnectionRegistry>,
}

impl RegistryPresence {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl PresenceOracle for RegistryPresence {
    async fn online_in_room(
        &self,
        conversation_id: ConversationId,
        members: &[UserId],
    ) -> HashSet<UserId> {
        let in_room = self
            .registry
            .users_in_room(RoomKey::Conversation(conversation_id));
        members
            .iter()
            .copied()
            .filter(|member| in_room.contains(member))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::ConnectionId;
    use tokio::sync::mpsc;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_online_in_room_intersects_members() {
        let registry = Arc::new(ConnectionRegistry::new(16));
        let presence = RegistryPresence::new(registry.clone());
        let conversation_id = ConversationId::from(Uuid::new_v4());
        let member_online = UserId::from(Uuid::new_v4());
        let member_offline = UserId::from(Uuid::new_v4());
        let outsider = UserId::from(Uuid::new_v4());

        for user in [member_online, outsider] {
            let connection_id = ConnectionId::from(Uuid::new_v4());
            let (tx, _rx) = mpsc::unbounded_channel();
            registry.register(connection_id, user, tx).unwrap();
            registry.join_room(connection_id, RoomKey::Conversation(conversation_id));
        }

        let online = presence
            .online_in_room(conversation_id, &[member_online, member_offline])
            .await;

        // 房间里的非成员不计入，离线成员不计入
        assert_eq!(online.len(), 1);
        assert!(online.contains(&member_online));
    }

    #[tokio::test]
    async fn test_connected_but_not_in_room_counts_as_offline() {
        let registry = Arc::new(ConnectionRegistry::new(16));
        let presence = RegistryPresence::new(registry.clone());
        let conversation_id = ConversationId::from(Uuid::new_v4());
        let member = UserId::from(Uuid::new_v4());

        let (tx, _rx) = mpsc::unbounded_channel();
        registry
            .register(ConnectionId::from(Uuid::new_v4()), member, tx)
            .unwrap();

        let online = presence.online_in_room(conversation_id, &[member]).await;
        assert!(online.is_empty());
    }
}
