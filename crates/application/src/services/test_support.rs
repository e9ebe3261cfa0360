//! 服务层测试共用的内存装配

use std::sync::{Arc, Mutex};

use chrono::{Duration, Utc};
use domain::{
    ConnectionId, Conversation, ConversationId, ServerEvent, Timestamp, User, UserId, Username,
};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::clock::Clock;
use crate::memory::MemoryStorage;
use crate::presence::RegistryPresence;
use crate::registry::{ConnectionRegistry, RoomKey};
use crate::services::{
    ConversationService, ConversationServiceDependencies, CreateDirectRequest,
    CreateGroupRequest, EventRouter, EventRouterDependencies, MessageService,
    MessageServiceDependencies,
};

/// 可手动推进的时钟，让断言能对准确切的时间戳。
pub struct FixedClock {
    now: Mutex<Timestamp>,
}

impl FixedClock {
    pub fn new() -> Self {
        Self {
            now: Mutex::new(Utc::now()),
        }
    }

    pub fn advance(&self, duration: Duration) {
        let mut now = self.now.lock().unwrap();
        *now += duration;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> Timestamp {
        *self.now.lock().unwrap()
    }
}

pub struct TestHarness {
    pub storage: MemoryStorage,
    pub registry: Arc<ConnectionRegistry>,
    pub clock: Arc<FixedClock>,
    pub router: Arc<EventRouter>,
    pub conversations: Arc<ConversationService>,
    pub messages: Arc<MessageService>,
}

impl TestHarness {
    pub fn new() -> Self {
        let storage = MemoryStorage::new();
        let registry = Arc::new(ConnectionRegistry::new(64));
        let clock = Arc::new(FixedClock::new());
        let presence = Arc::new(RegistryPresence::new(registry.clone()));

        let router = Arc::new(EventRouter::new(EventRouterDependencies {
            conversation_repository: Arc::new(storage.clone()),
            message_repository: Arc::new(storage.clone()),
            user_repository: Arc::new(storage.clone()),
            read_state_repository: Arc::new(storage.clone()),
            presence,
            registry: registry.clone(),
            clock: clock.clone(),
        }));
        let conversations = Arc::new(ConversationService::new(ConversationServiceDependencies {
            conversation_repository: Arc::new(storage.clone()),
            message_repository: Arc::new(storage.clone()),
            read_state_repository: Arc::new(storage.clone()),
            user_repository: Arc::new(storage.clone()),
            attachment_store: Arc::new(storage.clone()),
            registry: registry.clone(),
            clock: clock.clone(),
        }));
        let messages = Arc::new(MessageService::new(MessageServiceDependencies {
            conversation_repository: Arc::new(storage.clone()),
            message_repository: Arc::new(storage.clone()),
            read_state_repository: Arc::new(storage.clone()),
            user_repository: Arc::new(storage.clone()),
            attachment_store: Arc::new(storage.clone()),
            registry: registry.clone(),
            clock: clock.clone(),
        }));

        Self {
            storage,
            registry,
            clock,
            router,
            conversations,
            messages,
        }
    }

    pub async fn add_user(&self, name: &str) -> User {
        use crate::repository::UserRepository;
        let user = User::new(
            UserId::from(Uuid::new_v4()),
            Username::parse(name).unwrap(),
            None,
            self.clock.now(),
        );
        UserRepository::create(&self.storage, user).await.unwrap()
    }

    pub async fn direct(&self, creator: &User, other: &User) -> Conversation {
        self.conversations
            .create_direct(CreateDirectRequest {
                creator_id: creator.id,
                other_id: other.id,
            })
            .await
            .unwrap()
    }

    pub async fn group(&self, creator: &User, others: &[&User], name: &str) -> Conversation {
        self.conversations
            .create_group(CreateGroupRequest {
                creator_id: creator.id,
                name: name.to_string(),
                member_ids: others.iter().map(|user| user.id).collect(),
            })
            .await
            .unwrap()
    }

    /// 模拟一个完成握手的连接。
    pub fn connect(&self, user: &User) -> (ConnectionId, mpsc::UnboundedReceiver<ServerEvent>) {
        let connection_id = ConnectionId::from(Uuid::new_v4());
        let (tx, rx) = mpsc::unbounded_channel();
        self.registry.register(connection_id, user.id, tx).unwrap();
        (connection_id, rx)
    }

    pub fn join(&self, connection_id: ConnectionId, conversation_id: ConversationId) {
        self.registry
            .join_room(connection_id, RoomKey::Conversation(conversation_id));
    }

    pub async fn unread(&self, conversation_id: ConversationId, user_id: UserId) -> i64 {
        use crate::repository::ReadStateRepository;
        self.storage
            .find(conversation_id, user_id)
            .await
            .unwrap()
            .map(|state| state.unread_count)
            .unwrap_or(-1)
    }

    pub async fn last_read(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
    ) -> Option<Timestamp> {
        use crate::repository::ReadStateRepository;
        self.storage
            .find(conversation_id, user_id)
            .await
            .unwrap()
            .and_then(|state| state.last_read)
    }
}
