//! 应用服务层
//!
//! 编排领域模型与存储、在线状态、连接注册表之间的交互。
//! 消息投递算法（EventRouter）和会话生命周期副作用都在这里实现。

pub mod clock;
pub mod error;
pub mod memory;
pub mod presence;
pub mod registry;
pub mod repository;
pub mod services;

pub use clock::{Clock, SystemClock};
pub use error::ApplicationError;
pub use memory::MemoryStorage;
pub use presence::{PresenceOracle, RegistryPresence};
pub use registry::{ConnectionRegistry, RoomKey};
pub use repository::{
    AttachmentStore, ConversationRepository, MessageRepository, ReadStateRepository,
    UserRepository,
};
