//! 基础设施层：应用层端口的 PostgreSQL 实现与本地文件附件存储。

pub mod attachments;
pub mod repository;

pub use attachments::FsAttachmentStore;
pub use repository::{
    connect_pool, PgConversationRepository, PgMessageRepository, PgReadStateRepository,
    PgUserRepository,
};
