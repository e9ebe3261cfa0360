//! 宿主进程入口
//!
//! 装配存储后端、应用服务和 Axum Web API。

use std::sync::Arc;

use application::{
    services::{
        ConversationService, ConversationServiceDependencies, EventRouter,
        EventRouterDependencies, MessageService, MessageServiceDependencies,
    },
    AttachmentStore, Clock, ConnectionRegistry, ConversationRepository, MemoryStorage,
    MessageRepository, ReadStateRepository, RegistryPresence, SystemClock, UserRepository,
};
use config::AppConfig;
use infrastructure::{
    connect_pool, FsAttachmentStore, PgConversationRepository, PgMessageRepository,
    PgReadStateRepository, PgUserRepository,
};
use tracing_subscriber::EnvFilter;
use web_api::{router, AppState, JwtService};

/// 存储端口集合。Postgres 与内存两种装配共用同一组 trait 对象。
struct Repositories {
    users: Arc<dyn UserRepository>,
    conversations: Arc<dyn ConversationRepository>,
    messages: Arc<dyn MessageRepository>,
    read_states: Arc<dyn ReadStateRepository>,
}

async fn build_repositories(config: &AppConfig) -> anyhow::Result<Repositories> {
    match &config.database.url {
        Some(url) => {
            tracing::info!("连接数据库: {}", url.split('@').last().unwrap_or("unknown"));
            let pool = connect_pool(url, config.database.max_connections).await?;
            sqlx::migrate!("../../migrations").run(&pool).await?;
            Ok(Repositories {
                users: Arc::new(PgUserRepository::new(pool.clone())),
                conversations: Arc::new(PgConversationRepository::new(pool.clone())),
                messages: Arc::new(PgMessageRepository::new(pool.clone())),
                read_states: Arc::new(PgReadStateRepository::new(pool)),
            })
        }
        None => {
            tracing::warn!("未设置 DATABASE_URL，回退到内存存储（数据不持久化）");
            let storage = MemoryStorage::new();
            Ok(Repositories {
                users: Arc::new(storage.clone()),
                conversations: Arc::new(storage.clone()),
                messages: Arc::new(storage.clone()),
                read_states: Arc::new(storage),
            })
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let app_config = AppConfig::from_env_with_defaults();
    if let Err(err) = app_config.validate() {
        tracing::warn!("配置未通过生产校验，仅适合开发环境继续运行: {err}");
    }

    let repositories = build_repositories(&app_config).await?;

    let attachment_store: Arc<dyn AttachmentStore> =
        Arc::new(FsAttachmentStore::new(app_config.server.upload_dir.as_str()));
    let registry = Arc::new(ConnectionRegistry::new(app_config.server.max_connections));
    let presence = Arc::new(RegistryPresence::new(registry.clone()));
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let jwt_service = Arc::new(JwtService::new(app_config.jwt.clone()));

    let event_router = Arc::new(EventRouter::new(EventRouterDependencies {
        conversation_repository: repositories.conversations.clone(),
        message_repository: repositories.messages.clone(),
        user_repository: repositories.users.clone(),
        read_state_repository: repositories.read_states.clone(),
        presence,
        registry: registry.clone(),
        clock: clock.clone(),
    }));
    let conversation_service = Arc::new(ConversationService::new(
        ConversationServiceDependencies {
            conversation_repository: repositories.conversations.clone(),
            message_repository: repositories.messages.clone(),
            read_state_repository: repositories.read_states.clone(),
            user_repository: repositories.users.clone(),
            attachment_store: attachment_store.clone(),
            registry: registry.clone(),
            clock: clock.clone(),
        },
    ));
    let message_service = Arc::new(MessageService::new(MessageServiceDependencies {
        conversation_repository: repositories.conversations.clone(),
        message_repository: repositories.messages.clone(),
        read_state_repository: repositories.read_states.clone(),
        user_repository: repositories.users.clone(),
        attachment_store,
        registry: registry.clone(),
        clock: clock.clone(),
    }));

    let state = AppState {
        event_router,
        conversation_service,
        message_service,
        user_repository: repositories.users,
        registry,
        jwt_service,
        clock,
    };

    let app = router(state);
    let bind_addr = format!("{}:{}", app_config.server.host, app_config.server.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;

    tracing::info!("服务器启动在 http://{bind_addr}");
    axum::serve(listener, app).await?;

    Ok(())
}
