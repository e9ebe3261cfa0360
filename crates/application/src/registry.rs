//! 连接注册表
//!
//! 进程内唯一的共享可变状态：连接 → 用户、用户 → 连接集合、房间 → 连接
//! 集合三张映射，以及每个连接的出站发送端。所有操作都是同步的，不在
//! 持锁期间做任何 I/O；投递通过无界 mpsc 发送端完成，广播路径上没有
//! await 点。映射只通过本类型的方法暴露，外部拿不到裸的 map。

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use domain::{ConnectionId, ConversationId, ServerEvent, UserId};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// 房间标识。会话房间和用户私有房间是两个独立的命名空间，
/// 用封闭枚举隔开，避免裸字符串键的冲突。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoomKey {
    /// 会话房间：订阅该会话事件的全部连接
    Conversation(ConversationId),
    /// 用户私有房间：该用户全部在线连接，用于定向通知
    User(UserId),
}

#[derive(Debug, Error)]
pub enum RegistryError {
    /// 连接数达到配置上限，握手阶段拒绝新连接
    #[error("连接注册表已满: {capacity}")]
    AtCapacity { capacity: usize },
}

struct ConnectionEntry {
    user_id: UserId,
    sender: mpsc::UnboundedSender<ServerEvent>,
    rooms: HashSet<RoomKey>,
}

#[derive(Default)]
struct RegistryInner {
    connections: HashMap<ConnectionId, ConnectionEntry>,
    user_connections: HashMap<UserId, HashSet<ConnectionId>>,
    room_connections: HashMap<RoomKey, HashSet<ConnectionId>>,
}

/// 连接注册表
pub struct ConnectionRegistry {
    inner: RwLock<RegistryInner>,
    capacity: usize,
}

impl ConnectionRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: RwLock::new(RegistryInner::default()),
            capacity,
        }
    }

    /// 注册一个完成握手的连接，并自动订阅其用户私有房间。
    pub fn register(
        &self,
        connection_id: ConnectionId,
        user_id: UserId,
        sender: mpsc::UnboundedSender<ServerEvent>,
    ) -> Result<(), RegistryError> {
        let mut inner = self.inner.write().expect("registry lock poisoned");
        if inner.connections.len() >= self.capacity {
            return Err(RegistryError::AtCapacity {
                capacity: self.capacity,
            });
        }

        let private_room = RoomKey::User(user_id);
        let mut rooms = HashSet::new();
        rooms.insert(private_room);
        inner.connections.insert(
            connection_id,
            ConnectionEntry {
                user_id,
                sender,
                rooms,
            },
        );
        inner
            .user_connections
            .entry(user_id)
            .or_default()
            .insert(connection_id);
        inner
            .room_connections
            .entry(private_room)
            .or_default()
            .insert(connection_id);

        info!(%connection_id, %user_id, "连接已注册");
        Ok(())
    }

    /// 注销连接：从其加入的每个房间和所属用户的连接集合中移除。
    /// 对同一连接重复调用是无操作。
    pub fn unregister(&self, connection_id: ConnectionId) {
        let mut inner = self.inner.write().expect("registry lock poisoned");
        let Some(entry) = inner.connections.remove(&connection_id) else {
            return;
        };

        for room in &entry.rooms {
            if let Some(members) = inner.room_connections.get_mut(room) {
                members.remove(&connection_id);
                if members.is_empty() {
                    inner.room_connections.remove(room);
                }
            }
        }
        if let Some(connections) = inner.user_connections.get_mut(&entry.user_id) {
            connections.remove(&connection_id);
            if connections.is_empty() {
                inner.user_connections.remove(&entry.user_id);
            }
        }

        info!(%connection_id, user_id = %entry.user_id, "连接已注销");
    }

    /// 订阅房间。重复订阅是无操作，后续广播仍只投递一次。
    pub fn join_room(&self, connection_id: ConnectionId, room: RoomKey) {
        let mut guard = self.inner.write().expect("registry lock poisoned");
        let inner = &mut *guard;
        let Some(entry) = inner.connections.get_mut(&connection_id) else {
            return;
        };
        if entry.rooms.insert(room) {
            inner
                .room_connections
                .entry(room)
                .or_default()
                .insert(connection_id);
            debug!(%connection_id, ?room, "连接加入房间");
        }
    }

    /// 退订房间。未订阅时是无操作。
    pub fn leave_room(&self, connection_id: ConnectionId, room: RoomKey) {
        let mut guard = self.inner.write().expect("registry lock poisoned");
        let inner = &mut *guard;
        let Some(entry) = inner.connections.get_mut(&connection_id) else {
            return;
        };
        if entry.rooms.remove(&room) {
            if let Some(members) = inner.room_connections.get_mut(&room) {
                members.remove(&connection_id);
                if members.is_empty() {
                    inner.room_connections.remove(&room);
                }
            }
            debug!(%connection_id, ?room, "连接离开房间");
        }
    }

    /// 向房间内全部连接广播事件。发送端已关闭的连接计入告警后跳过，
    /// 其清理由断连路径负责。
    pub fn broadcast(&self, room: RoomKey, event: &ServerEvent) {
        self.broadcast_filtered(room, None, event);
    }

    /// 向房间内除 `exclude` 之外的连接广播（输入指示等发送者不回显的事件）。
    pub fn broadcast_except(
        &self,
        room: RoomKey,
        exclude: ConnectionId,
        event: &ServerEvent,
    ) {
        self.broadcast_filtered(room, Some(exclude), event);
    }

    /// 投递到某用户私有房间的全部连接。用户不在线时静默无操作。
    pub fn notify_user(&self, user_id: UserId, event: &ServerEvent) {
        self.broadcast_filtered(RoomKey::User(user_id), None, event);
    }

    fn broadcast_filtered(
        &self,
        room: RoomKey,
        exclude: Option<ConnectionId>,
        event: &ServerEvent,
    ) {
        let inner = self.inner.read().expect("registry lock poisoned");
        let Some(members) = inner.room_connections.get(&room) else {
            return;
        };
        let mut dropped = 0usize;
        for connection_id in members {
            if Some(*connection_id) == exclude {
                continue;
            }
            if let Some(entry) = inner.connections.get(connection_id) {
                if entry.sender.send(event.clone()).is_err() {
                    dropped += 1;
                }
            }
        }
        if dropped > 0 {
            warn!(?room, dropped, "部分连接的发送端已关闭，事件被丢弃");
        }
    }

    /// 房间内当前有连接订阅的用户集合（在线状态查询的原料）。
    pub fn users_in_room(&self, room: RoomKey) -> HashSet<UserId> {
        let inner = self.inner.read().expect("registry lock poisoned");
        let Some(members) = inner.room_connections.get(&room) else {
            return HashSet::new();
        };
        members
            .iter()
            .filter_map(|id| inner.connections.get(id).map(|entry| entry.user_id))
            .collect()
    }

    /// 某用户是否有任意在线连接。
    pub fn is_user_connected(&self, user_id: UserId) -> bool {
        let inner = self.inner.read().expect("registry lock poisoned");
        inner.user_connections.contains_key(&user_id)
    }

    pub fn connection_count(&self) -> usize {
        let inner = self.inner.read().expect("registry lock poisoned");
        inner.connections.len()
    }
}
