use crate::value_objects::{Timestamp, UserId, Username};

/// 用户实体。账号注册和凭证由认证子系统负责，本系统只读取用户资料
/// 用于消息广播时的发送者信息填充。
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: Username,
    /// 头像地址，由外部文件服务维护
    pub avatar_url: Option<String>,
    pub created_at: Timestamp,
}

impl User {
    pub fn new(
        id: UserId,
        username: Username,
        avatar_url: Option<String>,
        created_at: Timestamp,
    ) -> Self {
        Self {
            id,
            username,
            avatar_url,
            created_at,
        }
    }
}
