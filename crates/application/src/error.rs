//! 应用层错误类型
//!
//! 按连接层的错误分类建模：认证失败终止连接，其余错误只中止当前操作。

use domain::{DomainError, RepositoryError};
use thiserror::Error;

/// 应用层错误
#[derive(Debug, Error)]
pub enum ApplicationError {
    /// 领域规则错误（校验失败、业务规则违反等）
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// 存储层失败。此类错误在任何广播之前中止操作，客户端可整体重试
    #[error("存储层错误: {0}")]
    Repository(#[from] RepositoryError),

    /// 资源不存在
    #[error("资源不存在: {resource}")]
    NotFound { resource: String },

    /// 调用者不是会话成员或缺少管理员权限
    #[error("没有权限执行该操作: {action}")]
    Forbidden { action: String },

    /// 握手凭证缺失、无效或指向不存在的用户。对连接而言是致命错误
    #[error("认证失败: {message}")]
    Authentication { message: String },
}

impl ApplicationError {
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    pub fn forbidden(action: impl Into<String>) -> Self {
        Self::Forbidden {
            action: action.into(),
        }
    }

    pub fn authentication(message: impl Into<String>) -> Self {
        Self::Authentication {
            message: message.into(),
        }
    }
}
