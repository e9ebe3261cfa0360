use crate::errors::DomainError;
use crate::value_objects::{ConversationId, MessageId, Timestamp, UserId};

/// 会话类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ConversationKind {
    /// 一对一会话，恒为两名成员
    Direct,
    /// 群组会话，持有管理员集合
    Group,
}

/// 成员离开群组后的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaveOutcome {
    /// 成员已移除，会话继续存在
    Left,
    /// 离开者是最后一名管理员，已提升一名剩余成员接任
    AdminPromoted(UserId),
    /// 最后一名成员离开，会话应当被删除
    Deleted,
}

/// 会话实体
///
/// 不变式：Direct 会话恒为两名不同成员且无管理员集合；Group 会话存续期间
/// 成员集合非空，且只要还有成员，管理员集合就非空。
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub name: String,
    pub kind: ConversationKind,
    pub participants: Vec<UserId>,
    pub admins: Vec<UserId>,
    pub last_message: Option<MessageId>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Conversation {
    pub fn new_direct(
        id: ConversationId,
        name: impl Into<String>,
        a: UserId,
        b: UserId,
        created_at: Timestamp,
    ) -> Result<Self, DomainError> {
        if a == b {
            return Err(DomainError::business_rule_violation(
                "不能与自己创建一对一会话",
            ));
        }
        let name = Self::validate_name(name.into())?;
        Ok(Self {
            id,
            name,
            kind: ConversationKind::Direct,
            participants: vec![a, b],
            admins: Vec::new(),
            last_message: None,
            created_at,
            updated_at: created_at,
        })
    }

    /// 创建群组会话。创建者自动加入并成为唯一的初始管理员。
    pub fn new_group(
        id: ConversationId,
        name: impl Into<String>,
        creator: UserId,
        mut members: Vec<UserId>,
        created_at: Timestamp,
    ) -> Result<Self, DomainError> {
        let name = Self::validate_name(name.into())?;
        if members.contains(&creator) {
            return Err(DomainError::invalid_argument(
                "members",
                "成员列表不应包含创建者本人",
            ));
        }
        members.insert(0, creator);
        let mut distinct: Vec<UserId> = Vec::with_capacity(members.len());
        for member in members {
            if !distinct.contains(&member) {
                distinct.push(member);
            }
        }
        if distinct.len() < 3 {
            return Err(DomainError::invalid_argument(
                "members",
                "群组会话至少需要三名不同成员",
            ));
        }
        Ok(Self {
            id,
            name,
            kind: ConversationKind::Group,
            participants: distinct,
            admins: vec![creator],
            last_message: None,
            created_at,
            updated_at: created_at,
        })
    }

    pub fn is_group(&self) -> bool {
        matches!(self.kind, ConversationKind::Group)
    }

    pub fn is_participant(&self, user_id: UserId) -> bool {
        self.participants.contains(&user_id)
    }

    pub fn is_admin(&self, user_id: UserId) -> bool {
        self.admins.contains(&user_id)
    }

    pub fn rename(&mut self, name: impl Into<String>, now: Timestamp) -> Result<(), DomainError> {
        let name = Self::validate_name(name.into())?;
        self.name = name;
        self.updated_at = now;
        Ok(())
    }

    pub fn add_participant(&mut self, user_id: UserId, now: Timestamp) -> Result<(), DomainError> {
        if self.is_participant(user_id) {
            return Err(DomainError::business_rule_violation("该成员已在会话中"));
        }
        self.participants.push(user_id);
        self.updated_at = now;
        Ok(())
    }

    pub fn remove_participant(
        &mut self,
        user_id: UserId,
        now: Timestamp,
    ) -> Result<(), DomainError> {
        if !self.is_participant(user_id) {
            return Err(DomainError::business_rule_violation("该成员不在会话中"));
        }
        self.participants.retain(|id| *id != user_id);
        self.admins.retain(|id| *id != user_id);
        self.updated_at = now;
        Ok(())
    }

    /// 成员主动离开群组。
    ///
    /// 离开者同时从成员集合和管理员集合中移除。若管理员集合被清空而仍有
    /// 成员，提升首位剩余成员为管理员（恰好一次）；若成员集合被清空，返回
    /// `Deleted`，由调用方执行会话删除级联。
    pub fn leave(&mut self, user_id: UserId, now: Timestamp) -> Result<LeaveOutcome, DomainError> {
        if !self.is_group() {
            return Err(DomainError::business_rule_violation(
                "一对一会话不支持离开操作",
            ));
        }
        if !self.is_participant(user_id) {
            return Err(DomainError::business_rule_violation("该成员不在会话中"));
        }
        self.participants.retain(|id| *id != user_id);
        self.admins.retain(|id| *id != user_id);
        self.updated_at = now;

        if self.participants.is_empty() {
            return Ok(LeaveOutcome::Deleted);
        }
        if self.admins.is_empty() {
            let promoted = self.participants[0];
            self.admins.push(promoted);
            return Ok(LeaveOutcome::AdminPromoted(promoted));
        }
        Ok(LeaveOutcome::Left)
    }

    /// 提升成员为管理员。集合语义：已是管理员时为无操作。
    pub fn promote_admin(&mut self, user_id: UserId, now: Timestamp) -> Result<(), DomainError> {
        if !self.is_participant(user_id) {
            return Err(DomainError::business_rule_violation("该成员不在会话中"));
        }
        if !self.is_admin(user_id) {
            self.admins.push(user_id);
            self.updated_at = now;
        }
        Ok(())
    }

    pub fn demote_admin(&mut self, user_id: UserId, now: Timestamp) -> Result<(), DomainError> {
        if self.admins.len() == 1 && self.is_admin(user_id) {
            return Err(DomainError::business_rule_violation(
                "不能撤销最后一名管理员",
            ));
        }
        self.admins.retain(|id| *id != user_id);
        self.updated_at = now;
        Ok(())
    }

    pub fn record_last_message(&mut self, message_id: Option<MessageId>, now: Timestamp) {
        self.last_message = message_id;
        self.updated_at = now;
    }

    fn validate_name(name: String) -> Result<String, DomainError> {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            return Err(DomainError::invalid_argument("name", "cannot be empty"));
        }
        if trimmed.len() > 60 {
            return Err(DomainError::invalid_argument("name", "too long"));
        }
        Ok(trimmed.to_owned())
    }
}
