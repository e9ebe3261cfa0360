//! 连接层事件协议
//!
//! 客户端与服务器之间的全部事件都收敛在两个封闭枚举里，通过 serde 的
//! `event`/`payload` 两段式编码上线，杜绝手写事件名字符串。

use serde::{Deserialize, Serialize};

use crate::conversation::Conversation;
use crate::message::{Attachment, Message, PopulatedMessage};
use crate::value_objects::ConversationId;

/// 客户端发往服务器的事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload")]
pub enum ClientEvent {
    /// 连接建立后的第一帧：携带握手凭证
    #[serde(rename = "handshake")]
    Handshake { token: String },
    /// 订阅某个会话的房间
    #[serde(rename = "joinChat")]
    JoinConversation { conversation_id: ConversationId },
    /// 退订某个会话的房间
    #[serde(rename = "leaveChat")]
    LeaveConversation { conversation_id: ConversationId },
    /// 发送消息
    #[serde(rename = "newMessage")]
    SendMessage {
        conversation_id: ConversationId,
        #[serde(default)]
        content: String,
        #[serde(default)]
        attachments: Vec<Attachment>,
    },
    /// 正在输入
    #[serde(rename = "typing")]
    Typing { conversation_id: ConversationId },
    /// 停止输入
    #[serde(rename = "stopTyping")]
    StopTyping { conversation_id: ConversationId },
}

/// 服务器推送给客户端的事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload")]
pub enum ServerEvent {
    /// 握手成功确认
    #[serde(rename = "connected")]
    Connected,
    /// 新消息（会话房间广播，或离线成员的用户房间定向推送）
    #[serde(rename = "newMessage")]
    NewMessage(PopulatedMessage),
    /// 消息被删除
    #[serde(rename = "messageDeleted")]
    MessageDeleted(Message),
    /// 某成员正在输入
    #[serde(rename = "typing")]
    Typing { username: String },
    /// 停止输入
    #[serde(rename = "stopTyping")]
    StopTyping,
    /// 被拉入新会话（或会话被创建）
    #[serde(rename = "newChat")]
    NewConversation(Conversation),
    /// 群名称等会话信息更新
    #[serde(rename = "updateGroupName")]
    ConversationUpdated(Conversation),
    /// 成员离开、被移出或会话被删除
    #[serde(rename = "leaveChat")]
    ConversationLeft(Conversation),
    /// 事件处理失败，连接保持存活
    #[serde(rename = "socketError")]
    SocketError { code: String, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_client_event_wire_names() {
        let id = ConversationId::from(Uuid::new_v4());
        let join = serde_json::to_value(ClientEvent::JoinConversation { conversation_id: id })
            .unwrap();
        assert_eq!(join["event"], "joinChat");
        assert_eq!(
            join["payload"]["conversation_id"],
            serde_json::json!(Uuid::from(id))
        );

        let typing = serde_json::to_value(ClientEvent::Typing { conversation_id: id }).unwrap();
        assert_eq!(typing["event"], "typing");
    }

    #[test]
    fn test_send_message_defaults() {
        let id = Uuid::new_v4();
        let raw = format!(
            r#"{{"event":"newMessage","payload":{{"conversation_id":"{id}"}}}}"#
        );
        let event: ClientEvent = serde_json::from_str(&raw).unwrap();
        match event {
            ClientEvent::SendMessage {
                content,
                attachments,
                ..
            } => {
                assert!(content.is_empty());
                assert!(attachments.is_empty());
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_connected_event_has_no_payload() {
        let value = serde_json::to_value(ServerEvent::Connected).unwrap();
        assert_eq!(value["event"], "connected");
        assert!(value.get("payload").is_none());
    }

    #[test]
    fn test_server_event_round_trip() {
        let event = ServerEvent::SocketError {
            code: "NOT_FOUND".to_string(),
            message: "Chat does not exist".to_string(),
        };
        let encoded = serde_json::to_string(&event).unwrap();
        let decoded: ServerEvent = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, event);
    }
}
