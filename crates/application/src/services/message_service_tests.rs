//! 消息服务测试：游标分页、拉取即已读、发送者本人删除

use chrono::Duration;
use domain::{Attachment, PopulatedMessage, ServerEvent};
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::ApplicationError;
use crate::repository::{ConversationRepository, MessageRepository};
use crate::services::test_support::TestHarness;
use crate::services::{DeleteMessageRequest, GetHistoryRequest, SendMessageRequest};

async fn seed_messages(
    harness: &TestHarness,
    conversation_id: domain::ConversationId,
    sender: &domain::User,
    count: usize,
) -> Vec<PopulatedMessage> {
    let mut messages = Vec::with_capacity(count);
    for index in 0..count {
        harness.clock.advance(Duration::seconds(1));
        let message = harness
            .router
            .send_message(SendMessageRequest {
                conversation_id,
                sender_id: sender.id,
                content: format!("message {index}"),
                attachments: Vec::new(),
            })
            .await
            .unwrap();
        messages.push(message);
    }
    messages
}

#[tokio::test]
async fn test_history_pages_oldest_first_with_cursor() {
    let harness = TestHarness::new();
    let user1 = harness.add_user("user1").await;
    let user2 = harness.add_user("user2").await;
    let conversation = harness.direct(&user1, &user2).await;
    let sent = seed_messages(&harness, conversation.id, &user1, 5).await;

    let first_page = harness
        .messages
        .get_history(GetHistoryRequest {
            conversation_id: conversation.id,
            caller_id: user2.id,
            before: None,
            limit: Some(2),
        })
        .await
        .unwrap();

    // 页内按时间正序，最新两条
    assert_eq!(first_page.messages.len(), 2);
    assert_eq!(first_page.messages[0].id, sent[3].id);
    assert_eq!(first_page.messages[1].id, sent[4].id);
    assert!(first_page.has_more);
    assert_eq!(first_page.next_cursor, Some(sent[3].id));

    let second_page = harness
        .messages
        .get_history(GetHistoryRequest {
            conversation_id: conversation.id,
            caller_id: user2.id,
            before: first_page.next_cursor,
            limit: Some(2),
        })
        .await
        .unwrap();
    assert_eq!(second_page.messages[0].id, sent[1].id);
    assert_eq!(second_page.messages[1].id, sent[2].id);
    assert!(second_page.has_more);

    let last_page = harness
        .messages
        .get_history(GetHistoryRequest {
            conversation_id: conversation.id,
            caller_id: user2.id,
            before: second_page.next_cursor,
            limit: Some(2),
        })
        .await
        .unwrap();
    assert_eq!(last_page.messages.len(), 1);
    assert_eq!(last_page.messages[0].id, sent[0].id);
    assert!(!last_page.has_more);
    assert_eq!(last_page.next_cursor, None);
}

#[tokio::test]
async fn test_history_fetch_clears_unread_and_advances_cursor() {
    let harness = TestHarness::new();
    let user1 = harness.add_user("user1").await;
    let user2 = harness.add_user("user2").await;
    let conversation = harness.direct(&user1, &user2).await;
    seed_messages(&harness, conversation.id, &user1, 3).await;
    assert_eq!(harness.unread(conversation.id, user2.id).await, 3);

    harness.clock.advance(Duration::seconds(1));
    harness
        .messages
        .get_history(GetHistoryRequest {
            conversation_id: conversation.id,
            caller_id: user2.id,
            before: None,
            limit: None,
        })
        .await
        .unwrap();

    assert_eq!(harness.unread(conversation.id, user2.id).await, 0);
    assert_eq!(
        harness.last_read(conversation.id, user2.id).await,
        Some(harness.clock.now())
    );
}

#[tokio::test]
async fn test_history_rejected_for_non_member() {
    let harness = TestHarness::new();
    let user1 = harness.add_user("user1").await;
    let user2 = harness.add_user("user2").await;
    let outsider = harness.add_user("outsider").await;
    let conversation = harness.direct(&user1, &user2).await;

    let result = harness
        .messages
        .get_history(GetHistoryRequest {
            conversation_id: conversation.id,
            caller_id: outsider.id,
            before: None,
            limit: None,
        })
        .await;
    assert!(matches!(result, Err(ApplicationError::Forbidden { .. })));
}

#[tokio::test]
async fn test_history_rejected_for_missing_conversation() {
    let harness = TestHarness::new();
    let user1 = harness.add_user("user1").await;

    let result = harness
        .messages
        .get_history(GetHistoryRequest {
            conversation_id: Uuid::new_v4().into(),
            caller_id: user1.id,
            before: None,
            limit: None,
        })
        .await;
    assert!(matches!(result, Err(ApplicationError::NotFound { .. })));
}

#[tokio::test]
async fn test_delete_rejected_for_non_sender() {
    let harness = TestHarness::new();
    let user1 = harness.add_user("user1").await;
    let user2 = harness.add_user("user2").await;
    let conversation = harness.direct(&user1, &user2).await;
    let sent = seed_messages(&harness, conversation.id, &user1, 1).await;

    let result = harness
        .messages
        .delete_message(DeleteMessageRequest {
            message_id: sent[0].id,
            caller_id: user2.id,
        })
        .await;
    assert!(matches!(result, Err(ApplicationError::Forbidden { .. })));
    assert!(
        MessageRepository::find_by_id(&harness.storage, sent[0].id)
            .await
            .unwrap()
            .is_some()
    );
}

#[tokio::test]
async fn test_delete_repoints_last_message_and_notifies_others() {
    let harness = TestHarness::new();
    let user1 = harness.add_user("user1").await;
    let user2 = harness.add_user("user2").await;
    let conversation = harness.direct(&user1, &user2).await;
    let sent = seed_messages(&harness, conversation.id, &user1, 2).await;
    let (_conn, mut rx) = harness.connect(&user2);
    let stored = MessageRepository::find_by_id(&harness.storage, sent[1].id)
        .await
        .unwrap()
        .unwrap();

    harness
        .messages
        .delete_message(DeleteMessageRequest {
            message_id: sent[1].id,
            caller_id: user1.id,
        })
        .await
        .unwrap();

    assert!(
        MessageRepository::find_by_id(&harness.storage, sent[1].id)
            .await
            .unwrap()
            .is_none()
    );
    // 最后消息指针回退到剩余最新一条
    let updated = ConversationRepository::find_by_id(&harness.storage, conversation.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(updated.last_message, Some(sent[0].id));
    assert_eq!(
        rx.try_recv().unwrap(),
        ServerEvent::MessageDeleted(stored)
    );
}

#[tokio::test]
async fn test_delete_keeps_last_message_pointer_for_older_message() {
    let harness = TestHarness::new();
    let user1 = harness.add_user("user1").await;
    let user2 = harness.add_user("user2").await;
    let conversation = harness.direct(&user1, &user2).await;
    let sent = seed_messages(&harness, conversation.id, &user1, 2).await;

    harness
        .messages
        .delete_message(DeleteMessageRequest {
            message_id: sent[0].id,
            caller_id: user1.id,
        })
        .await
        .unwrap();

    let updated = ConversationRepository::find_by_id(&harness.storage, conversation.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(updated.last_message, Some(sent[1].id));
}

#[tokio::test]
async fn test_delete_removes_attachment_blobs() {
    let harness = TestHarness::new();
    let user1 = harness.add_user("user1").await;
    let user2 = harness.add_user("user2").await;
    let conversation = harness.direct(&user1, &user2).await;

    let message = harness
        .router
        .send_message(SendMessageRequest {
            conversation_id: conversation.id,
            sender_id: user1.id,
            content: String::new(),
            attachments: vec![Attachment {
                url: "http://files.local/pic.png".to_string(),
                storage_key: "uploads/pic.png".to_string(),
            }],
        })
        .await
        .unwrap();

    harness
        .messages
        .delete_message(DeleteMessageRequest {
            message_id: message.id,
            caller_id: user1.id,
        })
        .await
        .unwrap();

    assert_eq!(
        harness.storage.removed_blob_keys().await,
        vec!["uploads/pic.png".to_string()]
    );
}
