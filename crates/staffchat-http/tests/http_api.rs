use serde_json::json;
use wiremock::matchers::{body_partial_json, body_string_contains, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use staffchat_core::{ApiError, ChatApi};
use staffchat_http::HttpChatApi;
use staffchat_types::api::{CreateConversationRequest, SendMessageRequest, UploadFile};
use staffchat_types::{MessageId, TempId};

fn message_json(id: i64, text: &str) -> serde_json::Value {
    json!({
        "id": id,
        "conversation_id": 7,
        "sender_id": 2,
        "sender_name": "Front Desk",
        "text": text,
        "created_at": "2026-03-01T09:30:00Z"
    })
}

async fn api(server: &MockServer) -> HttpChatApi {
    HttpChatApi::new(format!("{}/api/", server.uri()), Some("secret".into())).unwrap()
}

#[tokio::test]
async fn lists_conversations_with_bearer_token() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/chat/conversations"))
        .and(header("Authorization", "Bearer secret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {
                "id": 7,
                "title": "Night shift",
                "is_group": true,
                "participants": [{ "id": 1, "display_name": "Night Manager" }],
                "unread_count": 3
            }
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let conversations = api(&server).await.list_conversations().await.unwrap();
    assert_eq!(conversations.len(), 1);
    assert_eq!(conversations[0].title.as_deref(), Some("Night shift"));
    assert_eq!(conversations[0].unread_count, 3);
    assert!(!conversations[0].messages_loaded);
}

#[tokio::test]
async fn fetches_a_page_with_cursor() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/chat/conversations/7/messages"))
        .and(query_param("limit", "50"))
        .and(query_param("before", "120"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "messages": [message_json(118, "a"), message_json(119, "b")],
            "count": 2,
            "has_more": true
        })))
        .expect(1)
        .mount(&server)
        .await;

    let page = api(&server).await.fetch_messages(7, Some(120), 50).await.unwrap();
    assert_eq!(page.count, 2);
    assert!(page.has_more);
    assert_eq!(page.messages[1].id, MessageId::Confirmed(119));
}

#[tokio::test]
async fn send_carries_client_message_id() {
    let server = MockServer::start().await;
    let temp = TempId::new(3);
    Mock::given(method("POST"))
        .and(path("/api/chat/conversations/7/messages"))
        .and(body_partial_json(json!({
            "text": "Late checkout for 512",
            "client_message_id": temp.to_string()
        })))
        .respond_with({
            let mut body = message_json(300, "Late checkout for 512");
            body["client_message_id"] = json!(temp.to_string());
            ResponseTemplate::new(201).set_body_json(body)
        })
        .expect(1)
        .mount(&server)
        .await;

    let request = SendMessageRequest {
        text: Some("Late checkout for 512".into()),
        reply_to_id: None,
        client_message_id: temp,
    };
    let message = api(&server).await.send_message(7, &request).await.unwrap();
    assert_eq!(message.id, MessageId::Confirmed(300));
    assert_eq!(message.client_message_id, Some(temp));
}

#[tokio::test]
async fn uploads_files_as_multipart() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat/conversations/7/messages/upload"))
        .and(body_string_contains("minibar.csv"))
        .and(body_string_contains("client_message_id"))
        .respond_with(ResponseTemplate::new(201).set_body_json(message_json(301, "restock")))
        .expect(1)
        .mount(&server)
        .await;

    let request = SendMessageRequest {
        text: Some("restock".into()),
        reply_to_id: None,
        client_message_id: TempId::new(4),
    };
    let files = [UploadFile {
        file_name: "minibar.csv".into(),
        mime_type: "text/csv".into(),
        bytes: b"item,qty\nwater,4\n".to_vec(),
    }];
    let message = api(&server).await.send_files(7, &request, &files).await.unwrap();
    assert_eq!(message.id, MessageId::Confirmed(301));
}

#[tokio::test]
async fn status_errors_keep_body_and_classify() {
    let server = MockServer::start().await;
    Mock::given(method("PATCH"))
        .and(path("/api/chat/conversations/7/messages/5"))
        .respond_with(ResponseTemplate::new(404).set_body_string("message not found"))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/api/chat/conversations/7/messages/5"))
        .and(query_param("hard", "true"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let api = api(&server).await;
    let err = api.edit_message(7, 5, "fixed").await.unwrap_err();
    assert_eq!(
        err,
        ApiError::Status {
            status: 404,
            body: "message not found".into()
        }
    );
    assert!(!err.is_transient());

    let err = api.delete_message(7, 5, true).await.unwrap_err();
    assert!(err.is_transient());
}

#[tokio::test]
async fn malformed_body_is_a_decode_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat/conversations/7/read"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
        .mount(&server)
        .await;

    let err = api(&server).await.mark_conversation_read(7).await.unwrap_err();
    assert!(matches!(err, ApiError::Decode(_)));
}

#[tokio::test]
async fn unreachable_server_is_a_network_error() {
    let api = HttpChatApi::new("http://127.0.0.1:9", None).unwrap();
    let err = api.list_conversations().await.unwrap_err();
    assert!(matches!(err, ApiError::Network(_)));
    assert!(err.is_transient());
}

#[tokio::test]
async fn reactions_and_receipts() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat/conversations/7/messages/5/reactions"))
        .and(body_partial_json(json!({ "emoji": "👍" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "emoji": "👍", "user_id": 1, "message_id": 5 }
        ])))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/api/chat/conversations/7/messages/5/reactions"))
        .and(query_param("emoji", "👍"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/chat/conversations/7/messages/5/read"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "receipts": [
                { "message_id": 5, "user_id": 1, "read_at": "2026-03-01T10:00:00Z" },
                { "message_id": 5, "user_id": 3, "read_at": "2026-03-01T10:01:00Z" }
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let api = api(&server).await;
    let reactions = api.add_reaction(7, 5, "👍").await.unwrap();
    assert_eq!(reactions[0].user_id, 1);
    assert!(api.remove_reaction(7, 5, "👍").await.unwrap().is_empty());
    let receipts = api.mark_message_read(7, 5).await.unwrap();
    assert_eq!(receipts.len(), 2);
}

#[tokio::test]
async fn creates_group_conversation() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat/conversations"))
        .and(body_partial_json(json!({
            "participant_ids": [2, 3],
            "title": "Banquet team"
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "id": 44,
            "title": "Banquet team",
            "is_group": true
        })))
        .expect(1)
        .mount(&server)
        .await;

    let request = CreateConversationRequest {
        participant_ids: vec![2, 3],
        title: Some("Banquet team".into()),
    };
    let conversation = api(&server).await.create_conversation(&request).await.unwrap();
    assert_eq!(conversation.id, 44);
    assert!(conversation.is_group);
}
