//! REST client for the conversation/message API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use tracing::debug;

use staffchat_core::{ApiError, ChatApi};
use staffchat_types::api::{
    CreateConversationRequest, EditMessageRequest, MessagePage, ReactionRequest,
    ReadReceiptsResponse, SendMessageRequest, UploadFile,
};
use staffchat_types::{AttachmentId, Conversation, ConversationId, Message, Reaction, ReadReceipt};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub struct HttpChatApi {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl HttpChatApi {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(network)?;
        Ok(Self::with_client(client, base_url, token))
    }

    pub fn with_client(client: Client, base_url: impl Into<String>, token: Option<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            client,
            base_url,
            token,
        }
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        debug!(%method, path, "api request");
        let builder = self
            .client
            .request(method, format!("{}{}", self.base_url, path));
        match &self.token {
            Some(token) => builder.header("Authorization", format!("Bearer {}", token)),
            None => builder,
        }
    }
}

fn network(e: reqwest::Error) -> ApiError {
    ApiError::Network(e.to_string())
}

/// Turn non-2xx responses into `ApiError::Status`, keeping the body text.
async fn check(resp: Response) -> Result<Response, ApiError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(ApiError::Status {
        status: status.as_u16(),
        body,
    })
}

async fn send_json<T: DeserializeOwned>(builder: RequestBuilder) -> Result<T, ApiError> {
    let resp = check(builder.send().await.map_err(network)?).await?;
    let body = resp.text().await.map_err(network)?;
    serde_json::from_str(&body).map_err(|e| ApiError::Decode(e.to_string()))
}

async fn send_empty(builder: RequestBuilder) -> Result<(), ApiError> {
    check(builder.send().await.map_err(network)?).await?;
    Ok(())
}

fn file_part(file: &UploadFile) -> Part {
    let part = || Part::bytes(file.bytes.clone()).file_name(file.file_name.clone());
    part().mime_str(&file.mime_type).unwrap_or_else(|_| part())
}

#[async_trait]
impl ChatApi for HttpChatApi {
    async fn list_conversations(&self) -> Result<Vec<Conversation>, ApiError> {
        send_json(self.request(Method::GET, "/chat/conversations")).await
    }

    async fn fetch_messages(
        &self,
        conversation_id: ConversationId,
        before: Option<i64>,
        limit: u32,
    ) -> Result<MessagePage, ApiError> {
        let mut builder = self
            .request(
                Method::GET,
                &format!("/chat/conversations/{}/messages", conversation_id),
            )
            .query(&[("limit", limit.to_string())]);
        if let Some(before) = before {
            builder = builder.query(&[("before", before.to_string())]);
        }
        send_json(builder).await
    }

    async fn send_message(
        &self,
        conversation_id: ConversationId,
        request: &SendMessageRequest,
    ) -> Result<Message, ApiError> {
        send_json(
            self.request(
                Method::POST,
                &format!("/chat/conversations/{}/messages", conversation_id),
            )
            .json(request),
        )
        .await
    }

    async fn send_files(
        &self,
        conversation_id: ConversationId,
        request: &SendMessageRequest,
        files: &[UploadFile],
    ) -> Result<Message, ApiError> {
        let payload =
            serde_json::to_string(request).map_err(|e| ApiError::Decode(e.to_string()))?;
        let form = files
            .iter()
            .fold(Form::new().text("payload", payload), |form, file| {
                form.part("files", file_part(file))
            });
        send_json(
            self.request(
                Method::POST,
                &format!("/chat/conversations/{}/messages/upload", conversation_id),
            )
            .multipart(form),
        )
        .await
    }

    async fn edit_message(
        &self,
        conversation_id: ConversationId,
        message_id: i64,
        text: &str,
    ) -> Result<Message, ApiError> {
        send_json(
            self.request(
                Method::PATCH,
                &format!(
                    "/chat/conversations/{}/messages/{}",
                    conversation_id, message_id
                ),
            )
            .json(&EditMessageRequest {
                text: text.to_string(),
            }),
        )
        .await
    }

    async fn delete_message(
        &self,
        conversation_id: ConversationId,
        message_id: i64,
        hard: bool,
    ) -> Result<(), ApiError> {
        send_empty(
            self.request(
                Method::DELETE,
                &format!(
                    "/chat/conversations/{}/messages/{}",
                    conversation_id, message_id
                ),
            )
            .query(&[("hard", hard)]),
        )
        .await
    }

    async fn delete_attachment(
        &self,
        conversation_id: ConversationId,
        message_id: i64,
        attachment_id: AttachmentId,
    ) -> Result<(), ApiError> {
        send_empty(self.request(
            Method::DELETE,
            &format!(
                "/chat/conversations/{}/messages/{}/attachments/{}",
                conversation_id, message_id, attachment_id
            ),
        ))
        .await
    }

    async fn add_reaction(
        &self,
        conversation_id: ConversationId,
        message_id: i64,
        emoji: &str,
    ) -> Result<Vec<Reaction>, ApiError> {
        send_json(
            self.request(
                Method::POST,
                &format!(
                    "/chat/conversations/{}/messages/{}/reactions",
                    conversation_id, message_id
                ),
            )
            .json(&ReactionRequest {
                emoji: emoji.to_string(),
            }),
        )
        .await
    }

    async fn remove_reaction(
        &self,
        conversation_id: ConversationId,
        message_id: i64,
        emoji: &str,
    ) -> Result<Vec<Reaction>, ApiError> {
        send_json(
            self.request(
                Method::DELETE,
                &format!(
                    "/chat/conversations/{}/messages/{}/reactions",
                    conversation_id, message_id
                ),
            )
            .query(&[("emoji", emoji)]),
        )
        .await
    }

    async fn mark_message_read(
        &self,
        conversation_id: ConversationId,
        message_id: i64,
    ) -> Result<Vec<ReadReceipt>, ApiError> {
        let resp: ReadReceiptsResponse = send_json(self.request(
            Method::POST,
            &format!(
                "/chat/conversations/{}/messages/{}/read",
                conversation_id, message_id
            ),
        ))
        .await?;
        Ok(resp.receipts)
    }

    async fn mark_conversation_read(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Vec<ReadReceipt>, ApiError> {
        let resp: ReadReceiptsResponse = send_json(self.request(
            Method::POST,
            &format!("/chat/conversations/{}/read", conversation_id),
        ))
        .await?;
        Ok(resp.receipts)
    }

    async fn create_conversation(
        &self,
        request: &CreateConversationRequest,
    ) -> Result<Conversation, ApiError> {
        send_json(self.request(Method::POST, "/chat/conversations").json(request)).await
    }
}
