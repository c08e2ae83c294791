#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use tokio::sync::{Semaphore, oneshot};

use staffchat_core::{
    ApiError, ChatApi, ChatConfig, ChatSession, NotificationOptions, NotificationPermission,
    Notifier, RealtimeTransport, SubscriptionHandle, TransportError,
};
use staffchat_types::api::{CreateConversationRequest, MessagePage, SendMessageRequest, UploadFile};
use staffchat_types::{
    Attachment, AttachmentId, Conversation, ConversationId, Message, MessageId, ParticipantRef,
    Reaction, ReadReceipt, SendStatus, UserId,
};

pub const ME: UserId = 1;
pub const FRONT_DESK: UserId = 2;
pub const HOUSEKEEPING: UserId = 3;

pub fn at(secs: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap() + TimeDelta::seconds(secs)
}

pub fn participant(id: UserId, name: &str) -> ParticipantRef {
    ParticipantRef {
        id,
        display_name: name.into(),
        is_on_duty: true,
        role: None,
    }
}

pub fn conversation(id: ConversationId) -> Conversation {
    Conversation {
        id,
        title: None,
        is_group: false,
        participants: vec![participant(ME, "Night Manager"), participant(FRONT_DESK, "Front Desk")],
        messages: vec![],
        last_read_message_id: None,
        unread_count: 0,
        left: false,
        has_more: false,
        messages_loaded: false,
    }
}

pub fn message(id: i64, conversation_id: ConversationId, sender_id: UserId, text: &str) -> Message {
    Message {
        id: MessageId::Confirmed(id),
        conversation_id,
        sender_id,
        sender_name: None,
        text: Some(text.into()),
        created_at: at(id),
        is_edited: false,
        is_deleted: false,
        reply_to_id: None,
        attachments: vec![],
        reactions: vec![],
        read_by: vec![],
        send_status: SendStatus::Sent,
        client_message_id: None,
    }
}

#[derive(Default)]
pub struct FakeState {
    pub conversations: Vec<Conversation>,
    pub messages: HashMap<ConversationId, Vec<Message>>,
    pub reactions: HashMap<i64, Vec<Reaction>>,
    pub next_id: i64,
    pub fail_sends: bool,
    pub fail_reactions: bool,
    pub fail_mark_read: bool,
    pub fail_deletes: bool,
    pub calls: Vec<&'static str>,
}

/// Scripted in-memory REST API. The state lock is never held across an await.
#[derive(Default)]
pub struct FakeApi {
    pub state: Mutex<FakeState>,
    send_gate: Mutex<Option<oneshot::Receiver<()>>>,
    reaction_gate: Mutex<Option<oneshot::Receiver<()>>>,
    fetch_gate: Mutex<Option<oneshot::Receiver<()>>>,
    reaction_hold: Mutex<Option<Arc<Semaphore>>>,
}

impl FakeApi {
    pub fn new() -> Arc<Self> {
        let api = Self::default();
        api.state.lock().unwrap().next_id = 1000;
        Arc::new(api)
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut FakeState) -> R) -> R {
        f(&mut self.state.lock().unwrap())
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.with(|s| s.calls.clone())
    }

    /// The next send waits until the returned sender fires.
    pub fn hold_next_send(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        *self.send_gate.lock().unwrap() = Some(rx);
        tx
    }

    /// The next reaction request waits until the returned sender fires.
    pub fn hold_next_reaction(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        *self.reaction_gate.lock().unwrap() = Some(rx);
        tx
    }

    /// Every reaction request waits until the returned semaphore gets a permit.
    pub fn hold_reactions(&self) -> Arc<Semaphore> {
        let hold = Arc::new(Semaphore::new(0));
        *self.reaction_hold.lock().unwrap() = Some(hold.clone());
        hold
    }

    /// The next page is read immediately but only returned once the sender
    /// fires, like a response still on the wire.
    pub fn hold_next_fetch(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        *self.fetch_gate.lock().unwrap() = Some(rx);
        tx
    }

    fn record(&self, call: &'static str) {
        self.with(|s| s.calls.push(call));
    }

    async fn wait_send_gate(&self) {
        let gate = self.send_gate.lock().unwrap().take();
        if let Some(rx) = gate {
            let _ = rx.await;
        }
    }

    async fn wait_fetch_gate(&self) {
        let gate = self.fetch_gate.lock().unwrap().take();
        if let Some(rx) = gate {
            let _ = rx.await;
        }
    }

    async fn wait_reaction_gate(&self) {
        let gate = self.reaction_gate.lock().unwrap().take();
        if let Some(rx) = gate {
            let _ = rx.await;
        }
        let hold = self.reaction_hold.lock().unwrap().clone();
        if let Some(hold) = hold {
            let _ = hold.acquire().await;
        }
    }

    fn store_sent(
        &self,
        conversation_id: ConversationId,
        request: &SendMessageRequest,
        files: &[UploadFile],
    ) -> Result<Message, ApiError> {
        self.with(|s| {
            if s.fail_sends {
                return Err(ApiError::Network("connection reset".into()));
            }
            s.next_id += 1;
            let id = s.next_id;
            let message = Message {
                id: MessageId::Confirmed(id),
                conversation_id,
                sender_id: ME,
                sender_name: Some("Night Manager".into()),
                text: request.text.clone(),
                created_at: Utc::now(),
                is_edited: false,
                is_deleted: false,
                reply_to_id: request.reply_to_id,
                attachments: files
                    .iter()
                    .enumerate()
                    .map(|(i, f)| Attachment {
                        id: Some(id * 10 + i as i64),
                        message_id: Some(MessageId::Confirmed(id)),
                        file_name: f.file_name.clone(),
                        mime_type: f.mime_type.clone(),
                        url: Some(format!("https://files.example/{}", f.file_name)),
                        size_bytes: f.size_bytes(),
                    })
                    .collect(),
                reactions: vec![],
                read_by: vec![],
                send_status: SendStatus::Sent,
                client_message_id: Some(request.client_message_id),
            };
            s.messages
                .entry(conversation_id)
                .or_default()
                .push(message.clone());
            Ok(message)
        })
    }
}

#[async_trait]
impl ChatApi for FakeApi {
    async fn list_conversations(&self) -> Result<Vec<Conversation>, ApiError> {
        self.record("list_conversations");
        Ok(self.with(|s| s.conversations.clone()))
    }

    async fn fetch_messages(
        &self,
        conversation_id: ConversationId,
        before: Option<i64>,
        limit: u32,
    ) -> Result<MessagePage, ApiError> {
        self.record("fetch_messages");
        let page = self.with(|s| {
            let all: Vec<Message> = s
                .messages
                .get(&conversation_id)
                .cloned()
                .unwrap_or_default()
                .into_iter()
                .filter(|m| match (before, m.id.server_id()) {
                    (Some(cursor), Some(id)) => id < cursor,
                    _ => true,
                })
                .collect();
            let start = all.len().saturating_sub(limit as usize);
            let messages = all[start..].to_vec();
            MessagePage {
                count: messages.len(),
                messages,
                has_more: start > 0,
            }
        });
        self.wait_fetch_gate().await;
        Ok(page)
    }

    async fn send_message(
        &self,
        conversation_id: ConversationId,
        request: &SendMessageRequest,
    ) -> Result<Message, ApiError> {
        self.record("send_message");
        self.wait_send_gate().await;
        self.store_sent(conversation_id, request, &[])
    }

    async fn send_files(
        &self,
        conversation_id: ConversationId,
        request: &SendMessageRequest,
        files: &[UploadFile],
    ) -> Result<Message, ApiError> {
        self.record("send_files");
        self.wait_send_gate().await;
        self.store_sent(conversation_id, request, files)
    }

    async fn edit_message(
        &self,
        conversation_id: ConversationId,
        message_id: i64,
        text: &str,
    ) -> Result<Message, ApiError> {
        self.record("edit_message");
        self.with(|s| {
            let message = s
                .messages
                .get_mut(&conversation_id)
                .and_then(|ms| ms.iter_mut().find(|m| m.id == MessageId::Confirmed(message_id)))
                .ok_or(ApiError::Status {
                    status: 404,
                    body: "not found".into(),
                })?;
            message.text = Some(text.to_string());
            message.is_edited = true;
            Ok(message.clone())
        })
    }

    async fn delete_message(
        &self,
        conversation_id: ConversationId,
        message_id: i64,
        hard: bool,
    ) -> Result<(), ApiError> {
        self.record("delete_message");
        self.with(|s| {
            if s.fail_deletes {
                return Err(ApiError::Status {
                    status: 500,
                    body: "boom".into(),
                });
            }
            if let Some(messages) = s.messages.get_mut(&conversation_id) {
                if hard {
                    messages.retain(|m| m.id != MessageId::Confirmed(message_id));
                } else if let Some(m) = messages
                    .iter_mut()
                    .find(|m| m.id == MessageId::Confirmed(message_id))
                {
                    m.is_deleted = true;
                    m.text = None;
                }
            }
            Ok(())
        })
    }

    async fn delete_attachment(
        &self,
        _conversation_id: ConversationId,
        _message_id: i64,
        _attachment_id: AttachmentId,
    ) -> Result<(), ApiError> {
        self.record("delete_attachment");
        Ok(())
    }

    async fn add_reaction(
        &self,
        _conversation_id: ConversationId,
        message_id: i64,
        emoji: &str,
    ) -> Result<Vec<Reaction>, ApiError> {
        self.record("add_reaction");
        self.wait_reaction_gate().await;
        self.with(|s| {
            if s.fail_reactions {
                return Err(ApiError::Status {
                    status: 503,
                    body: "unavailable".into(),
                });
            }
            let reactions = s.reactions.entry(message_id).or_default();
            reactions.retain(|r| r.user_id != ME);
            reactions.push(Reaction {
                emoji: emoji.into(),
                user_id: ME,
                message_id: MessageId::Confirmed(message_id),
            });
            Ok(reactions.clone())
        })
    }

    async fn remove_reaction(
        &self,
        _conversation_id: ConversationId,
        message_id: i64,
        emoji: &str,
    ) -> Result<Vec<Reaction>, ApiError> {
        self.record("remove_reaction");
        self.wait_reaction_gate().await;
        self.with(|s| {
            if s.fail_reactions {
                return Err(ApiError::Status {
                    status: 503,
                    body: "unavailable".into(),
                });
            }
            let reactions = s.reactions.entry(message_id).or_default();
            reactions.retain(|r| !(r.user_id == ME && r.emoji == emoji));
            Ok(reactions.clone())
        })
    }

    async fn mark_message_read(
        &self,
        _conversation_id: ConversationId,
        message_id: i64,
    ) -> Result<Vec<ReadReceipt>, ApiError> {
        self.record("mark_message_read");
        self.with(|s| {
            if s.fail_mark_read {
                return Err(ApiError::Network("timeout".into()));
            }
            Ok(vec![ReadReceipt {
                message_id: MessageId::Confirmed(message_id),
                user_id: FRONT_DESK,
                read_at: at(500),
            }])
        })
    }

    async fn mark_conversation_read(
        &self,
        _conversation_id: ConversationId,
    ) -> Result<Vec<ReadReceipt>, ApiError> {
        self.record("mark_conversation_read");
        self.with(|s| {
            if s.fail_mark_read {
                return Err(ApiError::Network("timeout".into()));
            }
            Ok(vec![])
        })
    }

    async fn create_conversation(
        &self,
        request: &CreateConversationRequest,
    ) -> Result<Conversation, ApiError> {
        self.record("create_conversation");
        self.with(|s| {
            s.next_id += 1;
            let mut participants = vec![participant(ME, "Night Manager")];
            participants.extend(
                request
                    .participant_ids
                    .iter()
                    .map(|id| participant(*id, &format!("Staff {id}"))),
            );
            let conversation = Conversation {
                id: s.next_id,
                title: request.title.clone(),
                is_group: request.participant_ids.len() > 1,
                participants,
                messages: vec![],
                last_read_message_id: None,
                unread_count: 0,
                left: false,
                has_more: false,
                messages_loaded: false,
            };
            s.conversations.push(conversation.clone());
            Ok(conversation)
        })
    }
}

/// Transport that records subscribe/unsubscribe calls and issues fresh ids.
#[derive(Default)]
pub struct RecordingTransport {
    next: AtomicU64,
    pub log: Mutex<Vec<String>>,
    pub open: Mutex<HashMap<u64, String>>,
}

impl RecordingTransport {
    pub fn open_channels(&self) -> Vec<String> {
        let mut channels: Vec<String> = self.open.lock().unwrap().values().cloned().collect();
        channels.sort();
        channels
    }
}

impl RealtimeTransport for RecordingTransport {
    fn subscribe(&self, channel: &str) -> Result<SubscriptionHandle, TransportError> {
        let id = self.next.fetch_add(1, Ordering::Relaxed);
        self.log.lock().unwrap().push(format!("+{channel}"));
        self.open.lock().unwrap().insert(id, channel.to_string());
        Ok(SubscriptionHandle::new(id, channel))
    }

    fn unsubscribe(&self, handle: &SubscriptionHandle) {
        self.log.lock().unwrap().push(format!("-{}", handle.channel()));
        self.open.lock().unwrap().remove(&handle.id());
    }
}

/// Notifier that keeps every notification it was asked to show.
pub struct RecordingNotifier {
    pub permission: NotificationPermission,
    pub shown: Mutex<Vec<(String, NotificationOptions)>>,
}

impl RecordingNotifier {
    pub fn granted() -> Arc<Self> {
        Arc::new(Self {
            permission: NotificationPermission::Granted,
            shown: Mutex::new(Vec::new()),
        })
    }

    pub fn shown(&self) -> Vec<(String, NotificationOptions)> {
        self.shown.lock().unwrap().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn permission(&self) -> NotificationPermission {
        self.permission
    }

    fn show_notification(&self, title: &str, options: NotificationOptions) {
        self.shown.lock().unwrap().push((title.to_string(), options));
    }
}

pub struct Harness {
    pub api: Arc<FakeApi>,
    pub transport: Arc<RecordingTransport>,
    pub notifier: Arc<RecordingNotifier>,
    pub session: ChatSession,
}

pub fn harness(config: ChatConfig) -> Harness {
    let api = FakeApi::new();
    let transport = Arc::new(RecordingTransport::default());
    let notifier = RecordingNotifier::granted();
    let session = ChatSession::new(config, api.clone(), transport.clone(), notifier.clone());
    Harness {
        api,
        transport,
        notifier,
        session,
    }
}
