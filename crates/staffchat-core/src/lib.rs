//! Client-side realtime synchronization core for staff chat.
//!
//! All conversation state lives in one [`ConversationStore`] and is mutated
//! only through [`StoreAction`]s. Optimistic local paths, HTTP completions and
//! realtime events all reduce to the same actions.

pub mod actions;
pub mod api;
pub mod config;
pub mod error;
pub mod notify;
pub mod pipeline;
pub mod reactions;
pub mod receipts;
pub mod session;
pub mod store;
pub mod subscriptions;

pub use actions::{ActionOutcome, StoreAction};
pub use api::ChatApi;
pub use config::ChatConfig;
pub use error::{ApiError, ChatError, ChatResult, TransportError, ValidationError};
pub use notify::{
    NotificationGate, NotificationOptions, NotificationPermission, Notifier, NullNotifier,
    TracingNotifier,
};
pub use pipeline::{OutboundPipeline, validate_files};
pub use reactions::{ReactionAggregator, ToggleOutcome, group_reactions};
pub use receipts::ReadReceiptAggregator;
pub use session::ChatSession;
pub use store::{ConversationStore, SharedStore, StoreChange, StoreListener};
pub use subscriptions::{
    RealtimeTransport, SubscriptionHandle, SubscriptionManager, SyncReport, route_event,
};
