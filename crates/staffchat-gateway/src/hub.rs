use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::mpsc;
use tracing::{debug, trace};

use staffchat_core::{RealtimeTransport, SubscriptionHandle, TransportError};
use staffchat_types::events::{ChannelEnvelope, RealtimeEvent};

/// In-process channel fan-out. Every connection gets its own event stream and
/// receives events only for the channels it subscribed to.
#[derive(Clone, Default)]
pub struct ChannelHub {
    inner: Arc<HubInner>,
}

#[derive(Default)]
struct HubInner {
    next_id: AtomicU64,
    /// channel -> subscribers
    channels: RwLock<HashMap<String, Vec<Subscriber>>>,
}

struct Subscriber {
    handle_id: u64,
    connection_id: u64,
    tx: mpsc::UnboundedSender<ChannelEnvelope>,
}

impl ChannelHub {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&self) -> u64 {
        self.inner.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Open a connection. Events for its subscriptions arrive on the receiver.
    pub fn connect(&self) -> (HubTransport, mpsc::UnboundedReceiver<ChannelEnvelope>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connection_id = self.next_id();
        debug!(connection_id, "hub connection opened");
        (
            HubTransport {
                hub: self.clone(),
                connection_id,
                tx,
            },
            rx,
        )
    }

    /// Deliver `event` to every connection subscribed to `channel`. Returns the
    /// number of connections reached. Closed connections are pruned.
    pub fn publish(&self, channel: &str, event: RealtimeEvent) -> usize {
        let mut channels = self
            .inner
            .channels
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let Some(subscribers) = channels.get_mut(channel) else {
            trace!(channel, event = event.tag(), "no subscribers");
            return 0;
        };

        let mut reached = HashSet::new();
        subscribers.retain(|sub| {
            if reached.contains(&sub.connection_id) {
                return true;
            }
            let envelope = ChannelEnvelope {
                channel: channel.to_string(),
                event: event.clone(),
            };
            if sub.tx.send(envelope).is_err() {
                return false;
            }
            reached.insert(sub.connection_id);
            true
        });
        if subscribers.is_empty() {
            channels.remove(channel);
        }
        trace!(channel, event = event.tag(), reached = reached.len(), "published");
        reached.len()
    }

    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.inner
            .channels
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(channel)
            .map_or(0, Vec::len)
    }

    fn remove_where(&self, mut pred: impl FnMut(&Subscriber) -> bool) {
        let mut channels = self
            .inner
            .channels
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        channels.retain(|_, subscribers| {
            subscribers.retain(|sub| !pred(sub));
            !subscribers.is_empty()
        });
    }
}

/// One connection to a [`ChannelHub`].
pub struct HubTransport {
    hub: ChannelHub,
    connection_id: u64,
    tx: mpsc::UnboundedSender<ChannelEnvelope>,
}

impl RealtimeTransport for HubTransport {
    fn subscribe(&self, channel: &str) -> Result<SubscriptionHandle, TransportError> {
        if self.tx.is_closed() {
            return Err(TransportError::Closed);
        }
        let handle_id = self.hub.next_id();
        self.hub
            .inner
            .channels
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(channel.to_string())
            .or_default()
            .push(Subscriber {
                handle_id,
                connection_id: self.connection_id,
                tx: self.tx.clone(),
            });
        Ok(SubscriptionHandle::new(handle_id, channel))
    }

    fn unsubscribe(&self, handle: &SubscriptionHandle) {
        self.hub.remove_where(|sub| sub.handle_id == handle.id());
    }
}

impl Drop for HubTransport {
    fn drop(&mut self) {
        let connection_id = self.connection_id;
        self.hub.remove_where(|sub| sub.connection_id == connection_id);
        debug!(connection_id, "hub connection closed");
    }
}
