//! WebSocket client transport for the realtime gateway.
//!
//! Frames are JSON: the client sends [`GatewayCommand`]s and the gateway
//! pushes [`ChannelEnvelope`]s. The connection is kept alive with pings and
//! re-established with backoff; open subscriptions are replayed after every
//! reconnect.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use staffchat_core::{RealtimeTransport, SubscriptionHandle, TransportError};
use staffchat_types::events::{ChannelEnvelope, GatewayCommand};

/// Client sends a Ping every 15 seconds. If 2 consecutive Pongs are missed
/// (~30s), the connection is dropped and re-established.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);
const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone)]
pub struct WsConfig {
    pub url: String,
    /// Sent as a bearer token on the upgrade request.
    pub token: Option<String>,
}

/// Channel name per open handle id.
type ActiveChannels = Arc<RwLock<HashMap<u64, String>>>;

pub struct WsTransport {
    next_id: AtomicU64,
    active: ActiveChannels,
    commands: mpsc::UnboundedSender<GatewayCommand>,
}

impl WsTransport {
    /// Start the connection task. Must be called from within a tokio runtime.
    /// The task stops when the transport is dropped or the event receiver is
    /// closed.
    pub fn connect(config: WsConfig) -> (Self, mpsc::UnboundedReceiver<ChannelEnvelope>) {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let active: ActiveChannels = Arc::new(RwLock::new(HashMap::new()));

        tokio::spawn(run(config, active.clone(), commands_rx, events_tx));

        (
            Self {
                next_id: AtomicU64::new(1),
                active,
                commands: commands_tx,
            },
            events_rx,
        )
    }

    fn channel_refs(&self, channel: &str) -> usize {
        self.active
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|c| c.as_str() == channel)
            .count()
    }
}

impl RealtimeTransport for WsTransport {
    fn subscribe(&self, channel: &str) -> Result<SubscriptionHandle, TransportError> {
        if self.commands.is_closed() {
            return Err(TransportError::Closed);
        }
        let first = self.channel_refs(channel) == 0;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.active
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, channel.to_string());

        if first {
            self.commands
                .send(GatewayCommand::Subscribe {
                    channel: channel.to_string(),
                })
                .map_err(|_| TransportError::Closed)?;
        }
        Ok(SubscriptionHandle::new(id, channel))
    }

    fn unsubscribe(&self, handle: &SubscriptionHandle) {
        let removed = self
            .active
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&handle.id());
        if removed.is_some() && self.channel_refs(handle.channel()) == 0 {
            // Nothing to do if the connection task is gone.
            let _ = self.commands.send(GatewayCommand::Unsubscribe {
                channel: handle.channel().to_string(),
            });
        }
    }
}

enum SessionEnd {
    /// Transport dropped or event consumer gone.
    Shutdown,
    /// Connection lost; reconnect.
    Dropped,
}

async fn run(
    config: WsConfig,
    active: ActiveChannels,
    mut commands: mpsc::UnboundedReceiver<GatewayCommand>,
    events: mpsc::UnboundedSender<ChannelEnvelope>,
) {
    let mut backoff = INITIAL_BACKOFF;

    loop {
        match open(&config).await {
            Ok(stream) => {
                info!(url = %config.url, "Connected to realtime gateway");
                backoff = INITIAL_BACKOFF;
                match run_session(stream, &active, &mut commands, &events).await {
                    SessionEnd::Shutdown => break,
                    SessionEnd::Dropped => warn!("Realtime gateway connection lost"),
                }
            }
            Err(e) => warn!(url = %config.url, "Gateway connect failed: {}", e),
        }

        if events.is_closed() {
            break;
        }

        // Wait out the backoff, but stop early if the transport goes away.
        // Subscribe commands received meanwhile are covered by the replay.
        let sleep = tokio::time::sleep(backoff);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => break,
                cmd = commands.recv() => {
                    if cmd.is_none() {
                        info!("Realtime transport closed");
                        return;
                    }
                }
            }
        }
        backoff = (backoff * 2).min(MAX_BACKOFF);
    }

    info!("Realtime transport closed");
}

async fn open(config: &WsConfig) -> Result<WsStream, TransportError> {
    let mut request = config
        .url
        .as_str()
        .into_client_request()
        .map_err(|e| TransportError::Connect(e.to_string()))?;
    if let Some(token) = &config.token {
        let value = HeaderValue::from_str(&format!("Bearer {}", token))
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        request.headers_mut().insert(AUTHORIZATION, value);
    }
    let (stream, response) = tokio_tungstenite::connect_async(request)
        .await
        .map_err(|e| TransportError::Connect(e.to_string()))?;
    debug!(status = %response.status(), "websocket upgrade complete");
    Ok(stream)
}

fn encode(command: &GatewayCommand) -> Option<Message> {
    match serde_json::to_string(command) {
        Ok(text) => Some(Message::Text(text.into())),
        Err(e) => {
            warn!("Failed to encode gateway command: {}", e);
            None
        }
    }
}

/// Track what this connection is subscribed to and report whether `command`
/// changes it. Commands queued before a replay are already in effect.
fn admit(subscribed: &mut HashSet<String>, command: &GatewayCommand) -> bool {
    match command {
        GatewayCommand::Subscribe { channel } => subscribed.insert(channel.clone()),
        GatewayCommand::Unsubscribe { channel } => subscribed.remove(channel),
    }
}

async fn run_session(
    stream: WsStream,
    active: &ActiveChannels,
    commands: &mut mpsc::UnboundedReceiver<GatewayCommand>,
    events: &mpsc::UnboundedSender<ChannelEnvelope>,
) -> SessionEnd {
    let (mut sender, mut receiver) = stream.split();

    let channels: BTreeSet<String> = active
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .values()
        .cloned()
        .collect();
    let mut subscribed = HashSet::new();
    for channel in channels {
        debug!(channel = %channel, "resubscribing");
        let command = GatewayCommand::Subscribe { channel };
        admit(&mut subscribed, &command);
        let Some(frame) = encode(&command) else {
            continue;
        };
        if sender.send(frame).await.is_err() {
            return SessionEnd::Dropped;
        }
    }

    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    heartbeat.tick().await;
    let mut pong_received = true;
    let mut missed_heartbeats: u8 = 0;

    loop {
        tokio::select! {
            cmd = commands.recv() => {
                let Some(cmd) = cmd else {
                    let _ = sender.close().await;
                    return SessionEnd::Shutdown;
                };
                if !admit(&mut subscribed, &cmd) {
                    debug!(?cmd, "command already in effect");
                    continue;
                }
                let Some(frame) = encode(&cmd) else {
                    continue;
                };
                if sender.send(frame).await.is_err() {
                    return SessionEnd::Dropped;
                }
            }
            frame = receiver.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ChannelEnvelope>(&text) {
                            Ok(envelope) => {
                                if events.send(envelope).is_err() {
                                    let _ = sender.close().await;
                                    return SessionEnd::Shutdown;
                                }
                            }
                            Err(e) => warn!("Invalid gateway frame: {}", e),
                        }
                    }
                    Some(Ok(Message::Pong(_))) => pong_received = true,
                    Some(Ok(Message::Close(_))) | None => return SessionEnd::Dropped,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("Gateway read error: {}", e);
                        return SessionEnd::Dropped;
                    }
                }
            }
            _ = heartbeat.tick() => {
                if pong_received {
                    missed_heartbeats = 0;
                } else {
                    missed_heartbeats += 1;
                    if missed_heartbeats >= 2 {
                        warn!("Heartbeat timeout (missed {} pongs), reconnecting", missed_heartbeats);
                        return SessionEnd::Dropped;
                    }
                }
                pong_received = false;
                if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                    return SessionEnd::Dropped;
                }
            }
        }
    }
}
