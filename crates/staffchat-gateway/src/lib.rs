//! Realtime transports for the staff chat core.
//!
//! [`hub::ChannelHub`] fans events out in-process; [`ws::WsTransport`] talks to
//! the realtime gateway over a WebSocket.

pub mod hub;
pub mod ws;

pub use hub::{ChannelHub, HubTransport};
pub use ws::{WsConfig, WsTransport};
