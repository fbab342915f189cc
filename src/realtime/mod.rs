//! Realtime channels and their binding to the query cache.
//!
//! - [`Broadcaster`] is the pub/sub collaborator: it opens and leaves named
//!   channels and delivers their events.
//! - [`events`] declares which cache keys each server event invalidates.
//! - [`hook::ChannelHook`] ties one channel subscription to the lifetime and
//!   identity of its owner.
//! - [`pusher::PusherConnection`] is a [`Broadcaster`] speaking the Pusher
//!   channel protocol over any [`Transport`](crate::Transport).

pub mod events;
pub mod hook;
pub mod pusher;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::Result;

pub use events::ChannelKind;
pub use hook::{ChannelHook, HookOptions, HookState, SubscriptionPhase};

/// One server-pushed event on a channel.
///
/// Only [`event`](Self::event) drives behavior; the payload is passed along
/// uninterpreted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelEvent {
    pub channel: String,
    pub event: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

/// Opens and leaves realtime channels.
///
/// Each successful [`subscribe`](Broadcaster::subscribe) hands back the
/// receiving end of that channel's event stream. The stream ends when the
/// channel is left or the connection goes away.
#[async_trait]
pub trait Broadcaster: Send + Sync + 'static {
    /// Open `channel` and start delivering its events.
    ///
    /// # Errors
    ///
    /// Any failure to open the channel (authorization, connection loss,
    /// timeout).
    async fn subscribe(&self, channel: &str) -> Result<mpsc::Receiver<ChannelEvent>>;

    /// Leave `channel`. Leaving a channel that is not open is not an error.
    ///
    /// # Errors
    ///
    /// The connection could not be told to leave.
    async fn leave(&self, channel: &str) -> Result<()>;
}
