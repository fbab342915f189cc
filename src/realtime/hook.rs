//! Lifecycle manager binding one channel subscription to its owner.
//!
//! A [`ChannelHook`] is owned by whatever component displays a game or a
//! lobby. The owner calls [`sync`](ChannelHook::sync) whenever its inputs
//! (entity id, `enabled`) may have changed and [`teardown`](ChannelHook::teardown)
//! when it goes away. The hook then keeps at most one channel open:
//!
//! ```text
//!                 sync(id, enabled)            subscribe fails
//!  Unsubscribed ───────────────────▶ Subscribed       │
//!       ▲   ▲                          │              ▼
//!       │   └──────── teardown / ──────┘            Error
//!       │             disabled / id change            │
//!       └─────────────────────────────────────────────┘
//! ```
//!
//! When the id changes, the old channel is left before the new one is
//! opened. Events arriving on the open channel are looked up in the kind's
//! [event table](crate::realtime::events) and the matching cache keys are
//! invalidated.
//!
//! # Example
//!
//! ```rust,no_run
//! # async fn example(
//! #     broadcaster: std::sync::Arc<dyn arena_client::realtime::Broadcaster>,
//! # ) {
//! use std::sync::Arc;
//! use arena_client::cache::MemoryQueryCache;
//! use arena_client::realtime::{ChannelHook, HookOptions};
//!
//! let cache = Arc::new(MemoryQueryCache::new());
//! let mut hook = ChannelHook::lobby(broadcaster, cache);
//!
//! let state = hook.sync(Some("01HW3K"), HookOptions::default()).await;
//! assert!(state.is_connected || state.error.is_some());
//!
//! hook.teardown().await;
//! # }
//! ```

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::{QueryCache, QueryKey};
use crate::realtime::events::ChannelKind;
use crate::realtime::{Broadcaster, ChannelEvent};

/// Inputs of a hook besides the entity id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HookOptions {
    /// When `false` no channel is held. Defaults to `true`.
    pub enabled: bool,
}

impl Default for HookOptions {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl HookOptions {
    /// Options that hold no channel.
    pub fn disabled() -> Self {
        Self { enabled: false }
    }
}

/// Externally observable state of a hook.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HookState {
    /// `true` while a channel is open and its event stream is live.
    pub is_connected: bool,
    /// Message of the last failed subscribe attempt, cleared by the next
    /// attempt.
    pub error: Option<String>,
}

/// Where the hook is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionPhase {
    Unsubscribed,
    Subscribed,
    Error,
}

/// One listener: an event name and the keys it invalidates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundHandler {
    pub event: String,
    pub keys: Vec<QueryKey>,
}

/// An open channel together with its bound listeners.
#[derive(Debug)]
pub struct ChannelSubscription {
    channel: String,
    entity_id: String,
    handlers: Vec<BoundHandler>,
    dispatcher: JoinHandle<()>,
}

impl ChannelSubscription {
    /// Full channel name, e.g. `private-game.<id>`.
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Id of the game or lobby the channel belongs to.
    pub fn entity_id(&self) -> &str {
        &self.entity_id
    }

    /// Listeners bound on this channel, one per event in the kind's table.
    pub fn handlers(&self) -> &[BoundHandler] {
        &self.handlers
    }

    /// `false` once the event stream has ended (channel left remotely or
    /// connection lost).
    pub fn is_live(&self) -> bool {
        !self.dispatcher.is_finished()
    }
}

/// Keeps one channel subscription in step with its owner's inputs.
pub struct ChannelHook {
    kind: ChannelKind,
    broadcaster: Arc<dyn Broadcaster>,
    cache: Arc<dyn QueryCache>,
    /// Last applied `(id, enabled)`; `None` until the first sync.
    inputs: Option<(Option<String>, bool)>,
    subscription: Option<ChannelSubscription>,
    phase: SubscriptionPhase,
    error: Option<String>,
}

impl ChannelHook {
    /// Create an idle hook. Nothing is subscribed until the first [`sync`](Self::sync).
    pub fn new(
        kind: ChannelKind,
        broadcaster: Arc<dyn Broadcaster>,
        cache: Arc<dyn QueryCache>,
    ) -> Self {
        Self {
            kind,
            broadcaster,
            cache,
            inputs: None,
            subscription: None,
            phase: SubscriptionPhase::Unsubscribed,
            error: None,
        }
    }

    /// Hook for `private-game.<id>` channels.
    pub fn game(broadcaster: Arc<dyn Broadcaster>, cache: Arc<dyn QueryCache>) -> Self {
        Self::new(ChannelKind::Game, broadcaster, cache)
    }

    /// Hook for `private-lobby.<id>` channels.
    pub fn lobby(broadcaster: Arc<dyn Broadcaster>, cache: Arc<dyn QueryCache>) -> Self {
        Self::new(ChannelKind::Lobby, broadcaster, cache)
    }

    /// Create a hook and apply its initial inputs.
    pub async fn mount(
        kind: ChannelKind,
        id: Option<&str>,
        options: HookOptions,
        broadcaster: Arc<dyn Broadcaster>,
        cache: Arc<dyn QueryCache>,
    ) -> Self {
        let mut hook = Self::new(kind, broadcaster, cache);
        hook.sync(id, options).await;
        hook
    }

    /// Apply the owner's current inputs.
    ///
    /// Does nothing when `(id, enabled)` equal the last applied inputs.
    /// Otherwise leaves the open channel, if any, and subscribes again when
    /// enabled with a non-empty id.
    pub async fn sync(&mut self, id: Option<&str>, options: HookOptions) -> HookState {
        let id = id.filter(|id| !id.is_empty()).map(str::to_owned);
        let inputs = (id, options.enabled);
        if self.inputs.as_ref() == Some(&inputs) {
            return self.state();
        }

        self.apply(Some(inputs)).await
    }

    /// Leave and reopen the channel with the current inputs.
    ///
    /// Private channel authorization is per user, so call this after the
    /// signed-in identity changes.
    pub async fn resubscribe(&mut self) -> HookState {
        let inputs = self.inputs.take();
        self.apply(inputs).await
    }

    /// Leave the channel and forget the inputs. A later
    /// [`sync`](Self::sync) mounts the hook again.
    pub async fn teardown(&mut self) -> HookState {
        self.close().await;
        self.inputs = None;
        self.state()
    }

    /// Current connection flag and last subscribe error.
    pub fn state(&self) -> HookState {
        HookState {
            is_connected: self.phase == SubscriptionPhase::Subscribed
                && self.subscription.as_ref().is_some_and(ChannelSubscription::is_live),
            error: self.error.clone(),
        }
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> SubscriptionPhase {
        self.phase
    }

    /// Channel kind this hook subscribes to.
    pub fn kind(&self) -> ChannelKind {
        self.kind
    }

    /// The open subscription, if any.
    pub fn subscription(&self) -> Option<&ChannelSubscription> {
        self.subscription.as_ref()
    }

    /// Name of the open channel, if any.
    pub fn channel_name(&self) -> Option<&str> {
        self.subscription.as_ref().map(ChannelSubscription::channel)
    }

    /// Leave the open channel and subscribe for `inputs`.
    ///
    /// The inputs are committed only once applied, so a sync cancelled
    /// mid-subscribe is redone by the next one.
    async fn apply(&mut self, inputs: Option<(Option<String>, bool)>) -> HookState {
        self.inputs = None;
        self.close().await;
        if let Some((Some(id), true)) = &inputs {
            self.open(id.clone()).await;
        }
        self.inputs = inputs;
        self.state()
    }

    async fn open(&mut self, id: String) {
        let channel = self.kind.channel_name(&id);
        self.error = None;

        let events = match self.broadcaster.subscribe(&channel).await {
            Ok(events) => events,
            Err(e) => {
                warn!(channel = %channel, error = %e, "failed to open channel");
                self.error = Some(e.to_string());
                self.phase = SubscriptionPhase::Error;
                return;
            }
        };

        let handlers: Vec<BoundHandler> = self
            .kind
            .event_table()
            .iter()
            .map(|(event, invalidates)| BoundHandler {
                event: (*event).to_string(),
                keys: invalidates.keys(&id),
            })
            .collect();

        let dispatcher = tokio::spawn(dispatch(
            channel.clone(),
            events,
            handlers.clone(),
            Arc::clone(&self.cache),
        ));

        info!(channel = %channel, listeners = handlers.len(), "subscribed");
        self.subscription = Some(ChannelSubscription {
            channel,
            entity_id: id,
            handlers,
            dispatcher,
        });
        self.phase = SubscriptionPhase::Subscribed;
    }

    /// Unbind every listener and leave the channel. Returns once the
    /// channel has been left.
    async fn close(&mut self) {
        if let Some(mut subscription) = self.subscription.take() {
            subscription.dispatcher.abort();
            if let Err(e) = (&mut subscription.dispatcher).await {
                if !e.is_cancelled() {
                    warn!(channel = %subscription.channel, error = %e, "event dispatcher failed");
                }
            }
            subscription.handlers.clear();

            match self.broadcaster.leave(&subscription.channel).await {
                Ok(()) => debug!(channel = %subscription.channel, "left channel"),
                Err(e) => warn!(channel = %subscription.channel, error = %e, "failed to leave channel"),
            }
        }
        self.phase = SubscriptionPhase::Unsubscribed;
    }
}

impl std::fmt::Debug for ChannelHook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelHook")
            .field("kind", &self.kind)
            .field("channel", &self.channel_name())
            .field("phase", &self.phase)
            .field("error", &self.error)
            .finish_non_exhaustive()
    }
}

impl Drop for ChannelHook {
    fn drop(&mut self) {
        // Drop cannot await the leave, so hand it to the runtime if there is one.
        let Some(subscription) = self.subscription.take() else {
            return;
        };
        subscription.dispatcher.abort();

        let channel = subscription.channel;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let broadcaster = Arc::clone(&self.broadcaster);
                handle.spawn(async move {
                    if let Err(e) = broadcaster.leave(&channel).await {
                        warn!(channel = %channel, error = %e, "failed to leave channel of dropped hook");
                    }
                });
            }
            Err(_) => {
                warn!(channel = %channel, "hook dropped outside a runtime; channel not left");
            }
        }
    }
}

/// Route each incoming event to its bound listeners until the stream ends.
async fn dispatch(
    channel: String,
    mut events: mpsc::Receiver<ChannelEvent>,
    handlers: Vec<BoundHandler>,
    cache: Arc<dyn QueryCache>,
) {
    while let Some(event) = events.recv().await {
        let mut handled = false;
        for handler in handlers.iter().filter(|h| h.event == event.event) {
            handled = true;
            for key in &handler.keys {
                cache.invalidate(key);
            }
        }
        if !handled {
            debug!(channel = %channel, event = %event.event, "no listener for event");
        }
    }
    debug!(channel = %channel, "event stream ended");
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use crate::error::{ArenaError, Result};
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;

    /// Records subscribe/leave calls in order and keeps each channel's sender.
    #[derive(Default)]
    struct ScriptedBroadcaster {
        log: StdMutex<Vec<String>>,
        senders: StdMutex<Vec<(String, mpsc::Sender<ChannelEvent>)>>,
        fail_next: StdMutex<Option<String>>,
        subscribe_delay: StdMutex<Option<std::time::Duration>>,
    }

    #[async_trait]
    impl Broadcaster for ScriptedBroadcaster {
        async fn subscribe(&self, channel: &str) -> Result<mpsc::Receiver<ChannelEvent>> {
            self.log.lock().unwrap().push(format!("subscribe {channel}"));
            let delay = *self.subscribe_delay.lock().unwrap();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            if let Some(message) = self.fail_next.lock().unwrap().take() {
                return Err(ArenaError::Subscription {
                    channel: channel.into(),
                    message,
                });
            }
            let (tx, rx) = mpsc::channel(8);
            self.senders.lock().unwrap().push((channel.to_string(), tx));
            Ok(rx)
        }

        async fn leave(&self, channel: &str) -> Result<()> {
            self.log.lock().unwrap().push(format!("leave {channel}"));
            self.senders.lock().unwrap().retain(|(name, _)| name != channel);
            Ok(())
        }
    }

    #[derive(Default)]
    struct NullCache;

    impl QueryCache for NullCache {
        fn invalidate(&self, _key: &QueryKey) {}
    }

    fn hook(kind: ChannelKind) -> (ChannelHook, Arc<ScriptedBroadcaster>) {
        let broadcaster = Arc::new(ScriptedBroadcaster::default());
        let hook = ChannelHook::new(kind, broadcaster.clone(), Arc::new(NullCache));
        (hook, broadcaster)
    }

    fn log(broadcaster: &ScriptedBroadcaster) -> Vec<String> {
        broadcaster.log.lock().unwrap().clone()
    }

    #[tokio::test]
    async fn unchanged_inputs_do_not_resubscribe() {
        let (mut hook, broadcaster) = hook(ChannelKind::Game);
        hook.sync(Some("G1"), HookOptions::default()).await;
        hook.sync(Some("G1"), HookOptions::default()).await;
        assert_eq!(log(&broadcaster), vec!["subscribe private-game.G1"]);
        assert_eq!(hook.channel_name(), Some("private-game.G1"));
    }

    #[tokio::test]
    async fn missing_or_empty_id_holds_no_channel() {
        let (mut hook, broadcaster) = hook(ChannelKind::Lobby);
        let state = hook.sync(None, HookOptions::default()).await;
        assert!(!state.is_connected);
        let state = hook.sync(Some(""), HookOptions::default()).await;
        assert!(!state.is_connected);
        assert!(log(&broadcaster).is_empty());
        assert_eq!(hook.phase(), SubscriptionPhase::Unsubscribed);
    }

    #[tokio::test]
    async fn bound_handlers_follow_the_event_table() {
        let (mut hook, _broadcaster) = hook(ChannelKind::Lobby);
        hook.sync(Some("L1"), HookOptions::default()).await;

        let subscription = hook.subscription().unwrap();
        assert_eq!(subscription.entity_id(), "L1");
        assert_eq!(subscription.handlers().len(), 6);
        let joined = subscription
            .handlers()
            .iter()
            .find(|h| h.event == "PlayerJoined")
            .unwrap();
        assert_eq!(joined.keys, vec![QueryKey::lobby("L1"), QueryKey::lobbies()]);
    }

    #[tokio::test]
    async fn error_is_kept_while_disabled_and_cleared_on_retry() {
        let (mut hook, broadcaster) = hook(ChannelKind::Game);
        *broadcaster.fail_next.lock().unwrap() = Some("socket not ready".into());

        let state = hook.sync(Some("G1"), HookOptions::default()).await;
        assert!(!state.is_connected);
        assert!(state.error.as_deref().unwrap().contains("socket not ready"));
        assert_eq!(hook.phase(), SubscriptionPhase::Error);

        let state = hook.sync(Some("G1"), HookOptions::disabled()).await;
        assert!(state.error.is_some());
        assert_eq!(hook.phase(), SubscriptionPhase::Unsubscribed);

        let state = hook.sync(Some("G1"), HookOptions::default()).await;
        assert!(state.is_connected);
        assert!(state.error.is_none());
    }

    #[tokio::test]
    async fn state_drops_when_stream_ends() {
        let (mut hook, broadcaster) = hook(ChannelKind::Game);
        hook.sync(Some("G1"), HookOptions::default()).await;
        assert!(hook.state().is_connected);

        // Simulate the connection dropping the channel.
        broadcaster.senders.lock().unwrap().clear();
        tokio::time::timeout(std::time::Duration::from_secs(1), async {
            while hook.state().is_connected {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        assert_eq!(hook.phase(), SubscriptionPhase::Subscribed);
    }

    #[tokio::test(start_paused = true)]
    async fn sync_cancelled_mid_subscribe_is_retried() {
        let (mut hook, broadcaster) = hook(ChannelKind::Game);
        *broadcaster.subscribe_delay.lock().unwrap() = Some(std::time::Duration::from_millis(200));

        let cancelled = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            hook.sync(Some("G1"), HookOptions::default()),
        )
        .await;
        assert!(cancelled.is_err());
        assert!(!hook.state().is_connected);

        let state = hook.sync(Some("G1"), HookOptions::default()).await;
        assert!(state.is_connected);
        assert_eq!(
            log(&broadcaster),
            vec!["subscribe private-game.G1", "subscribe private-game.G1"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn resubscribe_cancelled_mid_subscribe_is_retried_by_sync() {
        let (mut hook, broadcaster) = hook(ChannelKind::Lobby);
        hook.sync(Some("L1"), HookOptions::default()).await;
        *broadcaster.subscribe_delay.lock().unwrap() = Some(std::time::Duration::from_millis(200));

        let cancelled =
            tokio::time::timeout(std::time::Duration::from_millis(50), hook.resubscribe()).await;
        assert!(cancelled.is_err());
        assert!(hook.subscription().is_none());

        let state = hook.sync(Some("L1"), HookOptions::default()).await;
        assert!(state.is_connected);
        assert_eq!(hook.channel_name(), Some("private-lobby.L1"));
    }

    #[tokio::test]
    async fn teardown_then_sync_remounts() {
        let (mut hook, broadcaster) = hook(ChannelKind::Game);
        hook.sync(Some("G1"), HookOptions::default()).await;
        hook.teardown().await;
        hook.sync(Some("G1"), HookOptions::default()).await;
        assert_eq!(
            log(&broadcaster),
            vec![
                "subscribe private-game.G1",
                "leave private-game.G1",
                "subscribe private-game.G1",
            ]
        );
    }

    #[tokio::test]
    async fn dropping_a_subscribed_hook_leaves_in_background() {
        let (mut hook, broadcaster) = hook(ChannelKind::Lobby);
        hook.sync(Some("L1"), HookOptions::default()).await;
        drop(hook);

        tokio::time::timeout(std::time::Duration::from_secs(1), async {
            while !log(&broadcaster).contains(&"leave private-lobby.L1".to_string()) {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
    }
}
