//! Realtime push-event websocket client.
//!
//! The client owns a single background worker task that holds the one live
//! websocket connection. Consumers register callbacks with [`RealtimeClient::subscribe`];
//! every decoded event is fanned out to all registered subscribers in
//! registration order. Events that arrive while no subscriber is registered
//! are buffered and replayed, in arrival order, to the first subscriber that
//! registers afterwards. A dropped connection is reopened after a fixed
//! delay, indefinitely.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use crate::realtime::dispatch::Dispatcher;

/// Delay between a connection loss and the next connect attempt.
pub const RECONNECT_DELAY: Duration = Duration::from_millis(3000);

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Subscriber callback invoked with each decoded event.
///
/// Handler identity is `Arc` pointer equality: subscribing the same handler
/// value twice registers it once.
pub type EventHandler = Arc<dyn Fn(Value) + Send + Sync>;

/// Configuration for [`RealtimeClient::start`].
#[derive(Clone, Debug)]
pub struct RealtimeConfig {
    endpoint: String,
    reconnect_delay: Duration,
}

impl RealtimeConfig {
    /// Creates a config for the given push endpoint (`ws` or `wss` URL).
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            reconnect_delay: RECONNECT_DELAY,
        }
    }

    /// Overrides the fixed reconnect delay.
    ///
    /// Intended for tests and local development; the interval stays fixed,
    /// there is no backoff growth.
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }
}

/// Lifecycle of the single logical connection owned by the worker.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Open,
    Closing,
}

/// Handle returned by [`RealtimeClient::subscribe`], used to unsubscribe.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Subscription {
    id: u64,
}

/// Errors produced by the realtime client surface.
#[derive(Debug, Error)]
pub enum RealtimeClientError {
    /// Configuration rejected at construction time.
    #[error("invalid realtime configuration: {0}")]
    Config(String),

    /// The client was closed; no further subscriptions are accepted.
    #[error("realtime client is closed")]
    Closed,
}

enum Command {
    Subscribe { id: u64, handler: EventHandler },
    Unsubscribe { id: u64 },
    Connect,
    Close,
}

/// Cheap-to-clone handle to the realtime worker.
///
/// All clones talk to the same worker and the same connection. The worker
/// shuts down when [`RealtimeClient::close`] is called or every clone has
/// been dropped.
#[derive(Clone)]
pub struct RealtimeClient {
    commands: mpsc::UnboundedSender<Command>,
    state_rx: watch::Receiver<ConnectionState>,
    next_subscription_id: Arc<AtomicU64>,
}

impl RealtimeClient {
    /// Validates the config and spawns the connection worker.
    ///
    /// The worker starts in `Disconnected` state and opens no socket until
    /// the first [`subscribe`](Self::subscribe) or an explicit
    /// [`connect`](Self::connect). Must be called within a tokio runtime.
    pub fn start(config: RealtimeConfig) -> Result<Self, RealtimeClientError> {
        let endpoint = config.endpoint.trim().to_string();
        if endpoint.is_empty() {
            return Err(RealtimeClientError::Config(
                "endpoint must not be empty".to_string(),
            ));
        }
        if !endpoint.starts_with("ws://") && !endpoint.starts_with("wss://") {
            return Err(RealtimeClientError::Config(format!(
                "endpoint must use a ws or wss scheme, got {endpoint:?}"
            )));
        }

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);

        tokio::spawn(realtime_worker(
            endpoint,
            config.reconnect_delay,
            commands_rx,
            state_tx,
        ));

        Ok(Self {
            commands: commands_tx,
            state_rx,
            next_subscription_id: Arc::new(AtomicU64::new(1)),
        })
    }

    /// Registers `handler` to receive every subsequent decoded event.
    ///
    /// Opens the connection if it is currently down. Any events buffered
    /// while no subscriber was registered are delivered to this handler
    /// first, in arrival order. Subscribing an already-registered handler is
    /// a no-op aliasing the existing registration.
    pub fn subscribe(&self, handler: EventHandler) -> Result<Subscription, RealtimeClientError> {
        let id = self.next_subscription_id.fetch_add(1, Ordering::Relaxed);
        self.commands
            .send(Command::Subscribe { id, handler })
            .map_err(|_| RealtimeClientError::Closed)?;
        Ok(Subscription { id })
    }

    /// Convenience wrapper that boxes a closure and subscribes it.
    ///
    /// Each call creates a distinct subscriber, even for the same closure.
    pub fn subscribe_fn<F>(&self, handler: F) -> Result<Subscription, RealtimeClientError>
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        self.subscribe(Arc::new(handler))
    }

    /// Removes the subscriber for `subscription`.
    ///
    /// No effect if it was never registered or was already removed. The
    /// connection is kept open for future subscribers.
    pub fn unsubscribe(&self, subscription: &Subscription) {
        let _ = self.commands.send(Command::Unsubscribe {
            id: subscription.id,
        });
    }

    /// Opens the connection without registering a subscriber.
    ///
    /// Events received before the first subscription are buffered and
    /// delivered to it on registration. No effect if the connection is
    /// already up or the client is closed.
    pub fn connect(&self) {
        let _ = self.commands.send(Command::Connect);
    }

    /// Closes the connection and stops the worker.
    ///
    /// Idempotent. Subsequent [`subscribe`](Self::subscribe) calls fail with
    /// [`RealtimeClientError::Closed`].
    pub fn close(&self) {
        let _ = self.commands.send(Command::Close);
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Watch receiver for connection state transitions.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }
}

enum SessionOutcome {
    Reconnect,
    Shutdown,
}

async fn realtime_worker(
    endpoint: String,
    reconnect_delay: Duration,
    mut commands: mpsc::UnboundedReceiver<Command>,
    state_tx: watch::Sender<ConnectionState>,
) {
    let mut dispatcher = Dispatcher::new();

    // Idle until something asks for the connection.
    loop {
        match commands.recv().await {
            Some(Command::Subscribe { id, handler }) => {
                dispatcher.subscribe(id, handler);
                break;
            }
            Some(Command::Connect) => break,
            Some(Command::Unsubscribe { id }) => dispatcher.unsubscribe(id),
            Some(Command::Close) | None => return,
        }
    }

    loop {
        let _ = state_tx.send(ConnectionState::Connecting);
        match connect_async(endpoint.as_str()).await {
            Ok((socket, _)) => {
                let _ = state_tx.send(ConnectionState::Open);
                debug!(event = "realtime_connected", endpoint = %endpoint);
                match run_open_connection(socket, &mut commands, &mut dispatcher, &state_tx).await {
                    SessionOutcome::Shutdown => {
                        let _ = state_tx.send(ConnectionState::Disconnected);
                        return;
                    }
                    SessionOutcome::Reconnect => {}
                }
            }
            Err(err) => {
                warn!(event = "realtime_connect_failed", endpoint = %endpoint, error = %err);
            }
        }

        let _ = state_tx.send(ConnectionState::Disconnected);
        if !apply_commands_during_delay(reconnect_delay, &mut commands, &mut dispatcher).await {
            return;
        }
    }
}

async fn run_open_connection(
    mut socket: Socket,
    commands: &mut mpsc::UnboundedReceiver<Command>,
    dispatcher: &mut Dispatcher,
    state_tx: &watch::Sender<ConnectionState>,
) -> SessionOutcome {
    loop {
        // Commands queued before a frame must take effect before it is
        // dispatched, so a subscriber registered ahead of an event never
        // misses it.
        tokio::select! {
            biased;
            maybe_command = commands.recv() => {
                match maybe_command {
                    Some(Command::Subscribe { id, handler }) => dispatcher.subscribe(id, handler),
                    Some(Command::Unsubscribe { id }) => dispatcher.unsubscribe(id),
                    Some(Command::Connect) => {}
                    Some(Command::Close) | None => {
                        let _ = state_tx.send(ConnectionState::Closing);
                        let _ = socket.close(None).await;
                        return SessionOutcome::Shutdown;
                    }
                }
            }
            maybe_frame = socket.next() => {
                match maybe_frame {
                    Some(Ok(Message::Text(text))) => dispatcher.dispatch_frame(text.as_str()),
                    Some(Ok(Message::Ping(payload))) => {
                        if socket.send(Message::Pong(payload)).await.is_err() {
                            return SessionOutcome::Reconnect;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {}
                    Some(Ok(Message::Close(frame))) => {
                        match frame {
                            Some(frame) => debug!(
                                event = "realtime_connection_closed",
                                code = u16::from(frame.code),
                                reason = %frame.reason
                            ),
                            None => debug!(event = "realtime_connection_closed"),
                        }
                        return SessionOutcome::Reconnect;
                    }
                    // The push protocol is text-only; anything else is
                    // undecodable and skipped without dropping the connection.
                    Some(Ok(_)) => {
                        warn!(event = "realtime_frame_skipped", reason = "non-text frame");
                    }
                    Some(Err(err)) => {
                        warn!(event = "realtime_transport_error", error = %err);
                        return SessionOutcome::Reconnect;
                    }
                    None => return SessionOutcome::Reconnect,
                }
            }
        }
    }
}

/// Waits out the reconnect delay while still applying incoming commands.
///
/// A new subscription or an explicit connect request ends the wait early,
/// matching a subscribe-while-disconnected opening the connection at once.
/// Returns `false` when the worker should shut down instead of reconnecting.
async fn apply_commands_during_delay(
    delay: Duration,
    commands: &mut mpsc::UnboundedReceiver<Command>,
    dispatcher: &mut Dispatcher,
) -> bool {
    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);

    loop {
        tokio::select! {
            _ = &mut sleep => return true,
            maybe_command = commands.recv() => {
                match maybe_command {
                    Some(Command::Subscribe { id, handler }) => {
                        dispatcher.subscribe(id, handler);
                        return true;
                    }
                    Some(Command::Connect) => return true,
                    Some(Command::Unsubscribe { id }) => dispatcher.unsubscribe(id),
                    Some(Command::Close) | None => return false,
                }
            }
        }
    }
}
