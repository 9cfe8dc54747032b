//! Realtime push modules.
//!
//! - `client`: websocket transport, connection lifecycle, reconnect
//!   handling, and the subscription surface.
//! - `dispatch`: subscriber registry and pending-event buffer (internal).

/// Websocket connection, subscriptions, and connection state.
pub mod client;
mod dispatch;
