//! Realtime media relay over WebSockets.
//!
//! - `protocol`: the vendor's media stream events and the replies the relay sends.
//! - `relay`: the per-connection state machine.
//! - `session`: the websocket connection lifecycle.

pub mod protocol;
pub mod relay;
pub mod session;

pub use session::ws_handler;
