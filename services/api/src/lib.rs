//! Call Relay API Library Crate
//!
//! This library contains the HTTP side of the relay: configuration, shared
//! state, the vendor webhook handlers and signature middleware, the media
//! stream websocket, and routing. The binaries are thin wrappers around it.

pub mod config;
pub mod handlers;
pub mod middleware;
pub mod router;
pub mod state;
pub mod ws;
