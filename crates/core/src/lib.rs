//! Domain logic for relaying phone calls to a conversational agent.
//!
//! Nothing here knows about the HTTP server; the `callbridge-api` service wires
//! these pieces to axum routes and websocket connections.

pub mod agent_bridge;
pub mod composer;
pub mod session;
pub mod signature;
pub mod twilio;
pub mod twiml;
