//! Connection and session management for a single point-to-point link
//!
//! This module handles:
//! - The listener (server) and initiator (client) handshake roles
//! - Promotion of a connected socket into a session with its own read loop
//! - The single "current session" that sends are routed to
//! - Ordered delivery of lifecycle and data events to one consumer

mod candidate;
mod current;
mod events;
mod initiator;
mod listener;
mod manager;
mod role;
mod session;

#[cfg(test)]
mod testing;

pub use manager::{BluetoothConfig, BluetoothMode, ConnectionConfig, ConnectionManager};
pub use role::RoleHandle;
