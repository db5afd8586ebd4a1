//! Ports for the session manager.

pub mod inbound;

pub use inbound::SessionEventHandler;
