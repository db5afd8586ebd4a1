//! Ports for the flow mapper.

pub mod inbound;

pub use inbound::FlowMapperApi;
