//! Wire transport
//!
//! Framed protobuf RPC over TCP. [`AgentServer`] exposes an agent's three
//! entry points; [`AgentClient`] is the host-side stub. Both ends speak
//! [`RpcFrame`]s through a length-delimited codec.

pub mod client;
pub mod frame;
pub mod server;

pub use client::AgentClient;
pub use frame::{FrameKind, Method, RpcFrame};
pub use server::AgentServer;
