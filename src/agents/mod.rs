//! Sample agents.

pub mod echo;

pub use echo::EchoAgent;
