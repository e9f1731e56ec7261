//! AnyAgent: execution protocol between a messaging bot server and
//! independently deployed agents.
//!
//! The host forwards each user interaction as an [`AgentRequest`]; the agent
//! answers with an ordered stream of [`AgentResponse`] values carrying
//! messages to deliver, payment requests, and memory entries.
//!
//! - [`proto`]: protocol data model (prost messages)
//! - [`session`]: the agent trait and the Help/Execute/ExecuteStream runtime
//! - [`payment`]: agent-side pricing and payment policy
//! - [`host`]: bot-server collaborators and the response applier
//! - [`transport`]: framed protobuf RPC over TCP

pub mod agents;
pub mod config;
pub mod error;
pub mod host;
pub mod payment;
pub mod proto;
pub mod session;
pub mod transport;
pub mod utils;

pub use config::Config;
pub use error::{AgentError, Result};
pub use proto::{AgentRequest, AgentResponse, TelegramMessage};
pub use session::{Agent, Emitter, ResponseStream, Session, TurnEvent, TurnStream};
