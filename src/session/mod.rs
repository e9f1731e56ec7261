//! Execution session
//!
//! An [`Agent`] processes one [`AgentRequest`] per turn and produces an
//! ordered, possibly empty, sequence of [`AgentResponse`] values by calling
//! its [`Emitter`]. A [`Session`] drives the agent for one call:
//!
//! - **Help**: one request in, a stream of responses out
//! - **Execute**: one request in, exactly one (merged) response out
//! - **ExecuteStream**: a stream of requests in, one ordered stream out
//!
//! ```text
//!  requests ──► [validate] ──► Agent::execute ──► Emitter ──► mpsc ──► ResponseStream
//!                  │                 │ error                               ▲
//!                  │ protocol error  └──► "⚠️ Error: ..." ─────────────────┤
//!                  └──────────────────────► Err(..) then end ──────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use anyagent::agents::EchoAgent;
//! use anyagent::config::SessionConfig;
//! use anyagent::proto::{AgentRequest, TelegramMessage};
//! use anyagent::session::Session;
//!
//! # #[tokio::main]
//! # async fn main() -> anyagent::Result<()> {
//! let session = Session::new(Arc::new(EchoAgent::default()), SessionConfig::default());
//! let response = session
//!     .execute(AgentRequest::message(TelegramMessage::text("Hello")))
//!     .await?;
//! assert!(response.text_content().unwrap().contains("Hello"));
//! # Ok(())
//! # }
//! ```

mod emitter;
mod runner;
mod state;

pub use emitter::Emitter;
pub use runner::{error_response, Session, ERROR_PREFIX};
pub use state::TurnState;

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::error::Result;
use crate::proto::{AgentRequest, AgentResponse};

/// Ordered output of a Help or ExecuteStream call.
///
/// An `Err` item is a protocol error and is always the last item.
pub type ResponseStream = Pin<Box<dyn Stream<Item = Result<AgentResponse>> + Send>>;

/// One item of a turn-delimited ExecuteStream output.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnEvent {
    /// An emission of the current turn
    Response(AgentResponse),
    /// The current turn finished and all of its emissions precede this
    TurnEnd,
}

impl TurnEvent {
    /// Reads an internal output item. Emitters never send empty responses,
    /// so an empty one on a session channel marks a turn boundary.
    pub(crate) fn from_marked(response: AgentResponse) -> Self {
        if response.is_empty() {
            TurnEvent::TurnEnd
        } else {
            TurnEvent::Response(response)
        }
    }
}

/// ExecuteStream output with turn boundaries.
pub type TurnStream = Pin<Box<dyn Stream<Item = Result<TurnEvent>> + Send>>;

/// An independently deployed agent.
///
/// Agents never return responses directly: everything the host should see
/// goes through the [`Emitter`], in order. Returning an error fails the
/// turn; the session reports it to the user and keeps going.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Answers a help/intro query. By convention ignores message content
    /// and emits static guidance.
    async fn help(&self, request: &AgentRequest, emitter: &Emitter) -> Result<()>;

    /// Processes one turn.
    async fn execute(&self, request: &AgentRequest, emitter: &Emitter) -> Result<()>;
}
