//! The agent's handle for producing responses within one turn.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::error::{AgentError, Result};
use crate::proto::{Action, AgentResponse, ContextMessage, TelegramMessage};

use super::state::{transition, TurnState};

/// Ordered output of one turn.
///
/// Every call to [`Emitter::emit`] appends to the session's single output
/// queue, so responses reach the host in exactly the order they were
/// emitted. Once the session is cancelled (`Cancelled`) or the consumer has
/// gone away (`SessionClosed`), emitting fails and the agent should return.
pub struct Emitter {
    tx: mpsc::Sender<Result<AgentResponse>>,
    cancel: CancellationToken,
    state: Arc<watch::Sender<TurnState>>,
    emitted: AtomicUsize,
}

impl Emitter {
    pub(crate) fn new(
        tx: mpsc::Sender<Result<AgentResponse>>,
        cancel: CancellationToken,
        state: Arc<watch::Sender<TurnState>>,
    ) -> Self {
        Self {
            tx,
            cancel,
            state,
            emitted: AtomicUsize::new(0),
        }
    }

    /// Appends one response to the output.
    ///
    /// Empty responses are dropped. A structurally invalid response (e.g. a
    /// negative payment quantity) is returned as an error without being
    /// sent; it fails the turn, never the session.
    ///
    /// Fails with [`AgentError::Cancelled`] once the session is cancelled
    /// and with [`AgentError::SessionClosed`] once the consumer has gone
    /// away.
    pub async fn emit(&self, response: AgentResponse) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(AgentError::Cancelled);
        }
        if response.is_empty() {
            trace!("Skipping empty response");
            return Ok(());
        }
        response.validate().map_err(|e| match e {
            AgentError::Protocol(msg) => AgentError::Turn(msg),
            other => other,
        })?;

        transition(&self.state, TurnState::Emitting);
        let sent = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(AgentError::Cancelled),
            res = self.tx.send(Ok(response)) => res.map_err(|_| AgentError::SessionClosed),
        };
        transition(&self.state, TurnState::Processing);

        sent?;
        self.emitted.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Emits a message to deliver to the user.
    pub async fn message(&self, message: TelegramMessage) -> Result<()> {
        self.emit(AgentResponse::message(message)).await
    }

    /// Emits a plain text message.
    pub async fn text(&self, text: &str) -> Result<()> {
        self.emit(AgentResponse::text(text)).await
    }

    /// Emits a status-only update such as "typing".
    pub async fn action(&self, action: Action) -> Result<()> {
        self.emit(AgentResponse::action(action)).await
    }

    /// Declares a cost for this turn. Does not wait for settlement.
    pub async fn request_payment(&self, key: &str, quantity: i64) -> Result<()> {
        self.emit(AgentResponse::payment(key, quantity)).await
    }

    /// Asks the host to append `entry` to the conversation history.
    pub async fn remember(&self, entry: ContextMessage) -> Result<()> {
        self.emit(AgentResponse::memory(entry)).await
    }

    /// Number of responses emitted so far in this turn.
    pub fn emitted(&self) -> usize {
        self.emitted.load(Ordering::Relaxed)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}
