//! Host-side collaborators
//!
//! The bot server owns every piece of shared state: conversation history,
//! the credit ledger, and delivery to the platform. Each is an injected
//! collaborator behind a narrow trait so the protocol core assumes no
//! storage technology. [`Host`] ties them together: it builds requests with
//! stored history and applies the agent's responses in order.

mod ledger;
mod relay;
mod store;

pub use ledger::{Charge, Ledger, MemoryLedger};
pub use relay::{MessageRelay, RecordingRelay};
pub use store::{ContextStore, MemoryContextStore};

use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::{AgentError, Result};
use crate::proto::{AgentRequest, AgentResponse, Context, TelegramMessage};
use crate::session::{ResponseStream, TurnEvent, TurnStream};

/// Sent to the user when a call ends without the agent reporting anything.
pub const GENERIC_FAILURE_NOTICE: &str = "Sorry, the agent could not process this request.";

/// Result of applying the payment field of one response.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ChargeOutcome {
    /// No payment request
    #[default]
    None,
    /// Quantity 0: not sent to the ledger
    Informational,
    Charged,
    /// Rejected by the ledger. Already-delivered content stays delivered.
    Failed(String),
}

/// What [`Host::apply`] did with one response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Applied {
    pub relayed: bool,
    pub charge: ChargeOutcome,
    pub persisted: bool,
}

/// Totals for one driven response stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DriveSummary {
    /// Completed turns, counted by [`Host::converse`] only
    pub turns: usize,
    pub responses: usize,
    pub relayed: usize,
    pub charged: usize,
    pub failed_charges: usize,
    pub persisted: usize,
    /// Protocol error that ended the stream, if any
    pub error: Option<String>,
}

impl DriveSummary {
    fn record(&mut self, applied: &Applied) {
        self.responses += 1;
        self.relayed += usize::from(applied.relayed);
        self.persisted += usize::from(applied.persisted);
        match applied.charge {
            ChargeOutcome::Charged => self.charged += 1,
            ChargeOutcome::Failed(_) => self.failed_charges += 1,
            ChargeOutcome::None | ChargeOutcome::Informational => {}
        }
    }
}

/// The bot-server side of the protocol.
pub struct Host {
    store: Arc<dyn ContextStore>,
    ledger: Arc<dyn Ledger>,
    relay: Arc<dyn MessageRelay>,
}

impl Host {
    pub fn new(
        store: Arc<dyn ContextStore>,
        ledger: Arc<dyn Ledger>,
        relay: Arc<dyn MessageRelay>,
    ) -> Self {
        Self {
            store,
            ledger,
            relay,
        }
    }

    /// Attaches the stored history of `chat_id` to `request`.
    ///
    /// Existing context metadata on the request is kept; its messages are
    /// replaced by the store's history, oldest first.
    pub async fn build_request(
        &self,
        chat_id: i64,
        user_id: i64,
        request: AgentRequest,
    ) -> Result<AgentRequest> {
        let history = self.store.history(chat_id).await?;
        let context = match request.context.clone() {
            Some(mut context) => {
                context.chat_id = chat_id;
                context.messages = history;
                context
            }
            None => Context::new(chat_id).with_messages(history),
        };
        debug!(chat_id, history = context.messages.len(), "Built agent request");
        Ok(request.with_context(context).with_user(user_id))
    }

    /// Applies one response in field order: deliver the message, charge
    /// the payment, persist the memory entry.
    ///
    /// Ledger failures are reported in the returned [`Applied`] and logged;
    /// they do not undo delivery. Relay and store failures are returned.
    pub async fn apply(
        &self,
        chat_id: i64,
        user_id: i64,
        response: AgentResponse,
    ) -> Result<Applied> {
        let mut applied = Applied::default();

        if let Some(message) = response.telegram_message {
            self.relay.relay(chat_id, message).await?;
            applied.relayed = true;
        }

        if let Some(payment) = response.payment_request {
            applied.charge = if payment.is_informational() {
                debug!(chat_id, key = %payment.key, "Informational payment request");
                ChargeOutcome::Informational
            } else {
                match self
                    .ledger
                    .charge_credits(user_id, &payment.key, payment.quantity)
                    .await
                {
                    Ok(()) => ChargeOutcome::Charged,
                    Err(e) => {
                        warn!(chat_id, user_id, key = %payment.key, error = %e, "Charge failed");
                        ChargeOutcome::Failed(e.to_string())
                    }
                }
            };
        }

        if let Some(memory) = response.memory {
            self.store.persist(chat_id, memory).await?;
            applied.persisted = true;
        }

        Ok(applied)
    }

    /// Consumes `stream` in order, applying every response as it arrives.
    ///
    /// A protocol error ending the stream is reported to the user as
    /// [`GENERIC_FAILURE_NOTICE`] and recorded in the summary.
    pub async fn drive(
        &self,
        chat_id: i64,
        user_id: i64,
        mut stream: ResponseStream,
    ) -> Result<DriveSummary> {
        let mut summary = DriveSummary::default();

        while let Some(item) = stream.next().await {
            match item {
                Ok(response) => {
                    let applied = self.apply(chat_id, user_id, response).await?;
                    summary.record(&applied);
                }
                Err(e) => {
                    self.fail(chat_id, &mut summary, e).await?;
                    break;
                }
            }
        }

        Ok(summary)
    }

    /// Runs a multi-turn ExecuteStream conversation.
    ///
    /// Each of `inputs` is sent on `requests` only after the previous turn
    /// has ended and all of its responses have been applied, so the
    /// request is built from history that already holds the previous
    /// turn's memory. `events` is the turn-delimited output of the same
    /// call. `requests` is dropped after the last input, which ends the
    /// call once its final turn completes.
    pub async fn converse(
        &self,
        chat_id: i64,
        user_id: i64,
        inputs: Vec<AgentRequest>,
        requests: mpsc::Sender<AgentRequest>,
        mut events: TurnStream,
    ) -> Result<DriveSummary> {
        let mut summary = DriveSummary::default();
        let mut inputs = inputs.into_iter();
        let mut requests = Some(requests);

        self.feed(chat_id, user_id, &mut inputs, &mut requests).await?;
        while let Some(event) = events.next().await {
            match event {
                Ok(TurnEvent::Response(response)) => {
                    let applied = self.apply(chat_id, user_id, response).await?;
                    summary.record(&applied);
                }
                Ok(TurnEvent::TurnEnd) => {
                    summary.turns += 1;
                    self.feed(chat_id, user_id, &mut inputs, &mut requests).await?;
                }
                Err(e) => {
                    self.fail(chat_id, &mut summary, e).await?;
                    break;
                }
            }
        }

        debug!(chat_id, turns = summary.turns, "Conversation finished");
        Ok(summary)
    }

    /// Sends the next input with fresh history, or closes `requests` once
    /// there is none left.
    async fn feed(
        &self,
        chat_id: i64,
        user_id: i64,
        inputs: &mut impl Iterator<Item = AgentRequest>,
        requests: &mut Option<mpsc::Sender<AgentRequest>>,
    ) -> Result<()> {
        let Some(tx) = requests.as_ref() else {
            return Ok(());
        };
        match inputs.next() {
            Some(input) => {
                let request = self.build_request(chat_id, user_id, input).await?;
                if tx.send(request).await.is_err() {
                    debug!(chat_id, "Agent stopped reading requests");
                    *requests = None;
                }
            }
            None => *requests = None,
        }
        Ok(())
    }

    /// Reports a call-ending error to the user.
    async fn fail(&self, chat_id: i64, summary: &mut DriveSummary, err: AgentError) -> Result<()> {
        warn!(chat_id, error = %err, "Agent call failed");
        self.relay
            .relay(chat_id, TelegramMessage::text(GENERIC_FAILURE_NOTICE))
            .await?;
        summary.error = Some(err.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AgentError;
    use crate::proto::{Action, ContextMessage};

    struct Fixture {
        host: Host,
        store: Arc<MemoryContextStore>,
        ledger: Arc<MemoryLedger>,
        relay: Arc<RecordingRelay>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryContextStore::new());
        let ledger = Arc::new(MemoryLedger::new([("text", 1)]));
        let relay = Arc::new(RecordingRelay::new());
        Fixture {
            host: Host::new(store.clone(), ledger.clone(), relay.clone()),
            store,
            ledger,
            relay,
        }
    }

    #[tokio::test]
    async fn test_apply_all_fields() {
        let f = fixture();
        let applied = f
            .host
            .apply(
                1,
                9,
                AgentResponse::text("hi")
                    .with_payment("text", 5)
                    .with_memory(ContextMessage::assistant("hi")),
            )
            .await
            .unwrap();

        assert_eq!(
            applied,
            Applied {
                relayed: true,
                charge: ChargeOutcome::Charged,
                persisted: true
            }
        );
        assert_eq!(f.relay.sent_to(1).await.len(), 1);
        assert_eq!(f.ledger.spent(9).await, 5);
        assert_eq!(f.store.history(1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_key_does_not_retract_delivery() {
        let f = fixture();
        let applied = f
            .host
            .apply(1, 9, AgentResponse::text("here").with_payment("video", 2))
            .await
            .unwrap();
        assert!(applied.relayed);
        assert!(matches!(applied.charge, ChargeOutcome::Failed(ref m) if m.contains("video")));
        assert_eq!(f.relay.sent_to(1).await.len(), 1);
    }

    #[tokio::test]
    async fn test_zero_quantity_skips_ledger() {
        let f = fixture();
        let applied = f
            .host
            .apply(1, 9, AgentResponse::payment("unknown-key", 0))
            .await
            .unwrap();
        assert_eq!(applied.charge, ChargeOutcome::Informational);
        assert!(f.ledger.charges().await.is_empty());
    }

    #[tokio::test]
    async fn test_build_request_attaches_history() {
        let f = fixture();
        f.store
            .persist(3, ContextMessage::assistant("earlier"))
            .await
            .unwrap();
        let req = f
            .host
            .build_request(
                3,
                9,
                AgentRequest::message(TelegramMessage::text("again"))
                    .with_context(Context::new(0).with_metadata("plan", serde_json::json!("pro"))),
            )
            .await
            .unwrap();

        let ctx = req.context.unwrap();
        assert_eq!(ctx.chat_id, 3);
        assert_eq!(ctx.messages[0].content, "earlier");
        assert_eq!(ctx.metadata_json("plan"), Some(serde_json::json!("pro")));
        assert_eq!(req.user_id, Some(9));
    }

    /// Remembers every text it sees and reports how much history it got.
    struct HistoryAgent;

    #[async_trait::async_trait]
    impl crate::session::Agent for HistoryAgent {
        fn name(&self) -> &str {
            "history"
        }

        async fn help(&self, _request: &AgentRequest, _emitter: &crate::Emitter) -> Result<()> {
            Ok(())
        }

        async fn execute(&self, request: &AgentRequest, emitter: &crate::Emitter) -> Result<()> {
            let seen = request
                .context
                .as_ref()
                .map(|c| c.messages.len())
                .unwrap_or_default();
            let text = request.text().unwrap_or_default();
            emitter.text(&format!("{} after {}", text, seen)).await?;
            emitter.remember(ContextMessage::assistant(text)).await
        }
    }

    #[tokio::test]
    async fn test_converse_builds_each_turn_from_updated_history() {
        use tokio_stream::wrappers::ReceiverStream;

        let f = fixture();
        let session = crate::Session::new(Arc::new(HistoryAgent), Default::default());
        let (tx, rx) = mpsc::channel(1);
        let events = session.execute_stream_turns(ReceiverStream::new(rx).map(Ok));
        let inputs = vec![
            AgentRequest::message(TelegramMessage::text("one")),
            AgentRequest::message(TelegramMessage::text("two")),
        ];

        let summary = f.host.converse(4, 9, inputs, tx, events).await.unwrap();

        assert_eq!(summary.turns, 2);
        assert_eq!(summary.persisted, 2);
        assert!(summary.error.is_none());
        let sent = f.relay.sent_to(4).await;
        assert_eq!(sent[0].text_content(), Some("one after 0"));
        assert_eq!(sent[1].text_content(), Some("two after 1"));
    }

    #[tokio::test]
    async fn test_converse_without_inputs_ends() {
        use tokio_stream::wrappers::ReceiverStream;

        let f = fixture();
        let session = crate::Session::new(Arc::new(HistoryAgent), Default::default());
        let (tx, rx) = mpsc::channel(1);
        let events = session.execute_stream_turns(ReceiverStream::new(rx).map(Ok));

        let summary = f.host.converse(4, 9, Vec::new(), tx, events).await.unwrap();
        assert_eq!(summary, DriveSummary::default());
    }

    #[tokio::test]
    async fn test_drive_applies_in_order_and_reports_errors() {
        let f = fixture();
        let items = vec![
            Ok(AgentResponse::action(Action::Typing)),
            Ok(AgentResponse::text("body").with_payment("text", 1)),
            Err(AgentError::Protocol("bad envelope".into())),
            Ok(AgentResponse::text("never relayed")),
        ];
        let stream: ResponseStream = Box::pin(futures::stream::iter(items));
        let summary = f.host.drive(1, 9, stream).await.unwrap();

        assert_eq!(summary.responses, 2);
        assert_eq!(summary.charged, 1);
        assert!(summary.error.unwrap().contains("bad envelope"));

        let sent = f.relay.sent_to(1).await;
        assert_eq!(sent.len(), 3);
        assert!(sent[0].is_status_only());
        assert_eq!(sent[1].text_content(), Some("body"));
        assert_eq!(sent[2].text_content(), Some(GENERIC_FAILURE_NOTICE));
    }
}
