//! Session runner: drives an [`Agent`] through Help, Execute and
//! ExecuteStream calls.

use std::sync::Arc;
use std::time::Duration;

use futures::{Stream, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::error::{AgentError, Result};
use crate::proto::{AgentRequest, AgentResponse};

use super::emitter::Emitter;
use super::state::{transition, TurnState};
use super::{Agent, ResponseStream, TurnEvent, TurnStream};

/// Prefix of the user-visible message that replaces a failed turn.
pub const ERROR_PREFIX: &str = "⚠️ Error: ";

/// Builds the response emitted in place of a failed turn.
pub fn error_response(err: &AgentError) -> AgentResponse {
    AgentResponse::text(&format!("{}{}", ERROR_PREFIX, err))
}

#[derive(Debug, Clone, Copy)]
enum Entry {
    Help,
    Execute,
}

/// What happened to one turn.
#[derive(Debug, PartialEq)]
enum TurnEnd {
    /// The agent returned normally
    Completed,
    /// The agent failed and an error message was emitted in its place
    Recovered,
    /// Cancelled, or nobody is listening any more
    Stopped,
}

/// One call's worth of execution state.
///
/// A `Session` is created per call (one Help, one Execute, or one
/// ExecuteStream lifetime). Cloning shares the cancellation token and the
/// state channel.
#[derive(Clone)]
pub struct Session {
    agent: Arc<dyn Agent>,
    config: SessionConfig,
    cancel: CancellationToken,
    state: Arc<watch::Sender<TurnState>>,
}

impl Session {
    pub fn new(agent: Arc<dyn Agent>, config: SessionConfig) -> Self {
        let (state, _) = watch::channel(TurnState::Idle);
        Self {
            agent,
            config,
            cancel: CancellationToken::new(),
            state: Arc::new(state),
        }
    }

    /// Ties this session to an externally owned token (builder pattern).
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Token that stops this session when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Hard stop: no further emissions are delivered.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Watches the current turn state.
    pub fn state(&self) -> watch::Receiver<TurnState> {
        self.state.subscribe()
    }

    pub fn agent_name(&self) -> &str {
        self.agent.name()
    }

    fn turn_timeout(&self) -> Option<Duration> {
        match self.config.turn_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    fn idle_timeout(&self) -> Option<Duration> {
        match self.config.idle_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    fn channel(&self) -> (
        mpsc::Sender<Result<AgentResponse>>,
        mpsc::Receiver<Result<AgentResponse>>,
    ) {
        mpsc::channel(self.config.buffer_size.max(1))
    }

    fn output(&self, rx: mpsc::Receiver<Result<AgentResponse>>) -> ResponseStream {
        Box::pin(ReceiverStream::new(rx).take_until(self.cancel.clone().cancelled_owned()))
    }

    /// Answers a help/intro query with zero or more responses.
    pub fn help(&self, request: AgentRequest) -> ResponseStream {
        let (tx, rx) = self.channel();
        let session = self.clone();
        tokio::spawn(async move {
            if let Err(e) = request.validate() {
                session.reject(&tx, e).await;
                return;
            }
            session.run_turn(Entry::Help, &request, &tx).await;
        });
        self.output(rx)
    }

    /// Runs one turn and folds its emissions into exactly one response.
    ///
    /// Emissions are merged field by field; a later emission overrides an
    /// earlier one for every field it sets. An agent that emits nothing
    /// yields an empty response.
    pub async fn execute(&self, request: AgentRequest) -> Result<AgentResponse> {
        if let Err(e) = request.validate() {
            transition(&self.state, TurnState::Failed);
            return Err(e);
        }

        let (tx, mut rx) = self.channel();
        let turn = async move { self.run_turn(Entry::Execute, &request, &tx).await };
        let collect = async {
            let mut merged = AgentResponse::default();
            let mut count = 0usize;
            while let Some(item) = rx.recv().await {
                merged.merge_from(item?);
                count += 1;
            }
            debug!(emissions = count, "Merged execute emissions");
            Ok::<_, AgentError>(merged)
        };

        let (end, merged) = tokio::join!(turn, collect);
        let merged = merged?;
        if end == TurnEnd::Stopped {
            return Err(AgentError::Cancelled);
        }
        Ok(merged)
    }

    /// Runs a sequence of turns in arrival order.
    ///
    /// Each request is fully processed (the agent has returned and all of
    /// its emissions are queued on the output) before the next one is read.
    /// A request that fails validation, or an `Err` item on the input,
    /// ends the stream with that error. Turn-level failures do not.
    pub fn execute_stream<S>(&self, requests: S) -> ResponseStream
    where
        S: Stream<Item = Result<AgentRequest>> + Send + 'static,
    {
        let (tx, rx) = self.channel();
        let session = self.clone();
        tokio::spawn(async move { session.stream_loop(requests, tx, false).await });
        self.output(rx)
    }

    /// Like [`Session::execute_stream`], with a [`TurnEvent::TurnEnd`] after
    /// every turn (failed turns included).
    ///
    /// A host that builds each request from its stored history waits for
    /// `TurnEnd` before sending the next one, so memory emitted by a turn
    /// is persisted before the following turn is built.
    pub fn execute_stream_turns<S>(&self, requests: S) -> TurnStream
    where
        S: Stream<Item = Result<AgentRequest>> + Send + 'static,
    {
        let (tx, rx) = self.channel();
        let session = self.clone();
        tokio::spawn(async move { session.stream_loop(requests, tx, true).await });
        Box::pin(self.output(rx).map(|item| item.map(TurnEvent::from_marked)))
    }

    async fn stream_loop<S>(
        &self,
        requests: S,
        tx: mpsc::Sender<Result<AgentResponse>>,
        mark_turns: bool,
    ) where
        S: Stream<Item = Result<AgentRequest>> + Send,
    {
        let mut requests = Box::pin(requests);
        let agent = self.agent.name().to_string();
        let mut turns = 0u64;

        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    debug!(agent = %agent, "Stream session cancelled");
                    break;
                }
                _ = tx.closed() => {
                    debug!(agent = %agent, "Stream consumer went away");
                    break;
                }
                next = next_request(&mut requests, self.idle_timeout()) => next,
            };

            let request = match next {
                NextRequest::Request(Ok(request)) => request,
                NextRequest::Request(Err(e)) => {
                    self.reject(&tx, e).await;
                    break;
                }
                NextRequest::End => break,
                NextRequest::Idle(limit) => {
                    info!(agent = %agent, idle_secs = limit.as_secs(), "Stream session idle, closing");
                    break;
                }
            };

            if let Err(e) = request.validate() {
                self.reject(&tx, e).await;
                break;
            }

            turns += 1;
            if self.run_turn(Entry::Execute, &request, &tx).await == TurnEnd::Stopped {
                break;
            }
            if mark_turns && tx.send(Ok(AgentResponse::default())).await.is_err() {
                break;
            }
        }

        debug!(agent = %agent, turns, "Stream session finished");
    }

    /// Ends the call with a protocol error.
    async fn reject(&self, tx: &mpsc::Sender<Result<AgentResponse>>, err: AgentError) {
        warn!(agent = %self.agent.name(), error = %err, "Rejecting request");
        transition(&self.state, TurnState::Failed);
        let _ = tx.send(Err(err)).await;
    }

    async fn run_turn(
        &self,
        entry: Entry,
        request: &AgentRequest,
        tx: &mpsc::Sender<Result<AgentResponse>>,
    ) -> TurnEnd {
        transition(&self.state, TurnState::Processing);
        let trigger = request.trigger().map(|t| t.kind()).unwrap_or("invalid");
        debug!(agent = %self.agent.name(), ?entry, trigger, "Turn started");

        let emitter = Emitter::new(tx.clone(), self.cancel.clone(), self.state.clone());
        let call = async {
            match entry {
                Entry::Help => self.agent.help(request, &emitter).await,
                Entry::Execute => self.agent.execute(request, &emitter).await,
            }
        };
        let limited = async {
            match self.turn_timeout() {
                Some(limit) => tokio::time::timeout(limit, call)
                    .await
                    .unwrap_or(Err(AgentError::TurnTimeout(limit.as_secs()))),
                None => call.await,
            }
        };

        let outcome = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(AgentError::Cancelled),
            res = limited => res,
        };

        match outcome {
            Ok(()) => {
                debug!(agent = %self.agent.name(), emissions = emitter.emitted(), "Turn completed");
                transition(&self.state, TurnState::Idle);
                TurnEnd::Completed
            }
            Err(e) if e.is_turn_level() => {
                warn!(agent = %self.agent.name(), error = %e, "Turn failed");
                let reported = emitter.emit(error_response(&e)).await.is_ok();
                transition(&self.state, TurnState::Failed);
                if reported {
                    TurnEnd::Recovered
                } else {
                    TurnEnd::Stopped
                }
            }
            Err(e) if e.is_protocol() => {
                self.reject(tx, e).await;
                TurnEnd::Stopped
            }
            Err(_) => {
                debug!(agent = %self.agent.name(), "Turn stopped");
                transition(&self.state, TurnState::Idle);
                TurnEnd::Stopped
            }
        }
    }
}

enum NextRequest {
    Request(Result<AgentRequest>),
    End,
    Idle(Duration),
}

async fn next_request<S>(requests: &mut S, idle: Option<Duration>) -> NextRequest
where
    S: Stream<Item = Result<AgentRequest>> + Unpin,
{
    let next = match idle {
        Some(limit) => match tokio::time::timeout(limit, requests.next()).await {
            Ok(next) => next,
            Err(_) => return NextRequest::Idle(limit),
        },
        None => requests.next().await,
    };
    match next {
        Some(item) => NextRequest::Request(item),
        None => NextRequest::End,
    }
}
