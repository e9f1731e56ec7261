//! TCP server exposing an [`Agent`] over framed RPC.

use std::collections::{HashMap, HashSet, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Mutex};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::{Config, SessionConfig};
use crate::error::{AgentError, Result};
use crate::proto::AgentRequest;
use crate::session::{Agent, ResponseStream, Session, TurnEvent, TurnStream};

use super::frame::{codec, FrameKind, Method, RpcFrame};

/// Outbound frames queued per connection before readers are back-pressured.
const OUTBOUND_BUFFER: usize = 64;

/// Requests an ExecuteStream call may have queued ahead of its session.
/// A client that overruns it loses that call, never the connection.
const INPUT_BUFFER: usize = 256;

/// Finished call ids remembered per connection.
const FINISHED_MEMORY: usize = 1024;

/// One in-flight call on a connection.
struct Call {
    cancel: CancellationToken,
    /// Request input of an ExecuteStream call; `None` once the client ended it
    input: Option<mpsc::Sender<Result<AgentRequest>>>,
}

/// Open calls of a connection plus the ids of recently finished ones, so
/// that late frames for a finished call are answered instead of starting
/// a new call under the same id.
#[derive(Default)]
struct CallTable {
    open: HashMap<u64, Call>,
    finished: HashSet<u64>,
    order: VecDeque<u64>,
}

impl CallTable {
    fn insert(&mut self, call_id: u64, call: Call) {
        self.open.insert(call_id, call);
    }

    /// Closes `call_id` for good and returns it if it was still open.
    fn finish(&mut self, call_id: u64) -> Option<Call> {
        let call = self.open.remove(&call_id);
        if self.finished.insert(call_id) {
            self.order.push_back(call_id);
            if self.order.len() > FINISHED_MEMORY {
                if let Some(oldest) = self.order.pop_front() {
                    self.finished.remove(&oldest);
                }
            }
        }
        call
    }

    fn is_finished(&self, call_id: u64) -> bool {
        self.finished.contains(&call_id)
    }
}

type Calls = Arc<Mutex<CallTable>>;

/// What to do with a REQUEST frame, decided under the call table lock.
enum Routing {
    Open,
    Forward(mpsc::Sender<Result<AgentRequest>>),
    Reject(String),
}

/// Serves Help, Execute and ExecuteStream for one agent.
///
/// # Example
///
/// ```ignore
/// let server = AgentServer::bind(&config, Arc::new(EchoAgent::default())).await?;
/// let shutdown = CancellationToken::new();
/// server.serve(shutdown.clone()).await?;
/// ```
pub struct AgentServer {
    listener: TcpListener,
    agent: Arc<dyn Agent>,
    session: SessionConfig,
    max_frame_bytes: usize,
}

impl AgentServer {
    /// Binds `config.server.host:config.server.port`.
    pub async fn bind(config: &Config, agent: Arc<dyn Agent>) -> Result<Self> {
        let addr = config.server.addr();
        let listener = TcpListener::bind(&addr).await?;
        info!(addr = %addr, agent = %agent.name(), "Agent server bound");
        Ok(Self {
            listener,
            agent,
            session: config.session.clone(),
            max_frame_bytes: config.server.max_frame_bytes,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accepts connections until `shutdown` is cancelled. Cancelling also
    /// cancels every open call.
    pub async fn serve(self, shutdown: CancellationToken) -> Result<()> {
        let addr = self.local_addr()?;
        info!(addr = %addr, "Agent server listening");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Agent server shutting down");
                    break;
                }
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            let id = Uuid::new_v4();
                            crate::log_component!(
                                debug,
                                "transport",
                                "Connection accepted",
                                conn = id.to_string(),
                                peer = peer.to_string()
                            );
                            let conn = Connection {
                                id,
                                agent: self.agent.clone(),
                                session: self.session.clone(),
                                cancel: shutdown.child_token(),
                                calls: Arc::new(Mutex::new(CallTable::default())),
                            };
                            let max = self.max_frame_bytes;
                            tokio::spawn(async move {
                                if let Err(e) = conn.run(stream, max).await {
                                    warn!(conn = %id, error = %e, "Connection ended with error");
                                }
                                crate::log_component!(debug, "transport", "Connection closed", conn = id.to_string());
                            });
                        }
                        Err(e) => error!(error = %e, "Accept failed"),
                    }
                }
            }
        }

        Ok(())
    }
}

struct Connection {
    id: Uuid,
    agent: Arc<dyn Agent>,
    session: SessionConfig,
    cancel: CancellationToken,
    calls: Calls,
}

impl Connection {
    async fn run(self, stream: TcpStream, max_frame_bytes: usize) -> Result<()> {
        let (mut sink, mut frames) = Framed::new(stream, codec(max_frame_bytes)).split();
        let (out_tx, mut out_rx) = mpsc::channel::<RpcFrame>(OUTBOUND_BUFFER);

        let writer = tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                if let Err(e) = sink.send(frame.to_bytes()).await {
                    warn!(error = %e, "Failed to write frame");
                    break;
                }
            }
        });

        let result = loop {
            let next = tokio::select! {
                _ = self.cancel.cancelled() => break Ok(()),
                next = frames.next() => next,
            };
            let bytes = match next {
                Some(Ok(bytes)) => bytes,
                Some(Err(e)) => break Err(AgentError::Io(e)),
                None => break Ok(()),
            };
            // Without a decodable frame there is no call id to report on.
            let frame = match RpcFrame::from_bytes(&bytes) {
                Ok(frame) => frame,
                Err(e) => break Err(e),
            };
            self.dispatch(frame, &out_tx).await;
        };

        self.cancel.cancel();
        self.calls.lock().await.open.clear();
        drop(out_tx);
        let _ = writer.await;
        result
    }

    async fn dispatch(&self, frame: RpcFrame, out: &mpsc::Sender<RpcFrame>) {
        let call_id = frame.call_id;
        let method = frame.method();

        match frame.kind() {
            FrameKind::Request => self.on_request(frame, out).await,
            FrameKind::End => self.on_end(call_id, method, out).await,
            FrameKind::Cancel => {
                if let Some(call) = self.calls.lock().await.finish(call_id) {
                    debug!(conn = %self.id, call_id, "Call cancelled by client");
                    call.cancel.cancel();
                }
            }
            kind => {
                let err = AgentError::Protocol(format!("unexpected {:?} frame from client", kind));
                let _ = out.send(RpcFrame::failure(call_id, method, &err)).await;
            }
        }
    }

    /// Client finished sending turns; the session drains and ends.
    async fn on_end(&self, call_id: u64, method: Method, out: &mpsc::Sender<RpcFrame>) {
        {
            let mut calls = self.calls.lock().await;
            if let Some(call) = calls.open.get_mut(&call_id) {
                call.input = None;
                return;
            }
            if calls.is_finished(call_id) {
                return;
            }
            calls.finish(call_id);
        }

        // END before any REQUEST: an ExecuteStream with no turns.
        let reply = if method == Method::ExecuteStream {
            debug!(conn = %self.id, call_id, "Empty stream ended");
            RpcFrame::end(call_id, method)
        } else {
            let err = AgentError::Protocol(format!("END for unknown call {}", call_id));
            RpcFrame::failure(call_id, method, &err)
        };
        let _ = out.send(reply).await;
    }

    async fn on_request(&self, frame: RpcFrame, out: &mpsc::Sender<RpcFrame>) {
        let call_id = frame.call_id;
        let method = frame.method();
        let decoded = frame.decode_payload::<AgentRequest>();

        let routing = {
            let mut calls = self.calls.lock().await;
            match calls.open.get(&call_id) {
                Some(Call {
                    input: Some(input), ..
                }) if method == Method::ExecuteStream => Routing::Forward(input.clone()),
                Some(_) => {
                    if let Some(call) = calls.finish(call_id) {
                        call.cancel.cancel();
                    }
                    Routing::Reject(format!("call {} does not accept further requests", call_id))
                }
                None if calls.is_finished(call_id) => {
                    Routing::Reject(format!("call {} has already finished", call_id))
                }
                None => Routing::Open,
            }
        };

        match routing {
            Routing::Open => self.open(call_id, method, decoded, out).await,
            Routing::Forward(input) => match input.try_send(decoded) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    if let Some(call) = self.calls.lock().await.finish(call_id) {
                        call.cancel.cancel();
                    }
                    warn!(conn = %self.id, call_id, "Stream input overrun");
                    let err = AgentError::Protocol(format!(
                        "call {} has more than {} queued requests",
                        call_id, INPUT_BUFFER
                    ));
                    let _ = out.send(RpcFrame::failure(call_id, method, &err)).await;
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(conn = %self.id, call_id, "Request for a finishing stream dropped");
                }
            },
            Routing::Reject(reason) => {
                let err = AgentError::Protocol(reason);
                let _ = out.send(RpcFrame::failure(call_id, method, &err)).await;
            }
        }
    }

    /// Starts a new call for the first REQUEST under `call_id`.
    async fn open(
        &self,
        call_id: u64,
        method: Method,
        decoded: Result<AgentRequest>,
        out: &mpsc::Sender<RpcFrame>,
    ) {
        let session = Session::new(self.agent.clone(), self.session.clone())
            .with_cancellation(self.cancel.child_token());
        let token = session.cancellation_token();

        match method {
            Method::Help | Method::Execute => {
                let request = match decoded {
                    Ok(request) => request,
                    Err(e) => {
                        warn!(conn = %self.id, call_id, error = %e, "Undecodable request");
                        self.calls.lock().await.finish(call_id);
                        let _ = out.send(RpcFrame::failure(call_id, method, &e)).await;
                        return;
                    }
                };
                self.register(call_id, token.clone(), None).await;
                let stream = if method == Method::Help {
                    session.help(request)
                } else {
                    single(session, request)
                };
                self.pump(call_id, method, responses_only(stream), token, out.clone());
            }
            Method::ExecuteStream => {
                let (input_tx, input_rx) = mpsc::channel(INPUT_BUFFER);
                // A fresh channel always has room for the first request.
                let _ = input_tx.try_send(decoded);
                let stream = session.execute_stream_turns(ReceiverStream::new(input_rx));
                self.register(call_id, token.clone(), Some(input_tx)).await;
                self.pump(call_id, method, stream, token, out.clone());
            }
            Method::Unspecified => {
                self.calls.lock().await.finish(call_id);
                let err = AgentError::Protocol("request names no method".into());
                let _ = out.send(RpcFrame::failure(call_id, method, &err)).await;
            }
        }
    }

    async fn register(
        &self,
        call_id: u64,
        cancel: CancellationToken,
        input: Option<mpsc::Sender<Result<AgentRequest>>>,
    ) {
        self.calls
            .lock()
            .await
            .insert(call_id, Call { cancel, input });
        debug!(conn = %self.id, call_id, "Call opened");
    }

    /// Forwards a call's output as RESPONSE and TURN_END frames, then END
    /// or ERROR.
    fn pump(
        &self,
        call_id: u64,
        method: Method,
        mut stream: TurnStream,
        cancel: CancellationToken,
        out: mpsc::Sender<RpcFrame>,
    ) {
        let calls = self.calls.clone();
        let conn = self.id;
        tokio::spawn(async move {
            let mut responses = 0usize;
            let mut last = Some(RpcFrame::end(call_id, method));

            while let Some(item) = stream.next().await {
                let frame = match item {
                    Ok(TurnEvent::Response(response)) => {
                        responses += 1;
                        RpcFrame::response(call_id, method, &response)
                    }
                    Ok(TurnEvent::TurnEnd) => RpcFrame::turn_end(call_id),
                    Err(e) => {
                        last = Some(RpcFrame::failure(call_id, method, &e));
                        break;
                    }
                };
                if out.send(frame).await.is_err() {
                    last = None;
                    break;
                }
            }

            calls.lock().await.finish(call_id);
            if let Some(last) = last.filter(|_| !cancel.is_cancelled()) {
                let _ = out.send(last).await;
            }
            debug!(conn = %conn, call_id, ?method, responses, "Call finished");
        });
    }
}

/// Adapts a single-shot Execute into a one-item stream.
fn single(session: Session, request: AgentRequest) -> ResponseStream {
    Box::pin(futures::stream::once(async move {
        session.execute(request).await
    }))
}

fn responses_only(stream: ResponseStream) -> TurnStream {
    Box::pin(stream.map(|item| item.map(TurnEvent::Response)))
}
