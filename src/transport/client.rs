//! TCP client for a remote agent.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll};

use futures::future::ready;
use futures::{SinkExt, Stream, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::ServerConfig;
use crate::error::{AgentError, Result};
use crate::proto::{AgentRequest, AgentResponse};
use crate::session::{ResponseStream, TurnEvent, TurnStream};

use super::frame::{codec, FrameKind, Method, RpcFrame};

const CALL_BUFFER: usize = 32;
const OUTBOUND_BUFFER: usize = 64;

type Pending = Arc<Mutex<HashMap<u64, mpsc::Sender<Result<TurnEvent>>>>>;

/// Connection to an [`AgentServer`](super::AgentServer).
///
/// Calls are multiplexed over one TCP connection and may run concurrently.
pub struct AgentClient {
    out: mpsc::Sender<RpcFrame>,
    pending: Pending,
    next_call: AtomicU64,
    closed: CancellationToken,
}

impl AgentClient {
    /// Connects with the default 16 MiB frame limit.
    pub async fn connect(addr: &str) -> Result<Self> {
        Self::connect_with_limit(addr, ServerConfig::default().max_frame_bytes).await
    }

    pub async fn connect_with_limit(addr: &str, max_frame_bytes: usize) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        debug!(addr, "Connected to agent");
        let (mut sink, mut frames) = Framed::new(stream, codec(max_frame_bytes)).split();
        let (out, mut out_rx) = mpsc::channel::<RpcFrame>(OUTBOUND_BUFFER);
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let closed = CancellationToken::new();

        tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                if let Err(e) = sink.send(frame.to_bytes()).await {
                    warn!(error = %e, "Failed to write frame");
                    break;
                }
            }
        });

        let reader_pending = pending.clone();
        let reader_closed = closed.clone();
        tokio::spawn(async move {
            loop {
                let bytes = tokio::select! {
                    _ = reader_closed.cancelled() => break,
                    next = frames.next() => match next {
                        Some(Ok(bytes)) => bytes,
                        Some(Err(e)) => {
                            warn!(error = %e, "Connection read failed");
                            break;
                        }
                        None => break,
                    },
                };
                match RpcFrame::from_bytes(&bytes) {
                    Ok(frame) => route(&reader_pending, frame).await,
                    Err(e) => {
                        warn!(error = %e, "Undecodable frame from server");
                        break;
                    }
                }
            }

            reader_closed.cancel();
            for (_, tx) in reader_pending.lock().await.drain() {
                let _ = tx.send(Err(AgentError::SessionClosed)).await;
            }
        });

        Ok(Self {
            out,
            pending,
            next_call: AtomicU64::new(1),
            closed,
        })
    }

    async fn open(&self) -> Result<(u64, mpsc::Receiver<Result<TurnEvent>>)> {
        if self.closed.is_cancelled() {
            return Err(AgentError::SessionClosed);
        }
        let call_id = self.next_call.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(CALL_BUFFER);
        self.pending.lock().await.insert(call_id, tx);
        Ok((call_id, rx))
    }

    async fn send(&self, frame: RpcFrame) -> Result<()> {
        self.out
            .send(frame)
            .await
            .map_err(|_| AgentError::SessionClosed)
    }

    fn call_stream(
        &self,
        call_id: u64,
        method: Method,
        rx: mpsc::Receiver<Result<TurnEvent>>,
        stop: Option<CancellationToken>,
    ) -> CallStream {
        CallStream {
            call_id,
            method,
            inner: ReceiverStream::new(rx),
            out: self.out.clone(),
            pending: self.pending.clone(),
            stop,
            finished: false,
        }
    }

    /// Remote Help: a stream of zero or more responses.
    pub async fn help(&self, request: AgentRequest) -> Result<ResponseStream> {
        let (call_id, rx) = self.open().await?;
        self.send(RpcFrame::request(call_id, Method::Help, &request))
            .await?;
        Ok(responses_only(self.call_stream(call_id, Method::Help, rx, None)))
    }

    /// Remote Execute: exactly one response.
    pub async fn execute(&self, request: AgentRequest) -> Result<AgentResponse> {
        let (call_id, rx) = self.open().await?;
        self.send(RpcFrame::request(call_id, Method::Execute, &request))
            .await?;
        let mut stream = self.call_stream(call_id, Method::Execute, rx, None);
        let first = loop {
            match stream.next().await {
                Some(Ok(TurnEvent::TurnEnd)) => continue,
                Some(Ok(TurnEvent::Response(response))) => break Ok(response),
                Some(Err(e)) => break Err(e),
                None => {
                    break Err(AgentError::Protocol(format!(
                        "call {} ended without a response",
                        call_id
                    )))
                }
            }
        };
        stream.finished = true;
        first
    }

    /// Remote ExecuteStream: every item of `requests` is one turn.
    ///
    /// Dropping the returned stream cancels the call on the server.
    pub async fn execute_stream<S>(&self, requests: S) -> Result<ResponseStream>
    where
        S: Stream<Item = AgentRequest> + Send + 'static,
    {
        Ok(responses_only(self.open_stream(requests).await?))
    }

    /// Remote ExecuteStream with a [`TurnEvent::TurnEnd`] after each turn.
    ///
    /// Lets a caller hold back the next request until the previous turn
    /// has been applied, see [`Host::converse`](crate::host::Host::converse).
    pub async fn execute_stream_turns<S>(&self, requests: S) -> Result<TurnStream>
    where
        S: Stream<Item = AgentRequest> + Send + 'static,
    {
        Ok(Box::pin(self.open_stream(requests).await?))
    }

    async fn open_stream<S>(&self, requests: S) -> Result<CallStream>
    where
        S: Stream<Item = AgentRequest> + Send + 'static,
    {
        let (call_id, rx) = self.open().await?;
        let stop = CancellationToken::new();
        let out = self.out.clone();
        let forward_stop = stop.clone();

        tokio::spawn(async move {
            let mut requests = Box::pin(requests);
            loop {
                let next = tokio::select! {
                    _ = forward_stop.cancelled() => return,
                    next = requests.next() => next,
                };
                let frame = match next {
                    Some(request) => RpcFrame::request(call_id, Method::ExecuteStream, &request),
                    None => RpcFrame::end(call_id, Method::ExecuteStream),
                };
                let last = frame.kind() == FrameKind::End;
                if out.send(frame).await.is_err() || last {
                    return;
                }
            }
        });

        Ok(self.call_stream(call_id, Method::ExecuteStream, rx, Some(stop)))
    }

    /// Number of calls still waiting for frames from the server.
    pub async fn open_calls(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// `true` once the connection has gone away.
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}

impl Drop for AgentClient {
    fn drop(&mut self) {
        self.closed.cancel();
    }
}

async fn route(pending: &Pending, frame: RpcFrame) {
    let call_id = frame.call_id;
    match frame.kind() {
        FrameKind::Response => {
            let tx = pending.lock().await.get(&call_id).cloned();
            let Some(tx) = tx else {
                debug!(call_id, "Response for unknown call dropped");
                return;
            };
            let item = frame
                .decode_payload::<AgentResponse>()
                .map(TurnEvent::Response);
            let failed = item.is_err();
            let _ = tx.send(item).await;
            if failed {
                pending.lock().await.remove(&call_id);
            }
        }
        FrameKind::Error => {
            if let Some(tx) = pending.lock().await.remove(&call_id) {
                let msg = frame.error.unwrap_or_else(|| "unspecified error".to_string());
                let _ = tx.send(Err(AgentError::Remote(msg))).await;
            }
        }
        FrameKind::TurnEnd => {
            let tx = pending.lock().await.get(&call_id).cloned();
            if let Some(tx) = tx {
                let _ = tx.send(Ok(TurnEvent::TurnEnd)).await;
            }
        }
        FrameKind::End => {
            pending.lock().await.remove(&call_id);
        }
        kind => warn!(call_id, ?kind, "Unexpected frame from server"),
    }
}

/// Drops turn boundaries from a call's output.
fn responses_only(stream: CallStream) -> ResponseStream {
    Box::pin(stream.filter_map(|item| {
        ready(match item {
            Ok(TurnEvent::Response(response)) => Some(Ok(response)),
            Ok(TurnEvent::TurnEnd) => None,
            Err(e) => Some(Err(e)),
        })
    }))
}

/// Output of one call. Dropping it before the end sends CANCEL; dropping
/// it at any point releases the call's routing entry.
struct CallStream {
    call_id: u64,
    method: Method,
    inner: ReceiverStream<Result<TurnEvent>>,
    out: mpsc::Sender<RpcFrame>,
    pending: Pending,
    stop: Option<CancellationToken>,
    finished: bool,
}

impl Stream for CallStream {
    type Item = Result<TurnEvent>;

    fn poll_next(
        mut self: Pin<&mut Self>,
        cx: &mut TaskContext<'_>,
    ) -> Poll<Option<Self::Item>> {
        if self.finished {
            return Poll::Ready(None);
        }
        let polled = Pin::new(&mut self.inner).poll_next(cx);
        // An error is always the last item of a call.
        if matches!(polled, Poll::Ready(None) | Poll::Ready(Some(Err(_)))) {
            self.finished = true;
        }
        polled
    }
}

impl Drop for CallStream {
    fn drop(&mut self) {
        if let Some(stop) = &self.stop {
            stop.cancel();
        }
        if !self.finished {
            debug!(call_id = self.call_id, "Cancelling abandoned call");
            let _ = self
                .out
                .try_send(RpcFrame::cancel(self.call_id, self.method));
        }

        let call_id = self.call_id;
        match self.pending.try_lock() {
            Ok(mut pending) => {
                pending.remove(&call_id);
            }
            Err(_) => {
                // The reader holds the lock; release the entry once it is done.
                if let Ok(handle) = tokio::runtime::Handle::try_current() {
                    let pending = self.pending.clone();
                    handle.spawn(async move {
                        pending.lock().await.remove(&call_id);
                    });
                }
            }
        }
    }
}
