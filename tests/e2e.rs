//! End-to-end tests over the TCP transport.
//!
//! Each test binds an agent server on an ephemeral local port and talks to
//! it with `AgentClient` (or raw frames where the test needs to misbehave).

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tokio_util::sync::CancellationToken;

use anyagent::agents::echo::{EchoAgent, STATS_CALLBACK};
use anyagent::config::Config;
use anyagent::host::{ContextStore, Host, MemoryContextStore, MemoryLedger, RecordingRelay};
use anyagent::payment::{PaymentGate, PaymentPolicy, PriceList};
use anyagent::proto::{
    Action, AgentRequest, AgentResponse, CallbackQuery, ContextMessage, TelegramMessage,
};
use anyagent::session::{Agent, Emitter};
use anyagent::transport::frame::codec;
use anyagent::transport::{AgentClient, AgentServer, FrameKind, Method, RpcFrame};
use anyagent::{AgentError, Result};

struct Running {
    addr: SocketAddr,
    shutdown: CancellationToken,
    handle: tokio::task::JoinHandle<Result<()>>,
}

async fn start(agent: Arc<dyn Agent>) -> Running {
    start_with(Config::default(), agent).await
}

async fn start_with(mut config: Config, agent: Arc<dyn Agent>) -> Running {
    config.server.host = "127.0.0.1".to_string();
    config.server.port = 0;

    let server = AgentServer::bind(&config, agent).await.unwrap();
    let addr = server.local_addr().unwrap();
    let shutdown = CancellationToken::new();
    let handle = tokio::spawn(server.serve(shutdown.clone()));
    Running {
        addr,
        shutdown,
        handle,
    }
}

async fn start_echo() -> Running {
    let prices = PriceList::new().with_price("text", 5).unwrap();
    start(Arc::new(EchoAgent::new(PaymentGate::new(
        prices,
        PaymentPolicy::DeliverRegardless,
    ))))
    .await
}

#[tokio::test]
async fn test_execute_over_tcp() {
    let server = start_echo().await;
    let client = AgentClient::connect(&server.addr.to_string()).await.unwrap();

    let response = client
        .execute(AgentRequest::message(TelegramMessage::text("Hello")).with_paid(false))
        .await
        .unwrap();

    assert_eq!(response.text_content(), Some("Echo: Hello"));
    let payment = response.payment_request.unwrap();
    assert_eq!((payment.key.as_str(), payment.quantity), ("text", 5));
    assert_eq!(response.memory.unwrap().content, "Echo: Hello");
}

#[tokio::test]
async fn test_help_over_tcp() {
    let server = start_echo().await;
    let client = AgentClient::connect(&server.addr.to_string()).await.unwrap();

    let out: Vec<_> = client
        .help(AgentRequest::default())
        .await
        .unwrap()
        .collect()
        .await;

    assert_eq!(out.len(), 1);
    let msg = out[0].as_ref().unwrap().telegram_message.as_ref().unwrap();
    assert!(msg.text_content().unwrap().contains("echo"));
    assert_eq!(msg.keyboard.as_ref().unwrap().row_count(), 1);
}

#[tokio::test]
async fn test_execute_stream_through_host() {
    let server = start_echo().await;
    let client = AgentClient::connect(&server.addr.to_string()).await.unwrap();

    let store = Arc::new(MemoryContextStore::new());
    let ledger = Arc::new(MemoryLedger::new([("text", 1)]));
    let relay = Arc::new(RecordingRelay::new());
    let host = Host::new(store.clone(), ledger.clone(), relay.clone());

    let requests = vec![
        host.build_request(4, 77, AgentRequest::message(TelegramMessage::text("one")))
            .await
            .unwrap(),
        AgentRequest::message(TelegramMessage::status(Action::Typing)),
        AgentRequest::callback(STATS_CALLBACK, None),
        AgentRequest::message(TelegramMessage::text("two")),
    ];
    let stream = client
        .execute_stream(futures::stream::iter(requests))
        .await
        .unwrap();
    let summary = host.drive(4, 77, stream).await.unwrap();

    assert!(summary.error.is_none());
    assert_eq!(summary.charged, 2);
    assert_eq!(summary.persisted, 2);
    assert_eq!(ledger.spent(77).await, 10);

    let texts: Vec<String> = relay
        .sent_to(4)
        .await
        .iter()
        .map(|m| m.text_content().unwrap_or_default().to_string())
        .collect();
    assert_eq!(texts[0], "Echo: one");
    assert!(texts[1].starts_with("Stats:"));
    assert_eq!(texts[2], "Echo: two");

    let history = store.history(4).await.unwrap();
    assert_eq!(history[0].content, "Echo: one");
    assert_eq!(history[1].content, "Echo: two");
}

#[tokio::test]
async fn test_protocol_error_fails_only_that_call() {
    let server = start_echo().await;
    let client = AgentClient::connect(&server.addr.to_string()).await.unwrap();

    let mut bad = AgentRequest::message(TelegramMessage::text("hi"));
    bad.callback_query = Some(CallbackQuery::default());
    let err = client.execute(bad).await.unwrap_err();
    assert!(matches!(err, AgentError::Remote(ref m) if m.contains("triggers")));

    let ok = client
        .execute(AgentRequest::message(TelegramMessage::text("after")))
        .await
        .unwrap();
    assert_eq!(ok.text_content(), Some("Echo: after"));
}

#[tokio::test]
async fn test_undecodable_payload_keeps_connection() {
    let server = start_echo().await;
    let stream = TcpStream::connect(server.addr).await.unwrap();
    let mut framed = Framed::new(stream, codec(1024 * 1024));

    let mut garbage = RpcFrame::request(1, Method::Execute, &AgentRequest::default());
    garbage.payload = vec![0xff, 0xff, 0xff];
    framed.send(garbage.to_bytes()).await.unwrap();

    let reply = RpcFrame::from_bytes(&framed.next().await.unwrap().unwrap()).unwrap();
    assert_eq!(reply.call_id, 1);
    assert_eq!(reply.kind(), FrameKind::Error);
    assert!(reply.error.unwrap().contains("Decode"));

    let good = RpcFrame::request(
        2,
        Method::Execute,
        &AgentRequest::message(TelegramMessage::text("still open")),
    );
    framed.send(good.to_bytes()).await.unwrap();

    let reply = RpcFrame::from_bytes(&framed.next().await.unwrap().unwrap()).unwrap();
    assert_eq!(reply.call_id, 2);
    assert_eq!(reply.kind(), FrameKind::Response);
    let response: AgentResponse = reply.decode_payload().unwrap();
    assert_eq!(response.text_content(), Some("Echo: still open"));

    let end = RpcFrame::from_bytes(&framed.next().await.unwrap().unwrap()).unwrap();
    assert_eq!(end.kind(), FrameKind::End);
}

#[tokio::test]
async fn test_turn_error_does_not_end_remote_stream() {
    struct Flaky;

    #[async_trait]
    impl Agent for Flaky {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn help(&self, _request: &AgentRequest, _emitter: &Emitter) -> Result<()> {
            Ok(())
        }

        async fn execute(&self, request: &AgentRequest, emitter: &Emitter) -> Result<()> {
            match request.text() {
                Some("explode") => Err(AgentError::turn("model unavailable")),
                Some(text) => {
                    emitter.remember(ContextMessage::user(text)).await?;
                    emitter.text(text).await
                }
                None => Ok(()),
            }
        }
    }

    let server = start(Arc::new(Flaky)).await;
    let client = AgentClient::connect(&server.addr.to_string()).await.unwrap();
    let requests = ["first", "explode", "third"]
        .into_iter()
        .map(|t| AgentRequest::message(TelegramMessage::text(t)));
    let out: Vec<_> = client
        .execute_stream(futures::stream::iter(requests))
        .await
        .unwrap()
        .map(|r| r.unwrap())
        .collect()
        .await;

    let texts: Vec<_> = out.iter().filter_map(|r| r.text_content()).collect();
    assert_eq!(texts, vec!["first", "⚠️ Error: model unavailable", "third"]);
    assert_eq!(out.iter().filter(|r| r.memory.is_some()).count(), 2);
}

#[tokio::test]
async fn test_dropping_stream_cancels_remote_session() {
    struct Ticker {
        ticks: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Agent for Ticker {
        fn name(&self) -> &str {
            "ticker"
        }

        async fn help(&self, _request: &AgentRequest, _emitter: &Emitter) -> Result<()> {
            Ok(())
        }

        async fn execute(&self, _request: &AgentRequest, emitter: &Emitter) -> Result<()> {
            for i in 0..10_000 {
                emitter.text(&format!("tick {}", i)).await?;
                self.ticks.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            Ok(())
        }
    }

    let ticks = Arc::new(AtomicUsize::new(0));
    let server = start(Arc::new(Ticker {
        ticks: ticks.clone(),
    }))
    .await;
    let client = AgentClient::connect(&server.addr.to_string()).await.unwrap();

    let mut stream = client
        .execute_stream(futures::stream::iter(vec![AgentRequest::message(
            TelegramMessage::text("go"),
        )]))
        .await
        .unwrap();
    assert!(stream.next().await.unwrap().is_ok());
    assert!(stream.next().await.unwrap().is_ok());
    drop(stream);

    tokio::time::sleep(Duration::from_millis(100)).await;
    let after_cancel = ticks.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(ticks.load(Ordering::SeqCst), after_cancel);
    assert!(after_cancel < 10_000);
}

#[tokio::test]
async fn test_shutdown_stops_server() {
    let server = start_echo().await;
    server.shutdown.cancel();
    let result = tokio::time::timeout(Duration::from_secs(5), server.handle)
        .await
        .unwrap()
        .unwrap();
    assert!(result.is_ok());
}

/// Slow turns; Help answers at once unless asked to "wait".
struct Sluggish;

#[async_trait]
impl Agent for Sluggish {
    fn name(&self) -> &str {
        "sluggish"
    }

    async fn help(&self, request: &AgentRequest, emitter: &Emitter) -> Result<()> {
        if request.text() == Some("wait") {
            tokio::time::sleep(Duration::from_secs(30)).await;
        }
        emitter.text("here").await
    }

    async fn execute(&self, _request: &AgentRequest, emitter: &Emitter) -> Result<()> {
        tokio::time::sleep(Duration::from_millis(300)).await;
        emitter.text("done").await
    }
}

async fn next_frame(framed: &mut Framed<TcpStream, LengthDelimitedCodec>) -> RpcFrame {
    let bytes = tokio::time::timeout(Duration::from_secs(5), framed.next())
        .await
        .expect("no frame within 5s")
        .unwrap()
        .unwrap();
    RpcFrame::from_bytes(&bytes).unwrap()
}

#[tokio::test]
async fn test_empty_stream_ends() {
    let server = start_echo().await;
    let client = AgentClient::connect(&server.addr.to_string()).await.unwrap();

    let stream = client
        .execute_stream(futures::stream::empty())
        .await
        .unwrap();
    let out: Vec<_> = tokio::time::timeout(Duration::from_secs(5), stream.collect())
        .await
        .expect("empty stream never ended");

    assert!(out.is_empty());
    assert_eq!(client.open_calls().await, 0);
}

#[tokio::test]
async fn test_request_for_finished_call_is_rejected() {
    let server = start_echo().await;
    let stream = TcpStream::connect(server.addr).await.unwrap();
    let mut framed = Framed::new(stream, codec(1024 * 1024));
    let hi = AgentRequest::message(TelegramMessage::text("hi"));

    framed
        .send(RpcFrame::request(1, Method::Execute, &hi).to_bytes())
        .await
        .unwrap();
    assert_eq!(next_frame(&mut framed).await.kind(), FrameKind::Response);
    assert_eq!(next_frame(&mut framed).await.kind(), FrameKind::End);

    framed
        .send(RpcFrame::request(1, Method::Execute, &hi).to_bytes())
        .await
        .unwrap();
    let reply = next_frame(&mut framed).await;
    assert_eq!((reply.call_id, reply.kind()), (1, FrameKind::Error));
    assert!(reply.error().contains("already finished"));

    framed
        .send(RpcFrame::request(2, Method::ExecuteStream, &hi).to_bytes())
        .await
        .unwrap();
    framed
        .send(RpcFrame::end(2, Method::ExecuteStream).to_bytes())
        .await
        .unwrap();
    let mut kinds = Vec::new();
    loop {
        let frame = next_frame(&mut framed).await;
        assert_eq!(frame.call_id, 2);
        kinds.push(frame.kind());
        if frame.kind() == FrameKind::End {
            break;
        }
    }
    assert_eq!(kinds[kinds.len() - 2], FrameKind::TurnEnd);
    assert!(kinds[..kinds.len() - 2]
        .iter()
        .all(|k| *k == FrameKind::Response));

    framed
        .send(RpcFrame::request(2, Method::ExecuteStream, &hi).to_bytes())
        .await
        .unwrap();
    let reply = next_frame(&mut framed).await;
    assert_eq!((reply.call_id, reply.kind()), (2, FrameKind::Error));
}

#[tokio::test]
async fn test_queued_turns_do_not_block_other_calls() {
    let mut config = Config::default();
    config.session.buffer_size = 1;
    let server = start_with(config, Arc::new(Sluggish)).await;
    let client = AgentClient::connect(&server.addr.to_string()).await.unwrap();

    let requests =
        (0..8).map(|i| AgentRequest::message(TelegramMessage::text(&format!("turn {}", i))));
    let mut stream = client
        .execute_stream(futures::stream::iter(requests))
        .await
        .unwrap();
    assert_eq!(
        stream.next().await.unwrap().unwrap().text_content(),
        Some("done")
    );

    let help = tokio::time::timeout(Duration::from_secs(1), async {
        client
            .help(AgentRequest::message(TelegramMessage::text("now")))
            .await
            .unwrap()
            .collect::<Vec<_>>()
            .await
    })
    .await
    .expect("help call waited behind the queued turns");
    assert_eq!(help.len(), 1);

    let rest: Vec<_> = stream.collect().await;
    assert_eq!(rest.len(), 7);
}

#[tokio::test]
async fn test_dropped_calls_release_routing_entries() {
    let server = start(Arc::new(Sluggish)).await;
    let client = AgentClient::connect(&server.addr.to_string()).await.unwrap();

    let mut streams = Vec::new();
    for _ in 0..20 {
        let stream = client
            .help(AgentRequest::message(TelegramMessage::text("wait")))
            .await
            .unwrap();
        streams.push(stream);
    }
    assert_eq!(client.open_calls().await, 20);

    drop(streams);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(client.open_calls().await, 0);

    let answer = client
        .execute(AgentRequest::message(TelegramMessage::text("still usable")))
        .await
        .unwrap();
    assert_eq!(answer.text_content(), Some("done"));
}

#[tokio::test]
async fn test_conversation_sees_previous_turn_memory() {
    let server = start_echo().await;
    let client = AgentClient::connect(&server.addr.to_string()).await.unwrap();

    let store = Arc::new(MemoryContextStore::new());
    let ledger = Arc::new(MemoryLedger::new([("text", 1)]));
    let relay = Arc::new(RecordingRelay::new());
    let host = Host::new(store.clone(), ledger, relay.clone());

    let (tx, rx) = mpsc::channel(1);
    let events = client
        .execute_stream_turns(ReceiverStream::new(rx))
        .await
        .unwrap();
    let inputs = vec![
        AgentRequest::message(TelegramMessage::text("Hello")),
        AgentRequest::callback(STATS_CALLBACK, None),
    ];
    let summary = host.converse(5, 77, inputs, tx, events).await.unwrap();

    assert!(summary.error.is_none());
    assert_eq!(summary.turns, 2);
    let texts: Vec<String> = relay
        .sent_to(5)
        .await
        .iter()
        .filter_map(|m| m.text_content().map(str::to_string))
        .collect();
    assert_eq!(
        texts,
        vec![
            "Echo: Hello".to_string(),
            "Stats: 1 messages in this chat, 1 of them mine.".to_string(),
        ]
    );
    assert_eq!(client.open_calls().await, 0);
}
