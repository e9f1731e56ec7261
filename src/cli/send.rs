//! `send` command: play the bot-server role against a running agent.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use anyagent::config::Config;
use anyagent::host::{DriveSummary, Host, MemoryContextStore, MemoryLedger, MessageRelay};
use anyagent::proto::{AgentRequest, Content, TelegramMessage};
use anyagent::transport::AgentClient;

pub(crate) struct SendOptions {
    pub addr: Option<String>,
    pub callback: bool,
    pub stream: bool,
    pub paid: bool,
    pub help_call: bool,
    pub chat_id: i64,
    pub user_id: i64,
}

/// Prints delivered messages to stdout.
struct PrintRelay;

#[async_trait]
impl MessageRelay for PrintRelay {
    async fn relay(&self, chat_id: i64, message: TelegramMessage) -> anyagent::Result<()> {
        println!("[chat {}] {}", chat_id, describe(&message));
        if let Some(keyboard) = &message.keyboard {
            for row in &keyboard.rows {
                let labels: Vec<String> =
                    row.buttons.iter().map(|b| format!("[{}]", b.text)).collect();
                println!("    {}", labels.join(" "));
            }
        }
        Ok(())
    }
}

fn describe(message: &TelegramMessage) -> String {
    match &message.content {
        Some(Content::Text(t)) => t.text.clone(),
        Some(Content::Location(l)) => format!("<location {:.5}, {:.5}>", l.latitude, l.longitude),
        Some(other) => format!("<{} {} bytes>", other.kind(), other.payload_len()),
        None => format!("({})", message.action().as_str_name().to_lowercase()),
    }
}

pub(crate) async fn cmd_send(config: Config, texts: Vec<String>, opts: SendOptions) -> Result<()> {
    let addr = opts
        .addr
        .clone()
        .unwrap_or_else(|| format!("127.0.0.1:{}", config.server.port));
    let client = AgentClient::connect_with_limit(&addr, config.server.max_frame_bytes)
        .await
        .with_context(|| format!("Failed to connect to agent at {}", addr))?;

    // The CLI ledger accepts every configured pricing key at one credit per unit.
    let ledger = Arc::new(MemoryLedger::new(
        config.pricing.prices.keys().map(|k| (k.clone(), 1)),
    ));
    let host = Host::new(
        Arc::new(MemoryContextStore::new()),
        ledger.clone(),
        Arc::new(PrintRelay),
    );

    let make = |text: &str| {
        let request = if opts.callback {
            AgentRequest::callback(text, None)
        } else {
            AgentRequest::message(TelegramMessage::text(text))
        };
        request.with_paid(opts.paid)
    };

    if opts.help_call {
        let request = host
            .build_request(opts.chat_id, opts.user_id, make(&texts[0]))
            .await?;
        let stream = client.help(request).await?;
        report(host.drive(opts.chat_id, opts.user_id, stream).await?);
    } else if opts.stream {
        // One request in flight at a time: each turn sees the memory of the last.
        let (tx, rx) = mpsc::channel(1);
        let events = client.execute_stream_turns(ReceiverStream::new(rx)).await?;
        let inputs = texts.iter().map(|text| make(text)).collect();
        report(
            host.converse(opts.chat_id, opts.user_id, inputs, tx, events)
                .await?,
        );
    } else {
        for text in &texts {
            let request = host
                .build_request(opts.chat_id, opts.user_id, make(text))
                .await?;
            let response = client.execute(request).await?;
            host.apply(opts.chat_id, opts.user_id, response).await?;
        }
    }

    let spent = ledger.spent(opts.user_id).await;
    if spent > 0 {
        println!("Credits charged: {}", spent);
    }
    Ok(())
}

fn report(summary: DriveSummary) {
    if let Some(error) = summary.error {
        eprintln!("Agent call failed: {}", error);
    }
    if summary.failed_charges > 0 {
        eprintln!("{} charge(s) rejected by the ledger", summary.failed_charges);
    }
}
