//! `serve` command: run the echo agent server until Ctrl-C.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::info;

use anyagent::agents::EchoAgent;
use anyagent::config::Config;
use anyagent::payment::PaymentGate;
use anyagent::transport::AgentServer;

pub(crate) async fn cmd_serve(
    mut config: Config,
    host: Option<String>,
    port: Option<u16>,
) -> Result<()> {
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }

    let gate = PaymentGate::from_config(&config.pricing).context("Invalid pricing config")?;
    info!(
        policy = ?gate.policy(),
        priced_keys = gate.prices().len(),
        "Payment gate ready"
    );
    let agent = Arc::new(EchoAgent::new(gate));

    let server = AgentServer::bind(&config, agent)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.addr()))?;
    println!("Echo agent listening on {}", server.local_addr()?);

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received");
            signal.cancel();
        }
    });

    server.serve(shutdown).await?;
    Ok(())
}
