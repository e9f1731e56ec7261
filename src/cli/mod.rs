//! CLI module: command parsing and dispatch
//!
//! All CLI logic lives here. `main.rs` calls `cli::run()`.

pub mod config;
pub mod send;
pub mod serve;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "anyagent")]
#[command(version)]
#[command(about = "Agent execution protocol runtime for messaging bots", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the echo agent over TCP
    Serve {
        /// Port to listen on (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
        /// Host to bind to (overrides config)
        #[arg(long)]
        host: Option<String>,
    },
    /// Send messages to a running agent, acting as the bot server
    Send {
        /// Message texts; each one is a separate turn
        #[arg(required = true)]
        texts: Vec<String>,
        /// Agent address (defaults to 127.0.0.1 and the configured port)
        #[arg(long)]
        addr: Option<String>,
        /// Treat each text as button callback data instead of a message
        #[arg(long, conflicts_with = "help_call")]
        callback: bool,
        /// Send all turns over one ExecuteStream call
        #[arg(long)]
        stream: bool,
        /// Mark requests as already paid
        #[arg(long)]
        paid: bool,
        /// Call Help instead of Execute
        #[arg(long = "help-call")]
        help_call: bool,
        /// Chat identifier used for context
        #[arg(long, default_value_t = 1)]
        chat_id: i64,
        /// User identifier charged by the ledger
        #[arg(long, default_value_t = 1)]
        user_id: i64,
    },
    /// Validate configuration file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Show version information
    Version,
}

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Validate config file for errors and warnings
    Check,
    /// Print the effective configuration (file + environment)
    Show,
}

/// Run the CLI.
pub async fn run() -> Result<()> {
    // .env values feed the ANYAGENT_* overrides read during config load.
    let _ = dotenvy::dotenv();

    // A broken config still gets default logging so its error is reported;
    // `config check` reads the file itself and explains what is wrong.
    let loaded = anyagent::config::Config::load();
    let logging = loaded
        .as_ref()
        .map(|config| config.logging.clone())
        .unwrap_or_default();
    anyagent::utils::logging::init_logging(&logging);

    let cli = Cli::parse();

    match cli.command {
        None => {
            let mut cmd = Cli::command();
            cmd.print_help()?;
            println!();
        }
        Some(Commands::Version) => cmd_version(),
        Some(Commands::Serve { port, host }) => {
            let config = loaded.with_context(|| "Failed to load configuration")?;
            serve::cmd_serve(config, host, port).await?;
        }
        Some(Commands::Send {
            texts,
            addr,
            callback,
            stream,
            paid,
            help_call,
            chat_id,
            user_id,
        }) => {
            let config = loaded.with_context(|| "Failed to load configuration")?;
            let opts = send::SendOptions {
                addr,
                callback,
                stream,
                paid,
                help_call,
                chat_id,
                user_id,
            };
            send::cmd_send(config, texts, opts).await?;
        }
        Some(Commands::Config { action }) => {
            config::cmd_config(action)?;
        }
    }

    Ok(())
}

fn cmd_version() {
    println!("anyagent {}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("Agent execution protocol runtime for messaging bots");
}
