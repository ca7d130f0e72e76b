//! hub-sse CLI - talk to a SignalR-style hub over Server-Sent Events.
//!
//! This is the main binary entry point. See the `hub_sse` library for the
//! transport and protocol.

use anyhow::{Context, Result};
use bytes::BytesMut;
use clap::{Parser, Subcommand};
use hub_sse::constants::RECORD_SEPARATOR;
use hub_sse::protocol::Completion;
use hub_sse::{client, Config, HubMessage, HubProtocol, HubSession, JsonHubProtocol};
use mimalloc::MiMalloc;

/// Global allocator configured per M-MIMALLOC-APPS guideline.
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

// CLI
#[derive(Parser)]
#[command(name = "hub-sse")]
#[command(version)]
#[command(about = "Connect to a SignalR-style hub over Server-Sent Events")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect, handshake, and print incoming messages as JSON lines
    Listen {
        /// Hub URL (overrides config and HUB_SSE_SERVER_URL)
        #[arg(long)]
        url: Option<String>,
        /// Connection id to use instead of negotiating one
        #[arg(long, conflicts_with = "generate_id")]
        id: Option<String>,
        /// Use a random connection id instead of negotiating one
        #[arg(long)]
        generate_id: bool,
        /// Hub method to invoke after the handshake
        #[arg(long)]
        invoke: Option<String>,
        /// JSON argument for --invoke (repeatable, in parameter order)
        #[arg(long = "arg", requires = "invoke")]
        args: Vec<String>,
        /// Start a streaming invocation instead of a plain one
        #[arg(long, requires = "invoke")]
        stream: bool,
    },
    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"))
        .format_timestamp_secs()
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Listen {
            url,
            id,
            generate_id,
            invoke,
            args,
            stream,
        } => {
            let mut config = Config::load()?;
            if let Some(url) = url {
                config.server_url = url;
            }
            if let Some(id) = id {
                config.connection_id = Some(id);
            } else if generate_id {
                config.connection_id = Some(uuid::Uuid::new_v4().to_string());
            }
            let call = invoke.map(|target| Call {
                target,
                args,
                stream,
            });
            listen(&config, call).await?;
        }
        Commands::Config => {
            let config = Config::load()?;
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }

    Ok(())
}

/// Invocation requested on the command line.
struct Call {
    target: String,
    args: Vec<String>,
    stream: bool,
}

/// Connect, handshake, optionally invoke, then print messages until the
/// stream ends, the hub closes, the invocation completes, or Ctrl-C.
async fn listen(config: &Config, call: Option<Call>) -> Result<()> {
    let connection = client::connect(config)
        .await
        .with_context(|| format!("Failed to connect to {}", config.server_url))?;
    log::info!("Connected as {}", connection.connection_id());

    let protocol = JsonHubProtocol::new();
    let mut session = HubSession::new(connection, protocol);
    session.handshake().await.context("Handshake failed")?;

    let awaiting = match call {
        Some(call) => Some(start_call(&session, call).await?),
        None => None,
    };

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        let message = tokio::select! {
            _ = &mut shutdown => {
                log::info!("Interrupted, closing");
                break;
            }
            message = session.next_message() => message?,
        };

        let Some(message) = message else {
            log::info!("Event stream ended");
            break;
        };

        println!("{}", render(session.protocol(), &message)?);

        match &message {
            HubMessage::Close(close) => {
                if let Some(error) = &close.error {
                    log::warn!("Hub closed the connection: {}", error);
                }
                break;
            }
            HubMessage::Completion(completion)
                if awaiting.as_deref() == Some(completion.invocation_id.as_str()) =>
            {
                if let Completion::Error(error) = &completion.completion {
                    session.close();
                    anyhow::bail!("Invocation failed: {}", error);
                }
                break;
            }
            _ => {}
        }
    }

    session.close();
    Ok(())
}

/// Send the requested invocation. Returns its invocation id.
async fn start_call(session: &HubSession<JsonHubProtocol>, call: Call) -> Result<String> {
    let arguments = call
        .args
        .iter()
        .map(|raw| {
            let value: serde_json::Value = serde_json::from_str(raw)
                .with_context(|| format!("--arg is not valid JSON: {raw}"))?;
            Ok(session.protocol().marshal_argument(&value)?)
        })
        .collect::<Result<Vec<_>>>()?;

    let id = if call.stream {
        session.stream(&call.target, arguments).await?
    } else {
        session.invoke(&call.target, arguments).await?
    };
    log::info!("Invoked {} as {}", call.target, id);
    Ok(id)
}

/// Re-encode a message as a single JSON line.
fn render<P: HubProtocol>(protocol: &P, message: &HubMessage) -> Result<String> {
    let mut buf = BytesMut::new();
    protocol.write_message(message, &mut buf)?;
    if buf.last() == Some(&RECORD_SEPARATOR) {
        buf.truncate(buf.len() - 1);
    }
    Ok(String::from_utf8_lossy(&buf).into_owned())
}
