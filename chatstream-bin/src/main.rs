use std::io::{self, Write};
use std::path::PathBuf;

use chatstream_core::{
    chat::ChatSession,
    config::Config,
    conversation::Conversation,
    display::{RevealConfig, RevealTask, RevealView},
    http_client::HttpClient,
    source::SseResponse,
    sse::event_stream,
    stream::StreamEvent,
};
use clap::{Parser, Subcommand};
use futures_util::StreamExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;

const DEFAULT_BASE_URL: &str = "http://localhost:8000";

#[derive(Parser)]
#[command(
    author,
    version,
    about = "chatstream CLI: stream agent replies to the terminal",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a message to an agent conversation and type out the reply
    Send {
        #[arg(long)]
        agent: String,
        #[arg(long)]
        conversation: String,
        #[arg(short, long, help = "Message from the user")]
        message: String,
        #[arg(long, help = "Config file (JSON or TOML)")]
        config: Option<PathBuf>,
        #[arg(long, env = "CHATSTREAM_API_URL", help = "Overrides api.base_url")]
        base_url: Option<String>,
        #[arg(long, help = "Print deltas as they arrive instead of typing them out")]
        instant: bool,
    },
    /// Feed a captured SSE transcript through the parser
    Replay {
        #[arg(long)]
        file: PathBuf,
        #[arg(long, default_value_t = 16, help = "Bytes per simulated read")]
        chunk_size: usize,
        #[arg(long, default_value_t = 20, help = "Reveal interval; 0 prints instantly")]
        reveal_ms: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Send {
            agent,
            conversation,
            message,
            config,
            base_url,
            instant,
        } => send(agent, conversation, message, config, base_url, instant).await,
        Commands::Replay {
            file,
            chunk_size,
            reveal_ms,
        } => replay(file, chunk_size, reveal_ms).await,
    }
}

async fn send(
    agent: String,
    conversation_id: String,
    message: String,
    config: Option<PathBuf>,
    base_url: Option<String>,
    instant: bool,
) -> anyhow::Result<()> {
    let mut cfg = match config {
        Some(path) => Config::from_path(&path)?,
        None => Config::with_base_url(DEFAULT_BASE_URL),
    };
    if let Some(base) = base_url {
        cfg.api.base_url = base;
    }
    tracing::debug!(base_url = %cfg.api.base_url, "config loaded");

    let client = HttpClient::from_config(&cfg)?;
    let session = ChatSession::new(client)
        .with_batching(cfg.batching.policy())
        .with_api_base(cfg.api.base_url.clone());

    let mut conv = Conversation::new();
    let turn = conv.begin_turn(&message)?;
    let cancel = turn.cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    let summary = if instant {
        let mut printed = 0usize;
        session
            .stream_turn(&mut conv, &turn, &agent, &conversation_id, &message, |m| {
                if let Some(rest) = m.content.get(printed..) {
                    print!("{rest}");
                    io::stdout().flush().ok();
                }
                printed = m.content.len();
            })
            .await
    } else {
        let reveal = RevealTask::spawn(cfg.display.reveal_config());
        let printer = spawn_printer(reveal.subscribe());
        let summary = session
            .stream_turn(&mut conv, &turn, &agent, &conversation_id, &message, |m| {
                reveal.set_target(m.content.clone());
            })
            .await;
        if summary.outcome() == chatstream_core::sse::ParseOutcome::Cancelled {
            reveal.force_complete();
        }
        // a reply that paused long enough for the reveal to catch up is held
        // back by the default policy; settle shows the rest
        reveal.settle().await;
        reveal.shutdown();
        printer.await?;
        summary
    };
    println!();

    if let Some(meta) = summary.rag {
        eprintln!("[rag: {} docs]", meta.rag_docs_count);
    }
    eprintln!(
        "[{}: {} frames, {} deltas, {} bytes]",
        summary.outcome().as_str(),
        summary.stats.frames,
        summary.stats.deltas,
        summary.stats.bytes
    );
    if let Some(err) = summary.error {
        anyhow::bail!(err);
    }
    Ok(())
}

async fn replay(file: PathBuf, chunk_size: usize, reveal_ms: u64) -> anyhow::Result<()> {
    let raw = tokio::fs::read(&file).await?;
    let chunks: Vec<Vec<u8>> = raw.chunks(chunk_size.max(1)).map(<[u8]>::to_vec).collect();
    tracing::debug!(bytes = raw.len(), reads = chunks.len(), "replaying transcript");
    let mut events = event_stream(SseResponse::from_chunks(chunks), None);

    let reveal = (reveal_ms > 0).then(|| {
        RevealTask::spawn(RevealConfig {
            reveal_interval: std::time::Duration::from_millis(reveal_ms),
            check_interval: std::time::Duration::from_millis((reveal_ms / 2).max(1)),
            ..RevealConfig::default()
        })
    });
    let printer = reveal.as_ref().map(|r| spawn_printer(r.subscribe()));

    let mut text = String::new();
    let mut failed = false;
    while let Some(ev) = events.next().await {
        match ev {
            StreamEvent::Delta(delta) => {
                text.push_str(&delta);
                match reveal.as_ref() {
                    Some(r) => r.set_target(text.clone()),
                    None => {
                        print!("{delta}");
                        io::stdout().flush().ok();
                    }
                }
            }
            StreamEvent::Done(meta) => {
                if let Some(meta) = meta.filter(|m| m.rag_used) {
                    eprintln!("[rag: {} docs]", meta.rag_docs_count);
                }
            }
            StreamEvent::Error(err) => {
                eprintln!("[error: {err}]");
                failed |= ev_is_fatal(&err);
            }
            _ => {}
        }
    }

    if let (Some(r), Some(p)) = (reveal, printer) {
        r.settle().await;
        r.shutdown();
        p.await?;
    }
    println!();
    if failed {
        anyhow::bail!("replay ended with a transport error");
    }
    Ok(())
}

fn ev_is_fatal(err: &chatstream_core::error::ChatStreamError) -> bool {
    !matches!(err, chatstream_core::error::ChatStreamError::MalformedPayload(_))
}

/// Prints the newly revealed suffix each time the view changes.
fn spawn_printer(mut rx: watch::Receiver<RevealView>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut printed = String::new();
        while rx.changed().await.is_ok() {
            let displayed = rx.borrow_and_update().displayed.clone();
            let mut out = io::stdout();
            match displayed.strip_prefix(printed.as_str()) {
                Some(rest) => {
                    let _ = write!(out, "{rest}");
                }
                // shrunk or replaced: start a fresh line
                None => {
                    let _ = write!(out, "\n{displayed}");
                }
            }
            out.flush().ok();
            printed = displayed;
        }
    })
}
