//! Relay command-line client
//!
//! Sends one query to a relay server, printing progress to stderr and the
//! answer to stdout.

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use relay::client::{
    ConversationHistory, HttpTransport, OrchestratorConfig, QueryRequest, RequestOrchestrator,
};
use relay::{Category, EventKind, FileAttachment, RelayConfig, ResponseCache, StreamEvent};

#[derive(Parser)]
#[command(name = "relay-ask")]
#[command(about = "Ask a relay server a question", long_about = None)]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Server base URL
    #[arg(short, long, default_value = "http://127.0.0.1:8080")]
    server: String,

    /// Query category: general, researcher, coder
    #[arg(short = 'C', long, default_value = "general")]
    category: Category,

    /// Attach a file (repeatable)
    #[arg(short, long = "file")]
    files: Vec<PathBuf>,

    /// Bearer token for the server
    #[arg(short, long, env = "RELAY_AUTH_TOKEN")]
    token: Option<String>,

    /// Configuration file for retry, channel and history settings
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// The question
    query: String,
}

#[tokio::main]
async fn main() {
    let rust_log = std::env::var("RUST_LOG").unwrap_or_else(|_| "warn".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(rust_log)
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(Cli::parse()).await {
        eprintln!("error: {:#}", e);
        std::process::exit(1);
    }
}

/// Status line printed to stderr for a progress event
fn progress_line(event: &StreamEvent) -> Option<String> {
    match event.kind {
        EventKind::Thinking => Some(format!("... {}", event.message())),
        EventKind::Progress => {
            let attempt = event.payload.get("attempt").and_then(|v| v.as_u64())?;
            let max = event.payload.get("max_attempts").and_then(|v| v.as_u64())?;
            Some(format!("... attempt {}/{}", attempt, max))
        }
        _ => None,
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = RelayConfig::load(cli.config.as_deref()).context("loading configuration")?;

    let files = cli
        .files
        .iter()
        .map(|path| {
            FileAttachment::from_path(path).with_context(|| format!("attaching {}", path.display()))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    let transport = HttpTransport::new(cli.server, cli.token)?;
    let cache = Arc::new(
        ResponseCache::new(config.cache.policies(), config.cache.general.into())
            .with_version(config.cache.version),
    );
    let mut orchestrator = RequestOrchestrator::new(
        Arc::new(transport),
        cache,
        OrchestratorConfig::from_relay_config(&config),
    );
    if let Some(path) = &config.history.path {
        let history = ConversationHistory::load(path, config.history.keep_last);
        orchestrator = orchestrator.with_history(Arc::new(history));
    }

    let (progress_tx, mut progress_rx) = mpsc::unbounded_channel::<StreamEvent>();
    let printer = tokio::spawn(async move {
        while let Some(event) = progress_rx.recv().await {
            if let Some(line) = progress_line(&event) {
                eprintln!("{}", line);
            }
        }
    });

    let cancel = CancellationToken::new();
    let on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_ctrl_c.cancel();
        }
    });

    let request = QueryRequest::new(cli.category, cli.query).with_files(files);
    let result = orchestrator
        .process_with(request, Some(progress_tx), cancel)
        .await;
    let _ = printer.await;

    let response = result?;
    println!("{}", response.content);
    Ok(())
}
