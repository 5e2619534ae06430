use anyhow::Result;
use clap::{Parser, Subcommand};
use harvester::bridge::DEFAULT_WS_ADDR;
use harvester::config::DEFAULT_CONFIG_FILE;
use harvester::{
    BridgeEngine, Config, ExtensionBridge, Harvester, Mode, Monitor, Page, PageUnreadCounter,
};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

mod logging;
mod server;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Messenger harvester - conversation discovery, message extraction and unread monitoring"
)]
struct Args {
    /// Markdown (or yaml) configuration document
    #[arg(short, long, env = "HARVESTER_CONFIG", default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Address the browser extension connects to
    #[arg(long, default_value = DEFAULT_WS_ADDR)]
    bridge: String,

    /// Seconds to wait for the browser extension to connect
    #[arg(long, default_value = "30")]
    connect_timeout: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Discover conversations, extract when configured, then optionally monitor
    Run {
        /// Extract at most this many conversations. Implies extraction.
        #[arg(long)]
        max_conversations: Option<usize>,

        /// Keep polling the unread count afterwards (implied by `mode: monitor`)
        #[arg(long)]
        monitor: bool,
    },
    /// Serve the HTTP control API while monitoring in the background
    Serve {
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        #[arg(short, long, default_value = "8000")]
        port: u16,

        /// Allow requests from any origin
        #[arg(long)]
        cors: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = Arc::new(Config::load(&args.config)?);
    let _log_guard = logging::init_logging(&config)?;
    info!(config = %args.config.display(), mode = ?config.mode(), "🚀 Starting harvester agent");

    let connect_timeout = Duration::from_secs(args.connect_timeout);
    let bridge = ExtensionBridge::bind(&args.bridge).await?;
    println!(
        "Waiting for the browser extension on ws://{} ...",
        bridge.local_addr()
    );
    if !bridge.wait_for_client(connect_timeout).await {
        warn!("Browser extension has not connected yet, page calls will keep waiting for it");
    }
    let engine = BridgeEngine::new(bridge.clone()).with_connect_timeout(connect_timeout);
    let page = Page::new(Arc::new(engine));
    let harvester = Harvester::new(page, config.clone());

    match args.command {
        Command::Run {
            max_conversations,
            monitor,
        } => run(harvester, max_conversations, monitor).await,
        Command::Serve { host, port, cors } => serve(harvester, bridge, &host, port, cors).await,
    }
}

async fn run(harvester: Harvester, max_conversations: Option<usize>, monitor: bool) -> Result<()> {
    let config = harvester.config().clone();

    if max_conversations.is_some() || config.should_auto_extract() {
        harvester.run_extraction(max_conversations).await?;
    } else {
        let conversations = harvester.list_conversations().await?;
        let report = harvester.save_conversations(&conversations)?;
        println!(
            "📋 Saved {} conversations to {}",
            conversations.len(),
            report.list_file.display()
        );
    }

    if !(monitor || config.mode() == Mode::Monitor) {
        return Ok(());
    }

    let page = harvester.page().clone();
    let counter = Arc::new(PageUnreadCounter::from_config(page.clone(), &config));
    let mut monitor = Monitor::new(counter, page, config, harvester.snapshots());

    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_ctrl_c(cancel.clone()));
    println!("Monitoring unread conversations. Press Ctrl+C to stop");

    let report = monitor.run(cancel).await;
    println!(
        "Monitoring stopped after {} polls ({} failed, {} increases, {} decreases)",
        report.polls, report.failures, report.increases, report.decreases
    );
    Ok(())
}

async fn serve(
    harvester: Harvester,
    bridge: Arc<ExtensionBridge>,
    host: &str,
    port: u16,
    cors: bool,
) -> Result<()> {
    let addr: SocketAddr = format!("{host}:{port}").parse()?;
    let state = server::AppState::new(harvester, bridge);
    state.start().await;

    let mut app = server::router(state.clone());
    if cors {
        app = app.layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );
    }

    let listener = tokio::net::TcpListener::bind(addr).await?;
    println!("HTTP API running on http://{addr}");
    println!("Health check available at: http://{addr}/health");
    println!("Press Ctrl+C to stop");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
        })
        .await?;

    if let Some(report) = state.stop().await {
        info!(
            polls = report.polls,
            failures = report.failures,
            "Monitoring stopped"
        );
    }
    info!("Shutting down HTTP server");
    Ok(())
}

/// Resolves on Ctrl+C or when `cancel` fires elsewhere, cancelling it either way
async fn cancel_on_ctrl_c(cancel: CancellationToken) {
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C");
            cancel.cancel();
        }
        _ = cancel.cancelled() => {}
    }
}
