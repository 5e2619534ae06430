//! HTTP control surface: status, stop, and an extraction trigger.

use axum::{
    extract::{Query, State},
    routing::{get, post},
    Json, Router,
};
use harvester::{ExtensionBridge, Harvester, Monitor, MonitorReport, PageUnreadCounter};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

pub struct AppState {
    harvester: Arc<Harvester>,
    bridge: Arc<ExtensionBridge>,
    /// Serialises every use of the browser session
    session: Arc<Mutex<()>>,
    cancel: CancellationToken,
    monitor: Mutex<Option<JoinHandle<MonitorReport>>>,
}

impl AppState {
    pub fn new(harvester: Harvester, bridge: Arc<ExtensionBridge>) -> Arc<Self> {
        Arc::new(Self {
            harvester: Arc::new(harvester),
            bridge,
            session: Arc::new(Mutex::new(())),
            cancel: CancellationToken::new(),
            monitor: Mutex::new(None),
        })
    }

    /// Save the conversation list, then start the monitoring loop in the background
    pub async fn start(&self) {
        {
            let _session = self.session.lock().await;
            match self.harvester.list_conversations().await {
                Ok(conversations) => {
                    println!("📋 Found {} conversations", conversations.len());
                    if let Err(e) = self.harvester.save_conversations(&conversations) {
                        warn!(error = %e, "Failed to save conversation list");
                    }
                }
                Err(e) => error!(error = %e, "Initial conversation listing failed"),
            }
        }

        let harvester = &self.harvester;
        let page = harvester.page().clone();
        let config = harvester.config().clone();
        let counter = Arc::new(PageUnreadCounter::from_config(page.clone(), &config));
        let mut monitor = Monitor::new(counter, page, config, harvester.snapshots())
            .with_session_gate(self.session.clone());
        let cancel = self.cancel.clone();
        let task = tokio::spawn(async move { monitor.run(cancel).await });
        *self.monitor.lock().await = Some(task);
    }

    /// Cancel the monitoring loop and wait for its report
    pub async fn stop(&self) -> Option<MonitorReport> {
        self.cancel.cancel();
        let task = self.monitor.lock().await.take()?;
        match task.await {
            Ok(report) => Some(report),
            Err(e) => {
                error!(error = %e, "Monitoring task failed");
                None
            }
        }
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/stop", post(stop))
        .route("/extract-messages", post(extract_messages))
        .with_state(state)
}

async fn root() -> Json<Value> {
    Json(json!({
        "status": "Bot is running",
        "message": "Messenger harvester API",
    }))
}

async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "bot_active": !state.cancel.is_cancelled(),
        "extension_connected": state.bridge.is_client_connected().await,
    }))
}

async fn stop(State(state): State<Arc<AppState>>) -> Json<Value> {
    if state.cancel.is_cancelled() {
        return Json(json!({"message": "Bot not running"}));
    }
    info!("📥 POST /stop");
    let report = state.stop().await;
    Json(json!({"message": "Bot stopped", "report": report}))
}

#[derive(Debug, Deserialize)]
struct ExtractParams {
    max_conversations: Option<usize>,
}

async fn extract_messages(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ExtractParams>,
) -> Json<Value> {
    if state.cancel.is_cancelled() {
        return Json(json!({"error": "Bot not running"}));
    }
    info!(max = ?params.max_conversations, "📥 POST /extract-messages");

    let _session = state.session.lock().await;
    match state.harvester.run_extraction(params.max_conversations).await {
        Ok(stats) => Json(json!({"status": "success", "stats": stats})),
        Err(e) => {
            error!(error = %e, "Extraction request failed");
            Json(json!({"status": "error", "error": e.to_string()}))
        }
    }
}
