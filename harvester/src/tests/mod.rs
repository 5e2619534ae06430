pub mod fake_page;
mod filter_tests;
mod harvester_tests;

use crate::page::Page;
use crate::snapshot::SnapshotSink;
use std::sync::Mutex;

// Initialize tracing for tests
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};
    let _ = fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::DEBUG.into()))
        .with_target(true)
        .with_test_writer()
        .try_init();
}

/// Snapshot sink that remembers every event it was asked to capture
#[derive(Default)]
pub struct RecordingSnapshots {
    events: Mutex<Vec<(String, String)>>,
}

impl RecordingSnapshots {
    pub fn events(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|(event, _)| event.clone())
            .collect()
    }

    pub fn contexts(&self) -> Vec<(String, String)> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl SnapshotSink for RecordingSnapshots {
    async fn capture(&self, _page: &Page, event: &str, context: &str) {
        self.events
            .lock()
            .unwrap()
            .push((event.to_string(), context.to_string()));
    }
}
