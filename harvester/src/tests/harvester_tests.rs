use super::fake_page::{FakePage, ROOT};
use super::RecordingSnapshots;
use crate::config::Config;
use crate::errors::HarvestError;
use crate::harvester::{resolve_url, ExtractionStats, Harvester};
use crate::model::Conversation;
use crate::page::PageElement;
use crate::persistence::Archive;
use std::sync::Arc;

const FAST: &str = r#"
wait_timeout: 0
discovery:
  settle_interval_ms: 0
data_to_collect:
  messages:
    load_history: false
"#;

fn harvester(fake: &Arc<FakePage>, output: &std::path::Path, yaml: &str) -> Harvester {
    let config = Arc::new(Config::from_yaml_str(yaml).unwrap());
    Harvester::new(fake.page(), config)
        .with_archive(Archive::new(output))
        .with_snapshots(Arc::new(RecordingSnapshots::default()))
}

fn message_rows(fake: &FakePage, texts: &[&str]) -> usize {
    let main = fake.add(ROOT, "div", &[("role", "main")], "");
    fill_rows(fake, main, texts);
    main
}

fn fill_rows(fake: &FakePage, main: usize, texts: &[&str]) {
    for text in texts {
        let row = fake.add(main, "div", &[("role", "row")], "");
        fake.add(row, "div", &[("dir", "auto")], text);
    }
}

#[tokio::test]
async fn test_extract_all_counts_and_isolates_failures() {
    super::init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let fake = FakePage::new();
    message_rows(&fake, &["hi", "there"]);
    let harvester = harvester(&fake, dir.path(), FAST);

    let conversations = vec![
        Conversation::new("Alice", Some("/t/1/".to_string())),
        Conversation::new("Nowhere", None),
        Conversation::new("Bob", Some("https://www.messenger.com/t/2/".to_string())),
    ];
    let stats = harvester.extract_all(&conversations, None).await;

    assert_eq!(
        stats,
        ExtractionStats {
            processed: 3,
            succeeded: 2,
            failed: 1,
            total_messages: 4,
        }
    );
    assert_eq!(
        fake.navigations(),
        [
            "https://www.messenger.com/t/1/",
            "https://www.messenger.com/t/2/"
        ]
    );
    assert!(dir.path().join("Alice").is_dir());
    assert!(dir.path().join("Bob").is_dir());
    assert!(!dir.path().join("Nowhere").exists());
}

#[tokio::test]
async fn test_extract_all_respects_max() {
    let dir = tempfile::tempdir().unwrap();
    let fake = FakePage::new();
    message_rows(&fake, &["hi"]);
    let harvester = harvester(&fake, dir.path(), FAST);

    let conversations: Vec<Conversation> = (0..4)
        .map(|i| Conversation::new(format!("Chat {i}"), Some(format!("/t/{i}/"))))
        .collect();
    let stats = harvester.extract_all(&conversations, Some(2)).await;

    assert_eq!(stats.processed, 2);
    assert_eq!(fake.navigations().len(), 2);
}

#[tokio::test]
async fn test_open_clicks_entry_without_url() {
    let dir = tempfile::tempdir().unwrap();
    let fake = FakePage::new();
    let entry = fake.add(ROOT, "div", &[("role", "listitem")], "Carol");
    let harvester = harvester(&fake, dir.path(), FAST);

    let handle = PageElement::new(fake.page().engine(), FakePage::handle_of(entry));
    let carol = Conversation::new("Carol", None).with_handle(handle);
    harvester.open_conversation(&carol).await.unwrap();

    assert_eq!(fake.clicks(), [entry]);
    assert!(fake.navigations().is_empty());
}

#[tokio::test]
async fn test_slow_navigation_never_reads_previous_conversation() {
    let dir = tempfile::tempdir().unwrap();
    let fake = FakePage::new();
    let previous = message_rows(&fake, &["from Alice"]);
    let next = fake.add_hidden(ROOT, "div", &[("role", "main")], "");
    fill_rows(&fake, next, &["from Bob", "still Bob"]);
    fake.defer_navigation(3, vec![previous], vec![next]);

    let yaml = FAST.replace("wait_timeout: 0", "wait_timeout: 5");
    let harvester = harvester(&fake, dir.path(), &yaml);
    let bob = Conversation::new("Bob", Some("/t/2/".to_string()));
    let messages = harvester.extract_conversation(&bob).await.unwrap();

    let texts: Vec<&str> = messages.iter().filter_map(|m| m.text.as_deref()).collect();
    assert_eq!(texts, ["from Bob", "still Bob"]);
}

#[tokio::test]
async fn test_navigation_that_never_lands_fails_the_conversation() {
    let dir = tempfile::tempdir().unwrap();
    let fake = FakePage::new();
    let previous = message_rows(&fake, &["from Alice"]);
    fake.defer_navigation(usize::MAX, vec![previous], Vec::new());
    let harvester = harvester(&fake, dir.path(), FAST);

    let conversations = vec![Conversation::new("Bob", Some("/t/2/".to_string()))];
    let stats = harvester.extract_all(&conversations, None).await;

    assert_eq!(stats.failed, 1);
    assert_eq!(stats.total_messages, 0);
    assert!(!dir.path().join("Bob").exists());
}

#[tokio::test]
async fn test_session_failure_takes_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let fake = FakePage::new();
    fake.fail_all_queries(true);
    let snapshots = Arc::new(RecordingSnapshots::default());
    let harvester = harvester(&fake, dir.path(), FAST).with_snapshots(snapshots.clone());

    let alice = Conversation::new("Alice", Some("/t/1/".to_string()));
    match harvester.extract_conversation(&alice).await {
        Err(HarvestError::StrategiesExhausted(_)) => {}
        other => panic!("expected exhausted strategies, got {other:?}"),
    }
    assert_eq!(snapshots.events(), ["extraction_failed"]);

    assert!(harvester.list_conversations().await.is_err());
    assert_eq!(
        snapshots.events(),
        ["extraction_failed", "conversation_discovery_failed"]
    );
}

#[tokio::test]
async fn test_run_extraction_applies_scope_and_saves_list() {
    let dir = tempfile::tempdir().unwrap();
    let fake = FakePage::new();
    let nav = fake.add(ROOT, "div", &[("role", "navigation")], "");
    for (href, name) in [("/t/1/", "Alice Smith"), ("/t/2/", "Bob")] {
        let entry = fake.add(nav, "a", &[("role", "link"), ("href", href)], "");
        fake.add(entry, "span", &[("dir", "auto")], name);
    }
    message_rows(&fake, &["hello"]);

    let yaml = format!(
        "{FAST}scope: specific\nspecific_conversations:\n  - name: alice\n"
    );
    let harvester = harvester(&fake, dir.path(), &yaml);
    let stats = harvester.run_extraction(None).await.unwrap();

    assert_eq!(stats.processed, 1);
    assert_eq!(stats.succeeded, 1);
    assert_eq!(fake.navigations(), ["https://www.messenger.com/t/1/"]);

    let lists: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .filter_map(Result::ok)
        .filter(|e| e.file_name().to_string_lossy().starts_with("conversations_"))
        .collect();
    assert_eq!(lists.len(), 1);
    let list: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(lists[0].path()).unwrap()).unwrap();
    assert_eq!(list["total_count"], 1);
    assert_eq!(list["conversations"][0]["name"], "Alice Smith");
}

#[test]
fn test_resolve_url() {
    let base = "https://www.messenger.com/";
    assert_eq!(resolve_url(base, "/t/1/"), "https://www.messenger.com/t/1/");
    assert_eq!(resolve_url(base, "t/1"), "https://www.messenger.com/t/1");
    assert_eq!(
        resolve_url("https://www.facebook.com/messages", "/messages/t/7"),
        "https://www.facebook.com/messages/t/7"
    );
    assert_eq!(resolve_url(base, "https://m.me/x"), "https://m.me/x");
}
