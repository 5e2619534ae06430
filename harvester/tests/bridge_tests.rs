use futures_util::{SinkExt, StreamExt};
use harvester::bridge_engine::decode_reply;
use harvester::{BridgeEngine, ExtensionBridge, HarvestError, Page, PageEngine, Selector};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio_tungstenite::{connect_async, tungstenite::Message};

/// Pretend extension: answers each eval by looking at what the script does
async fn fake_extension(url: String, answer: fn(&str) -> Option<Value>) {
    let (ws, _) = connect_async(url).await.unwrap();
    let (mut sink, mut stream) = ws.split();
    sink.send(Message::Text(
        json!({"type": "hello", "from": "test"}).to_string(),
    ))
    .await
    .unwrap();

    while let Some(Ok(msg)) = stream.next().await {
        let Ok(text) = msg.into_text() else { continue };
        let Ok(request) = serde_json::from_str::<Value>(&text) else {
            continue;
        };
        let id = request["id"].as_str().unwrap_or_default().to_string();
        let code = request["code"].as_str().unwrap_or_default();
        let Some(result) = answer(code) else { continue };
        let reply = json!({"id": id, "ok": true, "result": result, "error": null});
        if sink.send(Message::Text(reply.to_string())).await.is_err() {
            break;
        }
    }
}

fn envelope(value: Value) -> Value {
    Value::String(json!({"success": true, "value": value}).to_string())
}

fn answer_dom(code: &str) -> Option<Value> {
    if code.contains("querySelectorAll") {
        Some(envelope(json!(["h1", "h2"])))
    } else if code.contains("innerText") {
        Some(envelope(json!("Hello from the tab")))
    } else if code.contains("getAttribute") {
        Some(Value::String(
            json!({"success": false, "code": "STALE", "message": "element h2 is detached"})
                .to_string(),
        ))
    } else {
        Some(envelope(Value::Null))
    }
}

async fn connected_page(answer: fn(&str) -> Option<Value>, script_timeout: Duration) -> (Arc<ExtensionBridge>, Page) {
    let bridge = ExtensionBridge::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", bridge.local_addr());
    tokio::spawn(fake_extension(url, answer));
    assert!(bridge.wait_for_client(Duration::from_secs(5)).await);

    let engine = BridgeEngine::new(bridge.clone())
        .with_script_timeout(script_timeout)
        .with_connect_timeout(Duration::from_secs(5));
    (bridge, Page::new(Arc::new(engine)))
}

#[tokio::test]
async fn test_queries_and_reads_through_the_extension() {
    let (_bridge, page) = connected_page(answer_dom, Duration::from_secs(5)).await;

    let elements = page.locator("div[role='row']").all().await.unwrap();
    assert_eq!(elements.len(), 2);
    assert_eq!(elements[0].text().await.unwrap(), "Hello from the tab");

    match elements[1].attribute("aria-label").await {
        Err(HarvestError::ElementDetached(message)) => assert!(message.contains("h2")),
        other => panic!("expected a detached element, got {other:?}"),
    }
}

#[tokio::test]
async fn test_invalid_selector_never_reaches_the_extension() {
    let (_bridge, page) = connected_page(|_| None, Duration::from_millis(200)).await;
    let engine = page.engine();

    match engine.query_all(&Selector::from("div[role="), None).await {
        Err(HarvestError::InvalidSelector(_)) => {}
        other => panic!("expected an invalid selector, got {other:?}"),
    }
}

#[tokio::test]
async fn test_unanswered_script_times_out() {
    let (_bridge, page) = connected_page(|_| None, Duration::from_millis(100)).await;

    match page.title().await {
        Err(HarvestError::Timeout(_)) => {}
        other => panic!("expected a timeout, got {other:?}"),
    }
}

#[tokio::test]
async fn test_without_extension_is_not_connected() {
    let bridge = ExtensionBridge::bind("127.0.0.1:0").await.unwrap();
    assert!(!bridge.is_client_connected().await);

    let engine = BridgeEngine::new(bridge).with_connect_timeout(Duration::from_millis(10));
    let page = Page::new(Arc::new(engine));
    match page.locator("a").all().await {
        Err(HarvestError::NotConnected(_)) => {}
        other => panic!("expected not connected, got {other:?}"),
    }
}

#[tokio::test]
async fn test_disconnect_fails_in_flight_eval() {
    let bridge = ExtensionBridge::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", bridge.local_addr());
    // reads one request, then hangs up without replying
    tokio::spawn(async move {
        let (mut ws, _) = connect_async(url).await.unwrap();
        let _ = ws.next().await;
        let _ = ws.close(None).await;
    });
    assert!(bridge.wait_for_client(Duration::from_secs(5)).await);

    match bridge.eval_in_active_tab("document.title", Duration::from_secs(5)).await {
        Err(HarvestError::NotConnected(_)) => {}
        other => panic!("expected not connected, got {other:?}"),
    }
}

fn answer_pruned_query(code: &str) -> Option<Value> {
    if code.contains("(pruneDetached(), Array.from(") {
        Some(envelope(json!(["h7"])))
    } else {
        Some(Value::String(
            json!({"success": false, "message": "query without pruning"}).to_string(),
        ))
    }
}

#[tokio::test]
async fn test_queries_drop_detached_handles_first() {
    let (_bridge, page) = connected_page(answer_pruned_query, Duration::from_secs(5)).await;

    let elements = page.locator("li").all().await.unwrap();
    assert_eq!(elements.len(), 1);
}

fn answer_navigation(code: &str) -> Option<Value> {
    if code.contains("document.readyState") {
        Some(envelope(
            json!({"href": "https://www.messenger.com/t/2/", "ready": "complete"}),
        ))
    } else if code.contains("window.location.href") {
        Some(envelope(json!("https://www.messenger.com/t/1/")))
    } else {
        Some(envelope(Value::Null))
    }
}

fn answer_still_loading(code: &str) -> Option<Value> {
    if code.contains("document.readyState") {
        Some(envelope(
            json!({"href": "https://www.messenger.com/t/2/", "ready": "loading"}),
        ))
    } else if code.contains("window.location.href") {
        Some(envelope(json!("https://www.messenger.com/t/1/")))
    } else {
        Some(envelope(Value::Null))
    }
}

async fn navigating_engine(answer: fn(&str) -> Option<Value>) -> (Arc<ExtensionBridge>, BridgeEngine) {
    let bridge = ExtensionBridge::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", bridge.local_addr());
    tokio::spawn(fake_extension(url, answer));
    assert!(bridge.wait_for_client(Duration::from_secs(5)).await);

    let engine = BridgeEngine::new(bridge.clone())
        .with_script_timeout(Duration::from_secs(5))
        .with_navigation_timeout(Duration::from_millis(500));
    (bridge, engine)
}

#[tokio::test]
async fn test_navigate_returns_once_the_new_document_loaded() {
    let (_bridge, engine) = navigating_engine(answer_navigation).await;
    engine
        .navigate("https://www.messenger.com/t/2/")
        .await
        .unwrap();
}

#[tokio::test]
async fn test_navigate_times_out_while_the_document_loads() {
    let (_bridge, engine) = navigating_engine(answer_still_loading).await;
    match engine.navigate("https://www.messenger.com/t/2/").await {
        Err(HarvestError::Timeout(message)) => assert!(message.contains("/t/2/")),
        other => panic!("expected a timeout, got {other:?}"),
    }
}

#[test]
fn test_decode_reply_envelopes() {
    assert_eq!(decode_reply(envelope(json!([1, 2]))).unwrap(), json!([1, 2]));
    assert_eq!(decode_reply(Value::Null).unwrap(), Value::Null);
    assert_eq!(
        decode_reply(json!("plain text")).unwrap(),
        json!("plain text")
    );

    match decode_reply(json!("ERROR: {\"message\":\"boom\"}")) {
        Err(HarvestError::PlatformError(message)) => assert!(message.contains("boom")),
        other => panic!("expected a platform error, got {other:?}"),
    }
    match decode_reply(json!("{\"status\":\"failed\",\"error\":\"no tab\"}")) {
        Err(HarvestError::PlatformError(message)) => assert!(message.contains("no tab")),
        other => panic!("expected a platform error, got {other:?}"),
    }
    match decode_reply(json!("{\"success\":false,\"code\":\"STALE\",\"message\":\"gone\"}")) {
        Err(HarvestError::ElementDetached(message)) => assert_eq!(message, "gone"),
        other => panic!("expected a detached element, got {other:?}"),
    }
}
