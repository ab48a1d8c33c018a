// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
//! End-to-end tests driving the bridge over HTTP against the mockls
//! binary. Timing knobs are shrunk so the timeout paths complete in
//! milliseconds instead of the production defaults.

use anyhow::{Context, Result};
use serde_json::{Value, json};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use trestle::config::Timing;
use trestle::events::{Dispatcher, Listener};
use trestle::http;
use trestle::lsp::{LspClient, ServerCommand};
use trestle::session::Session;

/// Locate the mockls binary in the same directory as the test executable.
/// During `cargo test`, all binaries are built into the same `target/debug/deps`
/// parent directory.
fn mockls_bin() -> PathBuf {
    let test_exe = std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(Path::to_path_buf))
        .and_then(|p| p.parent().map(Path::to_path_buf))
        .map(|p| p.join("mockls"));
    test_exe.unwrap_or_else(|| PathBuf::from("mockls"))
}

fn test_timing() -> Timing {
    Timing {
        cache_time: Duration::from_secs(60),
        sweep_interval: Duration::from_secs(60),
        request_timeout: Duration::from_millis(500),
        initialize_timeout: Duration::from_millis(500),
        call_timeout: Duration::from_secs(5),
        reopen_delay: Duration::from_millis(30),
    }
}

struct Bridge {
    session: Arc<Session>,
    events: Dispatcher,
    url: String,
}

/// Spawns mockls with the given flags, wires up a session, and serves the
/// HTTP router on an ephemeral port.
async fn start_bridge(mockls_args: &[&str], timing: Timing) -> Result<Bridge> {
    let command = ServerCommand {
        program: mockls_bin().to_string_lossy().into_owned(),
        args: mockls_args.iter().map(ToString::to_string).collect(),
    };

    let (client, inbound) = LspClient::spawn(command, 10)?;
    let events = Dispatcher::new();
    let session = Session::new(client, events.clone(), timing);
    session.run(inbound);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let router = http::router(session.clone());
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });

    Ok(Bridge {
        session,
        events,
        url: format!("http://{addr}"),
    })
}

async fn post(url: &str, method: &str, body: Value) -> Result<(reqwest::StatusCode, Value)> {
    let response = reqwest::Client::new()
        .post(url)
        .json(&json!({ "Method": method, "Body": body }))
        .send()
        .await?;
    let status = response.status();
    let bytes = response.bytes().await?;
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    Ok((status, value))
}

fn php_document(uri: &str) -> Value {
    json!({
        "uri": uri,
        "languageId": "php",
        "version": 1,
        "text": "<?php\nfunction greet() { return strlen('hi'); }\ngreet();\n"
    })
}

#[tokio::test]
async fn test_initialize_happy_path() -> Result<()> {
    let bridge = start_bridge(&[], test_timing()).await?;
    let dir = tempfile::tempdir()?;
    let dir_str = dir.path().to_string_lossy().into_owned();

    let (status, body) = post(&bridge.url, "initialize", json!({ "dir": dir_str })).await?;
    assert_eq!(status, reqwest::StatusCode::OK);
    assert_eq!(body["result"], "ok");
    assert!(body.get("message").is_none());
    assert!(bridge.session.is_initialized().await);

    let (status, body) = post(&bridge.url, "initialize", json!({ "dir": dir_str })).await?;
    assert_eq!(status, reqwest::StatusCode::OK);
    assert_eq!(body["result"], "ok");
    assert_eq!(body["message"], "already initialized");
    Ok(())
}

#[tokio::test]
async fn test_initialize_requires_dir() -> Result<()> {
    let bridge = start_bridge(&[], test_timing()).await?;

    let (status, body) = post(&bridge.url, "initialize", json!({})).await?;
    assert_eq!(status, reqwest::StatusCode::OK);
    assert_eq!(body["result"], "error");
    assert_eq!(body["message"], "empty dir");
    assert!(!bridge.session.is_initialized().await);
    Ok(())
}

#[tokio::test]
async fn test_initialize_timeout_forces_ready() -> Result<()> {
    let bridge = start_bridge(&["--hang-on", "initialize"], test_timing()).await?;

    let (status, body) = post(&bridge.url, "initialize", json!({ "dir": "/p" })).await?;
    assert_eq!(status, reqwest::StatusCode::OK);
    assert_eq!(body["result"], "ok");
    assert!(bridge.session.is_initialized().await);

    let (_, body) = post(&bridge.url, "initialize", json!({ "dir": "/p" })).await?;
    assert_eq!(body["message"], "already initialized");
    Ok(())
}

#[tokio::test]
async fn test_hover_round_trip() -> Result<()> {
    let bridge = start_bridge(&[], test_timing()).await?;
    let uri = "file:///tmp/hover.php";

    post(&bridge.url, "initialize", json!({ "dir": "/p" })).await?;
    post(&bridge.url, "didOpen", php_document(uri)).await?;

    let (status, body) = post(
        &bridge.url,
        "hover",
        json!({
            "textDocument": { "uri": uri },
            "position": { "line": 1, "character": 31 }
        }),
    )
    .await?;

    assert_eq!(status, reqwest::StatusCode::OK);
    assert_eq!(body["result"]["contents"]["kind"], "markdown");
    let value = body["result"]["contents"]["value"].as_str().unwrap_or("");
    assert!(value.contains("strlen"), "expected 'strlen' in {value}");
    Ok(())
}

#[tokio::test]
async fn test_hover_timeout_reports_topic() -> Result<()> {
    let bridge = start_bridge(&["--hang-on", "textDocument/hover"], test_timing()).await?;
    let uri = "file:///tmp/hang.php";

    post(&bridge.url, "initialize", json!({ "dir": "/p" })).await?;
    post(&bridge.url, "didOpen", php_document(uri)).await?;

    let (status, body) = post(
        &bridge.url,
        "hover",
        json!({
            "textDocument": { "uri": uri },
            "position": { "line": 1, "character": 9 }
        }),
    )
    .await?;

    assert_eq!(status, reqwest::StatusCode::OK);
    assert_eq!(body["result"], "error");
    let message = body["message"].as_str().unwrap_or("");
    assert!(
        message.starts_with("request.") && message.ends_with(" timed out"),
        "unexpected message: {message}"
    );
    Ok(())
}

#[tokio::test]
async fn test_completion_round_trip() -> Result<()> {
    let bridge = start_bridge(&[], test_timing()).await?;
    let uri = "file:///tmp/completion.php";

    post(&bridge.url, "initialize", json!({ "dir": "/p" })).await?;
    post(&bridge.url, "didOpen", php_document(uri)).await?;

    let (status, body) = post(
        &bridge.url,
        "completion",
        json!({
            "textDocument": { "uri": uri },
            "position": { "line": 2, "character": 0 },
            "context": { "triggerKind": 1 }
        }),
    )
    .await?;

    assert_eq!(status, reqwest::StatusCode::OK);
    let items = body["result"]["items"].as_array().context("missing items")?;
    assert!(!items.is_empty());
    assert!(items.iter().any(|i| i["label"] == "greet"));
    Ok(())
}

#[tokio::test]
async fn test_definition_round_trip() -> Result<()> {
    let bridge = start_bridge(&[], test_timing()).await?;
    let uri = "file:///tmp/definition.php";

    post(&bridge.url, "initialize", json!({ "dir": "/p" })).await?;
    post(&bridge.url, "didOpen", php_document(uri)).await?;

    let (status, body) = post(
        &bridge.url,
        "definition",
        json!({
            "textDocument": { "uri": uri },
            "position": { "line": 2, "character": 1 }
        }),
    )
    .await?;

    assert_eq!(status, reqwest::StatusCode::OK);
    assert_eq!(body["result"]["uri"], uri);
    assert_eq!(body["result"]["range"]["start"]["line"], 1);
    Ok(())
}

#[tokio::test]
async fn test_did_open_returns_diagnostics() -> Result<()> {
    let bridge = start_bridge(&["--diagnostics-count", "2"], test_timing()).await?;
    let uri = "file:///tmp/diags.php";

    post(&bridge.url, "initialize", json!({ "dir": "/p" })).await?;

    let (status, body) = post(&bridge.url, "didOpen", php_document(uri)).await?;
    assert_eq!(status, reqwest::StatusCode::OK);

    let diagnostics = body["result"].as_array().context("expected diagnostics array")?;
    assert_eq!(diagnostics.len(), 2);
    assert_eq!(diagnostics[0]["source"], "mockls");
    assert_eq!(diagnostics[1]["message"], "mock diagnostic 2");
    Ok(())
}

#[tokio::test]
async fn test_did_open_requires_uri() -> Result<()> {
    let bridge = start_bridge(&[], test_timing()).await?;

    post(&bridge.url, "initialize", json!({ "dir": "/p" })).await?;

    let (status, body) = post(&bridge.url, "didOpen", json!({ "languageId": "php" })).await?;
    assert_eq!(status, reqwest::StatusCode::OK);
    assert_eq!(body["result"], "error");
    assert_eq!(body["message"], "invalid document uri");
    Ok(())
}

#[tokio::test]
async fn test_did_close_is_idempotent() -> Result<()> {
    let bridge = start_bridge(&[], test_timing()).await?;

    post(&bridge.url, "initialize", json!({ "dir": "/p" })).await?;

    // Closing a document that was never opened still forwards and returns ok.
    let (status, body) = post(
        &bridge.url,
        "didClose",
        json!({ "uri": "file:///tmp/never-opened.php" }),
    )
    .await?;
    assert_eq!(status, reqwest::StatusCode::OK);
    assert_eq!(body["result"], "ok");
    assert!(bridge.session.open_documents().await.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_reopen_refreshes_timestamp() -> Result<()> {
    let bridge = start_bridge(&[], test_timing()).await?;
    let uri = "file:///tmp/reopen.php";

    post(&bridge.url, "initialize", json!({ "dir": "/p" })).await?;

    post(&bridge.url, "didOpen", php_document(uri)).await?;
    let first = bridge
        .session
        .opened_at(uri)
        .await
        .context("document not tracked after open")?;

    post(&bridge.url, "didOpen", php_document(uri)).await?;
    let second = bridge
        .session
        .opened_at(uri)
        .await
        .context("document not tracked after re-open")?;

    assert!(second > first, "re-open should refresh the timestamp");
    assert_eq!(bridge.session.open_documents().await.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_idle_sweep_closes_documents() -> Result<()> {
    let mut timing = test_timing();
    timing.cache_time = Duration::from_millis(200);
    timing.sweep_interval = Duration::from_millis(100);

    let bridge = start_bridge(&[], timing).await?;
    let uri = "file:///tmp/idle.php";

    post(&bridge.url, "initialize", json!({ "dir": "/p" })).await?;
    post(&bridge.url, "didOpen", php_document(uri)).await?;
    assert_eq!(bridge.session.open_documents().await.len(), 1);

    tokio::time::sleep(Duration::from_millis(600)).await;
    assert!(
        bridge.session.open_documents().await.is_empty(),
        "idle document should have been reaped"
    );
    Ok(())
}

#[tokio::test]
async fn test_crash_recovery_resets_session() -> Result<()> {
    // mockls exits after its second response: initialize, then hover.
    let bridge = start_bridge(&["--drop-after", "2"], test_timing()).await?;

    post(&bridge.url, "initialize", json!({ "dir": "/p" })).await?;
    assert!(bridge.session.is_initialized().await);

    // The hover response is the crash trigger.
    post(
        &bridge.url,
        "hover",
        json!({
            "textDocument": { "uri": "file:///tmp/x.php" },
            "position": { "line": 0, "character": 0 }
        }),
    )
    .await?;

    // Give the supervisor time to re-spawn and the restart message to land.
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(
        !bridge.session.is_initialized().await,
        "restart should reset the session"
    );
    assert!(bridge.session.open_documents().await.is_empty());

    // The next initialize proceeds as if fresh.
    let (status, body) = post(&bridge.url, "initialize", json!({ "dir": "/p" })).await?;
    assert_eq!(status, reqwest::StatusCode::OK);
    assert_eq!(body["result"], "ok");
    assert!(body.get("message").is_none());
    Ok(())
}

#[tokio::test]
async fn test_unknown_method() -> Result<()> {
    let bridge = start_bridge(&[], test_timing()).await?;

    let (status, body) = post(&bridge.url, "rename", json!({})).await?;
    assert_eq!(status, reqwest::StatusCode::OK);
    assert_eq!(body["result"], "error");
    assert_eq!(body["message"], "unknown method");
    Ok(())
}

#[tokio::test]
async fn test_non_post_is_404() -> Result<()> {
    let bridge = start_bridge(&[], test_timing()).await?;

    let response = reqwest::Client::new().get(&bridge.url).send().await?;
    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn test_malformed_body_is_500() -> Result<()> {
    let bridge = start_bridge(&[], test_timing()).await?;

    let response = reqwest::Client::new()
        .post(&bridge.url)
        .body("not json")
        .send()
        .await?;
    assert_eq!(response.status(), reqwest::StatusCode::INTERNAL_SERVER_ERROR);
    Ok(())
}

#[tokio::test]
async fn test_wall_clock_timeout_is_504() -> Result<()> {
    let mut timing = test_timing();
    timing.call_timeout = Duration::from_millis(300);
    timing.request_timeout = Duration::from_secs(2);

    let bridge = start_bridge(&["--hang-on", "textDocument/hover"], timing).await?;

    post(&bridge.url, "initialize", json!({ "dir": "/p" })).await?;

    let (status, body) = post(
        &bridge.url,
        "hover",
        json!({
            "textDocument": { "uri": "file:///tmp/x.php" },
            "position": { "line": 0, "character": 0 }
        }),
    )
    .await?;

    assert_eq!(status, reqwest::StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(body["result"], "error");
    assert_eq!(body["message"], "time out");
    Ok(())
}

#[tokio::test]
async fn test_configuration_request_answered() -> Result<()> {
    let bridge = start_bridge(&["--send-configuration-request"], test_timing()).await?;

    // mockls acknowledges the configuration reply by publishing
    // diagnostics on a sentinel URI; observing that event proves the full
    // round trip.
    let (tx, mut rx) = mpsc::unbounded_channel();
    let listener: Listener = Arc::new(move |_, payload| {
        let _ = tx.send(payload);
    });
    bridge
        .events
        .once("diagnostics.mockls://configuration", listener);

    post(&bridge.url, "initialize", json!({ "dir": "/p" })).await?;

    let ack = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .context("no configuration acknowledgement")?
        .context("listener dropped")?;
    assert_eq!(ack[0]["message"], "configuration acknowledged");
    Ok(())
}

#[tokio::test]
async fn test_concurrent_requests_get_distinct_ids() -> Result<()> {
    let bridge = start_bridge(&["--hang-on", "textDocument/hover"], test_timing()).await?;

    post(&bridge.url, "initialize", json!({ "dir": "/p" })).await?;

    let params = json!({
        "textDocument": { "uri": "file:///tmp/x.php" },
        "position": { "line": 0, "character": 0 }
    });
    let (first, second) = tokio::join!(
        post(&bridge.url, "hover", params.clone()),
        post(&bridge.url, "hover", params.clone()),
    );

    let (_, first) = first?;
    let (_, second) = second?;
    let first_msg = first["message"].as_str().unwrap_or("");
    let second_msg = second["message"].as_str().unwrap_or("");

    assert!(first_msg.starts_with("request."));
    assert!(second_msg.starts_with("request."));
    assert_ne!(first_msg, second_msg, "each request must get its own id");
    Ok(())
}
