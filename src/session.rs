// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Session management: the conversation with one language server child,
//! from spawn to exit.
//!
//! The session tracks initialization state and open documents, translates
//! the HTTP method vocabulary into LSP traffic, answers server-originated
//! `workspace/configuration` requests, and periodically closes documents
//! that have sat idle past the cache horizon.

use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, mpsc, oneshot};
use tracing::{debug, trace, warn};

use crate::config::Timing;
use crate::events::{Dispatcher, Listener};
use crate::lsp::{Inbound, LspClient};
use crate::settings;

#[derive(Default)]
struct State {
    initialized: bool,
    open_files: HashMap<String, Instant>,
    request_id: i64,
}

/// The live session with a single language server instance.
///
/// `request_id` allocation and the subsequent write happen under the
/// session lock so the wire order matches id order.
pub struct Session {
    client: LspClient,
    events: Dispatcher,
    timing: Timing,
    state: Mutex<State>,
}

impl Session {
    /// Creates a session around a spawned client. Call [`Self::run`] to
    /// start consuming inbound messages.
    #[must_use]
    pub fn new(client: LspClient, events: Dispatcher, timing: Timing) -> Arc<Self> {
        Arc::new(Self {
            client,
            events,
            timing,
            state: Mutex::new(State {
                request_id: 1,
                ..State::default()
            }),
        })
    }

    /// Timing knobs in effect for this session.
    #[must_use]
    pub fn timing(&self) -> &Timing {
        &self.timing
    }

    /// Whether the initialize handshake has completed (or been forced).
    pub async fn is_initialized(&self) -> bool {
        self.state.lock().await.initialized
    }

    /// URIs currently considered open.
    pub async fn open_documents(&self) -> Vec<String> {
        self.state.lock().await.open_files.keys().cloned().collect()
    }

    /// When a document was last opened, if it is open.
    pub async fn opened_at(&self, uri: &str) -> Option<Instant> {
        self.state.lock().await.open_files.get(uri).copied()
    }

    /// Starts the dispatch loop. The receiver must be the one returned by
    /// [`LspClient::spawn`]; it is the single consumer of the inbound
    /// channel.
    pub fn run(self: &Arc<Self>, rx: mpsc::Receiver<Inbound>) -> tokio::task::JoinHandle<()> {
        self.arm_initialize_listener();
        let session = Arc::clone(self);
        tokio::spawn(session.dispatch(rx))
    }

    /// One-shot listener on the initial `initialize` response: announce
    /// readiness to the server, then wake local waiters.
    fn arm_initialize_listener(self: &Arc<Self>) {
        self.events.remove_all_listeners("request.1");

        let session = Arc::clone(self);
        let listener: Listener = Arc::new(move |_, _| {
            let session = Arc::clone(&session);
            tokio::spawn(async move {
                session.announce_ready().await;
                session.events.emit("initialized", Value::Null);
            });
        });
        self.events.once("request.1", listener);
    }

    async fn announce_ready(&self) {
        if let Err(e) = self.client.notification("initialized", json!({})).await {
            warn!("failed to send initialized notification: {e}");
        }
        let params = json!({ "settings": settings::configuration() });
        if let Err(e) = self
            .client
            .notification("workspace/didChangeConfiguration", params)
            .await
        {
            warn!("failed to send configuration notification: {e}");
        }
    }

    async fn dispatch(self: Arc<Self>, mut rx: mpsc::Receiver<Inbound>) {
        let mut sweep = tokio::time::interval(self.timing.sweep_interval);

        loop {
            tokio::select! {
                message = rx.recv() => match message {
                    Some(message) => self.handle_inbound(message).await,
                    None => break,
                },
                _ = sweep.tick() => self.clean_open_files().await,
            }
        }

        debug!("dispatch loop finished");
    }

    async fn handle_inbound(self: &Arc<Self>, message: Inbound) {
        match message.method.as_deref() {
            Some("restart") => {
                warn!("language server restarted, resetting session state");
                {
                    let mut state = self.state.lock().await;
                    state.initialized = false;
                    state.open_files.clear();
                }
                self.arm_initialize_listener();
            }
            Some("client/registerCapability") => {
                // Acknowledge; the bridge has no dynamic capabilities to track.
                if let Err(e) = self
                    .client
                    .notification("client/registerCapability", json!({}))
                    .await
                {
                    warn!("failed to acknowledge registerCapability: {e}");
                }
            }
            Some("textDocument/publishDiagnostics") => {
                let uri = message
                    .params
                    .get("uri")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                let diagnostics = message
                    .params
                    .get("diagnostics")
                    .cloned()
                    .unwrap_or_else(|| json!([]));
                self.events.emit(&format!("diagnostics.{uri}"), diagnostics);
            }
            Some("workspace/configuration") => {
                // The server asks for configuration per requested item; the
                // editor historically sends two scopes, so answer with two
                // copies of the settings object.
                let settings = settings::configuration();
                let result = json!([settings.clone(), settings]);
                if let Err(e) = self
                    .client
                    .reply(message.id.unwrap_or(0), "workspace/configuration", result)
                    .await
                {
                    warn!("failed to answer configuration request: {e}");
                }
            }
            _ => {
                let id = message.id.unwrap_or(0);
                trace!("correlating response for request.{id}");
                self.events.emit(&format!("request.{id}"), message.result);
            }
        }
    }

    /// Dispatches one HTTP method call. `None` means the call intentionally
    /// produced no result (HTTP 204).
    pub async fn process_request(&self, method: &str, body: Value) -> Option<Value> {
        trace!("{method}: {body}");
        match method {
            "initialize" => Some(self.initialize(body).await),
            "didOpen" => Some(self.did_open(body).await),
            "didClose" => Some(self.did_close(body).await),
            "hover" => Some(self.relay("textDocument/hover", body).await),
            "completion" => Some(self.relay("textDocument/completion", body).await),
            "definition" => Some(self.relay("textDocument/definition", body).await),
            _ => Some(error_result("unknown method")),
        }
    }

    async fn initialize(&self, body: Value) -> Value {
        let state = self.state.lock().await;
        if state.initialized {
            return json!({ "result": "ok", "message": "already initialized" });
        }

        let dir = body.get("dir").and_then(Value::as_str).unwrap_or_default();
        if dir.is_empty() {
            return error_result("empty dir");
        }
        let storage = body
            .get("storage")
            .and_then(Value::as_str)
            .unwrap_or("/tmp/intelephense/");
        let name = body
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or("phpProject");
        let license = body.get("license").and_then(Value::as_str);

        // Subscribe before the request goes out so the response cannot win
        // the race against registration.
        let rx = self.subscribe_once("initialized");

        let params = settings::initialize_params(dir, storage, name, license);
        if let Err(e) = self.client.request(1, "initialize", params).await {
            self.events.remove_all_listeners("initialized");
            return error_result(&e.to_string());
        }
        drop(state);

        match tokio::time::timeout(self.timing.initialize_timeout, rx).await {
            Ok(Ok(_)) => {
                self.state.lock().await.initialized = true;
                ok_result()
            }
            _ => {
                // The server never confirmed; force the session ready and
                // flush the post-initialize notifications ourselves.
                self.events.remove_all_listeners("initialized");
                self.state.lock().await.initialized = true;
                self.announce_ready().await;
                ok_result()
            }
        }
    }

    async fn did_open(&self, body: Value) -> Value {
        let uri = body
            .get("uri")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        if uri.is_empty() {
            return error_result("invalid document uri");
        }

        let mut state = self.state.lock().await;

        if state.open_files.contains_key(&uri) {
            // Close the stale copy and give the server a moment to settle
            // before re-opening.
            let params = json!({ "textDocument": { "uri": uri } });
            if let Err(e) = self
                .client
                .notification("textDocument/didClose", params)
                .await
            {
                warn!("failed to close {uri} before re-open: {e}");
            }
            tokio::time::sleep(self.timing.reopen_delay).await;
        }

        state.open_files.insert(uri.clone(), Instant::now());

        let topic = format!("diagnostics.{uri}");
        let rx = self.subscribe_once(&topic);

        if let Err(e) = self
            .client
            .notification("textDocument/didOpen", json!({ "textDocument": body }))
            .await
        {
            self.events.remove_all_listeners(&topic);
            return error_result(&e.to_string());
        }

        // Fire-and-forget symbol request primes the server's index for the
        // document; nobody waits on request.<id>.
        state.request_id += 1;
        let id = state.request_id;
        let params = json!({ "textDocument": { "uri": uri } });
        if let Err(e) = self
            .client
            .request(id, "textDocument/documentSymbol", params)
            .await
        {
            warn!("documentSymbol request failed: {e}");
        }
        drop(state);

        self.await_topic(topic, rx).await
    }

    async fn did_close(&self, body: Value) -> Value {
        let uri = body
            .get("uri")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        if uri.is_empty() {
            return error_result("invalid document uri");
        }

        let mut state = self.state.lock().await;

        // Forwarded even when the document is not tracked; closing an
        // unopened document is a server-side no-op.
        if let Err(e) = self
            .client
            .notification("textDocument/didClose", json!({ "textDocument": body }))
            .await
        {
            return error_result(&e.to_string());
        }
        state.open_files.remove(&uri);

        ok_result()
    }

    /// Forwards a position-style request and waits for the correlated
    /// response.
    async fn relay(&self, method: &str, params: Value) -> Value {
        let (topic, rx) = {
            let mut state = self.state.lock().await;
            state.request_id += 1;
            let id = state.request_id;

            let topic = format!("request.{id}");
            let rx = self.subscribe_once(&topic);

            if let Err(e) = self.client.request(id, method, params).await {
                self.events.remove_all_listeners(&topic);
                return error_result(&e.to_string());
            }
            (topic, rx)
        };

        self.await_topic(topic, rx).await
    }

    /// Registers a one-shot listener delivering the topic's payload into a
    /// oneshot channel. The sender slot guarantees at most one delivery.
    fn subscribe_once(&self, topic: &str) -> oneshot::Receiver<Value> {
        let (tx, rx) = oneshot::channel();
        let slot = std::sync::Mutex::new(Some(tx));

        let listener: Listener = Arc::new(move |_, payload| {
            let sender = slot
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .take();
            if let Some(sender) = sender {
                let _ = sender.send(payload);
            }
        });
        self.events.once(topic, listener);
        rx
    }

    /// Waits for the topic payload, bounded by the per-request timeout. On
    /// timeout the topic's listeners are removed so nothing leaks.
    async fn await_topic(&self, topic: String, rx: oneshot::Receiver<Value>) -> Value {
        match tokio::time::timeout(self.timing.request_timeout, rx).await {
            Ok(Ok(payload)) => json!({ "result": payload }),
            _ => {
                self.events.remove_all_listeners(&topic);
                error_result(&format!("{topic} timed out"))
            }
        }
    }

    /// Closes documents that have been open longer than the cache horizon.
    async fn clean_open_files(&self) {
        let mut state = self.state.lock().await;

        let stale: Vec<String> = state
            .open_files
            .iter()
            .filter(|(_, opened)| opened.elapsed() >= self.timing.cache_time)
            .map(|(uri, _)| uri.clone())
            .collect();

        for uri in stale {
            debug!("closing idle document {uri}");
            let params = json!({ "textDocument": { "uri": uri } });
            if let Err(e) = self
                .client
                .notification("textDocument/didClose", params)
                .await
            {
                warn!("failed to close idle document {uri}: {e}");
            }
            state.open_files.remove(&uri);
        }
    }
}

fn ok_result() -> Value {
    json!({ "result": "ok" })
}

fn error_result(message: &str) -> Value {
    json!({ "result": "error", "message": message })
}
