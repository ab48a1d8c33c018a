// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! A configurable mock PHP language server for testing the bridge.
//!
//! Speaks Content-Length framed JSON-RPC over stdin/stdout. CLI flags
//! control timing and failure modes: hanging on selected methods,
//! suppressing or multiplying diagnostics, crashing after a number of
//! responses, and requesting `workspace/configuration` from the client.
//! No tokio — uses `std::thread` for deferred notifications.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use clap::Parser;
use serde_json::{Value, json};

/// Mock PHP language server for integration testing.
#[derive(Parser, Debug)]
#[command(name = "mockls")]
struct Args {
    /// Never respond to this method (repeatable).
    #[arg(long)]
    hang_on: Vec<String>,

    /// Sleep before every response (milliseconds).
    #[arg(long, default_value_t = 0)]
    response_delay: u64,

    /// Delay before publishing diagnostics (milliseconds).
    #[arg(long, default_value_t = 0)]
    diagnostics_delay: u64,

    /// Number of diagnostics published per didOpen.
    #[arg(long, default_value_t = 1)]
    diagnostics_count: u64,

    /// Never publish diagnostics.
    #[arg(long)]
    no_diagnostics: bool,

    /// Exit with status 1 after n responses (simulate crash).
    #[arg(long)]
    drop_after: Option<u64>,

    /// Send a workspace/configuration request after initialize. The reply
    /// is acknowledged by publishing diagnostics on `mockls://configuration`.
    #[arg(long)]
    send_configuration_request: bool,
}

/// Thread-safe writer handle. Wraps `std::io::Stdout` for production,
/// or a shared `Vec<u8>` for tests.
type Writer = Arc<Mutex<Box<dyn Write + Send>>>;

fn stdout_writer() -> Writer {
    Arc::new(Mutex::new(Box::new(std::io::stdout())))
}

#[cfg(test)]
fn buffer_writer() -> (Writer, Arc<Mutex<Vec<u8>>>) {
    let buf = Arc::new(Mutex::new(Vec::<u8>::new()));
    let writer: Box<dyn Write + Send> = Box::new(SharedVecWriter(buf.clone()));
    (Arc::new(Mutex::new(writer)), buf)
}

/// Write adapter for `Arc<Mutex<Vec<u8>>>` used in tests.
#[cfg(test)]
struct SharedVecWriter(Arc<Mutex<Vec<u8>>>);

#[cfg(test)]
impl Write for SharedVecWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0
            .lock()
            .map_err(|e| std::io::Error::other(e.to_string()))?
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

struct MockServer {
    args: Args,
    documents: HashMap<String, String>,
    response_count: u64,
    writer: Writer,
    next_request_id: Arc<AtomicU64>,
    pending_configuration_id: Option<u64>,
}

impl MockServer {
    fn new(args: Args, writer: Writer) -> Self {
        Self {
            args,
            documents: HashMap::new(),
            response_count: 0,
            writer,
            next_request_id: Arc::new(AtomicU64::new(100)),
            pending_configuration_id: None,
        }
    }

    /// Run the server, reading from the given reader.
    fn run(&mut self, reader: &mut dyn Read) {
        let mut buffer = Vec::new();
        let mut temp = [0u8; 4096];

        loop {
            match reader.read(&mut temp) {
                Ok(0) | Err(_) => break,
                Ok(n) => buffer.extend_from_slice(&temp[..n]),
            }

            while let Some((message, consumed)) = try_parse_message(&buffer) {
                buffer.drain(..consumed);

                let Ok(value) = serde_json::from_str::<Value>(&message) else {
                    continue;
                };

                self.handle_message(&value);
            }
        }
    }

    fn handle_message(&mut self, value: &Value) {
        // A reply to one of our own requests carries a result and no params.
        if value.get("result").is_some() {
            self.handle_client_reply(value);
            return;
        }

        let Some(method) = value.get("method").and_then(Value::as_str) else {
            return;
        };
        let method = method.to_string();
        let params = value.get("params").cloned().unwrap_or(Value::Null);

        if let Some(id) = value.get("id").cloned() {
            self.handle_request(&method, id, &params);
        } else {
            self.handle_notification(&method, &params);
        }
    }

    fn handle_client_reply(&mut self, value: &Value) {
        let id = value.get("id").and_then(Value::as_u64);
        if id.is_some() && id == self.pending_configuration_id {
            self.pending_configuration_id = None;
            send_diagnostics(
                &self.writer,
                "mockls://configuration",
                &[json!({
                    "range": zero_range(),
                    "severity": 3,
                    "source": "mockls",
                    "message": "configuration acknowledged"
                })],
            );
        }
    }

    fn handle_request(&mut self, method: &str, id: Value, params: &Value) {
        // Check hang_on — never respond
        if self.args.hang_on.iter().any(|m| m == method) {
            return;
        }

        if self.args.response_delay > 0 {
            std::thread::sleep(Duration::from_millis(self.args.response_delay));
        }

        let result = match method {
            "initialize" => json!({
                "capabilities": {
                    "hoverProvider": true,
                    "definitionProvider": true,
                    "completionProvider": {
                        "triggerCharacters": ["$", ">", ":"]
                    },
                    "documentSymbolProvider": true,
                    "textDocumentSync": {
                        "openClose": true,
                        "change": 1
                    }
                }
            }),
            "shutdown" => Value::Null,
            "textDocument/hover" => self.handle_hover(params),
            "textDocument/definition" => self.handle_definition(params),
            "textDocument/completion" => self.handle_completion(params),
            "textDocument/documentSymbol" => json!([]),
            _ => {
                self.send_response(&json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "error": {
                        "code": -32601,
                        "message": format!("mockls: method not found: {method}")
                    }
                }));
                return;
            }
        };

        self.send_response(&json!({
            "jsonrpc": "2.0",
            "id": id,
            "result": result
        }));

        if method == "initialize" && self.args.send_configuration_request {
            self.send_configuration_request();
        }
    }

    fn handle_notification(&mut self, method: &str, params: &Value) {
        match method {
            "textDocument/didOpen" => {
                if let Some(td) = params.get("textDocument") {
                    let uri = td.get("uri").and_then(Value::as_str).unwrap_or_default();
                    let text = td.get("text").and_then(Value::as_str).unwrap_or_default();
                    self.documents.insert(uri.to_string(), text.to_string());

                    if !self.args.no_diagnostics {
                        self.publish_diagnostics(uri);
                    }
                }
            }
            "textDocument/didClose" => {
                if let Some(td) = params.get("textDocument") {
                    let uri = td.get("uri").and_then(Value::as_str).unwrap_or_default();
                    self.documents.remove(uri);
                }
            }
            "exit" => {
                std::process::exit(0);
            }
            // initialized, workspace/didChangeConfiguration, and all
            // others are silently accepted
            _ => {}
        }
    }

    fn handle_hover(&self, params: &Value) -> Value {
        let Some((uri, line, col)) = extract_position(params) else {
            return Value::Null;
        };
        let Some(content) = self.documents.get(uri) else {
            return Value::Null;
        };
        let Some(word) = extract_word(content, line, col) else {
            return Value::Null;
        };

        json!({
            "contents": {
                "kind": "markdown",
                "value": format!("```php\n{word}\n```")
            }
        })
    }

    fn handle_definition(&self, params: &Value) -> Value {
        let Some((uri, line, col)) = extract_position(params) else {
            return Value::Null;
        };
        let Some(content) = self.documents.get(uri) else {
            return Value::Null;
        };
        let Some(word) = extract_word(content, line, col) else {
            return Value::Null;
        };

        let needle = format!("function {word}");
        for (line_idx, line_text) in content.lines().enumerate() {
            if let Some(col_idx) = line_text.find(needle.as_str()) {
                return location_json(uri, line_idx, col_idx, col_idx + needle.len());
            }
        }

        // Fall back to first occurrence
        for (line_idx, line_text) in content.lines().enumerate() {
            if let Some(col_idx) = line_text.find(&word) {
                return location_json(uri, line_idx, col_idx, col_idx + word.len());
            }
        }

        Value::Null
    }

    fn handle_completion(&self, params: &Value) -> Value {
        let Some((uri, _, _)) = extract_position(params) else {
            return Value::Null;
        };
        let Some(content) = self.documents.get(uri) else {
            return Value::Null;
        };

        let mut seen = Vec::new();
        for line in content.lines() {
            for word in line.split(|c: char| !c.is_alphanumeric() && c != '_') {
                if word.len() > 2 && !seen.iter().any(|s| s == word) {
                    seen.push(word.to_string());
                }
            }
        }
        seen.truncate(20);

        let items: Vec<Value> = seen
            .into_iter()
            .map(|label| json!({ "label": label, "kind": 6 }))
            .collect();

        json!({ "isIncomplete": false, "items": items })
    }

    fn publish_diagnostics(&self, uri: &str) {
        let count = self.args.diagnostics_count;
        let delay = self.args.diagnostics_delay;
        let uri_owned = uri.to_string();
        let writer = self.writer.clone();

        let publish = move || {
            let diagnostics: Vec<Value> = (0..count)
                .map(|i| {
                    json!({
                        "range": {
                            "start": { "line": i, "character": 0 },
                            "end": { "line": i, "character": 1 }
                        },
                        "severity": 2,
                        "source": "mockls",
                        "message": format!("mock diagnostic {}", i + 1)
                    })
                })
                .collect();
            send_diagnostics(&writer, &uri_owned, &diagnostics);
        };

        if delay > 0 {
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(delay));
                publish();
            });
        } else {
            publish();
        }
    }

    fn send_configuration_request(&mut self) {
        let req_id = self.next_request_id.fetch_add(1, Ordering::SeqCst);
        self.pending_configuration_id = Some(req_id);
        send_message(
            &self.writer,
            &json!({
                "jsonrpc": "2.0",
                "id": req_id,
                "method": "workspace/configuration",
                "params": {
                    "items": [
                        { "section": "intelephense" },
                        { "section": "intelephense" }
                    ]
                }
            }),
        );
    }

    fn send_response(&mut self, response: &Value) {
        send_message(&self.writer, response);
        self.response_count += 1;

        if let Some(max) = self.args.drop_after
            && self.response_count >= max
        {
            std::process::exit(1);
        }
    }
}

/// Extract `(uri, line, col)` from a `textDocument/position` params object.
fn extract_position(params: &Value) -> Option<(&str, usize, usize)> {
    let uri = params
        .get("textDocument")
        .and_then(|td| td.get("uri"))
        .and_then(Value::as_str)?;
    let line = usize::try_from(
        params
            .get("position")
            .and_then(|p| p.get("line"))
            .and_then(Value::as_u64)?,
    )
    .ok()?;
    let col = usize::try_from(
        params
            .get("position")
            .and_then(|p| p.get("character"))
            .and_then(Value::as_u64)?,
    )
    .ok()?;
    Some((uri, line, col))
}

/// Build a JSON `Location` object.
fn location_json(uri: &str, line: usize, start: usize, end: usize) -> Value {
    json!({
        "uri": uri,
        "range": {
            "start": { "line": line, "character": start },
            "end": { "line": line, "character": end }
        }
    })
}

fn zero_range() -> Value {
    json!({
        "start": { "line": 0, "character": 0 },
        "end": { "line": 0, "character": 1 }
    })
}

/// Write a Content-Length framed JSON string.
fn write_framed(writer: &Writer, json: &str) {
    let header = format!("Content-Length: {}\r\n\r\n", json.len());
    let Ok(mut w) = writer.lock() else { return };
    let _ = w.write_all(header.as_bytes());
    let _ = w.write_all(json.as_bytes());
    let _ = w.flush();
}

/// Send a JSON-RPC message to the client.
fn send_message(writer: &Writer, value: &Value) {
    let Ok(json) = serde_json::to_string(value) else {
        return;
    };
    write_framed(writer, &json);
}

/// Send a `publishDiagnostics` notification.
fn send_diagnostics(writer: &Writer, uri: &str, diagnostics: &[Value]) {
    send_message(
        writer,
        &json!({
            "jsonrpc": "2.0",
            "method": "textDocument/publishDiagnostics",
            "params": {
                "uri": uri,
                "diagnostics": diagnostics
            }
        }),
    );
}

/// Parse a Content-Length framed message from a buffer.
/// Returns the message string and the number of bytes consumed.
fn try_parse_message(buffer: &[u8]) -> Option<(String, usize)> {
    let header_end = buffer.windows(4).position(|w| w == b"\r\n\r\n")?;
    let headers = std::str::from_utf8(&buffer[..header_end]).ok()?;

    let mut content_length: Option<usize> = None;
    for line in headers.lines() {
        if line.to_ascii_lowercase().starts_with("content-length:") {
            content_length = line
                .split_once(':')
                .and_then(|(_, v)| v.trim().parse().ok());
        }
    }

    let content_length = content_length?;
    let total = header_end + 4 + content_length;

    if buffer.len() < total {
        return None;
    }

    let body = std::str::from_utf8(&buffer[header_end + 4..total]).ok()?;
    Some((body.to_string(), total))
}

/// Extract the word at a given line and column from content.
fn extract_word(content: &str, line: usize, col: usize) -> Option<String> {
    let line_text = content.lines().nth(line)?;

    if col >= line_text.len() {
        return None;
    }

    let bytes = line_text.as_bytes();

    let start = (0..=col)
        .rev()
        .find(|&i| !is_word_char(bytes[i]))
        .map_or(0, |i| i + 1);

    let end = (col..bytes.len())
        .find(|&i| !is_word_char(bytes[i]))
        .unwrap_or(bytes.len());

    if start >= end {
        return None;
    }

    Some(line_text[start..end].to_string())
}

const fn is_word_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

fn main() {
    let args = Args::parse();
    let writer = stdout_writer();
    let mut server = MockServer::new(args, writer);
    let mut stdin = std::io::stdin().lock();
    server.run(&mut stdin);
}

#[cfg(test)]
#[allow(
    clippy::expect_used,
    clippy::unwrap_used,
    reason = "Tests use expect/unwrap for clear failure messages"
)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn default_args() -> Args {
        Args {
            hang_on: vec![],
            response_delay: 0,
            diagnostics_delay: 0,
            diagnostics_count: 1,
            no_diagnostics: false,
            drop_after: None,
            send_configuration_request: false,
        }
    }

    fn frame(body: &str) -> Vec<u8> {
        format!("Content-Length: {}\r\n\r\n{}", body.len(), body).into_bytes()
    }

    fn extract_messages(data: &[u8]) -> Vec<Value> {
        let mut messages = Vec::new();
        let mut buf = data.to_vec();
        while let Some((msg, consumed)) = try_parse_message(&buf) {
            if let Ok(v) = serde_json::from_str::<Value>(&msg) {
                messages.push(v);
            }
            buf.drain(..consumed);
        }
        messages
    }

    fn run_server_with(args: Args, input: &[u8]) -> Vec<Value> {
        let (writer, buf) = buffer_writer();
        let mut server = MockServer::new(args, writer);
        let mut reader = Cursor::new(input.to_vec());
        server.run(&mut reader);
        let data = buf
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        extract_messages(&data)
    }

    fn initialize_request(id: u64) -> String {
        json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": "initialize",
            "params": {
                "processId": null,
                "capabilities": {},
                "rootUri": "file:///tmp/project"
            }
        })
        .to_string()
    }

    fn did_open_notification(uri: &str, text: &str) -> String {
        json!({
            "jsonrpc": "2.0",
            "method": "textDocument/didOpen",
            "params": {
                "textDocument": {
                    "uri": uri,
                    "languageId": "php",
                    "version": 1,
                    "text": text
                }
            }
        })
        .to_string()
    }

    fn hover_request(id: u64, uri: &str, line: u64, character: u64) -> String {
        json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": "textDocument/hover",
            "params": {
                "textDocument": { "uri": uri },
                "position": { "line": line, "character": character }
            }
        })
        .to_string()
    }

    #[test]
    fn test_initialize_response_valid() {
        let input = frame(&initialize_request(1));
        let messages = run_server_with(default_args(), &input);

        assert!(!messages.is_empty(), "Expected at least one response");
        let resp = &messages[0];
        assert_eq!(resp["id"], 1);
        let caps = &resp["result"]["capabilities"];
        assert_eq!(caps["hoverProvider"], true);
        assert_eq!(caps["definitionProvider"], true);
        assert!(caps["completionProvider"].is_object());
    }

    #[test]
    fn test_hover_echoes_word() {
        let uri = "file:///tmp/a.php";
        let text = "<?php\necho strlen($x);\n";

        let mut input = frame(&initialize_request(1));
        input.extend(frame(&did_open_notification(uri, text)));
        input.extend(frame(&hover_request(2, uri, 1, 6)));

        let messages = run_server_with(default_args(), &input);

        let hover = messages
            .iter()
            .find(|m| m.get("id").and_then(Value::as_u64) == Some(2))
            .expect("hover response with id=2");
        let value = hover["result"]["contents"]["value"].as_str().unwrap_or("");
        assert!(value.contains("strlen"), "Expected 'strlen' in {value}");
    }

    #[test]
    fn test_did_open_publishes_diagnostics() {
        let uri = "file:///tmp/a.php";
        let mut args = default_args();
        args.diagnostics_count = 2;

        let mut input = frame(&initialize_request(1));
        input.extend(frame(&did_open_notification(uri, "<?php\n")));

        let messages = run_server_with(args, &input);

        let diag = messages
            .iter()
            .find(|m| {
                m.get("method").and_then(Value::as_str) == Some("textDocument/publishDiagnostics")
            })
            .expect("publishDiagnostics notification");

        assert_eq!(diag["params"]["uri"], uri);
        assert_eq!(
            diag["params"]["diagnostics"].as_array().map(Vec::len),
            Some(2)
        );
    }

    #[test]
    fn test_hang_on_suppresses_response() {
        let mut args = default_args();
        args.hang_on = vec!["textDocument/hover".to_string()];

        let uri = "file:///tmp/a.php";
        let mut input = frame(&initialize_request(1));
        input.extend(frame(&did_open_notification(uri, "<?php\necho $x;\n")));
        input.extend(frame(&hover_request(2, uri, 1, 6)));

        let messages = run_server_with(args, &input);

        assert!(
            !messages
                .iter()
                .any(|m| m.get("id").and_then(Value::as_u64) == Some(2)),
            "hover should never be answered"
        );
    }

    #[test]
    fn test_configuration_request_and_ack() {
        let mut args = default_args();
        args.send_configuration_request = true;

        let mut input = frame(&initialize_request(1));
        // Reply to the configuration request the mock sends with id 100.
        input.extend(frame(
            &json!({
                "jsonrpc": "2.0",
                "id": 100,
                "method": "workspace/configuration",
                "result": [{ "intelephense": {} }, { "intelephense": {} }]
            })
            .to_string(),
        ));

        let messages = run_server_with(args, &input);

        let config_req = messages
            .iter()
            .find(|m| m.get("method").and_then(Value::as_str) == Some("workspace/configuration"))
            .expect("configuration request");
        assert_eq!(
            config_req["params"]["items"].as_array().map(Vec::len),
            Some(2)
        );

        let ack = messages
            .iter()
            .find(|m| {
                m.get("method").and_then(Value::as_str) == Some("textDocument/publishDiagnostics")
                    && m["params"]["uri"] == "mockls://configuration"
            })
            .expect("configuration ack diagnostics");
        assert_eq!(
            ack["params"]["diagnostics"][0]["message"],
            "configuration acknowledged"
        );
    }

    #[test]
    fn test_unknown_method_gets_error() {
        let req = json!({
            "jsonrpc": "2.0",
            "id": 9,
            "method": "textDocument/rename",
            "params": {}
        })
        .to_string();
        let input = frame(&req);

        let messages = run_server_with(default_args(), &input);

        let resp = messages
            .iter()
            .find(|m| m.get("id").and_then(Value::as_u64) == Some(9))
            .expect("error response");
        assert_eq!(resp["error"]["code"], -32601);
    }
}
