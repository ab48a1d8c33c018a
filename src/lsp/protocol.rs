// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Wire framing and message shapes for the language server transport.
//!
//! Messages are JSON bodies prefixed with a MIME-style header block
//! (`Content-Length` plus a fixed `Content-Type`), terminated by CRLF CRLF.

use anyhow::{Context, Result};
use bytes::{Buf, BytesMut};
use serde_json::{Value, json};
use tracing::warn;

const CONTENT_TYPE: &str = "application/vscode-jsonrpc; charset=utf-8";

/// An inbound message from the server. A single shape covers all three
/// message kinds: replies to our requests (`id` + `result`),
/// server-originated requests (`id` + `method`), and notifications
/// (`method` only).
#[derive(Debug, Default, Clone)]
pub struct Inbound {
    /// Request or response id, when present.
    pub id: Option<i64>,
    /// Method name for requests and notifications.
    pub method: Option<String>,
    /// Parameters of a request or notification.
    pub params: Value,
    /// Result of a reply to one of our requests.
    pub result: Value,
    /// Error object of a failed reply.
    pub error: Value,
}

impl Inbound {
    /// Decodes a message body, tolerating unknown shapes. Fields that fail
    /// to parse are left at their defaults so unexpected messages still
    /// propagate upward instead of being dropped.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        let value: Value = match serde_json::from_str(raw) {
            Ok(v) => v,
            Err(e) => {
                warn!("malformed message body ({e}): {raw}");
                return Self::default();
            }
        };

        Self {
            id: value.get("id").and_then(Value::as_i64),
            method: value
                .get("method")
                .and_then(Value::as_str)
                .map(str::to_string),
            params: value.get("params").cloned().unwrap_or(Value::Null),
            result: value.get("result").cloned().unwrap_or(Value::Null),
            error: value.get("error").cloned().unwrap_or(Value::Null),
        }
    }

    /// Synthetic message pushed by the supervisor when the child has been
    /// re-spawned after a crash.
    #[must_use]
    pub fn restart() -> Self {
        Self {
            method: Some("restart".to_string()),
            ..Self::default()
        }
    }
}

/// Frames a request. An id of 0 is rewritten to 1 on the wire, a quirk
/// preserved for compatibility with existing front-ends.
#[must_use]
pub fn request_frame(id: i64, method: &str, params: Value) -> Vec<u8> {
    let id = if id > 0 { id } else { 1 };
    encode_frame(&json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": method,
        "params": params,
    }))
}

/// Frames a notification (no id, no reply expected).
#[must_use]
pub fn notification_frame(method: &str, params: Value) -> Vec<u8> {
    encode_frame(&json!({
        "jsonrpc": "2.0",
        "method": method,
        "params": params,
    }))
}

/// Frames a reply to a server-originated request.
#[must_use]
pub fn reply_frame(id: i64, method: &str, result: Value) -> Vec<u8> {
    encode_frame(&json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": method,
        "result": result,
    }))
}

fn encode_frame(body: &Value) -> Vec<u8> {
    // Value serialization cannot fail.
    let json = serde_json::to_string(body).unwrap_or_default();
    let mut frame = format!(
        "Content-Length: {}\r\nContent-Type: {CONTENT_TYPE}\r\n\r\n",
        json.len()
    )
    .into_bytes();
    frame.extend_from_slice(json.as_bytes());
    frame
}

/// Extracts the next complete framed body from a buffer, if one is
/// available.
///
/// # Errors
///
/// Returns an error if:
/// - Headers are not valid UTF-8.
/// - Content-Length is not a valid integer.
/// - The body is not valid UTF-8.
pub fn try_parse_frame(buffer: &mut BytesMut) -> Result<Option<String>> {
    let mut headers_end = None;
    let mut content_length = None;

    // Scan for \r\n\r\n
    for i in 0..buffer.len().saturating_sub(3) {
        if &buffer[i..i + 4] == b"\r\n\r\n" {
            headers_end = Some(i + 4);

            let headers_str =
                std::str::from_utf8(&buffer[0..i]).context("Failed to parse headers as UTF-8")?;

            for line in headers_str.lines() {
                if line.to_ascii_lowercase().starts_with("content-length:")
                    && let Some((_, value)) = line.split_once(':')
                {
                    content_length = Some(value.trim().parse::<usize>()?);
                }
            }
            break;
        }
    }

    if let (Some(header_len), Some(content_len)) = (headers_end, content_length) {
        let total_len = header_len + content_len;

        if buffer.len() >= total_len {
            buffer.advance(header_len);
            let body_bytes = buffer.split_to(content_len);
            let body = String::from_utf8(body_bytes.to_vec())?;
            return Ok(Some(body));
        }
    }

    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_complete_frame() -> Result<()> {
        let body = r#"{"jsonrpc":"2.0","id":1,"method":"initialize"}"#;
        let raw = format!("Content-Length: {}\r\n\r\n{}", body.len(), body);
        let mut buffer = BytesMut::from(raw.as_str());

        let result = try_parse_frame(&mut buffer)?;
        assert_eq!(result, Some(body.to_string()));
        assert!(buffer.is_empty());
        Ok(())
    }

    #[test]
    fn test_parse_incomplete_header() -> Result<()> {
        let mut buffer = BytesMut::from("Content-Length: 10\r\n");
        assert_eq!(try_parse_frame(&mut buffer)?, None);
        Ok(())
    }

    #[test]
    fn test_parse_incomplete_body() -> Result<()> {
        let mut buffer = BytesMut::from("Content-Length: 100\r\n\r\n{\"partial\":");
        assert_eq!(try_parse_frame(&mut buffer)?, None);
        Ok(())
    }

    #[test]
    fn test_parse_multiple_frames() -> Result<()> {
        let body1 = r#"{"jsonrpc":"2.0","id":1}"#;
        let body2 = r#"{"jsonrpc":"2.0","id":2}"#;
        let raw = format!(
            "Content-Length: {}\r\n\r\n{}Content-Length: {}\r\n\r\n{}",
            body1.len(),
            body1,
            body2.len(),
            body2
        );
        let mut buffer = BytesMut::from(raw.as_str());

        assert_eq!(try_parse_frame(&mut buffer)?, Some(body1.to_string()));
        assert_eq!(try_parse_frame(&mut buffer)?, Some(body2.to_string()));
        assert!(buffer.is_empty());
        Ok(())
    }

    #[test]
    fn test_parse_case_insensitive_header() -> Result<()> {
        let body = r#"{"test":true}"#;
        let raw = format!("content-length: {}\r\n\r\n{}", body.len(), body);
        let mut buffer = BytesMut::from(raw.as_str());

        assert_eq!(try_parse_frame(&mut buffer)?, Some(body.to_string()));
        Ok(())
    }

    #[test]
    fn test_frame_round_trip() -> Result<()> {
        let params = json!({
            "textDocument": {"uri": "file:///p/a.php"},
            "position": {"line": 3, "character": 2}
        });
        let frame = request_frame(7, "textDocument/hover", params.clone());

        let mut buffer = BytesMut::from(&frame[..]);
        let body = try_parse_frame(&mut buffer)?.context("missing body")?;
        assert!(buffer.is_empty());

        let decoded: Value = serde_json::from_str(&body)?;
        assert_eq!(decoded["jsonrpc"], "2.0");
        assert_eq!(decoded["id"], 7);
        assert_eq!(decoded["method"], "textDocument/hover");
        assert_eq!(decoded["params"], params);
        Ok(())
    }

    #[test]
    fn test_frame_carries_content_type() {
        let frame = notification_frame("initialized", json!({}));
        let text = String::from_utf8_lossy(&frame);
        assert!(text.contains("Content-Type: application/vscode-jsonrpc; charset=utf-8\r\n"));
    }

    #[test]
    fn test_request_id_zero_rewritten_to_one() -> Result<()> {
        let frame = request_frame(0, "initialize", json!({}));
        let mut buffer = BytesMut::from(&frame[..]);
        let body = try_parse_frame(&mut buffer)?.context("missing body")?;
        let decoded: Value = serde_json::from_str(&body)?;
        assert_eq!(decoded["id"], 1);
        Ok(())
    }

    #[test]
    fn test_notification_has_no_id() -> Result<()> {
        let frame = notification_frame("textDocument/didOpen", json!({"textDocument": {}}));
        let mut buffer = BytesMut::from(&frame[..]);
        let body = try_parse_frame(&mut buffer)?.context("missing body")?;
        let decoded: Value = serde_json::from_str(&body)?;
        assert!(decoded.get("id").is_none());
        Ok(())
    }

    #[test]
    fn test_reply_frame_shape() -> Result<()> {
        let frame = reply_frame(3, "workspace/configuration", json!([{"a": 1}, {"a": 1}]));
        let mut buffer = BytesMut::from(&frame[..]);
        let body = try_parse_frame(&mut buffer)?.context("missing body")?;
        let decoded: Value = serde_json::from_str(&body)?;
        assert_eq!(decoded["id"], 3);
        assert_eq!(decoded["result"].as_array().map(Vec::len), Some(2));
        Ok(())
    }

    #[test]
    fn test_inbound_parse_response() {
        let msg = Inbound::parse(r#"{"jsonrpc":"2.0","id":5,"result":{"contents":["x"]}}"#);
        assert_eq!(msg.id, Some(5));
        assert!(msg.method.is_none());
        assert_eq!(msg.result["contents"][0], "x");
    }

    #[test]
    fn test_inbound_parse_server_request() {
        let msg = Inbound::parse(
            r#"{"jsonrpc":"2.0","id":2,"method":"workspace/configuration","params":{"items":[]}}"#,
        );
        assert_eq!(msg.id, Some(2));
        assert_eq!(msg.method.as_deref(), Some("workspace/configuration"));
        assert!(msg.params["items"].is_array());
    }

    #[test]
    fn test_inbound_parse_notification() {
        let msg = Inbound::parse(
            r#"{"jsonrpc":"2.0","method":"textDocument/publishDiagnostics","params":{"uri":"file:///a.php","diagnostics":[]}}"#,
        );
        assert!(msg.id.is_none());
        assert_eq!(
            msg.method.as_deref(),
            Some("textDocument/publishDiagnostics")
        );
    }

    #[test]
    fn test_inbound_parse_tolerates_garbage() {
        let msg = Inbound::parse("not json at all");
        assert!(msg.id.is_none());
        assert!(msg.method.is_none());
        assert!(msg.result.is_null());
    }

    #[test]
    fn test_inbound_parse_partial_shape() {
        // Unknown fields and odd types parse into whatever fits.
        let msg = Inbound::parse(r#"{"id":"not-a-number","method":7,"result":[1,2]}"#);
        assert!(msg.id.is_none());
        assert!(msg.method.is_none());
        assert_eq!(msg.result, json!([1, 2]));
    }
}
