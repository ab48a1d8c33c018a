/*
 * Copyright (C) 2026 Mark Wells Dev
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

//! HTTP front door: one POST endpoint on any path.
//!
//! The request body names a bridge method and carries an opaque JSON body
//! that is passed through to the session. Each call races a worker against
//! a wall-clock deadline; a client that has already received 504 never
//! sees the late result.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::session::Session;

/// A decoded front-door call: a small method name plus an opaque body.
#[derive(Debug, Deserialize)]
struct BridgeCall {
    #[serde(rename = "Method")]
    method: String,
    #[serde(rename = "Body", default)]
    body: Value,
}

/// Builds the router. Every path lands in the same handler.
pub fn router(session: Arc<Session>) -> Router {
    Router::new().fallback(handle).with_state(session)
}

/// Binds the listener and serves until the task is dropped.
///
/// # Errors
///
/// Returns an error if the port cannot be bound or the server fails.
pub async fn serve(session: Arc<Session>, port: u16) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("listening on http://{addr}");
    axum::serve(listener, router(session)).await?;
    Ok(())
}

async fn handle(
    State(session): State<Arc<Session>>,
    method: Method,
    body: Bytes,
) -> Response {
    if method != Method::POST {
        return StatusCode::NOT_FOUND.into_response();
    }

    let call: BridgeCall = match serde_json::from_slice(&body) {
        Ok(call) => call,
        Err(e) => {
            error!("failed to decode request body: {e}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    debug!("dispatching {}", call.method);

    // The worker runs on its own task so a panic inside request handling
    // surfaces as a join error instead of tearing down the connection, and
    // so a timed-out worker keeps running to completion unobserved.
    let call_timeout = session.timing().call_timeout;
    let worker = {
        let session = Arc::clone(&session);
        tokio::spawn(async move { session.process_request(&call.method, call.body).await })
    };

    match tokio::time::timeout(call_timeout, worker).await {
        Err(_) => (
            StatusCode::GATEWAY_TIMEOUT,
            Json(json!({ "result": "error", "message": "time out" })),
        )
            .into_response(),
        Ok(Err(join_error)) => {
            error!("request worker failed: {join_error}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
        Ok(Ok(None)) => StatusCode::NO_CONTENT.into_response(),
        Ok(Ok(Some(result))) => (StatusCode::OK, Json(result)).into_response(),
    }
}
