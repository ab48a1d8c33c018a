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

use anyhow::{Context, Result};
use bytes::BytesMut;
use serde_json::Value;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, error, info, trace, warn};

use super::protocol::{self, Inbound};

/// Child binary and argv for a language server.
#[derive(Debug, Clone)]
pub struct ServerCommand {
    /// The program to execute.
    pub program: String,
    /// Arguments passed to the program.
    pub args: Vec<String>,
}

/// Manages the language server child process: serializes outbound writes,
/// feeds inbound messages to a channel, and re-spawns the child after a
/// crash up to a bounded number of times.
///
/// The inbound channel has capacity 1 and exactly one consumer is
/// expected (the session's dispatch loop). A slow consumer blocks the
/// reader, which in turn blocks the child.
pub struct LspClient {
    stdin: Arc<Mutex<ChildStdin>>,
}

impl LspClient {
    /// Spawns the server process, the reader/stderr tasks, and the crash
    /// supervisor. Returns the client together with the inbound message
    /// receiver.
    ///
    /// # Errors
    ///
    /// Returns an error if the child process cannot be spawned.
    pub fn spawn(command: ServerCommand, max_crashes: u32) -> Result<(Self, mpsc::Receiver<Inbound>)> {
        let (tx, rx) = mpsc::channel(1);

        let (child, stdin, stdout, stderr) = launch(&command)?;
        let stdin = Arc::new(Mutex::new(stdin));

        tokio::spawn(read_loop(stdout, tx.clone()));
        tokio::spawn(drain_stderr(stderr));
        tokio::spawn(supervise(command, stdin.clone(), tx, max_crashes, child));

        Ok((Self { stdin }, rx))
    }

    /// Sends a request with a caller-allocated id.
    ///
    /// # Errors
    ///
    /// Returns an error if the write to the child fails.
    pub async fn request(&self, id: i64, method: &str, params: Value) -> Result<()> {
        info!("{method}");
        self.write(protocol::request_frame(id, method, params)).await
    }

    /// Sends a notification.
    ///
    /// # Errors
    ///
    /// Returns an error if the write to the child fails.
    pub async fn notification(&self, method: &str, params: Value) -> Result<()> {
        info!("{method}");
        self.write(protocol::notification_frame(method, params))
            .await
    }

    /// Replies to a server-originated request.
    ///
    /// # Errors
    ///
    /// Returns an error if the write to the child fails.
    pub async fn reply(&self, id: i64, method: &str, result: Value) -> Result<()> {
        info!("{method}");
        self.write(protocol::reply_frame(id, method, result)).await
    }

    /// Writes one framed message. The stdin lock keeps messages whole on
    /// the wire.
    async fn write(&self, frame: Vec<u8>) -> Result<()> {
        trace!("sending: {}", String::from_utf8_lossy(&frame));
        let mut stdin = self.stdin.lock().await;
        stdin.write_all(&frame).await?;
        stdin.flush().await?;
        Ok(())
    }
}

fn launch(command: &ServerCommand) -> Result<(Child, ChildStdin, ChildStdout, ChildStderr)> {
    let mut child = Command::new(&command.program)
        .args(&command.args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .with_context(|| format!("Failed to spawn language server: {}", command.program))?;

    let stdin = child.stdin.take().context("stdin not captured")?;
    let stdout = child.stdout.take().context("stdout not captured")?;
    let stderr = child.stderr.take().context("stderr not captured")?;

    Ok((child, stdin, stdout, stderr))
}

/// Waits on the child and restarts it after a crash. After `max_crashes`
/// consecutive exits the whole bridge terminates so an outer process
/// supervisor can restart it cleanly.
async fn supervise(
    command: ServerCommand,
    stdin: Arc<Mutex<ChildStdin>>,
    tx: mpsc::Sender<Inbound>,
    max_crashes: u32,
    mut child: Child,
) {
    let mut crashes = 0u32;

    loop {
        let status = child.wait().await;
        crashes += 1;

        if crashes >= max_crashes {
            error!("language server crashed {crashes} times, giving up (last status: {status:?})");
            std::process::exit(1);
        }

        info!("restarting server after a crash (exit status: {status:?})");

        match launch(&command) {
            Ok((new_child, new_stdin, stdout, stderr)) => {
                *stdin.lock().await = new_stdin;
                tokio::spawn(read_loop(stdout, tx.clone()));
                tokio::spawn(drain_stderr(stderr));
                child = new_child;

                // The session purges its state when it sees this message.
                if tx.send(Inbound::restart()).await.is_err() {
                    return;
                }
            }
            Err(e) => {
                error!("failed to restart language server: {e}");
                std::process::exit(1);
            }
        }
    }
}

/// Reads framed messages off the child's stdout. Log-only methods are
/// absorbed here; everything else goes to the inbound channel.
async fn read_loop(stdout: ChildStdout, tx: mpsc::Sender<Inbound>) {
    let mut reader = BufReader::new(stdout);
    let mut buffer = BytesMut::with_capacity(8192);
    let mut temp = [0u8; 4096];

    loop {
        match reader.read(&mut temp).await {
            Ok(0) => {
                debug!("language server stdout closed");
                break;
            }
            Ok(n) => buffer.extend_from_slice(&temp[..n]),
            Err(e) => {
                error!("error reading from language server: {e}");
                break;
            }
        }

        loop {
            match protocol::try_parse_frame(&mut buffer) {
                Ok(Some(raw)) => {
                    trace!("received: {raw}");
                    let message = Inbound::parse(&raw);

                    match message.method.as_deref() {
                        Some("window/logMessage") => {
                            if let Some(text) = message.params.get("message").and_then(Value::as_str)
                            {
                                info!("server: {text}");
                            }
                        }
                        Some("serenata/didProgressIndexing") => {
                            if let Some(text) = message.params.get("info").and_then(Value::as_str) {
                                info!("indexing: {text}");
                            }
                        }
                        _ => {
                            if tx.send(message).await.is_err() {
                                return;
                            }
                        }
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!("dropping unparseable frame: {e}");
                    buffer.clear();
                    break;
                }
            }
        }
    }

    debug!("reader finished");
}

/// Drains the child's stderr. Content is only logged, never parsed.
async fn drain_stderr(stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        warn!("server stderr: {line}");
    }
}
