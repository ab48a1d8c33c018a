// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

/// Supervised language server process and serialized writes.
pub mod client;
/// Wire framing and message shapes.
pub mod protocol;

pub use client::{LspClient, ServerCommand};
pub use protocol::Inbound;
