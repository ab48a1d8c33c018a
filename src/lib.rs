// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Trestle is an HTTP bridge to PHP language servers.
//!
//! It supervises a language server child process (intelephense or
//! php-language-server) and exposes a small HTTP API that editor
//! front-ends call to initialize the server, open and close documents,
//! and request hover, completion, and definition results.

/// Configuration handling for server choice and timing knobs.
pub mod config;
/// Topic-keyed pub/sub for in-process coordination.
pub mod events;
/// HTTP front door.
pub mod http;
/// Language server transport, client, and supervision.
pub mod lsp;
/// Session management: initialization state, open documents, dispatch.
pub mod session;
/// Fixed payloads sent to the language server.
pub mod settings;
