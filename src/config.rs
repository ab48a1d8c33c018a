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

use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::lsp::ServerCommand;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Port for the HTTP front door (default: 8787)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Which language server to spawn (default: intelephense)
    #[serde(default)]
    pub server: ServerKind,

    /// Seconds a document may sit idle before it is auto-closed (default: 30)
    #[serde(default = "default_cache_time")]
    pub cache_time: u64,

    /// Seconds between idle-document sweeps (default: 30)
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval: u64,

    /// Seconds to wait for a single LSP response (default: 2)
    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,

    /// Seconds to wait for the initialize handshake before forcing the
    /// session ready (default: 10)
    #[serde(default = "default_initialize_timeout")]
    pub initialize_timeout: u64,

    /// Wall-clock seconds per HTTP call (default: 20)
    #[serde(default = "default_call_timeout")]
    pub call_timeout: u64,

    /// Milliseconds to let the server settle between didClose and didOpen
    /// when re-opening a document (default: 75)
    #[serde(default = "default_reopen_delay_ms")]
    pub reopen_delay_ms: u64,

    /// Consecutive crashes tolerated before the bridge gives up (default: 10)
    #[serde(default = "default_max_crashes")]
    pub max_crashes: u32,
}

/// Supported language server flavours.
#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ServerKind {
    /// intelephense over stdio (the default).
    #[default]
    Intelephense,
    /// felixfbecker/php-language-server via the PHP interpreter.
    Phpls,
}

impl ServerKind {
    /// Resolves the child binary and its argv.
    ///
    /// # Errors
    ///
    /// Returns an error if the home directory cannot be determined for the
    /// phpls composer install path.
    pub fn command(self) -> Result<ServerCommand> {
        match self {
            Self::Intelephense => Ok(ServerCommand {
                program: "intelephense".to_string(),
                args: vec!["--stdio".to_string()],
            }),
            Self::Phpls => {
                let home = dirs::home_dir().ok_or_else(|| anyhow!("cannot locate home directory"))?;
                let script = home
                    .join(".composer/vendor/felixfbecker/language-server/bin/php-language-server.php");
                Ok(ServerCommand {
                    program: "php".to_string(),
                    args: vec![script.to_string_lossy().into_owned()],
                })
            }
        }
    }
}

/// Timing knobs handed to the session manager. Tests shrink these so the
/// timeout paths run in milliseconds.
#[derive(Debug, Clone)]
pub struct Timing {
    pub cache_time: Duration,
    pub sweep_interval: Duration,
    pub request_timeout: Duration,
    pub initialize_timeout: Duration,
    pub call_timeout: Duration,
    pub reopen_delay: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            cache_time: Duration::from_secs(default_cache_time()),
            sweep_interval: Duration::from_secs(default_sweep_interval()),
            request_timeout: Duration::from_secs(default_request_timeout()),
            initialize_timeout: Duration::from_secs(default_initialize_timeout()),
            call_timeout: Duration::from_secs(default_call_timeout()),
            reopen_delay: Duration::from_millis(default_reopen_delay_ms()),
        }
    }
}

const fn default_port() -> u16 {
    8787
}

const fn default_cache_time() -> u64 {
    30
}

const fn default_sweep_interval() -> u64 {
    30
}

const fn default_request_timeout() -> u64 {
    2
}

const fn default_initialize_timeout() -> u64 {
    10
}

const fn default_call_timeout() -> u64 {
    20
}

const fn default_reopen_delay_ms() -> u64 {
    75
}

const fn default_max_crashes() -> u32 {
    10
}

impl Config {
    /// Load configuration from standard paths or a specific file.
    pub fn load(explicit_file: Option<PathBuf>) -> Result<Self> {
        let mut builder = config::Config::builder();

        // 1. Start with defaults
        builder = builder
            .set_default("port", i64::from(default_port()))?
            .set_default("cache_time", default_cache_time())?
            .set_default("sweep_interval", default_sweep_interval())?;

        // 2. Load from user config directory (~/.config/trestle/config.toml)
        if let Some(config_dir) = dirs::config_dir() {
            let config_path = config_dir.join("trestle").join("config.toml");
            if config_path.exists() {
                builder = builder.add_source(config::File::from(config_path));
            }
        }

        // 3. Load from explicit file if provided
        if let Some(path) = explicit_file {
            builder = builder.add_source(config::File::from(path));
        }

        // 4. Load from environment variables (TRESTLE_PORT, etc.)
        builder = builder.add_source(config::Environment::with_prefix("TRESTLE"));

        let config = builder.build().context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Converts the second-granularity file settings into the durations the
    /// session runs on.
    #[must_use]
    pub fn timing(&self) -> Timing {
        Timing {
            cache_time: Duration::from_secs(self.cache_time),
            sweep_interval: Duration::from_secs(self.sweep_interval),
            request_timeout: Duration::from_secs(self.request_timeout),
            initialize_timeout: Duration::from_secs(self.initialize_timeout),
            call_timeout: Duration::from_secs(self.call_timeout),
            reopen_delay: Duration::from_millis(self.reopen_delay_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let timing = Timing::default();
        assert_eq!(timing.request_timeout, Duration::from_secs(2));
        assert_eq!(timing.initialize_timeout, Duration::from_secs(10));
        assert_eq!(timing.call_timeout, Duration::from_secs(20));
        assert_eq!(timing.cache_time, Duration::from_secs(30));
    }

    #[test]
    fn test_intelephense_command() -> Result<()> {
        let cmd = ServerKind::Intelephense.command()?;
        assert_eq!(cmd.program, "intelephense");
        assert_eq!(cmd.args, vec!["--stdio".to_string()]);
        Ok(())
    }

    #[test]
    fn test_phpls_command_uses_composer_path() -> Result<()> {
        let cmd = ServerKind::Phpls.command()?;
        assert_eq!(cmd.program, "php");
        assert!(cmd.args[0].ends_with("php-language-server.php"));
        Ok(())
    }
}
