/*
 * This file is part of liquidctl-bridge.
 *
 * Copyright (C) 2025 liquidctl-bridge contributors
 *
 * liquidctl-bridge is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * liquidctl-bridge is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with liquidctl-bridge. If not, see <https://www.gnu.org/licenses/>.
 */

use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use lc_error::{BridgeError, Result};
use serde::{Deserialize, Serialize};

use crate::constants::{helper, logging, pipe, retry, timing, writer};
use crate::transport::Framing;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BridgeConfig {
    /// Helper executable; defaults to `liquidctl_server` next to the running binary
    pub helper_path: Option<PathBuf>,
    pub helper_args: Vec<String>,
    /// Process name used to find strays from a previous session; defaults to the helper's file stem
    pub helper_process_name: Option<String>,
    /// Logical pipe name, or an absolute socket path on Unix
    pub pipe_name: String,
    pub framing: Framing,
    /// Require a `handshake` acknowledgement during initialization
    pub handshake: bool,
    pub max_init_retries: u32,
    pub max_request_retries: u32,
    pub set_speed_retries: u32,
    pub init_retry_delay_ms: u64,
    pub request_retry_delay_ms: u64,
    pub startup_grace_ms: u64,
    pub pipe_connect_timeout_ms: u64,
    pub request_timeout_ms: u64,
    pub shutdown_timeout_ms: u64,
    pub cache_expiry_ms: u64,
    pub read_buffer_size: usize,
    pub write_queue_capacity: usize,
    pub log_tag: String,
    pub log_level: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            helper_path: None,
            helper_args: helper::DEFAULT_ARGS.iter().map(|a| a.to_string()).collect(),
            helper_process_name: None,
            pipe_name: pipe::PIPE_NAME.to_string(),
            framing: Framing::Message,
            handshake: true,
            max_init_retries: retry::MAX_INIT_RETRIES,
            max_request_retries: retry::MAX_REQUEST_RETRIES,
            set_speed_retries: retry::SET_SPEED_RETRIES,
            init_retry_delay_ms: timing::INIT_RETRY_DELAY_MS,
            request_retry_delay_ms: timing::REQUEST_RETRY_DELAY_MS,
            startup_grace_ms: timing::STARTUP_GRACE_MS,
            pipe_connect_timeout_ms: timing::PIPE_CONNECT_TIMEOUT_MS,
            request_timeout_ms: timing::REQUEST_TIMEOUT_MS,
            shutdown_timeout_ms: timing::SHUTDOWN_TIMEOUT_MS,
            cache_expiry_ms: timing::CACHE_EXPIRY_MS,
            read_buffer_size: pipe::READ_BUFFER_SIZE,
            write_queue_capacity: writer::QUEUE_CAPACITY,
            log_tag: helper::LOG_TAG.to_string(),
            log_level: logging::DEFAULT_LEVEL.to_string(),
        }
    }
}

impl BridgeConfig {
    /// Helper executable path, resolved next to the current executable when unset
    pub fn resolved_helper_path(&self) -> PathBuf {
        if let Some(path) = &self.helper_path {
            return path.clone();
        }
        let file_name = format!("{}{}", helper::EXECUTABLE_NAME, env::consts::EXE_SUFFIX);
        env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(|dir| dir.join(&file_name)))
            .unwrap_or_else(|| PathBuf::from(file_name))
    }

    /// Name matched against running processes when cleaning up strays
    pub fn resolved_process_name(&self) -> String {
        if let Some(name) = &self.helper_process_name {
            return name.clone();
        }
        self.resolved_helper_path()
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| helper::EXECUTABLE_NAME.to_string())
    }

    pub fn init_retry_delay(&self) -> Duration {
        Duration::from_millis(self.init_retry_delay_ms)
    }

    pub fn request_retry_delay(&self) -> Duration {
        Duration::from_millis(self.request_retry_delay_ms)
    }

    pub fn startup_grace(&self) -> Duration {
        Duration::from_millis(self.startup_grace_ms)
    }

    pub fn pipe_connect_timeout(&self) -> Duration {
        Duration::from_millis(self.pipe_connect_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    pub fn cache_expiry(&self) -> Duration {
        Duration::from_millis(self.cache_expiry_ms)
    }
}

pub fn validate_config(cfg: &BridgeConfig) -> Result<()> {
    if cfg.pipe_name.trim().is_empty() {
        return Err(BridgeError::invalid_config("pipe_name", "must not be empty"));
    }
    if cfg.max_init_retries == 0 {
        return Err(BridgeError::invalid_config("max_init_retries", "must be at least 1"));
    }
    if cfg.max_request_retries == 0 {
        return Err(BridgeError::invalid_config("max_request_retries", "must be at least 1"));
    }
    if cfg.set_speed_retries == 0 {
        return Err(BridgeError::invalid_config("set_speed_retries", "must be at least 1"));
    }
    if cfg.read_buffer_size == 0 || cfg.read_buffer_size > lc_protocol::MAX_MESSAGE_SIZE {
        return Err(BridgeError::invalid_config(
            "read_buffer_size",
            format!("must be between 1 and {} bytes", lc_protocol::MAX_MESSAGE_SIZE),
        ));
    }
    if cfg.write_queue_capacity == 0 {
        return Err(BridgeError::invalid_config("write_queue_capacity", "must be at least 1"));
    }
    if cfg.pipe_connect_timeout_ms == 0 || cfg.request_timeout_ms == 0 {
        return Err(BridgeError::invalid_config("timeouts", "connect and request timeouts must be non-zero"));
    }
    Ok(())
}

/// Load a config file; a missing file yields the defaults
pub fn load_config(path: &Path) -> Result<BridgeConfig> {
    let data = match fs::read_to_string(path) {
        Ok(data) => data,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(BridgeConfig::default()),
        Err(source) => {
            return Err(BridgeError::FileRead {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    let cfg: BridgeConfig = serde_json::from_str(&data)
        .map_err(|e| BridgeError::config(format!("parse error in {}: {}", path.display(), e)))?;
    validate_config(&cfg)?;
    Ok(cfg)
}

pub fn save_config(path: &Path, cfg: &BridgeConfig) -> Result<()> {
    if let Some(parent) = path.parent() {
        let _ = fs::create_dir_all(parent);
    }
    let json = serde_json::to_string_pretty(cfg)?;
    fs::write(path, json).map_err(|e| BridgeError::config(format!("write {}: {}", path.display(), e)))
}
