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

//! Constants and configuration defaults for the bridge
//!
//! Every default used by `BridgeConfig` lives here. Other modules read
//! values through the config, never from these constants directly.

/// Helper process defaults
pub mod helper {
    /// Helper executable base name, resolved next to the host binary
    pub const EXECUTABLE_NAME: &str = "liquidctl_server";

    /// Arguments passed to the helper on launch
    pub const DEFAULT_ARGS: &[&str] = &["--log-level", "INFO"];

    /// Prefix attached to every forwarded helper output line
    pub const LOG_TAG: &str = "LiquidCtl Bridge";
}

/// Pipe defaults
pub mod pipe {
    pub use lc_protocol::PIPE_NAME;

    /// Upper bound for a single response read
    pub const READ_BUFFER_SIZE: usize = lc_protocol::MAX_MESSAGE_SIZE;

    /// Interval between connect attempts while waiting for the helper to bind
    pub const CONNECT_POLL_MS: u64 = 50;

    /// Windows error code returned while every pipe instance is busy
    pub const ERROR_PIPE_BUSY: i32 = 231;

    /// Thread serving reads for handles without a native read timeout
    pub const READER_THREAD_NAME: &str = "lc-pipe-reader";
}

/// Retry budgets
pub mod retry {
    /// Initialization attempts before the client is marked faulted
    pub const MAX_INIT_RETRIES: u32 = 3;

    /// Attempts per `get.statuses` request
    pub const MAX_REQUEST_RETRIES: u32 = 3;

    /// Attempts per `set.fixed_speed` request
    pub const SET_SPEED_RETRIES: u32 = 2;
}

/// Timing values, all in milliseconds
pub mod timing {
    /// Delay between failed initialization attempts
    pub const INIT_RETRY_DELAY_MS: u64 = 500;

    /// Delay between failed request attempts
    pub const REQUEST_RETRY_DELAY_MS: u64 = 100;

    /// Time the helper needs after launch to bind its pipe
    pub const STARTUP_GRACE_MS: u64 = 1000;

    pub const PIPE_CONNECT_TIMEOUT_MS: u64 = 2000;

    pub const REQUEST_TIMEOUT_MS: u64 = 5000;

    /// Bounded wait for the helper to exit after termination was requested
    pub const SHUTDOWN_TIMEOUT_MS: u64 = 3000;

    /// Age after which a cached snapshot is considered stale
    pub const CACHE_EXPIRY_MS: u64 = 2000;

    /// Poll interval while waiting for a process to exit
    pub const EXIT_POLL_MS: u64 = 25;
}

/// Background writer defaults
pub mod writer {
    /// Pending `set.fixed_speed` commands before new ones are dropped
    pub const QUEUE_CAPACITY: usize = 32;

    pub const THREAD_NAME: &str = "lc-speed-writer";
}

/// Logging defaults
pub mod logging {
    pub const DEFAULT_LEVEL: &str = "info";
}
