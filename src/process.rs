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

//! Helper process supervision
//!
//! Owns the lifecycle of the external `liquidctl_server` helper: stray
//! cleanup, launch, output forwarding and bounded shutdown.

use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use lc_error::{BridgeError, Result};
use sysinfo::{Pid, ProcessesToUpdate, System};
use tracing::{debug, error, info, warn};

use crate::config::BridgeConfig;
use crate::constants::timing::EXIT_POLL_MS;

/// Lifecycle operations the client needs from a helper process
pub trait HelperProcess: Send {
    /// Make sure the helper is running, launching it if needed
    fn ensure_running(&mut self) -> Result<()>;

    fn is_running(&mut self) -> bool;

    /// Stop the helper. Idempotent; never fails.
    fn stop(&mut self);
}

pub struct ProcessSupervisor {
    executable: PathBuf,
    args: Vec<String>,
    process_name: String,
    log_tag: String,
    shutdown_timeout: Duration,
    child: Option<Child>,
}

impl ProcessSupervisor {
    pub fn new(config: &BridgeConfig) -> Self {
        Self {
            executable: config.resolved_helper_path(),
            args: config.helper_args.clone(),
            process_name: config.resolved_process_name(),
            log_tag: config.log_tag.clone(),
            shutdown_timeout: config.shutdown_timeout(),
            child: None,
        }
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }

    /// Launch the helper with piped output forwarded to the log
    fn spawn(&mut self) -> Result<()> {
        if !self.executable.is_file() {
            return Err(BridgeError::BinaryMissing(self.executable.clone()));
        }

        let mut child = Command::new(&self.executable)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| BridgeError::ProcessStart {
                path: self.executable.clone(),
                source,
            })?;

        if let Some(stdout) = child.stdout.take() {
            forward_output(stdout, "stdout", self.log_tag.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            forward_output(stderr, "stderr", self.log_tag.clone());
        }

        info!(pid = child.id(), "Started helper {}", self.executable.display());
        self.child = Some(child);
        Ok(())
    }

    /// Terminate helper processes left behind by a previous session
    fn kill_strays(&self) {
        let own_pid = std::process::id();
        let mut sys = System::new();
        sys.refresh_processes(ProcessesToUpdate::All, true);

        let mut killed: Vec<Pid> = Vec::new();
        for (pid, process) in sys.processes() {
            if pid.as_u32() == own_pid {
                continue;
            }
            let stem = Path::new(process.name())
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned());
            if stem.as_deref() != Some(self.process_name.as_str()) {
                continue;
            }
            if process.kill() {
                info!(pid = pid.as_u32(), "Killed stray helper process");
                killed.push(*pid);
            } else {
                warn!(pid = pid.as_u32(), "Failed to kill stray helper process");
            }
        }

        if killed.is_empty() {
            return;
        }

        let deadline = Instant::now() + self.shutdown_timeout;
        while Instant::now() < deadline {
            sys.refresh_processes(ProcessesToUpdate::Some(&killed), true);
            if killed.iter().all(|pid| sys.process(*pid).is_none()) {
                return;
            }
            thread::sleep(Duration::from_millis(EXIT_POLL_MS));
        }
        warn!("Stray helper processes still present after {:?}", self.shutdown_timeout);
    }

    /// Poll until the child exits or the deadline passes
    fn wait_for_exit(child: &mut Child, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            match child.try_wait() {
                Ok(Some(status)) => {
                    debug!("Helper exited with {}", status);
                    return true;
                }
                Ok(None) if Instant::now() < deadline => {
                    thread::sleep(Duration::from_millis(EXIT_POLL_MS));
                }
                Ok(None) => return false,
                Err(e) => {
                    warn!("Failed to poll helper exit: {}", e);
                    return false;
                }
            }
        }
    }

    #[cfg(unix)]
    fn request_termination(child: &Child) {
        let Ok(pid) = libc::pid_t::try_from(child.id()) else {
            return;
        };
        // SAFETY: pid belongs to a child we spawned and have not yet reaped
        let rc = unsafe { libc::kill(pid, libc::SIGTERM) };
        if rc != 0 {
            debug!("SIGTERM to helper failed: {}", std::io::Error::last_os_error());
        }
    }

    #[cfg(not(unix))]
    fn request_termination(_child: &Child) {}
}

impl HelperProcess for ProcessSupervisor {
    fn ensure_running(&mut self) -> Result<()> {
        if self.is_running() {
            return Ok(());
        }

        if !self.executable.is_file() {
            let err = BridgeError::BinaryMissing(self.executable.clone());
            error!(kind = %err.kind(), "{}", err);
            return Err(err);
        }

        self.kill_strays();
        self.spawn().map_err(|e| {
            error!(kind = %e.kind(), "Failed to launch helper: {}", e);
            e
        })
    }

    fn is_running(&mut self) -> bool {
        let Some(child) = self.child.as_mut() else {
            return false;
        };
        match child.try_wait() {
            Ok(None) => true,
            Ok(Some(status)) => {
                warn!("Helper exited unexpectedly with {}", status);
                self.child = None;
                false
            }
            Err(e) => {
                warn!("Failed to query helper state: {}", e);
                false
            }
        }
    }

    fn stop(&mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };

        Self::request_termination(&child);
        if Self::wait_for_exit(&mut child, self.shutdown_timeout) {
            info!("Helper stopped");
            return;
        }

        warn!("Helper did not exit within {:?}, killing", self.shutdown_timeout);
        if let Err(e) = child.kill() {
            debug!("Kill failed: {}", e);
        }
        let _ = child.wait();
    }
}

impl Drop for ProcessSupervisor {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Forward each non-blank output line of the helper to the log
fn forward_output<R: Read + Send + 'static>(source: R, stream: &'static str, tag: String) {
    let spawned = thread::Builder::new()
        .name(format!("lc-helper-{}", stream))
        .spawn(move || {
            for line in BufReader::new(source).lines() {
                match line {
                    Ok(line) if line.trim().is_empty() => continue,
                    Ok(line) => info!(stream, "[{}] {}", tag, line),
                    Err(_) => break,
                }
            }
        });
    if let Err(e) = spawned {
        warn!("Failed to start {} forwarder: {}", stream, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn supervisor_for(path: PathBuf) -> ProcessSupervisor {
        let config = BridgeConfig {
            helper_path: Some(path),
            helper_process_name: Some("lc-bridge-test-helper-that-never-runs".into()),
            shutdown_timeout_ms: 500,
            ..BridgeConfig::default()
        };
        ProcessSupervisor::new(&config)
    }

    #[test]
    fn test_missing_binary_is_not_started() {
        let dir = TempDir::new().unwrap();
        let mut supervisor = supervisor_for(dir.path().join("liquidctl_server"));
        assert_eq!(supervisor.executable(), dir.path().join("liquidctl_server"));
        let err = supervisor.ensure_running().unwrap_err();
        assert!(matches!(err, BridgeError::BinaryMissing(_)));
        assert!(!supervisor.is_running());
        // stop on a never-started helper is a no-op
        supervisor.stop();
        supervisor.stop();
    }

    #[test]
    fn test_spawn_error_classification() {
        let dir = TempDir::new().unwrap();
        let mut supervisor = supervisor_for(dir.path().join("absent"));
        let err = supervisor.spawn().unwrap_err();
        assert_eq!(err.kind(), lc_error::ErrorKind::BinaryMissing);
    }

    #[cfg(unix)]
    #[test]
    fn test_start_and_stop_long_running_helper() {
        let mut supervisor = supervisor_for(PathBuf::from("/bin/sleep"));
        supervisor.args = vec!["30".into()];

        supervisor.ensure_running().unwrap();
        assert!(supervisor.is_running());
        let pid = supervisor.child.as_ref().map(|c| c.id());
        // Already running: no second launch
        supervisor.ensure_running().unwrap();
        assert_eq!(supervisor.child.as_ref().map(|c| c.id()), pid);

        let started = Instant::now();
        supervisor.stop();
        assert!(!supervisor.is_running());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[cfg(unix)]
    #[test]
    fn test_exited_helper_is_detected() {
        let mut supervisor = supervisor_for(PathBuf::from("/bin/sh"));
        supervisor.args = vec!["-c".into(), "echo ready; exit 0".into()];

        supervisor.ensure_running().unwrap();
        thread::sleep(Duration::from_millis(300));
        assert!(!supervisor.is_running());
    }
}
