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

//! Bridge client
//!
//! Owns the helper process, the pipe and the connection state behind one
//! lock. Requests are serialized through that lock: the protocol has no
//! request ids, so exchanges must never interleave.
//!
//! Host-facing calls never return errors. `get_statuses` degrades to the
//! last cached snapshot and `set_fixed_speed` queues the write for a single
//! background writer thread.

use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use lc_error::{BridgeError, ErrorKind, Result};
use lc_protocol::{DeviceStatus, FixedSpeedRequest, HandshakeResponse, PipeRequest};
use parking_lot::Mutex;
use serde::de::{DeserializeOwned, IgnoredAny};
use tracing::{debug, error, info, warn};

use crate::config::{validate_config, BridgeConfig};
use crate::constants::{timing::EXIT_POLL_MS, writer::THREAD_NAME};
use crate::process::{HelperProcess, ProcessSupervisor};
use crate::sensors::SpeedCommander;
use crate::transport::{NamedPipe, PipeConnector, PipeTransport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Ready,
    Faulted,
}

impl ConnectionState {
    /// Whether the state machine permits moving from `self` to `next`
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        match (self, next) {
            (_, Disconnected) => true,
            (Disconnected, Connecting) => true,
            (Connecting, Connecting | Connected | Faulted) => true,
            (Connected, Connecting | Ready | Faulted) => true,
            // Only reached through an explicit `initialize()`
            (Faulted, Connecting) => true,
            _ => false,
        }
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => ConnectionState::Connecting,
            2 => ConnectionState::Connected,
            3 => ConnectionState::Ready,
            4 => ConnectionState::Faulted,
            _ => ConnectionState::Disconnected,
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Ready => "ready",
            ConnectionState::Faulted => "faulted",
        };
        f.write_str(name)
    }
}

/// Last successful `get.statuses` snapshot
#[derive(Debug, Clone)]
pub struct CachedStatuses {
    pub statuses: Vec<DeviceStatus>,
    pub fetched_at: Instant,
}

impl CachedStatuses {
    pub fn new(statuses: Vec<DeviceStatus>) -> Self {
        Self {
            statuses,
            fetched_at: Instant::now(),
        }
    }

    pub fn age(&self) -> Duration {
        self.fetched_at.elapsed()
    }

    pub fn is_fresh(&self, expiry: Duration) -> bool {
        self.age() <= expiry
    }
}

/// Process handle, pipe handle and state; always locked together
struct Link {
    helper: Box<dyn HelperProcess>,
    transport: PipeTransport,
    state: ConnectionState,
    /// Copy of `state` readable without the lock
    published: Arc<AtomicU8>,
}

impl Link {
    fn transition(&mut self, next: ConnectionState) -> bool {
        if self.state == next {
            return true;
        }
        if !self.state.can_transition_to(next) {
            warn!(from = %self.state, to = %next, "Rejected state transition");
            return false;
        }
        debug!(from = %self.state, to = %next, "State transition");
        self.state = next;
        self.published.store(next as u8, Ordering::SeqCst);
        true
    }

    fn teardown(&mut self) {
        self.transport.close();
        self.helper.stop();
    }
}

struct ClientInner {
    config: BridgeConfig,
    link: Mutex<Link>,
    cache: Mutex<Option<CachedStatuses>>,
    state: Arc<AtomicU8>,
    shutdown: AtomicBool,
    /// Speed commands queued or in flight
    pending_writes: AtomicUsize,
}

struct SpeedWriter {
    sender: SyncSender<FixedSpeedRequest>,
    handle: JoinHandle<()>,
}

pub struct BridgeClient {
    inner: Arc<ClientInner>,
    writer: Mutex<Option<SpeedWriter>>,
}

impl BridgeClient {
    pub fn new(config: BridgeConfig) -> Self {
        let helper = Box::new(ProcessSupervisor::new(&config));
        let connector = Box::new(NamedPipe::new(config.pipe_name.clone()));
        Self::with_parts(config, helper, connector)
    }

    /// Build a client around an explicit helper and pipe connector
    pub fn with_parts(
        config: BridgeConfig,
        helper: Box<dyn HelperProcess>,
        connector: Box<dyn PipeConnector>,
    ) -> Self {
        if let Err(e) = validate_config(&config) {
            warn!("Invalid bridge configuration, zero retry budgets run once: {}", e);
        }
        let transport = PipeTransport::new(connector, config.framing, config.read_buffer_size);
        let published = Arc::new(AtomicU8::new(ConnectionState::Disconnected as u8));
        let inner = ClientInner {
            config,
            link: Mutex::new(Link {
                helper,
                transport,
                state: ConnectionState::Disconnected,
                published: Arc::clone(&published),
            }),
            state: published,
            cache: Mutex::new(None),
            shutdown: AtomicBool::new(false),
            pending_writes: AtomicUsize::new(0),
        };
        Self {
            inner: Arc::new(inner),
            writer: Mutex::new(None),
        }
    }

    /// Current state. Never waits on an exchange in flight.
    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.inner.state.load(Ordering::SeqCst))
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.inner.config
    }

    /// Bring up helper and pipe, then prime the cache.
    ///
    /// Runs up to `max_init_retries` attempts. When every attempt fails the
    /// client is `Faulted` and stays that way until `initialize` is called
    /// again.
    pub fn initialize(&self) -> bool {
        let inner = &self.inner;
        if inner.is_shutting_down() {
            warn!("initialize called after close");
            return false;
        }
        if self.state() == ConnectionState::Ready {
            return true;
        }

        let max = inner.config.max_init_retries.max(1);
        for attempt in 1..=max {
            if inner.is_shutting_down() {
                return false;
            }
            info!(attempt, max, "Initializing liquidctl bridge");

            match inner.try_initialize() {
                Ok(devices) => {
                    info!(devices, "Liquidctl bridge ready");
                    self.start_writer();
                    return true;
                }
                Err(e) => {
                    warn!(attempt, max, kind = %e.kind(), "Initialization attempt failed: {}", e);
                    inner.link.lock().teardown();
                    if attempt < max && !inner.sleep_unless_shutdown(inner.config.init_retry_delay()) {
                        return false;
                    }
                }
            }
        }

        let mut link = inner.link.lock();
        link.transition(ConnectionState::Faulted);
        error!(attempts = max, "Liquidctl bridge initialization failed, serving cached data only");
        false
    }

    /// Current device statuses. Never fails: on error the cached snapshot is
    /// returned, or an empty list when nothing was ever fetched.
    pub fn get_statuses(&self) -> Vec<DeviceStatus> {
        let inner = &self.inner;
        if inner.is_shutting_down() {
            return Vec::new();
        }

        if self.state() == ConnectionState::Ready {
            let request = PipeRequest::get_statuses();
            match inner.request_with_retry::<Vec<DeviceStatus>>(&request, inner.config.max_request_retries) {
                Ok(Some(devices)) => {
                    inner.store_cache(devices.clone());
                    return devices;
                }
                Ok(None) => warn!(command = %request.command, "Helper returned no data"),
                Err(e) => warn!(command = %request.command, kind = %e.kind(), "Status refresh failed: {}", e),
            }
        }

        inner.cached_statuses()
    }

    /// Queue a fixed-speed write. Returns immediately; failures are logged.
    pub fn set_fixed_speed(&self, device_id: i64, channel: &str, duty: i32) {
        if self.state() != ConnectionState::Ready {
            debug!(device_id, channel, duty, "Bridge not ready, ignoring speed change");
            return;
        }

        let writer = self.writer.lock();
        let Some(writer) = writer.as_ref() else {
            return;
        };
        self.inner.pending_writes.fetch_add(1, Ordering::SeqCst);
        let sent = writer.sender.try_send(FixedSpeedRequest::new(device_id, channel, duty));
        if sent.is_err() {
            self.inner.pending_writes.fetch_sub(1, Ordering::SeqCst);
        }
        match sent {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!(device_id, channel, duty, "Speed queue full, dropping command");
            }
            Err(TrySendError::Disconnected(_)) => {
                warn!(device_id, channel, duty, "Speed writer stopped, dropping command");
            }
        }
    }

    /// Block until every queued speed command was attempted, or the timeout passes
    pub fn wait_for_writes(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.inner.pending_writes.load(Ordering::SeqCst) > 0 {
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(EXIT_POLL_MS));
        }
        true
    }

    /// Stop the writer, close the pipe and stop the helper. Idempotent.
    pub fn close(&self) {
        let first = !self.inner.shutdown.swap(true, Ordering::SeqCst);

        let writer = self.writer.lock().take();
        if let Some(writer) = writer {
            drop(writer.sender);
            if writer.handle.join().is_err() {
                warn!("Speed writer thread panicked");
            }
        }

        let mut link = self.inner.link.lock();
        link.teardown();
        link.transition(ConnectionState::Disconnected);
        if first {
            info!("Liquidctl bridge closed");
        }
    }

    fn start_writer(&self) {
        let mut slot = self.writer.lock();
        if slot.is_some() {
            return;
        }

        let (sender, receiver) = mpsc::sync_channel(self.inner.config.write_queue_capacity.max(1));
        let inner = Arc::clone(&self.inner);
        let spawned = thread::Builder::new()
            .name(THREAD_NAME.to_string())
            .spawn(move || inner.run_writer(receiver));
        match spawned {
            Ok(handle) => *slot = Some(SpeedWriter { sender, handle }),
            Err(e) => error!("Failed to start speed writer: {}", e),
        }
    }
}

impl SpeedCommander for BridgeClient {
    fn set_fixed_speed(&self, device_id: i64, channel: &str, duty: i32) {
        BridgeClient::set_fixed_speed(self, device_id, channel, duty);
    }
}

impl Drop for BridgeClient {
    fn drop(&mut self) {
        self.close();
    }
}

impl ClientInner {
    fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Sleep in short slices; returns false if shutdown was requested
    fn sleep_unless_shutdown(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.is_shutting_down() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            thread::sleep((deadline - now).min(Duration::from_millis(EXIT_POLL_MS)));
        }
    }

    /// One initialization attempt; returns the number of devices found
    fn try_initialize(&self) -> Result<usize> {
        {
            let mut link = self.link.lock();
            link.transition(ConnectionState::Connecting);
            link.helper.ensure_running()?;
        }

        if !self.sleep_unless_shutdown(self.config.startup_grace()) {
            return Err(BridgeError::ShuttingDown);
        }

        {
            let mut link = self.link.lock();
            link.transport.try_connect(self.config.pipe_connect_timeout())?;
            link.transition(ConnectionState::Connected);
            info!(pipe = %link.transport.endpoint(), "Pipe connected");
        }

        if self.config.handshake {
            let ack = self.exchange::<HandshakeResponse>(&PipeRequest::handshake())?;
            if !ack.is_some_and(|ack| ack.shake) {
                return Err(BridgeError::HandshakeRejected);
            }
        }

        let devices = self
            .exchange::<Vec<DeviceStatus>>(&PipeRequest::get_statuses())?
            .unwrap_or_default();
        if devices.is_empty() {
            return Err(BridgeError::NoDevices);
        }
        let count = devices.len();
        self.store_cache(devices);

        let mut link = self.link.lock();
        if !link.transition(ConnectionState::Ready) {
            return Err(BridgeError::ShuttingDown);
        }
        Ok(count)
    }

    /// Single request/response round trip.
    ///
    /// Transport failures drop the pipe handle so the next call reconnects.
    /// Decode failures and helper-reported errors leave the pipe open.
    fn exchange<T: DeserializeOwned>(&self, request: &PipeRequest) -> Result<Option<T>> {
        request.validate().map_err(BridgeError::InvalidRequest)?;
        let payload = lc_protocol::encode_request(request)?;

        let bytes = {
            let mut link = self.link.lock();
            link.transport.try_connect(self.config.pipe_connect_timeout())?;
            link.transport.write(&payload)?;
            link.transport.read(self.config.request_timeout())?
        };

        let response = lc_protocol::decode_response::<T>(&bytes)?;
        response.into_data().map_err(BridgeError::Domain)
    }

    fn request_with_retry<T: DeserializeOwned>(&self, request: &PipeRequest, attempts: u32) -> Result<Option<T>> {
        let command = request.type_name();
        let attempts = attempts.max(1);
        let mut last: Option<BridgeError> = None;

        for attempt in 1..=attempts {
            if self.is_shutting_down() {
                return Err(BridgeError::ShuttingDown);
            }

            match self.exchange::<T>(request) {
                Ok(data) => return Ok(data),
                Err(e @ BridgeError::InvalidRequest(_)) => return Err(e),
                Err(e) if e.kind() == ErrorKind::Domain => {
                    warn!(command, "Helper rejected request: {}", e);
                    return Err(e);
                }
                Err(e) => {
                    warn!(command, attempt, max = attempts, kind = %e.kind(), "Request failed: {}", e);
                    if e.requires_reconnect() {
                        self.link.lock().transport.close();
                    }
                    last = Some(e);
                }
            }

            if attempt < attempts && !self.sleep_unless_shutdown(self.config.request_retry_delay()) {
                return Err(BridgeError::ShuttingDown);
            }
        }

        Err(BridgeError::Exhausted {
            operation: command.to_string(),
            attempts,
            last: last.map(|e| e.to_string()).unwrap_or_default(),
        })
    }

    fn store_cache(&self, statuses: Vec<DeviceStatus>) {
        *self.cache.lock() = Some(CachedStatuses::new(statuses));
    }

    fn cached_statuses(&self) -> Vec<DeviceStatus> {
        let cache = self.cache.lock();
        match cache.as_ref() {
            Some(cached) => {
                let stale = !cached.is_fresh(self.config.cache_expiry());
                warn!(
                    stale,
                    age_ms = cached.age().as_millis() as u64,
                    devices = cached.statuses.len(),
                    "Serving cached statuses"
                );
                cached.statuses.clone()
            }
            None => Vec::new(),
        }
    }

    fn run_writer(&self, receiver: Receiver<FixedSpeedRequest>) {
        while let Ok(request) = receiver.recv() {
            if self.is_shutting_down() {
                break;
            }
            let device_id = request.device_id;
            let duty = request.speed_kwargs.duty;
            let channel = request.speed_kwargs.channel.clone();

            let pipe_request = PipeRequest::set_fixed_speed(request);
            match self.request_with_retry::<IgnoredAny>(&pipe_request, self.config.set_speed_retries) {
                Ok(_) => debug!(device_id, channel = %channel, duty, "Applied fixed speed"),
                Err(e) => warn!(
                    device_id,
                    channel = %channel,
                    duty,
                    kind = %e.kind(),
                    "set.fixed_speed failed: {}",
                    e
                ),
            }
            self.pending_writes.fetch_sub(1, Ordering::SeqCst);
        }
        debug!("Speed writer exiting");
    }
}
