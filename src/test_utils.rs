/*
 * Test utilities for liquidctl-bridge
 *
 * Sample device snapshots, a stub helper process and a fake helper that
 * serves the pipe protocol over a Unix socket, shared by the unit tests.
 */

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use lc_error::{BridgeError, Result};
use lc_protocol::{DeviceStatus, StatusValue};

use crate::config::BridgeConfig;
use crate::process::HelperProcess;

/// Build a device snapshot from `(key, value, unit)` triples
pub fn device(id: i64, description: &str, channels: &[(&str, Option<f64>, &str)]) -> DeviceStatus {
    DeviceStatus {
        id,
        description: description.to_string(),
        bus: Some("hid".to_string()),
        address: None,
        status: channels
            .iter()
            .map(|(key, value, unit)| StatusValue::new(*key, *value, *unit))
            .collect(),
    }
}

pub fn kraken_x53() -> DeviceStatus {
    device(
        1,
        "NZXT Kraken X53",
        &[
            ("Liquid temperature", Some(31.5), "°C"),
            ("Pump speed", Some(2100.0), "rpm"),
            ("Pump duty", Some(50.0), "%"),
            ("Fan 1 speed", Some(1200.0), "rpm"),
            ("Fan 1 duty", Some(40.0), "%"),
            ("Firmware version", Some(1.0), "firmware"),
        ],
    )
}

pub fn sample_devices() -> Vec<DeviceStatus> {
    vec![
        kraken_x53(),
        device(
            2,
            "Corsair Hydro H100i Pro XT",
            &[
                ("Liquid temperature", Some(29.0), "°C"),
                ("Fan speed 1", Some(900.0), "rpm"),
                ("Pump speed", None, "rpm"),
            ],
        ),
    ]
}

/// Config with short timings so failure paths run quickly
pub fn test_config() -> BridgeConfig {
    BridgeConfig {
        startup_grace_ms: 0,
        init_retry_delay_ms: 10,
        request_retry_delay_ms: 10,
        pipe_connect_timeout_ms: 200,
        request_timeout_ms: 1000,
        shutdown_timeout_ms: 200,
        ..BridgeConfig::default()
    }
}

struct StubState {
    available: bool,
    running: AtomicBool,
    starts: AtomicUsize,
    stops: AtomicUsize,
}

/// Helper process double that only tracks lifecycle calls
#[derive(Clone)]
pub struct StubHelper {
    state: Arc<StubState>,
}

impl StubHelper {
    pub fn new() -> Self {
        Self::with_availability(true)
    }

    /// A helper whose executable cannot be found
    pub fn missing() -> Self {
        Self::with_availability(false)
    }

    fn with_availability(available: bool) -> Self {
        Self {
            state: Arc::new(StubState {
                available,
                running: AtomicBool::new(false),
                starts: AtomicUsize::new(0),
                stops: AtomicUsize::new(0),
            }),
        }
    }

    pub fn starts(&self) -> usize {
        self.state.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.state.stops.load(Ordering::SeqCst)
    }

    pub fn running(&self) -> bool {
        self.state.running.load(Ordering::SeqCst)
    }
}

impl HelperProcess for StubHelper {
    fn ensure_running(&mut self) -> Result<()> {
        if !self.state.available {
            return Err(BridgeError::BinaryMissing(PathBuf::from("liquidctl_server")));
        }
        if !self.state.running.swap(true, Ordering::SeqCst) {
            self.state.starts.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn is_running(&mut self) -> bool {
        self.running()
    }

    fn stop(&mut self) {
        if self.state.running.swap(false, Ordering::SeqCst) {
            self.state.stops.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[cfg(unix)]
pub use fake::FakeHelper;

#[cfg(unix)]
mod fake {
    use std::io::{self, Read, Write};
    use std::os::unix::net::{UnixListener, UnixStream};
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread::{self, JoinHandle};
    use std::time::Duration;

    use lc_protocol::{
        BridgeResponse, Command, DeviceStatus, FixedSpeedRequest, HandshakeResponse, PipeRequest, MAX_MESSAGE_SIZE,
    };
    use parking_lot::Mutex;
    use tempfile::TempDir;

    use crate::transport::NamedPipe;

    struct FakeState {
        alive: AtomicBool,
        devices: Mutex<Vec<DeviceStatus>>,
        handshake_ack: AtomicBool,
        drop_next: AtomicUsize,
        garble_next: AtomicUsize,
        speed_stall_ms: AtomicU64,
        connections: AtomicUsize,
        requests: Mutex<Vec<PipeRequest>>,
        handlers: Mutex<Vec<JoinHandle<()>>>,
    }

    /// In-process stand-in for `liquidctl_server` listening on a Unix socket
    pub struct FakeHelper {
        _dir: TempDir,
        path: PathBuf,
        state: Arc<FakeState>,
        accept_thread: Option<JoinHandle<()>>,
    }

    /// Decrement a counter if it is positive; true when it was
    fn take_one(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    impl FakeHelper {
        pub fn start(devices: Vec<DeviceStatus>) -> Self {
            let dir = TempDir::new().expect("temp dir");
            let path = dir.path().join("LiquidCtlPipe");
            let listener = UnixListener::bind(&path).expect("bind fake helper socket");
            listener.set_nonblocking(true).expect("nonblocking listener");

            let state = Arc::new(FakeState {
                alive: AtomicBool::new(true),
                devices: Mutex::new(devices),
                handshake_ack: AtomicBool::new(true),
                drop_next: AtomicUsize::new(0),
                garble_next: AtomicUsize::new(0),
                speed_stall_ms: AtomicU64::new(0),
                connections: AtomicUsize::new(0),
                requests: Mutex::new(Vec::new()),
                handlers: Mutex::new(Vec::new()),
            });

            let accept_state = Arc::clone(&state);
            let accept_thread = thread::spawn(move || accept_loop(listener, accept_state));

            Self {
                _dir: dir,
                path,
                state,
                accept_thread: Some(accept_thread),
            }
        }

        pub fn connector(&self) -> NamedPipe {
            NamedPipe::new(self.path.to_string_lossy().into_owned())
        }

        pub fn set_devices(&self, devices: Vec<DeviceStatus>) {
            *self.state.devices.lock() = devices;
        }

        pub fn set_handshake_ack(&self, ack: bool) {
            self.state.handshake_ack.store(ack, Ordering::SeqCst);
        }

        /// Close the connection instead of answering the next `n` requests
        pub fn drop_next(&self, n: usize) {
            self.state.drop_next.store(n, Ordering::SeqCst);
        }

        /// Answer the next `n` requests with undecodable bytes
        pub fn garble_next(&self, n: usize) {
            self.state.garble_next.store(n, Ordering::SeqCst);
        }

        /// Hold every `set.fixed_speed` reply back for `delay`
        pub fn stall_speed_writes(&self, delay: Duration) {
            self.state.speed_stall_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
        }

        pub fn connections(&self) -> usize {
            self.state.connections.load(Ordering::SeqCst)
        }

        pub fn commands(&self) -> Vec<Command> {
            self.state.requests.lock().iter().map(|r| r.command).collect()
        }

        pub fn speed_writes(&self) -> Vec<FixedSpeedRequest> {
            self.state
                .requests
                .lock()
                .iter()
                .filter_map(|r| r.data.clone())
                .collect()
        }

        /// Stop serving, close every connection and remove the socket
        pub fn stop(&mut self) {
            self.state.alive.store(false, Ordering::SeqCst);
            if let Some(handle) = self.accept_thread.take() {
                let _ = handle.join();
            }
            let handlers: Vec<_> = self.state.handlers.lock().drain(..).collect();
            for handle in handlers {
                let _ = handle.join();
            }
            let _ = std::fs::remove_file(&self.path);
        }
    }

    impl Drop for FakeHelper {
        fn drop(&mut self) {
            self.stop();
        }
    }

    fn accept_loop(listener: UnixListener, state: Arc<FakeState>) {
        while state.alive.load(Ordering::SeqCst) {
            match listener.accept() {
                Ok((conn, _)) => {
                    state.connections.fetch_add(1, Ordering::SeqCst);
                    let conn_state = Arc::clone(&state);
                    let handle = thread::spawn(move || serve(conn, conn_state));
                    state.handlers.lock().push(handle);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    thread::sleep(Duration::from_millis(5));
                }
                Err(_) => break,
            }
        }
    }

    fn serve(mut conn: UnixStream, state: Arc<FakeState>) {
        if conn.set_nonblocking(false).is_err()
            || conn.set_read_timeout(Some(Duration::from_millis(50))).is_err()
        {
            return;
        }

        let mut buf = vec![0u8; MAX_MESSAGE_SIZE];
        while state.alive.load(Ordering::SeqCst) {
            let n = match conn.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => continue,
                Err(_) => break,
            };
            let Ok(request) = serde_json::from_slice::<PipeRequest>(&buf[..n]) else {
                break;
            };
            state.requests.lock().push(request.clone());

            if take_one(&state.drop_next) {
                break;
            }
            let reply = if take_one(&state.garble_next) {
                b"not json".to_vec()
            } else {
                respond(&state, &request)
            };
            if conn.write_all(&reply).is_err() {
                break;
            }
        }
    }

    fn respond(state: &FakeState, request: &PipeRequest) -> Vec<u8> {
        let encoded = match request.command {
            Command::Handshake => {
                let shake = state.handshake_ack.load(Ordering::SeqCst);
                serde_json::to_vec(&BridgeResponse::success(Some(HandshakeResponse { shake })))
            }
            Command::GetStatuses => {
                let devices = state.devices.lock().clone();
                serde_json::to_vec(&BridgeResponse::success(Some(devices)))
            }
            Command::SetFixedSpeed => {
                let stall = state.speed_stall_ms.load(Ordering::SeqCst);
                if stall > 0 {
                    thread::sleep(Duration::from_millis(stall));
                }
                let device_id = request.data.as_ref().map(|d| d.device_id).unwrap_or_default();
                let known = state.devices.lock().iter().any(|d| d.id == device_id);
                if known {
                    serde_json::to_vec(&BridgeResponse::<()>::success(None))
                } else {
                    serde_json::to_vec(&BridgeResponse::<()>::error(format!("device {} not found", device_id)))
                }
            }
        };
        encoded.unwrap_or_default()
    }
}
