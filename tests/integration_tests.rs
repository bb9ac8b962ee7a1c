/*
 * Integration tests for liquidctl-bridge
 *
 * These tests drive the public plugin surface end-to-end against a minimal
 * helper that speaks the pipe protocol over a Unix socket.
 */

use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use liquidctl_bridge::config::{load_config, save_config};
use liquidctl_bridge::{BridgeConfig, ConnectionState, LiquidctlPlugin, SensorContainer};
use serial_test::serial;
use tempfile::{NamedTempFile, TempDir};

fn quick_config() -> BridgeConfig {
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

#[test]
#[serial]
fn test_missing_helper_binary_degrades() {
    let dir = TempDir::new().unwrap();
    let config = BridgeConfig {
        helper_path: Some(dir.path().join("liquidctl_server")),
        pipe_name: dir.path().join("pipe").to_string_lossy().into_owned(),
        ..quick_config()
    };

    let mut plugin = LiquidctlPlugin::new(config);
    assert!(!plugin.initialize());
    assert_eq!(plugin.state(), ConnectionState::Faulted);

    let mut container = SensorContainer::default();
    assert_eq!(plugin.load(&mut container), 0);
    assert_eq!(plugin.update(), 0);

    plugin.close();
    plugin.close();
    assert_eq!(plugin.state(), ConnectionState::Disconnected);
}

#[test]
fn test_config_file_round_trip_drives_plugin_settings() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("bridge.json");
    let config = BridgeConfig {
        helper_path: Some(PathBuf::from("/opt/liquidctl/liquidctl_server")),
        handshake: false,
        max_request_retries: 5,
        ..BridgeConfig::default()
    };
    save_config(&path, &config).unwrap();

    let loaded = load_config(&path).unwrap();
    assert_eq!(loaded, config);
    assert_eq!(loaded.resolved_process_name(), "liquidctl_server");
}

#[test]
fn test_invalid_config_file_rejected() {
    let mut file = NamedTempFile::new().unwrap();
    write!(file, r#"{{"max_init_retries": 0}}"#).unwrap();
    assert!(load_config(file.path()).is_err());
}

#[cfg(unix)]
mod unix {
    use super::*;
    use std::io::Read;
    use std::os::unix::net::UnixListener;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;
    use std::thread::{self, JoinHandle};

    use liquidctl_bridge::client::BridgeClient;
    use liquidctl_bridge::process::HelperProcess;
    use liquidctl_bridge::transport::NamedPipe;
    use serde_json::{json, Value};

    /// Helper process double; the socket server below plays the helper
    struct AlwaysRunning;

    impl HelperProcess for AlwaysRunning {
        fn ensure_running(&mut self) -> lc_error::Result<()> {
            Ok(())
        }

        fn is_running(&mut self) -> bool {
            true
        }

        fn stop(&mut self) {}
    }

    struct Helper {
        _dir: TempDir,
        path: PathBuf,
        alive: Arc<AtomicBool>,
        devices: Arc<Mutex<Value>>,
        writes: Arc<Mutex<Vec<Value>>>,
        thread: Option<JoinHandle<()>>,
    }

    impl Helper {
        fn start(devices: Value) -> Self {
            let dir = TempDir::new().unwrap();
            let path = dir.path().join("LiquidCtlPipe");
            let listener = UnixListener::bind(&path).unwrap();
            listener.set_nonblocking(true).unwrap();

            let alive = Arc::new(AtomicBool::new(true));
            let devices = Arc::new(Mutex::new(devices));
            let writes = Arc::new(Mutex::new(Vec::new()));

            let (t_alive, t_devices, t_writes) = (alive.clone(), devices.clone(), writes.clone());
            let thread = thread::spawn(move || {
                while t_alive.load(Ordering::SeqCst) {
                    let Ok((mut conn, _)) = listener.accept() else {
                        thread::sleep(Duration::from_millis(5));
                        continue;
                    };
                    conn.set_nonblocking(false).unwrap();
                    conn.set_read_timeout(Some(Duration::from_millis(50))).unwrap();
                    let mut buf = vec![0u8; 65536];
                    while t_alive.load(Ordering::SeqCst) {
                        let n = match conn.read(&mut buf) {
                            Ok(0) => break,
                            Ok(n) => n,
                            Err(_) => continue,
                        };
                        let request: Value = serde_json::from_slice(&buf[..n]).unwrap();
                        let reply = match request["command"].as_str() {
                            Some("handshake") => json!({"status": "success", "data": {"shake": true}}),
                            Some("get.statuses") => {
                                json!({"status": "success", "data": t_devices.lock().unwrap().clone()})
                            }
                            Some("set.fixed_speed") => {
                                t_writes.lock().unwrap().push(request["data"].clone());
                                json!({"status": "success", "data": null})
                            }
                            _ => json!({"status": "error", "error": "unknown command"}),
                        };
                        conn.write_all(reply.to_string().as_bytes()).unwrap();
                    }
                }
            });

            Self {
                _dir: dir,
                path,
                alive,
                devices,
                writes,
                thread: Some(thread),
            }
        }

        fn plugin(&self) -> LiquidctlPlugin {
            let client = BridgeClient::with_parts(
                quick_config(),
                Box::new(AlwaysRunning),
                Box::new(NamedPipe::new(self.path.to_string_lossy().into_owned())),
            );
            LiquidctlPlugin::with_client(Arc::new(client))
        }
    }

    impl Drop for Helper {
        fn drop(&mut self) {
            self.alive.store(false, Ordering::SeqCst);
            if let Some(thread) = self.thread.take() {
                let _ = thread.join();
            }
        }
    }

    fn kraken(temp: f64) -> Value {
        json!([{
            "id": 1,
            "description": "NZXT Kraken X53",
            "bus": "hid",
            "address": "/dev/hidraw3",
            "status": [
                {"key": "Liquid temperature", "value": temp, "unit": "°C"},
                {"key": "Pump speed", "value": 2100.0, "unit": "rpm"},
                {"key": "Pump duty", "value": 50.0, "unit": "%"},
                {"key": "Firmware version", "value": null, "unit": ""}
            ]
        }])
    }

    #[test]
    #[serial]
    fn test_plugin_end_to_end() {
        let helper = Helper::start(kraken(30.0));
        let mut plugin = helper.plugin();

        assert!(plugin.initialize());
        assert_eq!(plugin.state(), ConnectionState::Ready);

        let mut container = SensorContainer::default();
        assert_eq!(plugin.load(&mut container), 3);

        let pump = container.control_sensors[0].clone();
        assert_eq!(pump.read().id(), "NZXTKrakenX53/Pumpduty");
        assert_eq!(pump.read().paired_id(), Some("NZXTKrakenX53/Pumpspeed"));

        *helper.devices.lock().unwrap() = kraken(34.5);
        assert_eq!(plugin.update(), 3);
        assert_eq!(container.temperature_sensors[0].read().value(), Some(34.5));

        pump.read().set(65.5);
        pump.read().reset();
        assert!(plugin.wait_for_writes(Duration::from_secs(3)));

        let writes = helper.writes.lock().unwrap().clone();
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[0]["device_id"], 1);
        assert_eq!(writes[0]["speed_kwargs"]["channel"], "pump");
        assert_eq!(writes[0]["speed_kwargs"]["duty"], 66);
        assert_eq!(writes[1]["speed_kwargs"]["duty"], 50);

        plugin.close();
        assert_eq!(plugin.state(), ConnectionState::Disconnected);
    }

    #[test]
    #[serial]
    fn test_values_survive_helper_loss() {
        let mut helper = Helper::start(kraken(30.0));
        let mut plugin = helper.plugin();
        assert!(plugin.initialize());

        let mut container = SensorContainer::default();
        plugin.load(&mut container);

        // Stop serving and remove the socket
        helper.alive.store(false, Ordering::SeqCst);
        if let Some(thread) = helper.thread.take() {
            thread.join().unwrap();
        }
        std::fs::remove_file(&helper.path).unwrap();

        assert_eq!(plugin.update(), 3);
        assert_eq!(container.temperature_sensors[0].read().value(), Some(30.0));
        assert_eq!(plugin.state(), ConnectionState::Ready);
    }
}
