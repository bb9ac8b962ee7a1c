use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Logical name of the helper's pipe
pub const PIPE_NAME: &str = "LiquidCtlPipe";

/// Maximum message size for one pipe exchange (64KB)
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Size of the little-endian length prefix used by length-prefixed framing
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Maximum channel name length accepted in a write request
const MAX_CHANNEL_LENGTH: usize = 64;

pub const UNIT_CELSIUS: &str = "°C";
pub const UNIT_RPM: &str = "rpm";
pub const UNIT_PERCENT: &str = "%";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Command {
    #[serde(rename = "get.statuses")]
    GetStatuses,
    #[serde(rename = "set.fixed_speed")]
    SetFixedSpeed,
    #[serde(rename = "handshake")]
    Handshake,
}

impl Command {
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::GetStatuses => "get.statuses",
            Command::SetFixedSpeed => "set.fixed_speed",
            Command::Handshake => "handshake",
        }
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpeedKwargs {
    pub channel: String,
    /// Integer percentage; range enforcement is the helper's concern
    pub duty: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixedSpeedRequest {
    pub device_id: i64,
    pub speed_kwargs: SpeedKwargs,
}

impl FixedSpeedRequest {
    pub fn new(device_id: i64, channel: impl Into<String>, duty: i32) -> Self {
        Self {
            device_id,
            speed_kwargs: SpeedKwargs {
                channel: channel.into(),
                duty,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipeRequest {
    pub command: Command,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<FixedSpeedRequest>,
}

impl PipeRequest {
    pub fn get_statuses() -> Self {
        Self { command: Command::GetStatuses, data: None }
    }

    pub fn handshake() -> Self {
        Self { command: Command::Handshake, data: None }
    }

    pub fn set_fixed_speed(request: FixedSpeedRequest) -> Self {
        Self { command: Command::SetFixedSpeed, data: Some(request) }
    }

    /// Validate request parameters before sending to the helper
    pub fn validate(&self) -> Result<(), String> {
        match (&self.command, &self.data) {
            (Command::GetStatuses | Command::Handshake, None) => Ok(()),
            (Command::GetStatuses | Command::Handshake, Some(_)) => {
                Err(format!("{} does not take a payload", self.command))
            }
            (Command::SetFixedSpeed, None) => Err("set.fixed_speed requires a payload".into()),
            (Command::SetFixedSpeed, Some(data)) => validate_channel(&data.speed_kwargs.channel),
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.command.as_str()
    }
}

fn validate_channel(channel: &str) -> Result<(), String> {
    if channel.trim().is_empty() {
        return Err("Channel cannot be empty".into());
    }
    if channel.len() > MAX_CHANNEL_LENGTH {
        return Err(format!(
            "Channel too long: {} > {} chars",
            channel.len(),
            MAX_CHANNEL_LENGTH
        ));
    }
    if channel.chars().any(|c| c.is_control()) {
        return Err(format!("Channel contains control characters: {:?}", channel));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Success,
    Error,
}

/// Response envelope; `status` decides whether `data` or `error` is meaningful
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeResponse<T> {
    pub status: ResponseStatus,
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> BridgeResponse<T> {
    pub fn success(data: Option<T>) -> Self {
        Self { status: ResponseStatus::Success, data, error: None }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self { status: ResponseStatus::Error, data: None, error: Some(message.into()) }
    }

    pub fn is_success(&self) -> bool {
        self.status == ResponseStatus::Success
    }

    /// Split on the status discriminant: data for success, the helper's message for error
    pub fn into_data(self) -> Result<Option<T>, String> {
        match self.status {
            ResponseStatus::Success => Ok(self.data),
            ResponseStatus::Error => Err(self
                .error
                .unwrap_or_else(|| "helper returned an error without a message".to_string())),
        }
    }
}

/// One named measurement or control channel at one point in time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusValue {
    pub key: String,
    pub value: Option<f64>,
    pub unit: String,
}

impl StatusValue {
    pub fn new(key: impl Into<String>, value: Option<f64>, unit: impl Into<String>) -> Self {
        Self { key: key.into(), value, unit: unit.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceStatus {
    /// Helper's numeric device handle, stable for the life of the helper process
    pub id: i64,
    /// Model name; unique per physical device within one snapshot
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bus: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    pub status: Vec<StatusValue>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeResponse {
    pub shake: bool,
}

/// Serialize a request to its wire bytes
pub fn encode_request(request: &PipeRequest) -> serde_json::Result<Vec<u8>> {
    serde_json::to_vec(request)
}

/// Decode a response body, tolerating trailing newlines and NUL padding
pub fn decode_response<T: DeserializeOwned>(bytes: &[u8]) -> serde_json::Result<BridgeResponse<T>> {
    let end = bytes
        .iter()
        .rposition(|b| !matches!(b, b'\n' | b'\r' | 0))
        .map_or(0, |i| i + 1);
    serde_json::from_slice(&bytes[..end])
}

/// Prepend the little-endian length prefix to a payload
pub fn frame_length_prefixed(payload: &[u8]) -> Result<Vec<u8>, String> {
    if payload.len() > MAX_MESSAGE_SIZE {
        return Err(format!(
            "Payload too large: {} > {} bytes",
            payload.len(),
            MAX_MESSAGE_SIZE
        ));
    }
    let mut framed = Vec::with_capacity(LENGTH_PREFIX_SIZE + payload.len());
    framed.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    framed.extend_from_slice(payload);
    Ok(framed)
}

/// Read the body length out of a length prefix
pub fn parse_length_prefix(prefix: [u8; LENGTH_PREFIX_SIZE]) -> usize {
    u32::from_le_bytes(prefix) as usize
}
