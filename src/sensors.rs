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

//! Sensors built from device snapshots
//!
//! Every recognized channel becomes one [`Sensor`], indexed by its derived
//! id. Later snapshots replace the held [`StatusValue`] of existing sensors;
//! the sensor objects themselves are never replaced, so references handed
//! to the host stay valid.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use lc_protocol::{DeviceStatus, StatusValue, UNIT_CELSIUS, UNIT_PERCENT, UNIT_RPM};
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::channel_names::{canonical_channel, sensor_id, sensor_name, speed_key_from_duty_key};

/// Write path used by control sensors
#[cfg_attr(test, mockall::automock)]
pub trait SpeedCommander: Send + Sync {
    fn set_fixed_speed(&self, device_id: i64, channel: &str, duty: i32);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SensorUnit {
    Temperature,
    Speed,
    Percent,
}

impl SensorUnit {
    /// Recognized units only; anything else is not exposed as a sensor
    pub fn from_unit(unit: &str) -> Option<Self> {
        match unit {
            UNIT_CELSIUS => Some(SensorUnit::Temperature),
            UNIT_RPM => Some(SensorUnit::Speed),
            UNIT_PERCENT => Some(SensorUnit::Percent),
            _ => None,
        }
    }
}

/// Extra state carried by writable channels
pub struct ControlState {
    pub device_id: i64,
    /// Canonical channel name sent with `set.fixed_speed`
    pub write_channel: String,
    /// Value seen when the sensor was created; restored by `reset`
    pub initial: Option<f32>,
    /// Read-only speed sensor measuring the same physical channel
    pub paired_id: Option<String>,
    commander: Arc<dyn SpeedCommander>,
}

impl fmt::Debug for ControlState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControlState")
            .field("device_id", &self.device_id)
            .field("write_channel", &self.write_channel)
            .field("initial", &self.initial)
            .field("paired_id", &self.paired_id)
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
pub enum SensorKind {
    Readonly,
    Control(ControlState),
}

#[derive(Debug)]
pub struct Sensor {
    id: String,
    name: String,
    description: String,
    unit: SensorUnit,
    channel: Arc<StatusValue>,
    kind: SensorKind,
}

pub type SharedSensor = Arc<RwLock<Sensor>>;

impl Sensor {
    fn new(device: &DeviceStatus, channel: &StatusValue, unit: SensorUnit, commander: &Arc<dyn SpeedCommander>) -> Self {
        let channel = Arc::new(channel.clone());
        let kind = match unit {
            SensorUnit::Percent => SensorKind::Control(ControlState {
                device_id: device.id,
                write_channel: canonical_channel(&channel.key),
                initial: channel.value.map(|v| v as f32),
                paired_id: None,
                commander: Arc::clone(commander),
            }),
            SensorUnit::Temperature | SensorUnit::Speed => SensorKind::Readonly,
        };
        Self {
            id: sensor_id(&device.description, &channel.key),
            name: sensor_name(&device.description, &channel.key),
            description: device.description.clone(),
            unit,
            channel,
            kind,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Description of the device this channel belongs to
    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn unit(&self) -> SensorUnit {
        self.unit
    }

    /// Raw channel key as reported by the helper
    pub fn key(&self) -> &str {
        &self.channel.key
    }

    pub fn value(&self) -> Option<f32> {
        self.channel.value.map(|v| v as f32)
    }

    pub fn kind(&self) -> &SensorKind {
        &self.kind
    }

    pub fn is_control(&self) -> bool {
        matches!(self.kind, SensorKind::Control(_))
    }

    pub fn control(&self) -> Option<&ControlState> {
        match &self.kind {
            SensorKind::Control(state) => Some(state),
            SensorKind::Readonly => None,
        }
    }

    pub fn paired_id(&self) -> Option<&str> {
        self.control().and_then(|c| c.paired_id.as_deref())
    }

    fn replace_channel(&mut self, channel: &StatusValue) {
        self.channel = Arc::new(channel.clone());
    }

    /// Command a duty. Rounds half away from zero; range checks belong to the helper.
    /// No-op on read-only sensors and for NaN or infinite values.
    pub fn set(&self, value: f32) {
        if let SensorKind::Control(state) = &self.kind {
            if !value.is_finite() {
                warn!(sensor = %self.id, value, "Ignoring non-finite duty");
                return;
            }
            let duty = value.round() as i32;
            debug!(sensor = %self.id, duty, "Setting control");
            state.commander.set_fixed_speed(state.device_id, &state.write_channel, duty);
        }
    }

    /// Restore the value captured at creation, if any
    pub fn reset(&self) {
        if let Some(initial) = self.control().and_then(|c| c.initial) {
            self.set(initial);
        }
    }
}

/// Sensors handed to the host, bucketed by role
#[derive(Debug, Default)]
pub struct SensorContainer {
    pub temperature_sensors: Vec<SharedSensor>,
    pub speed_sensors: Vec<SharedSensor>,
    pub control_sensors: Vec<SharedSensor>,
}

impl SensorContainer {
    pub fn len(&self) -> usize {
        self.temperature_sensors.len() + self.speed_sensors.len() + self.control_sensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = &SharedSensor> {
        self.temperature_sensors
            .iter()
            .chain(self.speed_sensors.iter())
            .chain(self.control_sensors.iter())
    }
}

pub struct SensorRegistry {
    sensors: HashMap<String, SharedSensor>,
    commander: Arc<dyn SpeedCommander>,
}

impl SensorRegistry {
    pub fn new(commander: Arc<dyn SpeedCommander>) -> Self {
        Self {
            sensors: HashMap::new(),
            commander,
        }
    }

    /// Create sensors for every recognized channel, then pair controls with
    /// their speed sensors. Returns the number of sensors created.
    pub fn load(&mut self, devices: &[DeviceStatus], container: &mut SensorContainer) -> usize {
        let mut created = 0;
        for device in devices {
            for channel in &device.status {
                let Some(unit) = SensorUnit::from_unit(&channel.unit) else {
                    continue;
                };
                if channel.value.is_none() {
                    continue;
                }

                let id = sensor_id(&device.description, &channel.key);
                if let Some(existing) = self.sensors.get(&id) {
                    existing.write().replace_channel(channel);
                    continue;
                }

                let shared = Arc::new(RwLock::new(Sensor::new(device, channel, unit, &self.commander)));
                match unit {
                    SensorUnit::Temperature => container.temperature_sensors.push(Arc::clone(&shared)),
                    SensorUnit::Speed => container.speed_sensors.push(Arc::clone(&shared)),
                    SensorUnit::Percent => container.control_sensors.push(Arc::clone(&shared)),
                }
                self.sensors.insert(id, shared);
                created += 1;
            }
        }

        let paired = self.pair_controls();
        info!(created, paired, "Loaded liquidctl sensors");
        created
    }

    /// Link each control sensor to the read-only sensor whose key is the
    /// control's key with "duty" replaced by "speed". Returns pairs made.
    pub fn pair_controls(&self) -> usize {
        let mut pairs = Vec::new();
        for (id, sensor) in &self.sensors {
            let sensor = sensor.read();
            if !sensor.is_control() {
                continue;
            }
            let expected = sensor_id(sensor.description(), &speed_key_from_duty_key(sensor.key()));
            if expected == *id {
                continue;
            }
            let target_is_readonly = self
                .sensors
                .get(&expected)
                .is_some_and(|target| !target.read().is_control());
            if target_is_readonly {
                pairs.push((id.clone(), expected));
            }
        }

        for (control_id, target_id) in &pairs {
            if let Some(sensor) = self.sensors.get(control_id) {
                if let SensorKind::Control(state) = &mut sensor.write().kind {
                    debug!(control = %control_id, speed = %target_id, "Paired control sensor");
                    state.paired_id = Some(target_id.clone());
                }
            }
        }
        pairs.len()
    }

    /// Push new values into existing sensors. Never creates sensors.
    /// Returns the number of sensors updated.
    pub fn update(&self, devices: &[DeviceStatus]) -> usize {
        let mut updated = 0;
        for device in devices {
            for channel in &device.status {
                if channel.value.is_none() {
                    continue;
                }
                let id = sensor_id(&device.description, &channel.key);
                if let Some(sensor) = self.sensors.get(&id) {
                    sensor.write().replace_channel(channel);
                    updated += 1;
                }
            }
        }
        updated
    }

    pub fn get(&self, id: &str) -> Option<SharedSensor> {
        self.sensors.get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.sensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sensors.is_empty()
    }

    /// Set a control sensor by id. Returns false if no such control exists.
    pub fn set(&self, id: &str, value: f32) -> bool {
        match self.sensors.get(id) {
            Some(sensor) if sensor.read().is_control() => {
                sensor.read().set(value);
                true
            }
            _ => false,
        }
    }

    /// Reset a control sensor by id. Returns false if no such control exists.
    pub fn reset(&self, id: &str) -> bool {
        match self.sensors.get(id) {
            Some(sensor) if sensor.read().is_control() => {
                sensor.read().reset();
                true
            }
            _ => false,
        }
    }
}
