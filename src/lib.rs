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

//! liquidctl-bridge - liquid cooling devices for a monitoring host
//!
//! This library supervises the `liquidctl_server` helper process, talks to it
//! over a local named pipe, and exposes its devices as temperature, speed and
//! control sensors.

pub mod constants;
pub mod config;
pub mod logger;
pub mod channel_names;
pub mod process;
pub mod transport;
pub mod client;
pub mod sensors;
pub mod plugin;

pub use client::{BridgeClient, ConnectionState};
pub use config::BridgeConfig;
pub use plugin::LiquidctlPlugin;
pub use sensors::{Sensor, SensorContainer, SensorKind, SensorRegistry, SensorUnit, SharedSensor};

#[cfg(test)]
pub mod test_utils;
