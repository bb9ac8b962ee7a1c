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

//! Host-facing surface: initialize once, load once, update periodically, close once.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::client::{BridgeClient, ConnectionState};
use crate::config::BridgeConfig;
use crate::sensors::{SensorContainer, SensorRegistry, SpeedCommander};

pub struct LiquidctlPlugin {
    client: Arc<BridgeClient>,
    registry: SensorRegistry,
}

impl LiquidctlPlugin {
    pub const NAME: &'static str = "liquidctl";

    pub fn new(config: BridgeConfig) -> Self {
        Self::with_client(Arc::new(BridgeClient::new(config)))
    }

    pub fn with_client(client: Arc<BridgeClient>) -> Self {
        let commander: Arc<dyn SpeedCommander> = client.clone();
        Self {
            registry: SensorRegistry::new(commander),
            client,
        }
    }

    pub fn name(&self) -> &'static str {
        Self::NAME
    }

    pub fn initialize(&self) -> bool {
        self.client.initialize()
    }

    /// Enumerate sensors into the host's container. Returns the number created.
    pub fn load(&mut self, container: &mut SensorContainer) -> usize {
        let devices = self.client.get_statuses();
        let created = self.registry.load(&devices, container);
        info!(devices = devices.len(), sensors = created, "Loaded {} plugin", Self::NAME);
        created
    }

    /// Refresh values of already-loaded sensors
    pub fn update(&self) -> usize {
        let devices = self.client.get_statuses();
        let updated = self.registry.update(&devices);
        debug!(updated, "Updated sensors");
        updated
    }

    pub fn close(&self) {
        self.client.close();
    }

    pub fn state(&self) -> ConnectionState {
        self.client.state()
    }

    pub fn registry(&self) -> &SensorRegistry {
        &self.registry
    }

    /// Command a control sensor by id; false if it is not a known control
    pub fn set_control(&self, id: &str, value: f32) -> bool {
        self.registry.set(id, value)
    }

    pub fn reset_control(&self, id: &str) -> bool {
        self.registry.reset(id)
    }

    /// Wait for queued control writes to reach the helper
    pub fn wait_for_writes(&self, timeout: Duration) -> bool {
        self.client.wait_for_writes(timeout)
    }
}

impl Drop for LiquidctlPlugin {
    fn drop(&mut self) {
        self.client.close();
    }
}
