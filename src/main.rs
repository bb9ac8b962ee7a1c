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

use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tracing::info;

use liquidctl_bridge::config::{load_config, validate_config};
use liquidctl_bridge::logger::init_logging;
use liquidctl_bridge::{BridgeConfig, LiquidctlPlugin, SensorContainer, SensorUnit};

#[derive(Parser)]
#[command(name = "liquidctl-bridge")]
#[command(version)]
#[command(about = "Expose liquidctl cooling devices through the liquidctl_server helper")]
#[command(long_about = "Expose liquidctl cooling devices through the liquidctl_server helper

EXAMPLES:
    liquidctl-bridge status                              Print one snapshot
    liquidctl-bridge watch --count 10 --interval-ms 1000
    liquidctl-bridge set NZXTKrakenX53/Pumpduty 70       Set pump duty to 70%
    liquidctl-bridge reset NZXTKrakenX53/Pumpduty        Restore the initial duty

ENVIRONMENT VARIABLES:
    RUST_LOG=debug         Override the configured log level")]
struct Cli {
    /// JSON configuration file; missing file means defaults
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Path to the liquidctl_server executable
    #[arg(long, global = true)]
    helper: Option<PathBuf>,

    /// Pipe name (or socket path on Unix)
    #[arg(long, global = true)]
    pipe: Option<String>,

    /// Log level filter, e.g. info or debug
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print every sensor once
    Status,

    /// Poll and print sensors repeatedly
    Watch {
        #[arg(long, default_value_t = 5)]
        count: u32,

        #[arg(long, default_value_t = 1000)]
        interval_ms: u64,
    },

    /// Set a control sensor to a duty percentage
    Set { sensor_id: String, duty: f32 },

    /// Restore a control sensor to the value seen at startup
    Reset { sensor_id: String },
}

fn build_config(cli: &Cli) -> anyhow::Result<BridgeConfig> {
    let mut config = match &cli.config {
        Some(path) => load_config(path).with_context(|| format!("loading {}", path.display()))?,
        None => BridgeConfig::default(),
    };
    if let Some(helper) = &cli.helper {
        config.helper_path = Some(helper.clone());
    }
    if let Some(pipe) = &cli.pipe {
        config.pipe_name = pipe.clone();
    }
    if let Some(level) = &cli.log_level {
        config.log_level = level.clone();
    }
    validate_config(&config)?;
    Ok(config)
}

fn unit_suffix(unit: SensorUnit) -> &'static str {
    match unit {
        SensorUnit::Temperature => lc_protocol::UNIT_CELSIUS,
        SensorUnit::Speed => lc_protocol::UNIT_RPM,
        SensorUnit::Percent => lc_protocol::UNIT_PERCENT,
    }
}

fn print_sensors(container: &SensorContainer) {
    println!("{:<40} {:<44} {:>10}  PAIRED", "ID", "NAME", "VALUE");
    for sensor in container.iter() {
        let sensor = sensor.read();
        let value = sensor
            .value()
            .map(|v| format!("{:.1} {}", v, unit_suffix(sensor.unit())))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<40} {:<44} {:>10}  {}",
            sensor.id(),
            sensor.name(),
            value,
            sensor.paired_id().unwrap_or("")
        );
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = build_config(&cli)?;
    init_logging(&config.log_level, cli.json_logs);

    let write_wait = config.request_timeout() * config.set_speed_retries.max(1);
    let mut plugin = LiquidctlPlugin::new(config);
    info!(plugin = LiquidctlPlugin::NAME, "Starting");
    if !plugin.initialize() {
        plugin.close();
        bail!("liquidctl bridge failed to initialize (state: {})", plugin.state());
    }

    let mut container = SensorContainer::default();
    plugin.load(&mut container);

    let result = match &cli.command {
        Commands::Status => {
            print_sensors(&container);
            Ok(())
        }
        Commands::Watch { count, interval_ms } => {
            for round in 0..*count {
                if round > 0 {
                    thread::sleep(Duration::from_millis(*interval_ms));
                    plugin.update();
                    println!();
                }
                print_sensors(&container);
            }
            Ok(())
        }
        Commands::Set { sensor_id, duty } => {
            if plugin.set_control(sensor_id, *duty) {
                plugin.wait_for_writes(write_wait);
                println!("{} -> {:.0}%", sensor_id, duty.round());
                Ok(())
            } else {
                Err(anyhow::anyhow!("{} is not a control sensor", sensor_id))
            }
        }
        Commands::Reset { sensor_id } => {
            if plugin.reset_control(sensor_id) {
                plugin.wait_for_writes(write_wait);
                println!("{} reset", sensor_id);
                Ok(())
            } else {
                Err(anyhow::anyhow!("{} is not a control sensor", sensor_id))
            }
        }
    };

    plugin.close();
    result
}
