// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Configuration module.
//!
//! Handles loading and saving link settings.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::transport::ServiceId;

/// Standard SPP UUID.
pub const SPP_UUID: Uuid = Uuid::from_u128(0x00001101_0000_1000_8000_00805F9B34FB);

/// UART-style GATT service of the Zum Core board.
pub const ZUM_CORE_SERVICE_UUID: Uuid = Uuid::from_u128(0x6e400001_b5a3_f393_e0a9_e50e24dcca9e);

/// Characteristic the board notifies on (our read side).
pub const ZUM_CORE_READ_UUID: Uuid = Uuid::from_u128(0x6e400003_b5a3_f393_e0a9_e50e24dcca9e);

/// Characteristic we write to.
pub const ZUM_CORE_WRITE_UUID: Uuid = Uuid::from_u128(0x6e400002_b5a3_f393_e0a9_e50e24dcca9e);

/// Application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Session settings.
    pub link: LinkConfig,

    /// Classic RFCOMM socket settings.
    pub rfcomm: RfcommConfig,

    /// BLE GATT settings.
    pub ble: BleConfig,
}

/// Settings consumed by the link session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Read frames from the board. When false the connection is transmit-only.
    pub duplex: bool,

    /// Bytes requested per blocking read.
    pub read_chunk_size: usize,

    /// Name of the service record the listener registers.
    pub service_name: String,

    /// UUID of the service record the listener registers.
    pub service_uuid: Uuid,
}

impl LinkConfig {
    pub fn service_id(&self) -> ServiceId {
        ServiceId {
            name: self.service_name.clone(),
            uuid: self.service_uuid,
        }
    }
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            duplex: true,
            read_chunk_size: 1024,
            service_name: "BluetoothSocket".to_string(),
            service_uuid: SPP_UUID,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RfcommConfig {
    /// RFCOMM channel to listen on and connect to.
    pub channel: u8,
}

impl Default for RfcommConfig {
    fn default() -> Self {
        Self { channel: 1 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BleConfig {
    pub service_uuid: Uuid,
    pub read_characteristic: Uuid,
    pub write_characteristic: Uuid,

    /// MTU the board is expected to negotiate.
    pub preferred_mtu: usize,
}

impl Default for BleConfig {
    fn default() -> Self {
        Self {
            service_uuid: ZUM_CORE_SERVICE_UUID,
            read_characteristic: ZUM_CORE_READ_UUID,
            write_characteristic: ZUM_CORE_WRITE_UUID,
            preferred_mtu: 512,
        }
    }
}

fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("inolink")
}

impl Config {
    /// Load configuration from file or create default.
    pub fn load() -> Result<Self> {
        let config_dir = config_dir();
        std::fs::create_dir_all(&config_dir)?;

        let config_path = config_dir.join("config.toml");
        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            let config = Self::default();
            config.save_to(&config_path)?;
            Ok(config)
        }
    }

    /// Load configuration from an explicit path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<()> {
        self.save_to(&config_dir().join("config.toml"))
    }

    /// Save configuration to an explicit path.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
