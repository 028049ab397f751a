use serde::{Deserialize, Serialize};

/// Selectable ECU wire protocol. Chosen at construction, never at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolKind {
    Plain,
    Framed,
}

/// GPS operating mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GpsMode {
    Nmea,
    Disabled,
    Simulator,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EcuConfig {
    pub port_path: String,
    #[serde(default = "default_ecu_baud")]
    pub baud_rate: u32,
    #[serde(default)]
    pub can_id: u8,
    #[serde(default = "default_stoich")]
    pub stoich: f32,
    pub protocol: ProtocolKind,
}

fn default_ecu_baud() -> u32 {
    115_200
}

fn default_stoich() -> f32 {
    14.7
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GpsConfig {
    pub port_path: String,
    #[serde(default = "default_gps_baud")]
    pub baud_rate: u32,
    #[serde(default = "default_gps_mode")]
    pub mode: GpsMode,
}

fn default_gps_baud() -> u32 {
    9600
}

fn default_gps_mode() -> GpsMode {
    GpsMode::Nmea
}

/// Frozen view of the core's configuration. Constructed once by the
/// embedder before start and read-only during operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub ecu: EcuConfig,
    pub gps: GpsConfig,
    #[serde(default = "default_poll_hz")]
    pub poll_hz: u32,
    pub odometer_path: String,
}

fn default_poll_hz() -> u32 {
    20
}

impl Config {
    pub fn poll_period(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f64(1.0 / f64::from(self.poll_hz.max(1)))
    }
}
