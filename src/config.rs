/// Gateway configuration
///
/// Configuration is split into sections mirroring the gateway's moving
/// parts: the serial bus, the network listener, the GPIO ready line and
/// logging. Every field has a default matching the controller hardware,
/// so an empty file (or no file at all) yields a working setup.

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::net::{IpAddr, SocketAddr};
use std::path::Path;

use crate::error::{HvlinkError, HvlinkResult};
use crate::gpio::{DEFAULT_READY_LINE, GPIO_LINE_MAX};
use crate::protocol::DEFAULT_PORT;

/// Serial bus configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerialConfig {
    /// Serial device path
    pub port: String,
    /// Baud rate (the modules are fixed at 38400)
    pub baud_rate: u32,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyAMA0".to_string(),
            baud_rate: 38_400,
        }
    }
}

/// Network listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Address to bind the session listener to
    pub bind_address: String,
    /// TCP port for sessions
    pub port: u16,
    /// Maximum concurrent client sessions
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

fn default_max_connections() -> usize {
    32
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            max_connections: default_max_connections(),
        }
    }
}

impl NetworkConfig {
    /// Combine address and port into a socket address
    pub fn socket_addr(&self) -> HvlinkResult<SocketAddr> {
        let ip: IpAddr = self.bind_address.parse().map_err(|e| {
            HvlinkError::configuration(format!(
                "Invalid bind address '{}': {}",
                self.bind_address, e
            ))
        })?;
        Ok(SocketAddr::new(ip, self.port))
    }
}

/// GPIO configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GpioConfig {
    /// GPIO line wired to the module attention signal
    pub ready_line: u8,
}

impl Default for GpioConfig {
    fn default() -> Self {
        Self {
            ready_line: DEFAULT_READY_LINE,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    pub level: String,
    /// Log every serial frame at info level
    #[serde(default)]
    pub packet_logging: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            packet_logging: false,
        }
    }
}

/// Top-level gateway configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Serial bus configuration
    #[serde(default)]
    pub serial: SerialConfig,
    /// Network listener configuration
    #[serde(default)]
    pub network: NetworkConfig,
    /// GPIO configuration
    #[serde(default)]
    pub gpio: GpioConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl GatewayConfig {
    /// Load configuration from a YAML or JSON file
    pub fn from_file(path: &Path) -> HvlinkResult<Self> {
        let mut file = File::open(path).map_err(|e| {
            HvlinkError::configuration(format!("Failed to open {}: {}", path.display(), e))
        })?;

        let mut content = String::new();
        file.read_to_string(&mut content).map_err(|e| {
            HvlinkError::configuration(format!("Failed to read {}: {}", path.display(), e))
        })?;

        let config = match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => serde_yaml::from_str(&content)?,
            Some("json") => serde_json::from_str(&content)?,
            _ => {
                return Err(HvlinkError::configuration(format!(
                    "Unsupported config format: {}",
                    path.display()
                )));
            }
        };

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> HvlinkResult<()> {
        if self.serial.port.is_empty() {
            return Err(HvlinkError::configuration("Serial port path is empty"));
        }

        if self.serial.baud_rate == 0 {
            return Err(HvlinkError::configuration("Baud rate must be non-zero"));
        }

        if self.gpio.ready_line > GPIO_LINE_MAX {
            return Err(HvlinkError::configuration(format!(
                "GPIO ready line {} out of range (0-{})",
                self.gpio.ready_line, GPIO_LINE_MAX
            )));
        }

        if self.network.max_connections == 0 {
            return Err(HvlinkError::configuration(
                "max_connections must be at least 1",
            ));
        }

        self.network.socket_addr()?;

        match self.logging.level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            other => {
                return Err(HvlinkError::configuration(format!(
                    "Unknown log level: {}",
                    other
                )));
            }
        }

        Ok(())
    }
}
