//! Configuration module for the P1 node
//!
//! One [`NodeConfig`] is built per session, validated once, and then
//! passed down as `Arc<NodeConfig>` to every component that needs it.
//!
//! # Files
//!
//! Configurations are stored as TOML. Every field has a default, so a
//! partial file only needs the values that differ:
//!
//! ```toml
//! burst_size = 4
//! receive_mode = "conservative"
//!
//! [sensor]
//! size = { w = 4000, h = 3000 }
//!
//! [ports]
//! imgo = { w = 4000, h = 3000 }
//! rrzo = { w = 1920, h = 1440 }
//! ```
//!
//! # Example
//!
//! ```ignore
//! use p1node_rs::config::NodeConfig;
//!
//! let config = NodeConfig::load("p1node.toml")?;
//! assert!(config.depth_factor() >= 1);
//! config.save("p1node.toml")?;
//! ```

pub mod timing;

pub use timing::*;

use crate::error::{NodeError, Result};
use crate::types::{OutPort, RawType, ReceiveMode, Size};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default number of actions per job
pub const DEFAULT_BURST_SIZE: usize = 1;

/// Default number of pool buffers prepared per output port
pub const DEFAULT_QUEUE_DEPTH: usize = 8;

/// Default processing queue size above which the node logs a warning
pub const DEFAULT_PROCESS_DEPTH: usize = 3;

/// Default maximum resize ratio in percent (25 means at most 4x downscale)
pub const DEFAULT_MAX_RESIZE_RATIO_PERCENT: u32 = 25;

/// Largest burst the node accepts
pub const MAX_BURST_SIZE: usize = 16;

/// Default sensor output size
pub const DEFAULT_SENSOR_SIZE: Size = Size::new(4000, 3000);

// ==================== Magic Number Source ====================

/// Where magic numbers come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MagicSource {
    /// Ask the driver through `send_command`; fall back to a local counter
    #[default]
    Driver,
    /// Generate locally
    Local,
}

// ==================== Sensor ====================

fn default_sensor_size() -> Size {
    DEFAULT_SENSOR_SIZE
}

/// Sensor output description
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorConfig {
    /// Active pixel array size delivered by the sensor
    #[serde(default = "default_sensor_size")]
    pub size: Size,

    /// Sensor scenario/mode number, reported in hal metadata
    #[serde(default)]
    pub mode: u32,

    /// Rolling shutter skew reported in app metadata (ns)
    #[serde(default)]
    pub rolling_skew_ns: i64,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            size: DEFAULT_SENSOR_SIZE,
            mode: 0,
            rolling_skew_ns: 0,
        }
    }
}

// ==================== Ports ====================

/// Enabled hardware output ports and their buffer sizes
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PortConfig {
    #[serde(default)]
    pub imgo: Option<Size>,
    #[serde(default)]
    pub rrzo: Option<Size>,
    #[serde(default)]
    pub lcso: Option<Size>,
    #[serde(default)]
    pub rsso: Option<Size>,
}

impl PortConfig {
    /// Buffer size of a port, `None` if the port is disabled
    pub fn size(&self, port: OutPort) -> Option<Size> {
        match port {
            OutPort::Imgo => self.imgo,
            OutPort::Rrzo => self.rrzo,
            OutPort::Lcso => self.lcso,
            OutPort::Rsso => self.rsso,
        }
    }

    pub fn has(&self, port: OutPort) -> bool {
        self.size(port).is_some()
    }

    /// Enabled ports in fixed port order
    pub fn enabled(&self) -> Vec<OutPort> {
        OutPort::ALL.into_iter().filter(|p| self.has(*p)).collect()
    }
}

// ==================== Dump ====================

/// Diagnostic dump switches
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DumpConfig {
    /// Dump the processing queue when a dequeued buffer cannot be matched
    #[serde(default = "default_true")]
    pub processing_queue_on_mismatch: bool,

    /// Log each delivery batch at debug level
    #[serde(default)]
    pub delivery_batches: bool,
}

impl Default for DumpConfig {
    fn default() -> Self {
        Self {
            processing_queue_on_mismatch: true,
            delivery_batches: false,
        }
    }
}

fn default_true() -> bool {
    true
}

// ==================== Node Configuration ====================

fn default_burst_size() -> usize {
    DEFAULT_BURST_SIZE
}

fn default_queue_depth() -> usize {
    DEFAULT_QUEUE_DEPTH
}

fn default_process_depth() -> usize {
    DEFAULT_PROCESS_DEPTH
}

fn default_ports() -> PortConfig {
    PortConfig {
        imgo: Some(DEFAULT_SENSOR_SIZE),
        rrzo: Some(Size::new(1920, 1440)),
        lcso: None,
        rsso: None,
    }
}

fn default_max_resize_ratio_percent() -> u32 {
    DEFAULT_MAX_RESIZE_RATIO_PERCENT
}

/// Complete node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Actions per job
    #[serde(default = "default_burst_size")]
    pub burst_size: usize,

    /// Sensor receive mode
    #[serde(default)]
    pub receive_mode: ReceiveMode,

    /// Requests collected before hardware starts in request mode (0 = off)
    #[serde(default)]
    pub init_request_count: usize,

    /// Start the first job through 3A `start_capture`
    #[serde(default)]
    pub enable_capture_flow: bool,

    /// Pool buffers prepared per output port
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,

    /// Processing queue size above which a warning is logged
    #[serde(default = "default_process_depth")]
    pub process_depth: usize,

    /// Raw type used on the full-size port unless the request overrides it
    #[serde(default)]
    pub raw_type: RawType,

    #[serde(default)]
    pub sensor: SensorConfig,

    #[serde(default = "default_ports")]
    pub ports: PortConfig,

    #[serde(default)]
    pub timing: TimingConfig,

    #[serde(default)]
    pub dump: DumpConfig,

    #[serde(default)]
    pub magic_source: MagicSource,

    /// Maximum resize ratio in percent
    #[serde(default = "default_max_resize_ratio_percent")]
    pub max_resize_ratio_percent: u32,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            burst_size: DEFAULT_BURST_SIZE,
            receive_mode: ReceiveMode::default(),
            init_request_count: 0,
            enable_capture_flow: false,
            queue_depth: DEFAULT_QUEUE_DEPTH,
            process_depth: DEFAULT_PROCESS_DEPTH,
            raw_type: RawType::default(),
            sensor: SensorConfig::default(),
            ports: default_ports(),
            timing: TimingConfig::default(),
            dump: DumpConfig::default(),
            magic_source: MagicSource::default(),
            max_resize_ratio_percent: DEFAULT_MAX_RESIZE_RATIO_PERCENT,
        }
    }
}

impl NodeConfig {
    /// Admission depth multiplier: 2 in burst or conservative mode, else 1
    pub fn depth_factor(&self) -> usize {
        if self.burst_size > 1 || self.receive_mode == ReceiveMode::Conservative {
            2
        } else {
            1
        }
    }

    /// Whether the node groups more than one action per job
    pub fn is_burst(&self) -> bool {
        self.burst_size > 1
    }

    /// Reject configurations the node cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.burst_size == 0 || self.burst_size > MAX_BURST_SIZE {
            return Err(NodeError::Config(format!(
                "burst_size must be within 1..={}, got {}",
                MAX_BURST_SIZE, self.burst_size
            )));
        }
        if self.ports.enabled().is_empty() {
            return Err(NodeError::Config(
                "at least one output port must be enabled".to_string(),
            ));
        }
        if self.sensor.size.is_empty() {
            return Err(NodeError::Config(format!(
                "sensor size {} is empty",
                self.sensor.size
            )));
        }
        if let Some(size) = self.ports.imgo {
            if size.w > self.sensor.size.w || size.h > self.sensor.size.h {
                return Err(NodeError::Config(format!(
                    "IMGO size {} exceeds sensor size {}",
                    size, self.sensor.size
                )));
            }
        }
        if self.max_resize_ratio_percent == 0 || self.max_resize_ratio_percent > 100 {
            return Err(NodeError::Config(format!(
                "max_resize_ratio_percent must be within 1..=100, got {}",
                self.max_resize_ratio_percent
            )));
        }
        if self.timing.delivery_check_ms == 0 {
            return Err(NodeError::Config(
                "timing.delivery_check_ms must be non-zero".to_string(),
            ));
        }
        if self.enable_capture_flow && self.init_request_count > 0 {
            return Err(NodeError::Config(
                "capture flow and init-request run are mutually exclusive".to_string(),
            ));
        }
        Ok(())
    }

    /// Parse and validate a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: NodeConfig = toml::from_str(content)
            .map_err(|e| NodeError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to a TOML document
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| NodeError::Config(format!("Failed to serialize config: {}", e)))
    }

    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            NodeError::Config(format!(
                "Failed to read config file {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        Self::from_toml_str(&content)
    }

    /// Save configuration to a TOML file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = self.to_toml_string()?;
        std::fs::write(path.as_ref(), content).map_err(|e| {
            NodeError::Config(format!(
                "Failed to write config file {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        Ok(())
    }
}
