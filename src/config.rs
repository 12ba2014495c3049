//! Configuration management for conv3-emu.
//!
//! Configuration is loaded from multiple sources in priority order:
//! 1. Environment variables (`CONV3_MAX_WIDTH`, etc.)
//! 2. Project-local config file (`./conv3-emu.toml`)
//! 3. User config file (`~/.config/conv3-emu/config.toml`)
//! 4. Built-in defaults (see [`crate::device::params`])
//!
//! # Config File Format
//!
//! ```toml
//! # conv3-emu.toml
//! max_width = 256
//! max_input_channels = 32
//! filter_group_size = 4
//! burst_len = 256
//! burst_latency_cycles = 30
//!
//! [ports]
//! input = "gmem0"
//! output = "gmem1"
//! coefficients = "gmem2"
//! bias = "gmem2"
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::OnceLock;

use crate::device::burst::{BurstConfig, PortMap};
use crate::device::params;
use crate::error::{ConvError, Result};

/// Global cached configuration.
static CONFIG: OnceLock<Config> = OnceLock::new();

/// Resolved engine parameters.
///
/// This is what an engine instance is built from. Every field has a
/// default from the architecture constants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Widest row the line buffers accept (pixels).
    pub max_width: usize,
    /// Most input channels the cache and line buffers accept.
    pub max_input_channels: usize,
    /// Filters computed in lock-step per pass over the image.
    pub filter_group_size: usize,
    /// Cycles from last MAC issue until the accumulators are final.
    pub mac_latency_cycles: u32,
    /// Cycles for bias, ReLU and output enqueue.
    pub fuse_latency_cycles: u32,
    /// Memory port timing.
    pub burst: BurstConfig,
    /// Bundle assignment of the four memory ports.
    pub ports: PortMap,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_width: params::MAX_ROW_WIDTH,
            max_input_channels: params::MAX_INPUT_CHANNELS,
            filter_group_size: params::FILTER_GROUP_SIZE,
            mac_latency_cycles: params::MAC_LATENCY_CYCLES,
            fuse_latency_cycles: params::FUSE_LATENCY_CYCLES,
            burst: BurstConfig::default(),
            ports: PortMap::default(),
        }
    }
}

impl EngineConfig {
    /// Check the parameters describe a buildable engine.
    pub fn validate(&self) -> Result<()> {
        if self.max_width < params::KERNEL_SIZE {
            return Err(ConvError::InvalidConfig(format!(
                "max_width {} is smaller than the {}-wide kernel",
                self.max_width,
                params::KERNEL_SIZE
            )));
        }
        if self.max_input_channels == 0 {
            return Err(ConvError::InvalidConfig("max_input_channels must be non-zero".into()));
        }
        if self.filter_group_size == 0 {
            return Err(ConvError::InvalidConfig("filter_group_size must be non-zero".into()));
        }
        if self.burst.burst_len == 0 || self.burst.elements_per_cycle == 0 {
            return Err(ConvError::InvalidConfig(
                "burst_len and elements_per_cycle must be non-zero".into(),
            ));
        }
        self.ports.validate()
    }
}

/// Layered configuration file contents.
///
/// Every field is optional so files and environment variables can
/// override individual settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Line buffer width.
    pub max_width: Option<usize>,
    /// Input channel capacity.
    pub max_input_channels: Option<usize>,
    /// Filters per group.
    pub filter_group_size: Option<usize>,
    /// Elements per burst.
    pub burst_len: Option<usize>,
    /// Per-burst latency in cycles.
    pub burst_latency_cycles: Option<u32>,
    /// MAC pipeline latency.
    pub mac_latency_cycles: Option<u32>,
    /// Fuse stage latency.
    pub fuse_latency_cycles: Option<u32>,
    /// Port to bundle mapping.
    pub ports: Option<PortMap>,
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// Priority (highest to lowest):
    /// 1. Environment variables
    /// 2. Project-local `conv3-emu.toml`
    /// 3. User config `~/.config/conv3-emu/config.toml`
    /// 4. Defaults
    pub fn load() -> Self {
        let mut config = Self::default();

        if let Some(user_config) = Self::load_user_config() {
            config.merge(user_config);
        }

        if let Some(local_config) = Self::load_local_config() {
            config.merge(local_config);
        }

        config.apply_env_overrides();

        config
    }

    /// Get the cached global configuration.
    ///
    /// Loads configuration on first call and caches it.
    pub fn get() -> &'static Config {
        CONFIG.get_or_init(|| {
            let config = Self::load();
            log::debug!("Loaded configuration: {:?}", config);
            config
        })
    }

    /// Resolve into engine parameters, filling gaps with defaults.
    pub fn engine_config(&self) -> EngineConfig {
        let defaults = EngineConfig::default();
        EngineConfig {
            max_width: self.max_width.unwrap_or(defaults.max_width),
            max_input_channels: self.max_input_channels.unwrap_or(defaults.max_input_channels),
            filter_group_size: self.filter_group_size.unwrap_or(defaults.filter_group_size),
            mac_latency_cycles: self.mac_latency_cycles.unwrap_or(defaults.mac_latency_cycles),
            fuse_latency_cycles: self.fuse_latency_cycles.unwrap_or(defaults.fuse_latency_cycles),
            burst: BurstConfig {
                burst_len: self.burst_len.unwrap_or(defaults.burst.burst_len),
                latency_cycles: self.burst_latency_cycles.unwrap_or(defaults.burst.latency_cycles),
                elements_per_cycle: defaults.burst.elements_per_cycle,
            },
            ports: self.ports.clone().unwrap_or(defaults.ports),
        }
    }

    /// Load user configuration from ~/.config/conv3-emu/config.toml
    fn load_user_config() -> Option<Self> {
        let config_path = Self::user_config_path()?;
        Self::load_from_file(&config_path)
    }

    /// Load project-local configuration from ./conv3-emu.toml
    fn load_local_config() -> Option<Self> {
        let local_path = Path::new("conv3-emu.toml");
        if let Some(config) = Self::load_from_file(local_path) {
            return Some(config);
        }

        if let Ok(manifest_dir) = std::env::var("CARGO_MANIFEST_DIR") {
            let project_path = Path::new(&manifest_dir).join("conv3-emu.toml");
            if let Some(config) = Self::load_from_file(&project_path) {
                return Some(config);
            }
        }

        None
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        match std::fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => {
                    log::info!("Loaded config from {}", path.display());
                    Some(config)
                }
                Err(e) => {
                    log::warn!("Failed to parse {}: {}", path.display(), e);
                    None
                }
            },
            Err(e) => {
                log::warn!("Failed to read {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Merge another config into this one.
    /// Only overrides fields that are Some in the other config.
    fn merge(&mut self, other: Self) {
        if other.max_width.is_some() {
            self.max_width = other.max_width;
        }
        if other.max_input_channels.is_some() {
            self.max_input_channels = other.max_input_channels;
        }
        if other.filter_group_size.is_some() {
            self.filter_group_size = other.filter_group_size;
        }
        if other.burst_len.is_some() {
            self.burst_len = other.burst_len;
        }
        if other.burst_latency_cycles.is_some() {
            self.burst_latency_cycles = other.burst_latency_cycles;
        }
        if other.mac_latency_cycles.is_some() {
            self.mac_latency_cycles = other.mac_latency_cycles;
        }
        if other.fuse_latency_cycles.is_some() {
            self.fuse_latency_cycles = other.fuse_latency_cycles;
        }
        if other.ports.is_some() {
            self.ports = other.ports;
        }
    }

    /// Apply environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Some(v) = env_override("CONV3_MAX_WIDTH") {
            self.max_width = Some(v);
        }
        if let Some(v) = env_override("CONV3_MAX_INPUT_CHANNELS") {
            self.max_input_channels = Some(v);
        }
        if let Some(v) = env_override("CONV3_FILTER_GROUP_SIZE") {
            self.filter_group_size = Some(v);
        }
        if let Some(v) = env_override("CONV3_BURST_LEN") {
            self.burst_len = Some(v);
        }
    }

    /// Get the path to the user config file (for display/creation).
    pub fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("conv3-emu").join("config.toml"))
    }

    /// Generate a sample config file content.
    pub fn sample_config() -> String {
        r#"# conv3-emu configuration
# Place this file at ~/.config/conv3-emu/config.toml or ./conv3-emu.toml

# Line buffer width in pixels (rows wider than this are rejected)
max_width = 512

# Input channels held by the coefficient cache
max_input_channels = 64

# Filters computed in lock-step per pass
filter_group_size = 4

# Memory port bursts
burst_len = 256
burst_latency_cycles = 30

# Input and output must sit on different bundles
[ports]
input = "gmem0"
output = "gmem1"
coefficients = "gmem2"
bias = "gmem2"
"#
        .to_string()
    }
}

/// Read and parse an override, warning on garbage.
fn env_override<T: FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.parse() {
        Ok(value) => {
            log::info!("Using {} from environment: {}", name, raw);
            Some(value)
        }
        Err(_) => {
            log::warn!("Ignoring unparseable {}={}", name, raw);
            None
        }
    }
}
