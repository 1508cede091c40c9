// Kbswitch Config Parser - TOML with Serde
// Parses the read-only configuration snapshot from TOML files

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::activator::{merge_xkb_layouts, XkbLayout};
use crate::coordinator::{SignalDelays, SwitchConfig};
use crate::device::{DeviceFingerprint, DeviceMapping, MonitorSettings, QueryPolicy};
use crate::layout::{LayoutCatalog, LayoutDescriptor, LayoutId};

/// en-US, used when the file names no default layout
const FALLBACK_DEFAULT_LAYOUT: LayoutId = LayoutId(0x0409_0409);

/// Configuration parser errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(String),

    #[error("Invalid layout reference: {0}")]
    InvalidLayoutRef(String),

    #[error("Invalid layout entry: {0}")]
    InvalidLayout(String),

    #[error("Invalid device entry: {0}")]
    InvalidDevice(String),

    #[error("Value out of range: {0}")]
    ValueOutOfRange(String),
}

/// Main configuration structure (root TOML table)
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigToml {
    /// Layout id or culture tag used when no device is attached
    #[serde(default)]
    pub default_layout: Option<String>,

    /// Extra catalog entries, taking precedence over the builtin table
    #[serde(default)]
    pub layouts: Vec<LayoutToml>,

    /// Device mappings in priority order
    #[serde(default)]
    pub devices: Vec<DeviceToml>,

    #[serde(default)]
    pub monitor: Option<MonitorToml>,

    #[serde(default)]
    pub delays: Option<DelaysToml>,
}

/// One `[[layouts]]` entry
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LayoutToml {
    pub culture: String,
    /// Hex layout id (e.g. "0xF0020409")
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub allow_language_fallback: Option<bool>,
    /// XKB layout name for the Linux backend
    #[serde(default)]
    pub xkb_layout: Option<String>,
    #[serde(default)]
    pub xkb_variant: Option<String>,
}

/// One `[[devices]]` entry
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeviceToml {
    pub name: String,
    pub vendor_id: String,
    pub product_id: String,
    /// Layout id or culture tag
    pub layout: String,
}

/// `[monitor]` table
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MonitorToml {
    pub query_timeout_ms: Option<u64>,
    pub retry_delay_ms: Option<u64>,
    pub poll_interval_ms: Option<u64>,
}

/// `[delays]` table
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DelaysToml {
    pub resume_ms: Option<u64>,
    pub unlock_ms: Option<u64>,
}

/// Validated configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub default_layout: LayoutId,
    pub catalog: LayoutCatalog,
    pub devices: Vec<DeviceMapping>,
    /// XKB names: configured layouts in file order, then the builtin names
    pub xkb_layouts: Vec<XkbLayout>,
    pub query: QueryPolicy,
    pub monitor: MonitorSettings,
    pub delays: SignalDelays,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_layout: FALLBACK_DEFAULT_LAYOUT,
            catalog: LayoutCatalog::builtin(),
            devices: Vec::new(),
            xkb_layouts: XkbLayout::builtin(),
            query: QueryPolicy::default(),
            monitor: MonitorSettings::default(),
            delays: SignalDelays::default(),
        }
    }
}

impl Config {
    /// Default location: `<config dir>/kbswitch/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("kbswitch").join("config.toml"))
    }

    /// Parse a TOML configuration file
    pub fn from_toml_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let toml_config: ConfigToml =
            toml::from_str(content).map_err(|e| ConfigError::TomlParse(e.to_string()))?;
        toml_config.to_config()
    }

    /// Snapshot consumed by the switching coordinator
    pub fn to_switch_config(&self) -> SwitchConfig {
        SwitchConfig::new(self.default_layout, self.devices.clone())
            .with_catalog(self.catalog.clone())
            .with_delays(self.delays)
    }
}

impl ConfigToml {
    /// Convert parsed TOML to the validated Config
    fn to_config(&self) -> Result<Config, ConfigError> {
        let mut config = Config::default();

        // Layouts first so devices can refer to them by culture
        let mut descriptors = Vec::with_capacity(self.layouts.len());
        let mut xkb_layouts = Vec::new();
        for entry in &self.layouts {
            let id = parse_layout_id(&entry.id)?;
            let mut descriptor = LayoutDescriptor::new(entry.culture.trim(), id, entry.name.trim());
            if let Some(allowed) = entry.allow_language_fallback {
                descriptor = descriptor.with_language_fallback(allowed);
            }
            descriptors.push(descriptor);

            match (&entry.xkb_layout, &entry.xkb_variant) {
                (Some(layout), variant) => {
                    xkb_layouts.push(XkbLayout::new(id, layout.trim(), variant.clone()));
                }
                (None, Some(variant)) => {
                    return Err(ConfigError::InvalidLayout(format!(
                        "{}: xkb_variant '{}' without xkb_layout",
                        entry.id, variant
                    )));
                }
                (None, None) => {}
            }
        }
        config.catalog = config.catalog.merged_with(descriptors);
        config.xkb_layouts = merge_xkb_layouts(std::mem::take(&mut config.xkb_layouts), xkb_layouts);

        if let Some(default) = &self.default_layout {
            config.default_layout = parse_layout_ref(default, &config.catalog)?;
        } else {
            log::debug!(
                "No default_layout configured, using {}",
                FALLBACK_DEFAULT_LAYOUT
            );
        }

        for device in &self.devices {
            let fingerprint = DeviceFingerprint::parse(&device.vendor_id, &device.product_id)
                .map_err(|e| ConfigError::InvalidDevice(format!("{}: {}", device.name, e)))?;
            let layout = parse_layout_ref(&device.layout, &config.catalog)?;
            if config.catalog.descriptor(layout).is_none() {
                log::debug!("Device '{}' maps to uncatalogued layout {}", device.name, layout);
            }
            config
                .devices
                .push(DeviceMapping::new(device.name.trim(), fingerprint, layout));
        }

        if let Some(monitor) = &self.monitor {
            if let Some(ms) = monitor.query_timeout_ms {
                config.query.timeout = ranged_ms("query_timeout_ms", ms, 100, 60_000)?;
            }
            if let Some(ms) = monitor.retry_delay_ms {
                config.query.retry_delay = ranged_ms("retry_delay_ms", ms, 0, 10_000)?;
            }
            if let Some(ms) = monitor.poll_interval_ms {
                config.monitor.poll_interval = ranged_ms("poll_interval_ms", ms, 1_000, 3_600_000)?;
            }
        }

        if let Some(delays) = &self.delays {
            if let Some(ms) = delays.resume_ms {
                config.delays.resume = ranged_ms("resume_ms", ms, 0, 60_000)?;
            }
            if let Some(ms) = delays.unlock_ms {
                config.delays.unlock = ranged_ms("unlock_ms", ms, 0, 60_000)?;
            }
        }

        log::debug!(
            "Config parsed: default {}, {} devices, {} catalog layouts",
            config.default_layout,
            config.devices.len(),
            config.catalog.len()
        );
        Ok(config)
    }
}

fn parse_layout_id(s: &str) -> Result<LayoutId, ConfigError> {
    s.parse()
        .map_err(|e| ConfigError::InvalidLayoutRef(format!("{}: {}", s, e)))
}

/// A layout reference is a hex id or a catalog culture tag
fn parse_layout_ref(s: &str, catalog: &LayoutCatalog) -> Result<LayoutId, ConfigError> {
    if let Ok(id) = s.parse::<LayoutId>() {
        return Ok(id);
    }
    catalog
        .by_culture(s.trim())
        .map(|d| d.layout_id)
        .ok_or_else(|| ConfigError::InvalidLayoutRef(format!("'{}' is neither a layout id nor a known culture", s)))
}

fn ranged_ms(name: &str, ms: u64, min: u64, max: u64) -> Result<Duration, ConfigError> {
    if ms < min || ms > max {
        return Err(ConfigError::ValueOutOfRange(format!(
            "{} must be {}-{}ms, got {}",
            name, min, max, ms
        )));
    }
    Ok(Duration::from_millis(ms))
}
