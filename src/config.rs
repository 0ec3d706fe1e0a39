//! Configuration management for rtio-emu.
//!
//! Configuration is loaded from multiple sources in priority order:
//! 1. Environment variables (RTIO_EMU_BOARD, etc.)
//! 2. Project-local config file (`./rtio-emu.toml`)
//! 3. User config file (`~/.config/rtio-emu/config.toml`)
//! 4. Built-in defaults
//!
//! This is the runtime layer. The channel table itself is frozen into a
//! [`SystemConfig`](crate::board::SystemConfig) by
//! [`SystemConfig::from_config`](crate::board::SystemConfig::from_config).
//!
//! # Config File Format
//!
//! ```toml
//! # rtio-emu.toml
//!
//! # Board preset: "ebaz4205" or "generic"
//! board = "ebaz4205"
//!
//! # Kernel initiator implementation: "csr" or "acp"
//! ki_impl = "csr"
//!
//! # Analyzer ring-buffer capacity (records)
//! analyzer_capacity = 1024
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Global cached configuration.
static CONFIG: OnceLock<Config> = OnceLock::new();

/// Kernel initiator implementation selected in the gateware.
///
/// Only affects the gateware identifier; both variants behave the same on
/// the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KiImpl {
    /// CSR-based kernel initiator.
    #[default]
    Csr,
    /// ACP-based kernel initiator.
    Acp,
}

impl std::fmt::Display for KiImpl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Csr => write!(f, "csr"),
            Self::Acp => write!(f, "acp"),
        }
    }
}

impl std::str::FromStr for KiImpl {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "csr" => Ok(Self::Csr),
            "acp" => Ok(Self::Acp),
            other => Err(format!("unknown kernel initiator implementation '{}'", other)),
        }
    }
}

/// rtio-emu configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Board preset name.
    pub board: Option<String>,

    /// Kernel initiator implementation.
    pub ki_impl: Option<KiImpl>,

    /// RTIO clock frequency override in MHz.
    pub rtio_frequency_mhz: Option<u32>,

    /// Analyzer ring-buffer capacity in records.
    pub analyzer_capacity: Option<usize>,

    /// Per-channel output FIFO depth.
    pub output_fifo_depth: Option<usize>,

    /// Per-channel input FIFO depth.
    pub input_fifo_depth: Option<usize>,
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// Priority (highest to lowest):
    /// 1. Environment variables
    /// 2. Project-local `rtio-emu.toml`
    /// 3. User config `~/.config/rtio-emu/config.toml`
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

    /// Board preset, defaulting to the EBAZ4205.
    pub fn board(&self) -> String {
        self.board.clone().unwrap_or_else(|| "ebaz4205".to_string())
    }

    /// Kernel initiator implementation, defaulting to CSR.
    pub fn ki_impl(&self) -> KiImpl {
        self.ki_impl.unwrap_or_default()
    }

    /// RTIO frequency override, if any.
    pub fn rtio_frequency_mhz(&self) -> Option<u32> {
        self.rtio_frequency_mhz
    }

    /// Load user configuration from ~/.config/rtio-emu/config.toml
    fn load_user_config() -> Option<Self> {
        let path = Self::user_config_path()?;
        Self::load_from_file(&path)
    }

    /// Load project-local configuration from ./rtio-emu.toml
    fn load_local_config() -> Option<Self> {
        let local_path = Path::new("rtio-emu.toml");
        if let Some(config) = Self::load_from_file(local_path) {
            return Some(config);
        }

        if let Ok(manifest_dir) = std::env::var("CARGO_MANIFEST_DIR") {
            let project_path = Path::new(&manifest_dir).join("rtio-emu.toml");
            if let Some(config) = Self::load_from_file(&project_path) {
                return Some(config);
            }
        }

        None
    }

    /// Load configuration from a specific file.
    fn load_from_file(path: &Path) -> Option<Self> {
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
        if other.board.is_some() {
            self.board = other.board;
        }
        if other.ki_impl.is_some() {
            self.ki_impl = other.ki_impl;
        }
        if other.rtio_frequency_mhz.is_some() {
            self.rtio_frequency_mhz = other.rtio_frequency_mhz;
        }
        if other.analyzer_capacity.is_some() {
            self.analyzer_capacity = other.analyzer_capacity;
        }
        if other.output_fifo_depth.is_some() {
            self.output_fifo_depth = other.output_fifo_depth;
        }
        if other.input_fifo_depth.is_some() {
            self.input_fifo_depth = other.input_fifo_depth;
        }
    }

    /// Apply environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(board) = std::env::var("RTIO_EMU_BOARD") {
            log::info!("Using RTIO_EMU_BOARD from environment: {}", board);
            self.board = Some(board);
        }
        if let Ok(value) = std::env::var("RTIO_EMU_KI_IMPL") {
            match value.parse() {
                Ok(ki_impl) => {
                    log::info!("Using RTIO_EMU_KI_IMPL from environment: {}", value);
                    self.ki_impl = Some(ki_impl);
                }
                Err(e) => log::warn!("Ignoring RTIO_EMU_KI_IMPL: {}", e),
            }
        }
        if let Ok(value) = std::env::var("RTIO_EMU_ANALYZER_CAPACITY") {
            match value.parse() {
                Ok(capacity) => {
                    log::info!("Using RTIO_EMU_ANALYZER_CAPACITY from environment: {}", capacity);
                    self.analyzer_capacity = Some(capacity);
                }
                Err(e) => log::warn!("Ignoring RTIO_EMU_ANALYZER_CAPACITY '{}': {}", value, e),
            }
        }
    }

    /// Get the path to the user config file (for display/creation).
    pub fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("rtio-emu").join("config.toml"))
    }

    /// Generate a sample config file content.
    pub fn sample_config() -> String {
        r#"# rtio-emu configuration
# Place this file at ~/.config/rtio-emu/config.toml or ./rtio-emu.toml

# Board preset: "ebaz4205" (default) or "generic"
board = "ebaz4205"

# Kernel initiator implementation: "csr" (default) or "acp"
# ki_impl = "csr"

# RTIO clock frequency in MHz (board default if unset)
# rtio_frequency_mhz = 100

# Analyzer ring-buffer capacity in records
# analyzer_capacity = 1024

# Per-channel event FIFO depths
# output_fifo_depth = 64
# input_fifo_depth = 64
"#
        .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.board(), "ebaz4205");
        assert_eq!(config.ki_impl(), KiImpl::Csr);
        assert_eq!(config.rtio_frequency_mhz(), None);
    }

    #[test]
    fn test_config_merge() {
        let mut base = Config {
            board: Some("generic".to_string()),
            analyzer_capacity: Some(16),
            ..Default::default()
        };

        let overlay = Config {
            board: None,
            ki_impl: Some(KiImpl::Acp),
            analyzer_capacity: Some(32),
            ..Default::default()
        };

        base.merge(overlay);

        // board unchanged (overlay was None)
        assert_eq!(base.board, Some("generic".to_string()));
        // ki_impl set from overlay
        assert_eq!(base.ki_impl, Some(KiImpl::Acp));
        // analyzer_capacity overridden by overlay
        assert_eq!(base.analyzer_capacity, Some(32));
    }

    #[test]
    fn test_ki_impl_parse() {
        assert_eq!("acp".parse::<KiImpl>(), Ok(KiImpl::Acp));
        assert_eq!("CSR".parse::<KiImpl>(), Ok(KiImpl::Csr));
        assert!("dma".parse::<KiImpl>().is_err());
    }

    #[test]
    fn test_sample_config_parses() {
        let sample = Config::sample_config();
        let config: Config = toml::from_str(&sample).expect("Sample config should parse");
        assert_eq!(config.board(), "ebaz4205");
    }

    #[test]
    fn test_ki_impl_from_toml() {
        let config: Config = toml::from_str("ki_impl = \"acp\"\nanalyzer_capacity = 8\n").unwrap();
        assert_eq!(config.ki_impl(), KiImpl::Acp);
        assert_eq!(config.analyzer_capacity, Some(8));
    }
}
