//! Frozen system configuration and board presets.
//!
//! A [`SystemConfig`] is the immutable description of one RTIO instance:
//! its channel table, the global fine timestamp width, and the sizes of the
//! buffers the core and analyzer use. It is validated once by
//! [`SystemConfigBuilder::build`] and then shared as `Arc<SystemConfig>`.
//! Nothing mutates it afterwards.
//!
//! # Presets
//!
//! - [`SystemConfig::ebaz4205`]: the EBAZ4205 carrier. Two user LEDs on TTL
//!   outputs (channels 0 and 1) and the log channel right after them.
//! - [`SystemConfig::generic`]: two TTL outputs, one TTL in/out, and a log
//!   channel. Used by scenarios and tests that need an input.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::{Config, KiImpl};
use crate::error::ConfigError;
use crate::rtio::timestamp::MAX_FINE_TS_WIDTH;

/// Channels are addressed by a 24-bit field on the bus and in DMA streams.
pub const MAX_CHANNELS: usize = 1 << 24;

/// Default analyzer ring-buffer capacity, in records.
pub const DEFAULT_ANALYZER_CAPACITY: usize = 1024;

/// Default depth of each output channel's event FIFO.
pub const DEFAULT_OUTPUT_FIFO_DEPTH: usize = 64;

/// Default depth of each input channel's event FIFO.
pub const DEFAULT_INPUT_FIFO_DEPTH: usize = 64;

/// RTIO clock on the EBAZ4205 (PS fclk0).
pub const EBAZ4205_RTIO_FREQUENCY_MHZ: u32 = 100;

/// Global fine timestamp width on the EBAZ4205 TSC.
pub const EBAZ4205_FINE_TS_WIDTH: u8 = 3;

/// What a channel can do on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelCapability {
    /// Accepts timestamped output events only.
    Output,
    /// Produces timestamped input events only.
    Input,
    /// Both directions.
    InOut,
}

impl ChannelCapability {
    /// Whether output writes are allowed.
    pub fn can_output(self) -> bool {
        matches!(self, Self::Output | Self::InOut)
    }

    /// Whether input reads are allowed.
    pub fn can_input(self) -> bool {
        matches!(self, Self::Input | Self::InOut)
    }
}

impl std::fmt::Display for ChannelCapability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Output => write!(f, "out"),
            Self::Input => write!(f, "in"),
            Self::InOut => write!(f, "inout"),
        }
    }
}

/// Phy driving a channel. Opaque to the bus protocol; only the capability
/// derived from it matters to the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhyKind {
    /// Simple TTL output (level from the lowest data bit).
    TtlOut,
    /// TTL input (edge timestamps).
    TtlIn,
    /// TTL with both output and input.
    TtlInOut,
    /// Diagnostic log channel.
    Log,
}

impl PhyKind {
    /// Capability the phy exposes on the bus.
    pub fn capability(self) -> ChannelCapability {
        match self {
            Self::TtlOut | Self::Log => ChannelCapability::Output,
            Self::TtlIn => ChannelCapability::Input,
            Self::TtlInOut => ChannelCapability::InOut,
        }
    }
}

/// One entry of the channel table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelSpec {
    /// Human-readable name (e.g. `user_led0`).
    pub name: String,
    /// Phy attached to the channel.
    pub phy: PhyKind,
    /// Fine timestamp bits honored by this channel.
    #[serde(default)]
    pub fine_ts_width: u8,
    /// Cycles an output timestamp may trail the TSC before it counts as late.
    #[serde(default)]
    pub latency_margin: u64,
}

impl ChannelSpec {
    /// A channel with whole-cycle precision and no latency margin.
    pub fn new(name: impl Into<String>, phy: PhyKind) -> Self {
        Self {
            name: name.into(),
            phy,
            fine_ts_width: 0,
            latency_margin: 0,
        }
    }

    /// Set the fine timestamp width.
    pub fn with_fine_ts_width(mut self, width: u8) -> Self {
        self.fine_ts_width = width;
        self
    }

    /// Set the latency margin in cycles.
    pub fn with_latency_margin(mut self, cycles: u64) -> Self {
        self.latency_margin = cycles;
        self
    }

    /// Capability derived from the phy.
    pub fn capability(&self) -> ChannelCapability {
        self.phy.capability()
    }
}

/// Immutable description of an RTIO system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemConfig {
    ident: String,
    rtio_frequency_mhz: u32,
    fine_ts_width: u8,
    channels: Vec<ChannelSpec>,
    log_channel: Option<usize>,
    analyzer_capacity: usize,
    output_fifo_depth: usize,
    input_fifo_depth: usize,
}

impl SystemConfig {
    /// Start building a configuration.
    pub fn builder(ident: impl Into<String>) -> SystemConfigBuilder {
        SystemConfigBuilder::new(ident)
    }

    /// The EBAZ4205 board: LEDs on channels 0 and 1, log channel on 2.
    pub fn ebaz4205(ki_impl: KiImpl) -> Result<Arc<Self>, ConfigError> {
        let ident = match ki_impl {
            KiImpl::Acp => "acpki_EBAZ4205",
            KiImpl::Csr => "EBAZ4205",
        };
        let mut builder = Self::builder(ident)
            .rtio_frequency_mhz(EBAZ4205_RTIO_FREQUENCY_MHZ)
            .fine_ts_width(EBAZ4205_FINE_TS_WIDTH);
        for i in 0..2 {
            builder = builder.channel(ChannelSpec::new(format!("user_led{}", i), PhyKind::TtlOut));
        }
        builder.log_channel().build()
    }

    /// Generic test board: two outputs, one in/out TTL, log channel.
    pub fn generic() -> Result<Arc<Self>, ConfigError> {
        Self::builder("generic")
            .fine_ts_width(EBAZ4205_FINE_TS_WIDTH)
            .channel(ChannelSpec::new("ttl0", PhyKind::TtlOut))
            .channel(ChannelSpec::new("ttl1", PhyKind::TtlOut))
            .channel(ChannelSpec::new("ttl2", PhyKind::TtlInOut))
            .log_channel()
            .build()
    }

    /// Build the preset named by the runtime configuration, applying its
    /// buffer-size overrides.
    pub fn from_config(config: &Config) -> Result<Arc<Self>, ConfigError> {
        let base = match config.board().as_str() {
            "ebaz4205" => Self::ebaz4205(config.ki_impl())?,
            "generic" => Self::generic()?,
            other => return Err(ConfigError::UnknownBoard(other.to_string())),
        };

        let mut builder = SystemConfigBuilder::from_config(&base)
            .rtio_frequency_mhz(config.rtio_frequency_mhz().unwrap_or(base.rtio_frequency_mhz));
        if let Some(capacity) = config.analyzer_capacity {
            builder = builder.analyzer_capacity(capacity);
        }
        if let Some(depth) = config.output_fifo_depth {
            builder = builder.output_fifo_depth(depth);
        }
        if let Some(depth) = config.input_fifo_depth {
            builder = builder.input_fifo_depth(depth);
        }
        builder.build()
    }

    /// Gateware identifier string.
    pub fn ident(&self) -> &str {
        &self.ident
    }

    /// RTIO clock frequency in MHz.
    pub fn rtio_frequency_mhz(&self) -> u32 {
        self.rtio_frequency_mhz
    }

    /// Global fine timestamp width in bits.
    pub fn fine_ts_width(&self) -> u8 {
        self.fine_ts_width
    }

    /// The channel table.
    pub fn channels(&self) -> &[ChannelSpec] {
        &self.channels
    }

    /// Look up one channel.
    pub fn channel(&self, index: usize) -> Option<&ChannelSpec> {
        self.channels.get(index)
    }

    /// Number of channels.
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Index of the reserved log channel, if the board has one.
    pub fn log_channel(&self) -> Option<usize> {
        self.log_channel
    }

    /// Analyzer ring-buffer capacity in records.
    pub fn analyzer_capacity(&self) -> usize {
        self.analyzer_capacity
    }

    /// Output FIFO depth per channel.
    pub fn output_fifo_depth(&self) -> usize {
        self.output_fifo_depth
    }

    /// Input FIFO depth per channel.
    pub fn input_fifo_depth(&self) -> usize {
        self.input_fifo_depth
    }

    /// Print the channel table.
    pub fn print_summary(&self) {
        println!("System: {}", self.ident);
        println!("RTIO frequency: {} MHz", self.rtio_frequency_mhz);
        println!("Fine timestamp width: {} bits", self.fine_ts_width);
        println!("Analyzer capacity: {} records", self.analyzer_capacity);
        println!("FIFO depth: out={} in={}", self.output_fifo_depth, self.input_fifo_depth);
        println!();
        println!("Channels:");
        for (i, ch) in self.channels.iter().enumerate() {
            let log_marker = if self.log_channel == Some(i) { " (log)" } else { "" };
            println!(
                "  0x{:06x}  {:12} {:10} {:5} fine={} margin={}{}",
                i,
                ch.name,
                format!("{:?}", ch.phy),
                ch.capability(),
                ch.fine_ts_width,
                ch.latency_margin,
                log_marker
            );
        }
    }
}

/// Builder for [`SystemConfig`].
#[derive(Debug, Clone)]
pub struct SystemConfigBuilder {
    ident: String,
    rtio_frequency_mhz: u32,
    fine_ts_width: u8,
    channels: Vec<ChannelSpec>,
    log_channels: Vec<usize>,
    analyzer_capacity: usize,
    output_fifo_depth: usize,
    input_fifo_depth: usize,
}

impl SystemConfigBuilder {
    /// Empty builder with default buffer sizes.
    pub fn new(ident: impl Into<String>) -> Self {
        Self {
            ident: ident.into(),
            rtio_frequency_mhz: EBAZ4205_RTIO_FREQUENCY_MHZ,
            fine_ts_width: 0,
            channels: Vec::new(),
            log_channels: Vec::new(),
            analyzer_capacity: DEFAULT_ANALYZER_CAPACITY,
            output_fifo_depth: DEFAULT_OUTPUT_FIFO_DEPTH,
            input_fifo_depth: DEFAULT_INPUT_FIFO_DEPTH,
        }
    }

    /// Builder pre-filled from an existing configuration.
    pub fn from_config(config: &SystemConfig) -> Self {
        Self {
            ident: config.ident.clone(),
            rtio_frequency_mhz: config.rtio_frequency_mhz,
            fine_ts_width: config.fine_ts_width,
            channels: config.channels.clone(),
            log_channels: config.log_channel.into_iter().collect(),
            analyzer_capacity: config.analyzer_capacity,
            output_fifo_depth: config.output_fifo_depth,
            input_fifo_depth: config.input_fifo_depth,
        }
    }

    pub fn rtio_frequency_mhz(mut self, mhz: u32) -> Self {
        self.rtio_frequency_mhz = mhz;
        self
    }

    pub fn fine_ts_width(mut self, width: u8) -> Self {
        self.fine_ts_width = width;
        self
    }

    /// Append a channel; its index is the current table length.
    pub fn channel(mut self, spec: ChannelSpec) -> Self {
        if spec.phy == PhyKind::Log {
            self.log_channels.push(self.channels.len());
        }
        self.channels.push(spec);
        self
    }

    /// Append the log channel.
    pub fn log_channel(self) -> Self {
        self.channel(ChannelSpec::new("log", PhyKind::Log))
    }

    pub fn analyzer_capacity(mut self, records: usize) -> Self {
        self.analyzer_capacity = records;
        self
    }

    pub fn output_fifo_depth(mut self, depth: usize) -> Self {
        self.output_fifo_depth = depth;
        self
    }

    pub fn input_fifo_depth(mut self, depth: usize) -> Self {
        self.input_fifo_depth = depth;
        self
    }

    /// Validate and freeze.
    pub fn build(self) -> Result<Arc<SystemConfig>, ConfigError> {
        if self.channels.is_empty() {
            return Err(ConfigError::NoChannels);
        }
        if self.channels.len() > MAX_CHANNELS {
            return Err(ConfigError::TooManyChannels {
                count: self.channels.len(),
                limit: MAX_CHANNELS,
            });
        }
        if self.fine_ts_width > MAX_FINE_TS_WIDTH {
            return Err(ConfigError::FineWidthTooLarge {
                width: self.fine_ts_width,
                max: MAX_FINE_TS_WIDTH,
            });
        }
        for (i, ch) in self.channels.iter().enumerate() {
            if ch.fine_ts_width > self.fine_ts_width {
                return Err(ConfigError::ChannelFineWidth {
                    channel: i,
                    width: ch.fine_ts_width,
                    global: self.fine_ts_width,
                });
            }
        }
        if let [first, second, ..] = self.log_channels[..] {
            return Err(ConfigError::DuplicateLogChannel { first, second });
        }
        if self.analyzer_capacity == 0 {
            return Err(ConfigError::ZeroCapacity { what: "analyzer capacity" });
        }
        if self.output_fifo_depth == 0 {
            return Err(ConfigError::ZeroCapacity { what: "output FIFO depth" });
        }
        if self.input_fifo_depth == 0 {
            return Err(ConfigError::ZeroCapacity { what: "input FIFO depth" });
        }

        for (i, ch) in self.channels.iter().enumerate() {
            log::debug!("RTIO channel 0x{:06x}: {} ({:?})", i, ch.name, ch.phy);
        }

        Ok(Arc::new(SystemConfig {
            ident: self.ident,
            rtio_frequency_mhz: self.rtio_frequency_mhz,
            fine_ts_width: self.fine_ts_width,
            channels: self.channels,
            log_channel: self.log_channels.first().copied(),
            analyzer_capacity: self.analyzer_capacity,
            output_fifo_depth: self.output_fifo_depth,
            input_fifo_depth: self.input_fifo_depth,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ebaz4205_layout() {
        let config = SystemConfig::ebaz4205(KiImpl::Csr).unwrap();
        assert_eq!(config.ident(), "EBAZ4205");
        assert_eq!(config.channel_count(), 3);
        assert_eq!(config.log_channel(), Some(2));
        assert_eq!(config.fine_ts_width(), 3);
        assert_eq!(config.rtio_frequency_mhz(), 100);
        assert_eq!(config.channel(0).unwrap().name, "user_led0");
        assert_eq!(config.channel(1).unwrap().capability(), ChannelCapability::Output);
    }

    #[test]
    fn test_ebaz4205_acp_ident() {
        let config = SystemConfig::ebaz4205(KiImpl::Acp).unwrap();
        assert_eq!(config.ident(), "acpki_EBAZ4205");
    }

    #[test]
    fn test_generic_has_input() {
        let config = SystemConfig::generic().unwrap();
        assert!(config.channel(2).unwrap().capability().can_input());
        assert!(!config.channel(0).unwrap().capability().can_input());
        assert_eq!(config.log_channel(), Some(3));
    }

    #[test]
    fn test_empty_table_rejected() {
        let err = SystemConfig::builder("empty").build().unwrap_err();
        assert_eq!(err, ConfigError::NoChannels);
    }

    #[test]
    fn test_duplicate_log_channel_rejected() {
        let err = SystemConfig::builder("two-logs")
            .log_channel()
            .channel(ChannelSpec::new("ttl", PhyKind::TtlOut))
            .log_channel()
            .build()
            .unwrap_err();
        assert_eq!(err, ConfigError::DuplicateLogChannel { first: 0, second: 2 });
    }

    #[test]
    fn test_channel_fine_width_checked() {
        let err = SystemConfig::builder("fine")
            .fine_ts_width(2)
            .channel(ChannelSpec::new("ttl", PhyKind::TtlOut).with_fine_ts_width(3))
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::ChannelFineWidth { channel: 0, width: 3, global: 2 }));
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let err = SystemConfig::builder("zero")
            .channel(ChannelSpec::new("ttl", PhyKind::TtlOut))
            .analyzer_capacity(0)
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::ZeroCapacity { .. }));
    }

    #[test]
    fn test_from_config_overrides() {
        let config = Config {
            board: Some("generic".to_string()),
            analyzer_capacity: Some(8),
            output_fifo_depth: Some(2),
            ..Default::default()
        };
        let system = SystemConfig::from_config(&config).unwrap();
        assert_eq!(system.ident(), "generic");
        assert_eq!(system.analyzer_capacity(), 8);
        assert_eq!(system.output_fifo_depth(), 2);
        assert_eq!(system.input_fifo_depth(), DEFAULT_INPUT_FIFO_DEPTH);
    }

    #[test]
    fn test_from_config_unknown_board() {
        let config = Config {
            board: Some("kc705".to_string()),
            ..Default::default()
        };
        assert_eq!(
            SystemConfig::from_config(&config).unwrap_err(),
            ConfigError::UnknownBoard("kc705".to_string())
        );
    }
}
