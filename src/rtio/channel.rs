//! The channel array: one phy per channel table entry.
//!
//! Built once from the frozen [`SystemConfig`]; the number of channels and
//! their capabilities never change afterwards. The core owns the array and is
//! the only component that drives strobes into it.

use std::sync::Arc;

use super::phy::{self, Phy};
use crate::board::{ChannelCapability, ChannelSpec, SystemConfig};

/// Ordered, fixed-size collection of channel endpoints.
#[derive(Debug)]
pub struct ChannelArray {
    config: Arc<SystemConfig>,
    phys: Vec<Box<dyn Phy>>,
}

impl ChannelArray {
    /// Instantiate every phy in the channel table.
    pub fn new(config: Arc<SystemConfig>) -> Self {
        let phys = config
            .channels()
            .iter()
            .map(|spec| phy::build(spec.phy, &spec.name))
            .collect();
        Self { config, phys }
    }

    /// Number of channels.
    pub fn len(&self) -> usize {
        self.phys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.phys.is_empty()
    }

    /// Channel table entry.
    pub fn spec(&self, channel: usize) -> Option<&ChannelSpec> {
        self.config.channel(channel)
    }

    /// Capability of a channel, `None` if out of range.
    pub fn capability(&self, channel: usize) -> Option<ChannelCapability> {
        self.spec(channel).map(ChannelSpec::capability)
    }

    /// Read-only access to a phy.
    pub fn phy(&self, channel: usize) -> Option<&dyn Phy> {
        self.phys.get(channel).map(|p| p.as_ref())
    }

    /// Mutable access to a phy.
    pub(crate) fn phy_mut(&mut self, channel: usize) -> Option<&mut (dyn Phy + 'static)> {
        self.phys.get_mut(channel).map(|p| p.as_mut())
    }

    /// Reset every phy to power-on state.
    pub fn reset(&mut self) {
        for phy in &mut self.phys {
            phy.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::PhyKind;

    #[test]
    fn test_array_matches_table() {
        let config = SystemConfig::generic().unwrap();
        let array = ChannelArray::new(config.clone());
        assert_eq!(array.len(), config.channel_count());
        assert_eq!(array.phy(0).unwrap().kind(), PhyKind::TtlOut);
        assert_eq!(array.phy(2).unwrap().kind(), PhyKind::TtlInOut);
        assert_eq!(array.phy(3).unwrap().kind(), PhyKind::Log);
        assert!(array.phy(4).is_none());
        assert_eq!(array.capability(2), Some(ChannelCapability::InOut));
        assert_eq!(array.capability(9), None);
    }
}
