//! Monitoring and injection.
//!
//! A side channel into the phys that bypasses the CRI bus entirely: probes
//! read what a channel currently shows at the edge, overrides force a TTL
//! output to a level. While an override is active, strobes from the core
//! still update the commanded level underneath; releasing the override
//! reveals it again.

use super::channel::ChannelArray;
use crate::error::MonInjError;

/// Current observable value of a channel.
pub fn probe(channels: &ChannelArray, channel: usize) -> Result<u32, MonInjError> {
    let phy = channels.phy(channel).ok_or(MonInjError::NoSuchChannel(channel))?;
    phy.probe().ok_or(MonInjError::NotProbed(channel))
}

/// Force a channel's output level (`Some`) or release it (`None`).
pub fn inject(channels: &mut ChannelArray, channel: usize, level: Option<bool>) -> Result<(), MonInjError> {
    let phy = channels.phy_mut(channel).ok_or(MonInjError::NoSuchChannel(channel))?;
    if !phy.set_override(level) {
        return Err(MonInjError::NotOverridable(channel));
    }
    match level {
        Some(level) => log::info!("MonInj: channel {} forced {}", channel, if level { "high" } else { "low" }),
        None => log::info!("MonInj: channel {} override released", channel),
    }
    Ok(())
}

/// Active override on a channel, if any.
pub fn override_level(channels: &ChannelArray, channel: usize) -> Result<Option<bool>, MonInjError> {
    let phy = channels.phy(channel).ok_or(MonInjError::NoSuchChannel(channel))?;
    Ok(phy.override_level())
}
