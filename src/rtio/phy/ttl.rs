//! TTL phy.
//!
//! Output side: writing address 0 sets the level from bit 0 of the first
//! data word. Input side: edges queued from outside are reported in time
//! order once their cycle comes, filtered by the sensitivity register
//! (address 2: bit 0 rising, bit 1 falling; both enabled at reset).

use std::collections::VecDeque;

use super::{InputEvent, OutputEvent, Phy, Strobe};
use crate::board::PhyKind;

/// Output level register.
pub const TTL_ADDR_LEVEL: u8 = 0;

/// Input sensitivity register.
pub const TTL_ADDR_SENSITIVITY: u8 = 2;

const SENSE_RISING: u32 = 1 << 0;
const SENSE_FALLING: u32 = 1 << 1;

/// A TTL line.
#[derive(Debug, Clone)]
pub struct Ttl {
    kind: PhyKind,
    name: String,
    /// Level set by the last committed output event.
    commanded: bool,
    /// Level forced through injection.
    forced: Option<bool>,
    sensitivity: u32,
    edges: VecDeque<InputEvent>,
    history: Vec<Strobe>,
}

impl Ttl {
    pub fn new(kind: PhyKind, name: &str) -> Self {
        Self {
            kind,
            name: name.to_string(),
            commanded: false,
            forced: None,
            sensitivity: SENSE_RISING | SENSE_FALLING,
            edges: VecDeque::new(),
            history: Vec::new(),
        }
    }

    /// Channel name this phy was built for.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Level seen on the pin: the override if one is active.
    pub fn level(&self) -> bool {
        self.forced.unwrap_or(self.commanded)
    }

    /// Level last set by a committed command.
    pub fn commanded_level(&self) -> bool {
        self.commanded
    }

    fn has_input(&self) -> bool {
        matches!(self.kind, PhyKind::TtlIn | PhyKind::TtlInOut)
    }

    fn accepts(&self, event: &InputEvent) -> bool {
        let mask = if event.data & 1 != 0 { SENSE_RISING } else { SENSE_FALLING };
        self.sensitivity & mask != 0
    }
}

impl Phy for Ttl {
    fn kind(&self) -> PhyKind {
        self.kind
    }

    fn strobe(&mut self, cycle: u64, event: &OutputEvent) {
        let data = event.data.first().copied().unwrap_or(0);
        match event.address {
            TTL_ADDR_LEVEL => self.commanded = data & 1 != 0,
            TTL_ADDR_SENSITIVITY => self.sensitivity = data & (SENSE_RISING | SENSE_FALLING),
            other => log::debug!("{}: write to unmapped address {}", self.name, other),
        }
        self.history.push(Strobe {
            cycle,
            timestamp: event.timestamp,
            address: event.address,
            data,
        });
    }

    fn sample(&mut self, cycle: u64) -> Option<InputEvent> {
        while let Some(front) = self.edges.front() {
            if front.timestamp.coarse() > cycle {
                return None;
            }
            let event = self.edges.pop_front()?;
            if self.accepts(&event) {
                return Some(event);
            }
        }
        None
    }

    fn queue_input(&mut self, event: InputEvent) -> bool {
        if !self.has_input() {
            return false;
        }
        // Keep edges in time order regardless of injection order
        let pos = self.edges.partition_point(|e| e.timestamp <= event.timestamp);
        self.edges.insert(pos, event);
        true
    }

    fn probe(&self) -> Option<u32> {
        Some(self.level() as u32)
    }

    fn set_override(&mut self, level: Option<bool>) -> bool {
        if self.kind == PhyKind::TtlIn {
            return false;
        }
        self.forced = level;
        true
    }

    fn override_level(&self) -> Option<bool> {
        self.forced
    }

    fn strobes(&self) -> &[Strobe] {
        &self.history
    }

    fn reset(&mut self) {
        self.commanded = false;
        self.forced = None;
        self.sensitivity = SENSE_RISING | SENSE_FALLING;
        self.edges.clear();
        self.history.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rtio::cri::Payload;
    use crate::rtio::timestamp::Timestamp;

    fn event(ts: u64, address: u8, data: u32) -> OutputEvent {
        let mut payload = Payload::new();
        payload.push(data);
        OutputEvent { timestamp: Timestamp::new(ts), address, data: payload }
    }

    fn edge(ts: u64, level: u32) -> InputEvent {
        InputEvent { timestamp: Timestamp::new(ts), data: level }
    }

    #[test]
    fn test_output_level() {
        let mut ttl = Ttl::new(PhyKind::TtlOut, "led");
        ttl.strobe(5, &event(5, TTL_ADDR_LEVEL, 1));
        assert!(ttl.level());
        ttl.strobe(6, &event(6, TTL_ADDR_LEVEL, 0x10));
        assert!(!ttl.level());
        assert_eq!(ttl.strobes().len(), 2);
        assert_eq!(ttl.strobes()[0].cycle, 5);
    }

    #[test]
    fn test_output_only_has_no_input() {
        let mut ttl = Ttl::new(PhyKind::TtlOut, "led");
        assert!(!ttl.queue_input(edge(1, 1)));
        assert!(ttl.sample(10).is_none());
    }

    #[test]
    fn test_edges_reported_in_time_order() {
        let mut ttl = Ttl::new(PhyKind::TtlInOut, "ttl");
        assert!(ttl.queue_input(edge(20, 0)));
        assert!(ttl.queue_input(edge(10, 1)));

        assert!(ttl.sample(9).is_none());
        assert_eq!(ttl.sample(10), Some(edge(10, 1)));
        assert!(ttl.sample(15).is_none());
        assert_eq!(ttl.sample(25), Some(edge(20, 0)));
    }

    #[test]
    fn test_sensitivity_filters_edges() {
        let mut ttl = Ttl::new(PhyKind::TtlInOut, "ttl");
        // Rising only
        ttl.strobe(0, &event(0, TTL_ADDR_SENSITIVITY, SENSE_RISING));
        ttl.queue_input(edge(1, 0));
        ttl.queue_input(edge(2, 1));
        assert_eq!(ttl.sample(5), Some(edge(2, 1)));
        assert!(ttl.sample(5).is_none());
    }

    #[test]
    fn test_override() {
        let mut ttl = Ttl::new(PhyKind::TtlOut, "led");
        assert!(ttl.set_override(Some(true)));
        assert_eq!(ttl.probe(), Some(1));

        ttl.strobe(1, &event(1, TTL_ADDR_LEVEL, 0));
        assert!(!ttl.commanded_level());
        assert_eq!(ttl.probe(), Some(1), "override wins over commanded level");

        ttl.set_override(None);
        assert_eq!(ttl.probe(), Some(0));

        let mut input = Ttl::new(PhyKind::TtlIn, "in");
        assert!(!input.set_override(Some(true)));
    }
}
