//! Shared CRI interconnect.
//!
//! Connects any number of masters to the single core. At most one
//! transaction is granted per cycle; when several masters are waiting, the
//! one earliest in the priority list wins and the rest keep their request for
//! the next cycle. Priority is fixed at construction, so the same inputs
//! always produce the same grant sequence.
//!
//! Every grant is stamped with a fresh tag and remembered until its
//! completion comes back from the core. Completions are routed by tag only,
//! never by "whoever asked last", so a parked input read that completes many
//! cycles later still finds its way home.
//!
//! # Usage
//!
//! ```ignore
//! use rtio_emu::rtio::interconnect::CriInterconnect;
//! use rtio_emu::rtio::cri::MasterId;
//!
//! let mut bus = CriInterconnect::new(vec![MasterId(0), MasterId(1)]);
//! if let Some(txn) = bus.arbitrate(&mut [kernel.slot_mut(), dma.slot_mut()]) {
//!     if let Some(completion) = core.execute(txn, now) {
//!         bus.route(completion, &mut [kernel.slot_mut(), dma.slot_mut()]);
//!     }
//! }
//! ```

use std::collections::HashMap;

use super::cri::{Completion, MasterId, MasterSlot, Transaction};

/// Per-master grant counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MasterStats {
    /// Transactions granted.
    pub grants: u64,
    /// Cycles spent waiting while another master was granted.
    pub stalls: u64,
}

/// Fixed-priority arbiter and completion router.
#[derive(Debug)]
pub struct CriInterconnect {
    /// Masters, highest priority first.
    priority: Vec<MasterId>,
    next_tag: u64,
    /// Granted transactions awaiting completion.
    in_flight: HashMap<u64, MasterId>,
    stats: HashMap<MasterId, MasterStats>,
    /// Cycles in which more than one master was requesting.
    contention_count: u64,
    /// Completions that matched no in-flight tag.
    misroutes: u64,
}

impl CriInterconnect {
    /// Create an interconnect. `priority` lists masters highest first.
    pub fn new(priority: Vec<MasterId>) -> Self {
        let stats = priority.iter().map(|&id| (id, MasterStats::default())).collect();
        Self {
            priority,
            next_tag: 0,
            in_flight: HashMap::new(),
            stats,
            contention_count: 0,
            misroutes: 0,
        }
    }

    /// Masters, highest priority first.
    pub fn priority(&self) -> &[MasterId] {
        &self.priority
    }

    /// Pick at most one waiting master and take its command.
    ///
    /// Slots whose id is not in the priority list are ignored.
    pub fn arbitrate(&mut self, slots: &mut [&mut MasterSlot]) -> Option<Transaction> {
        let waiting: Vec<MasterId> = self
            .priority
            .iter()
            .copied()
            .filter(|id| slots.iter().any(|s| s.id() == *id && s.has_request()))
            .collect();

        let (&winner, losers) = waiting.split_first()?;
        if !losers.is_empty() {
            self.contention_count += 1;
            for id in losers {
                if let Some(stats) = self.stats.get_mut(id) {
                    stats.stalls += 1;
                }
            }
            log::trace!("Arbitration: {} granted over {} waiting", winner, losers.len());
        }

        let slot = slots.iter_mut().find(|s| s.id() == winner)?;
        let tag = self.next_tag;
        let command = slot.take_request(tag)?;
        self.next_tag = self.next_tag.wrapping_add(1);
        self.in_flight.insert(tag, winner);
        if let Some(stats) = self.stats.get_mut(&winner) {
            stats.grants += 1;
        }

        Some(Transaction { master: winner, tag, command })
    }

    /// Deliver a completion to the master that issued the transaction.
    ///
    /// Returns false (and delivers nothing) if the tag is unknown or the
    /// completion names a different master than the one granted.
    pub fn route(&mut self, completion: Completion, slots: &mut [&mut MasterSlot]) -> bool {
        let Some(&owner) = self.in_flight.get(&completion.tag) else {
            log::error!("Completion with unknown tag {} dropped", completion.tag);
            self.misroutes += 1;
            return false;
        };
        if owner != completion.master {
            log::error!(
                "Completion tag {} claims {} but was granted to {}",
                completion.tag,
                completion.master,
                owner
            );
            self.misroutes += 1;
            return false;
        }
        self.in_flight.remove(&completion.tag);

        let delivered = slots
            .iter_mut()
            .find(|s| s.id() == owner)
            .is_some_and(|s| s.complete(completion.tag, completion.response));
        if !delivered {
            log::error!("{} did not accept completion tag {}", owner, completion.tag);
            self.misroutes += 1;
        }
        delivered
    }

    /// Number of transactions granted but not yet completed.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Counters for one master.
    pub fn master_stats(&self, id: MasterId) -> Option<&MasterStats> {
        self.stats.get(&id)
    }

    pub fn contention_count(&self) -> u64 {
        self.contention_count
    }

    pub fn misroutes(&self) -> u64 {
        self.misroutes
    }

    /// Forget everything in flight and clear the counters.
    pub fn reset(&mut self) {
        self.next_tag = 0;
        self.in_flight.clear();
        for stats in self.stats.values_mut() {
            *stats = MasterStats::default();
        }
        self.contention_count = 0;
        self.misroutes = 0;
    }

    /// Print arbitration statistics.
    pub fn print_summary(&self) {
        println!("Interconnect:");
        println!("  Contended cycles: {}", self.contention_count);
        for id in &self.priority {
            if let Some(stats) = self.stats.get(id) {
                println!("  {}: {} grants, {} stalls", id, stats.grants, stats.stalls);
            }
        }
        if self.misroutes > 0 {
            println!("  Dropped completions: {}", self.misroutes);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rtio::cri::{Command, PollResult, Response, SlotState};
    use crate::rtio::timestamp::Timestamp;

    fn out(ts: u64) -> Command {
        Command::output(0, Timestamp::new(ts), 1)
    }

    #[test]
    fn test_single_master_granted() {
        let mut bus = CriInterconnect::new(vec![MasterId(0), MasterId(1)]);
        let mut a = MasterSlot::new(MasterId(0));
        let mut b = MasterSlot::new(MasterId(1));

        assert!(bus.arbitrate(&mut [&mut a, &mut b]).is_none());

        b.submit(out(5)).unwrap();
        let txn = bus.arbitrate(&mut [&mut a, &mut b]).unwrap();
        assert_eq!(txn.master, MasterId(1));
        assert_eq!(txn.command, out(5));
        assert_eq!(b.state(), SlotState::AwaitingCompletion);
        assert_eq!(bus.contention_count(), 0);
    }

    #[test]
    fn test_priority_is_deterministic() {
        let mut bus = CriInterconnect::new(vec![MasterId(0), MasterId(1)]);
        let mut a = MasterSlot::new(MasterId(0));
        let mut b = MasterSlot::new(MasterId(1));
        a.submit(out(1)).unwrap();
        b.submit(out(2)).unwrap();

        // Slot order in the call does not matter, the priority list does
        let first = bus.arbitrate(&mut [&mut b, &mut a]).unwrap();
        assert_eq!(first.master, MasterId(0));
        assert!(b.has_request(), "loser keeps its request");
        assert_eq!(bus.contention_count(), 1);
        assert_eq!(bus.master_stats(MasterId(1)).unwrap().stalls, 1);

        // A is still awaiting completion, so B goes next
        let second = bus.arbitrate(&mut [&mut a, &mut b]).unwrap();
        assert_eq!(second.master, MasterId(1));
        assert_ne!(first.tag, second.tag);
    }

    #[test]
    fn test_reversed_priority() {
        let mut bus = CriInterconnect::new(vec![MasterId(1), MasterId(0)]);
        let mut a = MasterSlot::new(MasterId(0));
        let mut b = MasterSlot::new(MasterId(1));
        a.submit(out(1)).unwrap();
        b.submit(out(2)).unwrap();
        assert_eq!(bus.arbitrate(&mut [&mut a, &mut b]).unwrap().master, MasterId(1));
    }

    #[test]
    fn test_route_by_tag() {
        let mut bus = CriInterconnect::new(vec![MasterId(0), MasterId(1)]);
        let mut a = MasterSlot::new(MasterId(0));
        let mut b = MasterSlot::new(MasterId(1));
        a.submit(Command::input_read(2)).unwrap();
        let ta = bus.arbitrate(&mut [&mut a, &mut b]).unwrap();
        b.submit(out(9)).unwrap();
        let tb = bus.arbitrate(&mut [&mut a, &mut b]).unwrap();
        assert_eq!(bus.in_flight(), 2);

        // B's completion arrives first
        let rb = Response::ok(Timestamp::new(9));
        assert!(bus.route(Completion { master: tb.master, tag: tb.tag, response: rb }, &mut [&mut a, &mut b]));
        assert_eq!(a.poll_response(), PollResult::Pending);
        assert_eq!(b.poll_response(), PollResult::Ready(rb));

        let ra = Response::input(1, Timestamp::new(30));
        assert!(bus.route(Completion { master: ta.master, tag: ta.tag, response: ra }, &mut [&mut a, &mut b]));
        assert_eq!(a.poll_response(), PollResult::Ready(ra));
        assert_eq!(bus.in_flight(), 0);
    }

    #[test]
    fn test_unknown_or_mismatched_completion_dropped() {
        let mut bus = CriInterconnect::new(vec![MasterId(0), MasterId(1)]);
        let mut a = MasterSlot::new(MasterId(0));
        let mut b = MasterSlot::new(MasterId(1));
        a.submit(out(1)).unwrap();
        let txn = bus.arbitrate(&mut [&mut a, &mut b]).unwrap();

        let response = Response::ok(Timestamp::new(1));
        assert!(!bus.route(Completion { master: MasterId(0), tag: 99, response }, &mut [&mut a, &mut b]));
        assert!(!bus.route(Completion { master: MasterId(1), tag: txn.tag, response }, &mut [&mut a, &mut b]));
        assert_eq!(bus.misroutes(), 2);
        assert_eq!(b.poll_response(), PollResult::Idle);
        assert_eq!(a.poll_response(), PollResult::Pending);

        assert!(bus.route(Completion { master: MasterId(0), tag: txn.tag, response }, &mut [&mut a, &mut b]));
    }

    #[test]
    fn test_reset_clears_in_flight() {
        let mut bus = CriInterconnect::new(vec![MasterId(0)]);
        let mut a = MasterSlot::new(MasterId(0));
        a.submit(out(1)).unwrap();
        bus.arbitrate(&mut [&mut a]).unwrap();
        bus.reset();
        assert_eq!(bus.in_flight(), 0);
        assert_eq!(bus.master_stats(MasterId(0)).unwrap().grants, 0);
    }
}
