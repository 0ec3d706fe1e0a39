//! Log channel phy.
//!
//! Collects bytes from data words (four per word, little-endian) and emits a
//! line on NUL or newline.

use super::{OutputEvent, Phy};
use crate::board::PhyKind;

#[derive(Debug, Clone, Default)]
pub struct LogPhy {
    buffer: Vec<u8>,
    lines: Vec<String>,
}

impl LogPhy {
    pub fn new() -> Self {
        Self::default()
    }

    fn flush(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        let line = String::from_utf8_lossy(&self.buffer).into_owned();
        self.buffer.clear();
        log::info!(target: "rtio_log", "{}", line);
        self.lines.push(line);
    }
}

impl Phy for LogPhy {
    fn kind(&self) -> PhyKind {
        PhyKind::Log
    }

    fn strobe(&mut self, _cycle: u64, event: &OutputEvent) {
        for word in &event.data {
            for byte in word.to_le_bytes() {
                match byte {
                    0 | b'\n' => self.flush(),
                    b => self.buffer.push(b),
                }
            }
        }
    }

    fn messages(&self) -> &[String] {
        &self.lines
    }

    fn reset(&mut self) {
        self.buffer.clear();
        self.lines.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rtio::cri::Command;
    use crate::rtio::timestamp::Timestamp;

    fn strobe_message(phy: &mut LogPhy, text: &str) {
        let cmd = Command::log_message(0, Timestamp::new(0), text);
        let event = OutputEvent { timestamp: cmd.timestamp, address: 0, data: cmd.data };
        phy.strobe(0, &event);
    }

    #[test]
    fn test_single_message() {
        let mut phy = LogPhy::new();
        strobe_message(&mut phy, "kernel started");
        assert_eq!(phy.messages(), ["kernel started".to_string()]);
    }

    #[test]
    fn test_newline_splits_lines() {
        let mut phy = LogPhy::new();
        strobe_message(&mut phy, "a\nbc");
        assert_eq!(phy.messages(), ["a".to_string(), "bc".to_string()]);
    }

    #[test]
    fn test_empty_message_emits_nothing() {
        let mut phy = LogPhy::new();
        strobe_message(&mut phy, "");
        assert!(phy.messages().is_empty());
    }
}
