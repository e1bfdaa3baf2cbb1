use super::node::NodeId;
use crate::constants::DEFAULT_PING_THRESHOLD;

/// Decides which of the nodes handed to us are worth a ping.
///
/// Replies to `find_node` and `get_peers` return far more contacts than we
/// could ever ping. The controller thins them out to keep the outbound ping
/// rate where the operator wants it.
pub trait PingControl: Send {
    fn decide_ping(&self, nid: &NodeId) -> bool;
}

/// Pings nodes whose control byte is at or above a threshold. Raising the
/// threshold by one drops roughly 1/256 of the candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThresholdControl {
    threshold: u8,
}

impl ThresholdControl {
    pub fn new(threshold: u8) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> u8 {
        self.threshold
    }

    pub fn set_threshold(&mut self, threshold: u8) {
        self.threshold = threshold;
    }
}

impl Default for ThresholdControl {
    fn default() -> Self {
        Self::new(DEFAULT_PING_THRESHOLD)
    }
}

impl PingControl for ThresholdControl {
    fn decide_ping(&self, nid: &NodeId) -> bool {
        nid.control_byte() >= self.threshold
    }
}
