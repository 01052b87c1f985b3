//! Progress markers per payload type.

use replaygate_types::{NodeId, PayloadType};
use tracing::info;

/// Quarter checkpoints logged while a fixed amount is generated.
const CHECKPOINTS: [u8; 4] = [25, 50, 75, 100];

/// Logs start, quarter checkpoints and end of a fixed-size run.
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    node: NodeId,
    payload_type: PayloadType,
    total: u64,
    done: u64,
    next: usize,
}

impl ProgressTracker {
    pub fn new(node: NodeId, payload_type: PayloadType, total: u64) -> Self {
        Self {
            node,
            payload_type,
            total,
            done: 0,
            next: 0,
        }
    }

    /// Count one generated payload. Returns the checkpoint crossed, with 0
    /// for the first payload.
    pub fn advance(&mut self) -> Option<u8> {
        if self.total == 0 || self.done >= self.total {
            return None;
        }
        self.done += 1;

        if self.done == 1 {
            info!(node = %self.node, payload_type = %self.payload_type, total = self.total, "Generation started");
            if self.total > 1 {
                return Some(0);
            }
        }

        let percent = self.done.saturating_mul(100) / self.total;
        let checkpoint = *CHECKPOINTS.get(self.next)?;
        if percent < checkpoint as u64 {
            return None;
        }
        // Skip checkpoints a small total jumps over.
        while self.next < CHECKPOINTS.len() && percent >= CHECKPOINTS[self.next] as u64 {
            self.next += 1;
        }
        let reached = CHECKPOINTS[self.next - 1];
        if reached == 100 {
            info!(node = %self.node, payload_type = %self.payload_type, total = self.total, "Generation finished");
        } else {
            info!(
                node = %self.node,
                payload_type = %self.payload_type,
                generated = self.done,
                total = self.total,
                "Generation {}% done",
                reached
            );
        }
        Some(reached)
    }

    pub fn is_done(&self) -> bool {
        self.done >= self.total
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quarter_checkpoints() {
        let mut tracker = ProgressTracker::new(NodeId(0), PayloadType::Bytes, 8);
        let marks: Vec<_> = (0..10).filter_map(|_| tracker.advance()).collect();
        assert_eq!(marks, vec![0, 25, 50, 75, 100]);
        assert!(tracker.is_done());
    }

    #[test]
    fn test_small_totals_jump_checkpoints() {
        let mut tracker = ProgressTracker::new(NodeId(0), PayloadType::Dummy, 3);
        let marks: Vec<_> = (0..3).filter_map(|_| tracker.advance()).collect();
        // 1/3 = 33%, 2/3 = 66%, 3/3 = 100%
        assert_eq!(marks, vec![0, 50, 100]);

        let mut single = ProgressTracker::new(NodeId(0), PayloadType::Dummy, 1);
        assert_eq!(single.advance(), Some(100));
    }
}
