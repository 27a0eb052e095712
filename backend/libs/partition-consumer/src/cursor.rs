//! Per-partition fetch position

use crate::broker::PartitionId;
use tracing::{debug, warn};

/// Next offset to fetch for one partition.
///
/// Only moves forward. Normal progress goes through [`OffsetCursor::advance`];
/// [`OffsetCursor::reset_to_latest`] is reserved for out-of-range recovery,
/// where the skipped range is lost for good.
#[derive(Debug, Clone)]
pub struct OffsetCursor {
    partition: PartitionId,
    next_offset: i64,
}

impl OffsetCursor {
    pub fn new(partition: PartitionId, next_offset: i64) -> Self {
        Self {
            partition,
            next_offset,
        }
    }

    pub fn partition(&self) -> &PartitionId {
        &self.partition
    }

    pub fn next_offset(&self) -> i64 {
        self.next_offset
    }

    /// Move to `max(current, candidate)`. Returns true if the cursor moved.
    pub fn advance(&mut self, candidate_next_offset: i64) -> bool {
        if candidate_next_offset <= self.next_offset {
            return false;
        }

        debug!(
            partition = %self.partition,
            from = self.next_offset,
            to = candidate_next_offset,
            "Cursor advanced"
        );
        self.next_offset = candidate_next_offset;
        true
    }

    /// Jump to the broker's latest offset after an out-of-range fault.
    ///
    /// Returns true if the cursor moved; everything between the old and the
    /// new position is skipped.
    pub fn reset_to_latest(&mut self, broker_latest_offset: i64) -> bool {
        if broker_latest_offset <= self.next_offset {
            debug!(
                partition = %self.partition,
                current = self.next_offset,
                latest = broker_latest_offset,
                "Latest offset not ahead of cursor, keeping position"
            );
            return false;
        }

        warn!(
            partition = %self.partition,
            old_offset = self.next_offset,
            new_offset = broker_latest_offset,
            skipped = broker_latest_offset - self.next_offset,
            "Cursor offset out of range; resetting to latest, skipped messages are lost"
        );
        self.next_offset = broker_latest_offset;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cursor(at: i64) -> OffsetCursor {
        OffsetCursor::new(PartitionId::new("phish-storm-request", 0), at)
    }

    #[test]
    fn test_advance_never_regresses() {
        let mut c = cursor(100);

        assert!(c.advance(105));
        assert_eq!(c.next_offset(), 105);

        assert!(!c.advance(103));
        assert_eq!(c.next_offset(), 105);

        assert!(!c.advance(105));
        assert_eq!(c.next_offset(), 105);
    }

    #[test]
    fn test_reset_to_latest_moves_forward() {
        let mut c = cursor(10);

        assert!(c.reset_to_latest(500));
        assert_eq!(c.next_offset(), 500);
    }

    #[test]
    fn test_reset_to_latest_ignores_older_offset() {
        let mut c = cursor(800);

        assert!(!c.reset_to_latest(500));
        assert_eq!(c.next_offset(), 800);
    }
}
