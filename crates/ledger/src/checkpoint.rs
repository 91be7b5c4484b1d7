//! Block-indexed value history

use orgkit_core::BlockNumber;
use serde::{Deserialize, Serialize};

/// A value that became effective at `from_block`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub from_block: BlockNumber,
    pub value: u128,
}

/// History of a value, one checkpoint per block that changed it
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoints(Vec<Checkpoint>);

impl Checkpoints {
    /// Latest value
    pub fn latest(&self) -> u128 {
        self.0.last().map(|c| c.value).unwrap_or(0)
    }

    /// Value as of the end of `block`
    pub fn value_at(&self, block: BlockNumber) -> u128 {
        // index of the first checkpoint strictly after `block`
        let idx = self.0.partition_point(|c| c.from_block <= block);
        if idx == 0 {
            0
        } else {
            self.0[idx - 1].value
        }
    }

    /// Record `value` as effective from `block`
    ///
    /// Blocks must be non-decreasing; a second write in the same block
    /// replaces the first.
    pub fn record(&mut self, block: BlockNumber, value: u128) {
        match self.0.last_mut() {
            Some(last) if last.from_block >= block => last.value = value,
            _ => self.0.push(Checkpoint { from_block: block, value }),
        }
    }

    /// Number of stored checkpoints
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the value was never written
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_at_reads_history() {
        let mut cp = Checkpoints::default();
        cp.record(3, 10);
        cp.record(7, 25);

        assert_eq!(cp.value_at(0), 0);
        assert_eq!(cp.value_at(2), 0);
        assert_eq!(cp.value_at(3), 10);
        assert_eq!(cp.value_at(6), 10);
        assert_eq!(cp.value_at(7), 25);
        assert_eq!(cp.value_at(100), 25);
        assert_eq!(cp.latest(), 25);
    }

    #[test]
    fn test_same_block_overwrites() {
        let mut cp = Checkpoints::default();
        cp.record(5, 1);
        cp.record(5, 2);
        assert_eq!(cp.len(), 1);
        assert_eq!(cp.value_at(5), 2);
    }
}
