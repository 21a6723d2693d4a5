//! Recent primary encodings available for redundancy.

use std::collections::VecDeque;

use opus_red_common::red::{RED_MAX_RECOVERY_DISTANCE, RED_PACKETIZATION_TIME};

/// Most entries the history may hold before it is reset.
pub const MAX_ENCODING_HISTORY_SIZE: usize = 10;

/// A previously sent primary encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodingHistoryEntry {
    // ---
    pub timestamp: u32,
    pub payload: Vec<u8>,
}

/// Primary encodings in send order, oldest first.
///
/// Entries age out by timestamp. The size cap only matters when timestamps
/// misbehave; hitting it clears the whole history.
#[derive(Debug, Clone)]
pub struct EncodingHistory {
    // ---
    entries: VecDeque<EncodingHistoryEntry>,
    max_size: usize,
    max_timestamp_delta: u32,
}

impl Default for EncodingHistory {
    fn default() -> Self {
        Self::new(
            MAX_ENCODING_HISTORY_SIZE,
            RED_MAX_RECOVERY_DISTANCE * RED_PACKETIZATION_TIME,
        )
    }
}

impl EncodingHistory {
    // ---
    pub fn new(max_size: usize, max_timestamp_delta: u32) -> Self {
        // ---
        Self {
            entries: VecDeque::with_capacity(max_size),
            max_size,
            max_timestamp_delta,
        }
    }

    /// Entry with exactly `timestamp`, if still held.
    pub fn find(&self, timestamp: u32) -> Option<&EncodingHistoryEntry> {
        self.entries.iter().find(|e| e.timestamp == timestamp)
    }

    /// Records the primary just sent.
    ///
    /// Entries at least `max_timestamp_delta` older than `primary_timestamp`
    /// are evicted first. Unimportant encodings are never stored.
    pub fn update(&mut self, primary_timestamp: u32, payload: &[u8], important: bool) {
        // ---
        while let Some(front) = self.entries.front() {
            if primary_timestamp.wrapping_sub(front.timestamp) >= self.max_timestamp_delta {
                self.entries.pop_front();
            } else {
                break;
            }
        }

        if !important {
            return;
        }

        if self.entries.len() + 1 > self.max_size {
            tracing::debug!(
                "encoding history full ({} entries), clearing",
                self.entries.len()
            );
            self.entries.clear();
        }

        self.entries.push_back(EncodingHistoryEntry {
            timestamp: primary_timestamp,
            payload: payload.to_vec(),
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_entries_age_out() {
        // ---
        let mut history = EncodingHistory::default();
        for i in 0..5u32 {
            history.update(i * 960, &[i as u8], true);
        }
        assert_eq!(history.len(), 5);

        // 4800 samples after the first entry evicts it
        history.update(5 * 960, &[5], true);
        assert_eq!(history.len(), 5);
        assert!(history.find(0).is_none());
        assert!(history.find(960).is_some());
    }

    #[test]
    fn test_unimportant_not_stored() {
        // ---
        let mut history = EncodingHistory::default();
        history.update(960, &[1], false);
        assert!(history.is_empty());
    }

    #[test]
    fn test_unimportant_still_evicts() {
        // ---
        let mut history = EncodingHistory::default();
        history.update(0, &[1], true);
        history.update(10 * 960, &[2], false);
        assert!(history.is_empty());
    }

    #[test]
    fn test_overflow_clears() {
        // ---
        // same timestamp repeated never ages out
        let mut history = EncodingHistory::default();
        for i in 0..MAX_ENCODING_HISTORY_SIZE {
            history.update(100, &[i as u8], true);
        }
        assert_eq!(history.len(), MAX_ENCODING_HISTORY_SIZE);

        history.update(100, &[0xFF], true);
        assert_eq!(history.len(), 1);
        assert_eq!(history.find(100).map(|e| e.payload.clone()), Some(vec![0xFF]));
    }

    #[test]
    fn test_timestamp_wrap() {
        // ---
        let mut history = EncodingHistory::default();
        history.update(u32::MAX - 959, &[1], true);
        history.update(0, &[2], true);

        assert_eq!(history.len(), 2);
        assert!(history.find(u32::MAX - 959).is_some());
    }
}
