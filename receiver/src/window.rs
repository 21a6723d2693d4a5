//! Fixed-capacity ring of recently seen media timestamps.

/// Circular timestamp log with linear-scan membership.
///
/// Adding past capacity overwrites the oldest slot. Removal clears a slot in
/// place and does not move the write index.
#[derive(Debug, Clone)]
pub struct RecentTimestampWindow {
    // ---
    slots: Vec<Option<u32>>,
    index: usize,
}

impl RecentTimestampWindow {
    // ---
    /// Creates an empty window. A capacity of 0 is raised to 1.
    pub fn new(capacity: usize) -> Self {
        // ---
        Self {
            slots: vec![None; capacity.max(1)],
            index: 0,
        }
    }

    pub fn add(&mut self, timestamp: u32) {
        // ---
        self.slots[self.index] = Some(timestamp);
        self.index = (self.index + 1) % self.slots.len();
    }

    pub fn contains(&self, timestamp: u32) -> bool {
        self.slots.iter().any(|slot| *slot == Some(timestamp))
    }

    /// Clears the first slot holding `timestamp`. Returns whether one was found.
    pub fn remove(&mut self, timestamp: u32) -> bool {
        // ---
        match self.slots.iter_mut().find(|slot| **slot == Some(timestamp)) {
            Some(slot) => {
                *slot = None;
                true
            }
            None => false,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of occupied slots.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
