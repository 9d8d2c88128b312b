//! Append-only audit trail of hash values.

use serde::Serialize;

/// Number of elements added per growth step.
pub const LOOKUP_GROWTH: usize = 128;

/// Growable array of every hash appended, repeats included.
///
/// Capacity is tracked explicitly and grows in fixed steps of
/// [`LOOKUP_GROWTH`]; the first block is allocated on construction.
#[derive(Debug, Clone, Serialize)]
pub struct HashLookupArray {
    hashes: Vec<u32>,
    #[serde(skip)]
    capacity: usize,
    #[serde(skip)]
    growth_events: usize,
}

impl Default for HashLookupArray {
    fn default() -> Self {
        Self::new()
    }
}

impl HashLookupArray {
    pub fn new() -> Self {
        Self {
            hashes: Vec::with_capacity(LOOKUP_GROWTH),
            capacity: LOOKUP_GROWTH,
            growth_events: 0,
        }
    }

    /// Appends `hash`, growing by one step first when the cursor is at capacity.
    pub fn append(&mut self, hash: u32) {
        if self.hashes.len() == self.capacity {
            self.grow();
        }
        self.hashes.push(hash);
    }

    fn grow(&mut self) {
        self.hashes.reserve_exact(LOOKUP_GROWTH);
        self.capacity += LOOKUP_GROWTH;
        self.growth_events += 1;
    }

    pub fn get(&self, index: usize) -> Option<u32> {
        self.hashes.get(index).copied()
    }

    pub fn as_slice(&self) -> &[u32] {
        &self.hashes
    }

    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }

    /// Logical capacity in elements.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of growth steps taken since construction.
    pub fn growth_events(&self) -> usize {
        self.growth_events
    }

    /// Number of times `hash` was appended.
    pub fn occurrences(&self, hash: u32) -> usize {
        self.hashes.iter().filter(|&&h| h == hash).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_keeps_order_and_repeats() {
        let mut array = HashLookupArray::new();
        array.append(7);
        array.append(3);
        array.append(7);

        assert_eq!(array.as_slice(), &[7, 3, 7]);
        assert_eq!(array.occurrences(7), 2);
        assert_eq!(array.growth_events(), 0);
    }

    #[test]
    fn test_growth_by_fixed_step() {
        let mut array = HashLookupArray::new();
        for i in 0..128 {
            array.append(i);
        }
        assert_eq!(array.growth_events(), 0);
        assert_eq!(array.capacity(), 128);

        array.append(128);
        assert_eq!(array.growth_events(), 1);
        assert_eq!(array.capacity(), 256);
        assert_eq!(array.get(128), Some(128));
        assert_eq!(array.get(0), Some(0));
        assert_eq!(array.len(), 129);
    }

    #[test]
    fn test_get_out_of_range() {
        let array = HashLookupArray::new();
        assert!(array.is_empty());
        assert_eq!(array.get(0), None);
    }
}
