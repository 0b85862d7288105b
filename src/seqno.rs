use crate::SeqNo;
use std::sync::{
    atomic::{
        AtomicU64,
        Ordering::{Acquire, Release},
    },
    Arc,
};

/// Thread-safe sequence number generator
///
/// Sequence numbers order writes; a value with a higher sequence number
/// shadows an item with the same key and a lower sequence number.
#[derive(Clone, Default, Debug)]
pub struct SequenceNumberCounter(Arc<AtomicU64>);

impl std::ops::Deref for SequenceNumberCounter {
    type Target = Arc<AtomicU64>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl SequenceNumberCounter {
    /// Creates a new counter, setting it to some previous value
    #[must_use]
    pub fn new(prev: SeqNo) -> Self {
        Self(Arc::new(AtomicU64::new(prev)))
    }

    /// Gets the current sequence number without bumping it.
    #[must_use]
    pub fn get(&self) -> SeqNo {
        self.load(Acquire)
    }

    /// Gets the next sequence number.
    #[must_use]
    pub fn next(&self) -> SeqNo {
        self.fetch_add(1, Release) + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seqno_strictly_increasing() {
        let counter = SequenceNumberCounter::new(41);

        assert_eq!(42, counter.next());
        assert_eq!(43, counter.next());
        assert_eq!(43, counter.get());
    }
}
