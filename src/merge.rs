use crate::{segment::Segment, Value};
use min_max_heap::MinMaxHeap;
use std::sync::Arc;

pub type BoxedIterator<'a> = Box<dyn Iterator<Item = crate::Result<Value>> + 'a>;

type IteratorIndex = usize;

#[derive(Debug)]
struct IteratorValue((IteratorIndex, Value));

impl std::ops::Deref for IteratorValue {
    type Target = Value;

    fn deref(&self) -> &Self::Target {
        &self.0 .1
    }
}

impl PartialEq for IteratorValue {
    fn eq(&self, other: &Self) -> bool {
        self.0 .1 == other.0 .1
    }
}
impl Eq for IteratorValue {}

impl PartialOrd for IteratorValue {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for IteratorValue {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0 .1.cmp(&other.0 .1)
    }
}

/// This iterator can iterate through N iterators simultaneously in order
/// This is achieved by advancing the iterators that yield the lowest item
/// and merging using a simple k-way merge algorithm.
///
/// If multiple iterators yield the same key, the freshest one (by seqno)
/// is emitted first.
#[allow(clippy::module_name_repetitions)]
pub struct MergeIterator<'a> {
    iterators: Vec<BoxedIterator<'a>>,
    heap: MinMaxHeap<IteratorValue>,
    evict_old_versions: bool,
    initialized: bool,
}

impl<'a> MergeIterator<'a> {
    /// Initializes a new merge iterator
    pub fn new(iterators: Vec<BoxedIterator<'a>>) -> Self {
        Self {
            iterators,
            heap: MinMaxHeap::new(),
            evict_old_versions: false,
            initialized: false,
        }
    }

    /// When enabled, only the entry with the highest seqno
    /// survives for each key
    #[must_use]
    pub fn evict_old_versions(mut self, v: bool) -> Self {
        self.evict_old_versions = v;
        self
    }

    pub fn from_segments(segments: &[Arc<Segment>]) -> crate::Result<MergeIterator<'a>> {
        let mut iter_vec: Vec<BoxedIterator<'a>> = Vec::with_capacity(segments.len());

        for segment in segments {
            iter_vec.push(Box::new(segment.iter()?));
        }

        Ok(MergeIterator::new(iter_vec))
    }

    fn advance_iter(&mut self, idx: usize) -> crate::Result<()> {
        let iterator = self.iterators.get_mut(idx).expect("iter should exist");

        if let Some(value) = iterator.next() {
            self.heap.push(IteratorValue((idx, value?)));
        }

        Ok(())
    }

    fn push_next(&mut self) -> crate::Result<()> {
        for idx in 0..self.iterators.len() {
            self.advance_iter(idx)?;
        }

        Ok(())
    }
}

impl<'a> Iterator for MergeIterator<'a> {
    type Item = crate::Result<Value>;

    fn next(&mut self) -> Option<Self::Item> {
        if !self.initialized {
            if let Err(e) = self.push_next() {
                return Some(Err(e));
            };
            self.initialized = true;
        }

        let head = self.heap.pop_min()?;

        let (iter_idx_consumed, _) = head.0;
        if let Err(e) = self.advance_iter(iter_idx_consumed) {
            return Some(Err(e));
        }

        if self.evict_old_versions {
            // As long as items beneath have the same key, ignore them:
            // they are shadowed by the entry with the highest seqno
            while let Some(next) = self.heap.pop_min() {
                if next.key == head.key {
                    let (iter_idx_consumed, _) = next.0;
                    if let Err(e) = self.advance_iter(iter_idx_consumed) {
                        return Some(Err(e));
                    }
                } else {
                    self.heap.push(next);
                    break;
                }
            }
        }

        Some(Ok(head.0 .1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ValueType;
    use test_log::test;

    fn boxed(items: Vec<Value>) -> BoxedIterator<'static> {
        Box::new(items.into_iter().map(Ok))
    }

    #[test]
    fn merge_interleaved() -> crate::Result<()> {
        let a = vec![
            Value::new(*b"a", *b"1", 1, ValueType::Value),
            Value::new(*b"c", *b"3", 3, ValueType::Value),
        ];
        let b = vec![Value::new(*b"b", *b"2", 2, ValueType::Value)];

        let merged = MergeIterator::new(vec![boxed(a), boxed(b)])
            .collect::<crate::Result<Vec<_>>>()?;

        let keys = merged.iter().map(|v| v.key.clone()).collect::<Vec<_>>();
        assert_eq!(
            vec![
                crate::UserKey::from(*b"a"),
                crate::UserKey::from(*b"b"),
                crate::UserKey::from(*b"c"),
            ],
            keys
        );

        Ok(())
    }

    #[test]
    fn merge_newest_version_wins() -> crate::Result<()> {
        let newer = vec![Value::new(*b"k", *b"v2", 5, ValueType::Value)];
        let older = vec![Value::new(*b"k", *b"v1", 2, ValueType::Value)];

        let merged = MergeIterator::new(vec![boxed(older), boxed(newer)])
            .evict_old_versions(true)
            .collect::<crate::Result<Vec<_>>>()?;

        assert_eq!(1, merged.len());
        assert_eq!(5, merged[0].seqno);
        assert_eq!(b"v2".as_slice(), &*merged[0].value);

        Ok(())
    }

    #[test]
    fn merge_keeps_all_versions_without_eviction() -> crate::Result<()> {
        let newer = vec![Value::new(*b"k", *b"v2", 5, ValueType::Value)];
        let older = vec![Value::new(*b"k", *b"v1", 2, ValueType::Value)];

        let merged = MergeIterator::new(vec![boxed(older), boxed(newer)])
            .collect::<crate::Result<Vec<_>>>()?;

        // Descending seqno within the same key
        assert_eq!(2, merged.len());
        assert_eq!(5, merged[0].seqno);
        assert_eq!(2, merged[1].seqno);

        Ok(())
    }

    #[test]
    fn merge_tombstone_shadows_older_value() -> crate::Result<()> {
        let newer = vec![Value::new_tombstone(*b"k", 5)];
        let older = vec![Value::new(*b"k", *b"v1", 2, ValueType::Value)];

        let merged = MergeIterator::new(vec![boxed(older), boxed(newer)])
            .evict_old_versions(true)
            .collect::<crate::Result<Vec<_>>>()?;

        assert_eq!(1, merged.len());
        assert!(merged[0].is_tombstone());

        Ok(())
    }
}
