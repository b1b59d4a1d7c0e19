use std::cmp::Ordering;
use std::collections::VecDeque;

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::spill::{SpillError, SpillStore, TempfileSpillStore};

type Comparator<T> = Box<dyn Fn(&T, &T) -> Ordering + Send>;

/// A queue bounded in memory that transparently spills its tail to a
/// [`SpillStore`] and reads it back in order.
///
/// FIFO order is preserved across the memory/disk boundary: once elements
/// start spilling, new offers keep going to the store until it is fully
/// drained back, so an element never overtakes one offered before it. With
/// a comparator the elements come back in comparator order instead of
/// insertion order, also across the boundary.
///
/// Not internally synchronized. Each instance is a single-owner per-host
/// buffer; callers sharing one across threads must serialize access
/// externally.
pub struct BoundedOverflowQueue<T, S: SpillStore<T> = TempfileSpillStore<T>> {
    memory: VecDeque<T>,
    max_in_memory: usize,
    spill: S,
    // Number of elements currently held by the spill store
    spilled: usize,
    // One-slot read-ahead from the spill store. Counted by `size()` so the
    // queue never undercounts an element already read but not yet returned.
    cached: Option<T>,
    comparator: Option<Comparator<T>>,
    store_failed: bool,
}

impl<T> BoundedOverflowQueue<T>
where
    T: Serialize + DeserializeOwned,
{
    /// FIFO queue spilling to a self-deleting temp file.
    pub fn spilling_to_tempfile(max_in_memory: usize) -> Self {
        Self::new(max_in_memory, TempfileSpillStore::new())
    }
}

impl<T, S: SpillStore<T>> BoundedOverflowQueue<T, S> {
    pub fn new(max_in_memory: usize, spill: S) -> Self {
        if max_in_memory == 0 {
            panic!("BoundedOverflowQueue.max_in_memory cannot be zero");
        }
        Self {
            memory: VecDeque::with_capacity(max_in_memory),
            max_in_memory,
            spill,
            spilled: 0,
            cached: None,
            comparator: None,
            store_failed: false,
        }
    }

    /// Keep buffered elements in comparator order rather than insertion
    /// order. Used when a host's pending set must stay sorted (e.g. by next
    /// fetch time) even while partially on disk.
    ///
    /// Emission order is exact even past the memory bound: the in-memory
    /// buffer always holds elements that order at or below everything
    /// spilled, so `poll` can emit its front without consulting the store.
    /// Keeping that invariant costs one extra spill write per offer while
    /// overflowing and one compaction pass over the store each time the
    /// buffer drains.
    pub fn with_comparator(
        max_in_memory: usize,
        spill: S,
        comparator: impl Fn(&T, &T) -> Ordering + Send + 'static,
    ) -> Self {
        let mut queue = Self::new(max_in_memory, spill);
        queue.comparator = Some(Box::new(comparator));
        queue
    }

    /// Offer an element. Returns false only when the spill store has become
    /// unavailable; the element is dropped in that case and the failure is
    /// latched for the lifetime of the queue.
    pub fn offer(&mut self, element: T) -> bool {
        if self.store_failed {
            return false;
        }
        match self.comparator {
            Some(_) => self.offer_ordered(element),
            None => self.offer_fifo(element),
        }
    }

    fn offer_fifo(&mut self, element: T) -> bool {
        let overflowing =
            self.spilled > 0 || self.cached.is_some() || self.memory.len() >= self.max_in_memory;
        if !overflowing {
            self.memory.push_back(element);
            return true;
        }
        match self.spill.append(&element) {
            Ok(()) => {
                self.spilled += 1;
                true
            }
            Err(e) => {
                log::error!("spill store unavailable, rejecting offers: {}", e);
                self.store_failed = true;
                false
            }
        }
    }

    fn offer_ordered(&mut self, element: T) -> bool {
        self.insert_sorted(element);
        // While anything is spilled, every offer evicts the greatest
        // buffered element, even below capacity. Either the newcomer leaves
        // again or it displaces a former maximum, so the buffer never holds
        // an element greater than a spilled one.
        if self.spilled == 0 && self.memory.len() <= self.max_in_memory {
            return true;
        }
        let evicted = self.memory.pop_back().unwrap();
        match self.spill.append(&evicted) {
            Ok(()) => {
                self.spilled += 1;
                true
            }
            Err(e) => {
                log::error!("spill store unavailable, rejecting offers: {}", e);
                self.store_failed = true;
                false
            }
        }
    }

    fn insert_sorted(&mut self, element: T) {
        let comparator = self.comparator.as_ref().unwrap();
        let idx = self
            .memory
            .partition_point(|e| comparator(e, &element) != Ordering::Greater);
        self.memory.insert(idx, element);
    }

    /// Next element in queue order, or `None` when empty. Spill store
    /// failures are fatal for the instance and propagated.
    pub fn poll(&mut self) -> Result<Option<T>, SpillError> {
        if self.comparator.is_some() {
            if self.memory.is_empty() {
                self.compact_ordered()?;
            }
            return Ok(self.memory.pop_front());
        }

        let element = match self.memory.pop_front() {
            Some(e) => Some(e),
            None => match self.cached.take() {
                Some(e) => Some(e),
                None => self.take_spilled()?,
            },
        };

        // Read ahead one element so emptiness and size stay accurate
        // without touching the store again.
        if self.memory.is_empty() && self.cached.is_none() {
            self.cached = self.take_spilled()?;
        }
        Ok(element)
    }

    /// Like `poll`, but an empty queue is a precondition violation.
    ///
    /// Panics when called on an empty queue.
    pub fn remove(&mut self) -> Result<T, SpillError> {
        match self.poll()? {
            Some(e) => Ok(e),
            None => panic!("remove() on empty BoundedOverflowQueue"),
        }
    }

    fn take_spilled(&mut self) -> Result<Option<T>, SpillError> {
        if self.spilled == 0 {
            return Ok(None);
        }
        let element = self.spill.next()?;
        if element.is_some() {
            self.spilled -= 1;
        }
        Ok(element)
    }

    // One selection pass over the spilled tail: pull every spilled element
    // through the in-memory buffer, keeping the smallest and re-spilling
    // the rest. Afterwards everything buffered orders at or below
    // everything still spilled, so `pop_front` is globally minimal again.
    fn compact_ordered(&mut self) -> Result<(), SpillError> {
        let pass = self.spilled;
        for _ in 0..pass {
            let element = match self.take_spilled()? {
                Some(e) => e,
                None => break,
            };
            self.insert_sorted(element);
            if self.memory.len() > self.max_in_memory {
                let evicted = self.memory.pop_back().unwrap();
                if let Err(e) = self.spill.append(&evicted) {
                    self.store_failed = true;
                    return Err(e);
                }
                self.spilled += 1;
            }
        }
        Ok(())
    }

    /// Number of elements currently held, wherever they live: in memory, in
    /// the spill store, or in the read-ahead slot.
    pub fn size(&self) -> usize {
        self.memory.len() + self.spilled + self.cached.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    pub fn clear(&mut self) {
        self.memory.clear();
        self.cached = None;
        self.spilled = 0;
        self.spill.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::spill::VecSpillStore;

    #[test]
    fn example_scenario_memory_bound_of_one() {
        let mut queue: BoundedOverflowQueue<String> =
            BoundedOverflowQueue::spilling_to_tempfile(1);
        assert!(queue.offer("one".to_owned()));
        assert!(queue.offer("two".to_owned()));
        assert!(queue.offer("three".to_owned()));
        assert_eq!(queue.size(), 3);

        assert_eq!(queue.remove().unwrap(), "one");
        assert!(queue.offer("four".to_owned()));
        assert_eq!(queue.remove().unwrap(), "two");
        assert_eq!(queue.remove().unwrap(), "three");
        assert_eq!(queue.remove().unwrap(), "four");
        assert_eq!(queue.poll().unwrap(), None);
        assert_eq!(queue.size(), 0);
    }

    #[test]
    fn fifo_preserved_across_disk_boundary() {
        let mut queue: BoundedOverflowQueue<u32> = BoundedOverflowQueue::spilling_to_tempfile(3);
        for i in 0..50 {
            assert!(queue.offer(i));
        }
        for i in 0..50 {
            assert_eq!(queue.size(), (50 - i) as usize);
            assert_eq!(queue.poll().unwrap(), Some(i));
        }
        assert_eq!(queue.poll().unwrap(), None);
    }

    #[test]
    fn no_data_loss_under_churn() {
        // Repeated overflow-then-drain cycles must return the same values
        // in order every cycle and never leak or miscount.
        let mut queue: BoundedOverflowQueue<u32> = BoundedOverflowQueue::spilling_to_tempfile(2);
        for _cycle in 0..500 {
            for i in 0..10 {
                assert!(queue.offer(i));
            }
            assert_eq!(queue.size(), 10);
            for i in 0..10 {
                assert_eq!(queue.remove().unwrap(), i);
            }
            assert_eq!(queue.size(), 0);
        }
    }

    #[test]
    fn interleaved_offer_and_poll_keeps_order() {
        let mut queue: BoundedOverflowQueue<u32> = BoundedOverflowQueue::spilling_to_tempfile(2);
        let mut next_in = 0u32;
        let mut next_out = 0u32;
        // Uneven bursts so the boundary is crossed in both directions
        for burst in [5usize, 1, 7, 2, 4, 9, 3] {
            for _ in 0..burst {
                assert!(queue.offer(next_in));
                next_in += 1;
            }
            for _ in 0..(burst / 2 + 1) {
                if let Some(v) = queue.poll().unwrap() {
                    assert_eq!(v, next_out);
                    next_out += 1;
                }
            }
        }
        while let Some(v) = queue.poll().unwrap() {
            assert_eq!(v, next_out);
            next_out += 1;
        }
        assert_eq!(next_out, next_in);
    }

    #[test]
    fn comparator_orders_within_memory_bound() {
        let mut queue: BoundedOverflowQueue<u32, VecSpillStore<u32>> =
            BoundedOverflowQueue::with_comparator(8, VecSpillStore::new(), |a, b| a.cmp(b));
        for v in [9u32, 3, 7, 1, 8, 2, 6, 4] {
            assert!(queue.offer(v));
        }
        for expected in [1u32, 2, 3, 4, 6, 7, 8, 9] {
            assert_eq!(queue.poll().unwrap(), Some(expected));
        }
        assert_eq!(queue.poll().unwrap(), None);
    }

    #[test]
    fn comparator_order_holds_across_disk_boundary() {
        let mut queue: BoundedOverflowQueue<u32, VecSpillStore<u32>> =
            BoundedOverflowQueue::with_comparator(4, VecSpillStore::new(), |a, b| a.cmp(b));
        for v in [9u32, 3, 7, 1, 8, 2, 6, 4, 5, 0] {
            assert!(queue.offer(v));
        }
        assert_eq!(queue.size(), 10);

        let mut drained = vec![];
        while let Some(v) = queue.poll().unwrap() {
            drained.push(v);
        }
        // Exact comparator order, not merely completeness
        assert_eq!(drained, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn comparator_order_survives_interleaved_offers_and_polls() {
        // Offers landing while part of the queue sits on disk must not let
        // a buffered element overtake a smaller spilled one.
        let mut queue: BoundedOverflowQueue<u32, VecSpillStore<u32>> =
            BoundedOverflowQueue::with_comparator(2, VecSpillStore::new(), |a, b| a.cmp(b));
        for v in [1u32, 2, 9, 4] {
            assert!(queue.offer(v));
        }
        let mut drained = vec![queue.poll().unwrap().unwrap()];
        assert!(queue.offer(5));
        drained.push(queue.poll().unwrap().unwrap());
        assert!(queue.offer(6));
        while let Some(v) = queue.poll().unwrap() {
            drained.push(v);
        }
        assert_eq!(drained, vec![1, 2, 4, 5, 6, 9]);
    }

    #[test]
    fn clear_drops_everything() {
        let mut queue: BoundedOverflowQueue<u32> = BoundedOverflowQueue::spilling_to_tempfile(2);
        for i in 0..10 {
            queue.offer(i);
        }
        queue.clear();
        assert_eq!(queue.size(), 0);
        assert_eq!(queue.poll().unwrap(), None);
        // Reusable after clear
        assert!(queue.offer(42));
        assert_eq!(queue.remove().unwrap(), 42);
    }

    #[test]
    #[should_panic(expected = "remove() on empty")]
    fn remove_on_empty_panics() {
        let mut queue: BoundedOverflowQueue<u32> = BoundedOverflowQueue::spilling_to_tempfile(1);
        let _ = queue.remove();
    }

    struct BrokenStore;

    impl SpillStore<u32> for BrokenStore {
        fn append(&mut self, _element: &u32) -> Result<(), SpillError> {
            Err(SpillError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "disk gone",
            )))
        }

        fn next(&mut self) -> Result<Option<u32>, SpillError> {
            Ok(None)
        }

        fn clear(&mut self) {}
    }

    #[test]
    fn offer_reports_store_failure() {
        let mut queue = BoundedOverflowQueue::new(1, BrokenStore);
        assert!(queue.offer(1)); // fits in memory
        assert!(!queue.offer(2)); // spill fails
        assert!(!queue.offer(3)); // failure is latched
        // The in-memory element is still drainable
        assert_eq!(queue.poll().unwrap(), Some(1));
    }
}
