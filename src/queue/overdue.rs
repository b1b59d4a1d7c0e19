use std::sync::{Arc, Mutex};

use chrono::{Duration, NaiveDateTime, Utc};

/// An element that becomes ready once its delay reaches zero.
///
/// `delay` may be dynamic (e.g. derived from per-host state), so it is
/// re-evaluated at every poll rather than captured once.
pub trait Delayed {
    /// Time remaining until the element is ready. Negative means overdue.
    fn delay(&self) -> Duration;
}

/// A concurrent delay queue whose `poll` returns, among all currently-ready
/// elements, the *most overdue* one.
///
/// This deviates from a textbook delay queue on purpose: when several
/// hosts' fetch sets become eligible around the same time, the one that
/// waited longest beyond its minimum delay is served first. Downstream
/// fairness depends on this ordering; do not "fix" it into earliest
/// nominal-release-time-first.
///
/// Storage is ordered by the nominal release time captured at offer, but
/// selection is by the delay value observed at poll time, which can mean
/// looking past the front of the queue.
///
/// Safe under many concurrent callers: the whole structure sits behind one
/// mutex, so racing pollers each receive a distinct element.
pub struct MostOverdueDelayQueue<T> {
    // Sorted ascending by nominal_ready_at
    inner: Arc<Mutex<Vec<Entry<T>>>>,
}

struct Entry<T> {
    nominal_ready_at: NaiveDateTime,
    item: T,
}

impl<T> Clone for MostOverdueDelayQueue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> Default for MostOverdueDelayQueue<T>
where
    T: Delayed,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> MostOverdueDelayQueue<T>
where
    T: Delayed,
{
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn offer(&self, item: T) {
        let nominal_ready_at = Utc::now().naive_utc() + item.delay();
        let mut entries = self.inner.lock().unwrap();
        let idx = entries.partition_point(|e| e.nominal_ready_at <= nominal_ready_at);
        entries.insert(
            idx,
            Entry {
                nominal_ready_at,
                item,
            },
        );
    }

    /// The most overdue ready element, or `None` if nothing is ready yet.
    /// Never blocks.
    pub fn poll(&self) -> Option<T> {
        let mut entries = self.inner.lock().unwrap();

        let mut chosen: Option<(usize, Duration)> = None;
        for (idx, entry) in entries.iter().enumerate() {
            let delay = entry.item.delay();
            if delay > Duration::zero() {
                continue;
            }
            match chosen {
                Some((_, best)) if best <= delay => {}
                _ => chosen = Some((idx, delay)),
            }
        }

        chosen.map(|(idx, _)| entries.remove(idx).item)
    }

    /// Nominal release time of the front element. Lets a worker that found
    /// nothing ready sleep until the next scheduled release instead of
    /// spinning.
    pub fn next_ready_at(&self) -> Option<NaiveDateTime> {
        let entries = self.inner.lock().unwrap();
        entries.first().map(|e| e.nominal_ready_at)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().is_empty()
    }
}
