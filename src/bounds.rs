/// Memory bounds for the per-host url queues.
///
/// Derives the maximum number of concurrently open per-host queues from the
/// global and per-queue limits. Purely admission-control input to the queue
/// manager; it makes no scheduling decisions itself.
#[derive(Clone, Copy, Debug)]
pub struct QueueBounds {
    max_urls_in_memory: usize,
    max_urls_per_queue: usize,
}

impl QueueBounds {
    /// Panics on invalid bounds. Misconfigured bounds are a programming
    /// error, not a runtime condition to recover from.
    pub fn new(max_urls_in_memory: usize, max_urls_per_queue: usize) -> Self {
        if max_urls_in_memory == 0 {
            panic!("QueueBounds.max_urls_in_memory cannot be zero");
        }
        if max_urls_per_queue == 0 {
            panic!("QueueBounds.max_urls_per_queue cannot be zero");
        }
        if max_urls_in_memory < max_urls_per_queue {
            panic!(
                "QueueBounds.max_urls_in_memory ({}) must be at least \
                 max_urls_per_queue ({})",
                max_urls_in_memory, max_urls_per_queue,
            );
        }
        Self {
            max_urls_in_memory,
            max_urls_per_queue,
        }
    }

    pub fn max_urls_in_memory(&self) -> usize {
        self.max_urls_in_memory
    }

    pub fn max_urls_per_queue(&self) -> usize {
        self.max_urls_per_queue
    }

    pub fn max_open_queues(&self) -> usize {
        self.max_urls_in_memory / self.max_urls_per_queue
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_max_open_queues() {
        let bounds = QueueBounds::new(1000, 100);
        assert_eq!(bounds.max_open_queues(), 10);

        // Integer division truncates
        let bounds = QueueBounds::new(1050, 100);
        assert_eq!(bounds.max_open_queues(), 10);
    }

    #[test]
    #[should_panic]
    fn rejects_zero_total() {
        QueueBounds::new(0, 100);
    }

    #[test]
    #[should_panic]
    fn rejects_zero_per_queue() {
        QueueBounds::new(100, 0);
    }

    #[test]
    #[should_panic]
    fn rejects_total_below_per_queue() {
        QueueBounds::new(10, 100);
    }
}
