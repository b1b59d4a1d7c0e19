use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration, NaiveDateTime, Utc};

use crate::bounds::QueueBounds;
use crate::config::{Config, FetcherMode};
use crate::model::{FetchSet, ScoredUrl};
use crate::policy::{DefaultFetchJobPolicy, FetchJobPolicy, FetcherPolicy};
use crate::queue::{BoundedOverflowQueue, Delayed, MostOverdueDelayQueue, SpillError};
use crate::stats::{counter, MetricsSink};

/// A fetch set waiting in the shared release queue.
pub struct FetchSetEntry {
    pub set: FetchSet,
    pub release_at: NaiveDateTime,
}

impl Delayed for FetchSetEntry {
    fn delay(&self) -> Duration {
        self.release_at - Utc::now().naive_utc()
    }
}

struct HostQueue {
    queue: BoundedOverflowQueue<ScoredUrl>,
    job_policy: DefaultFetchJobPolicy,
    // Sets released but not yet drained by a worker
    pending_sets: usize,
    // Earliest time the next set for this host may be released
    next_release_at: Option<NaiveDateTime>,
}

/// Per-host admission and release manager.
///
/// Receives scored urls, buffers them per politeness group in bounded
/// overflow queues, folds them into fetch sets through the batch policy,
/// and inserts timed entries into the shared most-overdue release queue
/// that the worker pool polls.
///
/// All per-host state is single-owner; the manager itself must sit behind
/// the surrounding engine's lock when shared. The release queue handle it
/// hands out is the one structure safe for concurrent use.
pub struct QueueManager {
    bounds: QueueBounds,
    crawl_delay_ms: i64,
    fetcher_mode: FetcherMode,
    max_urls_per_set: usize,
    max_urls_per_server: usize,
    queues: HashMap<String, HostQueue>,
    release_queue: MostOverdueDelayQueue<FetchSetEntry>,
    policy: Box<dyn FetcherPolicy + Send>,
    metrics: Arc<dyn MetricsSink>,
}

impl QueueManager {
    pub fn new(
        config: &Config,
        policy: Box<dyn FetcherPolicy + Send>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        let bounds = QueueBounds::new(config.max_urls_in_memory, config.max_urls_per_queue);
        Self {
            bounds,
            crawl_delay_ms: config.crawl_delay_ms,
            fetcher_mode: config.fetcher_mode,
            max_urls_per_set: config.max_urls_per_set,
            max_urls_per_server: config.max_urls_per_server,
            queues: HashMap::new(),
            release_queue: MostOverdueDelayQueue::new(),
            policy,
            metrics,
        }
    }

    /// Shared handle to the release queue the worker pool polls.
    pub fn release_queue(&self) -> MostOverdueDelayQueue<FetchSetEntry> {
        self.release_queue.clone()
    }

    /// Admit one scored url. Returns false when the url's host queue cannot
    /// be opened (back-pressure: the upstream producer should retry later)
    /// or when the host's spill store has failed.
    pub fn offer(&mut self, url: ScoredUrl) -> bool {
        if url.is_skip_scored() {
            // Dropped here, but counted so accounting stays complete.
            self.metrics.increment(counter::URLS_SKIP_SCORED, 1);
            return true;
        }

        let key = url.grouping_key.clone();
        if !self.queues.contains_key(&key) {
            if self.queues.len() >= self.bounds.max_open_queues() {
                self.metrics.increment(counter::URLS_REJECTED, 1);
                return false;
            }
            let mut job_policy =
                DefaultFetchJobPolicy::new(self.max_urls_per_set, self.max_urls_per_server);
            job_policy.start_fetch_set(&key, self.crawl_delay_ms);
            self.queues.insert(
                key.clone(),
                HostQueue {
                    queue: BoundedOverflowQueue::spilling_to_tempfile(
                        self.bounds.max_urls_per_queue(),
                    ),
                    job_policy,
                    pending_sets: 0,
                    next_release_at: None,
                },
            );
        }

        let host = self.queues.get_mut(&key).unwrap();
        if host.queue.offer(url) {
            self.metrics.increment(counter::URLS_ADMITTED, 1);
            true
        } else {
            self.metrics.increment(counter::URLS_REJECTED, 1);
            false
        }
    }

    /// Fold buffered urls into fetch sets and schedule them on the release
    /// queue, as far as the pacing policy allows right now. Returns the
    /// number of sets released.
    pub fn release(&mut self) -> Result<usize, SpillError> {
        let keys: Vec<String> = self.queues.keys().cloned().collect();
        let mut released = 0;
        for key in keys {
            released += self.release_host(&key, false)?;
        }
        Ok(released)
    }

    fn release_host(&mut self, key: &str, flush: bool) -> Result<usize, SpillError> {
        let mode = self.fetcher_mode;
        let host = match self.queues.get_mut(key) {
            Some(h) => h,
            None => return Ok(0),
        };
        if host.queue.is_empty() && !flush {
            return Ok(0);
        }
        // The busy check never applies at end of stream: a flush must drain
        // the host even with a set still pending, or its tail is lost when
        // the queue closes.
        if mode == FetcherMode::SkipWhenBusy && host.pending_sets > 0 && !flush {
            return Ok(0);
        }

        let backlog = host.queue.size().min(self.policy.max_urls());
        let request = self.policy.fetch_request(backlog);
        let budget = if flush {
            // End of stream: everything still buffered goes out.
            host.queue.size()
        } else {
            request.num_urls.min(backlog)
        };
        if budget == 0 && !flush {
            return Ok(0);
        }

        let now = Utc::now().naive_utc();
        let mut release_at = match mode {
            FetcherMode::AlwaysFetch => now,
            _ => host.next_release_at.unwrap_or(now).max(now),
        };

        let mut sets = vec![];
        for _ in 0..budget {
            let url = match host.queue.poll()? {
                Some(u) => u,
                None => break,
            };
            if let Some(set) = host.job_policy.next_fetch_set(url) {
                sets.push(set);
                if mode == FetcherMode::SkipWhenBusy && !flush {
                    break;
                }
            }
        }
        if flush {
            if let Some(set) = host.job_policy.end_fetch_set() {
                sets.push(set);
            }
        }

        let released = sets.len();
        for set in sets {
            let spacing = Duration::milliseconds(set.fetch_delay_ms);
            log::debug!(
                "[{}] releasing set of {} urls (sort key {}, skipping: {}) at {}",
                set.grouping_key,
                set.len(),
                set.sort_key,
                set.skipping,
                release_at,
            );
            self.release_queue.offer(FetchSetEntry { set, release_at });
            self.metrics.increment(counter::SETS_RELEASED, 1);
            host.pending_sets += 1;
            release_at = release_at + spacing;
        }
        host.next_release_at = Some(release_at.max(request.next_request_time));
        Ok(released)
    }

    /// Worker callback once a released set has been fully drained.
    pub fn mark_set_done(&mut self, grouping_key: &str) {
        if let Some(host) = self.queues.get_mut(grouping_key) {
            host.pending_sets = host.pending_sets.saturating_sub(1);
        }
    }

    /// End of input for one host: flush everything buffered, including the
    /// final partial set, and close the host queue.
    pub fn finish_host(&mut self, grouping_key: &str) -> Result<usize, SpillError> {
        let released = self.release_host(grouping_key, true)?;
        self.queues.remove(grouping_key);
        Ok(released)
    }

    /// End of input for the whole run.
    pub fn finish_all(&mut self) -> Result<usize, SpillError> {
        let keys: Vec<String> = self.queues.keys().cloned().collect();
        let mut released = 0;
        for key in keys {
            released += self.finish_host(&key)?;
        }
        Ok(released)
    }

    pub fn open_queues(&self) -> usize {
        self.queues.len()
    }

    /// Urls buffered across all host queues (not counting sets already on
    /// the release queue).
    pub fn buffered_urls(&self) -> usize {
        self.queues.values().map(|h| h.queue.size()).sum()
    }

    pub fn is_idle(&self) -> bool {
        self.buffered_urls() == 0 && self.release_queue.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::FixedFetcherPolicy;
    use crate::stats::Stats;

    fn test_config() -> Config {
        Config {
            crawl_delay_ms: 0,
            max_urls_per_set: 10,
            max_urls_per_server: 1_000,
            max_urls_in_memory: 40,
            max_urls_per_queue: 20,
            ..Config::default()
        }
    }

    fn manager(config: &Config) -> (QueueManager, Arc<Stats>) {
        let stats = Arc::new(Stats::new());
        let policy = Box::new(FixedFetcherPolicy::new(config.crawl_delay_ms));
        let mgr = QueueManager::new(config, policy, stats.clone());
        (mgr, stats)
    }

    #[test]
    fn admits_and_releases_full_sets() {
        let config = test_config();
        let (mut mgr, stats) = manager(&config);
        for n in 0..25 {
            let url = ScoredUrl::new(&format!("http://a.test/{}", n), "a.test", 1.0);
            assert!(mgr.offer(url));
        }
        assert_eq!(stats.urls_admitted(), 25);
        assert_eq!(mgr.buffered_urls(), 25);

        // Zero crawl delay: the whole backlog folds into sets of 10
        let released = mgr.release().unwrap();
        assert_eq!(released, 2);
        assert_eq!(mgr.buffered_urls(), 0); // 20 in sets, 5 accumulating

        let released = mgr.finish_all().unwrap();
        assert_eq!(released, 1); // the partial 5

        let queue = mgr.release_queue();
        let mut total = 0;
        while let Some(entry) = queue.poll() {
            total += entry.set.len();
        }
        assert_eq!(total, 25);
    }

    #[test]
    fn skip_scored_urls_are_counted_and_dropped() {
        let config = test_config();
        let (mut mgr, stats) = manager(&config);
        let url = ScoredUrl::new("http://a.test/skip", "a.test", crate::model::SKIP_URL_SCORE);
        assert!(mgr.offer(url));
        assert_eq!(stats.urls_admitted(), 0);
        assert_eq!(mgr.open_queues(), 0);
    }

    #[test]
    fn back_pressure_once_open_queue_limit_reached() {
        let config = test_config(); // 40 / 20 = 2 open queues
        let (mut mgr, stats) = manager(&config);
        assert!(mgr.offer(ScoredUrl::new("http://a.test/", "a.test", 1.0)));
        assert!(mgr.offer(ScoredUrl::new("http://b.test/", "b.test", 1.0)));
        // Third host cannot open a queue
        assert!(!mgr.offer(ScoredUrl::new("http://c.test/", "c.test", 1.0)));
        assert_eq!(mgr.open_queues(), 2);
        assert_eq!(stats.urls_admitted(), 2);

        // Existing hosts still admit
        assert!(mgr.offer(ScoredUrl::new("http://a.test/2", "a.test", 1.0)));

        // Closing a host frees the slot
        mgr.finish_host("b.test").unwrap();
        assert!(mgr.offer(ScoredUrl::new("http://c.test/", "c.test", 1.0)));
    }

    #[test]
    fn finish_host_flushes_the_partial_set() {
        let config = test_config();
        let (mut mgr, _stats) = manager(&config);
        for n in 0..3 {
            mgr.offer(ScoredUrl::new(&format!("http://a.test/{}", n), "a.test", 1.0));
        }
        assert_eq!(mgr.finish_host("a.test").unwrap(), 1);
        assert_eq!(mgr.open_queues(), 0);

        let entry = mgr.release_queue().poll().unwrap();
        assert_eq!(entry.set.len(), 3);
        assert!(!entry.set.skipping);
    }

    #[test]
    fn strict_wait_spaces_consecutive_sets_by_fetch_delay() {
        let config = Config {
            crawl_delay_ms: 1_000,
            ..test_config()
        };
        let (mut mgr, _stats) = manager(&config);
        for n in 0..20 {
            mgr.offer(ScoredUrl::new(&format!("http://a.test/{}", n), "a.test", 1.0));
        }
        mgr.finish_all().unwrap();

        // Sets exist but only the first is ready now; the second waits for
        // the first set's fetch_delay (10 urls x 1s).
        let queue = mgr.release_queue();
        assert_eq!(queue.len(), 2);
        let first = queue.poll().unwrap();
        assert_eq!(first.set.len(), 10);
        assert!(queue.poll().is_none());
        let gap = queue.next_ready_at().unwrap() - Utc::now().naive_utc();
        assert!(gap > Duration::seconds(8));
    }

    #[test]
    fn skip_when_busy_holds_back_while_a_set_is_pending() {
        let config = Config {
            fetcher_mode: FetcherMode::SkipWhenBusy,
            ..test_config()
        };
        let (mut mgr, _stats) = manager(&config);
        for n in 0..20 {
            mgr.offer(ScoredUrl::new(&format!("http://a.test/{}", n), "a.test", 1.0));
        }
        assert_eq!(mgr.release().unwrap(), 1);
        // Previous set still pending: nothing new comes out
        assert_eq!(mgr.release().unwrap(), 0);

        mgr.mark_set_done("a.test");
        assert_eq!(mgr.release().unwrap(), 1);
    }

    #[test]
    fn finish_all_drains_skip_when_busy_hosts_completely() {
        let config = Config {
            fetcher_mode: FetcherMode::SkipWhenBusy,
            ..test_config()
        };
        let (mut mgr, _stats) = manager(&config);
        for n in 0..20 {
            mgr.offer(ScoredUrl::new(&format!("http://a.test/{}", n), "a.test", 1.0));
        }
        // One set out, still pending when input ends
        assert_eq!(mgr.release().unwrap(), 1);
        assert_eq!(mgr.finish_all().unwrap(), 1);
        assert_eq!(mgr.open_queues(), 0);

        let queue = mgr.release_queue();
        let mut total = 0;
        while let Some(entry) = queue.poll() {
            total += entry.set.len();
        }
        assert_eq!(total, 20);
    }
}
