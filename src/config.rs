use chrono::NaiveDateTime;

/// What a worker does when a host's fetch set comes up while the host is
/// still draining a previous one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FetcherMode {
    /// Honor the computed release time exactly.
    StrictWait,
    /// Refuse to queue a new set for a host that already has one pending.
    SkipWhenBusy,
    /// Release immediately, ignoring the computed time.
    AlwaysFetch,
}

pub struct Config {
    /// Bot name / user agent
    pub user_agent: String,
    /// The minimum time (in millis) between two fetches directed at the
    /// same politeness group. A value of 0 disables pacing.
    pub crawl_delay_ms: i64,
    /// Floor for the delay the adaptive policy may compute (in millis).
    pub min_crawl_delay_ms: i64,
    /// Number of worker threads polling for ready fetch sets.
    pub max_fetch_threads: usize,
    /// The maximum number of urls emitted in one fetch set.
    pub max_urls_per_set: usize,
    /// Per-run cap on urls fetched from a single politeness group; past it
    /// the batch policy flips into skip mode.
    pub max_urls_per_server: usize,
    /// Response bodies are truncated at this many bytes.
    pub max_content_size: usize,
    /// Maximum redirects followed per fetch.
    pub max_redirects: u32,
    /// Accept-Language header sent with each request.
    pub accept_language: String,
    /// Content types the fetcher will accept. Empty means accept anything.
    pub valid_mime_types: Vec<String>,
    /// Requests issued over one connection before it is recycled.
    pub max_requests_per_connection: usize,
    pub fetcher_mode: FetcherMode,
    /// Advisory end time for the run. The pacing policy stops proposing
    /// work past it; in-flight fetches are not cancelled.
    pub crawl_end_time: Option<NaiveDateTime>,
    /// Global bound on urls buffered in memory across all host queues.
    pub max_urls_in_memory: usize,
    /// In-memory bound for a single host queue; the tail spills to disk.
    pub max_urls_per_queue: usize,
    /// Interval between progress reports in seconds.
    pub report_interval_secs: u64,
}

impl Config {
    pub fn sanity_check(&self) {
        if self.max_fetch_threads == 0 {
            panic!("config.max_fetch_threads cannot be zero");
        }
        if self.max_urls_per_set == 0 {
            panic!("config.max_urls_per_set cannot be zero");
        }
        if self.max_urls_per_server == 0 {
            panic!("config.max_urls_per_server cannot be zero");
        }
        if self.max_urls_in_memory == 0 {
            panic!("config.max_urls_in_memory cannot be zero");
        }
        if self.max_urls_per_queue == 0 {
            panic!("config.max_urls_per_queue cannot be zero");
        }
        if self.max_urls_in_memory < self.max_urls_per_queue {
            panic!("config.max_urls_in_memory must be at least config.max_urls_per_queue");
        }
        // Delays are in milliseconds; 1-99 almost always means seconds
        // were passed by mistake.
        if (1..=99).contains(&self.crawl_delay_ms) {
            panic!(
                "config.crawl_delay_ms of {} looks like a seconds value",
                self.crawl_delay_ms
            );
        }
        if (1..=99).contains(&self.min_crawl_delay_ms) {
            panic!(
                "config.min_crawl_delay_ms of {} looks like a seconds value",
                self.min_crawl_delay_ms
            );
        }
        if self.crawl_delay_ms < 0 || self.min_crawl_delay_ms < 0 {
            panic!("config crawl delays must not be negative");
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            user_agent: "ixorabot".to_owned(),
            crawl_delay_ms: 2_000,
            min_crawl_delay_ms: 500,
            max_fetch_threads: 16,
            max_urls_per_set: 100,
            max_urls_per_server: 10_000,
            max_content_size: 2 * 1024 * 1024,
            max_redirects: 10,
            accept_language: "en-US,en;q=0.9".to_owned(),
            valid_mime_types: vec![
                "text/html".to_owned(),
                "text/plain".to_owned(),
                "application/xhtml+xml".to_owned(),
            ],
            max_requests_per_connection: 100,
            fetcher_mode: FetcherMode::StrictWait,
            crawl_end_time: None,
            max_urls_in_memory: 100_000,
            max_urls_per_queue: 1_000,
            report_interval_secs: 60,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_sane() {
        Config::default().sanity_check();
    }

    #[test]
    #[should_panic(expected = "looks like a seconds value")]
    fn catches_crawl_delay_unit_confusion() {
        let config = Config {
            crawl_delay_ms: 2,
            ..Config::default()
        };
        config.sanity_check();
    }

    #[test]
    #[should_panic]
    fn rejects_memory_bound_below_per_queue_bound() {
        let config = Config {
            max_urls_in_memory: 10,
            max_urls_per_queue: 100,
            ..Config::default()
        };
        config.sanity_check();
    }
}
