use fasthash::xx::Hash64;
use fasthash::FastHash;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::model::{FetchSet, ScoredUrl};

/// Batch size used once a host is past its per-run cap. Intentionally
/// large: a capped host should produce a few big low-priority "skip"
/// batches, not be starved into thousands of tiny ones.
pub const SKIPPED_SET_SIZE: usize = 10_000;

// Logical key space for fetch-set sort keys and the divisor controlling
// how big a random step each emitted set may take through it.
const SORT_KEY_SPACE: i64 = i64::MAX;
const SORT_KEY_DIVISOR: i64 = 100;

/// Folds a pre-sorted, per-host stream of scored urls into bounded fetch
/// sets.
pub trait FetchJobPolicy {
    /// Reset accumulation state for a new politeness group.
    fn start_fetch_set(&mut self, grouping_key: &str, crawl_delay_ms: i64);

    /// Append one url, returning a fetch set whenever the current batch
    /// reaches its target size.
    fn next_fetch_set(&mut self, url: ScoredUrl) -> Option<FetchSet>;

    /// Flush the final partial batch at end of stream. Guarantees no url
    /// accepted by the policy is ever silently dropped.
    fn end_fetch_set(&mut self) -> Option<FetchSet>;
}

/// Standard batching policy.
///
/// Emits sets of at most `max_urls_per_set` urls until the host reaches
/// `max_urls_per_server` for the run, then flips into skip mode. Each
/// emitted set gets a sort key advanced by a uniformly random offset within
/// a shrinking slice of the remaining key space, so hosts that hit the same
/// deadline don't release in the same order every run.
pub struct DefaultFetchJobPolicy {
    max_urls_per_set: usize,
    max_urls_per_server: usize,
    run_seed: u64,

    grouping_key: String,
    crawl_delay_ms: i64,
    rng: ChaCha8Rng,
    // Urls accepted for this host so far, across all emitted sets
    total_urls: usize,
    skipping: bool,
    sort_key: i64,
    current: Vec<ScoredUrl>,
    // Target size of the batch being accumulated; None until the first url
    // of the batch arrives
    target_size: Option<usize>,
}

impl DefaultFetchJobPolicy {
    pub fn new(max_urls_per_set: usize, max_urls_per_server: usize) -> Self {
        Self::with_seed(max_urls_per_set, max_urls_per_server, rand::random())
    }

    /// Fixing the run seed makes sort keys deterministic for tests.
    pub fn with_seed(max_urls_per_set: usize, max_urls_per_server: usize, run_seed: u64) -> Self {
        if max_urls_per_set == 0 {
            panic!("DefaultFetchJobPolicy.max_urls_per_set cannot be zero");
        }
        if max_urls_per_server == 0 {
            panic!("DefaultFetchJobPolicy.max_urls_per_server cannot be zero");
        }
        Self {
            max_urls_per_set,
            max_urls_per_server,
            run_seed,
            grouping_key: String::new(),
            crawl_delay_ms: 0,
            rng: ChaCha8Rng::seed_from_u64(run_seed),
            total_urls: 0,
            skipping: false,
            sort_key: 0,
            current: vec![],
            target_size: None,
        }
    }

    fn emit(&mut self) -> FetchSet {
        self.advance_sort_key();
        let urls = std::mem::take(&mut self.current);
        self.target_size = None;
        FetchSet {
            grouping_key: self.grouping_key.clone(),
            fetch_delay_ms: self.crawl_delay_ms * urls.len() as i64,
            sort_key: self.sort_key,
            skipping: self.skipping,
            urls,
        }
    }

    // Pick a uniformly random offset inside a shrinking slice of the
    // remaining key space. Keys strictly increase and never leave the
    // space.
    fn advance_sort_key(&mut self) {
        let remaining = SORT_KEY_SPACE - self.sort_key;
        let slice = (remaining / SORT_KEY_DIVISOR).max(1);
        self.sort_key += self.rng.gen_range(1..=slice);
    }
}

impl FetchJobPolicy for DefaultFetchJobPolicy {
    fn start_fetch_set(&mut self, grouping_key: &str, crawl_delay_ms: i64) {
        self.grouping_key = grouping_key.to_owned();
        self.crawl_delay_ms = crawl_delay_ms;
        // Host-keyed seeding, so a host's release pattern is stable within
        // a run but differs across runs.
        let seed = Hash64::hash(grouping_key.as_bytes()) ^ self.run_seed;
        self.rng = ChaCha8Rng::seed_from_u64(seed);
        self.total_urls = 0;
        self.skipping = false;
        self.sort_key = 0;
        self.current.clear();
        self.target_size = None;
    }

    fn next_fetch_set(&mut self, url: ScoredUrl) -> Option<FetchSet> {
        if self.target_size.is_none() {
            // First url of a new batch: decide how big this one gets.
            let target = if self.total_urls >= self.max_urls_per_server {
                self.skipping = true;
                SKIPPED_SET_SIZE
            } else {
                self.max_urls_per_set
                    .min(self.max_urls_per_server - self.total_urls)
            };
            self.target_size = Some(target);
        }

        self.current.push(url);
        self.total_urls += 1;

        if self.current.len() >= self.target_size.unwrap() {
            Some(self.emit())
        } else {
            None
        }
    }

    fn end_fetch_set(&mut self) -> Option<FetchSet> {
        if self.current.is_empty() {
            None
        } else {
            Some(self.emit())
        }
    }
}
