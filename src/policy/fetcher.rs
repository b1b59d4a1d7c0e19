use chrono::{Duration, NaiveDateTime, Utc};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::model::FetchRequest;

/// Decides how many urls may be released right now and when the next
/// release may occur, given the crawl delay and (optionally) a hard
/// deadline.
///
/// One policy instance is shared per run; per-host pacing comes from the
/// `fetch_delay` stamped on each emitted fetch set, not from this trait.
pub trait FetcherPolicy {
    fn fetch_request(&mut self, max_urls: usize) -> FetchRequest;

    /// Upper bound on urls this policy will ever propose, derivable from a
    /// deadline. `usize::MAX` when unbounded.
    fn max_urls(&self) -> usize;
}

// All delays are in milliseconds. A configured delay of 1-99 almost always
// means the caller passed seconds, so fail fast instead of hammering hosts
// a thousand times faster than intended.
fn check_crawl_delay(what: &str, delay_ms: i64) {
    if (1..=99).contains(&delay_ms) {
        panic!(
            "{} is in milliseconds; {} looks like a seconds value \
             (use 0 for no delay, or >= 100 ms)",
            what, delay_ms,
        );
    }
    if delay_ms < 0 {
        panic!("{} must not be negative", what);
    }
}

/// Fixed spacing between requests. Zero delay releases everything at once.
pub struct FixedFetcherPolicy {
    crawl_delay_ms: i64,
}

impl FixedFetcherPolicy {
    pub fn new(crawl_delay_ms: i64) -> Self {
        check_crawl_delay("FixedFetcherPolicy.crawl_delay_ms", crawl_delay_ms);
        Self { crawl_delay_ms }
    }
}

impl FetcherPolicy for FixedFetcherPolicy {
    fn fetch_request(&mut self, max_urls: usize) -> FetchRequest {
        let now = Utc::now().naive_utc();
        if self.crawl_delay_ms == 0 {
            FetchRequest {
                num_urls: max_urls,
                next_request_time: now,
            }
        } else {
            FetchRequest {
                num_urls: max_urls.min(1),
                next_request_time: now + Duration::milliseconds(self.crawl_delay_ms),
            }
        }
    }

    fn max_urls(&self) -> usize {
        usize::MAX
    }
}

/// Stretches the crawl delay so that `max_urls` items still finish before a
/// hard end time.
///
/// Deliberately plans only the next bounded window rather than the entire
/// remaining run, to stay responsive to changing conditions.
pub struct AdaptiveFetcherPolicy {
    crawl_end_time: NaiveDateTime,
    min_crawl_delay_ms: i64,
}

/// How far ahead the adaptive policy plans in one request.
pub const MAX_REQUEST_WINDOW_MS: i64 = 5 * 60 * 1000;

impl AdaptiveFetcherPolicy {
    pub fn new(crawl_end_time: NaiveDateTime, min_crawl_delay_ms: i64) -> Self {
        check_crawl_delay(
            "AdaptiveFetcherPolicy.min_crawl_delay_ms",
            min_crawl_delay_ms,
        );
        Self {
            crawl_end_time,
            min_crawl_delay_ms,
        }
    }
}

impl FetcherPolicy for AdaptiveFetcherPolicy {
    fn fetch_request(&mut self, max_urls: usize) -> FetchRequest {
        let now = Utc::now().naive_utc();
        let remaining_ms = (self.crawl_end_time - now).num_milliseconds();
        if remaining_ms <= 0 || max_urls == 0 {
            // Time is up; stop proposing work.
            return FetchRequest {
                num_urls: 0,
                next_request_time: now,
            };
        }

        // The longest delay that still finishes max_urls by the deadline,
        // never politer than the configured minimum allows.
        let mut delay_ms = remaining_ms / max_urls as i64;
        if delay_ms < self.min_crawl_delay_ms {
            delay_ms = self.min_crawl_delay_ms;
        }

        let window_ms = remaining_ms.min(MAX_REQUEST_WINDOW_MS);
        let num_urls = if delay_ms == 0 {
            max_urls
        } else {
            max_urls.min(1 + (window_ms / delay_ms) as usize)
        };

        FetchRequest {
            num_urls,
            next_request_time: now + Duration::milliseconds(delay_ms * num_urls as i64),
        }
    }

    fn max_urls(&self) -> usize {
        if self.min_crawl_delay_ms == 0 {
            return usize::MAX;
        }
        let remaining_ms = (self.crawl_end_time - Utc::now().naive_utc()).num_milliseconds();
        if remaining_ms <= 0 {
            0
        } else {
            (remaining_ms / self.min_crawl_delay_ms) as usize
        }
    }
}

/// Models a single slow, irregular human rather than a batch fetcher: one
/// url per request, spaced by a randomized delay uniformly distributed
/// within half the configured average on either side.
pub struct FakeUserFetcherPolicy {
    average_delay_ms: i64,
    rng: ChaCha8Rng,
}

impl FakeUserFetcherPolicy {
    pub fn new(average_delay_ms: i64) -> Self {
        Self::with_rng(average_delay_ms, ChaCha8Rng::from_entropy())
    }

    /// Inject the random source, making the schedule deterministic for
    /// tests.
    pub fn with_rng(average_delay_ms: i64, rng: ChaCha8Rng) -> Self {
        check_crawl_delay(
            "FakeUserFetcherPolicy.average_delay_ms",
            average_delay_ms,
        );
        Self {
            average_delay_ms,
            rng,
        }
    }
}

impl FetcherPolicy for FakeUserFetcherPolicy {
    fn fetch_request(&mut self, max_urls: usize) -> FetchRequest {
        let now = Utc::now().naive_utc();
        if max_urls == 0 {
            return FetchRequest {
                num_urls: 0,
                next_request_time: now,
            };
        }
        let delay_ms = if self.average_delay_ms == 0 {
            0
        } else {
            // Uniform in [avg/2, 3*avg/2]
            self.average_delay_ms / 2 + self.rng.gen_range(0..=self.average_delay_ms)
        };
        FetchRequest {
            num_urls: 1,
            next_request_time: now + Duration::milliseconds(delay_ms),
        }
    }

    fn max_urls(&self) -> usize {
        usize::MAX
    }
}
