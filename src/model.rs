use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Reserved score meaning "never fetch this url, but keep it in line for
/// accounting".
pub const SKIP_URL_SCORE: f64 = -1.0;

/// A candidate url tagged with its score and politeness group.
///
/// Produced by an external scorer, consumed exactly once by the fetch job
/// policy. The payload travels opaquely alongside the url so the fetch
/// executor can hand it back to the downstream sink.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScoredUrl {
    pub url: String,
    /// Host (or other politeness group) this url belongs to. One crawl delay
    /// and one per-run cap apply per grouping key.
    pub grouping_key: String,
    pub score: f64,
    pub payload: serde_json::Value,
}

impl ScoredUrl {
    pub fn new(url: &str, grouping_key: &str, score: f64) -> Self {
        Self {
            url: url.to_owned(),
            grouping_key: grouping_key.to_owned(),
            score,
            payload: serde_json::Value::Null,
        }
    }

    pub fn is_skip_scored(&self) -> bool {
        self.score == SKIP_URL_SCORE
    }
}

/// A batch of urls released together for one politeness group.
///
/// `sort_key` is a randomized, monotonically increasing logical timestamp
/// used purely for release ordering within the host, never wall-clock time.
/// `fetch_delay_ms` is the minimum wall-clock span a consumer must allot to
/// drain the batch while pacing individual requests.
#[derive(Clone, Debug)]
pub struct FetchSet {
    pub grouping_key: String,
    pub urls: Vec<ScoredUrl>,
    pub sort_key: i64,
    pub fetch_delay_ms: i64,
    pub skipping: bool,
}

impl FetchSet {
    pub fn len(&self) -> usize {
        self.urls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }
}

/// Output of a fetcher policy: how many urls may be fetched right now and
/// when the next request should be considered.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FetchRequest {
    pub num_urls: usize,
    pub next_request_time: NaiveDateTime,
}
