pub mod fetch_job;
pub mod fetcher;

pub use fetch_job::{DefaultFetchJobPolicy, FetchJobPolicy, SKIPPED_SET_SIZE};
pub use fetcher::{
    AdaptiveFetcherPolicy, FakeUserFetcherPolicy, FetcherPolicy, FixedFetcherPolicy,
    MAX_REQUEST_WINDOW_MS,
};
