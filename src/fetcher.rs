use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::config::Config;
use crate::model::ScoredUrl;

#[derive(Debug)]
pub enum FetchError {
    /// The url itself is unusable (unparseable, unresolvable).
    Url(String),
    /// Non-success HTTP status.
    Http { status: u16 },
    /// Redirect policy violated (too many hops, bad location).
    Redirect(String),
    /// Connection-level failure.
    Network(String),
    /// Response content type not in the configured valid set.
    InvalidMime(String),
    /// Never attempted: the url arrived in a skip-mode fetch set.
    Skipped,
    Io(std::io::Error),
}

impl std::fmt::Display for FetchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FetchError::Url(e) => write!(f, "bad url: {}", e),
            FetchError::Http { status } => write!(f, "http status {}", status),
            FetchError::Redirect(e) => write!(f, "redirect error: {}", e),
            FetchError::Network(e) => write!(f, "network error: {}", e),
            FetchError::InvalidMime(mime) => write!(f, "unwanted content type: {}", mime),
            FetchError::Skipped => write!(f, "skipped (per-server cap exceeded)"),
            FetchError::Io(e) => write!(f, "io error: {}", e),
        }
    }
}

impl std::error::Error for FetchError {}

#[derive(Debug)]
pub struct FetchedContent {
    pub url: String,
    pub status_code: u16,
    pub content_type: String,
    pub body: Vec<u8>,
}

/// Performs the actual fetch for one url of a released fetch set. The
/// worker pool enforces the set's fetch delay between calls; implementors
/// only fetch.
#[async_trait]
pub trait FetchExecutor: Send + Sync {
    async fn fetch(&self, url: &ScoredUrl) -> Result<FetchedContent, FetchError>;
}

/// Downstream sink for fetch outcomes (the "updated records" stream).
#[async_trait]
pub trait RecordSink: Send + Sync {
    async fn handle(&self, url: ScoredUrl, result: Result<FetchedContent, FetchError>);
}

/// Blocking ureq-based executor honoring the configured content limits.
///
/// The agent is recycled every `max_requests_per_connection` requests so
/// long runs don't pin one connection per host forever.
pub struct UreqExecutor {
    user_agent: String,
    accept_language: String,
    max_content_size: usize,
    max_redirects: u32,
    valid_mime_types: Vec<String>,
    max_requests_per_connection: usize,
    agent: Mutex<ureq::Agent>,
    requests_on_agent: AtomicUsize,
}

impl UreqExecutor {
    pub fn new(config: &Config) -> Self {
        Self {
            user_agent: config.user_agent.clone(),
            accept_language: config.accept_language.clone(),
            max_content_size: config.max_content_size,
            max_redirects: config.max_redirects,
            valid_mime_types: config.valid_mime_types.clone(),
            max_requests_per_connection: config.max_requests_per_connection.max(1),
            agent: Mutex::new(build_agent(&config.user_agent, config.max_redirects)),
            requests_on_agent: AtomicUsize::new(0),
        }
    }

    fn agent(&self) -> ureq::Agent {
        let count = self.requests_on_agent.fetch_add(1, Ordering::Relaxed) + 1;
        let mut agent = self.agent.lock().unwrap();
        if count % self.max_requests_per_connection == 0 {
            *agent = build_agent(&self.user_agent, self.max_redirects);
        }
        agent.clone()
    }

    fn check_mime(&self, content_type: &str) -> Result<(), FetchError> {
        if self.valid_mime_types.is_empty() {
            return Ok(());
        }
        // Strip parameters like "; charset=utf-8"
        let mime = content_type
            .split(';')
            .next()
            .unwrap_or("")
            .trim()
            .to_ascii_lowercase();
        if self.valid_mime_types.iter().any(|m| m == &mime) {
            Ok(())
        } else {
            Err(FetchError::InvalidMime(mime))
        }
    }
}

fn build_agent(user_agent: &str, max_redirects: u32) -> ureq::Agent {
    ureq::AgentBuilder::new()
        .user_agent(user_agent)
        .redirects(max_redirects)
        .build()
}

#[async_trait]
impl FetchExecutor for UreqExecutor {
    async fn fetch(&self, url: &ScoredUrl) -> Result<FetchedContent, FetchError> {
        let response = self
            .agent()
            .get(&url.url)
            .set("Accept-Language", &self.accept_language)
            .call();
        let response = match response {
            Ok(r) => r,
            Err(ureq::Error::Status(status, _)) => {
                return Err(FetchError::Http { status });
            }
            Err(ureq::Error::Transport(t)) => {
                return Err(match t.kind() {
                    ureq::ErrorKind::InvalidUrl | ureq::ErrorKind::UnknownScheme => {
                        FetchError::Url(t.to_string())
                    }
                    ureq::ErrorKind::TooManyRedirects => FetchError::Redirect(t.to_string()),
                    _ => FetchError::Network(t.to_string()),
                });
            }
        };

        let status_code = response.status();
        let content_type = response.content_type().to_owned();
        self.check_mime(&content_type)?;

        let mut body = Vec::new();
        use std::io::Read;
        response
            .into_reader()
            .take(self.max_content_size as u64)
            .read_to_end(&mut body)
            .map_err(FetchError::Io)?;

        Ok(FetchedContent {
            url: url.url.clone(),
            status_code,
            content_type,
            body,
        })
    }
}
