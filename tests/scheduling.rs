use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use ixora::{
    Config, Engine, FetchError, FetchExecutor, FetchedContent, RecordSink, ScoredUrl,
};

struct StubExecutor {
    fetched: Mutex<Vec<String>>,
}

impl StubExecutor {
    fn new() -> Self {
        Self {
            fetched: Mutex::new(vec![]),
        }
    }
}

#[async_trait]
impl FetchExecutor for StubExecutor {
    async fn fetch(&self, url: &ScoredUrl) -> Result<FetchedContent, FetchError> {
        self.fetched.lock().unwrap().push(url.url.clone());
        if url.url.contains("missing") {
            return Err(FetchError::Http { status: 404 });
        }
        Ok(FetchedContent {
            url: url.url.clone(),
            status_code: 200,
            content_type: "text/html".to_owned(),
            body: b"<html></html>".to_vec(),
        })
    }
}

#[derive(Default)]
struct CollectingSink {
    ok: Mutex<Vec<String>>,
    failed: Mutex<Vec<String>>,
    skipped: Mutex<Vec<String>>,
}

#[async_trait]
impl RecordSink for CollectingSink {
    async fn handle(&self, url: ScoredUrl, result: Result<FetchedContent, FetchError>) {
        match result {
            Ok(_) => self.ok.lock().unwrap().push(url.url),
            Err(FetchError::Skipped) => self.skipped.lock().unwrap().push(url.url),
            Err(_) => self.failed.lock().unwrap().push(url.url),
        }
    }
}

fn fast_config() -> Config {
    Config {
        crawl_delay_ms: 0,
        max_fetch_threads: 4,
        max_urls_per_set: 10,
        max_urls_in_memory: 1_000,
        max_urls_per_queue: 50,
        report_interval_secs: 3600,
        ..Config::default()
    }
}

#[tokio::test]
async fn full_run_delivers_every_url_exactly_once() {
    let executor = Arc::new(StubExecutor::new());
    let sink = Arc::new(CollectingSink::default());
    let mut engine = Engine::new(fast_config(), executor.clone(), sink.clone());

    for host in ["a.test", "b.test", "c.test"] {
        for n in 0..12 {
            let path = if n == 5 { "missing" } else { "page" };
            let url = ScoredUrl::new(
                &format!("http://{}/{}-{}", host, path, n),
                host,
                1.0,
            );
            assert!(engine.offer(url));
        }
    }
    engine.finish_input();
    engine.start().await;

    let ok = sink.ok.lock().unwrap();
    let failed = sink.failed.lock().unwrap();
    assert_eq!(ok.len(), 33);
    assert_eq!(failed.len(), 3);

    let mut all: Vec<String> = ok.iter().chain(failed.iter()).cloned().collect();
    all.sort();
    all.dedup();
    assert_eq!(all.len(), 36);

    let stats = engine.stats();
    assert_eq!(stats.urls_fetched(), 33);
    assert_eq!(stats.urls_failed(), 3);
}

#[tokio::test]
async fn urls_past_the_server_cap_come_back_as_skipped() {
    let config = Config {
        max_urls_per_server: 15,
        ..fast_config()
    };
    let executor = Arc::new(StubExecutor::new());
    let sink = Arc::new(CollectingSink::default());
    let mut engine = Engine::new(config, executor.clone(), sink.clone());

    for n in 0..40 {
        let url = ScoredUrl::new(&format!("http://a.test/page-{}", n), "a.test", 1.0);
        assert!(engine.offer(url));
    }
    engine.finish_input();
    engine.start().await;

    // 15 fetched (10 + headroom 5), the remaining 25 skipped, none lost
    assert_eq!(sink.ok.lock().unwrap().len(), 15);
    assert_eq!(sink.skipped.lock().unwrap().len(), 25);
    assert_eq!(executor.fetched.lock().unwrap().len(), 15);

    let stats = engine.stats();
    assert_eq!(stats.urls_skipped(), 25);
}
