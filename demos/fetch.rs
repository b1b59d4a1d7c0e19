use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use ixora::{FetchError, FetchedContent, RecordSink, ScoredUrl};

pub struct PrintSink {
    pub fetched: Arc<Mutex<u64>>,
}

#[async_trait]
impl RecordSink for PrintSink {
    async fn handle(&self, url: ScoredUrl, result: Result<FetchedContent, FetchError>) {
        match result {
            Ok(content) => {
                println!(
                    "{}: {} ({} bytes)",
                    url.url,
                    content.status_code,
                    content.body.len()
                );
                let mut fetched = self.fetched.lock().unwrap();
                *fetched += 1;
            }
            Err(e) => {
                println!("{}: {}", url.url, e);
            }
        }
    }
}

#[tokio::main]
async fn main() {
    env_logger::init();

    let fetched = Arc::new(Mutex::new(0));
    let sink = PrintSink {
        fetched: fetched.clone(),
    };
    let mut engine = ixora::engine(Arc::new(sink));
    for url in ["https://dexcode.com/", "https://www.rust-lang.org/"] {
        let key = ixora::grouping_key(url);
        engine.offer(ScoredUrl::new(url, &key, 1.0));
    }
    engine.finish_input();
    engine.start().await;

    let fetched = fetched.lock().unwrap();
    println!("fetched: {}", fetched);
}
