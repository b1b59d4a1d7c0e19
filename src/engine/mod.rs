use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

mod thread_state;

use crate::config::Config;
use crate::fetcher::{FetchError, FetchExecutor, RecordSink};
use crate::manager::{FetchSetEntry, QueueManager};
use crate::model::{FetchSet, ScoredUrl};
use crate::policy::{AdaptiveFetcherPolicy, FetcherPolicy, FixedFetcherPolicy};
use crate::queue::MostOverdueDelayQueue;
use crate::stats::{counter, MetricsSink, Stats};

use thread_state::{ThreadState, ThreadStatus};

// How often the release task folds buffered urls into fetch sets
const RELEASE_INTERVAL_MS: u64 = 50;

struct EngineState {
    config: Arc<Config>,
    manager: Mutex<QueueManager>,
    release_queue: MostOverdueDelayQueue<FetchSetEntry>,
    executor: Arc<dyn FetchExecutor>,
    sink: Arc<dyn RecordSink>,
    thread_state: ThreadState,
    stats: Arc<Stats>,
    input_finished: AtomicBool,
}

impl EngineState {
    fn new(
        config: Config,
        executor: Arc<dyn FetchExecutor>,
        sink: Arc<dyn RecordSink>,
    ) -> Self {
        let config = Arc::new(config);
        let stats = Arc::new(Stats::new());

        // Deadline configured: stretch delays adaptively. Otherwise pace at
        // the fixed crawl delay.
        let policy: Box<dyn FetcherPolicy + Send> = match config.crawl_end_time {
            Some(end) => Box::new(AdaptiveFetcherPolicy::new(end, config.min_crawl_delay_ms)),
            None => Box::new(FixedFetcherPolicy::new(config.crawl_delay_ms)),
        };
        let manager = QueueManager::new(&config, policy, stats.clone());
        let release_queue = manager.release_queue();

        Self {
            config: config.clone(),
            manager: Mutex::new(manager),
            release_queue,
            executor,
            sink,
            thread_state: ThreadState::new(config.max_fetch_threads),
            stats,
            input_finished: AtomicBool::new(false),
        }
    }
}

// `config`, `executor` and `sink` are read-only after initialization; only
// the manager needs the mutex.
pub struct Engine {
    state: Arc<EngineState>,
}

impl Engine {
    pub fn new(
        config: Config,
        executor: Arc<dyn FetchExecutor>,
        sink: Arc<dyn RecordSink>,
    ) -> Self {
        let state = EngineState::new(config, executor, sink);
        Self {
            state: Arc::new(state),
        }
    }

    /// Admit one scored url from the upstream record stream. Returns false
    /// on back-pressure; the producer should retry later.
    pub fn offer(&self, url: ScoredUrl) -> bool {
        let mut manager = self.state.manager.lock().unwrap();
        manager.offer(url)
    }

    /// Signal end of input: flush every partial fetch set and let the run
    /// wind down once the release queue drains.
    pub fn finish_input(&self) {
        {
            let mut manager = self.state.manager.lock().unwrap();
            if let Err(e) = manager.finish_all() {
                log::error!("flushing host queues failed: {}", e);
            }
        }
        self.state.input_finished.store(true, Ordering::SeqCst);
    }

    pub fn stats(&self) -> Arc<Stats> {
        self.state.stats.clone()
    }

    pub async fn start(&mut self) {
        let config = &self.state.config;
        config.sanity_check();

        let (stop_tx, _) = broadcast::channel::<()>(32);
        let tx = stop_tx.clone();
        if let Err(e) = ctrlc::set_handler(move || {
            let _ = tx.send(());
        }) {
            log::warn!("ctrl-c handler not installed: {}", e);
        }

        let mut join_handles = vec![];

        {
            let h = start_release_thread(self.state.clone(), stop_tx.clone());
            join_handles.push(h);
        }
        {
            let h = start_reporting_thread(self.state.clone(), stop_tx.clone());
            join_handles.push(h);
        }

        log::debug!("fetch threads: {}", config.max_fetch_threads);
        for i in 0..config.max_fetch_threads {
            let handle = start_worker_thread(
                (i + 1) as u32,
                self.state.clone(),
                stop_tx.clone(),
            );
            join_handles.push(handle);
        }

        for h in join_handles {
            h.await.unwrap();
        }

        log::info!("Exit gracefully");
    }
}

fn start_release_thread(
    state: Arc<EngineState>,
    stop_tx: broadcast::Sender<()>,
) -> JoinHandle<()> {
    let mut stop_rx = stop_tx.subscribe();
    tokio::spawn(async move {
        'run: loop {
            let sleep = tokio::time::sleep(Duration::from_millis(RELEASE_INTERVAL_MS));
            tokio::pin!(sleep);

            tokio::select! {
                res = stop_rx.recv() => {
                    if res.is_ok() {
                        break 'run;
                    }
                }
                _ = &mut sleep => {
                    let mut manager = state.manager.lock().unwrap();
                    if let Err(e) = manager.release() {
                        // A spill store died; its queue is stuck but the
                        // rest of the run keeps going.
                        log::error!("releasing fetch sets failed: {}", e);
                    }
                }
            }
        }
    })
}

fn start_worker_thread(
    worker_id: u32,
    state: Arc<EngineState>,
    stop_tx: broadcast::Sender<()>,
) -> JoinHandle<()> {
    log::debug!("[worker-{}] start", worker_id);
    let mut stop_rx = stop_tx.subscribe();
    tokio::spawn(async move {
        'run: loop {
            if stop_rx.try_recv().is_ok() {
                break 'run;
            }

            match state.release_queue.poll() {
                Some(entry) => {
                    state
                        .thread_state
                        .set_thread_status(worker_id, ThreadStatus::Busy);
                    let key = entry.set.grouping_key.clone();
                    log::info!(
                        "[worker-{}] [{}] {} urls{}",
                        worker_id,
                        key,
                        entry.set.len(),
                        if entry.set.skipping { " (skip)" } else { "" },
                    );

                    drain_fetch_set(&state, entry.set).await;

                    let mut manager = state.manager.lock().unwrap();
                    manager.mark_set_done(&key);
                }
                None => {
                    state
                        .thread_state
                        .set_thread_status(worker_id, ThreadStatus::Idle);

                    if state.input_finished.load(Ordering::SeqCst)
                        && state.thread_state.is_all_idle()
                    {
                        let idle = {
                            let manager = state.manager.lock().unwrap();
                            manager.is_idle()
                        };
                        if idle {
                            // Run finished, exit.
                            let _res = stop_tx.send(());
                            break 'run;
                        }
                    }

                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            }
        }
    })
}

// Drain one released fetch set, spacing requests by the set's fetch delay.
async fn drain_fetch_set(state: &Arc<EngineState>, set: FetchSet) {
    if set.is_empty() {
        return;
    }
    let spacing_ms = set.fetch_delay_ms / set.len() as i64;
    let last = set.len() - 1;

    for (idx, url) in set.urls.into_iter().enumerate() {
        if set.skipping {
            state.stats.increment(counter::URLS_SKIPPED, 1);
            state.sink.handle(url, Err(FetchError::Skipped)).await;
            continue;
        }

        match state.executor.fetch(&url).await {
            Ok(content) => {
                state.stats.increment(counter::URLS_FETCHED, 1);
                state.sink.handle(url, Ok(content)).await;
            }
            Err(e) => {
                // Typed fetch failures are the executor's business; the
                // scheduler just keeps going.
                log::error!("{}: {}", url.url, e);
                state.stats.increment(counter::URLS_FAILED, 1);
                state.sink.handle(url, Err(e)).await;
            }
        }

        if idx < last && spacing_ms > 0 {
            tokio::time::sleep(Duration::from_millis(spacing_ms as u64)).await;
        }
    }
}

fn start_reporting_thread(
    state: Arc<EngineState>,
    stop_tx: broadcast::Sender<()>,
) -> JoinHandle<()> {
    let mut stop_rx = stop_tx.subscribe();
    tokio::spawn(async move {
        'run: loop {
            let sleep = tokio::time::sleep(Duration::from_secs(state.config.report_interval_secs));
            tokio::pin!(sleep);

            tokio::select! {
                res = stop_rx.recv() => {
                    if res.is_ok() {
                        break 'run;
                    }
                }
                _ = &mut sleep => {
                    let fetched = state.stats.urls_fetched();
                    let failed = state.stats.urls_failed();
                    let skipped = state.stats.urls_skipped();
                    let fpm = state.stats.fetched_per_minute();
                    let buffered = {
                        let manager = state.manager.lock().unwrap();
                        manager.buffered_urls()
                    };
                    log::info!(
                        "{} fetched at {} urls/minute, {} failed, {} skipped, {} buffered, {}/{} workers idle",
                        fetched,
                        fpm,
                        failed,
                        skipped,
                        buffered,
                        state.thread_state.idle_workers(),
                        state.thread_state.num_workers(),
                    );
                }
            }
        }
    })
}
