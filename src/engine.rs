// src/engine.rs
//! Enrichment orchestrator.
//!
//! One `Engine` owns the work list, the in-flight set, the title cache and
//! the retry holdings. All of it sits behind a single mutex that is never
//! held across an `.await`, so every check-and-set (claiming an in-flight
//! key, starting the drain loop) completes before the first suspension
//! point of the operation doing it. The queue drain and the retry tick are
//! the only two consumers and both claim through the same in-flight set.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use metrics::{counter, describe_counter};
use once_cell::sync::OnceCell;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::cache::TitleCache;
use crate::clock::{Clock, SystemClock};
use crate::config::EnrichConfig;
use crate::debounce::Debouncer;
use crate::document::{apply_link, EditTargets, TextSource};
use crate::http::HttpClient;
use crate::matcher::find_urls;
use crate::resolver::{ResolveError, TitleResolver};
use crate::retry::{RetryAdmission, RetryQueueItem, RetryScheduler};
use crate::task::{dedup_batch, tasks_for_line, InFlightKey, ProcessingTask};

/// One-time metrics registration.
fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("enrich_tasks_enqueued_total", "Tasks accepted into the work list.");
        describe_counter!("enrich_tasks_applied_total", "Links written into a document.");
        describe_counter!(
            "enrich_tasks_abandoned_total",
            "Tasks dropped because the text moved or no target was active."
        );
        describe_counter!("enrich_cache_hits_total", "Titles served from the cache.");
        describe_counter!(
            "enrich_retry_scheduled_total",
            "Transient failures handed to the retry scheduler."
        );
        describe_counter!(
            "enrich_retry_dropped_total",
            "Retry items dropped after exhausting their budget."
        );
        describe_counter!(
            "resolver_fallback_total",
            "Titles derived from the URL because the page had none."
        );
    });
}

#[derive(Debug, Error)]
pub enum EnrichError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),
}

impl EnrichError {
    pub fn is_transient(&self) -> bool {
        match self {
            EnrichError::Resolve(e) => e.is_transient(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Applied { title: String, cached: bool },
    /// Text moved, target went away, or the engine stopped meanwhile.
    Abandoned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PasteDisposition {
    /// A scan over this many lines ending at the cursor was scheduled.
    Scheduled { lines: usize },
    Ignored,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EngineSnapshot {
    pub running: bool,
    pub draining: bool,
    pub queued: usize,
    pub in_flight: usize,
    pub retry_held: usize,
    pub cached: usize,
}

struct State {
    running: bool,
    /// Bumped by `stop`; loops spawned under an older generation exit.
    generation: u64,
    draining: bool,
    queue: VecDeque<ProcessingTask>,
    in_flight: HashSet<InFlightKey>,
    cache: TitleCache,
    retries: RetryScheduler,
    /// Lines above (and including) the cursor the next debounced scan covers.
    pending_scan: usize,
    ticker: Option<CancellationToken>,
}

struct Shared {
    cfg: EnrichConfig,
    resolver: TitleResolver,
    targets: Arc<dyn EditTargets>,
    clock: Arc<dyn Clock>,
    debounce: Debouncer,
    state: Mutex<State>,
}

/// Cloneable handle to one enrichment engine.
#[derive(Clone)]
pub struct Engine {
    shared: Arc<Shared>,
}

impl Engine {
    pub fn new(cfg: EnrichConfig, http: Arc<dyn HttpClient>, targets: Arc<dyn EditTargets>) -> Self {
        Self::with_clock(cfg, http, targets, Arc::new(SystemClock))
    }

    pub fn with_clock(
        cfg: EnrichConfig,
        http: Arc<dyn HttpClient>,
        targets: Arc<dyn EditTargets>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        ensure_metrics_described();
        let cfg = cfg.sanitized();
        let resolver = TitleResolver::new(http, cfg.resolver());
        let state = State {
            running: false,
            generation: 0,
            draining: false,
            queue: VecDeque::new(),
            in_flight: HashSet::new(),
            cache: TitleCache::with_capacity(cfg.cache_capacity),
            retries: RetryScheduler::new(cfg.retry_policy()),
            pending_scan: 0,
            ticker: None,
        };
        Self {
            shared: Arc::new(Shared {
                cfg,
                resolver,
                targets,
                clock,
                debounce: Debouncer::new(),
                state: Mutex::new(state),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        match self.shared.state.lock() {
            Ok(g) => g,
            Err(poison) => poison.into_inner(),
        }
    }

    pub fn config(&self) -> &EnrichConfig {
        &self.shared.cfg
    }

    /// Begin accepting events and start the periodic retry tick.
    /// Must be called from within a tokio runtime.
    pub fn start(&self) {
        let token = CancellationToken::new();
        {
            let mut st = self.lock();
            if st.running {
                return;
            }
            st.running = true;
            st.ticker = Some(token.clone());
        }

        let engine = self.clone();
        let period = self.shared.cfg.retry_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        engine.retry_tick().await;
                    }
                }
            }
            tracing::debug!(target: "enrich", "retry ticker stopped");
        });
        tracing::info!(target: "enrich", "engine started");
    }

    /// Tear down: drop all pending work, holdings and cached titles.
    ///
    /// Network calls already under way finish on their own; their results are
    /// discarded because the generation they started under is gone.
    pub fn stop(&self) {
        self.shared.debounce.cancel();
        let ticker = {
            let mut st = self.lock();
            st.running = false;
            st.generation = st.generation.wrapping_add(1);
            st.draining = false;
            st.queue.clear();
            st.in_flight.clear();
            st.cache.clear();
            st.retries.clear();
            st.pending_scan = 0;
            st.ticker.take()
        };
        if let Some(token) = ticker {
            token.cancel();
        }
        tracing::info!(target: "enrich", "engine stopped");
    }

    pub fn is_running(&self) -> bool {
        self.lock().running
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        let st = self.lock();
        EngineSnapshot {
            running: st.running,
            draining: st.draining,
            queued: st.queue.len(),
            in_flight: st.in_flight.len(),
            retry_held: st.retries.len(),
            cached: st.cache.len(),
        }
    }

    /// Cached title for `url`, if one is held.
    pub fn cached_title(&self, url: &str) -> Option<String> {
        self.lock().cache.get(url).map(str::to_string)
    }

    /// Retry-holding state for one occurrence.
    pub fn retry_item(&self, task: &ProcessingTask) -> Option<RetryQueueItem> {
        self.lock().retries.get(&task.retry_key()).cloned()
    }

    // ------------------------------------------------------------
    // Host events
    // ------------------------------------------------------------

    /// The active document changed; rescan the cursor line once typing settles.
    pub fn on_text_changed(&self) {
        self.request_scan(1);
    }

    /// Text was pasted. The host's default paste goes ahead; when the pasted
    /// text holds a bare URL, every line it may have landed on is rescanned.
    pub fn on_paste(&self, clipboard: &str) -> PasteDisposition {
        if !self.is_running() || find_urls(clipboard).next().is_none() {
            return PasteDisposition::Ignored;
        }
        let lines = clipboard.split('\n').count().max(1);
        self.request_scan(lines);
        PasteDisposition::Scheduled { lines }
    }

    fn request_scan(&self, lines: usize) {
        {
            let mut st = self.lock();
            if !st.running {
                return;
            }
            st.pending_scan = st.pending_scan.max(lines);
        }
        let engine = self.clone();
        self.shared
            .debounce
            .schedule(self.shared.cfg.debounce(), async move {
                engine.scan_pending().await;
            });
    }

    async fn scan_pending(&self) {
        let span = std::mem::take(&mut self.lock().pending_scan);
        if span == 0 {
            return;
        }
        let Some(doc) = self.shared.targets.current() else {
            tracing::debug!(target: "enrich", "no active document; scan skipped");
            return;
        };
        let tasks = self.tasks_near_cursor(doc.as_ref(), span);
        if !tasks.is_empty() {
            self.enqueue(tasks);
        }
    }

    fn tasks_near_cursor(&self, doc: &dyn TextSource, span: usize) -> Vec<ProcessingTask> {
        let count = doc.line_count();
        if count == 0 {
            return Vec::new();
        }
        let last = doc.cursor().line.min(count - 1);
        let first = (last + 1).saturating_sub(span);
        let now = self.shared.clock.now_ms();
        (first..=last)
            .filter_map(|n| doc.line(n).map(|line| tasks_for_line(&line, n, now)))
            .flatten()
            .collect()
    }

    // ------------------------------------------------------------
    // Task queue
    // ------------------------------------------------------------

    /// Submit a batch. Returns how many tasks were accepted.
    pub fn enqueue(&self, tasks: Vec<ProcessingTask>) -> usize {
        let (kept, dropped) = dedup_batch(tasks);
        let (accepted, spawn_gen) = {
            let mut st = self.lock();
            if !st.running {
                return 0;
            }
            let mut accepted = 0usize;
            for t in kept {
                if st.retries.contains(&t.retry_key()) {
                    tracing::debug!(target: "enrich", url = %t.url, line = t.line_number, "held for retry; not enqueued");
                    continue;
                }
                st.queue.push_back(t);
                accepted += 1;
            }
            let spawn_gen = if !st.draining && !st.queue.is_empty() {
                st.draining = true;
                Some(st.generation)
            } else {
                None
            };
            (accepted, spawn_gen)
        };

        counter!("enrich_tasks_enqueued_total").increment(accepted as u64);
        tracing::debug!(target: "enrich", accepted, dropped, "batch enqueued");

        if let Some(generation) = spawn_gen {
            let engine = self.clone();
            tokio::spawn(async move { engine.drain(generation).await });
        }
        accepted
    }

    async fn drain(self, generation: u64) {
        loop {
            let task = {
                let mut st = self.lock();
                if st.generation != generation || !st.running {
                    return;
                }
                match st.queue.pop_front() {
                    Some(t) if st.retries.contains(&t.retry_key()) => {
                        tracing::debug!(target: "enrich", url = %t.url, line = t.line_number, "held for retry; skipped");
                        continue;
                    }
                    Some(t) => t,
                    None => {
                        st.draining = false;
                        return;
                    }
                }
            };

            if !self.claim(&task) {
                tracing::debug!(target: "enrich", url = %task.url, line = task.line_number, "already in flight; skipped");
                continue;
            }
            let outcome = self.process(&task, generation).await;
            self.release(&task, generation);
            self.settle_queue_outcome(task, outcome, generation);

            tokio::time::sleep(self.shared.cfg.drain_pause()).await;
        }
    }

    fn claim(&self, task: &ProcessingTask) -> bool {
        self.lock().in_flight.insert(task.in_flight_key())
    }

    /// Keys claimed under an older generation were already cleared by `stop`.
    fn release(&self, task: &ProcessingTask, generation: u64) {
        let mut st = self.lock();
        if st.generation == generation {
            st.in_flight.remove(&task.in_flight_key());
        }
    }

    fn settle_queue_outcome(
        &self,
        task: ProcessingTask,
        outcome: Result<TaskOutcome, EnrichError>,
        generation: u64,
    ) {
        match outcome {
            Ok(TaskOutcome::Applied { title, cached }) => {
                tracing::info!(target: "enrich", url = %task.url, line = task.line_number, %title, cached, "link applied");
            }
            Ok(TaskOutcome::Abandoned) => {}
            Err(e) if e.is_transient() => {
                let now = self.shared.clock.now_ms();
                let mut st = self.lock();
                if st.generation != generation || !st.running {
                    return;
                }
                let key = task.retry_key();
                match st.retries.add(task.clone(), now) {
                    RetryAdmission::Scheduled { retries, next_retry } => {
                        // The scheduler now owns this occurrence.
                        let before = st.queue.len();
                        st.queue.retain(|t| t.retry_key() != key);
                        let withdrawn = before - st.queue.len();
                        counter!("enrich_retry_scheduled_total").increment(1);
                        tracing::warn!(target: "enrich", url = %task.url, retries, next_retry, withdrawn, error = %e, "handed to retry scheduler");
                    }
                    RetryAdmission::Exhausted => {
                        // Only reachable with a zero retry cap.
                        st.retries.remove(&key);
                        counter!("enrich_retry_dropped_total").increment(1);
                        tracing::warn!(target: "enrich", url = %task.url, error = %e, "retry budget exhausted; dropping");
                    }
                }
            }
            Err(e) => {
                tracing::warn!(target: "enrich", url = %task.url, error = %e, "enrichment failed; dropping");
            }
        }
    }

    // ------------------------------------------------------------
    // Per-task pipeline
    // ------------------------------------------------------------

    async fn process(
        &self,
        task: &ProcessingTask,
        generation: u64,
    ) -> Result<TaskOutcome, EnrichError> {
        let Some(doc) = self.shared.targets.current() else {
            return Ok(self.abandon(task, "no active document"));
        };
        let still_there = doc
            .line(task.line_number)
            .is_some_and(|line| task.matches_line(&line));
        if !still_there {
            return Ok(self.abandon(task, "text moved"));
        }

        let (title, cached) = self.lookup_title(&task.url).await?;

        // The document may have changed or the engine stopped while resolving.
        if !self.is_current(generation) {
            return Ok(self.abandon(task, "engine stopped"));
        }
        let same_target = self
            .shared
            .targets
            .current()
            .is_some_and(|cur| Arc::ptr_eq(&cur, &doc));
        if !same_target {
            return Ok(self.abandon(task, "document switched"));
        }
        let updated = doc
            .line(task.line_number)
            .filter(|line| task.matches_line(line))
            .and_then(|line| apply_link(&line, task.position, &task.url, &title));
        let Some(updated) = updated else {
            return Ok(self.abandon(task, "text moved"));
        };
        doc.set_line(task.line_number, &updated);
        counter!("enrich_tasks_applied_total").increment(1);
        Ok(TaskOutcome::Applied { title, cached })
    }

    fn abandon(&self, task: &ProcessingTask, why: &'static str) -> TaskOutcome {
        counter!("enrich_tasks_abandoned_total").increment(1);
        tracing::debug!(target: "enrich", url = %task.url, line = task.line_number, position = task.position, why, "task abandoned");
        TaskOutcome::Abandoned
    }

    fn is_current(&self, generation: u64) -> bool {
        let st = self.lock();
        st.running && st.generation == generation
    }

    /// Title for `url`, served from the cache when possible.
    pub async fn title_for(&self, url: &str) -> Result<String, EnrichError> {
        self.lookup_title(url).await.map(|(title, _)| title)
    }

    async fn lookup_title(&self, url: &str) -> Result<(String, bool), EnrichError> {
        let (hit, generation) = {
            let st = self.lock();
            (st.cache.get(url).map(str::to_string), st.generation)
        };
        if let Some(title) = hit {
            counter!("enrich_cache_hits_total").increment(1);
            return Ok((title, true));
        }

        let title = self.shared.resolver.resolve(url).await?;
        {
            let mut st = self.lock();
            if st.generation == generation {
                st.cache.put(url, title.clone());
            }
        }
        Ok((title, false))
    }

    // ------------------------------------------------------------
    // Retry scheduler tick
    // ------------------------------------------------------------

    /// Re-run every held item whose deadline has passed. Returns how many
    /// were attempted.
    pub async fn retry_tick(&self) -> usize {
        let (due, generation) = {
            let st = self.lock();
            if !st.running {
                return 0;
            }
            (st.retries.due(self.shared.clock.now_ms()), st.generation)
        };

        let mut attempted = 0usize;
        for item in due {
            if self.shared.targets.current().is_none() {
                tracing::debug!(target: "enrich", url = %item.task.url, "no active document; retry deferred");
                continue;
            }
            let task = item.task;
            if !self.claim(&task) {
                continue;
            }
            attempted += 1;
            let outcome = self.process(&task, generation).await;
            self.release(&task, generation);

            let now = self.shared.clock.now_ms();
            let key = task.retry_key();
            let mut st = self.lock();
            if st.generation != generation || !st.running {
                return attempted;
            }
            match outcome {
                Ok(done) => {
                    st.retries.remove(&key);
                    if let TaskOutcome::Applied { title, .. } = done {
                        tracing::info!(target: "enrich", url = %task.url, %title, "link applied on retry");
                    }
                }
                Err(e) if e.is_transient() => {
                    if st.retries.is_exhausted(&key) {
                        st.retries.remove(&key);
                        counter!("enrich_retry_dropped_total").increment(1);
                        tracing::warn!(target: "enrich", url = %task.url, error = %e, "retry budget exhausted; dropping");
                    } else if let RetryAdmission::Scheduled { retries, next_retry } =
                        st.retries.add(task.clone(), now)
                    {
                        counter!("enrich_retry_scheduled_total").increment(1);
                        tracing::debug!(target: "enrich", url = %task.url, retries, next_retry, "retry rescheduled");
                    }
                }
                Err(e) => {
                    st.retries.remove(&key);
                    tracing::warn!(target: "enrich", url = %task.url, error = %e, "retry failed; dropping");
                }
            }
        }
        attempted
    }
}
