use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::stream::FuturesUnordered;
use futures::StreamExt;
use governor::{Quota, RateLimiter};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use tokio::sync::Semaphore;
use tokio::task;

use crate::aggregator::ResultAggregator;
use crate::normalizer::{self, NormalizedRecord};
use crate::process::{self, ProcessError, ProcessRegistry, RawResult, ToolInvocation};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TaskStatus {
    Completed,
    NonZeroExit(Option<i32>),
    TimedOut,
    LaunchFailed(String),
    Interrupted,
    Failed(String),
}

/// What one invocation contributed. `raw` is absent when nothing ran.
#[derive(Clone, Debug)]
pub struct TaskOutcome {
    pub index: usize,
    pub tool: String,
    pub target: String,
    pub status: TaskStatus,
    pub raw: Option<RawResult>,
}

impl TaskOutcome {
    pub fn stdout_lines(&self) -> impl Iterator<Item = &str> {
        self.raw.iter().flat_map(|raw| raw.stdout.lines())
    }
}

/// Completion counter shared by the workers of one phase.
pub struct PhaseProgress {
    total: usize,
    completed: AtomicUsize,
    bar: ProgressBar,
}

impl PhaseProgress {
    fn new(total: usize, bar: ProgressBar) -> Self {
        Self {
            total,
            completed: AtomicUsize::new(0),
            bar,
        }
    }

    fn advance(&self) {
        self.completed.fetch_add(1, Ordering::SeqCst);
        self.bar.inc(1);
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    pub fn total(&self) -> usize {
        self.total
    }
}

// advances the counter when the task ends, however it ends
struct CompletionGuard(Arc<PhaseProgress>);

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        self.0.advance();
    }
}

pub struct PhaseRun {
    pub outcomes: Vec<TaskOutcome>,
    pub progress: Arc<PhaseProgress>,
}

impl PhaseRun {
    pub fn count(&self, pred: impl Fn(&TaskStatus) -> bool) -> usize {
        self.outcomes.iter().filter(|o| pred(&o.status)).count()
    }
}

type RecordSink = Arc<dyn Fn(NormalizedRecord) + Send + Sync>;

#[derive(Clone, Debug)]
pub struct Scheduler {
    registry: ProcessRegistry,
    dispatch_interval: Option<Duration>,
    show_progress: bool,
}

impl Scheduler {
    pub fn new(registry: ProcessRegistry) -> Self {
        Self {
            registry,
            dispatch_interval: None,
            show_progress: false,
        }
    }

    /// Spaces out process launches; used by safe mode.
    pub fn with_dispatch_interval(mut self, interval: Option<Duration>) -> Self {
        self.dispatch_interval = interval;
        self
    }

    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    pub fn registry(&self) -> &ProcessRegistry {
        &self.registry
    }

    fn progress_bar(&self, phase: &str, total: usize) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }
        let bar = ProgressBar::new(total as u64);
        bar.set_draw_target(ProgressDrawTarget::stderr());
        if let Ok(style) = ProgressStyle::with_template(
            ":: {msg:<12} [{pos}/{len}] :: Duration: [{elapsed_precise}] {wide_bar:.cyan/blue}",
        ) {
            bar.set_style(style.progress_chars("#>-"));
        }
        bar.set_message(phase.to_string());
        bar
    }

    /// Runs `tasks` with at most `concurrency_limit` in flight, in submission
    /// order. Every task yields exactly one outcome.
    pub async fn run_phase(
        &self,
        phase: &str,
        tasks: Vec<ToolInvocation>,
        concurrency_limit: usize,
    ) -> PhaseRun {
        self.dispatch(phase, tasks, concurrency_limit, None).await
    }

    /// Like [`Scheduler::run_phase`], but each worker normalizes its own
    /// output and merges accepted records into `aggregator` as it finishes.
    pub async fn run_phase_into<F>(
        &self,
        phase: &str,
        tasks: Vec<ToolInvocation>,
        concurrency_limit: usize,
        aggregator: Arc<ResultAggregator>,
        accept: F,
    ) -> PhaseRun
    where
        F: Fn(&NormalizedRecord) -> bool + Send + Sync + 'static,
    {
        let sink: RecordSink = Arc::new(move |record: NormalizedRecord| {
            if accept(&record) {
                aggregator.merge(record);
            }
        });
        self.dispatch(phase, tasks, concurrency_limit, Some(sink)).await
    }

    async fn dispatch(
        &self,
        phase: &str,
        tasks: Vec<ToolInvocation>,
        concurrency_limit: usize,
        sink: Option<RecordSink>,
    ) -> PhaseRun {
        let total = tasks.len();
        let progress = Arc::new(PhaseProgress::new(total, self.progress_bar(phase, total)));
        if total == 0 {
            return PhaseRun {
                outcomes: Vec::new(),
                progress,
            };
        }

        let limit = concurrency_limit.max(1);
        tracing::info!(phase, tasks = total, workers = limit, "dispatching");
        let semaphore = Arc::new(Semaphore::new(limit));
        let pacing = self
            .dispatch_interval
            .and_then(Quota::with_period)
            .map(|q| RateLimiter::direct(q.allow_burst(NonZeroU32::MIN)));

        let mut labels: HashMap<usize, (String, String)> = HashMap::new();
        let mut running = FuturesUnordered::new();

        for (index, invocation) in tasks.into_iter().enumerate() {
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            if let Some(limiter) = &pacing {
                limiter.until_ready().await;
            }
            labels.insert(index, (invocation.tool.clone(), invocation.target.clone()));

            let guard = CompletionGuard(progress.clone());
            let registry = self.registry.clone();
            let sink = sink.clone();
            let phase = phase.to_string();
            let bar = progress.bar.clone();
            running.push(task::spawn(async move {
                let _permit = permit;
                let _guard = guard;
                run_one(&phase, index, invocation, &registry, sink.as_ref(), &bar).await
            }));
        }

        let mut outcomes: Vec<TaskOutcome> = Vec::with_capacity(total);
        while let Some(joined) = running.next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => tracing::error!(phase, "worker task failed: {e}"),
            }
        }

        // tasks that died without reporting still get an outcome
        for (index, (tool, target)) in labels {
            if !outcomes.iter().any(|o| o.index == index) {
                outcomes.push(TaskOutcome {
                    index,
                    tool,
                    target,
                    status: TaskStatus::Failed("worker panicked".to_string()),
                    raw: None,
                });
            }
        }
        outcomes.sort_by_key(|o| o.index);
        progress.bar.finish_and_clear();
        tracing::info!(
            phase,
            completed = progress.completed(),
            total = progress.total(),
            "phase drained"
        );
        PhaseRun { outcomes, progress }
    }
}

async fn run_one(
    phase: &str,
    index: usize,
    invocation: ToolInvocation,
    registry: &ProcessRegistry,
    sink: Option<&RecordSink>,
    bar: &ProgressBar,
) -> TaskOutcome {
    let tool = invocation.tool.clone();
    let target = invocation.target.clone();
    bar.set_message(format!("{phase}:{tool}"));

    let (status, raw) = match process::execute(&invocation, registry).await {
        Ok(raw) if raw.success() => (TaskStatus::Completed, Some(raw)),
        Ok(raw) => {
            tracing::warn!(phase, tool = %tool, target = %target, code = ?raw.exit_status, "exited non-zero, keeping its output");
            (TaskStatus::NonZeroExit(raw.exit_status), Some(raw))
        }
        Err(ProcessError::Launch { source, .. }) => {
            tracing::error!(phase, tool = %tool, target = %target, "launch failed: {source}");
            (TaskStatus::LaunchFailed(source.to_string()), None)
        }
        Err(ProcessError::Timeout { seconds, partial, .. }) => {
            tracing::warn!(phase, tool = %tool, target = %target, "timed out after {seconds}s, parsing partial output");
            (TaskStatus::TimedOut, Some(partial))
        }
        Err(ProcessError::Interrupted { partial, .. }) => {
            tracing::warn!(phase, tool = %tool, target = %target, "interrupted");
            (TaskStatus::Interrupted, Some(partial))
        }
        Err(e) => {
            tracing::error!(phase, tool = %tool, target = %target, "{e}");
            (TaskStatus::Failed(e.to_string()), None)
        }
    };

    if let (Some(sink), Some(raw)) = (sink, raw.as_ref()) {
        let mut parsed = 0usize;
        for line in raw.stdout.lines() {
            if let Some(record) = normalizer::parse(line, &tool, &target) {
                parsed += 1;
                sink(record);
            }
        }
        tracing::debug!(phase, tool = %tool, target = %target, parsed, "normalized");
    }

    TaskOutcome {
        index,
        tool,
        target,
        status,
        raw,
    }
}
