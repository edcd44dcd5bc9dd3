//! Parallel extraction runner.
//!
//! Work items are `(hash, path)` jobs handed to an [`Extractor`]. With one
//! job the items run in input order on the calling thread; otherwise a pool
//! of worker threads consumes a bounded channel batch by batch and reports
//! tagged [`Outcome`]s back. Only the orchestrating thread touches storage:
//! every completed result is written through the [`ResultSink`] as soon as it
//! arrives. A rejected write fails that item only.

use std::collections::{HashSet, VecDeque};
use std::io::Read;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::config::RunnerConfig;
use crate::error::{BenchDbError, Result};
use crate::logging::OperationTimer;
use crate::metrics;
use crate::models::{Attribute, Job, ResultRecord};

/// Resource limits handed to extractors; zero means unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Limits {
    /// Wall-clock seconds per item
    pub time_secs: u64,
    /// Memory per item in megabytes
    pub memory_mb: u64,
}

impl Limits {
    /// Time limit as a duration, `None` when unbounded.
    #[must_use]
    pub const fn time_limit(&self) -> Option<Duration> {
        if self.time_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.time_secs))
        }
    }
}

/// Failure of a single extraction.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExtractError {
    /// The item could not be processed; the run continues
    #[error("{0}")]
    Failed(String),
    /// The extractor itself is unusable; the run is aborted
    #[error("{0}")]
    Fatal(String),
}

/// Per-item computation.
pub trait Extractor: Send + Sync {
    /// Name used in diagnostics.
    fn name(&self) -> &str;

    /// Feature whose presence marks an item as already processed.
    fn target(&self) -> Option<&str> {
        None
    }

    /// Compute the attribute updates for one item.
    fn extract(&self, job: &Job, limits: &Limits) -> std::result::Result<ResultRecord, ExtractError>;
}

/// Destination of completed results.
pub trait ResultSink {
    /// Persist one result atomically.
    fn write(&mut self, record: &ResultRecord) -> Result<()>;
}

/// Tagged result of one dispatched item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Extraction succeeded
    Completed(Job, ResultRecord),
    /// The worker died while processing the item
    WorkerLost(Job),
    /// Extraction failed for this item only
    Failed(Job, String),
    /// Extraction failed in a way that invalidates the whole run
    Fatal(String),
    /// The batch deadline passed before the item finished
    TimedOut(Job),
}

/// Summary of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    /// Results written
    pub completed: usize,
    /// Items already processed before the run
    pub skipped: usize,
    /// Items whose worker died
    pub lost: Vec<Job>,
    /// Items that failed, with the reason
    pub failed: Vec<(Job, String)>,
    /// Items abandoned at a batch deadline
    pub timed_out: Vec<Job>,
}

impl RunReport {
    /// Whether every dispatched item was written.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.lost.is_empty() && self.failed.is_empty() && self.timed_out.is_empty()
    }

    fn record_metrics(&self) {
        metrics::record_outcome("completed", self.completed);
        metrics::record_outcome("skipped", self.skipped);
        metrics::record_outcome("worker_lost", self.lost.len());
        metrics::record_outcome("failed", self.failed.len());
        metrics::record_outcome("timed_out", self.timed_out.len());
    }
}

/// Schedules extraction work and funnels results into a sink.
#[derive(Debug, Clone)]
pub struct Runner {
    jobs: usize,
    limits: Limits,
    batch_timeout: Option<Duration>,
}

impl Runner {
    /// Runner with `jobs` workers and per-item `limits`.
    #[must_use]
    pub const fn new(jobs: usize, limits: Limits) -> Self {
        Self { jobs: if jobs == 0 { 1 } else { jobs }, limits, batch_timeout: limits.time_limit() }
    }

    /// Runner configured from the `runner` section.
    #[must_use]
    pub const fn from_config(config: &RunnerConfig) -> Self {
        let runner = Self::new(
            config.jobs,
            Limits { time_secs: config.time_limit_secs, memory_mb: config.memory_limit_mb },
        );
        if config.batch_timeout_secs > 0 {
            runner.with_batch_timeout(Duration::from_secs(config.batch_timeout_secs))
        } else {
            runner
        }
    }

    /// Override how long a batch is waited for.
    #[must_use]
    pub const fn with_batch_timeout(mut self, timeout: Duration) -> Self {
        self.batch_timeout = Some(timeout);
        self
    }

    /// Configured job count.
    #[must_use]
    pub const fn jobs(&self) -> usize {
        self.jobs
    }

    /// Run `extractor` over `items`, skipping hashes in `done`.
    ///
    /// Returns an error only for a fatal extractor failure; lost, failed,
    /// unwritable and timed-out items are reported in the [`RunReport`].
    pub fn run(
        &self,
        items: Vec<Job>,
        done: &HashSet<String>,
        extractor: Arc<dyn Extractor>,
        sink: &mut dyn ResultSink,
    ) -> Result<RunReport> {
        let timer = OperationTimer::new(&format!("run {}", extractor.name()));
        let mut report = RunReport::default();

        let pending: VecDeque<Job> = items
            .into_iter()
            .filter(|job| {
                let skip = !job.hash.is_empty() && done.contains(&job.hash);
                if skip {
                    debug!(job = %job, "already processed");
                    report.skipped += 1;
                }
                !skip
            })
            .collect();
        info!(
            extractor = extractor.name(),
            pending = pending.len(),
            skipped = report.skipped,
            jobs = self.jobs,
            "starting run"
        );

        let result = if self.jobs == 1 {
            self.run_sequential(pending, extractor.as_ref(), sink, &mut report)
        } else {
            self.run_parallel(pending, &extractor, sink, &mut report)
        };

        report.record_metrics();
        timer.finish();
        result.map(|()| report)
    }

    fn run_sequential(
        &self,
        pending: VecDeque<Job>,
        extractor: &dyn Extractor,
        sink: &mut dyn ResultSink,
        report: &mut RunReport,
    ) -> Result<()> {
        for job in pending {
            let outcome = execute(extractor, job, &self.limits);
            handle(outcome, sink, report)?;
        }
        Ok(())
    }

    fn run_parallel(
        &self,
        mut pending: VecDeque<Job>,
        extractor: &Arc<dyn Extractor>,
        sink: &mut dyn ResultSink,
        report: &mut RunReport,
    ) -> Result<()> {
        let cpus = thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get);
        let workers = cpus.min(self.jobs);
        let batch_size = cpus.max(self.jobs);

        while !pending.is_empty() {
            let take = batch_size.min(pending.len());
            let batch: Vec<Job> = pending.drain(..take).collect();
            info!(items = batch.len(), workers, "starting worker pool");
            let unstarted = self.run_batch(batch, workers, extractor, sink, report)?;
            if !unstarted.is_empty() {
                warn!(items = unstarted.len(), "worker pool lost, restarting with remaining items");
                for job in unstarted.into_iter().rev() {
                    pending.push_front(job);
                }
            }
        }
        Ok(())
    }

    /// Run one batch; returns the items no worker got to start.
    fn run_batch(
        &self,
        batch: Vec<Job>,
        workers: usize,
        extractor: &Arc<dyn Extractor>,
        sink: &mut dyn ResultSink,
        report: &mut RunReport,
    ) -> Result<Vec<Job>> {
        let (job_tx, job_rx) = bounded::<(usize, Job)>(batch.len());
        let (result_tx, result_rx) = unbounded::<(usize, Outcome)>();
        let cancel = Arc::new(AtomicBool::new(false));

        for (index, job) in batch.iter().cloned().enumerate() {
            job_tx
                .send((index, job))
                .map_err(|e| BenchDbError::Other(format!("job queue closed: {e}")))?;
        }
        drop(job_tx);

        let mut handles = Vec::with_capacity(workers);
        for id in 0..workers {
            let ctx = WorkerContext {
                job_rx: job_rx.clone(),
                result_tx: result_tx.clone(),
                extractor: Arc::clone(extractor),
                limits: self.limits,
                cancel: Arc::clone(&cancel),
            };
            let handle = thread::Builder::new()
                .name(format!("benchdb-worker-{id}"))
                .spawn(move || worker_loop(&ctx))?;
            handles.push(handle);
        }
        drop(result_tx);
        drop(job_rx);

        let deadline = self.batch_timeout.map(|t| Instant::now() + t);
        let mut finished = vec![false; batch.len()];

        loop {
            let received = match deadline {
                Some(deadline) => result_rx.recv_deadline(deadline),
                None => result_rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
            };
            match received {
                Ok((index, outcome)) => {
                    finished[index] = true;
                    if let Err(err) = handle(outcome, sink, report) {
                        cancel.store(true, Ordering::SeqCst);
                        return Err(err);
                    }
                }
                Err(RecvTimeoutError::Timeout) => {
                    cancel.store(true, Ordering::SeqCst);
                    for (job, _) in batch.iter().zip(&finished).filter(|(_, done)| !**done) {
                        handle(Outcome::TimedOut(job.clone()), sink, report)?;
                    }
                    // abandoned workers exit after their current item
                    return Ok(Vec::new());
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        for handle in handles {
            if handle.join().is_err() {
                error!("worker thread terminated abnormally");
            }
        }

        Ok(batch.into_iter().zip(finished).filter(|(_, done)| !done).map(|(job, _)| job).collect())
    }
}

struct WorkerContext {
    job_rx: Receiver<(usize, Job)>,
    result_tx: Sender<(usize, Outcome)>,
    extractor: Arc<dyn Extractor>,
    limits: Limits,
    cancel: Arc<AtomicBool>,
}

fn worker_loop(ctx: &WorkerContext) {
    while let Ok((index, job)) = ctx.job_rx.recv() {
        if ctx.cancel.load(Ordering::SeqCst) {
            break;
        }
        let outcome = execute(ctx.extractor.as_ref(), job, &ctx.limits);
        let lost = matches!(outcome, Outcome::WorkerLost(_));
        if ctx.result_tx.send((index, outcome)).is_err() || lost {
            break;
        }
    }
}

/// Run one item, turning a panic into [`Outcome::WorkerLost`].
fn execute(extractor: &dyn Extractor, job: Job, limits: &Limits) -> Outcome {
    debug!(job = %job, extractor = extractor.name(), "dispatching");
    match panic::catch_unwind(AssertUnwindSafe(|| extractor.extract(&job, limits))) {
        Ok(Ok(record)) => Outcome::Completed(job, record),
        Ok(Err(ExtractError::Failed(reason))) => Outcome::Failed(job, reason),
        Ok(Err(ExtractError::Fatal(reason))) => Outcome::Fatal(reason),
        Err(_) => Outcome::WorkerLost(job),
    }
}

fn handle(outcome: Outcome, sink: &mut dyn ResultSink, report: &mut RunReport) -> Result<()> {
    match outcome {
        Outcome::Completed(job, record) => match sink.write(&record) {
            Ok(()) => report.completed += 1,
            Err(err) => {
                warn!(job = %job, error = %err, "writing result failed");
                report.failed.push((job, err.to_string()));
            }
        },
        Outcome::WorkerLost(job) => {
            error!(job = %job, "worker lost while processing item");
            report.lost.push(job);
        }
        Outcome::Failed(job, reason) => {
            warn!(job = %job, reason, "extraction failed");
            report.failed.push((job, reason));
        }
        Outcome::Fatal(reason) => {
            error!(reason, "aborting run");
            return Err(BenchDbError::Computation(reason));
        }
        Outcome::TimedOut(job) => {
            warn!(job = %job, "batch timeout, abandoning item");
            report.timed_out.push(job);
        }
    }
    Ok(())
}

/// Runs an external program per item and reads `key=value` lines from its stdout.
///
/// The program is invoked as `program [args] <path>`; every parsed pair becomes
/// a `REPLACE` attribute. Limits are exported as `BENCHDB_TIME_LIMIT` and
/// `BENCHDB_MEMORY_LIMIT`; the child is killed when the time limit passes.
/// On Linux a memory limit also caps the child's address space through
/// `ulimit -v`, so an allocation beyond it fails the item.
#[derive(Debug, Clone)]
pub struct CommandExtractor {
    name: String,
    program: PathBuf,
    args: Vec<String>,
    target: Option<String>,
}

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Applies the address-space limit, then replaces itself with the extractor.
#[cfg(target_os = "linux")]
const MEMORY_WRAPPER: &str = r#"ulimit -v "$BENCHDB_MEMORY_LIMIT_KB" && exec "$0" "$@""#;

impl CommandExtractor {
    /// Extractor running `program` with leading `args`.
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        let program = program.into();
        let name = program
            .file_name()
            .map_or_else(|| program.display().to_string(), |n| n.to_string_lossy().into_owned());
        Self { name, program, args, target: None }
    }

    /// Skip hashes that already hold a value for `feature`.
    #[must_use]
    pub fn with_target(mut self, feature: impl Into<String>) -> Self {
        self.target = Some(feature.into());
        self
    }

    fn parse_output(hash: &str, stdout: &str) -> ResultRecord {
        let attributes = stdout
            .lines()
            .filter_map(|line| line.split_once('='))
            .map(|(key, value)| (key.trim(), value.trim()))
            .filter(|(key, _)| !key.is_empty())
            .map(|(key, value)| Attribute::replace(key, value))
            .collect();
        ResultRecord { hash: hash.to_string(), attributes }
    }

    fn command(&self, job: &Job, limits: &Limits) -> Command {
        #[cfg(target_os = "linux")]
        let mut command = if limits.memory_mb > 0 {
            let mut shell = Command::new("/bin/sh");
            shell
                .arg("-c")
                .arg(MEMORY_WRAPPER)
                .arg(&self.program)
                .env("BENCHDB_MEMORY_LIMIT_KB", limits.memory_mb.saturating_mul(1024).to_string());
            shell
        } else {
            Command::new(&self.program)
        };
        #[cfg(not(target_os = "linux"))]
        let mut command = Command::new(&self.program);

        command
            .args(&self.args)
            .arg(&job.path)
            .env("BENCHDB_TIME_LIMIT", limits.time_secs.to_string())
            .env("BENCHDB_MEMORY_LIMIT", limits.memory_mb.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null());
        command
    }
}

impl Extractor for CommandExtractor {
    fn name(&self) -> &str {
        &self.name
    }

    fn target(&self) -> Option<&str> {
        self.target.as_deref()
    }

    fn extract(&self, job: &Job, limits: &Limits) -> std::result::Result<ResultRecord, ExtractError> {
        let mut child = self
            .command(job, limits)
            .spawn()
            .map_err(|e| ExtractError::Fatal(format!("cannot run {}: {e}", self.program.display())))?;

        let reader = child.stdout.take().map(|mut stdout| {
            thread::spawn(move || {
                let mut buf = String::new();
                stdout.read_to_string(&mut buf).map(|_| buf)
            })
        });

        let deadline = limits.time_limit().map(|t| Instant::now() + t);
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => {}
                Err(e) => return Err(ExtractError::Failed(format!("waiting for child: {e}"))),
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                let _ = child.kill();
                let _ = child.wait();
                return Err(ExtractError::Failed(format!(
                    "time limit of {}s exceeded",
                    limits.time_secs
                )));
            }
            thread::sleep(POLL_INTERVAL);
        };

        let stdout = match reader.map(thread::JoinHandle::join) {
            Some(Ok(Ok(out))) => out,
            Some(Ok(Err(e))) => return Err(ExtractError::Failed(format!("reading output: {e}"))),
            Some(Err(_)) => return Err(ExtractError::Failed("output reader panicked".to_string())),
            None => String::new(),
        };

        if !status.success() {
            return Err(ExtractError::Failed(format!("{} exited with {status}", self.name)));
        }
        Ok(Self::parse_output(&job.hash, &stdout))
    }
}
