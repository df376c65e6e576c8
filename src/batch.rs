// Batch Module - Orchestrator
// =======================================================
// Drives a list of files through the streaming engine on a pool of worker
// threads and folds everything they report into one event stream:
//
// - Path resolution: in place, into a directory, or into a staging area,
//   optionally mirroring the inputs' directory structure
// - Scheduling: one engine per task, workers pull from a shared queue
// - Aggregation: worker messages are drained on a fixed cadence and turned
//   into byte-weighted progress, per-file log lines and a final report
// - Control: pause, resume and stop through the shared control signal
// - Staging: optional scratch directory, relocated by a write-back phase
//   that owns the last 40% of the progress range

use crossbeam_channel::{unbounded, Receiver, Sender, TryRecvError};
use std::ffi::{OsStr, OsString};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::control::{ControlSignal, SharedControl};
use crate::crypto::Key;
use crate::dirname;
use crate::error::{CipherError, Result};
use crate::logging::{LogLevel, LogSink};
use crate::progress::{format_duration, ProgressTracker};
use crate::staging::{self, DiskSpace, SpaceProbe, StagingArea, WriteBackReport};
use crate::streaming::{ClaimedOutputs, Engine, Mode};

/// How often the coordinator drains worker messages.
pub const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Share of the progress range given to the cipher phase when staging.
const STAGED_CIPHER_SPAN: f64 = 60.0;

const MIN_STAGING_WORKERS: usize = 4;

/// Where outputs go when staging is not in play.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum OutputPolicy {
    /// Next to each source file.
    #[default]
    InPlace,
    /// Into this directory, created if missing.
    Directory(PathBuf),
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StructureOptions {
    /// Mirror the inputs' directories relative to their common ancestor.
    pub preserve: bool,
    /// Encode directory names on encryption.
    pub obfuscate_dirs: bool,
    /// Replace container file names with random tokens.
    pub obfuscate_names: bool,
}

/// Optional scratch location for outputs, relocated after the batch.
#[derive(Clone, Default)]
pub struct StagingOptions {
    pub root: Option<PathBuf>,
    probe: Option<Arc<dyn SpaceProbe>>,
}

impl StagingOptions {
    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
            probe: None,
        }
    }

    /// Replace the free-space query used by the preflight.
    pub fn with_probe(mut self, probe: Arc<dyn SpaceProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    fn probe(&self) -> &dyn SpaceProbe {
        match &self.probe {
            Some(probe) => probe.as_ref(),
            None => &DiskSpace,
        }
    }
}

impl fmt::Debug for StagingOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StagingOptions")
            .field("root", &self.root)
            .field("custom_probe", &self.probe.is_some())
            .finish()
    }
}

/// Everything a batch run needs.
#[derive(Clone)]
pub struct BatchJob {
    pub files: Vec<PathBuf>,
    pub password: String,
    pub mode: Mode,
    pub output: OutputPolicy,
    pub structure: StructureOptions,
    pub staging: StagingOptions,
    /// Fixed engine chunk size instead of the size-based policy.
    pub chunk_size: Option<usize>,
}

impl BatchJob {
    pub fn new(files: Vec<PathBuf>, password: impl Into<String>, mode: Mode) -> Self {
        Self {
            files,
            password: password.into(),
            mode,
            output: OutputPolicy::default(),
            structure: StructureOptions::default(),
            staging: StagingOptions::default(),
            chunk_size: None,
        }
    }
}

impl fmt::Debug for BatchJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchJob")
            .field("files", &self.files)
            .field("password", &"<redacted>")
            .field("mode", &self.mode)
            .field("output", &self.output)
            .field("structure", &self.structure)
            .field("staging", &self.staging)
            .field("chunk_size", &self.chunk_size)
            .finish()
    }
}

/// Something the caller should know about while a batch runs.
#[derive(Debug, Clone)]
pub enum BatchEvent {
    Progress { status: String, percent: u8 },
    Log { level: LogLevel, text: String },
    /// Always the last event of a run that got past validation.
    Finished(BatchReport),
}

/// Final partition of a batch.
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    /// `(source, output)` for every task whose content was processed.
    pub success: Vec<(PathBuf, PathBuf)>,
    /// `(source, reason)` for every failed or cancelled task.
    pub fail: Vec<(PathBuf, String)>,
    /// Tasks discarded by a stop before they started.
    pub skipped: usize,
    pub stopped: bool,
    pub write_back: Option<WriteBackReport>,
}

impl BatchReport {
    /// Remove the sources of successful tasks.
    ///
    /// Nothing is removed while a write-back left entries unresolved, since
    /// the only complete copy may still be sitting in the staging area.
    /// Returns how many sources were removed.
    pub fn delete_sources(&self, sink: &dyn LogSink) -> usize {
        if let Some(write_back) = self.write_back.as_ref().filter(|wb| !wb.is_complete()) {
            sink.log(
                &format!(
                    "Originals kept: {} staged entries were not written back from {}",
                    write_back.unresolved.len(),
                    write_back.staging_root.display()
                ),
                LogLevel::Warning,
            );
            return 0;
        }

        let mut removed = 0;
        for (source, output) in &self.success {
            if source == output {
                continue;
            }
            match fs::remove_file(source) {
                Ok(()) => removed += 1,
                Err(e) => sink.log(
                    &format!("Could not delete original {}: {e}", source.display()),
                    LogLevel::Warning,
                ),
            }
        }
        removed
    }
}

/// Starts batches on a background thread.
pub struct BatchRunner;

impl BatchRunner {
    /// Run `job` on a dedicated thread with a fresh control signal.
    ///
    /// Parameters:
    /// - job: Files, password and output options for the run
    /// - sink: Receives every log line the batch produces
    ///
    /// Returns a handle for pausing, stopping and collecting events. Fails
    /// only if the coordinator thread cannot be started.
    pub fn spawn(job: BatchJob, sink: Arc<dyn LogSink>) -> Result<BatchHandle> {
        let control = Arc::new(SharedControl::new());
        let (events_tx, events_rx) = unbounded();
        let thread = {
            let control = Arc::clone(&control);
            thread::Builder::new()
                .name("batch-coordinator".into())
                .spawn(move || run_batch(&job, control.as_ref(), sink.as_ref(), &events_tx))?
        };
        Ok(BatchHandle {
            control,
            events: events_rx,
            thread,
        })
    }
}

/// A running batch.
pub struct BatchHandle {
    control: Arc<SharedControl>,
    events: Receiver<BatchEvent>,
    thread: JoinHandle<Result<BatchReport>>,
}

impl BatchHandle {
    /// The event stream. It disconnects once the batch thread has exited.
    pub fn events(&self) -> &Receiver<BatchEvent> {
        &self.events
    }

    pub fn pause(&self) {
        self.control.pause();
    }

    pub fn resume(&self) {
        self.control.resume();
    }

    pub fn stop(&self) {
        self.control.stop();
    }

    pub fn is_paused(&self) -> bool {
        self.control.is_paused()
    }

    /// Block until the batch finishes.
    pub fn wait(self) -> Result<BatchReport> {
        self.thread.join().map_err(|_| {
            CipherError::Io(io::Error::new(io::ErrorKind::Other, "batch thread panicked"))
        })?
    }
}

/// Sink plus event channel; every log line goes to both.
struct Reporter<'a> {
    sink: &'a dyn LogSink,
    events: &'a Sender<BatchEvent>,
}

impl Reporter<'_> {
    fn log(&self, level: LogLevel, text: String) {
        self.sink.log(&text, level);
        // A caller that dropped its receiver just stops hearing about the run.
        let _ = self.events.send(BatchEvent::Log { level, text });
    }

    fn progress(&self, status: String, percent: u8) {
        let _ = self.events.send(BatchEvent::Progress { status, percent });
    }
}

/// One file scheduled for a worker.
struct Task {
    slot: usize,
    index: usize,
    source: PathBuf,
    out_dir: PathBuf,
    size: u64,
}

/// Worker to coordinator. `slot` is the task's position in the task list.
enum WorkerMsg {
    Progress { slot: usize, processed: u64 },
    Done { slot: usize, result: Result<PathBuf>, elapsed: Duration },
    Skipped { slot: usize },
}

enum Outcome {
    Success(PathBuf),
    Failed(String),
    Skipped,
}

/// Run a batch to completion on the calling thread.
///
/// Parameters:
/// - job: Files, password and output options for the run
/// - control: Stop flag and pause gate, consulted by every worker
/// - sink: Receives every log line (each one is also sent as an event)
/// - events: Progress, log and finish events, in order
///
/// Invalid jobs are rejected with `InvalidInput` before anything touches the
/// disk; in that case no `Finished` event is sent. Otherwise the returned
/// report is also delivered as the final `Finished` event.
pub fn run_batch(
    job: &BatchJob,
    control: &dyn ControlSignal,
    sink: &dyn LogSink,
    events: &Sender<BatchEvent>,
) -> Result<BatchReport> {
    let reporter = Reporter { sink, events };
    validate(job).map_err(|e| {
        reporter.log(LogLevel::Error, e.to_string());
        e
    })?;

    let started = Instant::now();
    let mode = job.mode;
    reporter.log(
        LogLevel::Info,
        format!("{} batch started: {} file(s)", mode.verb(), job.files.len()),
    );

    if let OutputPolicy::Directory(dir) = &job.output {
        fs::create_dir_all(dir)?;
    }

    // Validate sources up front; missing ones fail without reaching a worker.
    let mut outcomes: Vec<Option<Outcome>> = Vec::with_capacity(job.files.len());
    let mut sources = Vec::new();
    for (index, source) in job.files.iter().enumerate() {
        match inspect_source(source) {
            Ok((canonical, size)) => {
                outcomes.push(None);
                sources.push((index, canonical, size));
            }
            Err(e) => {
                reporter.log(
                    LogLevel::Error,
                    format!("[{} failed] {} | reason: {e}", mode.verb(), display_name(source)),
                );
                outcomes.push(Some(Outcome::Failed(e.to_string())));
            }
        }
    }

    let staging_area = prepare_staging(job, &sources, &reporter);
    let base = match (&staging_area, &job.output) {
        (Some(area), _) => Some(area.path().to_path_buf()),
        (None, OutputPolicy::Directory(dir)) => Some(dir.clone()),
        (None, OutputPolicy::InPlace) => None,
    };

    let parents: Vec<PathBuf> = sources
        .iter()
        .filter_map(|(_, canonical, _)| canonical.parent().map(Path::to_path_buf))
        .collect();
    let ancestor = if job.structure.preserve {
        common_ancestor(&parents)
    } else {
        None
    };

    let tasks: Vec<Task> = sources
        .into_iter()
        .enumerate()
        .map(|(slot, (index, canonical, size))| {
            let parent = canonical.parent().unwrap_or_else(|| Path::new("."));
            let out_dir = match (&base, &ancestor) {
                (Some(base), Some(ancestor)) => {
                    structured_dir(base, ancestor, parent, mode, job.structure.obfuscate_dirs)
                }
                (Some(base), None) => base.clone(),
                (None, _) => in_place_dir(&job.files[index]),
            };
            Task {
                slot,
                index,
                source: job.files[index].clone(),
                out_dir,
                size,
            }
        })
        .collect();

    if !tasks.is_empty() {
        let key = Key::derive(&job.password);
        let claims = ClaimedOutputs::new();
        let span_end = if staging_area.is_some() { STAGED_CIPHER_SPAN } else { 100.0 };
        let workers = worker_count(tasks.len(), staging_area.is_some());
        let settings = WorkerSettings {
            key: &key,
            claims: &claims,
            control,
            mode,
            obfuscate_names: job.structure.obfuscate_names,
            chunk_size: job.chunk_size,
        };
        run_tasks(&tasks, workers, span_end, &settings, &mut outcomes, &reporter);
    }

    let mut report = BatchReport::default();
    for (source, outcome) in job.files.iter().zip(outcomes) {
        match outcome {
            Some(Outcome::Success(output)) => report.success.push((source.clone(), output)),
            Some(Outcome::Failed(reason)) => report.fail.push((source.clone(), reason)),
            Some(Outcome::Skipped) => report.skipped += 1,
            None => report
                .fail
                .push((source.clone(), "worker terminated unexpectedly".to_string())),
        }
    }
    report.stopped = control.is_stop_requested();

    if let (Some(area), OutputPolicy::Directory(target)) = (staging_area, &job.output) {
        let write_back = write_back_phase(area, target, control, &reporter);
        for (_, output) in report.success.iter_mut() {
            if let Some(relocated) = write_back.final_path(output) {
                *output = relocated;
            }
        }
        report.write_back = Some(write_back);
    }

    let status = if report.stopped { "Stopped" } else { "Done" };
    reporter.progress(status.to_string(), 100);
    reporter.log(
        LogLevel::Info,
        format!(
            "{} batch finished in {}: {} succeeded, {} failed, {} skipped",
            mode.verb(),
            format_duration(started.elapsed()),
            report.success.len(),
            report.fail.len(),
            report.skipped
        ),
    );
    let _ = events.send(BatchEvent::Finished(report.clone()));
    Ok(report)
}

fn validate(job: &BatchJob) -> Result<()> {
    if job.password.is_empty() {
        return Err(CipherError::InvalidInput("password must not be empty".into()));
    }
    if job.files.is_empty() {
        return Err(CipherError::InvalidInput("no files selected".into()));
    }
    if job.structure.preserve && job.output == OutputPolicy::InPlace {
        return Err(CipherError::InvalidInput(
            "preserving structure requires an output directory".into(),
        ));
    }
    Ok(())
}

/// Canonical path and size of a source that is ready to process.
fn inspect_source(source: &Path) -> Result<(PathBuf, u64)> {
    let meta = match fs::metadata(source) {
        Ok(meta) => meta,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(CipherError::SourceNotFound(source.to_path_buf()))
        }
        Err(e) => return Err(e.into()),
    };
    if !meta.is_file() {
        return Err(CipherError::InvalidInput(format!("{} is not a regular file", source.display())));
    }
    Ok((fs::canonicalize(source)?, meta.len()))
}

/// Run the space preflight. Any problem disables staging with one warning.
fn prepare_staging(
    job: &BatchJob,
    sources: &[(usize, PathBuf, u64)],
    reporter: &Reporter<'_>,
) -> Option<StagingArea> {
    let scratch = job.staging.root.as_ref()?;
    if sources.is_empty() {
        return None;
    }
    let OutputPolicy::Directory(target) = &job.output else {
        reporter.log(
            LogLevel::Warning,
            "Staging disabled: it needs an output directory to write back to".into(),
        );
        return None;
    };

    let planned = sources.iter().map(|(_, _, size)| size).sum();
    match StagingArea::prepare(scratch, planned, job.staging.probe()) {
        Ok(area) => {
            reporter.log(LogLevel::Info, format!("Staging outputs in {}", area.path().display()));
            Some(area)
        }
        Err(e) => {
            reporter.log(
                LogLevel::Warning,
                format!("Staging disabled ({e}); writing directly to {}", target.display()),
            );
            None
        }
    }
}

/// Worker pool size: one per core, capped by the task count, at least four
/// when staging.
fn worker_count(tasks: usize, staging: bool) -> usize {
    let parallelism = thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    let count = parallelism.min(tasks).max(1);
    if staging {
        count.max(MIN_STAGING_WORKERS)
    } else {
        count
    }
}

struct WorkerSettings<'a> {
    key: &'a Key,
    claims: &'a ClaimedOutputs,
    control: &'a dyn ControlSignal,
    mode: Mode,
    obfuscate_names: bool,
    chunk_size: Option<usize>,
}

fn run_tasks(
    tasks: &[Task],
    workers: usize,
    span_end: f64,
    settings: &WorkerSettings<'_>,
    outcomes: &mut [Option<Outcome>],
    reporter: &Reporter<'_>,
) {
    let (job_tx, job_rx) = unbounded::<&Task>();
    let (msg_tx, msg_rx) = unbounded::<WorkerMsg>();
    for task in tasks {
        let _ = job_tx.send(task);
    }
    drop(job_tx);

    thread::scope(|scope| {
        let mut handles = Vec::with_capacity(workers);
        for id in 0..workers {
            let job_rx = job_rx.clone();
            let msg_tx = msg_tx.clone();
            let spawned = thread::Builder::new()
                .name(format!("cipher-worker-{id}"))
                .spawn_scoped(scope, move || worker_loop(&job_rx, &msg_tx, settings));
            match spawned {
                Ok(handle) => handles.push(handle),
                Err(e) => reporter.log(LogLevel::Warning, format!("Could not start worker {id}: {e}")),
            }
        }
        drop(msg_tx);
        drop(job_rx);

        coordinate(tasks, span_end, settings.mode, &msg_rx, outcomes, reporter);

        // Tasks a panicking worker held are left without an outcome.
        for handle in handles {
            if handle.join().is_err() {
                reporter.log(LogLevel::Error, "A worker thread panicked".into());
            }
        }
    });
}

fn worker_loop(jobs: &Receiver<&Task>, messages: &Sender<WorkerMsg>, settings: &WorkerSettings<'_>) {
    while let Ok(task) = jobs.recv() {
        if !settings.control.is_stop_requested() {
            settings.control.wait_if_paused();
        }
        if settings.control.is_stop_requested() {
            let _ = messages.send(WorkerMsg::Skipped { slot: task.slot });
            continue;
        }

        let started = Instant::now();
        let result = run_task(task, settings, messages);
        let _ = messages.send(WorkerMsg::Done {
            slot: task.slot,
            result,
            elapsed: started.elapsed(),
        });
    }
}

fn run_task(task: &Task, settings: &WorkerSettings<'_>, messages: &Sender<WorkerMsg>) -> Result<PathBuf> {
    fs::create_dir_all(&task.out_dir)?;
    let mut engine = Engine::new(settings.key, settings.control).with_claims(settings.claims);
    if let Some(chunk_size) = settings.chunk_size {
        engine = engine.with_chunk_size(chunk_size);
    }
    engine.process(
        &task.source,
        &task.out_dir,
        settings.mode,
        settings.obfuscate_names,
        &mut |processed, _total| {
            let _ = messages.send(WorkerMsg::Progress {
                slot: task.slot,
                processed,
            });
        },
    )
}

/// Fold worker messages into progress events and outcomes until every worker
/// has exited.
fn coordinate(
    tasks: &[Task],
    span_end: f64,
    mode: Mode,
    messages: &Receiver<WorkerMsg>,
    outcomes: &mut [Option<Outcome>],
    reporter: &Reporter<'_>,
) {
    let mut tracker = ProgressTracker::with_span(tasks.iter().map(|t| t.size).collect(), 0.0, span_end);
    let mut current = 0;
    let mut last_emitted: Option<(usize, u8, u8)> = None;

    loop {
        thread::sleep(POLL_INTERVAL);

        let mut disconnected = false;
        loop {
            match messages.try_recv() {
                Ok(WorkerMsg::Progress { slot, processed }) => {
                    tracker.update(slot, processed);
                    current = slot;
                }
                Ok(WorkerMsg::Done { slot, result, elapsed }) => {
                    let task = &tasks[slot];
                    tracker.complete(slot);
                    current = slot;
                    outcomes[task.index] = Some(record_result(task, result, elapsed, mode, reporter));
                }
                Ok(WorkerMsg::Skipped { slot }) => {
                    tracker.complete(slot);
                    outcomes[tasks[slot].index] = Some(Outcome::Skipped);
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    disconnected = true;
                    break;
                }
            }
        }

        let state = (current, tracker.percent(), tracker.task_percent(current));
        if last_emitted != Some(state) {
            last_emitted = Some(state);
            reporter.progress(
                format!(
                    "{} [{}/{}]: {} ({}%)",
                    mode.progressive(),
                    tracker.finished_tasks(),
                    tracker.total_tasks(),
                    display_name(&tasks[current].source),
                    state.2
                ),
                state.1,
            );
        }

        if disconnected {
            break;
        }
    }
}

fn record_result(
    task: &Task,
    result: Result<PathBuf>,
    elapsed: Duration,
    mode: Mode,
    reporter: &Reporter<'_>,
) -> Outcome {
    let name = display_name(&task.source);
    match result {
        Ok(output) => {
            reporter.log(
                LogLevel::Info,
                format!(
                    "[{} ok] {} -> {} ({} ms)",
                    mode.verb(),
                    name,
                    display_name(&output),
                    elapsed.as_millis()
                ),
            );
            Outcome::Success(output)
        }
        Err(e) => {
            let level = match &e {
                CipherError::UserStopped => LogLevel::Warning,
                _ => LogLevel::Error,
            };
            reporter.log(level, format!("[{} failed] {} | reason: {e}", mode.verb(), name));
            Outcome::Failed(e.to_string())
        }
    }
}

/// Relocate the staged tree, reporting progress over the last 40%.
fn write_back_phase(
    area: StagingArea,
    target: &Path,
    control: &dyn ControlSignal,
    reporter: &Reporter<'_>,
) -> WriteBackReport {
    reporter.log(
        LogLevel::Info,
        format!("Writing back {} to {}", area.path().display(), target.display()),
    );

    let mut last_percent = None;
    let report = staging::write_back(area, target, control, &mut |moved, total| {
        let fraction = if total == 0 { 1.0 } else { moved as f64 / total as f64 };
        let percent = (STAGED_CIPHER_SPAN + (100.0 - STAGED_CIPHER_SPAN) * fraction)
            .floor()
            .min(99.0) as u8;
        if last_percent != Some(percent) {
            last_percent = Some(percent);
            reporter.progress(format!("Writing back ({percent}%)"), percent);
        }
    });

    for (entry, reason) in &report.unresolved {
        reporter.log(
            LogLevel::Error,
            format!("Write-back failed for {}: {reason}", entry.display()),
        );
    }
    if report.retained {
        reporter.log(
            LogLevel::Warning,
            format!("Staged output left in {}", report.staging_root.display()),
        );
    }
    report
}

/// Deepest directory containing every path in `dirs`.
fn common_ancestor(dirs: &[PathBuf]) -> Option<PathBuf> {
    let mut iter = dirs.iter();
    let mut common = iter.next()?.clone();
    for dir in iter {
        while !dir.starts_with(&common) {
            if !common.pop() {
                return None;
            }
        }
    }
    Some(common)
}

/// Output directory for a file whose directory is `parent`, mirroring its
/// position below `ancestor` under `base`.
///
/// The ancestor's own name becomes the first segment and is never encoded.
/// On decryption every segment goes through the directory codec.
fn structured_dir(base: &Path, ancestor: &Path, parent: &Path, mode: Mode, obfuscate_dirs: bool) -> PathBuf {
    let mut out = base.to_path_buf();
    if let Some(root) = ancestor.file_name() {
        out.push(map_segment(root, mode, false));
    }
    if let Ok(relative) = parent.strip_prefix(ancestor) {
        for component in relative.components() {
            if let Component::Normal(segment) = component {
                out.push(map_segment(segment, mode, obfuscate_dirs));
            }
        }
    }
    out
}

/// Directory of a source as the caller named it.
fn in_place_dir(source: &Path) -> PathBuf {
    match source.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

fn map_segment(segment: &OsStr, mode: Mode, obfuscate: bool) -> OsString {
    let Some(text) = segment.to_str() else {
        return segment.to_os_string();
    };
    match mode {
        Mode::Encrypt if obfuscate => OsString::from(dirname::encode(text)),
        Mode::Encrypt => segment.to_os_string(),
        Mode::Decrypt => {
            let decoded = dirname::decode(text);
            // A decoded segment must stay a single plain path component.
            let mut components = Path::new(&decoded).components();
            match (components.next(), components.next()) {
                (Some(Component::Normal(_)), None) => OsString::from(decoded),
                _ => segment.to_os_string(),
            }
        }
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .unwrap_or(path.as_os_str())
        .to_string_lossy()
        .into_owned()
}
