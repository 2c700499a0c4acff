use crate::{library::ModRecord, task::CancellationToken};
use regex::Regex;
use std::{
    collections::VecDeque,
    env,
    io::{self, BufRead, BufReader, Read},
    path::{Path, PathBuf},
    process::{Child, Command, ExitStatus, Stdio},
    sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError},
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};
use thiserror::Error;
use tracing::{debug, info, warn};

const LINE_BUFFER_CAPACITY: usize = 1000;
const QUIT_PROMPT: &str = "-- type 'quit' to exit --";
const REASON_NO_APP_ID: &str = "No App ID found";
const REASON_DOWNLOAD_FAILED: &str = "Download failed";
const REASON_NOT_FOUND: &str = "SteamCMD not found";
const MAX_LINE_BYTES: u64 = 64 * 1024;

/// Receives progress from a running batch. Called on the monitor's thread.
pub trait DownloadObserver {
    fn progress(&self, completed: usize, total: usize);
    fn log(&self, line: &str);
    fn status(&self, message: &str);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedMod {
    pub id: String,
    pub title: String,
    pub reason: String,
}

impl FailedMod {
    fn new(record: &ModRecord, reason: impl Into<String>) -> Self {
        Self {
            id: record.id.clone(),
            title: title_of(record).to_string(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchResult {
    pub total: usize,
    pub successful: usize,
    pub failed: Vec<FailedMod>,
}

impl BatchResult {
    pub fn failed_ids(&self) -> Vec<String> {
        self.failed.iter().map(|failed| failed.id.clone()).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Start,
    Success,
    Failure,
    Timeout,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessEvent {
    pub kind: EventKind,
    pub mod_id: Option<String>,
    pub raw_line: String,
}

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("SteamCMD not found at {0}")]
    NotFound(PathBuf),
    #[error("Could not start SteamCMD: {0}")]
    Spawn(#[source] io::Error),
}

impl MonitorError {
    fn reason(&self) -> String {
        match self {
            MonitorError::NotFound(_) => REASON_NOT_FOUND.to_string(),
            MonitorError::Spawn(_) => self.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorTimings {
    pub poll_interval: Duration,
    pub startup_grace: Duration,
    pub idle_timeout: Duration,
    pub terminate_wait: Duration,
    pub exit_wait: Duration,
    pub kill_wait: Duration,
    pub reader_join: Duration,
}

impl Default for MonitorTimings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(20),
            startup_grace: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(300),
            terminate_wait: Duration::from_secs(10),
            exit_wait: Duration::from_secs(30),
            kill_wait: Duration::from_secs(10),
            reader_join: Duration::from_secs(5),
        }
    }
}

pub fn progress_percent(completed: usize, total: usize) -> u16 {
    if total == 0 {
        return 0;
    }
    ((completed.min(total) * 100) / total) as u16
}

fn title_of(record: &ModRecord) -> &str {
    if record.info.title.is_empty() {
        &record.id
    } else {
        &record.info.title
    }
}

/// Bounded ring of captured output lines with a running sequence number so a
/// consumer can resume where it left off.
#[derive(Debug)]
pub struct LineBuffer {
    lines: VecDeque<String>,
    capacity: usize,
    pushed: u64,
}

impl LineBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: VecDeque::with_capacity(capacity.min(64)),
            capacity: capacity.max(1),
            pushed: 0,
        }
    }

    pub fn push(&mut self, line: String) {
        if self.lines.len() == self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
        self.pushed += 1;
    }

    /// Lines after `cursor` that are still buffered, plus the next cursor.
    pub fn read_since(&self, cursor: u64) -> (Vec<String>, u64) {
        let oldest = self.pushed - self.lines.len() as u64;
        let skip = cursor.max(oldest) - oldest;
        let lines = self.lines.iter().skip(skip as usize).cloned().collect();
        (lines, self.pushed)
    }
}

struct Patterns {
    start: Regex,
    success: Regex,
    error: Regex,
    percent: Regex,
    item: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        start: Regex::new(r"(?i)downloading item (\d+)").expect("start pattern"),
        success: Regex::new(r"(?i)success\.").expect("success pattern"),
        error: Regex::new(r"(?i)error|failed|timeout").expect("error pattern"),
        percent: Regex::new(r"(\d+)%").expect("percent pattern"),
        item: Regex::new(r"(?i)\bitem (\d+)").expect("item pattern"),
    })
}

/// Interprets steamcmd output one line at a time and keeps the batch tally.
pub struct BatchTracker {
    mods: Vec<ModRecord>,
    finished: Vec<bool>,
    current: Option<usize>,
    completed: usize,
    successful: usize,
    anonymous: usize,
    failed: Vec<FailedMod>,
}

impl BatchTracker {
    pub fn new(mods: Vec<ModRecord>) -> Self {
        let finished = vec![false; mods.len()];
        Self {
            mods,
            finished,
            current: None,
            completed: 0,
            successful: 0,
            anonymous: 0,
            failed: Vec::new(),
        }
    }

    pub fn total(&self) -> usize {
        self.mods.len()
    }

    pub fn completed(&self) -> usize {
        self.completed
    }

    fn pending_index(&self, id: &str) -> Option<usize> {
        self.mods
            .iter()
            .position(|record| record.id == id)
            .filter(|index| !self.finished[*index])
    }

    pub fn feed_line(&mut self, line: &str, observer: &dyn DownloadObserver) -> Option<ProcessEvent> {
        if !line.to_lowercase().contains(QUIT_PROMPT) {
            observer.log(line);
        }
        let patterns = patterns();
        let mut event = None;

        if let Some(caps) = patterns.start.captures(line) {
            if let Some(index) = self.pending_index(&caps[1]) {
                self.current = Some(index);
                let record = &self.mods[index];
                observer.status(&format!("Downloading: {}", title_of(record)));
                observer.log(&format!(
                    "--- Starting download: {} ({}) ---",
                    title_of(record),
                    record.id
                ));
                event = Some(ProcessEvent {
                    kind: EventKind::Start,
                    mod_id: Some(record.id.clone()),
                    raw_line: line.to_string(),
                });
            }
        }

        let is_success = patterns.success.is_match(line);
        let is_error = !is_success && patterns.error.is_match(line);
        if !is_success && !is_error {
            if let (Some(index), Some(caps)) = (self.current, patterns.percent.captures(line)) {
                observer.status(&format!(
                    "Downloading: {} ({}%)",
                    title_of(&self.mods[index]),
                    &caps[1]
                ));
            }
            return event;
        }

        let named = patterns
            .item
            .captures_iter(line)
            .find_map(|caps| self.pending_index(&caps[1]));
        let target = named.or(self.current);

        let Some(index) = target else {
            // Output we cannot attribute to a mod. Only success lines fill a
            // slot, and never beyond the batch size.
            if is_success && self.completed < self.total() {
                self.completed += 1;
                self.successful += 1;
                self.anonymous += 1;
                observer.progress(self.completed, self.total());
                return Some(ProcessEvent {
                    kind: EventKind::Success,
                    mod_id: None,
                    raw_line: line.to_string(),
                });
            }
            return event;
        };

        if self.completed >= self.total() && self.anonymous > 0 {
            self.anonymous -= 1;
            self.completed -= 1;
            self.successful -= 1;
        }
        self.finished[index] = true;
        self.completed += 1;
        if self.current == Some(index) {
            self.current = None;
        }
        let record = &self.mods[index];
        let title = title_of(record).to_string();
        let kind = if is_success {
            self.successful += 1;
            observer.status(&format!("Downloaded: {title}"));
            observer.log(&format!("--- Successfully downloaded {title} ---"));
            EventKind::Success
        } else {
            self.failed.push(FailedMod::new(record, REASON_DOWNLOAD_FAILED));
            observer.status(&format!("Failed to download: {title}"));
            observer.log(&format!("--- Failed to download {title} ---"));
            EventKind::Failure
        };
        observer.progress(self.completed, self.total());
        Some(ProcessEvent {
            kind,
            mod_id: Some(record.id.clone()),
            raw_line: line.to_string(),
        })
    }

    /// Closes the tally. Mods the output never resolved count as successful.
    pub fn finish(mut self, observer: &dyn DownloadObserver) -> (usize, Vec<FailedMod>) {
        let total = self.total();
        if self.completed < total {
            self.successful += total - self.completed;
            self.completed = total;
            observer.progress(total, total);
        }
        (self.successful, std::mem::take(&mut self.failed))
    }
}

/// Runs one steamcmd process per batch and watches its output.
pub struct SteamCmd {
    program: PathBuf,
    timings: MonitorTimings,
}

impl SteamCmd {
    pub fn new(program: impl Into<PathBuf>, timings: MonitorTimings) -> Self {
        Self {
            program: program.into(),
            timings,
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn is_available(&self) -> bool {
        resolve_executable(&self.program).is_some()
    }

    pub fn build_args(mods: &[ModRecord]) -> Vec<String> {
        let mut args = vec!["+login".to_string(), "anonymous".to_string()];
        for record in mods {
            if let Some(app_id) = record.info.app_id {
                args.push("+workshop_download_item".to_string());
                args.push(app_id.to_string());
                args.push(record.id.clone());
            }
        }
        args.push("+quit".to_string());
        args
    }

    pub fn run(
        &self,
        batch: &[ModRecord],
        observer: &dyn DownloadObserver,
        cancel: &CancellationToken,
    ) -> BatchResult {
        let mut failed = Vec::new();
        let mut valid = Vec::new();
        for record in batch {
            if record.info.app_id.is_some() {
                valid.push(record.clone());
            } else {
                observer.log(&format!(
                    "Skipping {} ({}): no App ID found",
                    title_of(record),
                    record.id
                ));
                failed.push(FailedMod::new(record, REASON_NO_APP_ID));
            }
        }

        let mut successful = 0;
        let mut clean_exit = true;
        if valid.is_empty() {
            observer.status("No downloadable mods in batch");
        } else {
            match self.execute(valid.clone(), observer, cancel) {
                Ok(outcome) => {
                    successful = outcome.successful;
                    clean_exit = outcome.clean_exit;
                    failed.extend(outcome.failed);
                }
                Err(err) => {
                    warn!(error = %err, "steamcmd did not run");
                    observer.log(&format!("--- {err} ---"));
                    let reason = err.reason();
                    failed.extend(valid.iter().map(|record| FailedMod::new(record, reason.clone())));
                }
            }
        }

        observer.status(if failed.is_empty() && clean_exit {
            "Batch download completed"
        } else {
            "Batch download completed with errors"
        });
        BatchResult {
            total: batch.len(),
            successful,
            failed,
        }
    }

    fn execute(
        &self,
        valid: Vec<ModRecord>,
        observer: &dyn DownloadObserver,
        cancel: &CancellationToken,
    ) -> Result<RunOutcome, MonitorError> {
        let program = resolve_executable(&self.program)
            .ok_or_else(|| MonitorError::NotFound(self.program.clone()))?;
        let args = Self::build_args(&valid);
        info!(program = %program.display(), mods = valid.len(), "starting steamcmd");
        observer.log(&format!("Running: {} {}", program.display(), args.join(" ")));

        let mut command = Command::new(&program);
        command
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            command.creation_flags(0x08000000);
        }
        let mut child = command.spawn().map_err(|err| match err.kind() {
            io::ErrorKind::NotFound => MonitorError::NotFound(program.clone()),
            _ => MonitorError::Spawn(err),
        })?;

        let buffer = Arc::new(Mutex::new(LineBuffer::new(LINE_BUFFER_CAPACITY)));
        let readers: Vec<JoinHandle<()>> = [
            child.stdout.take().map(|out| spawn_reader(out, Arc::clone(&buffer))),
            child.stderr.take().map(|err| spawn_reader(err, Arc::clone(&buffer))),
        ]
        .into_iter()
        .flatten()
        .collect();

        let mut tracker = BatchTracker::new(valid);
        observer.progress(0, tracker.total());

        let started = Instant::now();
        let mut last_activity = started;
        let mut cursor = 0;
        let mut exit_status: Option<ExitStatus> = None;
        loop {
            if cancel.is_cancelled() {
                // The app only waits briefly for workers once cancelled.
                observer.log("--- Download cancelled ---");
                if let Err(err) = child.kill() {
                    debug!(error = %err, "kill on cancel failed");
                }
                break;
            }
            let (lines, next) = lock(&buffer).read_since(cursor);
            cursor = next;
            if !lines.is_empty() {
                last_activity = Instant::now();
            }
            for line in &lines {
                tracker.feed_line(line, observer);
            }
            match child.try_wait() {
                Ok(Some(status)) => {
                    exit_status = Some(status);
                    break;
                }
                Ok(None) => {}
                Err(err) => {
                    warn!(error = %err, "could not poll steamcmd");
                    break;
                }
            }
            if started.elapsed() > self.timings.startup_grace
                && last_activity.elapsed() > self.timings.idle_timeout
            {
                let event = ProcessEvent {
                    kind: EventKind::Timeout,
                    mod_id: tracker.current.map(|index| tracker.mods[index].id.clone()),
                    raw_line: String::new(),
                };
                warn!(mod_id = ?event.mod_id, "steamcmd went quiet, terminating");
                observer.log(&format!(
                    "--- Timeout: No activity detected for {} seconds, terminating process ---",
                    self.timings.idle_timeout.as_secs()
                ));
                observer.status("Download timeout - terminating process");
                terminate(&mut child, self.timings.terminate_wait);
                break;
            }
            thread::sleep(self.timings.poll_interval);
        }

        if exit_status.is_none() {
            exit_status = wait_with_timeout(&mut child, self.timings.exit_wait);
        }
        if exit_status.is_none() {
            observer.log("--- SteamCMD did not exit, killing process ---");
            let _ = child.kill();
            exit_status = wait_with_timeout(&mut child, self.timings.kill_wait);
        }

        join_readers(readers, self.timings.reader_join);
        let (lines, _) = lock(&buffer).read_since(cursor);
        for line in &lines {
            tracker.feed_line(line, observer);
        }

        let code = exit_status.and_then(|status| status.code());
        match code {
            Some(0) => observer.log("--- Batch download completed successfully ---"),
            Some(code) => observer.log(&format!("--- SteamCMD exited with code {code} ---")),
            None => observer.log("--- SteamCMD was terminated ---"),
        }
        debug!(completed = tracker.completed(), total = tracker.total(), "steamcmd finished");
        let (successful, failed) = tracker.finish(observer);
        Ok(RunOutcome {
            successful,
            failed,
            clean_exit: code == Some(0),
        })
    }
}

struct RunOutcome {
    successful: usize,
    failed: Vec<FailedMod>,
    clean_exit: bool,
}

fn lock(buffer: &Mutex<LineBuffer>) -> MutexGuard<'_, LineBuffer> {
    buffer.lock().unwrap_or_else(PoisonError::into_inner)
}

fn spawn_reader<R: Read + Send + 'static>(
    stream: R,
    buffer: Arc<Mutex<LineBuffer>>,
) -> JoinHandle<()> {
    thread::spawn(move || {
        read_lines(BufReader::new(stream), MAX_LINE_BYTES, |line| {
            lock(&buffer).push(line);
        });
    })
}

/// Splits output into lines, breaking any line longer than `cap` bytes.
fn read_lines<B: BufRead>(mut reader: B, cap: u64, mut sink: impl FnMut(String)) {
    let mut raw = Vec::new();
    loop {
        raw.clear();
        match (&mut reader).take(cap).read_until(b'\n', &mut raw) {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&raw);
                sink(line.trim_end_matches(['\r', '\n']).to_string());
            }
            Err(err) => {
                warn!(error = %err, "error reading steamcmd output");
                break;
            }
        }
    }
}

fn join_readers(readers: Vec<JoinHandle<()>>, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    while readers.iter().any(|reader| !reader.is_finished()) && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(10));
    }
    for reader in readers {
        if reader.is_finished() {
            let _ = reader.join();
        } else {
            warn!("abandoning steamcmd output reader");
        }
    }
}

fn wait_with_timeout(child: &mut Child, timeout: Duration) -> Option<ExitStatus> {
    let deadline = Instant::now() + timeout;
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Some(status),
            Ok(None) if Instant::now() < deadline => thread::sleep(Duration::from_millis(25)),
            Ok(None) => return None,
            Err(err) => {
                warn!(error = %err, "could not wait for steamcmd");
                return None;
            }
        }
    }
}

/// Asks the process to stop, escalating to a kill after `grace`.
fn terminate(child: &mut Child, grace: Duration) {
    #[cfg(unix)]
    {
        if let Ok(pid) = libc::pid_t::try_from(child.id()) {
            // SAFETY: signalling a child we spawned and have not yet reaped.
            unsafe {
                libc::kill(pid, libc::SIGTERM);
            }
            if wait_with_timeout(child, grace).is_some() {
                return;
            }
        }
    }
    #[cfg(not(unix))]
    let _ = grace;
    if let Err(err) = child.kill() {
        debug!(error = %err, "kill after terminate failed");
    }
}

/// Finds the program on disk, searching PATH for bare names.
pub fn resolve_executable(program: &Path) -> Option<PathBuf> {
    if program.as_os_str().is_empty() {
        return None;
    }
    if program.components().count() > 1 || program.is_absolute() {
        return program.is_file().then(|| program.to_path_buf());
    }
    let path_var = env::var_os("PATH")?;
    for dir in env::split_paths(&path_var) {
        let candidate = dir.join(program);
        if candidate.is_file() {
            return Some(candidate);
        }
        if cfg!(windows) {
            let exe = candidate.with_extension("exe");
            if exe.is_file() {
                return Some(exe);
            }
        }
    }
    None
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::cell::RefCell;

    #[derive(Default)]
    struct Recorder {
        progress: RefCell<Vec<(usize, usize)>>,
        logs: RefCell<Vec<String>>,
        statuses: RefCell<Vec<String>>,
    }

    impl DownloadObserver for Recorder {
        fn progress(&self, completed: usize, total: usize) {
            self.progress.borrow_mut().push((completed, total));
        }
        fn log(&self, line: &str) {
            self.logs.borrow_mut().push(line.to_string());
        }
        fn status(&self, message: &str) {
            self.statuses.borrow_mut().push(message.to_string());
        }
    }

    fn downloadable(id: &str, title: &str) -> ModRecord {
        let mut record = ModRecord::placeholder(id, false);
        record.info.title = title.to_string();
        record.info.app_id = Some(294100);
        record
    }

    fn feed(tracker: &mut BatchTracker, recorder: &Recorder, lines: &[&str]) -> Vec<ProcessEvent> {
        lines
            .iter()
            .filter_map(|line| tracker.feed_line(line, recorder))
            .collect()
    }

    #[test]
    fn bare_error_line_fails_the_current_mod() {
        let recorder = Recorder::default();
        let mut tracker = BatchTracker::new(vec![downloadable("123", "Alpha")]);
        let events = feed(&mut tracker, &recorder, &["downloading item 123", "Error"]);
        assert_eq!(events[1].kind, EventKind::Failure);
        assert_eq!(events[1].mod_id.as_deref(), Some("123"));
        let (successful, failed) = tracker.finish(&recorder);
        assert_eq!(successful, 0);
        assert_eq!(failed[0].id, "123");
    }

    #[test]
    fn overlong_lines_are_split() {
        let mut lines = Vec::new();
        let input = format!("{}\nshort\n", "x".repeat(10));
        read_lines(io::Cursor::new(input), 4, |line| lines.push(line));
        assert_eq!(lines, vec!["xxxx", "xxxx", "xx", "shor", "t"]);
    }

    #[test]
    fn bound_success_counts_once() {
        let recorder = Recorder::default();
        let mut tracker = BatchTracker::new(vec![downloadable("123", "Alpha")]);
        let events = feed(
            &mut tracker,
            &recorder,
            &["Downloading item 123 ...", "Success. Downloaded item 123 to \"/tmp\""],
        );
        assert_eq!(events[0].kind, EventKind::Start);
        assert_eq!(events[1].kind, EventKind::Success);
        let (successful, failed) = tracker.finish(&recorder);
        assert_eq!(successful, 1);
        assert!(failed.is_empty());
        assert!(recorder.statuses.borrow().contains(&"Downloaded: Alpha".to_string()));
    }

    #[test]
    fn bound_error_is_recorded_as_failure() {
        let recorder = Recorder::default();
        let mut tracker = BatchTracker::new(vec![downloadable("456", "Beta")]);
        feed(
            &mut tracker,
            &recorder,
            &["Downloading item 456 ...", "ERROR! Download item 456 failed (Failure)."],
        );
        let (successful, failed) = tracker.finish(&recorder);
        assert_eq!(successful, 0);
        assert_eq!(
            failed,
            vec![FailedMod {
                id: "456".to_string(),
                title: "Beta".to_string(),
                reason: "Download failed".to_string(),
            }]
        );
    }

    #[test]
    fn outcome_naming_another_item_binds_to_it() {
        let recorder = Recorder::default();
        let mut tracker =
            BatchTracker::new(vec![downloadable("1", "One"), downloadable("2", "Two")]);
        feed(
            &mut tracker,
            &recorder,
            &["Downloading item 1 ...", "ERROR! Download item 2 failed (Timeout)."],
        );
        assert_eq!(tracker.completed(), 1);
        assert_eq!(tracker.current, Some(0));
        let (successful, failed) = tracker.finish(&recorder);
        assert_eq!(successful, 1);
        assert_eq!(failed[0].id, "2");
    }

    #[test]
    fn unbound_error_noise_is_not_a_completion() {
        let recorder = Recorder::default();
        let mut tracker = BatchTracker::new(vec![downloadable("9", "Nine")]);
        feed(
            &mut tracker,
            &recorder,
            &["Failed to init SDL priority manager: SDL not found"],
        );
        assert_eq!(tracker.completed(), 0);
    }

    #[test]
    fn anonymous_slots_never_exceed_batch_size() {
        let recorder = Recorder::default();
        let mut tracker = BatchTracker::new(vec![downloadable("7", "Seven")]);
        feed(
            &mut tracker,
            &recorder,
            &[
                "Success. something",
                "Success. something else",
                "Downloading item 7 ...",
                "ERROR! Download item 7 failed (Failure).",
            ],
        );
        assert_eq!(tracker.completed(), 1);
        let (successful, failed) = tracker.finish(&recorder);
        assert_eq!(successful + failed.len(), 1);
        assert_eq!(failed.len(), 1);
    }

    #[test]
    fn repeated_outcome_for_finished_item_is_ignored() {
        let recorder = Recorder::default();
        let mut tracker =
            BatchTracker::new(vec![downloadable("1", "One"), downloadable("2", "Two")]);
        feed(
            &mut tracker,
            &recorder,
            &[
                "Downloading item 1 ...",
                "Success. Downloaded item 1 to x",
                "Downloading item 1 ...",
            ],
        );
        assert_eq!(tracker.completed(), 1);
        assert_eq!(tracker.current, None);
    }

    #[test]
    fn quit_prompt_is_not_forwarded() {
        let recorder = Recorder::default();
        let mut tracker = BatchTracker::new(vec![downloadable("1", "One")]);
        feed(&mut tracker, &recorder, &["-- type 'quit' to exit --", "Loading Steam API...OK"]);
        assert_eq!(*recorder.logs.borrow(), vec!["Loading Steam API...OK".to_string()]);
    }

    #[test]
    fn line_buffer_drops_oldest_and_resumes() {
        let mut buffer = LineBuffer::new(2);
        buffer.push("a".to_string());
        let (lines, cursor) = buffer.read_since(0);
        assert_eq!(lines, vec!["a".to_string()]);
        buffer.push("b".to_string());
        buffer.push("c".to_string());
        buffer.push("d".to_string());
        let (lines, cursor) = buffer.read_since(cursor);
        assert_eq!(lines, vec!["c".to_string(), "d".to_string()]);
        assert_eq!(cursor, 4);
        assert!(buffer.read_since(cursor).0.is_empty());
    }

    #[test]
    fn args_list_every_item_with_its_app() {
        let args = SteamCmd::build_args(&[downloadable("5", "Five")]);
        assert_eq!(
            args,
            vec!["+login", "anonymous", "+workshop_download_item", "294100", "5", "+quit"]
        );
        assert_eq!(progress_percent(1, 3), 33);
        assert_eq!(progress_percent(0, 0), 0);
    }

    #[test]
    fn missing_program_fails_every_mod() {
        let recorder = Recorder::default();
        let mut no_app = ModRecord::placeholder("2", false);
        no_app.info.title = "No App".to_string();
        let steamcmd = SteamCmd::new("/definitely/not/here/steamcmd", MonitorTimings::default());
        assert!(!steamcmd.is_available());

        let result = steamcmd.run(
            &[downloadable("1", "One"), no_app],
            &recorder,
            &CancellationToken::new(),
        );
        assert_eq!(result.total, 2);
        assert_eq!(result.successful, 0);
        let reasons: Vec<&str> = result.failed.iter().map(|f| f.reason.as_str()).collect();
        assert_eq!(reasons, vec!["No App ID found", "SteamCMD not found"]);
        assert_eq!(
            recorder.statuses.borrow().last().map(String::as_str),
            Some("Batch download completed with errors")
        );
    }

    #[cfg(unix)]
    pub(crate) mod process {
        use super::*;
        use std::{fs, os::unix::fs::PermissionsExt};

        // Writing and exec'ing scripts concurrently can hit ETXTBSY.
        pub(crate) static SERIAL: Mutex<()> = Mutex::new(());

        pub(crate) fn fake_steamcmd(dir: &Path, body: &str) -> PathBuf {
            let path = dir.join("steamcmd.sh");
            fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
            fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
            path
        }

        pub(crate) fn quick_timings() -> MonitorTimings {
            MonitorTimings {
                poll_interval: Duration::from_millis(5),
                startup_grace: Duration::ZERO,
                idle_timeout: Duration::from_millis(300),
                terminate_wait: Duration::from_secs(2),
                exit_wait: Duration::from_secs(2),
                kill_wait: Duration::from_secs(2),
                reader_join: Duration::from_secs(2),
            }
        }

        #[test]
        fn script_output_drives_the_tally() {
            let _guard = SERIAL.lock().unwrap_or_else(PoisonError::into_inner);
            let dir = tempfile::tempdir().unwrap();
            let script = fake_steamcmd(
                dir.path(),
                "echo 'Downloading item 123 ...'\n\
                 echo 'Success. Downloaded item 123 to \"/tmp/123\"'\n\
                 echo 'Downloading item 456 ...' 1>&2\n\
                 echo 'ERROR! Download item 456 failed (Failure).' 1>&2",
            );
            let recorder = Recorder::default();
            let steamcmd = SteamCmd::new(script, quick_timings());
            let result = steamcmd.run(
                &[downloadable("123", "Alpha"), downloadable("456", "Beta")],
                &recorder,
                &CancellationToken::new(),
            );
            assert_eq!(result.successful, 1);
            assert_eq!(result.failed_ids(), vec!["456".to_string()]);
            assert_eq!(recorder.progress.borrow().last(), Some(&(2, 2)));
        }

        #[test]
        fn silent_process_is_terminated_after_idle_timeout() {
            let _guard = SERIAL.lock().unwrap_or_else(PoisonError::into_inner);
            let dir = tempfile::tempdir().unwrap();
            let script = fake_steamcmd(dir.path(), "exec sleep 30");
            let recorder = Recorder::default();
            let steamcmd = SteamCmd::new(script, quick_timings());
            let started = Instant::now();
            let result = steamcmd.run(
                &[downloadable("1", "One")],
                &recorder,
                &CancellationToken::new(),
            );
            assert!(started.elapsed() < Duration::from_secs(10));
            assert_eq!(result.successful + result.failed.len(), 1);
            assert!(recorder
                .statuses
                .borrow()
                .contains(&"Download timeout - terminating process".to_string()));
        }

        #[test]
        fn quiet_start_is_covered_by_the_grace_period() {
            let _guard = SERIAL.lock().unwrap_or_else(PoisonError::into_inner);
            let dir = tempfile::tempdir().unwrap();
            let script = fake_steamcmd(
                dir.path(),
                "sleep 0.5\n\
                 echo 'Downloading item 1 ...'\n\
                 echo 'Success. Downloaded item 1'",
            );
            let mut timings = quick_timings();
            timings.startup_grace = Duration::from_secs(3);
            timings.idle_timeout = Duration::from_millis(100);
            let recorder = Recorder::default();
            let result = SteamCmd::new(script, timings).run(
                &[downloadable("1", "One")],
                &recorder,
                &CancellationToken::new(),
            );
            assert_eq!(result.successful, 1);
            assert!(result.failed.is_empty());
            assert!(!recorder
                .statuses
                .borrow()
                .contains(&"Download timeout - terminating process".to_string()));
            assert_eq!(
                recorder.statuses.borrow().last().map(String::as_str),
                Some("Batch download completed")
            );
        }

        #[test]
        fn cancellation_kills_a_process_ignoring_sigterm() {
            let _guard = SERIAL.lock().unwrap_or_else(PoisonError::into_inner);
            let dir = tempfile::tempdir().unwrap();
            let script = fake_steamcmd(dir.path(), "trap '' TERM\necho ready\nexec sleep 30");
            let token = CancellationToken::new();
            let canceller = {
                let token = token.clone();
                thread::spawn(move || {
                    thread::sleep(Duration::from_millis(300));
                    token.cancel();
                })
            };
            let mut timings = quick_timings();
            timings.idle_timeout = Duration::from_secs(60);
            timings.terminate_wait = Duration::from_secs(10);
            let started = Instant::now();
            SteamCmd::new(script, timings).run(
                &[downloadable("1", "One")],
                &Recorder::default(),
                &token,
            );
            canceller.join().unwrap();
            assert!(started.elapsed() < Duration::from_secs(5));
        }

        #[test]
        fn cancellation_stops_the_process() {
            let _guard = SERIAL.lock().unwrap_or_else(PoisonError::into_inner);
            let dir = tempfile::tempdir().unwrap();
            let script = fake_steamcmd(dir.path(), "exec sleep 30");
            let token = CancellationToken::new();
            token.cancel();
            let recorder = Recorder::default();
            let mut timings = quick_timings();
            timings.idle_timeout = Duration::from_secs(60);
            let started = Instant::now();
            SteamCmd::new(script, timings).run(&[downloadable("1", "One")], &recorder, &token);
            assert!(started.elapsed() < Duration::from_secs(10));
            assert!(recorder
                .logs
                .borrow()
                .contains(&"--- Download cancelled ---".to_string()));
        }
    }
}
