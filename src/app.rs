use crate::{
    bbcode,
    config::{self, AppConfig},
    library::{self, ModRecord},
    metadata::MetadataResolver,
    repository::{build_hierarchy, parse_mod_input, AddOutcome, HierarchyEntry, ModRepository},
    steam::{MetadataProvider, SteamApi},
    steamcmd::{progress_percent, BatchResult, SteamCmd},
    task::{CancellationToken, WorkerSet},
    workers::{AppMessage, WorkerContext, WorkerTask},
};
use anyhow::{Context, Result};
use arboard::Clipboard;
use std::{
    collections::{BTreeSet, HashSet, VecDeque},
    fs,
    path::{Path, PathBuf},
    process::{Command, Stdio},
    sync::{
        mpsc::{self, Receiver, TryRecvError},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};
use time::{macros::format_description, OffsetDateTime};
use tracing::{error, info, warn};

const LOG_CAPACITY: usize = 500;
const DOWNLOAD_LINE_CAPACITY: usize = 1000;
const DRAIN_LIMIT_DOWNLOADING: usize = 50;
const DRAIN_LIMIT_IDLE: usize = 10;
const POLL_DOWNLOADING: Duration = Duration::from_millis(20);
const POLL_IDLE: Duration = Duration::from_millis(100);
const SHUTDOWN_JOIN_TIMEOUT: Duration = Duration::from_secs(2);
const TOAST_DURATION: Duration = Duration::from_secs(3);
const DESCRIPTION_DIR: &str = "descriptions";

const MSG_BUSY: &str = "Please wait for the current download to complete.";

#[derive(Debug, Clone, Default)]
pub struct StartupOptions {
    pub data_file: Option<PathBuf>,
    pub steamcmd: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadPhase {
    Idle,
    PreparingDependencies,
    AwaitingConfirmation,
    Downloading,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputPurpose {
    AddMod,
    FilterMods,
}

#[derive(Debug, Clone)]
pub enum InputMode {
    Normal,
    Editing {
        prompt: String,
        buffer: String,
        purpose: InputPurpose,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialogChoice {
    Yes,
    No,
    Cancel,
}

#[derive(Debug, Clone)]
pub struct DialogToggle {
    pub label: String,
    pub checked: bool,
}

#[derive(Debug, Clone)]
pub enum DialogKind {
    DeleteMods { ids: Vec<String> },
    ConfirmDependencies { ids: BTreeSet<String> },
    /// Yes downloads the visible mods, No downloads everything.
    DownloadScope { visible: BTreeSet<String> },
    ConfirmDownloadAll { ids: BTreeSet<String> },
    DownloadComplete,
    Notice,
}

#[derive(Debug, Clone)]
pub struct Dialog {
    pub title: String,
    pub message: String,
    pub yes_label: String,
    pub no_label: String,
    pub choice: DialogChoice,
    pub kind: DialogKind,
    pub toggle: Option<DialogToggle>,
    pub scroll: usize,
}

impl Dialog {
    fn question(title: &str, message: String, kind: DialogKind) -> Self {
        Self {
            title: title.to_string(),
            message,
            yes_label: "Yes".to_string(),
            no_label: "No".to_string(),
            choice: DialogChoice::Yes,
            kind,
            toggle: None,
            scroll: 0,
        }
    }

    fn notice(title: &str, message: String) -> Self {
        Self {
            yes_label: "OK".to_string(),
            no_label: String::new(),
            ..Self::question(title, message, DialogKind::Notice)
        }
    }

    /// Single-button dialogs: any confirmation just closes them.
    pub fn is_acknowledgement(&self) -> bool {
        matches!(self.kind, DialogKind::Notice | DialogKind::DownloadComplete)
    }
}

#[derive(Debug, Clone)]
pub struct LogEntry {
    pub level: LogLevel,
    pub stamp: String,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToastLevel {
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone)]
pub struct Toast {
    pub message: String,
    pub level: ToastLevel,
    pub expires_at: Instant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModFilter {
    pub text: String,
    pub show_main: bool,
    pub show_dependencies: bool,
}

impl Default for ModFilter {
    fn default() -> Self {
        Self {
            text: String::new(),
            show_main: true,
            show_dependencies: true,
        }
    }
}

impl ModFilter {
    pub fn is_active(&self) -> bool {
        !self.text.trim().is_empty() || !self.show_main || !self.show_dependencies
    }

    /// Case-insensitive match on title, id or url, after the kind toggles.
    pub fn matches(&self, record: &ModRecord) -> bool {
        if record.is_dependency && !self.show_dependencies {
            return false;
        }
        if !record.is_dependency && !self.show_main {
            return false;
        }
        let needle = self.text.trim().to_lowercase();
        if needle.is_empty() {
            return true;
        }
        record.info.title.to_lowercase().contains(&needle)
            || record.id.to_lowercase().contains(&needle)
            || record.url.to_lowercase().contains(&needle)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewRow {
    pub id: String,
    pub title: String,
    pub depth: usize,
    pub is_dependency: bool,
    pub pending: bool,
    pub has_error: bool,
}

impl From<HierarchyEntry> for ViewRow {
    fn from(entry: HierarchyEntry) -> Self {
        let record = entry.record;
        Self {
            title: record.display_title().to_string(),
            pending: record.info.is_placeholder(),
            has_error: record.info.error.is_some(),
            is_dependency: record.is_dependency,
            depth: entry.depth,
            id: record.id,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DownloadProgress {
    pub completed: usize,
    pub total: usize,
    pub lines: VecDeque<String>,
    pub started_at: Instant,
}

impl DownloadProgress {
    fn new(total: usize) -> Self {
        Self {
            completed: 0,
            total,
            lines: VecDeque::new(),
            started_at: Instant::now(),
        }
    }

    fn push_line(&mut self, line: String) {
        self.lines.push_back(line);
        while self.lines.len() > DOWNLOAD_LINE_CAPACITY {
            self.lines.pop_front();
        }
    }

    pub fn percent(&self) -> u16 {
        progress_percent(self.completed, self.total)
    }
}

/// Aggregate shown when more than one mod is selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectionSummary {
    pub count: usize,
    pub main: usize,
    pub dependencies: usize,
    pub total_size: u64,
    pub sized: usize,
}

impl SelectionSummary {
    pub fn of(records: &[ModRecord]) -> Self {
        let dependencies = records.iter().filter(|record| record.is_dependency).count();
        let sized: Vec<u64> = records
            .iter()
            .map(|record| record.info.file_size)
            .filter(|size| *size > 0)
            .collect();
        Self {
            count: records.len(),
            main: records.len() - dependencies,
            dependencies,
            total_size: sized.iter().sum(),
            sized: sized.len(),
        }
    }

    pub fn lines(&self) -> Vec<String> {
        let mut lines = vec![format!("Multiple mods selected: {} total", self.count)];
        if self.main > 0 && self.dependencies > 0 {
            lines.push(format!("Main mods: {}", self.main));
            lines.push(format!("Dependencies: {}", self.dependencies));
        } else if self.dependencies > 0 {
            lines.push("All dependencies".to_string());
        } else {
            lines.push("All main mods".to_string());
        }
        let size = if self.total_size > 0 {
            library::format_size(self.total_size)
        } else {
            "Unknown".to_string()
        };
        if self.sized < self.count {
            lines.push(format!(
                "Total size: {size} ({}/{} mods have size info)",
                self.sized, self.count
            ));
        } else {
            lines.push(format!("Total size: {size}"));
        }
        lines
    }
}

pub fn completion_summary(result: &BatchResult) -> (String, String) {
    if result.failed.is_empty() {
        return (
            "Download Complete".to_string(),
            format!("Successfully downloaded all {} mod(s)!", result.successful),
        );
    }
    (
        "Download Complete with Errors".to_string(),
        format!(
            "Downloaded {} mod(s) successfully.\n{} mod(s) failed to download.\n\nFailed Downloads:\n{}",
            result.successful,
            result.failed.len(),
            failure_details_text(result)
        ),
    )
}

pub fn failure_details_text(result: &BatchResult) -> String {
    result
        .failed
        .iter()
        .map(|failed| format!("{} - {} ({})", failed.id, failed.title, failed.reason))
        .collect::<Vec<String>>()
        .join("\n")
}

pub struct App {
    pub config: AppConfig,
    config_path: Option<PathBuf>,
    pub data_file: PathBuf,
    repository: Arc<ModRepository>,
    steamcmd: Arc<SteamCmd>,
    ctx: WorkerContext,
    rx: Receiver<AppMessage>,
    pub status: String,
    pub phase: DownloadPhase,
    pub filter: ModFilter,
    pub rows: Vec<ViewRow>,
    pub total_mods: usize,
    pub selected: BTreeSet<String>,
    pub cursor: usize,
    pub input_mode: InputMode,
    pub dialog: Option<Dialog>,
    pub logs: Vec<LogEntry>,
    pub log_scroll: usize,
    pub download: Option<DownloadProgress>,
    pub last_result: Option<BatchResult>,
    pub toast: Option<Toast>,
    clipboard: Option<Clipboard>,
    description_requested: HashSet<String>,
    pub should_quit: bool,
}

impl App {
    pub fn initialize(options: StartupOptions) -> Result<Self> {
        let config_path = config::config_file_path()?;
        let config = AppConfig::load_or_create_at(&config_path)?;
        let data_file = match options.data_file {
            Some(path) => path,
            None => config.data_file_path()?,
        };
        let repository = ModRepository::load(&data_file)
            .with_context(|| format!("load mod list {}", data_file.display()))?;
        let program = options
            .steamcmd
            .unwrap_or_else(|| config.steamcmd_path.clone());
        let steamcmd = SteamCmd::new(program, config.monitor_timings());
        let provider: Arc<dyn MetadataProvider> = Arc::new(SteamApi::new(
            config.api_url.clone(),
            config.request_timeout(),
        ));

        let mut app = Self::with_parts(
            config,
            Some(config_path),
            data_file,
            repository,
            provider,
            steamcmd,
        );
        app.log_info(format!(
            "Loaded {} mod(s) from {}",
            app.total_mods,
            app.data_file.display()
        ));
        app.resume_pending_fetches();
        Ok(app)
    }

    pub fn with_parts(
        config: AppConfig,
        config_path: Option<PathBuf>,
        data_file: PathBuf,
        repository: ModRepository,
        provider: Arc<dyn MetadataProvider>,
        steamcmd: SteamCmd,
    ) -> Self {
        let (tx, rx) = mpsc::channel();
        let repository = Arc::new(repository);
        let ctx = WorkerContext {
            repository: repository.clone(),
            resolver: Arc::new(MetadataResolver::new(provider)),
            tx,
            cancel: CancellationToken::new(),
            workers: WorkerSet::default(),
        };
        let mut app = Self {
            config,
            config_path,
            data_file,
            repository,
            steamcmd: Arc::new(steamcmd),
            ctx,
            rx,
            status: "Ready".to_string(),
            phase: DownloadPhase::Idle,
            filter: ModFilter::default(),
            rows: Vec::new(),
            total_mods: 0,
            selected: BTreeSet::new(),
            cursor: 0,
            input_mode: InputMode::Normal,
            dialog: None,
            logs: Vec::new(),
            log_scroll: 0,
            download: None,
            last_result: None,
            toast: None,
            clipboard: None,
            description_requested: HashSet::new(),
            should_quit: false,
        };
        app.refresh_view();
        app
    }

    /// Restarts lookups that were still in flight when the list was saved.
    fn resume_pending_fetches(&mut self) {
        let pending: Vec<String> = self
            .repository
            .all()
            .into_iter()
            .filter(|record| record.info.is_placeholder())
            .map(|record| record.id)
            .collect();
        if pending.is_empty() {
            return;
        }
        self.log_info(format!("Resuming info fetch for {} mod(s)", pending.len()));
        for id in pending {
            self.ctx.start_info_fetch(id);
        }
    }

    pub fn repository(&self) -> &ModRepository {
        &self.repository
    }

    pub fn steamcmd(&self) -> &SteamCmd {
        &self.steamcmd
    }

    pub fn is_busy(&self) -> bool {
        self.phase != DownloadPhase::Idle
    }

    pub fn workers_active(&self) -> usize {
        self.ctx.workers.active()
    }

    pub fn poll_interval(&self) -> Duration {
        if self.phase == DownloadPhase::Downloading {
            POLL_DOWNLOADING
        } else {
            POLL_IDLE
        }
    }

    /// Expires the toast and drains a bounded batch of worker messages.
    /// Returns how many messages were applied.
    pub fn tick(&mut self) -> usize {
        if let Some(toast) = &self.toast {
            if toast.expires_at <= Instant::now() {
                self.toast = None;
            }
        }

        let limit = if self.phase == DownloadPhase::Downloading {
            DRAIN_LIMIT_DOWNLOADING
        } else {
            DRAIN_LIMIT_IDLE
        };
        let mut processed = 0;
        while processed < limit {
            match self.rx.try_recv() {
                Ok(message) => {
                    processed += 1;
                    self.handle_message(message);
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => break,
            }
        }
        processed
    }

    /// Drives the loop until no worker runs and the queue is drained. A dialog
    /// waiting for an answer counts as idle.
    pub fn run_until_idle(&mut self, timeout: Option<Duration>) -> bool {
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        loop {
            let active = self.ctx.workers.active();
            let processed = self.tick();
            let in_flight = matches!(
                self.phase,
                DownloadPhase::PreparingDependencies | DownloadPhase::Downloading
            );
            if active == 0 && processed == 0 && !in_flight {
                return true;
            }
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                return false;
            }
            if processed == 0 {
                thread::sleep(self.poll_interval());
            }
        }
    }

    fn handle_message(&mut self, message: AppMessage) {
        match message {
            AppMessage::Status(text) => {
                self.status = text;
            }
            AppMessage::Log(line) => match &mut self.download {
                Some(download) => {
                    tracing::debug!(target: "steamcmd", "{line}");
                    download.push_line(line);
                }
                None => self.log_info(line),
            },
            AppMessage::Progress { completed, total } => {
                if let Some(download) = &mut self.download {
                    download.completed = completed;
                    download.total = total;
                }
            }
            AppMessage::InfoUpdated(id) => {
                self.save();
                self.refresh_view();
                if self.focused_ids().contains(&id) {
                    self.maybe_fetch_description();
                }
            }
            AppMessage::DescriptionUpdated(_) => {
                self.save();
            }
            AppMessage::DependenciesResolved {
                initial,
                resolved,
                added,
            } => self.handle_dependencies_resolved(&initial, resolved, &added),
            AppMessage::DownloadFinished(result) => self.finish_download(result),
            AppMessage::WorkerFailed { task, error } => self.handle_worker_failure(task, &error),
        }
    }

    fn handle_worker_failure(&mut self, task: WorkerTask, error: &str) {
        self.log_error(format!("{task} failed: {error}"));
        match task {
            WorkerTask::PrepareDownload => {
                self.phase = DownloadPhase::Idle;
                self.status = "Ready".to_string();
                self.show_notice(
                    "Dependency Resolution Error",
                    format!("Error resolving dependencies: {error}"),
                );
            }
            WorkerTask::Download => {
                self.phase = DownloadPhase::Idle;
                self.download = None;
                self.status = format!("Unexpected error during download: {error}");
                self.show_notice("Download Error", format!("Unexpected error during download: {error}"));
            }
            WorkerTask::FetchInfo | WorkerTask::FetchDescription => {
                self.status = format!("Error during {task}: {error}");
            }
        }
    }

    pub fn save(&mut self) {
        if let Err(err) = self.repository.save_to(&self.data_file) {
            self.status = format!("Save failed: {err}");
            self.log_error(format!("Save failed: {err:#}"));
        }
    }

    fn save_config(&mut self) {
        let Some(path) = self.config_path.clone() else {
            return;
        };
        if let Err(err) = self.config.save_at(&path) {
            self.log_warn(format!("Config save failed: {err:#}"));
        }
    }

    /// Rebuilds the visible rows from the repository, keeping the cursor on
    /// the same mod and dropping selections that are no longer visible.
    pub fn refresh_view(&mut self) {
        let cursor_id = self.rows.get(self.cursor).map(|row| row.id.clone());
        let all = self.repository.all();
        self.total_mods = all.len();
        let visible: Vec<ModRecord> = all
            .into_iter()
            .filter(|record| self.filter.matches(record))
            .collect();
        self.rows = build_hierarchy(&visible)
            .into_iter()
            .map(ViewRow::from)
            .collect();

        let visible_ids: HashSet<String> = self.rows.iter().map(|row| row.id.clone()).collect();
        self.selected.retain(|id| visible_ids.contains(id));
        self.cursor = cursor_id
            .and_then(|id| self.rows.iter().position(|row| row.id == id))
            .unwrap_or(self.cursor)
            .min(self.rows.len().saturating_sub(1));
    }

    pub fn filter_summary(&self) -> String {
        if self.rows.len() == self.total_mods {
            format!("Showing all {} mods", self.total_mods)
        } else {
            format!("Showing {} of {} mods", self.rows.len(), self.total_mods)
        }
    }

    pub fn set_filter_text(&mut self, text: &str) {
        self.filter.text = text.to_string();
        self.refresh_view();
    }

    pub fn toggle_show_main(&mut self) {
        self.filter.show_main = !self.filter.show_main;
        self.refresh_view();
    }

    pub fn toggle_show_dependencies(&mut self) {
        self.filter.show_dependencies = !self.filter.show_dependencies;
        self.refresh_view();
    }

    pub fn clear_filter(&mut self) {
        self.filter = ModFilter::default();
        self.refresh_view();
    }

    pub fn move_cursor(&mut self, delta: isize) {
        if self.rows.is_empty() {
            self.cursor = 0;
            return;
        }
        let last = self.rows.len() - 1;
        self.cursor = self.cursor.saturating_add_signed(delta).min(last);
        self.maybe_fetch_description();
    }

    pub fn cursor_id(&self) -> Option<&str> {
        self.rows.get(self.cursor).map(|row| row.id.as_str())
    }

    fn focus_id(&mut self, id: &str) {
        if let Some(index) = self.rows.iter().position(|row| row.id == id) {
            self.cursor = index;
        }
    }

    pub fn toggle_selected(&mut self) {
        let Some(id) = self.cursor_id().map(str::to_string) else {
            return;
        };
        if !self.selected.remove(&id) {
            self.selected.insert(id);
        }
        self.maybe_fetch_description();
    }

    pub fn select_all_visible(&mut self) {
        self.selected = self.rows.iter().map(|row| row.id.clone()).collect();
    }

    pub fn clear_selection(&mut self) {
        self.selected.clear();
        self.maybe_fetch_description();
    }

    /// The explicit selection in display order, or the cursor row when
    /// nothing is selected.
    pub fn focused_ids(&self) -> Vec<String> {
        if self.selected.is_empty() {
            return self.cursor_id().map(str::to_string).into_iter().collect();
        }
        self.rows
            .iter()
            .filter(|row| self.selected.contains(&row.id))
            .map(|row| row.id.clone())
            .collect()
    }

    pub fn focused_records(&self) -> Vec<ModRecord> {
        self.focused_ids()
            .iter()
            .filter_map(|id| self.repository.get(id))
            .collect()
    }

    /// Fetches the description of a lone focused mod once, when the full
    /// lookup left it empty.
    fn maybe_fetch_description(&mut self) {
        let focused = self.focused_records();
        let [record] = focused.as_slice() else {
            return;
        };
        if !record.info.description.trim().is_empty()
            || record.info.is_placeholder()
            || record.info.error.is_some()
        {
            return;
        }
        if !self.description_requested.insert(record.id.clone()) {
            return;
        }
        self.ctx.start_description_fetch(record.id.clone());
    }

    /// Adds a mod from a Workshop URL or bare id and starts its lookup.
    pub fn add_input(&mut self, input: &str) -> Option<String> {
        if self.is_busy() {
            self.status = MSG_BUSY.to_string();
            return None;
        }
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return None;
        }
        let Some(id) = parse_mod_input(trimmed) else {
            self.show_notice(
                "Invalid URL",
                "Please enter a valid Steam Workshop URL containing an ID (e.g., ...?id=12345)."
                    .to_string(),
            );
            return None;
        };

        match self.repository.add_by_id(&id, false) {
            AddOutcome::Unchanged => {
                self.status = format!("Mod {id} is already in the list");
                self.focus_id(&id);
                return None;
            }
            AddOutcome::Added => {
                self.status = format!("Added mod {id}, fetching info...");
                self.log_info(format!("Added mod {id}"));
            }
            AddOutcome::Promoted => {
                self.status = format!("Mod {id} is now a main mod, fetching info...");
                self.log_info(format!("Promoted dependency {id} to a main mod"));
            }
        }
        self.save();
        self.refresh_view();
        self.focus_id(&id);
        self.description_requested.remove(&id);
        self.ctx.start_info_fetch(id.clone());
        Some(id)
    }

    pub fn refresh_selected(&mut self) {
        if self.is_busy() {
            self.status = MSG_BUSY.to_string();
            return;
        }
        let ids = self.focused_ids();
        if ids.is_empty() {
            return;
        }
        for id in &ids {
            self.description_requested.remove(id);
            self.ctx.start_info_fetch(id.clone());
        }
        self.status = format!("Refreshing info for {} mod(s)...", ids.len());
    }

    pub fn delete_selected(&mut self) {
        if self.is_busy() {
            self.status = MSG_BUSY.to_string();
            return;
        }
        let ids = self.focused_ids();
        if ids.is_empty() {
            return;
        }
        self.delete_ids(ids, false);
    }

    /// Removes `ids`, asking first when remaining mods still depend on them.
    pub fn delete_ids(&mut self, ids: Vec<String>, force: bool) {
        let warnings = self.repository.dependency_warnings(&ids);
        if !warnings.is_empty() && !force {
            let lines: Vec<String> = warnings.iter().map(|warning| warning.message()).collect();
            let message = format!(
                "The following mods have dependencies:\n\n{}\n\nAre you sure you want to delete them?",
                lines.join("\n")
            );
            let mut dialog =
                Dialog::question("Dependency Warning", message, DialogKind::DeleteMods { ids });
            dialog.choice = DialogChoice::No;
            self.dialog = Some(dialog);
            return;
        }
        self.remove_mods(&ids);
    }

    fn remove_mods(&mut self, ids: &[String]) -> usize {
        let mut removed = 0;
        for id in ids {
            if self.repository.remove_by_id(id).is_some() {
                removed += 1;
                self.selected.remove(id);
                self.description_requested.remove(id);
            }
        }
        if removed == 0 {
            self.status = "No mod removed".to_string();
            return 0;
        }
        self.save();
        self.refresh_view();
        self.status = format!("Removed {removed} mod(s)");
        self.log_info(format!("Removed {removed} mod(s)"));
        removed
    }

    pub fn download_selected(&mut self) {
        let ids: BTreeSet<String> = self.focused_ids().into_iter().collect();
        self.download_ids(ids);
    }

    /// Resolves the dependency closure of `ids` on a worker; the result
    /// arrives as `DependenciesResolved`.
    pub fn download_ids(&mut self, ids: BTreeSet<String>) -> bool {
        if self.is_busy() {
            self.show_notice("Download in Progress", MSG_BUSY.to_string());
            return false;
        }
        if ids.is_empty() {
            self.show_notice(
                "No Selection",
                "Please select one or more mods to download.".to_string(),
            );
            return false;
        }
        if !self.check_steamcmd() {
            return false;
        }
        self.status = "Preparing download - resolving dependencies...".to_string();
        self.phase = DownloadPhase::PreparingDependencies;
        if !self.ctx.start_preparation(ids) {
            self.phase = DownloadPhase::Idle;
            return false;
        }
        true
    }

    fn check_steamcmd(&mut self) -> bool {
        if self.steamcmd.is_available() {
            return true;
        }
        let path = self.steamcmd.program().display().to_string();
        self.log_error(format!("SteamCMD not found at '{path}'"));
        self.show_notice(
            "SteamCMD Not Found",
            format!(
                "SteamCMD not found at '{path}'.\nPlease ensure SteamCMD is installed and the path is correct."
            ),
        );
        false
    }

    fn handle_dependencies_resolved(
        &mut self,
        initial: &BTreeSet<String>,
        resolved: BTreeSet<String>,
        added: &BTreeSet<String>,
    ) {
        if self.phase != DownloadPhase::PreparingDependencies {
            return;
        }
        self.log_info(format!(
            "Resolved {} mod(s) to download from {} selected",
            resolved.len(),
            initial.len()
        ));
        let titles: Vec<String> = added
            .iter()
            .filter_map(|id| self.repository.get(id))
            .map(|record| format!("- {}", record.display_title()))
            .collect();
        if titles.is_empty() {
            self.begin_batch(&resolved);
            return;
        }
        self.phase = DownloadPhase::AwaitingConfirmation;
        self.status = "Ready".to_string();
        let message = format!(
            "This download requires the following dependencies, which will also be selected:\n\n{}\n\nDo you want to continue?",
            titles.join("\n")
        );
        self.dialog = Some(Dialog::question(
            "Dependencies Found",
            message,
            DialogKind::ConfirmDependencies { ids: resolved },
        ));
    }

    /// Selects the final set and starts the batch in list order.
    fn begin_batch(&mut self, ids: &BTreeSet<String>) {
        let visible: HashSet<&str> = self.rows.iter().map(|row| row.id.as_str()).collect();
        self.selected = ids
            .iter()
            .filter(|id| visible.contains(id.as_str()))
            .cloned()
            .collect();
        let batch: Vec<ModRecord> = self
            .repository
            .all()
            .into_iter()
            .filter(|record| ids.contains(&record.id))
            .collect();
        if batch.is_empty() {
            self.phase = DownloadPhase::Idle;
            self.status = "Ready".to_string();
            return;
        }
        self.start_download(batch);
    }

    fn start_download(&mut self, batch: Vec<ModRecord>) {
        self.phase = DownloadPhase::Downloading;
        self.status = "Starting download...".to_string();
        self.log_info(format!("Starting download of {} mod(s)", batch.len()));
        self.download = Some(DownloadProgress::new(batch.len()));
        self.last_result = None;
        if !self.ctx.start_download(self.steamcmd.clone(), batch) {
            self.phase = DownloadPhase::Idle;
            self.download = None;
        }
    }

    /// Downloads every visible mod, asking whether to include hidden ones
    /// when a filter is active.
    pub fn download_all(&mut self) {
        if self.is_busy() {
            self.show_notice("Download in Progress", MSG_BUSY.to_string());
            return;
        }
        let visible: BTreeSet<String> = self.rows.iter().map(|row| row.id.clone()).collect();
        if visible.is_empty() {
            self.show_notice(
                "No Mods",
                "There are no mods to download (check your filters).".to_string(),
            );
            return;
        }
        if !self.check_steamcmd() {
            return;
        }

        let shown = visible.len();
        let total = self.total_mods;
        if shown < total {
            let message = format!(
                "Yes = Download {shown} filtered mods\nNo = Download all {total} mods\nCancel = Cancel download"
            );
            let mut dialog = Dialog::question(
                "Download All",
                message,
                DialogKind::DownloadScope { visible },
            );
            dialog.yes_label = format!("Filtered ({shown})");
            dialog.no_label = format!("All ({total})");
            self.dialog = Some(dialog);
        } else if self.config.confirm_download_all {
            let mut dialog = Dialog::question(
                "Confirm Download All",
                format!("Are you sure you want to download all {shown} mod(s)?"),
                DialogKind::ConfirmDownloadAll { ids: visible },
            );
            dialog.toggle = Some(DialogToggle {
                label: "Don't ask again".to_string(),
                checked: false,
            });
            self.dialog = Some(dialog);
        } else {
            self.begin_batch(&visible);
        }
    }

    fn finish_download(&mut self, result: BatchResult) {
        self.phase = DownloadPhase::Idle;
        self.download = None;
        let failed = result.failed.len();
        if failed == 0 {
            self.status = format!("Successfully downloaded all {} mod(s).", result.successful);
            self.log_info(self.status.clone());
        } else {
            self.status = format!("Downloaded {} mod(s). {failed} failed.", result.successful);
            self.log_warn(self.status.clone());
            for failure in &result.failed {
                self.log_warn(format!(
                    "Failed: {} - {} ({})",
                    failure.id, failure.title, failure.reason
                ));
            }
        }
        let (title, message) = completion_summary(&result);
        let mut dialog = Dialog::notice(&title, message);
        dialog.kind = DialogKind::DownloadComplete;
        dialog.yes_label = "Close".to_string();
        self.dialog = Some(dialog);
        self.last_result = Some(result);
    }

    pub fn copy_failed_ids(&mut self) {
        let Some(result) = &self.last_result else {
            return;
        };
        if result.failed.is_empty() {
            return;
        }
        let ids = result.failed_ids();
        if self.copy_to_clipboard(&ids.join("\n")) {
            self.set_toast(
                &format!("Copied {} failed mod IDs to clipboard.", ids.len()),
                ToastLevel::Info,
                TOAST_DURATION,
            );
        }
    }

    pub fn copy_failed_details(&mut self) {
        let Some(result) = &self.last_result else {
            return;
        };
        if result.failed.is_empty() {
            return;
        }
        let count = result.failed.len();
        let text = failure_details_text(result);
        if self.copy_to_clipboard(&text) {
            self.set_toast(
                &format!("Copied {count} failed mod details to clipboard."),
                ToastLevel::Info,
                TOAST_DURATION,
            );
        }
    }

    /// Renders the focused mod's description to an HTML page and opens it.
    pub fn open_description(&mut self) {
        let focused = self.focused_records();
        let [record] = focused.as_slice() else {
            self.status = "Select a single mod to view its description".to_string();
            return;
        };
        if record.info.description.trim().is_empty() {
            self.status = "No description available".to_string();
            return;
        }
        match self.write_description_page(record) {
            Ok(path) => {
                let label = format!("description of {}", record.display_title());
                self.open_external(&path.display().to_string(), &label);
            }
            Err(err) => {
                self.status = format!("Description export failed: {err}");
                self.log_error(format!("Description export failed: {err:#}"));
            }
        }
    }

    fn write_description_page(&self, record: &ModRecord) -> Result<PathBuf> {
        let dir = self
            .data_file
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(DESCRIPTION_DIR);
        fs::create_dir_all(&dir).context("create description dir")?;
        let path = dir.join(format!("{}.html", record.id));
        fs::write(&path, bbcode::render(&record.info.description))
            .context("write description page")?;
        Ok(path)
    }

    fn open_external(&mut self, target: &str, label: &str) {
        let mut errors = Vec::new();
        let candidates = [
            ("xdg-open", vec![target]),
            ("gio", vec!["open", target]),
            ("kde-open5", vec![target]),
            ("kioclient5", vec!["exec", target]),
            ("open", vec![target]),
        ];
        for (command, args) in candidates {
            match Command::new(command)
                .args(&args)
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
            {
                Ok(status) if status.success() => {
                    self.status = format!("Opened {label}");
                    return;
                }
                Ok(status) => {
                    errors.push(format!("{command} exited {status}"));
                }
                Err(err) => {
                    errors.push(format!("{command} failed: {err}"));
                }
            }
        }
        self.status = format!("Failed to open {label}");
        self.log_warn(format!("Failed to open {label}: {}", errors.join("; ")));
    }

    pub(crate) fn copy_to_clipboard(&mut self, text: &str) -> bool {
        let result = match self.clipboard_mut() {
            Some(clipboard) => clipboard.set_text(text.to_string()),
            None => return false,
        };
        if let Err(err) = result {
            self.status = format!("Clipboard copy failed: {err}");
            self.log_warn(format!("Clipboard copy failed: {err}"));
            return false;
        }
        true
    }

    fn clipboard_mut(&mut self) -> Option<&mut Clipboard> {
        if self.clipboard.is_none() {
            match Clipboard::new() {
                Ok(clipboard) => {
                    self.clipboard = Some(clipboard);
                }
                Err(err) => {
                    self.status = format!("Clipboard unavailable: {err}");
                    self.log_warn(format!("Clipboard unavailable: {err}"));
                    return None;
                }
            }
        }
        self.clipboard.as_mut()
    }

    pub fn set_toast(&mut self, message: &str, level: ToastLevel, duration: Duration) {
        self.toast = Some(Toast {
            message: message.to_string(),
            level,
            expires_at: Instant::now() + duration,
        });
    }

    fn show_notice(&mut self, title: &str, message: String) {
        self.dialog = Some(Dialog::notice(title, message));
    }

    fn dialog_supports_cancel(dialog: &Dialog) -> bool {
        matches!(dialog.kind, DialogKind::DownloadScope { .. })
    }

    pub fn dialog_choice_left(&mut self) {
        if let Some(dialog) = &mut self.dialog {
            if dialog.is_acknowledgement() {
                return;
            }
            if Self::dialog_supports_cancel(dialog) {
                dialog.choice = match dialog.choice {
                    DialogChoice::Cancel => DialogChoice::No,
                    DialogChoice::No => DialogChoice::Yes,
                    DialogChoice::Yes => DialogChoice::Yes,
                };
            } else {
                dialog.choice = DialogChoice::Yes;
            }
        }
    }

    pub fn dialog_choice_right(&mut self) {
        if let Some(dialog) = &mut self.dialog {
            if dialog.is_acknowledgement() {
                return;
            }
            if Self::dialog_supports_cancel(dialog) {
                dialog.choice = match dialog.choice {
                    DialogChoice::Yes => DialogChoice::No,
                    DialogChoice::No => DialogChoice::Cancel,
                    DialogChoice::Cancel => DialogChoice::Cancel,
                };
            } else {
                dialog.choice = DialogChoice::No;
            }
        }
    }

    pub fn dialog_set_choice(&mut self, choice: DialogChoice) {
        if let Some(dialog) = &mut self.dialog {
            dialog.choice = choice;
        }
    }

    pub fn dialog_scroll_by(&mut self, delta: isize) {
        if let Some(dialog) = &mut self.dialog {
            let max = dialog.message.lines().count().saturating_sub(1);
            dialog.scroll = dialog.scroll.saturating_add_signed(delta).min(max);
        }
    }

    pub fn dialog_toggle(&mut self) {
        if let Some(toggle) = self.dialog.as_mut().and_then(|dialog| dialog.toggle.as_mut()) {
            toggle.checked = !toggle.checked;
        }
    }

    /// Escape: cancel where the dialog offers it, otherwise answer no.
    pub fn dialog_dismiss(&mut self) {
        let choice = match &self.dialog {
            Some(dialog) if Self::dialog_supports_cancel(dialog) => DialogChoice::Cancel,
            Some(_) => DialogChoice::No,
            None => return,
        };
        self.dialog_set_choice(choice);
        self.dialog_confirm();
    }

    pub fn dialog_confirm(&mut self) {
        let Some(dialog) = self.dialog.take() else {
            return;
        };

        let choice = dialog.choice;
        match dialog.kind {
            DialogKind::DeleteMods { ids } => {
                if choice == DialogChoice::Yes {
                    self.remove_mods(&ids);
                }
            }
            DialogKind::ConfirmDependencies { ids } => {
                if choice == DialogChoice::Yes {
                    self.begin_batch(&ids);
                } else {
                    self.phase = DownloadPhase::Idle;
                    self.status = "Download cancelled".to_string();
                }
            }
            DialogKind::DownloadScope { visible } => match choice {
                DialogChoice::Yes => self.begin_batch(&visible),
                DialogChoice::No => {
                    let all: BTreeSet<String> = self
                        .repository
                        .all()
                        .into_iter()
                        .map(|record| record.id)
                        .collect();
                    self.begin_batch(&all);
                }
                DialogChoice::Cancel => {}
            },
            DialogKind::ConfirmDownloadAll { ids } => {
                if choice != DialogChoice::Yes {
                    return;
                }
                if dialog.toggle.is_some_and(|toggle| toggle.checked) {
                    self.config.confirm_download_all = false;
                    self.save_config();
                }
                self.begin_batch(&ids);
            }
            DialogKind::DownloadComplete | DialogKind::Notice => {}
        }
    }

    pub fn scroll_log_up(&mut self, lines: usize) {
        let max = self.logs.len().saturating_sub(1);
        self.log_scroll = self.log_scroll.saturating_add(lines).min(max);
    }

    pub fn scroll_log_down(&mut self, lines: usize) {
        self.log_scroll = self.log_scroll.saturating_sub(lines);
    }

    pub fn log_info(&mut self, message: String) {
        self.push_log(LogLevel::Info, message);
    }

    pub fn log_warn(&mut self, message: String) {
        self.push_log(LogLevel::Warn, message);
    }

    pub fn log_error(&mut self, message: String) {
        self.push_log(LogLevel::Error, message);
    }

    fn push_log(&mut self, level: LogLevel, message: String) {
        match level {
            LogLevel::Info => info!("{message}"),
            LogLevel::Warn => warn!("{message}"),
            LogLevel::Error => error!("{message}"),
        }

        if self.log_scroll > 0 {
            self.log_scroll = self.log_scroll.saturating_add(1);
        }

        self.logs.push(LogEntry {
            level,
            stamp: log_stamp(),
            message,
        });

        if self.logs.len() > LOG_CAPACITY {
            let overflow = self.logs.len() - LOG_CAPACITY;
            self.logs.drain(0..overflow);
            self.log_scroll = self.log_scroll.saturating_sub(overflow);
        }
    }

    /// Stops workers (a running steamcmd is killed on its next poll),
    /// waits a bounded time for them and saves the list.
    pub fn shutdown(&mut self) {
        self.ctx.cancel.cancel();
        let abandoned = self.ctx.workers.join_all(SHUTDOWN_JOIN_TIMEOUT);
        if abandoned > 0 {
            warn!(abandoned, "workers still running at shutdown");
        }
        self.save();
    }
}

fn log_stamp() -> String {
    let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
    now.format(format_description!("[hour]:[minute]:[second]"))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::tests::FakeProvider;
    use crate::steamcmd::{FailedMod, MonitorTimings};
    use tempfile::TempDir;

    const SETTLE: Option<Duration> = Some(Duration::from_secs(10));

    fn app_with(provider: FakeProvider, mods: Vec<ModRecord>, steamcmd: SteamCmd) -> (App, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let app = App::with_parts(
            AppConfig::default(),
            Some(dir.path().join("config.json")),
            dir.path().join("mods.json"),
            ModRepository::new(mods),
            Arc::new(provider),
            steamcmd,
        );
        (app, dir)
    }

    fn missing_steamcmd() -> SteamCmd {
        SteamCmd::new("/no/such/dir/steamcmd", MonitorTimings::default())
    }

    fn resolved(id: &str, title: &str, deps: &[&str], is_dependency: bool) -> ModRecord {
        let mut record = ModRecord::placeholder(id, is_dependency);
        record.info.title = title.to_string();
        record.info.app_id = Some(10);
        record.info.description = format!("About {title}");
        record.info.dependencies = deps.iter().map(|dep| dep.to_string()).collect();
        record
    }

    fn row_ids(app: &App) -> Vec<(&str, usize)> {
        app.rows.iter().map(|row| (row.id.as_str(), row.depth)).collect()
    }

    #[test]
    fn invalid_input_shows_notice_and_changes_nothing() {
        let (mut app, _dir) = app_with(FakeProvider::default(), Vec::new(), missing_steamcmd());
        assert_eq!(app.add_input("https://example.com/nothing"), None);
        assert_eq!(app.dialog.as_ref().unwrap().title, "Invalid URL");
        assert!(app.repository().is_empty());
        assert!(!app.data_file.exists());
    }

    #[test]
    fn adding_a_mod_resolves_its_dependency_tree() {
        let provider = FakeProvider::default()
            .with_mod("100", "Main", 4000, &["200"])
            .with_mod("200", "Lib", 4000, &[]);
        let (mut app, _dir) = app_with(provider, Vec::new(), missing_steamcmd());
        let added = app.add_input("https://steamcommunity.com/sharedfiles/filedetails/?id=100");
        assert_eq!(added.as_deref(), Some("100"));
        assert!(app.run_until_idle(SETTLE));

        assert_eq!(row_ids(&app), vec![("100", 0), ("200", 1)]);
        assert_eq!(app.rows[1].title, "Lib");
        assert!(app.rows[1].is_dependency);
        let saved = library::load_mods(&app.data_file).unwrap();
        assert_eq!(saved.len(), 2);
        assert_eq!(saved[0].info.app_id, Some(4000));
    }

    #[test]
    fn re_adding_a_dependency_promotes_it() {
        let provider = FakeProvider::default().with_mod("2", "Lib", 10, &[]);
        let (mut app, _dir) = app_with(
            provider,
            vec![resolved("1", "Main", &["2"], false), resolved("2", "Lib", &[], true)],
            missing_steamcmd(),
        );
        assert_eq!(app.add_input("2").as_deref(), Some("2"));
        assert!(!app.repository().get("2").unwrap().is_dependency);
        assert_eq!(app.add_input("2"), None);
        assert_eq!(app.status, "Mod 2 is already in the list");
        app.run_until_idle(SETTLE);
    }

    #[test]
    fn filter_narrows_rows_and_prunes_selection() {
        let (mut app, _dir) = app_with(
            FakeProvider::default(),
            vec![
                resolved("1", "Alpha Weapons", &["3"], false),
                resolved("2", "Beta Maps", &[], false),
                resolved("3", "Shared Core", &[], true),
            ],
            missing_steamcmd(),
        );
        assert_eq!(app.filter_summary(), "Showing all 3 mods");
        app.select_all_visible();

        app.set_filter_text("MAPS");
        assert_eq!(row_ids(&app), vec![("2", 0)]);
        assert_eq!(app.filter_summary(), "Showing 1 of 3 mods");
        assert_eq!(app.selected.iter().collect::<Vec<_>>(), vec!["2"]);

        app.clear_filter();
        app.toggle_show_main();
        assert_eq!(row_ids(&app), vec![("3", 0)]);
        app.toggle_show_main();
        app.toggle_show_dependencies();
        assert_eq!(row_ids(&app), vec![("1", 0), ("2", 0)]);
    }

    #[test]
    fn cursor_follows_its_mod_across_refreshes() {
        let (mut app, _dir) = app_with(
            FakeProvider::default(),
            vec![resolved("1", "One", &[], false), resolved("2", "Two", &[], false)],
            missing_steamcmd(),
        );
        app.move_cursor(1);
        assert_eq!(app.cursor_id(), Some("2"));
        app.repository().remove_by_id("1");
        app.refresh_view();
        assert_eq!(app.cursor_id(), Some("2"));
        assert_eq!(app.cursor, 0);
    }

    #[test]
    fn deleting_a_required_mod_asks_first() {
        let (mut app, _dir) = app_with(
            FakeProvider::default(),
            vec![resolved("1", "Main", &["2"], false), resolved("2", "Lib", &[], true)],
            missing_steamcmd(),
        );
        app.delete_ids(vec!["2".to_string()], false);
        let dialog = app.dialog.as_ref().unwrap();
        assert_eq!(dialog.title, "Dependency Warning");
        assert!(dialog.message.contains("'Lib' is required by: Main"));
        assert_eq!(dialog.choice, DialogChoice::No);

        app.dialog_confirm();
        assert_eq!(app.repository().len(), 2);

        app.delete_ids(vec!["2".to_string()], false);
        app.dialog_set_choice(DialogChoice::Yes);
        app.dialog_confirm();
        assert_eq!(app.repository().len(), 1);
        assert_eq!(app.status, "Removed 1 mod(s)");
    }

    #[test]
    fn deleting_a_mod_with_its_dependents_needs_no_confirmation() {
        let (mut app, _dir) = app_with(
            FakeProvider::default(),
            vec![resolved("1", "Main", &["2"], false), resolved("2", "Lib", &[], true)],
            missing_steamcmd(),
        );
        app.select_all_visible();
        app.delete_selected();
        assert!(app.dialog.is_none());
        assert!(app.repository().is_empty());
        assert!(app.selected.is_empty());
    }

    #[test]
    fn download_without_steamcmd_reports_not_found() {
        let (mut app, _dir) = app_with(
            FakeProvider::default(),
            vec![resolved("1", "Main", &[], false)],
            missing_steamcmd(),
        );
        app.download_selected();
        let dialog = app.dialog.as_ref().unwrap();
        assert_eq!(dialog.title, "SteamCMD Not Found");
        assert!(dialog
            .message
            .starts_with("SteamCMD not found at '/no/such/dir/steamcmd'."));
        assert_eq!(app.phase, DownloadPhase::Idle);
    }

    #[test]
    fn empty_view_has_nothing_to_download() {
        let (mut app, _dir) = app_with(
            FakeProvider::default(),
            vec![resolved("1", "Main", &[], false)],
            missing_steamcmd(),
        );
        app.set_filter_text("zzz");
        app.download_all();
        let dialog = app.dialog.as_ref().unwrap();
        assert_eq!(dialog.message, "There are no mods to download (check your filters).");
    }

    #[test]
    fn preparation_failure_returns_to_idle_with_a_notice() {
        let (mut app, _dir) = app_with(FakeProvider::default(), Vec::new(), missing_steamcmd());
        app.phase = DownloadPhase::PreparingDependencies;
        app.handle_message(AppMessage::WorkerFailed {
            task: WorkerTask::PrepareDownload,
            error: "poisoned".to_string(),
        });
        assert_eq!(app.phase, DownloadPhase::Idle);
        let dialog = app.dialog.as_ref().unwrap();
        assert_eq!(dialog.title, "Dependency Resolution Error");
        assert_eq!(dialog.message, "Error resolving dependencies: poisoned");
    }

    #[test]
    fn late_resolution_after_cancel_is_ignored() {
        let (mut app, _dir) = app_with(FakeProvider::default(), Vec::new(), missing_steamcmd());
        app.handle_message(AppMessage::DependenciesResolved {
            initial: BTreeSet::new(),
            resolved: ["1".to_string()].into_iter().collect(),
            added: BTreeSet::new(),
        });
        assert_eq!(app.phase, DownloadPhase::Idle);
        assert!(app.download.is_none());
    }

    #[test]
    fn finished_download_reports_failures() {
        let (mut app, _dir) = app_with(FakeProvider::default(), Vec::new(), missing_steamcmd());
        app.phase = DownloadPhase::Downloading;
        app.download = Some(DownloadProgress::new(3));
        app.handle_message(AppMessage::DownloadFinished(BatchResult {
            total: 3,
            successful: 2,
            failed: vec![FailedMod {
                id: "9".to_string(),
                title: "Broken".to_string(),
                reason: "Download failed".to_string(),
            }],
        }));
        assert_eq!(app.phase, DownloadPhase::Idle);
        assert!(app.download.is_none());
        assert_eq!(app.status, "Downloaded 2 mod(s). 1 failed.");
        let dialog = app.dialog.as_ref().unwrap();
        assert_eq!(dialog.title, "Download Complete with Errors");
        assert!(dialog.message.ends_with("9 - Broken (Download failed)"));
        assert!(dialog.is_acknowledgement());
    }

    #[test]
    fn completion_texts() {
        let clean = BatchResult {
            total: 2,
            successful: 2,
            failed: Vec::new(),
        };
        assert_eq!(
            completion_summary(&clean),
            (
                "Download Complete".to_string(),
                "Successfully downloaded all 2 mod(s)!".to_string()
            )
        );
        let failed = BatchResult {
            total: 2,
            successful: 0,
            failed: vec![
                FailedMod {
                    id: "1".to_string(),
                    title: "One".to_string(),
                    reason: "No App ID found".to_string(),
                },
                FailedMod {
                    id: "2".to_string(),
                    title: "Two".to_string(),
                    reason: "SteamCMD not found".to_string(),
                },
            ],
        };
        assert_eq!(
            failure_details_text(&failed),
            "1 - One (No App ID found)\n2 - Two (SteamCMD not found)"
        );
    }

    #[test]
    fn selection_summary_counts_kinds_and_sizes() {
        let mut main = resolved("1", "Main", &[], false);
        main.info.file_size = 3 * 1024 * 1024;
        let lib = resolved("2", "Lib", &[], true);
        let summary = SelectionSummary::of(&[main, lib]);
        assert_eq!(summary.main, 1);
        assert_eq!(summary.dependencies, 1);
        assert_eq!(
            summary.lines(),
            vec![
                "Multiple mods selected: 2 total".to_string(),
                "Main mods: 1".to_string(),
                "Dependencies: 1".to_string(),
                "Total size: 3.0 MB (1/2 mods have size info)".to_string(),
            ]
        );
    }

    #[test]
    fn empty_description_is_fetched_once_on_focus() {
        let provider = FakeProvider::default().with_mod("1", "Main", 10, &[]);
        let mut record = resolved("1", "Main", &[], false);
        record.info.description.clear();
        let (mut app, _dir) = app_with(provider, vec![record], missing_steamcmd());
        app.move_cursor(0);
        assert!(app.run_until_idle(SETTLE));
        assert_eq!(
            app.repository().get("1").unwrap().info.description,
            "[b]Main[/b] & more"
        );
        assert!(app.description_requested.contains("1"));
    }

    #[test]
    fn log_is_bounded() {
        let (mut app, _dir) = app_with(FakeProvider::default(), Vec::new(), missing_steamcmd());
        for index in 0..(LOG_CAPACITY + 20) {
            app.log_info(format!("line {index}"));
        }
        assert_eq!(app.logs.len(), LOG_CAPACITY);
        assert_eq!(app.logs[0].message, "line 20");
    }

    #[test]
    fn scope_dialog_cycles_through_cancel() {
        let (mut app, _dir) = app_with(FakeProvider::default(), Vec::new(), missing_steamcmd());
        app.dialog = Some(Dialog::question(
            "Download All",
            String::new(),
            DialogKind::DownloadScope {
                visible: BTreeSet::new(),
            },
        ));
        app.dialog_choice_right();
        app.dialog_choice_right();
        assert_eq!(app.dialog.as_ref().unwrap().choice, DialogChoice::Cancel);
        app.dialog_choice_left();
        assert_eq!(app.dialog.as_ref().unwrap().choice, DialogChoice::No);
        app.dialog_dismiss();
        assert!(app.dialog.is_none());
        assert_eq!(app.phase, DownloadPhase::Idle);
    }

    #[cfg(unix)]
    mod downloads {
        use super::*;
        use crate::steamcmd::tests::process::{fake_steamcmd, quick_timings, SERIAL};
        use std::sync::PoisonError;

        const TWO_ITEMS: &str = "echo 'Downloading item 1 ...'\n\
             echo 'Success. Downloaded item 1 to \"/tmp/1\"'\n\
             echo 'Downloading item 2 ...'\n\
             echo 'Success. Downloaded item 2 to \"/tmp/2\"'";

        #[test]
        fn selected_download_confirms_new_dependencies() {
            let _guard = SERIAL.lock().unwrap_or_else(PoisonError::into_inner);
            let dir = tempfile::tempdir().unwrap();
            let script = fake_steamcmd(dir.path(), TWO_ITEMS);
            let (mut app, _data) = app_with(
                FakeProvider::default(),
                vec![resolved("1", "Main", &["2"], false), resolved("2", "Lib", &[], true)],
                SteamCmd::new(script, quick_timings()),
            );
            app.download_selected();
            assert_eq!(app.phase, DownloadPhase::PreparingDependencies);
            assert!(app.run_until_idle(SETTLE));

            let dialog = app.dialog.as_ref().unwrap();
            assert_eq!(dialog.title, "Dependencies Found");
            assert!(dialog.message.contains("- Lib"));
            assert_eq!(app.phase, DownloadPhase::AwaitingConfirmation);

            app.dialog_confirm();
            assert_eq!(app.selected.len(), 2);
            assert_eq!(app.phase, DownloadPhase::Downloading);
            assert!(app.run_until_idle(SETTLE));

            assert_eq!(app.phase, DownloadPhase::Idle);
            assert_eq!(app.status, "Successfully downloaded all 2 mod(s).");
            let result = app.last_result.as_ref().unwrap();
            assert_eq!(result.total, 2);
            assert!(result.failed.is_empty());
            assert_eq!(app.dialog.as_ref().unwrap().title, "Download Complete");
        }

        #[test]
        fn declining_dependencies_cancels_the_download() {
            let _guard = SERIAL.lock().unwrap_or_else(PoisonError::into_inner);
            let dir = tempfile::tempdir().unwrap();
            let script = fake_steamcmd(dir.path(), TWO_ITEMS);
            let (mut app, _data) = app_with(
                FakeProvider::default(),
                vec![resolved("1", "Main", &["2"], false), resolved("2", "Lib", &[], true)],
                SteamCmd::new(script, quick_timings()),
            );
            app.download_selected();
            app.run_until_idle(SETTLE);
            app.dialog_set_choice(DialogChoice::No);
            app.dialog_confirm();
            assert_eq!(app.phase, DownloadPhase::Idle);
            assert_eq!(app.status, "Download cancelled");
            assert!(app.last_result.is_none());
        }

        #[test]
        fn download_all_without_filter_can_stop_asking() {
            let _guard = SERIAL.lock().unwrap_or_else(PoisonError::into_inner);
            let dir = tempfile::tempdir().unwrap();
            let script = fake_steamcmd(dir.path(), TWO_ITEMS);
            let (mut app, data) = app_with(
                FakeProvider::default(),
                vec![resolved("1", "One", &[], false), resolved("2", "Two", &[], false)],
                SteamCmd::new(script, quick_timings()),
            );
            app.download_all();
            assert_eq!(app.dialog.as_ref().unwrap().title, "Confirm Download All");
            app.dialog_toggle();
            app.dialog_confirm();
            assert!(!app.config.confirm_download_all);
            let saved = AppConfig::load_or_create_at(&data.path().join("config.json")).unwrap();
            assert!(!saved.confirm_download_all);
            assert!(app.run_until_idle(SETTLE));
            assert_eq!(app.last_result.as_ref().unwrap().successful, 2);

            app.dialog = None;
            app.download_all();
            assert!(app.dialog.is_none());
            assert_eq!(app.phase, DownloadPhase::Downloading);
            assert!(app.run_until_idle(SETTLE));
        }

        #[test]
        fn filtered_download_all_offers_filtered_or_everything() {
            let _guard = SERIAL.lock().unwrap_or_else(PoisonError::into_inner);
            let dir = tempfile::tempdir().unwrap();
            let script = fake_steamcmd(dir.path(), TWO_ITEMS);
            let (mut app, _data) = app_with(
                FakeProvider::default(),
                vec![resolved("1", "One", &[], false), resolved("2", "Two", &[], false)],
                SteamCmd::new(script, quick_timings()),
            );
            app.set_filter_text("one");
            app.download_all();
            let dialog = app.dialog.as_ref().unwrap();
            assert_eq!(dialog.title, "Download All");
            assert!(dialog.message.starts_with("Yes = Download 1 filtered mods\nNo = Download all 2 mods"));

            app.dialog_set_choice(DialogChoice::No);
            app.dialog_confirm();
            assert!(app.run_until_idle(SETTLE));
            assert_eq!(app.last_result.as_ref().unwrap().total, 2);
        }
    }
}
