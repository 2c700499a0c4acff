use crate::{
    app::{App, DialogChoice, DialogKind, LogLevel, StartupOptions},
    config,
    library::{self, ModRecord},
    repository::parse_mod_input,
    ui,
};
use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::{
    collections::BTreeSet,
    fs::{self, OpenOptions},
    io,
    path::PathBuf,
    process::ExitCode,
    sync::Mutex,
    time::Duration,
};
use tracing_subscriber::EnvFilter;

const LOG_ENV: &str = "WORKSHOP_DL_LOG";
const LOG_FILE: &str = "workshop-downloader.log";
const STATUS_POLL: Duration = Duration::from_millis(500);

#[derive(Parser)]
#[command(name = "workshop-downloader", version, about = "Steam Workshop downloader")]
struct Cli {
    /// Mod list file to use instead of the configured one
    #[arg(long, global = true, value_name = "PATH")]
    data_file: Option<PathBuf>,
    /// SteamCMD executable to use instead of the configured one
    #[arg(long, global = true, value_name = "PATH")]
    steamcmd: Option<PathBuf>,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Add mods by Workshop URL or id and fetch their details
    Add {
        #[arg(required = true)]
        inputs: Vec<String>,
    },
    /// List the stored mods with dependencies nested under their parents
    List {
        #[arg(long)]
        filter: Option<String>,
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
    /// Download mods and their dependencies with SteamCMD
    Download {
        ids: Vec<String>,
        /// Download every stored mod
        #[arg(long, conflicts_with = "ids")]
        all: bool,
    },
    /// Remove mods from the list
    Remove {
        #[arg(required = true)]
        ids: Vec<String>,
        /// Remove even when other mods still depend on them
        #[arg(long)]
        force: bool,
    },
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

pub fn run() -> Result<ExitCode> {
    let cli = Cli::parse();
    let options = StartupOptions {
        data_file: cli.data_file,
        steamcmd: cli.steamcmd,
    };

    let Some(command) = cli.command else {
        init_logging(false)?;
        let mut app = App::initialize(options)?;
        let result = ui::run(&mut app);
        app.shutdown();
        result?;
        return Ok(ExitCode::SUCCESS);
    };

    init_logging(true)?;
    let mut app = App::initialize(options)?;
    flush_logs(&mut app);
    let code = match command {
        Command::Add { inputs } => add_mods(&mut app, &inputs),
        Command::List { filter, format } => list_mods(&mut app, filter.as_deref(), format),
        Command::Download { ids, all } => download_mods(&mut app, &ids, all),
        Command::Remove { ids, force } => remove_mods(&mut app, &ids, force),
    };
    app.shutdown();
    code
}

/// The TUI logs to a file in the data dir; headless runs print the app log
/// themselves, so tracing stays off unless `WORKSHOP_DL_LOG` asks for it.
fn init_logging(headless: bool) -> Result<()> {
    let default_level = if headless { "off" } else { "info" };
    let filter =
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default_level));
    if headless {
        return tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(io::stderr)
            .try_init()
            .map_err(|err| anyhow!("init logging: {err}"));
    }

    let dir = config::base_data_dir()?;
    fs::create_dir_all(&dir).context("create app data dir")?;
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join(LOG_FILE))
        .context("open log file")?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .try_init()
        .map_err(|err| anyhow!("init logging: {err}"))
}

fn flush_logs(app: &mut App) {
    for entry in app.logs.drain(..) {
        match entry.level {
            LogLevel::Info => println!("{}", entry.message),
            LogLevel::Warn => eprintln!("warning: {}", entry.message),
            LogLevel::Error => eprintln!("error: {}", entry.message),
        }
    }
    app.log_scroll = 0;
}

/// Runs workers to completion, echoing status changes when asked.
fn settle(app: &mut App, show_status: bool) {
    let mut last_status = app.status.clone();
    loop {
        let idle = app.run_until_idle(Some(STATUS_POLL));
        flush_logs(app);
        if show_status && app.status != last_status {
            println!("{}", app.status);
            last_status = app.status.clone();
        }
        if idle {
            break;
        }
    }
}

fn report_notice(app: &mut App) -> bool {
    match app.dialog.take() {
        Some(dialog) => {
            eprintln!("{}: {}", dialog.title, dialog.message);
            true
        }
        None => false,
    }
}

fn add_mods(app: &mut App, inputs: &[String]) -> Result<ExitCode> {
    let mut failed = false;
    let mut added = Vec::new();
    for input in inputs {
        match app.add_input(input) {
            Some(id) => added.push(id),
            None => {
                if report_notice(app) {
                    failed = true;
                } else {
                    println!("{}", app.status);
                }
            }
        }
    }
    settle(app, false);

    for id in &added {
        let Some(record) = app.repository().get(id) else {
            continue;
        };
        match &record.info.error {
            Some(err) => {
                failed = true;
                eprintln!("{id}: {err}");
            }
            None => println!("{id}: {}", record.display_title()),
        }
    }

    Ok(exit_code(failed))
}

#[derive(Serialize)]
struct ModListItem {
    id: String,
    title: String,
    depth: usize,
    is_dependency: bool,
    app_id: Option<u64>,
    file_size: u64,
    dependencies: Vec<String>,
    error: Option<String>,
}

impl ModListItem {
    fn new(record: ModRecord, depth: usize) -> Self {
        Self {
            title: record.display_title().to_string(),
            id: record.id,
            depth,
            is_dependency: record.is_dependency,
            app_id: record.info.app_id,
            file_size: record.info.file_size,
            dependencies: record.info.dependencies,
            error: record.info.error,
        }
    }
}

fn list_mods(app: &mut App, filter: Option<&str>, format: OutputFormat) -> Result<ExitCode> {
    if let Some(filter) = filter {
        app.set_filter_text(filter);
    }
    let items: Vec<ModListItem> = app
        .rows
        .iter()
        .filter_map(|row| {
            app.repository()
                .get(&row.id)
                .map(|record| ModListItem::new(record, row.depth))
        })
        .collect();

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&items)?);
        }
        OutputFormat::Text => {
            if items.is_empty() {
                println!("No mods.");
            }
            for item in items {
                let indent = "  ".repeat(item.depth);
                let kind = if item.is_dependency { "dep " } else { "main" };
                let size = if item.file_size > 0 {
                    library::format_size(item.file_size)
                } else {
                    "-".to_string()
                };
                println!(
                    "{id:>12} {kind} {size:>10} {indent}{title}",
                    id = item.id,
                    title = item.title
                );
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn download_mods(app: &mut App, inputs: &[String], all: bool) -> Result<ExitCode> {
    if all {
        app.download_all();
    } else {
        if inputs.is_empty() {
            bail!("name the mods to download or pass --all");
        }
        let mut ids = BTreeSet::new();
        for input in inputs {
            let id = parse_mod_input(input)
                .ok_or_else(|| anyhow!("not a Workshop URL or id: {input}"))?;
            if app.repository().get(&id).is_none() {
                bail!("mod {id} is not in the list (add it first)");
            }
            ids.insert(id);
        }
        app.download_ids(ids);
    }

    loop {
        settle(app, true);
        let Some(kind) = app.dialog.as_ref().map(|dialog| dialog.kind.clone()) else {
            break;
        };
        match kind {
            DialogKind::ConfirmDependencies { .. }
            | DialogKind::ConfirmDownloadAll { .. }
            | DialogKind::DownloadScope { .. } => {
                if let Some(dialog) = &app.dialog {
                    println!("{}", dialog.message);
                }
                app.dialog_set_choice(DialogChoice::Yes);
                app.dialog_confirm();
            }
            DialogKind::DownloadComplete => {
                if let Some(dialog) = app.dialog.take() {
                    println!("{}", dialog.message);
                }
                break;
            }
            DialogKind::Notice | DialogKind::DeleteMods { .. } => {
                report_notice(app);
                return Ok(ExitCode::FAILURE);
            }
        }
    }

    let failed = app
        .last_result
        .as_ref()
        .map_or(true, |result| !result.failed.is_empty());
    Ok(exit_code(failed))
}

fn remove_mods(app: &mut App, inputs: &[String], force: bool) -> Result<ExitCode> {
    let mut ids = Vec::new();
    for input in inputs {
        let id = parse_mod_input(input)
            .ok_or_else(|| anyhow!("not a Workshop URL or id: {input}"))?;
        ids.push(id);
    }
    app.delete_ids(ids, force);
    if matches!(
        app.dialog.as_ref().map(|dialog| &dialog.kind),
        Some(DialogKind::DeleteMods { .. })
    ) {
        report_notice(app);
        eprintln!("Pass --force to remove them anyway.");
        return Ok(ExitCode::FAILURE);
    }
    flush_logs(app);
    println!("{}", app.status);
    Ok(ExitCode::SUCCESS)
}

fn exit_code(failed: bool) -> ExitCode {
    if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
