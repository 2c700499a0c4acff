use crate::{
    library::ModRecord,
    metadata::MetadataResolver,
    repository::{AddOutcome, ModRepository},
    steamcmd::{BatchResult, DownloadObserver, SteamCmd},
    task::{CancellationToken, WorkerSet},
};
use anyhow::Result;
use std::{
    any::Any,
    collections::BTreeSet,
    fmt,
    panic::{self, AssertUnwindSafe},
    sync::{mpsc::Sender, Arc},
};
use tracing::{debug, error};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerTask {
    FetchInfo,
    FetchDescription,
    PrepareDownload,
    Download,
}

impl fmt::Display for WorkerTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            WorkerTask::FetchInfo => "metadata fetch",
            WorkerTask::FetchDescription => "description fetch",
            WorkerTask::PrepareDownload => "dependency resolution",
            WorkerTask::Download => "download",
        };
        f.write_str(label)
    }
}

#[derive(Debug)]
pub enum AppMessage {
    Status(String),
    Log(String),
    Progress { completed: usize, total: usize },
    InfoUpdated(String),
    DescriptionUpdated(String),
    DependenciesResolved {
        initial: BTreeSet<String>,
        resolved: BTreeSet<String>,
        added: BTreeSet<String>,
    },
    DownloadFinished(BatchResult),
    WorkerFailed { task: WorkerTask, error: String },
}

/// Everything a background job needs. Cloned into each spawned thread.
#[derive(Clone)]
pub struct WorkerContext {
    pub repository: Arc<ModRepository>,
    pub resolver: Arc<MetadataResolver>,
    pub tx: Sender<AppMessage>,
    pub cancel: CancellationToken,
    pub workers: WorkerSet,
}

impl WorkerContext {
    /// Posts to the loop unless shutdown has begun.
    pub fn send(&self, message: AppMessage) {
        if self.cancel.is_cancelled() {
            return;
        }
        let _ = self.tx.send(message);
    }

    /// Runs `job` on a named worker thread, turning errors and panics into
    /// `WorkerFailed` messages.
    pub fn spawn<F>(&self, task: WorkerTask, name: &str, job: F) -> bool
    where
        F: FnOnce(&WorkerContext) -> Result<()> + Send + 'static,
    {
        if self.cancel.is_cancelled() {
            return false;
        }
        let ctx = self.clone();
        let spawned = self.workers.spawn(name, move || {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| job(&ctx)));
            let failure = match outcome {
                Ok(Ok(())) => None,
                Ok(Err(err)) => Some(format!("{err:#}")),
                Err(payload) => Some(panic_message(payload.as_ref())),
            };
            if let Some(message) = failure {
                error!(%task, error = %message, "worker failed");
                ctx.send(AppMessage::WorkerFailed {
                    task,
                    error: message,
                });
            }
        });
        match spawned {
            Ok(()) => true,
            Err(err) => {
                error!(%task, error = %err, "could not spawn worker");
                let _ = self.tx.send(AppMessage::WorkerFailed {
                    task,
                    error: format!("could not start worker: {err}"),
                });
                false
            }
        }
    }

    pub fn start_info_fetch(&self, id: String) -> bool {
        let name = format!("fetch-{id}");
        self.spawn(WorkerTask::FetchInfo, &name, move |ctx| fetch_info(ctx, &id))
    }

    pub fn start_description_fetch(&self, id: String) -> bool {
        let name = format!("describe-{id}");
        self.spawn(WorkerTask::FetchDescription, &name, move |ctx| {
            fetch_description(ctx, &id)
        })
    }

    pub fn start_preparation(&self, initial: BTreeSet<String>) -> bool {
        self.spawn(WorkerTask::PrepareDownload, "prepare-download", move |ctx| {
            prepare_download(ctx, initial)
        })
    }

    pub fn start_download(&self, steamcmd: Arc<SteamCmd>, batch: Vec<ModRecord>) -> bool {
        self.spawn(WorkerTask::Download, "download", move |ctx| {
            run_download(ctx, &steamcmd, batch)
        })
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        format!("panicked: {text}")
    } else if let Some(text) = payload.downcast_ref::<String>() {
        format!("panicked: {text}")
    } else {
        "panicked".to_string()
    }
}

/// Resolves one mod, then walks its dependencies, adding unknown ones and
/// fetching each newly added id on its own worker.
fn fetch_info(ctx: &WorkerContext, id: &str) -> Result<()> {
    if ctx.cancel.is_cancelled() {
        return Ok(());
    }
    let info = ctx.resolver.resolve(id);
    if ctx.cancel.is_cancelled() {
        return Ok(());
    }
    if let Some(err) = &info.error {
        ctx.send(AppMessage::Status(format!(
            "Could not fetch info for mod {id}: {err}"
        )));
    }
    let dependencies = info.dependencies.clone();
    if !ctx.repository.update_info(id, info) {
        debug!(mod_id = id, "mod removed before its info arrived");
        return Ok(());
    }
    ctx.send(AppMessage::InfoUpdated(id.to_string()));

    for dep_id in dependencies {
        if ctx.cancel.is_cancelled() {
            return Ok(());
        }
        if let Some(existing) = ctx.repository.get(&dep_id) {
            if !existing.is_dependency && ctx.repository.mark_as_dependency(&dep_id) {
                ctx.send(AppMessage::InfoUpdated(dep_id.clone()));
            }
        }
        if ctx.repository.add_by_id(&dep_id, true) == AddOutcome::Added {
            ctx.send(AppMessage::InfoUpdated(dep_id.clone()));
            ctx.start_info_fetch(dep_id);
        }
    }
    Ok(())
}

fn fetch_description(ctx: &WorkerContext, id: &str) -> Result<()> {
    if let Some(description) = ctx.resolver.resolve_description_only(id) {
        if ctx.repository.update_description(id, description) {
            ctx.send(AppMessage::DescriptionUpdated(id.to_string()));
        }
    }
    Ok(())
}

fn prepare_download(ctx: &WorkerContext, initial: BTreeSet<String>) -> Result<()> {
    let dependencies = ctx.repository.transitive_dependencies(&initial);
    let added: BTreeSet<String> = dependencies.difference(&initial).cloned().collect();
    let resolved: BTreeSet<String> = initial.union(&dependencies).cloned().collect();
    ctx.send(AppMessage::DependenciesResolved {
        initial,
        resolved,
        added,
    });
    Ok(())
}

struct ChannelObserver<'a> {
    ctx: &'a WorkerContext,
}

impl DownloadObserver for ChannelObserver<'_> {
    fn progress(&self, completed: usize, total: usize) {
        self.ctx.send(AppMessage::Progress { completed, total });
    }

    fn log(&self, line: &str) {
        self.ctx.send(AppMessage::Log(line.to_string()));
    }

    fn status(&self, message: &str) {
        self.ctx.send(AppMessage::Status(message.to_string()));
    }
}

/// Fills in missing app ids, then hands the batch to steamcmd. Mods whose
/// lookup still fails stay in the batch so the monitor reports them.
fn run_download(ctx: &WorkerContext, steamcmd: &SteamCmd, batch: Vec<ModRecord>) -> Result<()> {
    let total = batch.len();
    let mut prepared = Vec::with_capacity(total);
    for (index, mut record) in batch.into_iter().enumerate() {
        if ctx.cancel.is_cancelled() {
            return Ok(());
        }
        if record.info.app_id.is_none() {
            ctx.send(AppMessage::Status(format!(
                "Fetching info for mod {}/{}: {}",
                index + 1,
                total,
                record.id
            )));
            let info = ctx.resolver.resolve(&record.id);
            match &info.error {
                Some(err) => ctx.send(AppMessage::Log(format!(
                    "Error fetching info for {}: {err}",
                    record.id
                ))),
                None => {
                    if ctx.repository.update_info(&record.id, info.clone()) {
                        ctx.send(AppMessage::InfoUpdated(record.id.clone()));
                    }
                    record.info = info;
                }
            }
        }
        prepared.push(record);
    }

    let observer = ChannelObserver { ctx };
    let result = steamcmd.run(&prepared, &observer, &ctx.cancel);
    ctx.send(AppMessage::DownloadFinished(result));
    Ok(())
}
