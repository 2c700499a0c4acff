mod app;
mod bbcode;
mod cli;
mod config;
mod library;
mod metadata;
mod repository;
mod steam;
mod steamcmd;
mod task;
mod ui;
mod workers;

use anyhow::Result;
use std::process::ExitCode;

fn main() -> Result<ExitCode> {
    cli::run()
}
