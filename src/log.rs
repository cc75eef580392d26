//! Combined terminal + file logger, adapted from the teacher's
//! `src-tauri/src/log.rs::setup_logger` — minus the tauri frontend-log
//! channel, since this binary has no UI to forward logs from.

use anyhow::{Context, Result};
use simplelog::{ColorChoice, CombinedLogger, ConfigBuilder, LevelFilter, SharedLogger, TermLogger, TerminalMode, WriteLogger};
use std::fs::File;
use std::path::Path;

pub fn setup_logger(log_dir: &Path) -> Result<()> {
    std::fs::create_dir_all(log_dir).context("failed to create log directory")?;

    let log_file =
        File::create(log_dir.join("thali.log")).context("failed to create thali.log")?;

    let mut file_builder = ConfigBuilder::new();
    let _ = file_builder.set_time_offset_to_local();
    let file_config = file_builder.build();

    let mut term_builder = ConfigBuilder::new();
    let _ = term_builder.set_time_offset_to_local();
    let term_config = term_builder.build();

    let loggers: Vec<Box<dyn SharedLogger>> = vec![
        TermLogger::new(
            LevelFilter::Info,
            term_config,
            TerminalMode::Mixed,
            ColorChoice::Auto,
        ),
        WriteLogger::new(LevelFilter::Debug, file_config, log_file),
    ];

    CombinedLogger::init(loggers).ok();
    log::info!("thali node logger initialized (dir={})", log_dir.display());
    Ok(())
}
