use anyhow::{Context, Result};
use std::path::Path;

use terafetch_core::planner;
use terafetch_core::{CancelToken, DownloadEngine};

use crate::cli::TransferOpts;
use crate::config_file::CliConfig;

use super::{build_config, load_auth};

pub fn run(part_path: &Path, opts: &TransferOpts, cfg: &CliConfig) -> Result<()> {
    let config = build_config(opts, cfg)?;
    let auth = load_auth(opts)?;

    // Read the sidecar up front for the progress total and a sane message.
    let output = strip_part(part_path);
    let record = planner::load_resume_metadata(&output)
        .context("no resumable download at this path")?;
    tracing::info!(
        file = %record.file_metadata.filename,
        progress = %format!("{:.1}%", planner::resume_progress_percent(&record.segments)),
        "resuming"
    );

    let mut engine = DownloadEngine::new();
    if let Some(auth) = auth {
        engine = engine.with_auth(auth);
    }

    let (progress, bar) = crate::progress::make(record.file_metadata.size, config.quiet);
    let result = engine.resume_with(part_path, &config, &CancelToken::new(), progress);
    if let Some(bar) = bar {
        bar.finish_and_clear();
    }
    result?;

    println!(
        "Downloaded {} ({} bytes)",
        output.display(),
        record.file_metadata.size
    );
    Ok(())
}

fn strip_part(path: &Path) -> std::path::PathBuf {
    match path.to_str() {
        Some(s) if s.ends_with(planner::PART_SUFFIX) => {
            std::path::PathBuf::from(&s[..s.len() - planner::PART_SUFFIX.len()])
        }
        _ => path.to_path_buf(),
    }
}
