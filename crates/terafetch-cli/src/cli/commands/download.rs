use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;

use terafetch_core::transport::{HttpTransport, TransportConfig};
use terafetch_core::{CancelToken, DirectResolver, DownloadEngine, LinkResolver};

use crate::cli::TransferOpts;
use crate::config_file::CliConfig;

use super::{build_config, load_auth};

pub fn run(
    url: &str,
    output: Option<PathBuf>,
    opts: &TransferOpts,
    cfg: &CliConfig,
) -> Result<()> {
    let mut config = build_config(opts, cfg)?;
    if let Some(output) = output {
        config.output_path = output;
    }
    let auth = load_auth(opts)?;

    let transport = Arc::new(HttpTransport::new(TransportConfig {
        proxy_url: config.proxy_url.clone(),
        auth: auth.clone(),
        ..TransportConfig::default()
    }));
    let resolver = DirectResolver::new(transport);
    let meta = resolver
        .resolve(url, auth.as_ref())
        .context("failed to resolve download URL")?;
    tracing::info!(file = %meta.filename, size = meta.size, "resolved download");

    let mut engine = DownloadEngine::new();
    if let Some(auth) = auth {
        engine = engine.with_auth(auth);
    }

    let (progress, bar) = crate::progress::make(meta.size, config.quiet);
    let result = engine.download_with(&meta, &config, &CancelToken::new(), progress);
    if let Some(bar) = bar {
        bar.finish_and_clear();
    }
    result?;

    let shown = if config.output_path.as_os_str().is_empty() {
        PathBuf::from(&meta.filename)
    } else {
        config.output_path.clone()
    };
    println!("Downloaded {} ({} bytes)", shown.display(), meta.size);
    Ok(())
}
