pub mod download;
pub mod resume;

use anyhow::Result;
use terafetch_core::config::parse_rate_limit;
use terafetch_core::{AuthContext, DownloadConfig};

use super::TransferOpts;
use crate::config_file::CliConfig;

/// Merge flags over config-file defaults into an engine config.
pub(super) fn build_config(opts: &TransferOpts, cfg: &CliConfig) -> Result<DownloadConfig> {
    let rate_string = opts
        .limit_rate
        .clone()
        .or_else(|| cfg.rate_limit.clone())
        .unwrap_or_default();
    let config = DownloadConfig {
        output_path: Default::default(),
        threads: opts.threads.unwrap_or(cfg.default_threads),
        rate_limit_bps: parse_rate_limit(&rate_string)?,
        proxy_url: opts.proxy.clone().or_else(|| cfg.proxy.clone()),
        quiet: opts.quiet,
        resume_data: None,
    };
    config.validate()?;
    Ok(config)
}

/// Cookie file -> auth context, when one was given.
pub(super) fn load_auth(opts: &TransferOpts) -> Result<Option<AuthContext>> {
    opts.cookies
        .as_deref()
        .map(crate::cookies::load_cookie_file)
        .transpose()
}
