use std::path::Path;

use floorsync_core::SyncSettings;

use crate::commands::common::load_settings;
use crate::error::CliError;

const REDACTED: &str = "[REDACTED]";

pub fn run_config_init(
    server_url: String,
    auth_token: Option<String>,
    timeout: Option<u64>,
    config_path: &Path,
) -> Result<(), CliError> {
    let mut settings = SyncSettings::load_from_path(config_path)?;
    settings.server_url = Some(server_url);
    if auth_token.is_some() {
        settings.auth_token = auth_token;
    }
    if let Some(timeout) = timeout {
        settings.request_timeout_secs = timeout;
    }
    settings.save_to_path(config_path)?;

    println!("Saved settings to {}", config_path.display());
    Ok(())
}

/// Effective settings with the token masked
pub fn redacted_settings(settings: &SyncSettings) -> SyncSettings {
    let mut shown = settings.clone();
    if shown.auth_token.is_some() {
        shown.auth_token = Some(REDACTED.to_string());
    }
    shown
}

pub fn run_config_show(as_json: bool, config_path: &Path) -> Result<(), CliError> {
    let settings = redacted_settings(&load_settings(config_path)?);

    if as_json {
        println!("{}", serde_json::to_string_pretty(&settings)?);
        return Ok(());
    }

    println!("Config file:      {}", config_path.display());
    println!(
        "Server URL:       {}",
        settings.server_url.as_deref().unwrap_or("not configured")
    );
    println!(
        "Auth token:       {}",
        settings.auth_token.as_deref().unwrap_or("none")
    );
    println!("Request timeout:  {}s", settings.request_timeout_secs);
    println!("Probe:            {} every {}s", settings.probe_path, settings.probe_interval_secs);
    println!(
        "Retry backoff:    {}s up to {}s",
        settings.retry_base_secs, settings.retry_max_secs
    );
    println!("Dead-letter after {} failure(s)", settings.dead_letter_after);
    Ok(())
}
