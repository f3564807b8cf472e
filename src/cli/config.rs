//! Configuration CLI command handlers

use crate::cli::commands::{ConfigCommand, ConfigKey};
use crate::core::config::Config;
use crate::error::Result;

/// Handle configuration commands
pub fn handle_config(command: ConfigCommand) -> Result<()> {
    match command {
        ConfigCommand::Show => handle_show(),
        ConfigCommand::Set { key, value } => handle_set(key, value),
        ConfigCommand::Path => {
            println!("{}", Config::config_path()?.display());
            Ok(())
        }
    }
}

/// Print the effective configuration, environment overrides included
fn handle_show() -> Result<()> {
    let config = Config::load()?;
    print!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}

/// Handle setting a configuration value
///
/// Writes the file as stored, without environment overrides.
fn handle_set(key: ConfigKey, value: String) -> Result<()> {
    let mut config = Config::load_file()?;
    config.set(key.into(), &value)?;
    config.save()?;

    println!("✓ {} set to: {}", key_name(key), value.trim());
    Ok(())
}

fn key_name(key: ConfigKey) -> &'static str {
    match key {
        ConfigKey::ApiUrl => "api_base_url",
        ConfigKey::TimeoutMs => "request_timeout_ms",
        ConfigKey::RetryAttempts => "retry_attempts",
        ConfigKey::RetryDelayMs => "retry_base_delay_ms",
        ConfigKey::RefreshWarningSecs => "refresh_warning_secs",
        ConfigKey::RefreshAutoSecs => "refresh_auto_secs",
        ConfigKey::CheckIntervalSecs => "expiry_check_interval_secs",
        ConfigKey::Store => "store",
    }
}
