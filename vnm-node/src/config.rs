//! Settings loading for the vnm command.

use anyhow::{Context, Result};
use std::path::PathBuf;
use tracing::info;
use vnm_driver::{Settings, DEFAULT_SETTINGS_PATH};

use crate::cli::Args;

/// Load the driver settings.
///
/// An explicit `--config` file must be readable; the default location is
/// optional and falls back to built-in defaults.
pub fn load(args: &Args) -> Result<Settings> {
    let settings = match &args.config {
        Some(path) => {
            let settings = Settings::load(path)
                .with_context(|| format!("Failed to load settings from {}", path))?;
            info!(config_path = %path, "Settings loaded");
            settings
        }
        None => Settings::load_or_default(DEFAULT_SETTINGS_PATH),
    };

    Ok(with_cli_overrides(settings, args))
}

/// Apply CLI argument overrides to the settings.
pub fn with_cli_overrides(mut settings: Settings, args: &Args) -> Settings {
    if args.locking {
        settings.locking = true;
    }

    if let Some(ref lock_dir) = args.lock_dir {
        settings.lock_dir = PathBuf::from(lock_dir);
    }

    settings
}
