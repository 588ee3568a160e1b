pub mod build;
pub mod dev;
pub mod resolve;
pub mod version;

use miette::{IntoDiagnostic, Result};
use packwright_core::{load_config, BuildConfig, LoadOptions, Mode};
use std::path::{Path, PathBuf};

/// Load the config for a command. `default_mode` applies when neither the
/// flag, `NODE_ENV` nor the file choose one.
pub fn load(
    cwd: &Path,
    config: Option<PathBuf>,
    mode: Option<Mode>,
    default_mode: Mode,
) -> Result<BuildConfig> {
    load_config(
        cwd,
        &LoadOptions {
            config_path: config,
            mode,
            default_mode,
        },
    )
    .into_diagnostic()
}
