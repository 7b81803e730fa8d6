pub mod build;
pub mod dev;
pub mod version;

use packrat_core::config::{Config, NormalizedConfig};
use packrat_core::error::ConfigError;
use std::path::{Path, PathBuf};

/// Load and validate the project config.
///
/// An explicit `config` path is taken relative to `cwd`; otherwise the
/// default file name is looked up in `cwd`. Relative paths in the config
/// resolve against the directory holding it.
pub fn load_config(cwd: &Path, config: Option<&Path>) -> Result<NormalizedConfig, ConfigError> {
    let path = match config {
        Some(path) => cwd.join(path),
        None => Config::find(cwd)?,
    };
    let config_dir = path
        .parent()
        .map_or_else(|| cwd.to_path_buf(), Path::to_path_buf);
    tracing::debug!(path = %path.display(), "loading config");
    Config::load(&path)?.normalize(&config_dir)
}

/// Display form of a path relative to `base` when possible.
pub fn display_path(path: &Path, base: &Path) -> PathBuf {
    path.strip_prefix(base)
        .map_or_else(|_| path.to_path_buf(), Path::to_path_buf)
}
