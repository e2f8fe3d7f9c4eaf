use anyhow::Context;
use config::Config;
use std::path::{Path, PathBuf};
use tracing::trace;

pub const CONFIG_FILE: &str = "multiablo.toml";
pub const CONFIG_DIR: &str = "multiablo.d";

/// Config files looked at when none is given, in merge order.
pub fn config_candidates(base: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let pattern = base.join(CONFIG_DIR).join("*.toml");
    let pattern = pattern
        .to_str()
        .context("config directory path is not valid UTF-8")?;
    let mut candidates = glob::glob(pattern)?
        .filter_map(Result::ok)
        .collect::<Vec<_>>();
    candidates.sort();
    candidates.insert(0, base.join(CONFIG_FILE));
    trace!(?candidates, "config file candidates");
    Ok(candidates)
}

/// Resolve the effective configuration.
///
/// An explicit file wins. Otherwise everything found beside the executable
/// is merged over the defaults. `no_warden` switches the agent warden off on
/// top of whatever the files say.
pub fn load_config(explicit: Option<&Path>, base: &Path, no_warden: bool) -> anyhow::Result<Config> {
    let mut config = match explicit {
        Some(path) => Config::load(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => Config::load_multiple(config_candidates(base)?)?,
    };
    if no_warden {
        config.warden.enabled = false;
    }
    Ok(config)
}

/// Directory holding the running executable.
pub fn exe_dir() -> anyhow::Result<PathBuf> {
    let exe = std::env::current_exe().context("failed to locate executable")?;
    Ok(exe
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(".")))
}
