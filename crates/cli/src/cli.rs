use clap::Parser;
use clap_verbosity_flag::{InfoLevel, Verbosity};
use std::path::{Path, PathBuf};

/// multiablo: run several Diablo II: Resurrected clients side by side
///
/// Closes the single-instance guard handle in every running `D2R.exe` and
/// keeps the Battle.net update agent from holding on to the game by
/// restarting it once it has been alive for a few seconds.
#[derive(Debug, Parser, Clone)]
#[command(about, long_about, version)]
pub struct Cli {
    /// Path to configuration file.
    ///
    /// If not provided, `multiablo.toml` and `multiablo.d/*.toml` next to the
    /// executable are checked, the latter being a glob pattern. If they don't
    /// exist, the default configuration is used.
    #[arg(short, long, value_parser = validate_file)]
    pub config: Option<PathBuf>,

    /// Leave the update agent alone.
    #[arg(long)]
    pub no_warden: bool,

    /// Print the effective configuration as TOML and exit.
    #[arg(long)]
    pub dump_config: bool,

    #[command(flatten)]
    pub verbosity: Verbosity<InfoLevel>,
}

/// Check if the file exists.
#[inline(always)]
fn validate_file(file: &str) -> Result<PathBuf, String> {
    let path = Path::new(file);
    if path.is_file() {
        Ok(path.to_owned())
    } else {
        Err(format!("File not found: {:?}", path))
    }
}
