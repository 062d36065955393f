//! Where stately keeps its files on disk.
//!
//! Everything lives under one root, `~/.stately` unless `--data-dir` picks another.

use std::path::PathBuf;
use std::sync::OnceLock;

static ROOT: OnceLock<PathBuf> = OnceLock::new();

/// Fix the root for the rest of the process. Later calls are ignored.
pub fn init_data_dir(custom_path: Option<PathBuf>) {
    let root = custom_path.unwrap_or_else(home_root);
    if let Err(ignored) = ROOT.set(root) {
        tracing::debug!(path = %ignored.display(), "data directory already fixed");
    }
}

fn home_root() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_default()
        .join(".stately")
}

fn root() -> PathBuf {
    ROOT.get().cloned().unwrap_or_else(home_root)
}

pub fn config_path() -> PathBuf {
    root().join("config.toml")
}

pub fn logs_dir() -> PathBuf {
    root().join("logs")
}

pub fn log_file_path() -> PathBuf {
    logs_dir().join("stately.log")
}

/// Tape written by `--record`.
pub fn default_tape_path() -> PathBuf {
    root().join("tapes").join("events.jsonl")
}
