//! Where StepWise stores its own data (config, index artifacts).
//!
//! The textbook source stays wherever the operator keeps it. We only store
//! derived state here.

use std::path::PathBuf;

/// Subdirectory of the app data dir that holds the index and metadata files.
pub const VECTORSTORE_DIR: &str = "vectorstore";

/// Returns the directory where StepWise stores config and index artifacts.
/// On Linux: `~/.local/share/stepwise/`.
/// Creates the directory if it doesn't exist; returns `None` if we can't determine the path.
pub fn app_data_dir() -> Option<PathBuf> {
    let dir = directories::ProjectDirs::from("app", "StepWise", "StepWise")?
        .data_local_dir()
        .to_path_buf();
    std::fs::create_dir_all(&dir).ok()?;
    Some(dir)
}

/// Default directory for persisted index artifacts (`<app data>/vectorstore`).
/// Not created here; the index writer creates it on save.
pub fn default_vectorstore_dir() -> Option<PathBuf> {
    app_data_dir().map(|d| d.join(VECTORSTORE_DIR))
}
