//! Location of the per-directory upload state

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::warn;

/// Name of the per-directory state folder
pub const STATE_DIR_NAME: &str = ".partwise";

/// Ledger file name inside the state folder
pub const LEDGER_FILE_NAME: &str = "uploads.json";

/// Ledger file under `root`, creating the state folder on first use.
/// Inside a git checkout the folder is also appended to .gitignore.
pub fn get_ledger_file_path(root: &Path) -> PathBuf {
    let state_dir = root.join(STATE_DIR_NAME);
    if !state_dir.is_dir() {
        if let Err(e) = init_state_dir(root, &state_dir) {
            warn!("Failed to prepare {}: {}", state_dir.display(), e);
        }
    }
    state_dir.join(LEDGER_FILE_NAME)
}

fn init_state_dir(root: &Path, state_dir: &Path) -> io::Result<()> {
    fs::create_dir_all(state_dir)?;
    if root.join(".git").exists() {
        ignore_state_dir(&root.join(".gitignore"))?;
    }
    Ok(())
}

fn ignore_state_dir(gitignore: &Path) -> io::Result<()> {
    let existing = match fs::read_to_string(gitignore) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(e),
    };
    if existing.lines().any(is_state_dir_pattern) {
        return Ok(());
    }

    let mut file = OpenOptions::new().create(true).append(true).open(gitignore)?;
    if !existing.is_empty() && !existing.ends_with('\n') {
        writeln!(file)?;
    }
    writeln!(file, "{}/", STATE_DIR_NAME)
}

fn is_state_dir_pattern(line: &str) -> bool {
    line.trim().trim_start_matches('/').trim_end_matches('/') == STATE_DIR_NAME
}
