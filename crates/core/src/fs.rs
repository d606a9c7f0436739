//! Filesystem utilities

use std::fs;
use std::io;
use std::path::Path;
use std::time::Duration;

use log::{debug, info};

/// Create a directory and all parent directories if they don't exist
pub fn create_dir_all(path: &Path) -> io::Result<()> {
    if !path.is_dir() {
        fs::create_dir_all(path)?;
        info!("Created directory: {}", path.display());
    }
    Ok(())
}

/// Time since the file was last modified, or `None` if it can't be determined
pub fn file_age(path: &Path) -> Option<Duration> {
    let modified = fs::metadata(path).and_then(|m| m.modified()).ok()?;
    modified.elapsed().ok()
}

/// Remove a file, treating an already-missing file as success
///
/// Returns true if a file was actually removed.
pub fn remove_if_exists(path: &Path) -> io::Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => {
            debug!("Removed file: {}", path.display());
            Ok(true)
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}
