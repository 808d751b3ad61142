//! Detaching from the controlling terminal.

use common::{Error, Result};
use daemonize::Daemonize;
use std::fs::{File, OpenOptions};
use std::path::Path;

/// Fork into the background with stdout and stderr appended to `log_file`.
///
/// The parent exits once the child has detached. Must be called before any
/// threads (including the tokio runtime) are started.
pub fn daemonize(log_file: &Path) -> Result<()> {
    let stdout = open_log(log_file)?;
    let stderr = stdout.try_clone()?;

    Daemonize::new()
        .working_directory("/")
        .umask(0o027)
        .stdout(stdout)
        .stderr(stderr)
        .start()
        .map_err(|e| Error::other(format!("cannot daemonize: {}", e)))
}

fn open_log(path: &Path) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| Error::config(format!("cannot open log file {}: {}", path.display(), e)))
}
