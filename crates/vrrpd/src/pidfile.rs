//! PID file claimed for the lifetime of the daemon.

use common::{Error, Result};
use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// An exclusively created `<dir>/vrrpd_<ifname>.pid`, removed on release or drop.
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
    released: bool,
}

impl PidFile {
    pub fn path_for(dir: &Path, ifname: &str) -> PathBuf {
        dir.join(format!("vrrpd_{}.pid", ifname))
    }

    /// Create the PID file, failing if another instance holds it.
    pub fn claim(dir: &Path, ifname: &str) -> Result<Self> {
        let path = Self::path_for(dir, ifname);
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| match e.kind() {
                ErrorKind::AlreadyExists => Error::pidfile(format!(
                    "{} already exists, is another vrrpd running on {}?",
                    path.display(),
                    ifname
                )),
                _ => Error::pidfile(format!("cannot create {}: {}", path.display(), e)),
            })?;

        let claimed = Self { path, released: false };
        writeln!(file, "{}", std::process::id())
            .map_err(|e| Error::pidfile(format!("cannot write {}: {}", claimed.path.display(), e)))?;

        debug!(path = %claimed.path.display(), "PID file claimed");
        Ok(claimed)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the PID file.
    pub fn release(mut self) -> Result<()> {
        self.released = true;
        std::fs::remove_file(&self.path)
            .map_err(|e| Error::pidfile(format!("cannot remove {}: {}", self.path.display(), e)))
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        if !self.released {
            if let Err(e) = std::fs::remove_file(&self.path) {
                warn!(path = %self.path.display(), error = %e, "Failed to remove PID file");
            }
        }
    }
}
