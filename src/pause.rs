use std::fs;
use std::path::{Path, PathBuf};

use crate::error::Result;

/// Reports whether remote mediation is currently paused.
///
/// Checked on every request, never cached, since the flag is toggled from
/// outside the daemon.
pub trait PauseChecker: Send + Sync {
    fn is_paused(&self) -> bool;
}

/// Pause flag backed by the presence of a marker file.
#[derive(Debug, Clone)]
pub struct FilePauseGate {
    path: PathBuf,
}

impl FilePauseGate {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create or remove the marker. Used by the control surface only.
    pub fn set_paused(&self, paused: bool) -> Result<()> {
        if paused {
            if let Some(parent) = self.path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&self.path, b"")?;
        } else if let Err(e) = fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                return Err(e.into());
            }
        }
        Ok(())
    }
}

impl PauseChecker for FilePauseGate {
    fn is_paused(&self) -> bool {
        self.path.exists()
    }
}
