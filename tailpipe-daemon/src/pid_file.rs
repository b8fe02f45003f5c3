//! PID file guard.
//!
//! The file is created exclusively so a second `tailpipe` pointed at the same
//! path refuses to start, and it is removed when the guard is dropped.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// Holds the PID file for the lifetime of the run.
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    /// Create `path` (and its parent directory) and write the current PID into it.
    ///
    /// # Errors
    ///
    /// - The file already exists (another instance, or a stale file from a crash)
    /// - The path exists but is not a regular file
    /// - Any I/O failure while creating or writing it
    pub fn create(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        create_parent(&path)?;

        let mut options = OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }

        let mut file = match options.open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                let holder = fs::read_to_string(&path).unwrap_or_default();
                anyhow::bail!(
                    "PID file {} already exists (pid {}); is tailpipe already running?",
                    path.display(),
                    holder.trim()
                );
            }
            Err(e) => {
                return Err(e).with_context(|| format!("cannot create PID file {}", path.display()));
            }
        };

        if !file.metadata()?.is_file() {
            anyhow::bail!("PID file {} is not a regular file", path.display());
        }

        let pid = std::process::id();
        writeln!(file, "{pid}")
            .with_context(|| format!("cannot write PID file {}", path.display()))?;
        tracing::info!(pid, path = %path.display(), "PID file written");

        Ok(Self { path })
    }

    /// Path of the held file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Ok(()) => tracing::debug!(path = %self.path.display(), "PID file removed"),
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "failed to remove PID file")
            }
        }
    }
}

fn create_parent(path: &Path) -> Result<()> {
    let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) else {
        return Ok(());
    };

    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o700);
    }
    builder
        .create(parent)
        .with_context(|| format!("cannot create PID directory {}", parent.display()))
}
