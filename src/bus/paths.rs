//! Directory layout of a session's bus root.

use std::path::{Path, PathBuf};

use crate::Result;

/// Per-session bus directory tree. Part of the stable on-disk contract:
/// other tools may read these paths directly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusPaths {
    root: PathBuf,
}

impl BusPaths {
    /// Wrap a bus root directory.
    #[must_use]
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// The bus root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Container → host request directory. Single writer: the container.
    #[must_use]
    pub fn inbox(&self) -> PathBuf {
        self.root.join("inbox")
    }

    /// Host → container response directory. Single writer: the host.
    #[must_use]
    pub fn outbox(&self) -> PathBuf {
        self.root.join("outbox")
    }

    /// Host-initiated command directory. Single writer: the host.
    #[must_use]
    pub fn control(&self) -> PathBuf {
        self.root.join("control")
    }

    /// Consumed inbox messages are moved here after processing.
    #[must_use]
    pub fn archive(&self) -> PathBuf {
        self.root.join("archive")
    }

    /// Create the full tree. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if a directory cannot be created.
    pub fn ensure(&self) -> Result<()> {
        for dir in [self.inbox(), self.outbox(), self.control(), self.archive()] {
            std::fs::create_dir_all(&dir)?;
        }
        Ok(())
    }
}
