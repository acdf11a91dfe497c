use std::io;
use std::path::{Path, PathBuf};

/// Process-local directory holding pipeline scratch files.
///
/// Shared by every worker of an invocation. There is no locking: concurrent
/// pipelines stay apart only through unique file names.
#[derive(Debug, Clone)]
pub struct ScratchDir {
    root: PathBuf,
}

impl ScratchDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the directory if it is missing.
    pub fn ensure(&self) -> io::Result<()> {
        std::fs::create_dir_all(&self.root)
    }

    /// Reserve a path for `name`. Nothing touches the filesystem until the
    /// caller writes to it.
    pub fn acquire(&self, name: &str) -> ScratchFile {
        ScratchFile {
            path: self.root.join(name),
            released: false,
        }
    }

    /// Regular files currently present in the directory.
    pub fn entries(&self) -> io::Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                files.push(entry.path());
            }
        }
        files.sort();
        Ok(files)
    }
}

/// Handle to one scratch file. Deleted on `release` or when dropped.
#[derive(Debug)]
pub struct ScratchFile {
    path: PathBuf,
    released: bool,
}

impl ScratchFile {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Delete the underlying file if present.
    ///
    /// Never fails: a deletion error is logged so it cannot mask the error that
    /// caused the pipeline to unwind. A missing file is not an error.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                tracing::debug!(path = %self.path.display(), "Removed scratch file");
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Failed to remove scratch file"
                );
            }
        }
    }
}

impl Drop for ScratchFile {
    fn drop(&mut self) {
        self.release();
    }
}
