//! ---
//! eph_section: "02-harness-lifecycle"
//! eph_subsection: "module"
//! eph_type: "source"
//! eph_scope: "code"
//! eph_description: "Session-owned temporary directory."
//! eph_version: "v0.1.0"
//! eph_owner: "tbd"
//! ---
use std::io;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

const SCOPE_PREFIX: &str = "ephemera-";

/// Temporary directory owned by one harness session.
///
/// Removed on [`TempScope::close`] or, failing that, on drop.
#[derive(Debug)]
pub struct TempScope {
    dir: Option<TempDir>,
    path: PathBuf,
}

impl TempScope {
    /// Create a fresh directory under `root`, or under the system temp dir.
    pub fn create(root: Option<&Path>) -> io::Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(SCOPE_PREFIX);
        let dir = match root {
            Some(root) => {
                std::fs::create_dir_all(root)?;
                builder.tempdir_in(root)?
            }
            None => builder.tempdir()?,
        };
        let path = dir.path().to_path_buf();
        Ok(Self {
            dir: Some(dir),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn join(&self, name: impl AsRef<Path>) -> PathBuf {
        self.path.join(name)
    }

    pub fn is_open(&self) -> bool {
        self.dir.is_some()
    }

    /// Remove the directory and its contents. Closing twice is a no-op.
    pub fn close(&mut self) -> io::Result<()> {
        match self.dir.take() {
            Some(dir) => dir.close(),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_removes_directory() {
        let root = tempfile::tempdir().unwrap();
        let mut scope = TempScope::create(Some(root.path())).unwrap();
        std::fs::write(scope.join("artifact"), b"data").unwrap();
        assert!(scope.path().starts_with(root.path()));
        assert!(scope
            .path()
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with(SCOPE_PREFIX));

        scope.close().unwrap();
        assert!(!scope.path().exists());
        assert!(!scope.is_open());
        scope.close().unwrap();
    }

    #[test]
    fn drop_removes_directory() {
        let path = {
            let scope = TempScope::create(None).unwrap();
            scope.path().to_path_buf()
        };
        assert!(!path.exists());
    }

    #[test]
    fn missing_root_is_created() {
        let root = tempfile::tempdir().unwrap();
        let nested = root.path().join("a").join("b");
        let scope = TempScope::create(Some(&nested)).unwrap();
        assert!(scope.path().starts_with(&nested));
    }
}
