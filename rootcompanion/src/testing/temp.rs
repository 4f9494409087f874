use std::fs;
use std::path::{Path, PathBuf};

use rstest::fixture;
use tempfile::TempDir;

/// Scratch directory removed when dropped
pub struct TmpDir {
    inner: TempDir,
}

impl TmpDir {
    pub fn new() -> Self {
        let inner = tempfile::Builder::new()
            .prefix("rootcompanion_test")
            .tempdir()
            .expect("failed to create temp dir");
        Self { inner }
    }

    pub fn get_path(&self) -> &Path {
        self.inner.path()
    }

    /// Create `name` (and any missing parents) under the directory. `None`
    /// leaves the file empty.
    pub fn create_file_name(&self, name: &str, content: Option<&str>) -> PathBuf {
        let path = self.inner.path().join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("failed to create parent dirs");
        }
        fs::write(&path, content.unwrap_or_default()).expect("failed to write temp file");
        path
    }
}

#[fixture]
pub fn tmp_dir() -> TmpDir {
    TmpDir::new()
}
