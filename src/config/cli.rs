use crate::domain::ports::Storage;
use crate::utils::error::Result;
use std::fs;
use std::path::PathBuf;

/// Filesystem-backed artifact storage rooted at the output directory.
/// Writes replace any existing file of the same name, which is what
/// makes re-runs idempotent.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    base_path: PathBuf,
}

impl LocalStorage {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }
}

impl Storage for LocalStorage {
    async fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        Ok(fs::read(self.base_path.join(path))?)
    }

    async fn write_file(&self, path: &str, data: &[u8]) -> Result<()> {
        let full_path = self.base_path.join(path);

        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent)?;
        }

        fs::write(full_path, data)?;
        Ok(())
    }
}
