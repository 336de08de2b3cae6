//! Output naming and the up-front output directory check.

use crate::domain::model::SequencedScene;
use crate::utils::error::{FetchError, Result};
use std::path::Path;

pub const PROCESSING_LEVEL: &str = "L2A";

/// Compose the canonical artifact names,
/// `PREFIX_SATID_SCENEID_YYYYMMDD_SEQ_L2A_TCI.tif` and its
/// `_metadata.xml` sibling. The template is fixed and case-sensitive;
/// SEQ is the zero-based same-day sequence index.
pub fn artifact_filenames(prefix: &str, scene: &SequencedScene) -> (String, String) {
    let stem = format!(
        "{prefix}_{sat}_{id}_{date}_{seq}_{level}",
        sat = scene.record.satellite_id,
        id = scene.record.scene_id,
        date = scene.record.acquired.format("%Y%m%d"),
        seq = scene.sequence_index,
        level = PROCESSING_LEVEL,
    );
    (format!("{stem}_TCI.tif"), format!("{stem}_metadata.xml"))
}

/// Verify the output directory exists and is writable before any work
/// begins. Failing this aborts the whole run; nothing else does.
pub fn ensure_output_dir(dir: &Path) -> Result<()> {
    let meta = std::fs::metadata(dir).map_err(|e| FetchError::OutputDirectory {
        path: dir.to_path_buf(),
        reason: e.to_string(),
    })?;
    if !meta.is_dir() {
        return Err(FetchError::OutputDirectory {
            path: dir.to_path_buf(),
            reason: "not a directory".to_string(),
        });
    }
    // Writability probe; the anonymous temp file is removed on drop.
    tempfile::tempfile_in(dir).map_err(|e| FetchError::OutputDirectory {
        path: dir.to_path_buf(),
        reason: format!("not writable: {e}"),
    })?;
    Ok(())
}
