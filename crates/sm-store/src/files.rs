//! Flat-file interchange in the `SMST` record layout.

use std::fs;
use std::path::Path;

use sm_core::{StarRecord, decode_file, encode_file};

use crate::error::{Result, StoreError};

/// Write every record to `path`, replacing any existing file.
pub fn export_file(path: &Path, records: &[StarRecord]) -> Result<()> {
    let bytes = encode_file(records);
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
    }
    // Write beside the target, then rename, so a crash never leaves half a file.
    let staging = path.with_extension("smst.tmp");
    fs::write(&staging, &bytes).map_err(|e| StoreError::io(&staging, e))?;
    fs::rename(&staging, path).map_err(|e| StoreError::io(path, e))?;

    tracing::info!(
        records = records.len(),
        bytes = bytes.len(),
        path = %path.display(),
        "exported star file"
    );
    Ok(())
}

/// Read a whole record file. Any damage fails the import.
pub fn import_file(path: &Path) -> Result<Vec<StarRecord>> {
    let bytes = fs::read(path).map_err(|e| StoreError::io(path, e))?;
    let records = decode_file(&bytes)?;
    tracing::info!(
        records = records.len(),
        path = %path.display(),
        "imported star file"
    );
    Ok(records)
}
