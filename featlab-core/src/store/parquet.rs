//! Atomic parquet I/O.

use std::fs;
use std::path::Path;

use polars::prelude::*;

use super::StoreError;

/// Write a frame to `path` atomically: write to a sibling .tmp file,
/// then rename into place. A crashed run never leaves a torn file.
pub fn write_parquet_atomic(df: &DataFrame, path: &Path) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp_path = path.with_extension("parquet.tmp");

    let file = fs::File::create(&tmp_path)
        .map_err(|e| StoreError::Parquet(format!("create {}: {e}", tmp_path.display())))?;
    ParquetWriter::new(file)
        .finish(&mut df.clone())
        .map_err(|e| StoreError::Parquet(format!("write parquet: {e}")))?;

    fs::rename(&tmp_path, path).map_err(|e| {
        let _ = fs::remove_file(&tmp_path);
        StoreError::Parquet(format!("atomic rename failed: {e}"))
    })?;
    Ok(())
}

/// Read a parquet file, or None when it does not exist.
pub fn read_parquet_if_exists(path: &Path) -> Result<Option<DataFrame>, StoreError> {
    if !path.exists() {
        return Ok(None);
    }
    let file = fs::File::open(path)
        .map_err(|e| StoreError::Parquet(format!("open {}: {e}", path.display())))?;
    let df = ParquetReader::new(file)
        .finish()
        .map_err(|e| StoreError::Parquet(format!("read {}: {e}", path.display())))?;
    Ok(Some(df))
}
