//! Durable local snapshots
//!
//! Snapshots are newline-delimited JSON: one line per record. Writes go to a
//! sibling temp file first and are renamed into place, so a crash mid-write
//! leaves the previous snapshot intact.

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{CacheError, Result};

/// Write `records` as JSONL to `path`, replacing any previous file
pub fn write_lines<T: Serialize>(path: &Path, records: &[T]) -> Result<()> {
    debug!(?path, count = records.len(), "write_lines: called");
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }

    let tmp_path = temp_path(path);
    {
        let file = fs::File::create(&tmp_path)?;
        let mut writer = BufWriter::new(file);
        for record in records {
            let line = serde_json::to_string(record)?;
            writeln!(writer, "{}", line)?;
        }
        writer.flush()?;
    }
    fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Read a JSONL file written by [`write_lines`]
pub fn read_lines<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    debug!(?path, "read_lines: called");
    let file = fs::File::open(path)?;
    let reader = BufReader::new(file);

    let mut records = Vec::new();
    for (number, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record = serde_json::from_str(&line).map_err(|e| CacheError::Snapshot {
            path: path.to_path_buf(),
            message: format!("line {}: {}", number + 1, e),
        })?;
        records.push(record);
    }
    Ok(records)
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Turn a table address into a file-system safe file stem
pub fn file_stem(table_id: &str, table_name: &str) -> String {
    let clean = |s: &str| -> String {
        s.chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect()
    };
    format!("{}_{}", clean(table_id), clean(table_name))
}
