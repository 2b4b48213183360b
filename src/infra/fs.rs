//! # File System Operations Module / 文件系统操作模块
//!
//! Small helpers around the tensor files a unit reads and writes.
//!
//! 围绕执行单元读写的张量文件的小型辅助函数。

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::core::error::UnitError;

/// Creates the parent directory of every path.
pub fn ensure_parent_dirs(paths: &[PathBuf]) -> Result<(), UnitError> {
    for path in paths {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .map_err(|e| UnitError::io(format!("cannot create directory {}", parent.display()), e))?;
        }
    }
    Ok(())
}

/// Deletes files left over from an earlier run or a timed-out attempt.
/// Paths that do not exist are ignored.
pub fn remove_files(paths: &[PathBuf]) -> Result<(), UnitError> {
    for path in paths {
        remove_if_exists(path)
            .map_err(|e| UnitError::io(format!("cannot remove stale output {}", path.display()), e))?;
    }
    Ok(())
}

fn remove_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

/// Joins `path` onto `base` unless it is already absolute.
pub fn anchor(base: &Path, path: &str) -> PathBuf {
    let candidate = Path::new(path);
    if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        base.join(candidate)
    }
}
