use chrono::{DateTime, Utc};
use filetime::FileTime;
use std::fs;
use std::io;
use std::path::Path;

/// Move a finished temporary file to its final path
///
/// A rename is atomic on the same filesystem. If the rename fails and the
/// two paths live on different devices, fall back to copy + delete.
pub fn publish(temp: &Path, dest: &Path) -> io::Result<()> {
    match fs::rename(temp, dest) {
        Ok(()) => Ok(()),
        Err(e) if !same_filesystem(temp, parent_dir(dest)) => {
            tracing::debug!(
                "rename {} → {} failed ({}), copying across filesystems",
                temp.display(),
                dest.display(),
                e
            );
            fs::copy(temp, dest)?;
            fs::remove_file(temp)
        }
        Err(e) => Err(e),
    }
}

/// Set a file's modification time from a control file timestamp
pub fn set_mtime(path: &Path, mtime: DateTime<Utc>) -> io::Result<()> {
    let time = FileTime::from_unix_time(mtime.timestamp(), mtime.timestamp_subsec_nanos());
    filetime::set_file_mtime(path, time)
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

/// Check if two paths are on the same filesystem
#[cfg(unix)]
pub fn same_filesystem(path1: &Path, path2: &Path) -> bool {
    use std::os::unix::fs::MetadataExt;

    let meta1 = match fs::metadata(path1) {
        Ok(m) => m,
        Err(_) => return false,
    };
    let meta2 = match fs::metadata(path2) {
        Ok(m) => m,
        Err(_) => return false,
    };

    meta1.dev() == meta2.dev()
}

#[cfg(not(unix))]
pub fn same_filesystem(_path1: &Path, _path2: &Path) -> bool {
    // Conservative: assume different filesystems on non-Unix
    false
}
