use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ZsyncError {
    #[error("Malformed control file: {0}\nThe control file is damaged or was produced by an incompatible zsyncmake.")]
    Format(String),

    #[error("Range request failed: {0}\nThe server may not support HTTP range requests.")]
    Protocol(String),

    #[error("Received range {first}-{last} is not aligned to block size {block_size} (file length {file_length})")]
    Alignment {
        first: u64,
        last: u64,
        block_size: u32,
        file_length: u64,
    },

    #[error("Checksum mismatch for {path}\nExpected SHA-1: {expected}\nActual SHA-1:   {actual}\nThe partial file was discarded; the target was left untouched.")]
    ChecksumValidation {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("Output is incomplete: {remaining} blocks are still missing")]
    Incomplete { remaining: usize },

    #[error("Invalid rolling window: {0}")]
    InvalidWindow(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}\nCheck your network connection and the URL in the control file.")]
    Http(#[from] reqwest::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, ZsyncError>;

/// Format bytes for human-readable display
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    const TB: u64 = GB * 1024;

    if bytes >= TB {
        format!("{:.2} TB", bytes as f64 / TB as f64)
    } else if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
