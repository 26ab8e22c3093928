use serde::Serialize;
use std::path::PathBuf;

/// JSON output mode for machine-readable download events
/// Uses NDJSON format (newline-delimited JSON)
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DownloadEvent {
    Start {
        filename: String,
        output: PathBuf,
        file_length: u64,
        blocks: usize,
    },
    Input {
        path: PathBuf,
        bytes_scanned: u64,
        blocks_matched: usize,
    },
    Fetch {
        url: String,
        ranges: usize,
        requests: usize,
        bytes_downloaded: u64,
    },
    Complete {
        output: PathBuf,
        blocks_local: usize,
        blocks_fetched: usize,
        bytes_downloaded: u64,
        duration_secs: f64,
    },
}

impl DownloadEvent {
    /// Emit this event as JSON to stdout
    pub fn emit(&self) {
        if let Ok(json) = serde_json::to_string(self) {
            println!("{}", json);
        }
    }
}
