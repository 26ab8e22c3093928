pub mod output;
pub mod target;

use crate::control::ControlFile;
use crate::delta::matcher;
use crate::error::{format_bytes, Result};
use crate::transport::range::{ByteRange, RangeFetcher, RangeSink};
use crate::transport::HttpTransport;
use indicatif::{ProgressBar, ProgressStyle};
use output::DownloadEvent;
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use target::OutputFile;
use url::Url;

#[derive(Debug)]
pub struct SyncStats {
    pub blocks_total: usize,
    pub blocks_local: usize,
    pub blocks_fetched: usize,
    pub bytes_scanned: u64,
    pub bytes_downloaded: u64,
    pub requests: usize,
    pub duration: Duration,
}

/// Everything a session needs besides the control file
pub struct SessionOptions {
    pub output: PathBuf,
    /// Local files to take blocks from, in scan order
    pub inputs: Vec<PathBuf>,
    /// Where to fetch missing ranges; `None` works offline
    pub target_url: Option<Url>,
    pub max_ranges: usize,
    pub read_buffer_size: usize,
    pub quiet: bool,
    pub json: bool,
}

/// One reconstruction of a target file
///
/// Scans the existing output, a leftover `.part` file and the given inputs
/// for blocks of the target, downloads whatever is still missing, then
/// verifies and publishes the result.
pub struct Session<'a, T: HttpTransport + ?Sized> {
    control: Arc<ControlFile>,
    transport: &'a T,
    options: SessionOptions,
}

impl<'a, T: HttpTransport + ?Sized> Session<'a, T> {
    pub fn new(control: Arc<ControlFile>, transport: &'a T, options: SessionOptions) -> Self {
        Self {
            control,
            transport,
            options,
        }
    }

    pub fn run(&self) -> Result<SyncStats> {
        let start = Instant::now();
        let header = self.control.header();
        let output_path = &self.options.output;

        tracing::info!(
            "Reconstructing {} ({}, {} blocks of {})",
            output_path.display(),
            format_bytes(header.file_length),
            self.control.num_blocks(),
            header.block_size
        );
        if self.options.json {
            DownloadEvent::Start {
                filename: header.filename.clone(),
                output: output_path.clone(),
                file_length: header.file_length,
                blocks: self.control.num_blocks(),
            }
            .emit();
        }

        // The previous attempt's .part must move aside before OutputFile
        // truncates it
        let resume_seed = take_resume_seed(output_path)?;
        let candidates = self.candidates(resume_seed.as_deref());

        let mut output = OutputFile::create(Arc::clone(&self.control), output_path)?;
        let mut bytes_scanned = 0;
        if let Err(e) = self.scan_all(&candidates, &mut output, &mut bytes_scanned) {
            // The fresh .part holds less than the seed did; put the seed back
            drop(output);
            if let Some(seed) = &resume_seed {
                if let Err(restore) = fs::rename(seed, target::part_path(output_path)) {
                    tracing::warn!("Failed to restore {}: {}", seed.display(), restore);
                }
            }
            return Err(e);
        }
        if let Some(seed) = &resume_seed {
            if let Err(e) = fs::remove_file(seed) {
                tracing::warn!("Failed to remove {}: {}", seed.display(), e);
            }
        }

        let blocks_total = output.num_blocks();
        let blocks_local = blocks_total - output.blocks_remaining();
        tracing::info!("{} of {} blocks found locally", blocks_local, blocks_total);

        let mut bytes_downloaded = 0;
        let mut requests = 0;
        if !output.is_complete() {
            if let Some(url) = &self.options.target_url {
                let ranges = output.missing_ranges();
                let stats = self.fetch(url, &ranges, &mut output)?;
                bytes_downloaded = stats.bytes;
                requests = stats.requests;
            } else {
                tracing::info!("Offline: not fetching {} missing blocks", output.blocks_remaining());
            }
        }
        let blocks_fetched = blocks_total - blocks_local - output.blocks_remaining();

        output.close()?;

        let stats = SyncStats {
            blocks_total,
            blocks_local,
            blocks_fetched,
            bytes_scanned,
            bytes_downloaded,
            requests,
            duration: start.elapsed(),
        };
        if self.options.json {
            DownloadEvent::Complete {
                output: output_path.clone(),
                blocks_local,
                blocks_fetched,
                bytes_downloaded,
                duration_secs: stats.duration.as_secs_f64(),
            }
            .emit();
        }
        Ok(stats)
    }

    /// Existing output first (usually the previous version), then the resume
    /// seed, then user inputs; duplicates are scanned once
    fn candidates(&self, resume_seed: Option<&Path>) -> Vec<PathBuf> {
        let mut candidates: Vec<PathBuf> = Vec::new();
        let output = &self.options.output;
        let existing = output.is_file().then(|| output.clone());

        for path in existing
            .into_iter()
            .chain(resume_seed.map(Path::to_path_buf))
            .chain(self.options.inputs.iter().cloned())
        {
            if !candidates.contains(&path) {
                candidates.push(path);
            }
        }
        candidates
    }

    fn scan_all(&self, candidates: &[PathBuf], output: &mut OutputFile, bytes_scanned: &mut u64) -> Result<()> {
        for path in candidates {
            if output.is_complete() {
                tracing::debug!("Target complete, skipping remaining inputs");
                break;
            }
            *bytes_scanned += self.scan_candidate(path, output)?;
        }
        Ok(())
    }

    /// Scan one local file, returning the bytes read
    fn scan_candidate(&self, path: &Path, output: &mut OutputFile) -> Result<u64> {
        let len = fs::metadata(path)?.len();
        if len == 0 {
            tracing::debug!("Skipping empty input {}", path.display());
            return Ok(0);
        }

        let file = File::open(path)?;
        let mut block_matcher = matcher::new_matcher(Arc::clone(output.control()))?;
        let pb = self.progress_bar(len, &format!("Reading {}", path.display()));

        let matched = matcher::scan(
            block_matcher.as_mut(),
            file,
            output,
            self.options.read_buffer_size,
            |n| pb.inc(n),
        )?;
        pb.finish_and_clear();

        tracing::info!(
            "Read {}: {} blocks matched, {} still missing",
            path.display(),
            matched,
            output.blocks_remaining()
        );
        if self.options.json {
            DownloadEvent::Input {
                path: path.to_path_buf(),
                bytes_scanned: len,
                blocks_matched: matched,
            }
            .emit();
        }
        Ok(len)
    }

    fn fetch(
        &self,
        url: &Url,
        ranges: &[ByteRange],
        output: &mut OutputFile,
    ) -> Result<crate::transport::range::FetchStats> {
        let total: u64 = ranges.iter().map(ByteRange::len).sum();
        tracing::info!(
            "Downloading {} in {} ranges from {}",
            format_bytes(total),
            ranges.len(),
            url
        );

        let pb = self.progress_bar(total, "Downloading");
        let mut sink = ProgressSink {
            output,
            progress: &pb,
        };
        let stats = RangeFetcher::new(self.transport, self.control.header().file_length)
            .with_max_ranges(self.options.max_ranges)
            .fetch(url, ranges, &mut sink)?;
        pb.finish_and_clear();

        if self.options.json {
            DownloadEvent::Fetch {
                url: url.to_string(),
                ranges: stats.ranges,
                requests: stats.requests,
                bytes_downloaded: stats.bytes,
            }
            .emit();
        }
        Ok(stats)
    }

    fn progress_bar(&self, len: u64, message: &str) -> ProgressBar {
        if self.options.quiet || self.options.json {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new(len);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} {msg} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );
        pb.set_message(message.to_string());
        pb
    }
}

/// Counts downloaded bytes on the progress bar as they are written
struct ProgressSink<'o, 'p> {
    output: &'o mut OutputFile,
    progress: &'p ProgressBar,
}

impl RangeSink for ProgressSink<'_, '_> {
    fn receive(&mut self, range: ByteRange, data: &mut dyn Read) -> Result<()> {
        self.output.receive(range, data)?;
        self.progress.inc(range.len());
        Ok(())
    }
}

/// Move a leftover `<output>.part` to `<output>.part.seed` so it can be
/// scanned while a fresh `.part` is written
fn take_resume_seed(output: &Path) -> Result<Option<PathBuf>> {
    let part = target::part_path(output);
    if !part.is_file() {
        return Ok(None);
    }

    let mut seed = OsString::from(part.as_os_str());
    seed.push(".seed");
    let seed = PathBuf::from(seed);
    match fs::rename(&part, &seed) {
        Ok(()) => {
            tracing::info!("Resuming from {}", part.display());
            Ok(Some(seed))
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}
