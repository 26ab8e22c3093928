use crate::path::Location;
use clap::Parser;
use std::path::{Path, PathBuf};
use url::Url;

fn parse_location(s: &str) -> Result<Location, String> {
    Location::parse(s)
}

fn parse_url(s: &str) -> Result<Url, String> {
    Url::parse(s).map_err(|e| format!("invalid URL '{}': {}", s, e))
}

#[derive(Parser, Debug)]
#[command(name = "rzsync")]
#[command(about = "Download a file described by a .zsync control file, reusing local data", long_about = None)]
#[command(version)]
#[command(after_help = "EXAMPLES:
    # Update an ISO using the previous release as seed
    rzsync -i ubuntu-22.04.3.iso http://releases.example.com/ubuntu-22.04.4.iso.zsync

    # Local control file, relative target URL
    rzsync ubuntu.iso.zsync --base-url http://releases.example.com/

    # Rebuild from local data only, never touching the network
    rzsync app.tar.zsync -i old/app.tar --offline

    # Machine-readable progress
    rzsync http://example.com/app.tar.zsync --json

For more information: https://github.com/nijaru/rzsync")]
pub struct Cli {
    /// Control file (local path or http(s):// URL)
    #[arg(value_parser = parse_location)]
    pub control: Location,

    /// Local file to take matching blocks from (repeatable)
    #[arg(short, long = "input", value_name = "PATH")]
    pub inputs: Vec<PathBuf>,

    /// Output path (default: the control file's Filename in the current directory)
    #[arg(short, long, value_name = "PATH")]
    pub output: Option<PathBuf>,

    /// Base URL for a relative URL in the control file
    #[arg(short = 'u', long, value_parser = parse_url, value_name = "URL")]
    pub base_url: Option<Url>,

    /// Maximum byte ranges per HTTP request (default: from config, 100)
    #[arg(long, value_name = "N")]
    pub max_ranges: Option<usize>,

    /// Use local data only; fail if the target cannot be completed
    #[arg(long)]
    pub offline: bool,

    /// Configuration file (default: ~/.config/rzsync/config.toml)
    #[arg(long, value_name = "PATH", env = "RZSYNC_CONFIG")]
    pub config: Option<PathBuf>,

    /// Verbosity level (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Quiet mode (only show errors)
    #[arg(short, long)]
    pub quiet: bool,

    /// Output newline-delimited JSON events instead of a summary
    #[arg(long)]
    pub json: bool,
}

impl Cli {
    pub fn validate(&self) -> anyhow::Result<()> {
        for input in &self.inputs {
            if !input.exists() {
                anyhow::bail!("Input does not exist: {}", input.display());
            }
            if !input.is_file() {
                anyhow::bail!("Input is not a regular file: {}", input.display());
            }
        }

        if self.max_ranges == Some(0) {
            anyhow::bail!("--max-ranges must be at least 1");
        }

        if let Location::Local(path) = &self.control {
            if !path.is_file() {
                anyhow::bail!("Control file not found: {}", path.display());
            }
        }

        if self.offline && self.base_url.is_some() {
            tracing::warn!("--base-url has no effect with --offline");
        }
        if self.offline && self.control.is_remote() {
            tracing::warn!("--offline still downloads the control file from {}", self.control);
        }

        Ok(())
    }

    pub fn log_level(&self) -> tracing::Level {
        if self.quiet || self.json {
            return tracing::Level::ERROR;
        }

        match self.verbose {
            0 => tracing::Level::INFO,
            1 => tracing::Level::DEBUG,
            _ => tracing::Level::TRACE,
        }
    }

    /// Where to write the target
    ///
    /// Without `--output`, only the last component of `filename` is used so a
    /// hostile control file cannot write outside the current directory.
    pub fn output_path(&self, filename: &str) -> anyhow::Result<PathBuf> {
        if let Some(output) = &self.output {
            return Ok(output.clone());
        }

        // Both separators, whatever the host platform
        let name = filename
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or_default();
        if name.is_empty() || name == "." || name == ".." {
            anyhow::bail!(
                "Control file names no usable output file ({:?}); pass --output",
                filename
            );
        }
        Ok(Path::new(name).to_path_buf())
    }
}
