mod cli;
mod config;
mod control;
mod delta;
mod error;
mod fs_util;
mod path;
mod sync;
mod transport;

use anyhow::{Context, Result};
use clap::Parser;
use cli::Cli;
use colored::Colorize;
use config::Config;
use control::ControlFile;
use error::format_bytes;
use std::sync::Arc;
use sync::{Session, SessionOptions};
use tracing_subscriber::{fmt, EnvFilter};
use transport::http::HttpClient;

fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Setup logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cli.log_level().as_str()));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    // Validate arguments
    cli.validate()?;

    let config = Config::load(cli.config.as_deref())?;
    let client = HttpClient::new(&config.http)?;

    let data = cli
        .control
        .read(&client)
        .with_context(|| format!("Failed to load control file {}", cli.control))?;
    let control = Arc::new(ControlFile::parse(&data)?);
    let header = control.header();

    let output = cli.output_path(&header.filename)?;
    let target_url = if cli.offline {
        None
    } else {
        Some(cli.control.resolve_target(&header.url, cli.base_url.as_ref())?)
    };

    // Print header (skip if JSON mode)
    if !cli.quiet && !cli.json {
        println!("rzsync v{}", env!("CARGO_PKG_VERSION"));
        println!("Target: {} ({})", output.display(), format_bytes(header.file_length));
        match &target_url {
            Some(url) => println!("Source: {}\n", url),
            None => println!("Mode: Offline (local data only)\n"),
        }
    }

    let options = SessionOptions {
        output: output.clone(),
        inputs: cli.inputs.clone(),
        target_url,
        max_ranges: cli.max_ranges.unwrap_or(config.http.max_ranges_per_request),
        read_buffer_size: config.scan.read_buffer_size,
        quiet: cli.quiet,
        json: cli.json,
    };
    let stats = Session::new(Arc::clone(&control), &client, options).run()?;

    // Print summary (skip if JSON mode - already emitted JSON events)
    if !cli.quiet && !cli.json {
        println!("\n{}\n", "✓ Download complete".green().bold());

        let local_bytes = local_bytes(&control, stats.blocks_local);
        println!("  Blocks total:      {}", stats.blocks_total.to_string().blue());
        println!(
            "  Reused locally:    {} ({})",
            stats.blocks_local.to_string().green(),
            format_bytes(local_bytes)
        );
        if stats.blocks_fetched > 0 {
            println!("  Fetched:           {}", stats.blocks_fetched.to_string().yellow());
        } else {
            println!("  Fetched:           {}", stats.blocks_fetched.to_string().bright_black());
        }

        println!();
        println!("  Bytes scanned:     {}", format_bytes(stats.bytes_scanned).cyan());
        println!(
            "  Bytes downloaded:  {} in {} requests",
            format_bytes(stats.bytes_downloaded).cyan(),
            stats.requests
        );

        let duration_secs = stats.duration.as_secs_f64();
        if duration_secs > 0.0 && stats.bytes_downloaded > 0 {
            let bytes_per_sec = stats.bytes_downloaded as f64 / duration_secs;
            println!("  Transfer rate:     {}", format!("{}/s", format_bytes(bytes_per_sec as u64)).cyan());
        }
        println!("  Duration:          {}", format_duration(stats.duration).cyan());
    }

    Ok(())
}

/// Approximate bytes covered by `blocks` local blocks
fn local_bytes(control: &ControlFile, blocks: usize) -> u64 {
    let header = control.header();
    (blocks as u64 * header.block_size as u64).min(header.file_length)
}

fn format_duration(duration: std::time::Duration) -> String {
    let secs = duration.as_secs();
    let millis = duration.subsec_millis();

    if secs >= 60 {
        let mins = secs / 60;
        let secs = secs % 60;
        if mins >= 60 {
            let hours = mins / 60;
            let mins = mins % 60;
            format!("{}h {}m {}s", hours, mins, secs)
        } else {
            format!("{}m {}s", mins, secs)
        }
    } else if secs > 0 {
        format!("{}.{:03}s", secs, millis)
    } else {
        format!("{}ms", millis)
    }
}
