//! partdl CLI - command-line interface
//!
//! This binary wires the partdl library to flags, a terminal progress
//! bar, and Ctrl-C handling. All download logic lives in the library.

use std::process;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use partdl::{DownloadConfig, Downloader};

#[derive(Parser)]
#[command(name = "partdl")]
#[command(about = "Download a file over HTTP with parallel range workers", long_about = None)]
struct Args {
    /// URL of the file to download
    url: String,

    /// Output file name (defaults to the URL's last path segment)
    #[arg(short, long)]
    output: Option<String>,

    /// Number of parallel range workers (0 = logical CPU count)
    #[arg(short, long, default_value_t = 0)]
    concurrency: usize,

    /// Directory for part file caches
    #[arg(long, default_value = partdl::config::DEFAULT_BASE_DIR)]
    cache_dir: String,

    /// Start from scratch instead of resuming existing part files
    #[arg(long)]
    no_resume: bool,

    /// Suppress the progress bar
    #[arg(short, long)]
    quiet: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut config = DownloadConfig::for_url(&args.url)
        .with_base_dir(&args.cache_dir)
        .with_concurrency(args.concurrency)
        .with_resume(!args.no_resume);
    if let Some(output) = args.output {
        config = config.with_file_name(output);
    }
    let resume = config.resume;

    let downloader = Arc::new(Downloader::with_config(&args.url, config));
    if !args.quiet {
        attach_progress_bar(&downloader);
    }

    let runner = Arc::clone(&downloader);
    let mut run = tokio::spawn(async move { runner.start().await });

    tokio::select! {
        result = &mut run => {
            result.context("download task failed")??;
        }

        _ = tokio::signal::ctrl_c() => {
            eprintln!("interrupt received, stopping download...");
            if let Err(e) = downloader.stop() {
                debug!(error = %e, "stop after interrupt");
            }
            // Let the workers quiesce so partial parts land on disk.
            let _ = run.await;
            if resume {
                eprintln!("partial parts kept; rerun the same command to resume");
            }
            process::exit(130);
        }
    }

    Ok(())
}

/// Render download progress on stderr.
///
/// The bar stays hidden until the start callback reports a total, then
/// tracks loaded bytes with the sink's rate string as the message.
fn attach_progress_bar(downloader: &Downloader) {
    let bar = ProgressBar::hidden();
    if let Ok(style) = ProgressStyle::with_template(
        "[{elapsed_precise}] {wide_bar} {bytes}/{total_bytes} {msg}",
    ) {
        bar.set_style(style.progress_chars("##-"));
    }

    let start_bar = bar.clone();
    downloader.on_download_start(move |total, file_name| {
        eprintln!("downloading {file_name}");
        if total > 0 {
            start_bar.set_length(total);
        }
        start_bar.set_draw_target(ProgressDrawTarget::stderr());
    });

    let progress_bar = bar.clone();
    downloader.on_progress(move |loaded, _, rate| {
        progress_bar.set_position(loaded);
        progress_bar.set_message(rate.to_string());
    });

    let finish_bar = bar.clone();
    downloader.on_download_finished(move |file_name| {
        finish_bar.finish_and_clear();
        eprintln!("finished: {file_name}");
    });

    downloader.on_download_canceled(move |file_name| {
        bar.finish_and_clear();
        eprintln!("canceled: {file_name}");
    });
}
