//! Listen command implementation.

use std::io::{self, Write};
use std::time::Instant;

use anyhow::{Context, Result};
use tokio::sync::watch;

use nin_core::config::parse_duration;
use nin_core::file::format_size;
use nin_core::peer::{Receiver, TransferProgress};

use super::ListenArgs;

/// Run the listen command.
pub async fn run(args: ListenArgs) -> Result<()> {
    let config = super::load_config();
    let mut options = config.receiver_options();

    if let Some(sender) = super::parse_sender(args.sender.as_deref())? {
        options.sender = Some(sender);
    }
    if let Some(max_retry) = args.max_retry {
        options.max_retries = max_retry;
    }
    if let Some(path) = args.path {
        options.download_dir = path;
    }
    if args.no_verify {
        options.verify_checksum = false;
    }
    if let Some(scan_time) = args.scan_time.as_deref() {
        options.discovery.time_limit = parse_duration(scan_time).context("invalid --scan-time")?;
    }

    println!();
    match options.sender {
        Some(addr) => println!("  Connecting to {}...", addr),
        None => println!(
            "  Searching for a sender ({}ms)...",
            options.discovery.time_limit.as_millis()
        ),
    }

    let receiver = Receiver::new(options);
    let progress = tokio::spawn(display_progress(receiver.progress()));
    let start = Instant::now();

    let result = receiver.listen().await;
    let _ = progress.await;

    match result {
        Ok(summary) => {
            let elapsed = start.elapsed();
            println!();
            println!(
                "  Received {} ({}) in {:.1}s",
                summary.manifest.name,
                format_size(summary.bytes),
                elapsed.as_secs_f64()
            );
            println!("  Saved to {}", summary.output_path.display());
            if summary.retries_used > 0 {
                println!("  {} piece(s) had to be re-requested", summary.retries_used);
            }
            if summary.checksum_verified {
                println!("  Checksum verified");
            }
            println!();
            Ok(())
        }
        Err(e) => Err(e).context("transfer failed"),
    }
}

async fn display_progress(mut rx: watch::Receiver<TransferProgress>) {
    let mut started = false;

    while rx.changed().await.is_ok() {
        let progress = *rx.borrow();
        if progress.total_bytes == 0 {
            continue;
        }
        if !started {
            started = true;
            println!("  Downloading {} pieces...", progress.total_pieces);
        }

        print!(
            "\r  [{:>6.2}%] {}/{} - {} retries    ",
            progress.percentage(),
            format_size(progress.completed_bytes),
            format_size(progress.total_bytes),
            progress.retries_used
        );
        let _ = io::stdout().flush();

        if progress.is_complete() {
            break;
        }
    }

    if started {
        println!();
    }
}
