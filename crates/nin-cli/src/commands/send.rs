//! Send command implementation.

use anyhow::{Context, Result};

use nin_core::config::parse_duration;
use nin_core::file::format_size;
use nin_core::peer::Sender;

use super::SendArgs;

/// Run the send command.
pub async fn run(args: SendArgs) -> Result<()> {
    let config = super::load_config();
    let mut options = config.sender_options(&args.path);

    if args.zip {
        options.zip = true;
    }
    if let Some(dir) = args.archive_dir {
        options.archive_dir = dir;
    }
    if args.keep_archive {
        options.delete_archive = false;
    }
    if let Some(limit) = args.listeners {
        options.listener_limit = limit;
    }
    if let Some(delay) = args.delay.as_deref() {
        options.idle_shutdown = parse_duration(delay).context("invalid --delay")?;
    }
    if let Some(port) = args.port {
        options.port = port;
    }
    if args.no_advertise {
        options.advertise = false;
    }

    let sender = Sender::bind(options)
        .await
        .with_context(|| format!("cannot share {}", args.path.display()))?;

    let manifest = sender.manifest();
    println!();
    println!("nin v{}", nin_core::VERSION);
    println!("{}", "-".repeat(37));
    println!();
    println!(
        "  Sharing {} ({}, {} files, {} pieces)",
        manifest.name,
        format_size(manifest.total_length),
        manifest.members.len(),
        manifest.piece_count()
    );
    println!("  Listening on port {}", sender.local_addr().port());
    println!(
        "  Serves up to {} receivers at once. Stops after {}s without receivers.",
        sender.listener_limit(),
        sender.idle_shutdown().as_secs()
    );
    println!("  Press Ctrl+C to stop now.");
    println!();

    let on_interrupt = sender.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            println!();
            println!("  Stopping...");
            if let Err(e) = on_interrupt.shutdown().await {
                tracing::warn!("Shutdown failed: {}", e);
            }
        }
    });

    sender.serve().await.context("sender failed")?;

    println!(
        "  Done. {} receiver(s) finished downloading.",
        sender.finished_count()
    );
    Ok(())
}
