//! Device-side commands: capture, sync, and queue inspection.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use console::style;

use crate::cli::helpers::{format_time, read_snapshot, truncate};
use crate::config::Settings;
use crate::device::{Delivery, ScanCapture, SyncReconciler, SyncReport, SyncScheduler};
use crate::repository::PendingScanQueue;

async fn open_queue(settings: &Settings) -> anyhow::Result<PendingScanQueue> {
    settings.ensure_directories()?;
    let ctx = settings.create_device_context();
    ctx.init_device_schema().await?;
    Ok(ctx.pending())
}

/// Capture a scanned URL and attempt immediate delivery.
pub async fn cmd_scan(
    settings: &Settings,
    url: &str,
    html: Option<&Path>,
    user: Option<String>,
) -> anyhow::Result<()> {
    let snapshot = read_snapshot(html).await?;
    let queue = open_queue(settings).await?;
    let capture = ScanCapture::new(
        queue,
        Arc::new(settings.ingest_client()?),
        Arc::new(settings.registry()),
    );

    let user = user.or_else(|| settings.device.user_id.clone());
    match capture.capture(url, snapshot, user).await? {
        Delivery::Delivered(ack) if ack.already_exists => println!(
            "{} Already submitted as {}",
            style("✓").green(),
            ack.scanned_url_id
        ),
        Delivery::Delivered(ack) => {
            println!("{} Submitted as {}", style("✓").green(), ack.scanned_url_id)
        }
        Delivery::NoUser => println!(
            "{} Queued; no user is signed in (pass --user or set device.user_id)",
            style("!").yellow()
        ),
        Delivery::AwaitingRender => println!(
            "{} Queued; this site needs a device-rendered snapshot (--html)",
            style("!").yellow()
        ),
        Delivery::Failed(e) => println!(
            "{} Queued for the next sync: {}",
            style("!").yellow(),
            e
        ),
    }

    Ok(())
}

/// Drain the queue once, or keep syncing on a schedule.
pub async fn cmd_sync(
    settings: &Settings,
    daemon: bool,
    interval: Option<u64>,
) -> anyhow::Result<()> {
    let queue = open_queue(settings).await?;
    let reconciler = Arc::new(SyncReconciler::new(
        queue,
        Arc::new(settings.ingest_client()?),
        Arc::new(settings.registry()),
    ));

    if !daemon {
        if !reconciler.submitter().is_reachable().await {
            println!(
                "{} Server at {} is unreachable; nothing sent",
                style("✗").red(),
                settings.device.server_url
            );
            return Ok(());
        }
        let report = reconciler.run_once().await?;
        print_report(&report);
        if !report.is_success() {
            anyhow::bail!("{} scans could not be delivered", report.failed);
        }
        return Ok(());
    }

    let interval = Duration::from_secs(interval.unwrap_or(settings.device.sync_interval).max(1));
    let scheduler = SyncScheduler::new(
        reconciler,
        interval,
        Duration::from_secs(settings.device.max_backoff),
    );

    println!(
        "{} Syncing to {} every {}s",
        style("→").cyan(),
        settings.device.server_url,
        interval.as_secs()
    );
    println!("  Press Ctrl+C to stop");

    scheduler.run(crate::server::shutdown_signal()).await;
    Ok(())
}

/// List queued scans.
pub async fn cmd_queue(settings: &Settings) -> anyhow::Result<()> {
    let queue = open_queue(settings).await?;
    let registry = settings.registry();
    let pending = queue.list().await?;

    if pending.is_empty() {
        println!("{} Queue is empty", style("✓").green());
        return Ok(());
    }

    println!("\n{}", style(format!("Pending scans ({})", pending.len())).bold());
    println!("{}", "-".repeat(90));
    println!("{:<17} {:<12} {:<10} URL", "Captured", "User", "State");
    println!("{}", "-".repeat(90));

    for scan in pending {
        let state = if scan.user_id.is_none() {
            style("no user").yellow()
        } else if scan.html_snapshot.is_none() && registry.requires_snapshot(&scan.url) {
            style("needs html").yellow()
        } else {
            style("ready").green()
        };
        println!(
            "{:<17} {:<12} {:<10} {}",
            format_time(&scan.captured_at),
            truncate(scan.user_id.as_deref().unwrap_or("-"), 12),
            state,
            truncate(&scan.url, 50)
        );
    }

    Ok(())
}

fn print_report(report: &SyncReport) {
    let mark = if report.is_success() {
        style("✓").green()
    } else {
        style("✗").red()
    };
    println!(
        "{} Delivered {}, failed {}, waiting for user {}, waiting for snapshot {}",
        mark, report.delivered, report.failed, report.deferred, report.awaiting_render
    );
    for error in &report.errors {
        println!("  {} {}", style("✗").red(), error);
    }
}
