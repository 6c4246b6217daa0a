//! Job inspection commands.

use chrono::Utc;
use console::style;

use crate::cli::helpers::{format_time, truncate};
use crate::config::Settings;
use crate::models::{JobStatus, ProcessingJob, STUCK_AFTER_MINUTES};

/// List jobs, newest first.
pub async fn cmd_jobs_list(
    settings: &Settings,
    status: Option<JobStatus>,
    limit: i64,
) -> anyhow::Result<()> {
    let ledger = settings.create_db_context().jobs();

    let counts = ledger.count_by_status().await?;
    let summary: Vec<String> = counts
        .iter()
        .map(|(status, count)| format!("{} {}", count, status))
        .collect();

    let jobs = ledger.list(status, limit).await?;
    if jobs.is_empty() {
        println!("{} No jobs found", style("!").yellow());
        return Ok(());
    }

    println!("\n{}", style("Processing Jobs").bold());
    if !summary.is_empty() {
        println!("  {}", summary.join(", "));
    }
    println!("{}", "-".repeat(100));
    println!(
        "{:<38} {:<38} {:<11} {:>3}  Error",
        "Job", "Scanned URL", "Status", "#"
    );
    println!("{}", "-".repeat(100));

    let now = Utc::now();
    let mut stuck = 0;
    for job in jobs {
        let status = match job.status {
            JobStatus::Completed => style(job.status.as_str()).green(),
            JobStatus::Failed => style(job.status.as_str()).red(),
            _ if job.is_stuck(now) => {
                stuck += 1;
                style("stuck").magenta()
            }
            _ => style(job.status.as_str()).yellow(),
        };
        println!(
            "{:<38} {:<38} {:<11} {:>3}  {}",
            job.id,
            job.scanned_url_id,
            status,
            job.attempts,
            truncate(job.error_message.as_deref().unwrap_or(""), 40)
        );
    }

    if stuck > 0 {
        println!(
            "\n{} {} job(s) processing for over {} minutes",
            style("!").yellow(),
            stuck,
            STUCK_AFTER_MINUTES
        );
    }

    Ok(())
}

/// Show one job, looked up by scanned URL id and then by job id.
pub async fn cmd_jobs_show(settings: &Settings, id: &str) -> anyhow::Result<()> {
    let ctx = settings.create_db_context();
    let ledger = ctx.jobs();

    let job = match ledger.get_by_scanned_url(id).await? {
        Some(job) => Some(job),
        None => ledger.get(id).await?,
    };
    let Some(job) = job else {
        println!("{} No job for '{}'", style("✗").red(), id);
        return Ok(());
    };

    print_job(&job);

    if let Some(receipt) = ctx.receipts().get_by_scanned_url(&job.scanned_url_id).await? {
        println!("  Receipt:      {}", style(&receipt.id).green());
    }

    Ok(())
}

fn print_job(job: &ProcessingJob) {
    println!("\n{} {}", style("Job").bold(), job.id);
    println!("  Scanned URL:  {}", job.scanned_url_id);
    if job.is_stuck(Utc::now()) {
        println!("  Status:       {} {}", job.status, style("(stuck)").magenta());
    } else {
        println!("  Status:       {}", job.status);
    }
    println!("  Attempts:     {}", job.attempts);
    if let Some(ref at) = job.last_attempted_at {
        println!("  Last attempt: {}", format_time(at));
    }
    if let Some(kind) = job.error_kind {
        println!("  Error kind:   {}", kind.as_str());
    }
    if let Some(ref message) = job.error_message {
        println!("  Error:        {}", message);
    }
    println!("  Created:      {}", format_time(&job.created_at));
    println!("  Updated:      {}", format_time(&job.updated_at));
}
