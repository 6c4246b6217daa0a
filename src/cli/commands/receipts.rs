//! Receipt commands.

use console::style;

use crate::cli::helpers::{confirm, format_amount, format_time, truncate};
use crate::config::Settings;

/// List a user's receipts.
pub async fn cmd_receipts_list(settings: &Settings, user: &str) -> anyhow::Result<()> {
    let receipts = settings.create_db_context().receipts().list_for_user(user).await?;

    if receipts.is_empty() {
        println!("{} No receipts for {}", style("!").yellow(), user);
        return Ok(());
    }

    println!("\n{}", style(format!("Receipts for {}", user)).bold());
    println!("{}", "-".repeat(90));
    println!(
        "{:<38} {:<17} {:>10}  Store",
        "ID", "Date", "Total"
    );
    println!("{}", "-".repeat(90));

    for receipt in receipts {
        println!(
            "{:<38} {:<17} {:>10}  {}",
            receipt.id,
            receipt
                .receipt_date
                .as_ref()
                .map(format_time)
                .unwrap_or_else(|| "-".to_string()),
            format_amount(receipt.total_amount),
            truncate(receipt.store_name.as_deref().unwrap_or("-"), 30)
        );
    }

    Ok(())
}

/// Show a receipt and its items.
pub async fn cmd_receipts_show(settings: &Settings, id: &str) -> anyhow::Result<()> {
    let repo = settings.create_db_context().receipts();
    let Some(receipt) = repo.get(id).await? else {
        println!("{} Receipt '{}' not found", style("✗").red(), id);
        return Ok(());
    };

    println!(
        "\n{} {}",
        style(receipt.store_name.as_deref().unwrap_or("Receipt")).bold(),
        receipt.id
    );
    println!("  User:   {}", receipt.user_id);
    if let Some(ref date) = receipt.receipt_date {
        println!("  Date:   {}", format_time(date));
    }
    if let Some(ref uid) = receipt.uid {
        println!("  UID:    {}", uid);
    }
    println!("  Total:  {}", format_amount(receipt.total_amount));

    let items = repo.items(id).await?;
    if !items.is_empty() {
        println!();
        for item in items {
            println!(
                "  {:<40} {:>7} x {:>8} = {:>9}",
                truncate(&item.name, 40),
                item.quantity,
                format_amount(item.unit_price),
                format_amount(Some(item.price))
            );
        }
    }

    Ok(())
}

/// Delete a receipt owned by `user`, together with its items.
pub async fn cmd_receipts_delete(
    settings: &Settings,
    id: &str,
    user: &str,
    confirmed: bool,
) -> anyhow::Result<()> {
    let repo = settings.create_db_context().receipts();

    let Some(receipt) = repo.get(id).await? else {
        println!("{} Receipt '{}' not found", style("✗").red(), id);
        return Ok(());
    };
    if receipt.user_id != user {
        println!(
            "{} Receipt '{}' does not belong to {}",
            style("✗").red(),
            id,
            user
        );
        return Ok(());
    }

    if !confirmed
        && !confirm(&format!(
            "Delete receipt {} ({})?",
            id,
            receipt.store_name.as_deref().unwrap_or("unknown store")
        ))?
    {
        println!("{} Cancelled", style("!").yellow());
        return Ok(());
    }

    if repo.delete(id, user).await? {
        println!("{} Deleted receipt {}", style("✓").green(), id);
    } else {
        println!("{} Receipt '{}' was already gone", style("!").yellow(), id);
    }

    Ok(())
}
