//! Initialize command.

use console::style;

use crate::config::Settings;

/// Initialize the data directory and both databases.
pub async fn cmd_init(settings: &Settings) -> anyhow::Result<()> {
    settings.ensure_directories()?;

    settings.create_db_context().init_schema().await?;
    println!(
        "  {} Server database: {}",
        style("✓").green(),
        settings.database_path().display()
    );

    settings.create_device_context().init_device_schema().await?;
    println!(
        "  {} Device queue: {}",
        style("✓").green(),
        settings.device_database_path().display()
    );

    println!("\n{}", style("Site parsers").bold());
    for entry in settings.registry().entries() {
        println!("  {:<30} {}", entry.host_suffix, entry.parser);
    }

    if settings.server.ingest_secret.is_none() {
        println!(
            "\n{} No ingest secret configured; \
             set server.ingest_secret before running 'receiptscan serve'",
            style("!").yellow()
        );
    }

    println!(
        "\n{} Initialized receiptscan in {}",
        style("✓").green(),
        settings.data_dir.display()
    );

    Ok(())
}
