//! Shared helper functions for CLI commands.

use std::io::{self, Write};
use std::path::Path;

use anyhow::Context;
use chrono::{DateTime, Utc};

/// Truncate a string to at most `max_len` characters, adding "..." if cut.
pub fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

/// Read an HTML snapshot file.
pub async fn read_snapshot(path: Option<&Path>) -> anyhow::Result<Option<String>> {
    match path {
        Some(path) => {
            let html = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read snapshot {}", path.display()))?;
            Ok(Some(html))
        }
        None => Ok(None),
    }
}

pub fn format_time(dt: &DateTime<Utc>) -> String {
    dt.format("%Y-%m-%d %H:%M").to_string()
}

pub fn format_amount(amount: Option<f64>) -> String {
    amount
        .map(|a| format!("{:.2}", a))
        .unwrap_or_else(|| "-".to_string())
}

/// Ask a yes/no question on stdin. Anything but "y" declines.
pub fn confirm(prompt: &str) -> anyhow::Result<bool> {
    print!("\n{} [y/N] ", prompt);
    io::stdout().flush()?;
    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(input.trim().eq_ignore_ascii_case("y"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_counts_chars() {
        assert_eq!(truncate("Περίπτερο", 20), "Περίπτερο");
        assert_eq!(truncate("Σουπερμάρκετ Αθηνών", 8), "Σουπε...");
    }

    #[test]
    fn test_format_amount() {
        assert_eq!(format_amount(Some(12.4)), "12.40");
        assert_eq!(format_amount(None), "-");
    }
}
