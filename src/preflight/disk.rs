use anyhow::{Context, Result};
use std::path::Path;

/// Bytes available to unprivileged users on the filesystem holding `path`.
pub async fn available_bytes(path: &Path) -> Result<u64> {
    // df -B1 --output=avail <path>
    let output = tokio::process::Command::new("df")
        .arg("--block-size=1")
        .arg("--output=avail")
        .arg(path)
        .output()
        .await
        .context("Failed to run df")?;

    if !output.status.success() {
        anyhow::bail!(
            "df exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    parse_df_avail(&String::from_utf8_lossy(&output.stdout))
}

/// "Avail\n 123456\n" -> 123456
fn parse_df_avail(stdout: &str) -> Result<u64> {
    let lines: Vec<&str> = stdout.trim().lines().collect();
    if lines.len() < 2 {
        anyhow::bail!("Unexpected df output format");
    }
    lines[lines.len() - 1]
        .trim()
        .parse::<u64>()
        .context("Invalid disk space value")
}

pub fn format_bytes(bytes: u64) -> String {
    const MB: u64 = 1024 * 1024;
    const GB: u64 = 1024 * MB;
    if bytes >= GB {
        format!("{:.1} GiB", bytes as f64 / GB as f64)
    } else {
        format!("{} MiB", bytes / MB)
    }
}
