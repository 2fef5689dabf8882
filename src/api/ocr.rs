use std::{path::Path, process::Stdio, time::Duration};

use anyhow::{Context, Result, bail};
use tokio::process::Command;

use crate::infra::config::OcrConfig;

/// Extracts text from an uploaded prescription with the configured OCR
/// command (`<command> <file> stdout`). Returns `None` when OCR is disabled,
/// fails, or finds no text.
pub async fn extract_text(config: &OcrConfig, file: &Path) -> Option<String> {
    let command = config.command.as_deref()?;
    match run(command, file, Duration::from_secs(config.timeout_secs)).await {
        Ok(text) => normalize(&text),
        Err(err) => {
            tracing::warn!("OCR failed for {}: {:?}", file.display(), err);
            None
        }
    }
}

async fn run(command: &str, file: &Path, timeout: Duration) -> Result<String> {
    let child = Command::new(command)
        .arg(file)
        .arg("stdout")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("Failed to spawn {}", command))?;

    let output = tokio::time::timeout(timeout, child.wait_with_output())
        .await
        .with_context(|| format!("{} timed out after {:?}", command, timeout))?
        .context("Failed to read OCR output")?;

    if !output.status.success() {
        bail!(
            "{} exited with {}: {}",
            command,
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

fn normalize(raw: &str) -> Option<String> {
    let text = raw
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n");
    (!text.is_empty()).then_some(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(command: Option<&str>) -> OcrConfig {
        OcrConfig {
            command: command.map(str::to_string),
            timeout_secs: 5,
        }
    }

    #[test]
    fn normalize_drops_blank_lines() {
        assert_eq!(
            normalize("  Amoxicillin 500mg \n\n\x0c\n  twice daily\n").as_deref(),
            Some("Amoxicillin 500mg\ntwice daily")
        );
        assert_eq!(normalize(" \n\n"), None);
    }

    #[tokio::test]
    async fn disabled_returns_none() {
        assert_eq!(extract_text(&config(None), Path::new("x.png")).await, None);
    }

    #[tokio::test]
    async fn missing_binary_returns_none() {
        let config = config(Some("definitely-not-an-ocr-binary"));
        assert_eq!(extract_text(&config, Path::new("x.png")).await, None);
    }
}
