use crate::config::{Paths, BLOCKS_MAX_AGE_DAYS};
use crate::lists::{content_lines, file_age_days, save_blocks};
use crate::sampler::{parse_declaration, Declaration};
use anyhow::{bail, Context, Result};
use std::time::Duration;
use tracing::{info, warn};

const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Whether the block list is missing or older than the refresh threshold.
pub fn needs_update(paths: &Paths) -> bool {
    match file_age_days(&paths.blocks_file) {
        Some(age) => age > BLOCKS_MAX_AGE_DAYS,
        None => true,
    }
}

/// Keep the IPv4 declarations of a published block list, in order.
pub fn parse_published(body: &str) -> Vec<String> {
    content_lines(body)
        .filter_map(|(line_no, line)| match parse_declaration(line) {
            Ok(Declaration::V4(block)) => Some(block.to_string()),
            Ok(Declaration::V6(_)) => None,
            Err(e) => {
                warn!("published list line {line_no}: ignoring {line:?}: {e}");
                None
            }
        })
        .collect()
}

/// Download the published block list from `source`.
pub async fn fetch_blocks(source: &str) -> Result<Vec<String>> {
    let client = reqwest::Client::builder()
        .timeout(FETCH_TIMEOUT)
        .user_agent(crate::probe::default_user_agent())
        .build()
        .context("failed to build HTTP client")?;
    let body = client
        .get(source)
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .with_context(|| format!("failed to download address blocks from {source}"))?
        .text()
        .await
        .with_context(|| format!("failed to read address block list from {source}"))?;
    let blocks = parse_published(&body);
    if blocks.is_empty() {
        bail!("{source} returned no IPv4 address blocks");
    }
    info!("downloaded {} IPv4 blocks from {source}", blocks.len());
    Ok(blocks)
}

/// Refresh the block list unless it is still fresh. Returns whether a new
/// list was written.
pub async fn update_blocks(paths: &Paths, source: &str, force: bool) -> Result<bool> {
    if !force && !needs_update(paths) {
        info!(
            "address block list is up to date (age: {} days)",
            file_age_days(&paths.blocks_file).unwrap_or(0)
        );
        return Ok(false);
    }
    let blocks = fetch_blocks(source).await?;
    save_blocks(&paths.blocks_file, &blocks, source)?;
    info!("saved address blocks to {}", paths.blocks_file.display());
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn published_list_keeps_only_ipv4() {
        let body = "173.245.48.0/20\r\n103.21.244.0/22\r\n2400:cb00::/32\r\n\r\n<html>\r\n";
        assert_eq!(parse_published(body), vec!["173.245.48.0/20", "103.21.244.0/22"]);
    }

    #[test]
    fn missing_file_needs_update() {
        let dir = tempfile::tempdir().unwrap();
        assert!(needs_update(&Paths::in_dir(dir.path())));
    }
}
