use crate::alive::AliveSet;
use crate::error::{ConfigError, ParseError};
use crate::sampler::{parse_declaration, AddressBlock, Declaration};
use crate::types::now_rfc3339;
use anyhow::{Context, Result};
use std::fs;
use std::io::Write;
use std::net::Ipv4Addr;
use std::path::Path;
use std::time::SystemTime;
use tracing::{info, warn};

/// Effective lines of a list file: trimmed, without blanks and `#` comments.
///
/// Yields `(line_no, line)` with 1-based line numbers.
pub fn content_lines(s: &str) -> impl Iterator<Item = (usize, &str)> {
    s.lines()
        .enumerate()
        .map(|(idx, raw)| (idx + 1, raw.trim()))
        .filter(|(_, line)| !line.is_empty() && !line.starts_with('#'))
}

/// Address blocks loaded from a block list.
#[derive(Debug, Clone, Default)]
pub struct BlockList {
    pub blocks: Vec<AddressBlock>,
    pub skipped_ipv6: usize,
    /// Malformed declarations, skipped.
    pub rejected: Vec<(usize, ParseError)>,
}

/// Parse a block list. Malformed lines are collected rather than failing the
/// whole list.
pub fn parse_blocks_str(s: &str) -> BlockList {
    let mut list = BlockList::default();
    for (line_no, line) in content_lines(s) {
        match parse_declaration(line) {
            Ok(Declaration::V4(block)) => list.blocks.push(block),
            Ok(Declaration::V6(_)) => list.skipped_ipv6 += 1,
            Err(e) => list.rejected.push((line_no, e)),
        }
    }
    list
}

/// Load a block list from disk. An unreadable file or one without a single
/// usable IPv4 block is an error.
pub fn load_blocks_from_path(path: impl AsRef<Path>) -> Result<BlockList> {
    let path = path.as_ref();
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read address block file: {}", path.display()))?;
    let list = parse_blocks_str(&content);
    for (line_no, err) in &list.rejected {
        warn!("{}:{line_no}: skipping declaration: {err}", path.display());
    }
    if list.skipped_ipv6 > 0 {
        info!("skipped {} IPv6 blocks", list.skipped_ipv6);
    }
    if list.blocks.is_empty() {
        return Err(ConfigError::NoTargets)
            .with_context(|| format!("no IPv4 blocks in {}", path.display()));
    }
    info!("loaded {} address blocks from {}", list.blocks.len(), path.display());
    Ok(list)
}

/// Write a block list with a provenance header.
pub fn save_blocks(path: impl AsRef<Path>, lines: &[String], source: &str) -> Result<()> {
    let path = path.as_ref();
    let mut out = String::new();
    out.push_str("# CDN edge address blocks (IPv4 only)\n");
    out.push_str(&format!("# Source: {source}\n"));
    out.push_str(&format!("# Last updated: {}\n\n", now_rfc3339()));
    for line in lines {
        out.push_str(line);
        out.push('\n');
    }
    write_file(path, &out)
        .with_context(|| format!("failed to write address block file: {}", path.display()))
}

/// Parse an alive cache. Lines that are not plain IPv4 addresses are skipped.
pub fn parse_alive_str(s: &str) -> (AliveSet, Vec<(usize, ParseError)>) {
    let mut set = AliveSet::new();
    let mut rejected = Vec::new();
    for (line_no, line) in content_lines(s) {
        match line.parse::<Ipv4Addr>() {
            Ok(ip) => {
                set.insert(ip);
            }
            Err(_) => rejected.push((line_no, ParseError::InvalidAddress(line.to_string()))),
        }
    }
    (set, rejected)
}

pub fn load_alive_from_path(path: impl AsRef<Path>) -> Result<AliveSet> {
    let path = path.as_ref();
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read alive cache: {}", path.display()))?;
    let (set, rejected) = parse_alive_str(&content);
    for (line_no, err) in &rejected {
        warn!("{}:{line_no}: skipping entry: {err}", path.display());
    }
    Ok(set)
}

/// Write the alive set, sorted, after a short header.
pub fn save_alive(path: impl AsRef<Path>, set: &AliveSet) -> Result<()> {
    let path = path.as_ref();
    write_file(path, &render_alive(set, &now_rfc3339()))
        .with_context(|| format!("failed to write alive cache: {}", path.display()))
}

pub fn render_alive(set: &AliveSet, scanned_at: &str) -> String {
    let mut out = String::new();
    out.push_str("# Edge alive addresses\n");
    out.push_str("# Addresses that answered with any HTTP status\n");
    out.push_str(&format!("# Scanned: {scanned_at}\n"));
    out.push_str(&format!("# Total alive: {}\n\n", set.len()));
    for ip in set.to_sorted_vec() {
        out.push_str(&ip.to_string());
        out.push('\n');
    }
    out
}

/// Whole days since the file was last modified, `None` if it is missing.
pub fn file_age_days(path: impl AsRef<Path>) -> Option<u64> {
    let modified = fs::metadata(path).and_then(|m| m.modified()).ok()?;
    let age = SystemTime::now().duration_since(modified).unwrap_or_default();
    Some(age.as_secs() / 86_400)
}

fn write_file(path: &Path, content: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let mut file = fs::File::create(path)?;
    file.write_all(content.as_bytes())?;
    file.flush()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comments_and_blank_lines_are_ignored() {
        let input = "# Cloudflare\n\n  173.245.48.0/20  \n#103.21.244.0/22\n103.22.200.0/22\n";
        let list = parse_blocks_str(input);
        let text: Vec<String> = list.blocks.iter().map(|b| b.to_string()).collect();
        assert_eq!(text, vec!["173.245.48.0/20", "103.22.200.0/22"]);
        assert!(list.rejected.is_empty());
    }

    #[test]
    fn malformed_and_ipv6_lines_are_skipped() {
        let input = "104.16.0.0/13\nnot-a-block\n2606:4700::/32\n10.0.0.0/40\n";
        let list = parse_blocks_str(input);
        assert_eq!(list.blocks.len(), 1);
        assert_eq!(list.skipped_ipv6, 1);
        let lines: Vec<usize> = list.rejected.iter().map(|(n, _)| *n).collect();
        assert_eq!(lines, vec![2, 4]);
    }

    #[test]
    fn alive_cache_round_trips_through_its_header() {
        let set: AliveSet = [Ipv4Addr::new(104, 16, 0, 9), Ipv4Addr::new(104, 16, 0, 2)]
            .into_iter()
            .collect();
        let text = render_alive(&set, "2024-01-01T00:00:00Z");
        assert!(text.starts_with("# Edge alive addresses\n"));
        assert!(text.contains("# Scanned: 2024-01-01T00:00:00Z\n"));
        assert!(text.contains("# Total alive: 2\n"));
        assert!(text.ends_with("104.16.0.2\n104.16.0.9\n"));
        let (parsed, rejected) = parse_alive_str(&text);
        assert_eq!(parsed, set);
        assert!(rejected.is_empty());
    }
}
