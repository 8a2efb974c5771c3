use anyhow::{anyhow, Result};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Addresses sampled per block when tracking a resource.
pub const DEFAULT_TRACK_CAP: usize = 10;
/// Addresses sampled per block during a discovery pass.
pub const DEFAULT_DISCOVER_CAP: usize = 100;
pub const DEFAULT_TRACK_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_DISCOVER_TIMEOUT: Duration = Duration::from_secs(1);
/// Virtual host presented to edge nodes during discovery.
pub const DEFAULT_DISCOVER_DOMAIN: &str = "www.cloudflare.com";
pub const DEFAULT_BLOCKS_SOURCE: &str = "https://www.cloudflare.com/ips-v4";

/// Block lists older than this are downloaded again.
pub const BLOCKS_MAX_AGE_DAYS: u64 = 30;
/// Alive caches younger than this replace block expansion when tracking.
pub const ALIVE_MAX_AGE_DAYS: u64 = 7;

const HOME_ENV: &str = "CFPINNER_HOME";
const BLOCKS_FILE: &str = "cf_cdn_ips.txt";
const ALIVE_FILE: &str = "alive_ips.txt";

/// On-disk state locations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paths {
    pub dir: PathBuf,
    pub blocks_file: PathBuf,
    pub alive_file: PathBuf,
}

impl Paths {
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref().to_path_buf();
        Self {
            blocks_file: dir.join(BLOCKS_FILE),
            alive_file: dir.join(ALIVE_FILE),
            dir,
        }
    }

    /// `$CFPINNER_HOME`, else `$HOME/.cfpinner`.
    pub fn from_env() -> Result<Self> {
        if let Some(dir) = env::var_os(HOME_ENV).filter(|v| !v.is_empty()) {
            return Ok(Self::in_dir(dir));
        }
        let home = env::var_os("HOME")
            .filter(|v| !v.is_empty())
            .ok_or_else(|| anyhow!("neither {HOME_ENV} nor HOME is set"))?;
        Ok(Self::in_dir(PathBuf::from(home).join(".cfpinner")))
    }

    pub fn ensure_dir(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn files_live_under_the_state_dir() {
        let p = Paths::in_dir("/tmp/cfp");
        assert_eq!(p.blocks_file, PathBuf::from("/tmp/cfp/cf_cdn_ips.txt"));
        assert_eq!(p.alive_file, PathBuf::from("/tmp/cfp/alive_ips.txt"));
    }
}
