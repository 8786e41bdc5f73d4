use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::shred::DEFAULT_SHRED_SIZE;

/// Controls workspace scanning behavior (what to skip).
///
/// Note: `.gitignore` is always respected by the scanner; these are
/// additional hard skips for noisy directories.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Directory *names* to skip anywhere in a tree (e.g. "generated").
    pub exclude_dir_names: Vec<String>,
    /// Files larger than this are never shredded.
    pub max_file_bytes: u64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            exclude_dir_names: vec![],
            // 1 MB default — generous for any real source file, blocks
            // minified bundles and logs.
            max_file_bytes: 1_000_000,
        }
    }
}

/// Defaults for a run; every field can be overridden on the command line.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Features per sliding window.
    pub shred_size: usize,
    /// Smallest merged span worth reporting, in lines.
    pub min_size: u32,
    /// Normalization spec in canonical comma-list form.
    pub normalization: String,
    /// Settings that govern file discovery and exclusion.
    pub scan: ScanConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            shred_size: DEFAULT_SHRED_SIZE,
            min_size: 0,
            normalization: "line-oriented".to_string(),
            scan: ScanConfig::default(),
        }
    }
}

pub fn load_config(dir: &Path) -> Config {
    let primary = dir.join(".shredscan.json");

    let text = std::fs::read_to_string(&primary);
    let Ok(text) = text else {
        return Config::default();
    };

    serde_json::from_str::<Config>(&text).unwrap_or_else(|_| Config::default())
}
