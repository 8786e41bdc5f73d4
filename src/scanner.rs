use std::path::Path;

use anyhow::{Context, Result};
use ignore::overrides::{Override, OverrideBuilder};
use ignore::WalkBuilder;

/// Controls file discovery under an input tree.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// Files larger than this are skipped; generated bundles and logs are
    /// noise for source comparison.
    pub max_file_bytes: u64,
    /// Directory *names* to skip anywhere in the tree, compared against path
    /// components, not full paths.
    pub exclude_dir_names: Vec<String>,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            max_file_bytes: 1_000_000,
            exclude_dir_names: vec![],
        }
    }
}

fn default_overrides(tree: &Path, exclude_dir_names: &[String]) -> Result<Override> {
    let mut ob = OverrideBuilder::new(tree);

    // The `!` prefix marks an exclude pattern. Cover both the directory
    // entry and its descendants, otherwise the walker may still descend.
    // VCS metadata and build output never count as source.
    for d in [".git", ".svn", ".hg", "node_modules", "target"] {
        ob.add(&format!("!**/{d}"))?;
        ob.add(&format!("!**/{d}/**"))?;
    }

    for d in exclude_dir_names {
        let d = d.trim().trim_matches('/');
        if d.is_empty() {
            continue;
        }
        ob.add(&format!("!**/{d}"))?;
        ob.add(&format!("!**/{d}/**"))?;
    }

    Ok(ob.build()?)
}

/// List every eligible file under `tree`, sorted by path. Paths come back as
/// given on the command line (tree name first), `/`-separated, so the first
/// component identifies the tree throughout the pipeline.
pub fn list_files(tree: &Path, opts: &ScanOptions) -> Result<Vec<String>> {
    let meta = std::fs::metadata(tree)
        .with_context(|| format!("cannot open {}", tree.display()))?;

    if meta.is_file() {
        if meta.len() == 0 || meta.len() > opts.max_file_bytes {
            return Ok(vec![]);
        }
        return Ok(vec![tree.to_string_lossy().replace('\\', "/")]);
    }

    let overrides = default_overrides(tree, &opts.exclude_dir_names)?;
    let walker = WalkBuilder::new(tree)
        .standard_filters(true) // .gitignore, .ignore, hidden, etc.
        .overrides(overrides)
        .build();

    let mut paths = Vec::new();
    for item in walker {
        let dent = match item {
            Ok(d) => d,
            Err(_) => continue,
        };
        if !dent.file_type().map(|ft| ft.is_file()).unwrap_or(false) {
            continue;
        }
        let bytes = match dent.metadata().map(|m| m.len()) {
            Ok(b) => b,
            Err(_) => continue,
        };
        if bytes == 0 || bytes > opts.max_file_bytes {
            continue;
        }
        paths.push(dent.path().to_string_lossy().replace('\\', "/"));
    }

    paths.sort();
    Ok(paths)
}
