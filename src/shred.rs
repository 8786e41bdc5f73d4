use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{bail, Context, Result};
use rayon::prelude::*;

use crate::analyzer::{mode_for_path, Feature, FeatureSource, LineAnalyzer, Normalization};
use crate::chunk::{Chunk, ChunkFlags, LineNum};
use crate::hash::Hasher;
use crate::progress::Progress;
use crate::scanner::{self, ScanOptions};

pub const DEFAULT_SHRED_SIZE: usize = 5;

/// Shred list for one scanned file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShredOutput {
    /// Tree-relative path, `/`-separated, first component names the tree.
    pub path: String,
    /// Physical line count at end of scan.
    pub length: LineNum,
    pub chunks: Vec<Chunk>,
}

/// Shred lists for every eligible file under one tree, in path order.
#[derive(Debug)]
pub struct TreeShred {
    pub tree: String,
    pub files: Vec<ShredOutput>,
}

impl TreeShred {
    pub fn chunk_count(&self) -> usize {
        self.files.iter().map(|f| f.chunks.len()).sum()
    }
}

/// Slide a window of `shred_size` features over one file's feature stream,
/// emitting a chunk per window position. A file shorter than the window
/// yields a single chunk covering whatever was accepted.
pub fn shred_stream(
    source: &mut dyn FeatureSource,
    file: &str,
    reader: &mut dyn BufRead,
    shred_size: usize,
) -> Result<Vec<Chunk>> {
    let mut window: Vec<Feature> = Vec::with_capacity(shred_size);
    let mut chunks: Vec<Chunk> = Vec::new();
    let mut accepted = 0usize;

    while let Some(feature) = source.next(file, reader)? {
        if feature.trailing_brace {
            // The closing brace is part of whatever the last chunk covers
            // even though it contributes nothing to the hash.
            if let Some(last) = chunks.last_mut() {
                last.end = feature.line;
            }
            continue;
        }
        accepted += 1;
        window.push(feature);
        if window.len() == shred_size {
            chunks.push(emit(&window, source.mode()));
            window.remove(0);
        }
    }
    if accepted > 0 && accepted < shred_size {
        chunks.push(emit(&window, source.mode()));
    }
    Ok(chunks)
}

fn emit(window: &[Feature], mode: ChunkFlags) -> Chunk {
    let mut hasher = Hasher::new();
    let mut flags = mode & ChunkFlags::CATEGORIZED;
    let mut all_insignificant = true;
    for feature in window {
        hasher.update(feature.text.as_bytes());
        flags |= feature.flags & !ChunkFlags::INSIGNIFICANT;
        if !feature.flags.contains(ChunkFlags::INSIGNIFICANT) {
            all_insignificant = false;
        }
    }
    // A chunk is boilerplate only when every line in it is.
    if all_insignificant {
        flags |= ChunkFlags::INSIGNIFICANT;
    }
    Chunk {
        start: window[0].line,
        end: window[window.len() - 1].line,
        hash: hasher.finish(),
        flags,
    }
}

/// Shred a single file. `rel` is the tree-relative path used for language
/// classification and reporting; the file is opened at `abs`.
pub fn shred_file(
    abs: &Path,
    rel: &str,
    norm: Normalization,
    shred_size: usize,
) -> Result<ShredOutput> {
    let fp = File::open(abs).with_context(|| format!("cannot open {}", abs.display()))?;
    let mut reader = BufReader::new(fp);
    let mut analyzer = LineAnalyzer::new(norm);
    analyzer.set_mode(mode_for_path(rel));
    let chunks = shred_stream(&mut analyzer, rel, &mut reader, shred_size)?;
    Ok(ShredOutput {
        path: rel.to_string(),
        length: analyzer.line_count(),
        chunks,
    })
}

/// Shred every eligible file under `tree`. Files are shredded in parallel
/// but collected in sorted path order, so the result is deterministic.
pub fn shred_tree(
    tree: &Path,
    norm: Normalization,
    shred_size: usize,
    scan: &ScanOptions,
    progress: &Progress,
) -> Result<TreeShred> {
    let name = tree_name(tree);
    let paths = scanner::list_files(tree, scan)?;
    if paths.is_empty() {
        bail!("no eligible files under {}", tree.display());
    }

    let bar = progress.bar(paths.len() as u64, format!("Reading tree {name}"));
    let files: Result<Vec<ShredOutput>> = paths
        .par_iter()
        .map(|rel| {
            let out = shred_file(Path::new(rel), rel, norm, shred_size);
            bar.inc(1);
            out
        })
        .collect();
    let files = files?;
    bar.finish_and_clear();

    Ok(TreeShred { tree: name, files })
}

/// Tree name as the user gave it, trailing separators trimmed.
pub fn tree_name(tree: &Path) -> String {
    tree.to_string_lossy()
        .replace('\\', "/")
        .trim_end_matches('/')
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::LineAnalyzer;
    use std::io::BufReader;

    fn shred_text(input: &str, norm: Normalization, mode: ChunkFlags, size: usize) -> Vec<Chunk> {
        let mut analyzer = LineAnalyzer::new(norm);
        analyzer.set_mode(mode);
        let mut reader = BufReader::new(input.as_bytes());
        shred_stream(&mut analyzer, "test.c", &mut reader, size).unwrap()
    }

    fn lines(n: usize) -> String {
        (1..=n).map(|i| format!("call_site_{i}(arg);\n")).collect()
    }

    #[test]
    fn window_count_is_features_minus_size_plus_one() {
        let chunks = shred_text(&lines(20), Normalization::default(), ChunkFlags::empty(), 5);
        assert_eq!(chunks.len(), 16);
        assert_eq!((chunks[0].start, chunks[0].end), (1, 5));
        assert_eq!((chunks[15].start, chunks[15].end), (16, 20));
    }

    #[test]
    fn short_file_emits_one_covering_chunk() {
        let chunks = shred_text(&lines(3), Normalization::default(), ChunkFlags::empty(), 5);
        assert_eq!(chunks.len(), 1);
        assert_eq!((chunks[0].start, chunks[0].end), (1, 3));
    }

    #[test]
    fn empty_input_emits_nothing() {
        let chunks = shred_text("", Normalization::default(), ChunkFlags::empty(), 5);
        assert!(chunks.is_empty());
    }

    #[test]
    fn window_hash_covers_exactly_the_window_texts() {
        let chunks = shred_text(&lines(6), Normalization::default(), ChunkFlags::empty(), 5);
        let expected = crate::hash::hash_buffers(&[
            "call_site_1(arg);\n",
            "call_site_2(arg);\n",
            "call_site_3(arg);\n",
            "call_site_4(arg);\n",
            "call_site_5(arg);\n",
        ]);
        assert_eq!(chunks[0].hash, expected);
        assert_ne!(chunks[1].hash, expected);
    }

    #[test]
    fn identical_windows_collide() {
        let a = shred_text(&lines(5), Normalization::default(), ChunkFlags::empty(), 5);
        let b = shred_text(&lines(5), Normalization::default(), ChunkFlags::empty(), 5);
        assert_eq!(a[0].hash, b[0].hash);
    }

    #[test]
    fn trailing_brace_extends_the_last_chunk() {
        let norm = Normalization {
            remove_whitespace: true,
            remove_braces: true,
            ..Normalization::default()
        };
        // Lines: f() / { (skipped) / 3 body lines / }
        let input = "f(a, b)\n{\nstep_one(a);\nstep_two(b);\nfinish(a, b);\n}\n";
        let chunks = shred_text(input, norm, ChunkFlags::C_CODE, 4);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].start, 1);
        assert_eq!(chunks[0].end, 6, "closing brace line must extend the chunk");
    }

    #[test]
    fn chunk_is_insignificant_only_when_every_feature_is() {
        let mixed = shred_text(
            "break;\ncompute_totals(ledger);\n",
            Normalization::default(),
            ChunkFlags::C_CODE,
            2,
        );
        assert!(!mixed[0].flags.contains(ChunkFlags::INSIGNIFICANT));

        let pure = shred_text(
            "break;\ncontinue;\n",
            Normalization::default(),
            ChunkFlags::C_CODE,
            2,
        );
        assert!(pure[0].flags.contains(ChunkFlags::INSIGNIFICANT));
    }

    #[test]
    fn chunks_carry_the_language_mode_bit() {
        let chunks = shred_text(&lines(5), Normalization::default(), ChunkFlags::C_CODE, 5);
        assert!(chunks[0].flags.contains(ChunkFlags::C_CODE));
        assert!(!chunks[0].flags.contains(ChunkFlags::SHELL_CODE));
    }
}
