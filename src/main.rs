use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Parser;

use shredscan::analyzer::Normalization;
use shredscan::catalog::{self, CatalogMeta};
use shredscan::chunk::{FileRegistry, SortedChunk};
use shredscan::config::load_config;
use shredscan::hash::HASH_METHOD;
use shredscan::progress::Progress;
use shredscan::report::{self, ReportMeta};
use shredscan::scanner::ScanOptions;
use shredscan::shred::{shred_tree, tree_name, TreeShred};

const PROGRAM: &str = concat!("shredscan ", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Parser)]
#[command(name = "shredscan")]
#[command(version)]
#[command(about = "Find duplicated source passages across large source trees")]
struct Cli {
    /// Write a shred catalogue per input tree (<tree>.scf) instead of a report
    #[arg(short = 'c')]
    catalog: bool,

    /// Change to this directory before scanning
    #[arg(short = 'd', value_name = "DIR")]
    dir: Option<PathBuf>,

    /// Smallest merged span (in lines) worth reporting
    #[arg(short = 'm', value_name = "SIZE")]
    min_size: Option<u32>,

    /// Disable significance filtering (report boilerplate-only matches too)
    #[arg(short = 'n')]
    no_filter: bool,

    /// Write the report (or catalogue) here instead of stdout
    #[arg(short = 'o', value_name = "FILE")]
    output: Option<PathBuf>,

    /// Shred size: features per sliding window
    #[arg(short = 's', value_name = "SIZE")]
    shred_size: Option<usize>,

    /// Progress and stage timings on stderr
    #[arg(short = 'v')]
    verbose: bool,

    /// Dump the chunk arrays on stderr while processing
    #[arg(short = 'x')]
    debug: bool,

    /// Normalization spec, e.g. "line-oriented, remove-whitespace"
    #[arg(short = 'N', value_name = "SPEC")]
    normalization: Option<String>,

    /// Input source trees and/or .scf catalogues (recognized by content)
    #[arg(value_name = "INPUT", required = true)]
    inputs: Vec<PathBuf>,
}

enum Input {
    Tree(PathBuf),
    Catalog(PathBuf),
}

fn classify_inputs(paths: &[PathBuf]) -> Result<Vec<Input>> {
    paths
        .iter()
        .map(|p| {
            let meta = std::fs::metadata(p)
                .with_context(|| format!("cannot open input {}", p.display()))?;
            if meta.is_file() && catalog::is_catalog_file(p) {
                Ok(Input::Catalog(p.clone()))
            } else {
                Ok(Input::Tree(p.clone()))
            }
        })
        .collect()
}

fn open_output(path: Option<&Path>) -> Result<Box<dyn Write>> {
    match path {
        Some(p) => {
            let fp = File::create(p)
                .with_context(|| format!("cannot create output file {}", p.display()))?;
            Ok(Box::new(BufWriter::new(fp)))
        }
        None => Ok(Box::new(BufWriter::new(std::io::stdout()))),
    }
}

fn catalog_meta(shred: &TreeShred, normalization: &str, shred_size: usize) -> CatalogMeta {
    CatalogMeta {
        generator: PROGRAM.to_string(),
        hash_method: HASH_METHOD.to_string(),
        normalization: normalization.to_string(),
        root: shred.tree.clone(),
        shred_size,
    }
}

fn dump_tree(shred: &TreeShred) {
    for file in &shred.files {
        eprintln!("Chunks for {}:", file.path);
        for (i, c) in file.chunks.iter().enumerate() {
            shredscan::dump_entry!(i, c.hash, file.path, c.start, c.end);
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = load_config(Path::new("."));

    let shred_size = cli.shred_size.unwrap_or(cfg.shred_size);
    if shred_size == 0 {
        bail!("shred size must be at least 1");
    }
    let min_size = cli.min_size.unwrap_or(cfg.min_size);
    let norm_spec = cli
        .normalization
        .clone()
        .unwrap_or_else(|| cfg.normalization.clone());
    let norm = Normalization::parse(&norm_spec)?;
    let norm_desc = norm.describe();

    if let Some(dir) = cli.dir.as_ref() {
        std::env::set_current_dir(dir)
            .with_context(|| format!("cannot change directory to {}", dir.display()))?;
    }

    let mut progress = Progress::new(cli.verbose);
    progress.start();

    let scan = ScanOptions {
        max_file_bytes: cfg.scan.max_file_bytes,
        exclude_dir_names: cfg.scan.exclude_dir_names.clone(),
    };

    let inputs = classify_inputs(&cli.inputs)?;

    // ── Catalogue generation: one <tree>.scf per input ────────────────────
    if cli.catalog {
        for input in &inputs {
            let Input::Tree(tree) = input else {
                bail!("-c expects source trees, not catalogues");
            };
            let shred = shred_tree(tree, norm, shred_size, &scan, &progress)?;
            if cli.debug {
                dump_tree(&shred);
            }
            let out_path = PathBuf::from(format!("{}.scf", shred.tree));
            let fp = File::create(&out_path)
                .with_context(|| format!("cannot create catalogue {}", out_path.display()))?;
            let mut out = BufWriter::new(fp);
            catalog::write_catalog(
                &mut out,
                &catalog_meta(&shred, &norm_desc, shred_size),
                &shred.files,
            )?;
            out.flush()?;
            progress.stage(&format!(
                "Catalogued {} ({} files, {} chunks)",
                shred.tree,
                shred.files.len(),
                shred.chunk_count()
            ));
        }
        return Ok(());
    }

    // ── A single tree and no -c: emit its catalogue on the output stream ──
    if inputs.len() == 1 {
        if let Input::Tree(tree) = &inputs[0] {
            let shred = shred_tree(tree, norm, shred_size, &scan, &progress)?;
            if cli.debug {
                dump_tree(&shred);
            }
            let mut out = open_output(cli.output.as_deref())?;
            catalog::write_catalog(
                &mut out,
                &catalog_meta(&shred, &norm_desc, shred_size),
                &shred.files,
            )?;
            out.flush()?;
            return Ok(());
        }
    }

    // ── Merge run: consolidate chunks from every input ────────────────────
    let mut registry = FileRegistry::new();
    let mut chunks: Vec<SortedChunk> = Vec::new();
    let mut trees: Vec<String> = Vec::new();
    let mut first_catalog: Option<(String, CatalogMeta)> = None;
    let mut scanned_any = false;

    for input in &inputs {
        match input {
            Input::Catalog(path) => {
                // No up-front item count for a catalogue, so a spinner
                // rather than a bar.
                let spinner =
                    progress.spinner(format!("Reading hash list {}", path.display()));
                let before = chunks.len();
                let meta = catalog::read_catalog(path, &mut registry, &mut chunks)?;
                spinner.finish_and_clear();
                progress.stage(&format!(
                    "Read {} ({} entries)",
                    path.display(),
                    chunks.len() - before
                ));
                if let Some((first_name, first)) = &first_catalog {
                    if meta.normalization != first.normalization {
                        bail!(
                            "normalizations of {first_name} and {} don't match",
                            path.display()
                        );
                    }
                    if meta.shred_size != first.shred_size {
                        bail!(
                            "shred sizes of {first_name} and {} don't match",
                            path.display()
                        );
                    }
                    if meta.hash_method != first.hash_method {
                        bail!(
                            "hash methods of {first_name} and {} don't match",
                            path.display()
                        );
                    }
                }
                if first_catalog.is_none() {
                    first_catalog = Some((path.display().to_string(), meta.clone()));
                }
                if !trees.contains(&meta.root) {
                    trees.push(meta.root);
                }
            }
            Input::Tree(tree) => {
                scanned_any = true;
                progress.note(&format!("Reading tree {}", tree_name(tree)));
                let shred = shred_tree(tree, norm, shred_size, &scan, &progress)?;
                progress.stage(&format!(
                    "Read tree {} ({} files, {} entries)",
                    shred.tree,
                    shred.files.len(),
                    shred.chunk_count()
                ));
                let name = shred.tree.clone();
                for file in shred.files {
                    let id = registry.add(file.path, name.clone());
                    registry.set_length(id, file.length);
                    chunks.extend(file.chunks.into_iter().map(|c| SortedChunk::new(c, id)));
                }
                if !trees.contains(&name) {
                    trees.push(name);
                }
            }
        }
    }

    // Freshly scanned trees are shredded with this run's settings; any
    // catalogue in the mix must have been generated the same way.
    if let Some((first_name, meta)) = &first_catalog {
        if scanned_any {
            if meta.normalization != norm_desc {
                bail!(
                    "catalogue {first_name} was normalized as {:?}; rerun with a matching -N",
                    meta.normalization
                );
            }
            if meta.shred_size != shred_size {
                bail!(
                    "catalogue {first_name} used shred size {}; rerun with a matching -s",
                    meta.shred_size
                );
            }
        }
    }

    progress.stage(&format!("Hash merge done, {} entries", chunks.len()));
    if cli.debug {
        report::dump_chunks("Consolidated hash list", &chunks, &registry);
    }

    report::sort_chunks(&mut chunks, &registry);
    progress.stage("Sort done");
    if cli.debug {
        report::dump_chunks("Chunk list before reduction", &chunks, &registry);
    }

    let dropped = report::prune_unique(&mut chunks);
    progress.stage(&format!("Uniqueness prune done, {dropped} entries dropped"));

    let mut groups = report::extract_cliques(&chunks, &registry);
    progress.stage(&format!(
        "{} range groups after removing unique hashes",
        groups.len()
    ));

    report::merge_groups(&mut chunks, &mut groups, &registry);
    progress.stage(&format!("{} range groups after merging", groups.len()));

    report::filter_groups(&chunks, &mut groups, min_size, !cli.no_filter);
    report::sort_groups(&chunks, &mut groups, &registry);

    let meta = ReportMeta {
        filtering: !cli.no_filter,
        hash_method: first_catalog
            .as_ref()
            .map(|(_, m)| m.hash_method.clone())
            .unwrap_or_else(|| HASH_METHOD.to_string()),
        merge_program: PROGRAM.to_string(),
        normalization: first_catalog
            .as_ref()
            .map(|(_, m)| m.normalization.clone())
            .unwrap_or(norm_desc),
        shred_size: first_catalog
            .as_ref()
            .map(|(_, m)| m.shred_size)
            .unwrap_or(shred_size),
    };
    let stats = report::tree_stats(&chunks, &groups, &registry, &trees);

    let mut out = open_output(cli.output.as_deref())?;
    report::write_report(&mut out, &meta, &stats, &chunks, &groups, &registry)?;
    out.flush()?;
    Ok(())
}
