use std::fs::File;
use std::io::{BufRead, BufReader, Read, Write};
use std::path::Path;

use anyhow::{bail, Context, Result};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::chunk::{ChunkFlags, FileRegistry, LineNum, SortedChunk};
use crate::hash::{HashVal, HASH_LEN, HASH_METHOD};
use crate::shred::ShredOutput;

/// Magic line opening every shred catalogue file.
pub const CATALOG_MAGIC: &str = "#SCF-A 2.0";

/// Metadata block of a catalogue. Two catalogues can only be merged when
/// their hash method, normalization and shred size agree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogMeta {
    pub generator: String,
    pub hash_method: String,
    pub normalization: String,
    pub root: String,
    pub shred_size: usize,
}

#[cfg(not(feature = "large-files"))]
fn write_linenum<W: Write>(out: &mut W, value: LineNum) -> std::io::Result<()> {
    out.write_u16::<BigEndian>(value)
}

#[cfg(feature = "large-files")]
fn write_linenum<W: Write>(out: &mut W, value: LineNum) -> std::io::Result<()> {
    out.write_u32::<BigEndian>(value)
}

#[cfg(not(feature = "large-files"))]
fn read_linenum<R: Read>(reader: &mut R) -> std::io::Result<LineNum> {
    reader.read_u16::<BigEndian>()
}

#[cfg(feature = "large-files")]
fn read_linenum<R: Read>(reader: &mut R) -> std::io::Result<LineNum> {
    reader.read_u32::<BigEndian>()
}

/// Serialize one tree's shred lists. Text header first, then the big-endian
/// binary body, then the total-line trailer.
pub fn write_catalog<W: Write>(
    out: &mut W,
    meta: &CatalogMeta,
    files: &[ShredOutput],
) -> Result<()> {
    writeln!(out, "{CATALOG_MAGIC}")?;
    writeln!(out, "Generator-Program: {}", meta.generator)?;
    writeln!(out, "Hash-Method: {}", meta.hash_method)?;
    writeln!(out, "Normalization: {}", meta.normalization)?;
    writeln!(out, "Root: {}", meta.root)?;
    writeln!(out, "Shred-Size: {}", meta.shred_size)?;
    writeln!(out, "%%")?;

    out.write_u32::<BigEndian>(u32::try_from(files.len())?)?;
    let mut total_lines = 0u64;
    for file in files {
        out.write_all(file.path.as_bytes())?;
        out.write_all(b"\n")?;
        write_linenum(out, file.length)?;
        let chunk_count = LineNum::try_from(file.chunks.len())
            .with_context(|| format!("{}: too many chunks for the catalogue format", file.path))?;
        write_linenum(out, chunk_count)?;
        for chunk in &file.chunks {
            write_linenum(out, chunk.start)?;
            write_linenum(out, chunk.end)?;
            out.write_all(&chunk.hash.0)?;
            out.write_u8(chunk.flags.bits())?;
        }
        total_lines += u64::from(file.length);
    }
    out.write_u32::<BigEndian>(
        u32::try_from(total_lines).context("total line count exceeds the catalogue format")?,
    )?;
    Ok(())
}

/// Sniff whether a path holds a catalogue, by content rather than by name.
pub fn is_catalog_file(path: &Path) -> bool {
    let Ok(mut fp) = File::open(path) else {
        return false;
    };
    let mut magic = [0u8; 7];
    match fp.read_exact(&mut magic) {
        Ok(()) => &magic == b"#SCF-A ",
        Err(_) => false,
    }
}

/// Load a catalogue from disk, registering its file headers (rooted at the
/// catalogue's `Root`) and appending its chunks to the match array.
pub fn read_catalog(
    path: &Path,
    registry: &mut FileRegistry,
    chunks: &mut Vec<SortedChunk>,
) -> Result<CatalogMeta> {
    let fp = File::open(path).with_context(|| format!("cannot open {}", path.display()))?;
    let mut reader = BufReader::new(fp);
    read_catalog_from(&mut reader, &path.display().to_string(), registry, chunks)
}

/// Catalogue reader over any buffered stream; `label` names the source in
/// errors.
pub fn read_catalog_from<R: BufRead>(
    reader: &mut R,
    label: &str,
    registry: &mut FileRegistry,
    chunks: &mut Vec<SortedChunk>,
) -> Result<CatalogMeta> {
    let meta = read_header(reader, label)?;
    if meta.hash_method != HASH_METHOD {
        bail!(
            "{label}: hash method {} is not supported by this build ({HASH_METHOD})",
            meta.hash_method
        );
    }

    let file_count = reader
        .read_u32::<BigEndian>()
        .with_context(|| format!("{label}: truncated catalogue (file count)"))?;

    let mut expected_total = 0u64;
    for _ in 0..file_count {
        let mut name = Vec::new();
        reader
            .read_until(b'\n', &mut name)
            .with_context(|| format!("{label}: truncated catalogue (file path)"))?;
        if name.pop() != Some(b'\n') {
            bail!("{label}: truncated catalogue (unterminated file path)");
        }
        let name = String::from_utf8(name)
            .with_context(|| format!("{label}: file path is not valid UTF-8"))?;
        if name.is_empty() {
            bail!("{label}: empty file path");
        }

        let length = read_linenum(reader)
            .with_context(|| format!("{label}: truncated catalogue ({name}: line count)"))?;
        let chunk_count = read_linenum(reader)
            .with_context(|| format!("{label}: truncated catalogue ({name}: chunk count)"))?;

        let id = registry.add(name.clone(), meta.root.clone());
        registry.set_length(id, length);
        expected_total += u64::from(length);

        for _ in 0..chunk_count {
            let start = read_linenum(reader)
                .with_context(|| format!("{label}: truncated catalogue ({name}: chunk)"))?;
            let end = read_linenum(reader)
                .with_context(|| format!("{label}: truncated catalogue ({name}: chunk)"))?;
            let mut digest = [0u8; HASH_LEN];
            reader
                .read_exact(&mut digest)
                .with_context(|| format!("{label}: truncated catalogue ({name}: digest)"))?;
            let bits = reader
                .read_u8()
                .with_context(|| format!("{label}: truncated catalogue ({name}: flags)"))?;

            let Some(flags) = ChunkFlags::from_bits(bits) else {
                bail!("{label}: {name}: unknown flag bits {bits:#04x}");
            };
            if flags.contains(ChunkFlags::INTERNAL) {
                bail!("{label}: {name}: reserved flag bit set");
            }
            if flags.contains(ChunkFlags::C_CODE) && flags.contains(ChunkFlags::SHELL_CODE) {
                bail!("{label}: {name}: contradictory language bits");
            }
            if start < 1 || start > end {
                bail!("{label}: {name}: chunk range {start}:{end} is out of order");
            }
            chunks.push(SortedChunk {
                start,
                end,
                hash: HashVal(digest),
                flags,
                file: id,
            });
        }
    }

    let trailer = reader
        .read_u32::<BigEndian>()
        .with_context(|| format!("{label}: truncated catalogue (trailer)"))?;
    if u64::from(trailer) != expected_total {
        bail!(
            "{label}: trailer says {trailer} total lines, file headers sum to {expected_total}"
        );
    }

    Ok(meta)
}

fn read_header<R: BufRead>(reader: &mut R, label: &str) -> Result<CatalogMeta> {
    let mut line = String::new();
    reader.read_line(&mut line)?;
    if line.trim_end_matches('\n') != CATALOG_MAGIC {
        bail!("{label} is not an {CATALOG_MAGIC} catalogue");
    }

    let mut generator = None;
    let mut hash_method = None;
    let mut normalization = None;
    let mut root = None;
    let mut shred_size = None;
    loop {
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            bail!("{label}: catalogue header is missing the %% terminator");
        }
        let entry = line.trim_end_matches('\n');
        if entry == "%%" {
            break;
        }
        let Some((key, value)) = entry.split_once(':') else {
            bail!("{label}: malformed header line {entry:?}");
        };
        let value = value.trim_start();
        match key {
            "Generator-Program" => generator = Some(value.to_string()),
            "Hash-Method" => hash_method = Some(value.to_string()),
            "Normalization" => normalization = Some(value.to_string()),
            "Root" => root = Some(value.to_string()),
            "Shred-Size" => {
                shred_size = Some(
                    value
                        .parse::<usize>()
                        .with_context(|| format!("{label}: bad Shred-Size {value:?}"))?,
                );
            }
            _ => {}
        }
    }

    Ok(CatalogMeta {
        generator: generator
            .with_context(|| format!("{label}: header is missing Generator-Program"))?,
        hash_method: hash_method
            .with_context(|| format!("{label}: header is missing Hash-Method"))?,
        normalization: normalization
            .with_context(|| format!("{label}: header is missing Normalization"))?,
        root: root.with_context(|| format!("{label}: header is missing Root"))?,
        shred_size: shred_size
            .with_context(|| format!("{label}: header is missing Shred-Size"))?,
    })
}
