use std::cmp::Ordering;
use std::io::Write;

use anyhow::Result;

use crate::chunk::{ChunkFlags, FileRegistry, SortedChunk};

/// Magic line opening every report.
pub const REPORT_MAGIC: &str = "#SCF-B 2.0";

/// A clique that survived same-tree suppression: `len` consecutive entries
/// of the sorted chunk array, starting at `start`. Merging widens the member
/// ranges in place and retires absorbed groups by zeroing `len`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchGroup {
    pub start: usize,
    pub len: usize,
}

/// Stage 1: stable sort by (hash, file path). The secondary key makes output
/// deterministic and groups same-tree members adjacently within a clique.
pub fn sort_chunks(chunks: &mut [SortedChunk], registry: &FileRegistry) {
    chunks.sort_by(|a, b| {
        a.hash
            .cmp(&b.hash)
            .then_with(|| registry.path(a.file).cmp(registry.path(b.file)))
    });
}

/// Stage 2: mark hash singletons as engine-internal and compact them away.
/// Pure optimization; a singleton can never be part of a clique. Returns the
/// number of entries dropped.
pub fn prune_unique(chunks: &mut Vec<SortedChunk>) -> usize {
    let total = chunks.len();
    for i in 0..total {
        let matches_prev = i > 0 && chunks[i - 1].hash == chunks[i].hash;
        let matches_next = i + 1 < total && chunks[i + 1].hash == chunks[i].hash;
        if !matches_prev && !matches_next {
            chunks[i].flags |= ChunkFlags::INTERNAL;
        }
    }
    chunks.retain(|c| !c.flags.contains(ChunkFlags::INTERNAL));
    total - chunks.len()
}

/// Stage 3: walk maximal equal-hash runs and keep the heterogeneous ones.
/// A clique whose members all come from one tree is copying we were asked
/// not to care about.
pub fn extract_cliques(chunks: &[SortedChunk], registry: &FileRegistry) -> Vec<MatchGroup> {
    let mut groups = Vec::new();
    let mut i = 0;
    while i < chunks.len() {
        let mut j = i + 1;
        while j < chunks.len() && chunks[j].hash == chunks[i].hash {
            j += 1;
        }
        if j - i >= 2 {
            let first_tree = registry.tree(chunks[i].file);
            let homogeneous = chunks[i..j]
                .iter()
                .all(|m| registry.tree(m.file) == first_tree);
            if !homogeneous {
                groups.push(MatchGroup {
                    start: i,
                    len: j - i,
                });
            }
        }
        i = j;
    }
    groups
}

fn tuple_order(
    chunks: &[SortedChunk],
    registry: &FileRegistry,
    a: &MatchGroup,
    b: &MatchGroup,
) -> Ordering {
    a.len.cmp(&b.len).then_with(|| {
        for k in 0..a.len {
            let pa = registry.path(chunks[a.start + k].file);
            let pb = registry.path(chunks[b.start + k].file);
            match pa.cmp(pb) {
                Ordering::Equal => continue,
                other => return other,
            }
        }
        Ordering::Equal
    })
}

fn same_tuple(
    chunks: &[SortedChunk],
    registry: &FileRegistry,
    a: &MatchGroup,
    b: &MatchGroup,
) -> bool {
    a.len == b.len
        && (0..a.len).all(|k| {
            registry.path(chunks[a.start + k].file) == registry.path(chunks[b.start + k].file)
        })
}

/// Attempt to merge `b` into `a`: the groups are known to pair the same
/// files position by position; the line intervals must overlap in the same
/// direction at every position. On success `a`'s ranges widen and
/// significance heals: a significant member of `b` clears the
/// INSIGNIFICANT bit on `a`'s counterpart.
fn try_merge(chunks: &mut [SortedChunk], a: MatchGroup, b: MatchGroup) -> bool {
    let a_in_b = (0..a.len).all(|k| {
        let s = &chunks[a.start + k];
        let t = &chunks[b.start + k];
        s.start >= t.start && s.start <= t.end
    });
    let b_in_a = (0..a.len).all(|k| {
        let s = &chunks[b.start + k];
        let t = &chunks[a.start + k];
        s.start >= t.start && s.start <= t.end
    });
    if !a_in_b && !b_in_a {
        return false;
    }

    for k in 0..a.len {
        let (b_start, b_end, b_flags) = {
            let t = &chunks[b.start + k];
            (t.start, t.end, t.flags)
        };
        let s = &mut chunks[a.start + k];
        s.start = s.start.min(b_start);
        s.end = s.end.max(b_end);
        if !b_flags.contains(ChunkFlags::INSIGNIFICANT) {
            s.flags.remove(ChunkFlags::INSIGNIFICANT);
        }
    }
    true
}

/// Stage 4: coalesce overlapping groups into maximal spans. Groups are first
/// sorted by (width, file tuple) so only groups inside the same span can
/// possibly pair-match; within a span, passes repeat until nothing merges.
pub fn merge_groups(
    chunks: &mut [SortedChunk],
    groups: &mut Vec<MatchGroup>,
    registry: &FileRegistry,
) {
    groups.sort_by(|a, b| tuple_order(chunks, registry, a, b));

    let mut base = 0;
    while base < groups.len() {
        let mut span_end = base + 1;
        while span_end < groups.len()
            && same_tuple(chunks, registry, &groups[base], &groups[span_end])
        {
            span_end += 1;
        }

        loop {
            let mut merged_any = false;
            for a in base..span_end {
                if groups[a].len == 0 {
                    continue;
                }
                for b in (a + 1)..span_end {
                    if groups[b].len == 0 {
                        continue;
                    }
                    if try_merge(chunks, groups[a], groups[b]) {
                        groups[b].len = 0;
                        merged_any = true;
                    }
                }
            }
            if !merged_any {
                break;
            }
        }

        base = span_end;
    }

    groups.retain(|g| g.len > 0);
}

/// Stage 5: size and significance filtering. A group goes when its widest
/// member span is still below `min_size`, or (with filtering on) when every
/// member is boilerplate.
pub fn filter_groups(
    chunks: &[SortedChunk],
    groups: &mut Vec<MatchGroup>,
    min_size: u32,
    filtering: bool,
) {
    groups.retain(|g| {
        let members = &chunks[g.start..g.start + g.len];
        let widest = members
            .iter()
            .map(|m| u32::from(m.end - m.start) + 1)
            .max()
            .unwrap_or(0);
        if widest < min_size {
            return false;
        }
        if filtering
            && members
                .iter()
                .all(|m| m.flags.contains(ChunkFlags::INSIGNIFICANT))
        {
            return false;
        }
        true
    });
}

/// Stage 6: order surviving groups by their first member for stable output.
pub fn sort_groups(chunks: &[SortedChunk], groups: &mut [MatchGroup], registry: &FileRegistry) {
    groups.sort_by(|a, b| {
        let ca = &chunks[a.start];
        let cb = &chunks[b.start];
        registry
            .path(ca.file)
            .cmp(registry.path(cb.file))
            .then(ca.start.cmp(&cb.start))
    });
}

/// Report preamble settings.
#[derive(Debug, Clone)]
pub struct ReportMeta {
    pub filtering: bool,
    pub hash_method: String,
    pub merge_program: String,
    pub normalization: String,
    pub shred_size: usize,
}

/// Per-tree summary counters for the report preamble.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeStats {
    pub name: String,
    pub matches: usize,
    pub matchlines: u64,
    pub totallines: u64,
}

/// Summarize the surviving groups per input tree, in input order.
pub fn tree_stats(
    chunks: &[SortedChunk],
    groups: &[MatchGroup],
    registry: &FileRegistry,
    trees: &[String],
) -> Vec<TreeStats> {
    trees
        .iter()
        .map(|name| {
            let mut matches = 0usize;
            let mut matchlines = 0u64;
            for g in groups {
                let mut hit = false;
                for m in &chunks[g.start..g.start + g.len] {
                    if registry.tree(m.file) == name.as_str() {
                        hit = true;
                        matchlines += u64::from(m.end - m.start) + 1;
                    }
                }
                if hit {
                    matches += 1;
                }
            }
            TreeStats {
                name: name.clone(),
                matches,
                matchlines,
                totallines: registry.total_lines(name),
            }
        })
        .collect()
}

/// Emit the final report: preamble, per-tree counters, then one block per
/// match group with a member line per occurrence.
pub fn write_report<W: Write>(
    out: &mut W,
    meta: &ReportMeta,
    stats: &[TreeStats],
    chunks: &[SortedChunk],
    groups: &[MatchGroup],
    registry: &FileRegistry,
) -> Result<()> {
    writeln!(out, "{REPORT_MAGIC}")?;
    writeln!(
        out,
        "Filtering: {}",
        if meta.filtering { "language" } else { "none" }
    )?;
    writeln!(out, "Hash-Method: {}", meta.hash_method)?;
    writeln!(out, "Matches: {}", groups.len())?;
    writeln!(out, "Merge-Program: {}", meta.merge_program)?;
    writeln!(out, "Normalization: {}", meta.normalization)?;
    writeln!(out, "Shred-Size: {}", meta.shred_size)?;
    writeln!(out, "%%")?;
    for s in stats {
        writeln!(
            out,
            "{}: matches={}, matchlines={}, totallines={}",
            s.name, s.matches, s.matchlines, s.totallines
        )?;
    }
    writeln!(out, "%%")?;
    for g in groups {
        for m in &chunks[g.start..g.start + g.len] {
            let header = registry.get(m.file);
            writeln!(out, "{}:{}:{}:{}", header.path, m.start, m.end, header.length)?;
        }
        writeln!(out, "%%")?;
    }
    Ok(())
}

/// Dump a chunk array to stderr, one line per entry.
pub fn dump_chunks(label: &str, chunks: &[SortedChunk], registry: &FileRegistry) {
    eprintln!("{label}:");
    for (i, c) in chunks.iter().enumerate() {
        crate::dump_entry!(i, c.hash, registry.path(c.file), c.start, c.end, c.flags.bits());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::LineNum;
    use crate::hash::{hash_buffers, HashVal};

    fn chunk(
        reg_path: (&str, u32),
        start: LineNum,
        end: LineNum,
        hash: HashVal,
        flags: ChunkFlags,
    ) -> SortedChunk {
        SortedChunk {
            start,
            end,
            hash,
            flags,
            file: reg_path.1,
        }
    }

    fn registry(entries: &[(&str, &str)]) -> FileRegistry {
        let mut reg = FileRegistry::new();
        for (path, tree) in entries {
            let id = reg.add(path.to_string(), tree.to_string());
            reg.set_length(id, 100);
        }
        reg
    }

    fn h(text: &str) -> HashVal {
        hash_buffers(&[text])
    }

    #[test]
    fn sorting_orders_by_hash_then_path_and_is_stable() {
        let reg = registry(&[("a/x.c", "a"), ("b/y.c", "b")]);
        let mut chunks = vec![
            chunk(("b/y.c", 1), 10, 14, h("same"), ChunkFlags::empty()),
            chunk(("a/x.c", 0), 1, 5, h("same"), ChunkFlags::empty()),
            chunk(("a/x.c", 0), 7, 11, h("same"), ChunkFlags::empty()),
        ];
        sort_chunks(&mut chunks, &reg);
        assert_eq!(chunks[0].file, 0);
        assert_eq!(chunks[1].file, 0);
        assert_eq!(chunks[2].file, 1);
        // Stable: equal (hash, path) entries keep insertion order.
        assert_eq!((chunks[0].start, chunks[1].start), (1, 7));
    }

    #[test]
    fn pruning_removes_only_singletons() {
        let reg = registry(&[("a/x.c", "a")]);
        let mut chunks = vec![
            chunk(("a/x.c", 0), 1, 5, h("lonely"), ChunkFlags::empty()),
            chunk(("a/x.c", 0), 2, 6, h("pair"), ChunkFlags::empty()),
            chunk(("a/x.c", 0), 3, 7, h("pair"), ChunkFlags::empty()),
            chunk(("a/x.c", 0), 4, 8, h("single"), ChunkFlags::empty()),
        ];
        sort_chunks(&mut chunks, &reg);
        let dropped = prune_unique(&mut chunks);
        assert_eq!(dropped, 2);
        assert_eq!(chunks.len(), 2);
        assert!(chunks.iter().all(|c| c.hash == h("pair")));
    }

    #[test]
    fn same_tree_cliques_are_suppressed() {
        let reg = registry(&[("a/x.c", "a"), ("a/y.c", "a"), ("b/z.c", "b")]);
        let mut chunks = vec![
            chunk(("a/x.c", 0), 1, 5, h("intra"), ChunkFlags::empty()),
            chunk(("a/y.c", 1), 1, 5, h("intra"), ChunkFlags::empty()),
            chunk(("a/x.c", 0), 10, 14, h("inter"), ChunkFlags::empty()),
            chunk(("b/z.c", 2), 3, 7, h("inter"), ChunkFlags::empty()),
        ];
        sort_chunks(&mut chunks, &reg);
        prune_unique(&mut chunks);
        let groups = extract_cliques(&chunks, &reg);
        assert_eq!(groups.len(), 1, "only the cross-tree clique survives");
        let members = &chunks[groups[0].start..groups[0].start + groups[0].len];
        assert!(members.iter().any(|m| reg.tree(m.file) == "a"));
        assert!(members.iter().any(|m| reg.tree(m.file) == "b"));
    }

    #[test]
    fn mixed_tree_cliques_survive_even_with_repeats() {
        let reg = registry(&[("a/x.c", "a"), ("a/y.c", "a"), ("b/z.c", "b")]);
        let mut chunks = vec![
            chunk(("a/x.c", 0), 1, 5, h("triple"), ChunkFlags::empty()),
            chunk(("a/y.c", 1), 1, 5, h("triple"), ChunkFlags::empty()),
            chunk(("b/z.c", 2), 1, 5, h("triple"), ChunkFlags::empty()),
        ];
        sort_chunks(&mut chunks, &reg);
        let groups = extract_cliques(&chunks, &reg);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].len, 3);
    }

    /// Overlapping sliding-window groups collapse into one maximal span.
    #[test]
    fn overlapping_groups_merge_into_maximal_spans() {
        let reg = registry(&[("a/x.c", "a"), ("b/y.c", "b")]);
        // Three window positions of the same two-file duplicate, shifted by
        // ten lines in b/y.c, plus hash order deliberately scrambled.
        let mut chunks = Vec::new();
        let mut groups = Vec::new();
        for (i, text) in ["w2", "w0", "w1"].iter().enumerate() {
            let offset: LineNum = match *text {
                "w0" => 0,
                "w1" => 1,
                _ => 2,
            };
            chunks.push(chunk(("a/x.c", 0), 1 + offset, 5 + offset, h(text), ChunkFlags::empty()));
            chunks.push(chunk(
                ("b/y.c", 1),
                11 + offset,
                15 + offset,
                h(text),
                ChunkFlags::empty(),
            ));
            groups.push(MatchGroup {
                start: i * 2,
                len: 2,
            });
        }

        merge_groups(&mut chunks, &mut groups, &reg);
        assert_eq!(groups.len(), 1);
        let g = groups[0];
        let a = &chunks[g.start];
        let b = &chunks[g.start + 1];
        assert_eq!((a.start, a.end), (1, 7));
        assert_eq!((b.start, b.end), (11, 17));
    }

    #[test]
    fn disjoint_groups_do_not_merge() {
        let reg = registry(&[("a/x.c", "a"), ("b/y.c", "b")]);
        let mut chunks = vec![
            chunk(("a/x.c", 0), 1, 5, h("p"), ChunkFlags::empty()),
            chunk(("b/y.c", 1), 1, 5, h("p"), ChunkFlags::empty()),
            chunk(("a/x.c", 0), 50, 54, h("q"), ChunkFlags::empty()),
            chunk(("b/y.c", 1), 50, 54, h("q"), ChunkFlags::empty()),
        ];
        let mut groups = vec![MatchGroup { start: 0, len: 2 }, MatchGroup { start: 2, len: 2 }];
        merge_groups(&mut chunks, &mut groups, &reg);
        assert_eq!(groups.len(), 2);
    }

    #[test]
    fn different_file_pairings_never_merge() {
        let reg = registry(&[("a/x.c", "a"), ("b/y.c", "b"), ("b/z.c", "b")]);
        let mut chunks = vec![
            chunk(("a/x.c", 0), 1, 5, h("p"), ChunkFlags::empty()),
            chunk(("b/y.c", 1), 1, 5, h("p"), ChunkFlags::empty()),
            chunk(("a/x.c", 0), 2, 6, h("q"), ChunkFlags::empty()),
            chunk(("b/z.c", 2), 2, 6, h("q"), ChunkFlags::empty()),
        ];
        let mut groups = vec![MatchGroup { start: 0, len: 2 }, MatchGroup { start: 2, len: 2 }];
        merge_groups(&mut chunks, &mut groups, &reg);
        assert_eq!(groups.len(), 2, "overlap without identical pairing must not merge");
    }

    #[test]
    fn merging_heals_significance() {
        let reg = registry(&[("a/x.c", "a"), ("b/y.c", "b")]);
        let mut chunks = vec![
            chunk(("a/x.c", 0), 1, 5, h("p"), ChunkFlags::empty()),
            chunk(
                ("b/y.c", 1),
                1,
                5,
                h("p"),
                ChunkFlags::INSIGNIFICANT | ChunkFlags::C_CODE,
            ),
            chunk(("a/x.c", 0), 2, 6, h("q"), ChunkFlags::empty()),
            chunk(("b/y.c", 1), 2, 6, h("q"), ChunkFlags::C_CODE),
        ];
        let mut groups = vec![MatchGroup { start: 0, len: 2 }, MatchGroup { start: 2, len: 2 }];
        merge_groups(&mut chunks, &mut groups, &reg);
        assert_eq!(groups.len(), 1);
        let members = &chunks[groups[0].start..groups[0].start + groups[0].len];
        assert!(
            members.iter().all(|m| !m.flags.contains(ChunkFlags::INSIGNIFICANT)),
            "a significant occurrence must clear the merged span's flag"
        );
    }

    #[test]
    fn merge_only_widens_ranges() {
        let reg = registry(&[("a/x.c", "a"), ("b/y.c", "b")]);
        let mut chunks = vec![
            chunk(("a/x.c", 0), 3, 9, h("p"), ChunkFlags::empty()),
            chunk(("b/y.c", 1), 3, 9, h("p"), ChunkFlags::empty()),
            chunk(("a/x.c", 0), 4, 6, h("q"), ChunkFlags::empty()),
            chunk(("b/y.c", 1), 4, 6, h("q"), ChunkFlags::empty()),
        ];
        let mut groups = vec![MatchGroup { start: 0, len: 2 }, MatchGroup { start: 2, len: 2 }];
        merge_groups(&mut chunks, &mut groups, &reg);
        assert_eq!(groups.len(), 1);
        let g = groups[0];
        assert_eq!((chunks[g.start].start, chunks[g.start].end), (3, 9));
    }

    #[test]
    fn size_filter_drops_narrow_groups() {
        let chunks = vec![
            chunk(("a/x.c", 0), 1, 4, h("p"), ChunkFlags::empty()),
            chunk(("b/y.c", 1), 1, 4, h("p"), ChunkFlags::empty()),
        ];
        let mut groups = vec![MatchGroup { start: 0, len: 2 }];
        filter_groups(&chunks, &mut groups, 5, true);
        assert!(groups.is_empty());

        let mut groups = vec![MatchGroup { start: 0, len: 2 }];
        filter_groups(&chunks, &mut groups, 4, true);
        assert_eq!(groups.len(), 1);
    }

    #[test]
    fn significance_filter_drops_all_boilerplate_groups() {
        let insig = ChunkFlags::INSIGNIFICANT | ChunkFlags::C_CODE;
        let chunks = vec![
            chunk(("a/x.c", 0), 1, 4, h("p"), insig),
            chunk(("b/y.c", 1), 1, 4, h("p"), insig),
        ];
        let mut groups = vec![MatchGroup { start: 0, len: 2 }];
        filter_groups(&chunks, &mut groups, 0, true);
        assert!(groups.is_empty());

        // With filtering off the same group survives.
        let mut groups = vec![MatchGroup { start: 0, len: 2 }];
        filter_groups(&chunks, &mut groups, 0, false);
        assert_eq!(groups.len(), 1);
    }

    #[test]
    fn report_layout_matches_the_format() {
        let reg = registry(&[("a/x.c", "a"), ("b/y.c", "b")]);
        let chunks = vec![
            chunk(("a/x.c", 0), 1, 20, h("p"), ChunkFlags::empty()),
            chunk(("b/y.c", 1), 1, 20, h("p"), ChunkFlags::empty()),
        ];
        let groups = vec![MatchGroup { start: 0, len: 2 }];
        let meta = ReportMeta {
            filtering: true,
            hash_method: "MD5".into(),
            merge_program: "shredscan test".into(),
            normalization: "line-oriented".into(),
            shred_size: 5,
        };
        let trees = vec!["a".to_string(), "b".to_string()];
        let stats = tree_stats(&chunks, &groups, &reg, &trees);
        assert_eq!(stats[0].matches, 1);
        assert_eq!(stats[0].matchlines, 20);
        assert_eq!(stats[0].totallines, 100);

        let mut buf = Vec::new();
        write_report(&mut buf, &meta, &stats, &chunks, &groups, &reg).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let expected = "\
#SCF-B 2.0
Filtering: language
Hash-Method: MD5
Matches: 1
Merge-Program: shredscan test
Normalization: line-oriented
Shred-Size: 5
%%
a: matches=1, matchlines=20, totallines=100
b: matches=1, matchlines=20, totallines=100
%%
a/x.c:1:20:100
b/y.c:1:20:100
%%
";
        assert_eq!(text, expected);
    }
}
