use std::io::BufRead;

use anyhow::{bail, Result};

use crate::chunk::{ChunkFlags, LineNum, MAX_LINE};
use crate::filter;

/// Parsed normalization option set. The canonical spelling is a comma list
/// beginning with `line-oriented`; it is what catalogues and reports record,
/// and what cross-run consistency checks compare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Normalization {
    pub remove_comments: bool,
    pub remove_whitespace: bool,
    pub remove_braces: bool,
}

impl Normalization {
    pub fn parse(spec: &str) -> Result<Self> {
        let mut tokens = spec.split(',').map(str::trim).filter(|t| !t.is_empty());
        if tokens.next() != Some("line-oriented") {
            bail!("normalization spec must begin with \"line-oriented\": {spec:?}");
        }
        let mut norm = Normalization::default();
        for token in tokens {
            match token {
                "remove-whitespace" => norm.remove_whitespace = true,
                "remove-comments" => norm.remove_comments = true,
                "remove-braces" => norm.remove_braces = true,
                other => bail!("unknown normalization option {other:?}"),
            }
        }
        Ok(norm)
    }

    /// Canonical comma-list form, options in fixed order.
    pub fn describe(&self) -> String {
        let mut out = String::from("line-oriented");
        if self.remove_whitespace {
            out.push_str(", remove-whitespace");
        }
        if self.remove_comments {
            out.push_str(", remove-comments");
        }
        if self.remove_braces {
            out.push_str(", remove-braces");
        }
        out
    }
}

/// One normalized unit handed to the shredder. Today a feature is always one
/// normalized source line, but nothing downstream assumes that.
#[derive(Debug, Clone)]
pub struct Feature {
    pub text: String,
    pub line: LineNum,
    pub flags: ChunkFlags,
    /// The line held nothing but a closing brace; it extends the previous
    /// chunk's range instead of entering the window.
    pub trailing_brace: bool,
}

/// Feature extraction seam. Alternative analyzers (token streams, AST walks)
/// plug in here; the line-by-line analyzer is the only implementation today.
pub trait FeatureSource {
    /// Set the language mode for the file about to be scanned.
    fn set_mode(&mut self, mode: ChunkFlags);

    /// Currently active language mode.
    fn mode(&self) -> ChunkFlags;

    /// Produce the next feature, or `None` at end of input.
    fn next(&mut self, file: &str, reader: &mut dyn BufRead) -> Result<Option<Feature>>;

    /// The normalization this source applies, in canonical comma-list form.
    fn describe(&self) -> String;
}

/// Classify a file by suffix. Shebang detection can still override this for
/// shell scripts with no extension.
pub fn mode_for_path(path: &str) -> ChunkFlags {
    if path.ends_with(".c") || path.ends_with(".cc") || path.ends_with(".h") {
        ChunkFlags::C_CODE
    } else if path.ends_with(".sh") {
        ChunkFlags::SHELL_CODE
    } else {
        ChunkFlags::empty()
    }
}

/// Line-oriented analyzer: reads a file line by line, applies the configured
/// normalization, classifies each surviving line's significance.
pub struct LineAnalyzer {
    options: Normalization,
    mode: ChunkFlags,
    line: LineNum,
    truncated: bool,
}

impl LineAnalyzer {
    pub fn new(options: Normalization) -> Self {
        Self {
            options,
            mode: ChunkFlags::empty(),
            line: 0,
            truncated: false,
        }
    }

    /// Physical lines consumed so far; after the stream ends this is the
    /// file's recorded length.
    pub fn line_count(&self) -> LineNum {
        self.line
    }

    pub fn truncated(&self) -> bool {
        self.truncated
    }

    fn normalize(&self, text: &mut String) {
        if self.options.remove_comments {
            if self.mode.contains(ChunkFlags::C_CODE) {
                if let Some(pos) = text.find("//") {
                    text.truncate(pos);
                } else {
                    match (text.find("/*"), text.find("*/")) {
                        (Some(start), Some(end)) if start < end => {
                            text.replace_range(start..end + 2, "");
                        }
                        (Some(start), None) => text.truncate(start),
                        (None, Some(end)) => {
                            text.replace_range(..end + 2, "");
                        }
                        _ => {}
                    }
                }
            } else if let Some(pos) = text.find('#') {
                text.truncate(pos);
            }
        }
        if self.options.remove_whitespace {
            text.retain(|c| c != ' ' && c != '\t' && c != '\n');
        }
        if self.options.remove_braces {
            text.retain(|c| c != '{' && c != '}');
        }
    }
}

impl FeatureSource for LineAnalyzer {
    fn set_mode(&mut self, mode: ChunkFlags) {
        self.mode = mode & ChunkFlags::CATEGORIZED;
        self.line = 0;
    }

    fn mode(&self) -> ChunkFlags {
        self.mode
    }

    fn next(&mut self, file: &str, reader: &mut dyn BufRead) -> Result<Option<Feature>> {
        if self.truncated {
            return Ok(None);
        }
        let mut raw = Vec::new();
        loop {
            raw.clear();
            if reader.read_until(b'\n', &mut raw)? == 0 {
                return Ok(None);
            }
            self.line += 1;
            if self.line >= MAX_LINE {
                eprintln!(
                    "shredscan: {file} too large, only the first {} lines will be compared",
                    MAX_LINE - 1
                );
                self.truncated = true;
                return Ok(None);
            }

            let mut text = String::from_utf8_lossy(&raw).into_owned();
            let braceline =
                self.options.remove_braces && text.trim_start().starts_with('}');
            self.normalize(&mut text);

            if braceline && text.trim().is_empty() {
                return Ok(Some(Feature {
                    text: String::new(),
                    line: self.line,
                    flags: ChunkFlags::empty(),
                    trailing_brace: true,
                }));
            }
            if text.is_empty() {
                continue;
            }

            // A shebang on line 1 overrides the suffix classification; the
            // line count restarts so the script body numbers from the top.
            if self.line == 1 && text.starts_with('#') && text.contains("sh") {
                self.set_mode(ChunkFlags::SHELL_CODE);
                self.line = 1;
            }

            let flags = if filter::is_insignificant(&text, self.mode) {
                ChunkFlags::INSIGNIFICANT
            } else {
                ChunkFlags::empty()
            };
            return Ok(Some(Feature {
                text,
                line: self.line,
                flags,
                trailing_brace: false,
            }));
        }
    }

    fn describe(&self) -> String {
        self.options.describe()
    }
}
