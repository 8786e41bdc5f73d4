use std::sync::OnceLock;

use regex::Regex;

use crate::chunk::ChunkFlags;

// ---------------------------------------------------------------------------
// Significance filtering.
//
// A line made entirely of punctuation and language boilerplate is no evidence
// of copying. The filter scrubs punctuation to spaces, then repeatedly excises
// every boilerplate match until a full pass changes nothing; whatever is left
// decides significance. Uncategorized files always count as significant.
// ---------------------------------------------------------------------------

// Patterns run against a scrub buffer: a leading space, then the line with
// every ASCII punctuation character, tab and newline replaced by a space.
const C_PATTERNS: &[&str] = &[
    // Idioms that carry no meaning in isolation.
    "return [a-z]+",
    "return [0-9]+",
    "goto +[a-z]+",
    "exit *[01]",
    // Lint pragmas.
    " ARGSUSED ",
    " NOTREACHED ",
    " FALL *THRO?UG?H? ",
    // Bare C keywords.
    " auto ",
    " break ",
    " case ",
    "char",
    " const ",
    " continue ",
    " default ",
    " do ",
    " double ",
    " else ",
    " enum ",
    " extern ",
    " float ",
    " for ",
    " goto ",
    " if ",
    " int ",
    " long ",
    " register ",
    " return ",
    " short ",
    " signed ",
    " sizeof ",
    " static ",
    " struct ",
    " switch ",
    " typedef ",
    " union ",
    " unsigned ",
    " void ",
    " volatile ",
    " while ",
    // Preprocessor constructs; the `#` is already a space by scrub time.
    " define .*",
    " endif",
    " else",
    " ifdef ",
    " ifndef ",
    // Common macros that say nothing by themselves.
    " ASSERT ",
    " EXTERN ",
    " FALSE ",
    " NULL ",
    " STATIC ",
    " TRUE ",
    // Include and line directives are noise too.
    " include .*",
    " line .*",
    // Common error constants.
    " EFAULT ",
    " EINVAL ",
    " ENOSYS ",
];

const SHELL_PATTERNS: &[&str] = &[
    " break ",
    " case ",
    " done ",
    " do ",
    " else ",
    " esac ",
    " exit *[01]?",
    " false ",
    " fi ",
    " for",
    " function",
    " if ",
    " return ",
    " shift ",
    " true ",
    "until",
    " while ",
];

fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .map(|p| Regex::new(p).unwrap_or_else(|e| panic!("bad boilerplate pattern {p:?}: {e}")))
        .collect()
}

fn c_boilerplate() -> &'static [Regex] {
    static RE: OnceLock<Vec<Regex>> = OnceLock::new();
    RE.get_or_init(|| compile(C_PATTERNS))
}

fn shell_boilerplate() -> &'static [Regex] {
    static RE: OnceLock<Vec<Regex>> = OnceLock::new();
    RE.get_or_init(|| compile(SHELL_PATTERNS))
}

/// Decide whether a normalized line is boilerplate for the given language
/// mode. `mode` carries at most one of the language bits; anything else is
/// uncategorized and never insignificant.
pub fn is_insignificant(text: &str, mode: ChunkFlags) -> bool {
    let regexps = if mode.contains(ChunkFlags::C_CODE) {
        c_boilerplate()
    } else if mode.contains(ChunkFlags::SHELL_CODE) {
        shell_boilerplate()
    } else {
        return false;
    };

    let mut buf = String::with_capacity(text.len() + 1);
    buf.push(' ');
    for ch in text.chars() {
        if ch.is_ascii_punctuation() || ch == '\t' || ch == '\n' {
            buf.push(' ');
        } else {
            buf.push(ch);
        }
    }

    if buf.chars().all(|c| c == ' ') {
        return true;
    }

    // Excise one match per pattern per pass until a pass changes nothing.
    loop {
        let mut changed = false;
        for re in regexps {
            if let Some(range) = re.find(&buf).map(|m| m.range()) {
                buf.replace_range(range, "");
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }

    buf.chars().all(|c| c == ' ')
}
