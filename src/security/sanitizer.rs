//! Best-effort stripping of markup from user-supplied strings.
//!
//! This is pattern removal over the raw string, not an HTML parser. Output
//! must still be encoded at render time.

use regex::Regex;
use std::sync::LazyLock;

pub const MAX_FILE_NAME_LENGTH: usize = 255;
pub const DEFAULT_FILE_NAME: &str = "unnamed_file";

/// Extensions longer than this are treated as part of the stem when truncating.
const MAX_EXTENSION_LENGTH: usize = 16;

static HTML_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^>]*>").expect("tag pattern is valid"));
static JAVASCRIPT_SCHEME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)javascript:").expect("scheme pattern is valid"));
static EVENT_HANDLER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)on\w+\s*=").expect("handler pattern is valid"));

/// Remove tag-like substrings, `javascript:` prefixes and `on<word>=`
/// attributes, then trim. Never fails.
///
/// Passes repeat until nothing changes, so removal cannot splice a new
/// pattern together (`java<b>script:`).
pub fn sanitize(input: &str) -> String {
    let mut current = input.to_string();

    loop {
        let stripped = HTML_TAG.replace_all(&current, "");
        let stripped = JAVASCRIPT_SCHEME.replace_all(&stripped, "");
        let stripped = EVENT_HANDLER.replace_all(&stripped, "").into_owned();

        if stripped == current {
            break;
        }
        current = stripped;
    }

    current.trim().to_string()
}

fn is_hostile(c: char) -> bool {
    c.is_control()
        || matches!(
            c,
            '/' | '\\' | '<' | '>' | ':' | '"' | '|' | '?' | '*' | ';' | '$' | '&' | '`' | '\''
        )
}

/// Make a client-supplied file name safe to use as a single path component.
///
/// Always returns a non-empty string with no separators, no `..` and at most
/// `MAX_FILE_NAME_LENGTH` characters. A name made only of dots is not a file
/// name and falls back to `DEFAULT_FILE_NAME`.
pub fn sanitize_file_name(name: &str) -> String {
    let mut cleaned: String = name.chars().filter(|c| !is_hostile(*c)).collect();

    while cleaned.contains("..") {
        cleaned = cleaned.replace("..", "");
    }

    let cleaned = cleaned.trim();
    if cleaned.chars().all(|c| c == '.') {
        return DEFAULT_FILE_NAME.to_string();
    }

    truncate_keeping_extension(cleaned, MAX_FILE_NAME_LENGTH)
}

fn truncate_keeping_extension(name: &str, max: usize) -> String {
    if name.chars().count() <= max {
        return name.to_string();
    }

    let extension = name
        .rfind('.')
        .map(|idx| &name[idx..])
        .filter(|ext| ext.chars().count() > 1 && ext.chars().count() <= MAX_EXTENSION_LENGTH);

    match extension {
        Some(ext) => {
            let stem_budget = max - ext.chars().count();
            let stem: String = name[..name.len() - ext.len()].chars().take(stem_budget).collect();
            format!("{}{}", stem, ext)
        }
        None => name.chars().take(max).collect(),
    }
}
