//! Wikilink extraction: find `[[target]]` occurrences in body text.

use std::sync::OnceLock;

use regex::Regex;

fn wikilink_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[\[([^\]]+)\]\]").expect("static wikilink regex is valid"))
}

/// Extract all `[[target]]` occurrences from `text`, preserving order and
/// duplicates (the link index's primary key `(source, target_raw)` handles
/// dedup downstream). `target` is any run of characters containing no `]`.
/// Callers are responsible for passing frontmatter-stripped body text; this
/// function has no opinion about where that boundary is.
pub fn extract_wikilinks(text: &str) -> Vec<String> {
    wikilink_re()
        .captures_iter(text)
        .map(|cap| cap[1].to_string())
        .collect()
}
