//! Canonical name normalization ("slugify"). A pure total function used
//! everywhere a user-supplied identifier enters the engine.

/// Normalize an arbitrary string to a canonical node identifier: lowercase,
/// keep alphanumeric (Unicode-aware, matching Python's `str.isalnum()`)
/// /underscore/dot as-is, collapse any other run of characters to a single
/// `-` (never doubled, never leading), trim leading and trailing `-`. An
/// all-special-character or empty input normalizes to `"item"`.
pub fn slugify(input: &str) -> String {
    let trimmed = input.trim();
    let mut out = String::with_capacity(trimmed.len());
    let mut pending_dash = false;

    for ch in trimmed.chars() {
        let lower = ch.to_lowercase().next().unwrap_or(ch);
        if lower.is_alphanumeric() || lower == '_' || lower == '.' {
            if pending_dash && !out.is_empty() {
                out.push('-');
            }
            pending_dash = false;
            out.push(lower);
        } else {
            pending_dash = true;
        }
    }

    let trimmed_out = out.trim_matches('-');
    if trimmed_out.is_empty() {
        "item".to_string()
    } else {
        trimmed_out.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lowercases_and_keeps_alnum_underscore_dot() {
        assert_eq!(slugify("Hello_World.md"), "hello_world.md");
    }

    #[test]
    fn collapses_runs_of_special_chars() {
        assert_eq!(slugify("Hello   World!!!"), "hello-world");
    }

    #[test]
    fn trims_leading_and_trailing_dashes() {
        assert_eq!(slugify("  ***Hello***  "), "hello");
    }

    #[test]
    fn empty_and_all_special_collapse_to_item() {
        assert_eq!(slugify(""), "item");
        assert_eq!(slugify("   "), "item");
        assert_eq!(slugify("!!!###"), "item");
    }

    #[test]
    fn case_insensitive_collisions() {
        assert_eq!(slugify("Hello World"), slugify("HELLO WORLD"));
    }

    #[test]
    fn never_doubles_dashes() {
        assert_eq!(slugify("a---b"), "a-b");
        assert_eq!(slugify("a -  - b"), "a-b");
    }

    #[test]
    fn keeps_unicode_alphanumerics() {
        assert_eq!(slugify("café"), "café");
        assert_eq!(slugify("Café Noir"), "café-noir");
    }
}
