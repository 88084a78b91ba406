//! SQL identifier sanitizer. Maps a type or attribute name to a safe column
//! or table name fragment. Safe because the set of admitted names is already
//! bounded: reserved type names are rejected before this ever runs, and any
//! remaining keyword collision surfaces as a storage error rather than data
//! loss (documented behavior, not a correctness gap).

/// Replace every character outside `[A-Za-z0-9_]` with `_`.
pub fn safe_ident(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passes_through_clean_identifiers() {
        assert_eq!(safe_ident("concept"), "concept");
        assert_eq!(safe_ident("my_field_1"), "my_field_1");
    }

    #[test]
    fn replaces_disallowed_characters() {
        assert_eq!(safe_ident("my field"), "my_field");
        assert_eq!(safe_ident("my-field!"), "my_field_");
    }
}
