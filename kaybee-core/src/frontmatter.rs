//! Frontmatter parsing and reconstruction: the supported YAML subset
//! described in the node text format (§6.1). This is a deliberately
//! partial parser — it tolerates anything it doesn't understand rather
//! than erroring, and it never infers non-string scalar types.

use crate::model::AttrMap;
use crate::model::AttrValue;

/// Split a node's external text into (attribute map, body). If the text
/// doesn't open with a `---` fence, or the fence is never closed, the
/// attribute map is empty and the body is the original text unchanged.
pub fn parse_frontmatter(text: &str) -> (AttrMap, String) {
    if !text.starts_with("---") {
        return (AttrMap::new(), text.to_string());
    }

    // Find the next line that is exactly "---", starting the search after the
    // opening fence (mirrors `text.find("\n---", 3)` in the original).
    let Some(rel_end) = text[3..].find("\n---") else {
        return (AttrMap::new(), text.to_string());
    };
    let end = 3 + rel_end;

    let yaml_block = text[3..end].trim();
    let after_fence = &text[end + 4..];
    let body = after_fence.trim_start_matches('\n').to_string();

    let attrs = parse_yaml_subset(yaml_block);
    (attrs, body)
}

/// Parse the supported YAML subset (the header block only, fences already stripped).
fn parse_yaml_subset(yaml_str: &str) -> AttrMap {
    let lines: Vec<&str> = yaml_str.lines().collect();
    let mut result = AttrMap::new();
    let mut i = 0usize;

    while i < lines.len() {
        let line = lines[i];
        let stripped = line.trim();

        if stripped.is_empty() || stripped.starts_with('#') {
            i += 1;
            continue;
        }

        let Some(colon) = stripped.find(':') else {
            i += 1;
            continue;
        };

        let key = stripped[..colon].trim().to_string();
        let mut rest = stripped[colon + 1..].trim().to_string();

        if !rest.is_empty() && !rest.starts_with('[') && !rest.starts_with('"') && !rest.starts_with('\'') {
            if let Some(comment_idx) = rest.find(" #") {
                rest = rest[..comment_idx].trim().to_string();
            }
        }

        if !rest.is_empty() {
            result.insert(key, parse_yaml_value(&rest));
            i += 1;
            continue;
        }

        // Block value: gather contiguous indented (or blank/comment) lines below.
        let mut block_items: Vec<&str> = Vec::new();
        let mut is_list = false;
        let mut is_dict = false;
        let mut j = i + 1;
        while j < lines.len() {
            let bline = lines[j];
            let starts_with_space = bline.chars().next().map(|c| c.is_whitespace()).unwrap_or(false);
            if bline.trim().is_empty() || (!starts_with_space && !bline.trim().is_empty() && !bline.trim().starts_with('#')) {
                break;
            }
            if bline.trim().starts_with('#') {
                j += 1;
                continue;
            }
            block_items.push(bline);
            let bstripped = bline.trim();
            if bstripped.starts_with("- ") {
                is_list = true;
            } else if bstripped.contains(':') && !bstripped.starts_with("- ") {
                is_dict = true;
            }
            j += 1;
        }

        if is_list {
            let items: Vec<String> = block_items
                .iter()
                .map(|bl| bl.trim())
                .filter(|bs| bs.starts_with("- "))
                .map(|bs| unquote(bs[2..].trim()))
                .collect();
            result.insert(key, AttrValue::List(items));
        } else if is_dict {
            let mut sub: Vec<(String, String)> = Vec::new();
            for bl in &block_items {
                let bs = bl.trim();
                if let Some(sc) = bs.find(':') {
                    let sk = bs[..sc].trim().to_string();
                    let sv = bs[sc + 1..].trim();
                    sub.push((sk, unquote(sv)));
                }
            }
            result.insert(key, AttrValue::Map(sub));
        } else if let Some(first) = block_items.first() {
            result.insert(key, AttrValue::Scalar(unquote(first.trim())));
        } else {
            result.insert(key, AttrValue::Scalar(String::new()));
        }

        i = j;
    }

    result
}

fn parse_yaml_value(val: &str) -> AttrValue {
    if val.starts_with('[') && val.ends_with(']') {
        let inner = val[1..val.len() - 1].trim();
        if inner.is_empty() {
            return AttrValue::List(Vec::new());
        }
        let items = split_yaml_list(inner)
            .into_iter()
            .map(|item| unquote(item.trim()))
            .collect();
        return AttrValue::List(items);
    }
    AttrValue::Scalar(unquote(val))
}

/// Split a YAML inline list body on commas, respecting quotes.
fn split_yaml_list(s: &str) -> Vec<String> {
    let mut items = Vec::new();
    let mut current = String::new();
    let mut in_quote: Option<char> = None;

    for ch in s.chars() {
        if let Some(q) = in_quote {
            current.push(ch);
            if ch == q {
                in_quote = None;
            }
        } else if ch == '"' || ch == '\'' {
            in_quote = Some(ch);
            current.push(ch);
        } else if ch == ',' {
            items.push(current.trim().to_string());
            current = String::new();
        } else {
            current.push(ch);
        }
    }
    if !current.is_empty() {
        items.push(current.trim().to_string());
    }
    items
}

/// Remove surrounding matching quotes from a scalar, if present.
fn unquote(val: &str) -> String {
    let chars: Vec<char> = val.chars().collect();
    if chars.len() >= 2 {
        let first = chars[0];
        let last = chars[chars.len() - 1];
        if (first == '"' && last == '"') || (first == '\'' && last == '\'') {
            return chars[1..chars.len() - 1].iter().collect();
        }
    }
    val.to_string()
}

/// Re-emit a node's external text from its attribute map and body (§4.12). An
/// empty attribute map returns the body unchanged — no fence at all — so that
/// bodies without frontmatter round-trip exactly through `touch`/`read`.
pub fn reconstruct(attrs: &AttrMap, body: &str) -> String {
    if attrs.is_empty() {
        return body.to_string();
    }

    let mut out = String::from("---\n");
    for (key, value) in attrs.iter() {
        match value {
            AttrValue::Scalar(s) => {
                out.push_str(&format!("{key}: {s}\n"));
            }
            AttrValue::List(items) => {
                let joined = items.join(", ");
                out.push_str(&format!("{key}: [{joined}]\n"));
            }
            AttrValue::Map(entries) => {
                out.push_str(&format!("{key}:\n"));
                for (sk, sv) in entries {
                    out.push_str(&format!("  {sk}: {sv}\n"));
                }
            }
        }
    }
    out.push_str("---\n");
    out.push_str(body);
    out
}
