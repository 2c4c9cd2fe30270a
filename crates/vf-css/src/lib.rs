//! CSS `url(...)` scanning and rewriting.
//!
//! Comments and string literals are copied through untouched; only real
//! `url(` function tokens are considered.

/// A `url(...)` reference found in stylesheet text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlReference {
    pub url: String,
    pub quote: Option<char>,
}

/// Replaces every `url(...)` reference for which `rewrite` returns a value.
/// The original quoting style is kept.
pub fn rewrite_css_urls<F>(input: &str, mut rewrite: F) -> String
where
    F: FnMut(&str) -> Option<String>,
{
    let mut out = String::with_capacity(input.len());
    let mut cursor = 0_usize;

    for (token, reference) in scan_url_tokens(input) {
        out.push_str(&input[cursor..token.start]);
        match rewrite(&reference.url) {
            Some(replacement) => {
                out.push_str("url(");
                if let Some(quote) = reference.quote {
                    out.push(quote);
                    out.push_str(&replacement);
                    out.push(quote);
                } else {
                    out.push_str(&replacement);
                }
                out.push(')');
            }
            None => out.push_str(&input[token.clone()]),
        }
        cursor = token.end;
    }

    out.push_str(&input[cursor..]);
    out
}

/// Every `url(...)` reference in `input`, in source order.
pub fn url_references(input: &str) -> Vec<UrlReference> {
    scan_url_tokens(input)
        .into_iter()
        .map(|(_, reference)| reference)
        .collect()
}

fn scan_url_tokens(input: &str) -> Vec<(std::ops::Range<usize>, UrlReference)> {
    let bytes = input.as_bytes();
    let mut found = Vec::new();
    let mut idx = 0_usize;

    while idx < bytes.len() {
        let byte = bytes[idx];
        let next = bytes.get(idx.saturating_add(1)).copied();

        if byte == b'/' && next == Some(b'*') {
            idx = find_comment_end(bytes, idx.saturating_add(2));
            continue;
        }

        if byte == b'"' || byte == b'\'' {
            idx = skip_string(bytes, idx);
            continue;
        }

        if is_url_token_start(bytes, idx) {
            if let Some((end, reference)) = read_url_token(input, idx) {
                found.push((idx..end, reference));
                idx = end;
                continue;
            }
        }

        idx = idx.saturating_add(1);
    }

    found
}

fn is_url_token_start(bytes: &[u8], idx: usize) -> bool {
    let end = idx.saturating_add(4);
    if end > bytes.len() || !bytes[idx..end].eq_ignore_ascii_case(b"url(") {
        return false;
    }

    match idx.checked_sub(1).and_then(|prev| bytes.get(prev)) {
        Some(&prev) => !(prev.is_ascii_alphanumeric() || matches!(prev, b'-' | b'_')),
        None => true,
    }
}

fn read_url_token(input: &str, start: usize) -> Option<(usize, UrlReference)> {
    let bytes = input.as_bytes();
    let mut idx = skip_spaces(bytes, start.saturating_add(4));

    match bytes.get(idx).copied()? {
        quote @ (b'"' | b'\'') => {
            let value_start = idx.saturating_add(1);
            let value_end = skip_string(bytes, idx).saturating_sub(1);
            if value_end < value_start || bytes.get(value_end).copied() != Some(quote) {
                return None;
            }
            idx = skip_spaces(bytes, value_end.saturating_add(1));
            if bytes.get(idx).copied() != Some(b')') {
                return None;
            }
            Some((
                idx.saturating_add(1),
                UrlReference {
                    url: input[value_start..value_end].to_owned(),
                    quote: Some(quote as char),
                },
            ))
        }
        _ => {
            let value_start = idx;
            while idx < bytes.len() && bytes[idx] != b')' {
                if matches!(bytes[idx], b'"' | b'\'' | b'(') {
                    return None;
                }
                idx = idx.saturating_add(1);
            }
            if idx >= bytes.len() {
                return None;
            }
            Some((
                idx.saturating_add(1),
                UrlReference {
                    url: input[value_start..idx].trim_end().to_owned(),
                    quote: None,
                },
            ))
        }
    }
}

/// Index just past the closing quote of the string starting at `start`.
fn skip_string(bytes: &[u8], start: usize) -> usize {
    let quote = bytes[start];
    let mut idx = start.saturating_add(1);
    let mut escape = false;

    while idx < bytes.len() {
        let byte = bytes[idx];
        if escape {
            escape = false;
        } else if byte == b'\\' {
            escape = true;
        } else if byte == quote {
            return idx.saturating_add(1);
        }
        idx = idx.saturating_add(1);
    }

    bytes.len()
}

fn find_comment_end(bytes: &[u8], from: usize) -> usize {
    let mut idx = from;
    while idx.saturating_add(1) < bytes.len() {
        if bytes[idx] == b'*' && bytes[idx + 1] == b'/' {
            return idx.saturating_add(2);
        }
        idx = idx.saturating_add(1);
    }
    bytes.len()
}

fn skip_spaces(bytes: &[u8], mut idx: usize) -> usize {
    while idx < bytes.len() && bytes[idx].is_ascii_whitespace() {
        idx = idx.saturating_add(1);
    }
    idx
}
