//! HTML tokenization into the host DOM arena, and serialization back to markup.

mod serialize;

pub use serialize::inner_html;
pub use serialize::outer_html;

use vf_core::VirtResult;
use vf_dom::DomTree;
use vf_dom::NodeId;

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param",
    "source", "track", "wbr",
];
const RAW_TEXT_ELEMENTS: &[&str] = &["script", "style", "textarea", "title"];
/// `&` through `;` of the longest reference decoded (`&#x10FFFF;`).
const MAX_ENTITY_LEN: usize = 10;

/// Builds DOM nodes from markup.
#[derive(Debug, Default)]
pub struct HtmlParser;

impl HtmlParser {
    /// Parses `input` into a new detached document.
    pub fn parse_document(&self, tree: &mut DomTree, input: &str) -> VirtResult<NodeId> {
        let document = tree.create_detached_document();
        self.parse_into(tree, document, input)?;
        Ok(document)
    }

    /// Parses `input` and appends the resulting nodes to `document`. Elements
    /// are created through the document's creation entry point, so creation
    /// hooks registered on it run for parsed elements too.
    pub fn parse_into(&self, tree: &mut DomTree, document: NodeId, input: &str) -> VirtResult<()> {
        let bytes = input.as_bytes();
        let mut idx = 0_usize;
        let mut open: Vec<(NodeId, String)> = Vec::new();

        while idx < bytes.len() {
            let parent = open.last().map(|(node, _)| *node).unwrap_or(document);

            if bytes[idx] != b'<' {
                let next = find_byte(bytes, idx, b'<').unwrap_or(bytes.len());
                let text = tree.create_text(document, &input[idx..next])?;
                tree.append_child(parent, text)?;
                idx = next;
                continue;
            }

            if starts_with(bytes, idx, b"<!--") {
                let end = find_subslice(bytes, idx.saturating_add(4), b"-->");
                let body_end = end.unwrap_or(bytes.len());
                let comment =
                    tree.create_comment(document, &input[idx.saturating_add(4).min(body_end)..body_end])?;
                tree.append_child(parent, comment)?;
                idx = end.map(|end| end.saturating_add(3)).unwrap_or(bytes.len());
                continue;
            }

            if starts_with_ignore_ascii_case(bytes, idx, b"<!doctype") {
                let name_start = idx.saturating_add(9);
                let close = find_byte(bytes, name_start, b'>');
                let name = input[name_start..close.unwrap_or(bytes.len())].trim();
                let doctype = tree.create_doctype(document, name)?;
                tree.append_child(parent, doctype)?;
                idx = close.map_or(bytes.len(), |close| close.saturating_add(1));
                continue;
            }

            if starts_with(bytes, idx, b"<!") || starts_with(bytes, idx, b"<?") {
                idx = skip_to_gt(bytes, idx.saturating_add(2));
                continue;
            }

            let Some((tag, next_idx)) = parse_tag(input, idx) else {
                let text = tree.create_text(document, "<")?;
                tree.append_child(parent, text)?;
                idx = idx.saturating_add(1);
                continue;
            };

            if tag.is_end {
                if let Some(position) = open.iter().rposition(|(_, name)| *name == tag.name) {
                    open.truncate(position);
                }
                idx = next_idx;
                continue;
            }

            let element = tree.create_element(document, &tag.name)?;
            for (name, value) in &tag.attributes {
                if tree.attribute(element, name).is_none() {
                    tree.set_attribute(element, name, value)?;
                }
            }
            tree.append_child(parent, element)?;
            idx = next_idx;

            if tag.self_closing || VOID_ELEMENTS.contains(&tag.name.as_str()) {
                continue;
            }

            if RAW_TEXT_ELEMENTS.contains(&tag.name.as_str()) {
                let (raw, after_raw) = read_raw_text_until_end_tag(input, idx, &tag.name);
                if !raw.is_empty() {
                    let text = tree.create_text(document, raw)?;
                    tree.append_child(element, text)?;
                }
                idx = after_raw;
                continue;
            }

            open.push((element, tag.name));
        }

        Ok(())
    }
}

/// Text of the first `<title>` in `document`, whitespace collapsed.
pub fn document_title(tree: &DomTree, document: NodeId) -> String {
    tree.first_element_by_tag(document, "title")
        .map(|title| collapse_whitespace(&tree.text_content(title)))
        .unwrap_or_default()
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ParsedTag {
    name: String,
    is_end: bool,
    self_closing: bool,
    attributes: Vec<(String, String)>,
}

fn parse_tag(input: &str, start: usize) -> Option<(ParsedTag, usize)> {
    let bytes = input.as_bytes();
    if bytes.get(start).copied() != Some(b'<') {
        return None;
    }

    let mut idx = start.saturating_add(1);
    let mut is_end = false;
    if bytes.get(idx).copied() == Some(b'/') {
        is_end = true;
        idx = idx.saturating_add(1);
    }

    let name_start = idx;
    while idx < bytes.len() && is_tag_name_char(bytes[idx]) {
        idx = idx.saturating_add(1);
    }
    if idx == name_start || !bytes[name_start].is_ascii_alphabetic() {
        return None;
    }
    let name = input[name_start..idx].to_ascii_lowercase();

    let mut attributes = Vec::new();
    let mut self_closing = false;
    loop {
        idx = skip_spaces(bytes, idx);
        match bytes.get(idx).copied() {
            None => return None,
            Some(b'>') => {
                return Some((
                    ParsedTag {
                        name,
                        is_end,
                        self_closing,
                        attributes,
                    },
                    idx.saturating_add(1),
                ));
            }
            Some(b'/') => {
                self_closing = true;
                idx = idx.saturating_add(1);
                continue;
            }
            Some(_) => {}
        }

        self_closing = false;
        let attr_start = idx;
        while idx < bytes.len()
            && !bytes[idx].is_ascii_whitespace()
            && !matches!(bytes[idx], b'=' | b'>' | b'/')
        {
            idx = idx.saturating_add(1);
        }
        if idx == attr_start {
            idx = idx.saturating_add(1);
            continue;
        }
        let attr_name = input[attr_start..idx].to_ascii_lowercase();

        idx = skip_spaces(bytes, idx);
        if bytes.get(idx).copied() != Some(b'=') {
            attributes.push((attr_name, String::new()));
            continue;
        }
        idx = skip_spaces(bytes, idx.saturating_add(1));

        let value = match bytes.get(idx).copied() {
            Some(quote @ (b'"' | b'\'')) => {
                let value_start = idx.saturating_add(1);
                let value_end = find_byte(bytes, value_start, quote)?;
                idx = value_end.saturating_add(1);
                &input[value_start..value_end]
            }
            _ => {
                let value_start = idx;
                while idx < bytes.len() && !bytes[idx].is_ascii_whitespace() && bytes[idx] != b'>' {
                    idx = idx.saturating_add(1);
                }
                &input[value_start..idx]
            }
        };
        attributes.push((attr_name, decode_attribute_entities(value)));
    }
}

fn read_raw_text_until_end_tag<'a>(
    input: &'a str,
    start: usize,
    tag_name: &str,
) -> (&'a str, usize) {
    let bytes = input.as_bytes();
    let tag_bytes = tag_name.as_bytes();
    let mut idx = start;

    while idx < bytes.len() {
        if bytes[idx] == b'<'
            && bytes.get(idx.saturating_add(1)).copied() == Some(b'/')
            && starts_with_ignore_ascii_case(bytes, idx.saturating_add(2), tag_bytes)
            && tag_name_boundary(bytes, idx.saturating_add(2 + tag_bytes.len()))
        {
            let end_idx = skip_to_gt(bytes, idx);
            return (&input[start..idx], end_idx);
        }

        idx = idx.saturating_add(1);
    }

    (&input[start..], bytes.len())
}

fn decode_attribute_entities(value: &str) -> String {
    if !value.contains('&') {
        return value.to_owned();
    }

    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp..];
        match decode_entity(tail) {
            Some((decoded, len)) => {
                out.push(decoded);
                rest = &tail[len..];
            }
            None => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

/// Decodes the reference at the start of `input` (which begins with `&`).
/// Returns the character and the byte length consumed, `;` included.
fn decode_entity(input: &str) -> Option<(char, usize)> {
    let semicolon = input.bytes().take(MAX_ENTITY_LEN).position(|byte| byte == b';')?;
    let body = &input[1..semicolon];
    let decoded = match body {
        "quot" => '"',
        "apos" => '\'',
        "lt" => '<',
        "gt" => '>',
        "amp" => '&',
        "nbsp" => '\u{a0}',
        _ => {
            let number = body.strip_prefix('#')?;
            let (digits, radix) = match number.strip_prefix(['x', 'X']) {
                Some(hex) => (hex, 16),
                None => (number, 10),
            };
            if digits.is_empty() || !digits.chars().all(|digit| digit.is_digit(radix)) {
                return None;
            }
            char::from_u32(u32::from_str_radix(digits, radix).ok()?)?
        }
    };
    Some((decoded, semicolon.saturating_add(1)))
}

fn collapse_whitespace(input: &str) -> String {
    input.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn skip_to_gt(bytes: &[u8], mut idx: usize) -> usize {
    while idx < bytes.len() {
        if bytes[idx] == b'>' {
            return idx.saturating_add(1);
        }
        idx = idx.saturating_add(1);
    }

    bytes.len()
}

fn tag_name_boundary(bytes: &[u8], idx: usize) -> bool {
    match bytes.get(idx).copied() {
        None => true,
        Some(byte) => byte.is_ascii_whitespace() || byte == b'>' || byte == b'/',
    }
}

fn skip_spaces(bytes: &[u8], mut idx: usize) -> usize {
    while idx < bytes.len() && bytes[idx].is_ascii_whitespace() {
        idx = idx.saturating_add(1);
    }
    idx
}

fn is_tag_name_char(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b':')
}

fn starts_with(bytes: &[u8], idx: usize, pattern: &[u8]) -> bool {
    let end = idx.saturating_add(pattern.len());
    end <= bytes.len() && bytes[idx..end] == *pattern
}

fn starts_with_ignore_ascii_case(bytes: &[u8], idx: usize, pattern: &[u8]) -> bool {
    let end = idx.saturating_add(pattern.len());
    if end > bytes.len() {
        return false;
    }

    bytes[idx..end]
        .iter()
        .zip(pattern.iter())
        .all(|(left, right)| left.eq_ignore_ascii_case(right))
}

fn find_subslice(bytes: &[u8], from: usize, needle: &[u8]) -> Option<usize> {
    if from >= bytes.len() {
        return None;
    }

    bytes[from..]
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|offset| from + offset)
}

fn find_byte(bytes: &[u8], from: usize, byte: u8) -> Option<usize> {
    bytes
        .get(from..)?
        .iter()
        .position(|candidate| *candidate == byte)
        .map(|offset| from + offset)
}
