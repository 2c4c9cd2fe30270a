//! Markup serialization of arena subtrees.

use crate::VOID_ELEMENTS;
use vf_dom::DomTree;
use vf_dom::NodeId;
use vf_dom::NodeKind;

/// Markup of `node` itself and its descendants.
pub fn outer_html(tree: &DomTree, node: NodeId) -> String {
    let mut out = String::new();
    write_node(tree, node, &mut out);
    out
}

/// Markup of the children of `node` (a document, shadow root or element).
pub fn inner_html(tree: &DomTree, node: NodeId) -> String {
    let mut out = String::new();
    for child in tree.children(node) {
        write_node(tree, *child, &mut out);
    }
    out
}

fn write_node(tree: &DomTree, node: NodeId, out: &mut String) {
    let Some(entry) = tree.node(node) else {
        return;
    };

    match &entry.kind {
        NodeKind::Document(_) | NodeKind::ShadowRoot { .. } => {
            for child in &entry.children {
                write_node(tree, *child, out);
            }
        }
        NodeKind::Doctype(name) => {
            out.push_str("<!DOCTYPE ");
            out.push_str(name);
            out.push('>');
        }
        NodeKind::Comment(text) => {
            out.push_str("<!--");
            out.push_str(text);
            out.push_str("-->");
        }
        // Text is stored exactly as it appeared in the source, so raw text
        // elements and entity references both survive untouched.
        NodeKind::Text(text) => out.push_str(text),
        NodeKind::Element(element) => {
            out.push('<');
            out.push_str(&element.tag);
            for (name, value) in &element.attributes {
                out.push(' ');
                out.push_str(name);
                out.push_str("=\"");
                out.push_str(&escape_attribute(value));
                out.push('"');
            }
            out.push('>');

            if VOID_ELEMENTS.contains(&element.tag.as_str()) {
                return;
            }

            for child in &entry.children {
                write_node(tree, *child, out);
            }
            out.push_str("</");
            out.push_str(&element.tag);
            out.push('>');
        }
    }
}

fn escape_attribute(value: &str) -> String {
    value.replace('&', "&amp;").replace('"', "&quot;")
}
