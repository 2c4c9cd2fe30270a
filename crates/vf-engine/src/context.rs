//! Frame context resolution: the base URL a node's references resolve
//! against.

use url::Url;
use vf_dom::DomTree;
use vf_dom::NodeId;
use vf_net::ResourceLocator;

/// Attribute holding a frame's installed context.
pub const CONTEXT_ATTRIBUTE: &str = "data-vf-context";
/// Attribute holding a frame's deferred target.
pub const DEFERRED_SRC_ATTRIBUTE: &str = "data-vf-src";
/// Attribute holding a frame's deferred inline document.
pub const DEFERRED_SRCDOC_ATTRIBUTE: &str = "data-vf-srcdoc";

// Frames nest far less deeply than this in practice.
const MAX_FRAME_DEPTH: usize = 64;

/// Base URL for `node`.
///
/// An iframe answers with its installed context, or with its deferred
/// target resolved against the enclosing context. Any other node answers
/// with the context of the frame hosting its document; shadow trees go
/// through their host. The top document answers with `root_url`.
pub fn context_for(tree: &DomTree, node: NodeId, root_url: Option<&Url>) -> Option<Url> {
    context_at_depth(tree, node, root_url, 0)
}

/// Context of the document `node` lives in, ignoring `node`'s own frame
/// content when `node` is an iframe.
pub fn enclosing_context(tree: &DomTree, node: NodeId, root_url: Option<&Url>) -> Option<Url> {
    enclosing_at_depth(tree, node, root_url, 0)
}

pub fn installed_context(tree: &DomTree, iframe: NodeId) -> Option<Url> {
    tree.attribute(iframe, CONTEXT_ATTRIBUTE)
        .and_then(|value| Url::parse(value).ok())
}

fn context_at_depth(tree: &DomTree, node: NodeId, root_url: Option<&Url>, depth: usize) -> Option<Url> {
    if depth > MAX_FRAME_DEPTH || !tree.contains(node) {
        return None;
    }

    if tree.is_element(node, "iframe") {
        if let Some(installed) = installed_context(tree, node) {
            return Some(installed);
        }
        let deferred = tree
            .attribute(node, DEFERRED_SRC_ATTRIBUTE)
            .map(str::trim)
            .filter(|target| !target.is_empty());
        if let Some(target) = deferred {
            let enclosing = enclosing_at_depth(tree, node, root_url, depth + 1);
            if let Ok(locator) =
                ResourceLocator::resolve(target, enclosing.as_ref()).and_then(|locator| locator.unwrapped())
            {
                return Some(locator.url().clone());
            }
        }
    }

    enclosing_at_depth(tree, node, root_url, depth + 1)
}

fn enclosing_at_depth(tree: &DomTree, node: NodeId, root_url: Option<&Url>, depth: usize) -> Option<Url> {
    if depth > MAX_FRAME_DEPTH {
        return None;
    }

    let root = tree.tree_root(node);
    if let Some(host) = tree.shadow_host(root) {
        return enclosing_at_depth(tree, host, root_url, depth + 1);
    }

    let window = tree.document_window(root)?;
    match tree.window(window)?.frame_element {
        Some(frame) => context_at_depth(tree, frame, root_url, depth + 1),
        None => root_url.cloned(),
    }
}
