//! Per-frame dark-mode engine.
//!
//! The engine owns one injected `<style>` in its frame's document. Only the
//! frame scope keeps it alive; the session registry holds weak references.

use std::rc::Rc;
use tracing::trace;
use vf_core::VirtError;
use vf_core::VirtResult;
use vf_dom::DomTree;
use vf_dom::NodeId;
use vf_dom::WindowId;

pub const DARK_MODE_STYLE_ID: &str = "vf-dark-mode";

const DEFAULT_DARK_STYLESHEET: &str = "html { filter: invert(1) hue-rotate(180deg); background: #fff; }\n\
img, video, picture, canvas, svg image { filter: invert(1) hue-rotate(180deg); }\n";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DarkModeConfig {
    pub enabled: bool,
    pub stylesheet: String,
}

impl Default for DarkModeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            stylesheet: DEFAULT_DARK_STYLESHEET.to_owned(),
        }
    }
}

#[derive(Debug)]
pub struct DarkModeEngine {
    window: WindowId,
    document: NodeId,
    style: NodeId,
}

impl DarkModeEngine {
    /// Injects the dark-mode stylesheet into `document`. Fails on a document
    /// without any element to attach to.
    pub fn install(
        tree: &mut DomTree,
        document: NodeId,
        window: WindowId,
        config: &DarkModeConfig,
    ) -> VirtResult<Rc<Self>> {
        let root = tree
            .children(document)
            .iter()
            .copied()
            .find(|child| tree.element(*child).is_some())
            .ok_or_else(|| {
                VirtError::new(
                    "darkmode.document_empty",
                    format!("document {document} has no element to attach to"),
                )
            })?;
        let parent = tree.first_element_by_tag(document, "head").unwrap_or(root);

        let style = tree.create_element(document, "style")?;
        tree.set_attribute(style, "id", DARK_MODE_STYLE_ID)?;
        let text = tree.create_text(document, &config.stylesheet)?;
        tree.append_child(style, text)?;
        tree.append_child(parent, style)?;
        trace!(window, document, style, "dark-mode engine installed");

        Ok(Rc::new(Self {
            window,
            document,
            style,
        }))
    }

    pub fn window(&self) -> WindowId {
        self.window
    }

    pub fn document(&self) -> NodeId {
        self.document
    }

    /// False once the frame document holding the stylesheet is gone.
    pub fn is_attached(&self, tree: &DomTree) -> bool {
        tree.contains(self.style) && tree.tree_root(self.style) == self.document
    }
}
