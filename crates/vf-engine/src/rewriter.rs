//! Offline rewriting of frame documents before they reach the live DOM.

use crate::router::SchemeRouter;
use std::rc::Rc;
use tracing::debug;
use url::Url;
use vf_core::VirtError;
use vf_core::VirtResult;
use vf_dom::DomTree;
use vf_dom::NodeId;
use vf_html::HtmlParser;
use vf_html::inner_html;
use vf_net::ResourceLocator;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewrittenDocument {
    pub html: String,
    /// Base URL every reference in `html` was resolved against.
    pub context: Option<Url>,
}

#[derive(Debug)]
pub struct ContentRewriter {
    router: Rc<SchemeRouter>,
    host_origin: Option<Url>,
    root_url: Option<Url>,
}

impl ContentRewriter {
    pub fn new(router: Rc<SchemeRouter>, host_origin: Option<Url>, root_url: Option<Url>) -> Self {
        Self {
            router,
            host_origin,
            root_url,
        }
    }

    pub fn root_url(&self) -> Option<&Url> {
        self.root_url.as_ref()
    }

    pub(crate) fn set_root_url(&mut self, root_url: Option<Url>) {
        self.root_url = root_url;
    }

    /// Parses `html` into a scratch tree, rewrites every reference and
    /// serializes the result.
    pub fn rewrite_document(&self, html: &str, context: Option<&Url>) -> VirtResult<RewrittenDocument> {
        let mut tree = DomTree::new();
        let document = HtmlParser.parse_document(&mut tree, html)?;
        let context = self.effective_context(&tree, document, context);
        let base = context.as_ref();

        for img in tree.elements_by_tag(document, "img") {
            self.virtualize_attribute(&mut tree, img, "src", base)?;
        }

        for style in tree.elements_by_tag(document, "style") {
            self.rewrite_style_element(&mut tree, style, base)?;
        }

        let links: Vec<NodeId> = tree
            .elements_by_tag(document, "link")
            .into_iter()
            .filter(|link| is_stylesheet_link(&tree, *link))
            .collect();
        for link in links {
            self.inline_stylesheet(&mut tree, link, base)?;
        }

        for script in tree.elements_by_tag(document, "script") {
            self.rewrite_script_source(&mut tree, script, base)?;
        }

        for iframe in tree.elements_by_tag(document, "iframe") {
            defer_frame_content(&mut tree, iframe)?;
        }

        Ok(RewrittenDocument {
            html: inner_html(&tree, document),
            context,
        })
    }

    /// Rewrites every `url(...)` in `css` against `context`.
    pub fn rewrite_css_text(&self, css: &str, context: Option<&Url>) -> String {
        vf_css::rewrite_css_urls(css, |reference| self.router.try_virtualize(reference, context))
    }

    /// Rewrites the text of a `<style>` element in place. Returns whether
    /// anything changed; already virtualized URLs are left alone.
    pub fn rewrite_style_element(
        &self,
        tree: &mut DomTree,
        style: NodeId,
        context: Option<&Url>,
    ) -> VirtResult<bool> {
        let css = tree.text_content(style);
        let rewritten = self.rewrite_css_text(&css, context);
        if rewritten == css {
            return Ok(false);
        }
        tree.set_text_content(style, &rewritten)?;
        Ok(true)
    }

    /// Replaces a stylesheet `<link>` with an inline `<style>` holding the
    /// fetched sheet, rewritten against the sheet's own URL. A link whose
    /// target cannot be fetched is dropped.
    pub fn inline_stylesheet(
        &self,
        tree: &mut DomTree,
        link: NodeId,
        context: Option<&Url>,
    ) -> VirtResult<bool> {
        let Some(href) = tree.attribute(link, "href").map(str::to_owned) else {
            return Ok(false);
        };
        let Some(parent) = tree.parent(link) else {
            return Ok(false);
        };

        let locator = match self.router.resolve(&href, context) {
            Ok(locator) => locator,
            Err(error) => {
                debug!(%href, %error, "dropping unresolvable stylesheet link");
                drop_node(tree, link)?;
                return Ok(false);
            }
        };
        let response = self.router.fetch_content(&locator);
        if !response.is_success() {
            debug!(%href, status = response.status, "dropping stylesheet link");
            drop_node(tree, link)?;
            return Ok(false);
        }

        let sheet_url = locator
            .unwrapped()
            .map(|inner| inner.url().clone())
            .unwrap_or_else(|_| locator.url().clone());
        let css = self.rewrite_css_text(&response.text(), Some(&sheet_url));

        let document = tree.owner_document(link).ok_or_else(|| {
            VirtError::new("dom.node_missing", format!("link {link} has no owner document"))
        })?;
        let style = tree.create_element(document, "style")?;
        if let Some(media) = tree.attribute(link, "media").map(str::to_owned) {
            tree.set_attribute(style, "media", &media)?;
        }
        let text = tree.create_text(document, &css)?;
        tree.append_child(style, text)?;
        tree.insert_before(parent, style, Some(link))?;
        drop_node(tree, link)?;
        Ok(true)
    }

    /// Virtualizes one URL-valued attribute in place.
    pub fn virtualize_attribute(
        &self,
        tree: &mut DomTree,
        node: NodeId,
        attribute: &str,
        context: Option<&Url>,
    ) -> VirtResult<bool> {
        let Some(value) = tree.attribute(node, attribute).map(str::to_owned) else {
            return Ok(false);
        };
        match self.router.try_virtualize(&value, context) {
            Some(virtualized) => {
                tree.set_attribute(node, attribute, &virtualized)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Virtualizes `<script src>` and keeps the original on
    /// `data-vf-original-src`.
    pub fn rewrite_script_source(
        &self,
        tree: &mut DomTree,
        script: NodeId,
        context: Option<&Url>,
    ) -> VirtResult<bool> {
        let Some(original) = tree.attribute(script, "src").map(str::to_owned) else {
            return Ok(false);
        };
        if !self.virtualize_attribute(tree, script, "src", context)? {
            return Ok(false);
        }
        tree.set_attribute(script, "data-vf-original-src", &original)?;
        Ok(true)
    }

    fn effective_context(&self, tree: &DomTree, document: NodeId, context: Option<&Url>) -> Option<Url> {
        if let Some(context) = context.filter(|context| !self.is_host_url(context)) {
            return Some(context.clone());
        }

        let base_href = tree
            .first_element_by_tag(document, "base")
            .and_then(|base| tree.attribute(base, "href"))
            .map(str::trim)
            .filter(|href| !href.is_empty());
        if let Some(href) = base_href {
            match ResourceLocator::resolve(href, context.or(self.root_url.as_ref()))
                .and_then(|locator| locator.unwrapped())
            {
                Ok(locator) => return Some(locator.url().clone()),
                Err(error) => debug!(%href, %error, "ignoring unusable <base href>"),
            }
        }

        self.root_url.clone()
    }

    fn is_host_url(&self, url: &Url) -> bool {
        self.host_origin.as_ref().is_some_and(|host| {
            host.origin().is_tuple()
                && host.origin() == url.origin()
                && url.path().starts_with(host.path())
        })
    }
}

/// True for `<link>` elements whose `rel` includes `stylesheet`.
pub fn is_stylesheet_link(tree: &DomTree, node: NodeId) -> bool {
    tree.is_element(node, "link")
        && tree.attribute(node, "rel").is_some_and(|rel| {
            rel.split_ascii_whitespace()
                .any(|token| token.eq_ignore_ascii_case("stylesheet"))
        })
}

/// Moves platform-loaded frame content into the deferred attributes so the
/// platform never loads it and the patch loop does instead.
pub fn defer_frame_content(tree: &mut DomTree, iframe: NodeId) -> VirtResult<bool> {
    let mut moved = false;
    if let Some(src) = tree.remove_attribute(iframe, "src")? {
        tree.set_attribute(iframe, "data-vf-src", &src)?;
        moved = true;
    }
    if let Some(srcdoc) = tree.remove_attribute(iframe, "srcdoc")? {
        tree.set_attribute(iframe, "data-vf-srcdoc", &srcdoc)?;
        moved = true;
    }
    Ok(moved)
}

fn drop_node(tree: &mut DomTree, node: NodeId) -> VirtResult<()> {
    tree.detach(node)?;
    tree.discard(node);
    Ok(())
}
