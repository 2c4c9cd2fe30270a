//! Frame and shadow-tree patching, and session teardown.

use crate::context::CONTEXT_ATTRIBUTE;
use crate::context::DEFERRED_SRCDOC_ATTRIBUTE;
use crate::context::DEFERRED_SRC_ATTRIBUTE;
use crate::context::enclosing_context;
use crate::darkmode::DarkModeEngine;
use crate::interceptor::ContextCell;
use crate::interceptor::FrameDecorator;
use crate::interceptor::RoutingInterceptor;
use crate::rewriter::defer_frame_content;
use crate::session::VirtualizationSession;
use crate::shims::FrameScope;
use std::cell::RefCell;
use std::collections::HashMap;
use std::collections::HashSet;
use std::rc::Rc;
use tracing::debug;
use tracing::trace;
use tracing::warn;
use url::Url;
use vf_core::VirtResult;
use vf_dom::DomTree;
use vf_dom::NodeId;
use vf_html::HtmlParser;
use vf_js::FrameRealm;
use vf_js::ScriptSource;
use vf_net::ResourceLocator;

const SCRIPT_TYPES: &[&str] = &["", "text/javascript", "application/javascript", "module"];

/// What an iframe was last asked to show.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeferredContent {
    pub src: Option<String>,
    pub srcdoc: Option<String>,
}

impl DeferredContent {
    pub fn read(tree: &DomTree, iframe: NodeId) -> Self {
        Self {
            src: tree.attribute(iframe, DEFERRED_SRC_ATTRIBUTE).map(str::to_owned),
            srcdoc: tree
                .attribute(iframe, DEFERRED_SRCDOC_ATTRIBUTE)
                .map(str::to_owned),
        }
    }

    /// A target worth fetching; `about:blank` and empty values are not.
    pub fn target(&self) -> Option<&str> {
        self.src
            .as_deref()
            .map(str::trim)
            .filter(|src| !src.is_empty() && !src.eq_ignore_ascii_case("about:blank"))
    }
}

/// Which frames and shadow hosts have been patched. Node ids are never
/// reused, so entries for discarded nodes are simply never hit again.
#[derive(Debug, Default)]
pub struct PatchRecord {
    frames: HashMap<NodeId, DeferredContent>,
    failed_frames: HashSet<NodeId>,
    shadow_hosts: HashSet<NodeId>,
}

impl PatchRecord {
    pub fn is_current(&self, iframe: NodeId, content: &DeferredContent) -> bool {
        self.frames.get(&iframe) == Some(content)
    }

    pub fn is_frame_patched(&self, iframe: NodeId) -> bool {
        self.frames.contains_key(&iframe)
    }

    /// The frame's last load failed; it holds an empty document until its
    /// deferred content is set again.
    pub fn is_load_failed(&self, iframe: NodeId) -> bool {
        self.failed_frames.contains(&iframe)
    }

    pub fn is_shadow_host_patched(&self, host: NodeId) -> bool {
        self.shadow_hosts.contains(&host)
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    pub fn shadow_host_count(&self) -> usize {
        self.shadow_hosts.len()
    }

    fn mark_frame(&mut self, iframe: NodeId, content: DeferredContent) {
        self.failed_frames.remove(&iframe);
        self.frames.insert(iframe, content);
    }

    fn mark_frame_failed(&mut self, iframe: NodeId) {
        self.frames.remove(&iframe);
        self.failed_frames.insert(iframe);
    }

    fn mark_shadow_host(&mut self, host: NodeId) -> bool {
        self.shadow_hosts.insert(host)
    }

    fn clear(&mut self) {
        self.frames.clear();
        self.failed_frames.clear();
        self.shadow_hosts.clear();
    }
}

impl VirtualizationSession {
    /// Loads an iframe's deferred content into its window with every shim
    /// installed. Returns `false` when there was nothing to do: the node is
    /// gone or disconnected, or its deferred content is what was last
    /// installed.
    pub fn patch_iframe(&mut self, iframe: NodeId) -> VirtResult<bool> {
        if !self.tree.is_element(iframe, "iframe") {
            debug!(iframe, "frame is gone; skipping");
            return Ok(false);
        }
        let Some(window) = self.tree.frame_window(iframe) else {
            debug!(iframe, "frame is not connected; skipping");
            return Ok(false);
        };

        defer_frame_content(&mut self.tree, iframe)?;
        let content = DeferredContent::read(&self.tree, iframe);
        if self.record.is_current(iframe, &content) {
            trace!(iframe, "deferred content unchanged");
            return Ok(false);
        }
        let enclosing = enclosing_context(&self.tree, iframe, self.config.root_url.as_ref());
        let (html, context, loaded) = self.load_frame_content(&content, enclosing);
        let rewritten = self.rewriter.rewrite_document(&html, context.as_ref())?;
        match &rewritten.context {
            Some(context) => self
                .tree
                .set_attribute(iframe, CONTEXT_ATTRIBUTE, context.as_str())?,
            None => {
                self.tree.remove_attribute(iframe, CONTEXT_ATTRIBUTE)?;
            }
        }

        let document = self.tree.open_document(window)?;
        self.scopes.remove(&window);
        self.release_unloaded_windows();

        // The decorator goes in before any element of the new document exists.
        let context_cell: ContextCell = Rc::new(RefCell::new(rewritten.context.clone()));
        let interceptor = Rc::new(RoutingInterceptor::new(
            Rc::clone(&self.router),
            Rc::clone(&context_cell),
        ));
        self.tree.add_creation_hook(
            document,
            Rc::new(FrameDecorator::new(Rc::clone(&self.interception_table), interceptor)),
        )?;
        let mut scope = FrameScope::new(
            window,
            context_cell,
            Rc::clone(&self.router),
            Rc::clone(&self.xhr_routes),
            self.config.host_origin.clone(),
            Rc::clone(&self.sockets),
        );

        HtmlParser.parse_into(&mut self.tree, document, &rewritten.html)?;
        self.watcher.arm(&mut self.tree, document)?;
        self.worklist.seed_from(&self.tree, document);

        if self.config.dark_mode.enabled {
            match DarkModeEngine::install(&mut self.tree, document, window, &self.config.dark_mode) {
                Ok(engine) => {
                    self.registry.register(&engine);
                    scope.install_dark_mode(engine);
                }
                Err(error) => warn!(iframe, %error, "dark-mode engine failed to load; frame stays patched"),
            }
        }

        if self.config.run_scripts {
            self.run_frame_scripts(&mut scope, document);
        }

        self.scopes.insert(window, scope);
        // Only now is the content current. A failed load stays eligible for
        // a retry on the next change to the frame.
        if loaded {
            self.record.mark_frame(iframe, content);
        } else {
            self.record.mark_frame_failed(iframe);
        }
        self.notify_engines_changed();
        debug!(
            iframe,
            window,
            context = rewritten.context.as_ref().map_or("none", Url::as_str),
            loaded,
            "frame patched"
        );

        if self.root_frame == Some(iframe) {
            if let Some(on_load) = self.on_load.clone() {
                on_load(iframe);
            }
        }
        Ok(true)
    }

    /// Arms a watcher on `host`'s shadow root and processes what it already
    /// holds. Returns `false` for hosts without a shadow root or already
    /// patched.
    pub fn patch_shadow_root(&mut self, host: NodeId) -> VirtResult<bool> {
        let Some(shadow) = self.tree.shadow_root(host) else {
            debug!(host, "no shadow root; skipping");
            return Ok(false);
        };
        if !self.record.mark_shadow_host(host) {
            return Ok(false);
        }

        self.watcher.arm(&mut self.tree, shadow)?;
        let context = self.context_for(host);
        for node in self.tree.descendants(shadow) {
            if self.tree.is_element(node, "img") {
                self.rewriter
                    .virtualize_attribute(&mut self.tree, node, "src", context.as_ref())?;
            } else if self.tree.is_element(node, "script") {
                self.rewriter
                    .rewrite_script_source(&mut self.tree, node, context.as_ref())?;
            } else if self.tree.is_element(node, "style") {
                self.rewriter
                    .rewrite_style_element(&mut self.tree, node, context.as_ref())?;
            }
        }
        self.worklist.seed_from(&self.tree, shadow);
        trace!(host, shadow, "shadow tree patched");
        Ok(true)
    }

    /// Tears everything down: observers, the socket server, every frame
    /// scope and the root frame itself.
    pub fn destroy(&mut self) {
        self.watcher.disconnect_all(&mut self.tree);
        self.worklist.clear();
        self.sockets.stop();

        if let Some(root) = self.root_frame.take() {
            if let Some(window) = self.tree.frame_window(root) {
                if let Err(error) = self.tree.open_document(window) {
                    debug!(root, %error, "root frame reload failed");
                }
            }
            if let Err(error) = self.tree.detach(root) {
                debug!(root, %error, "root frame detach failed");
            }
            self.tree.discard(root);
        }

        self.release_unloaded_windows();
        self.scopes.clear();
        self.record.clear();
        self.notify_engines_changed();

        self.router.set_host_callbacks(None, None);
        self.on_load = None;
        self.on_engines_changed = None;
        debug!("session destroyed");
    }

    /// Markup for the frame, the context it resolves against, and whether
    /// the content could actually be loaded.
    fn load_frame_content(&self, content: &DeferredContent, enclosing: Option<Url>) -> (String, Option<Url>, bool) {
        if let Some(target) = content.target() {
            let locator = match self.router.resolve(target, enclosing.as_ref()) {
                Ok(locator) => locator,
                Err(error) => {
                    debug!(%target, %error, "frame target unresolvable");
                    return (String::new(), enclosing, false);
                }
            };
            let response = self.router.fetch_content(&locator);
            let context = locator
                .unwrapped()
                .map(|inner| inner.url().clone())
                .unwrap_or_else(|_| locator.url().clone());
            if !response.is_success() {
                warn!(%target, status = response.status, "frame target unavailable");
                return (String::new(), Some(context), false);
            }
            return (response.text(), Some(context), true);
        }

        let html = content.srcdoc.clone().unwrap_or_default();
        (html, enclosing, true)
    }

    fn run_frame_scripts(&self, scope: &mut FrameScope, document: NodeId) {
        let scripts = self.frame_scripts(document);
        if scripts.is_empty() {
            return;
        }

        let location = scope
            .context()
            .map_or_else(|| "about:blank".to_owned(), |url| url.to_string());
        let mut realm = match FrameRealm::new(self.config.realm.clone(), &location) {
            Ok(realm) => realm,
            Err(error) => {
                warn!(%error, %location, "script realm unavailable; scripts not run");
                return;
            }
        };
        let report = realm.run_scripts(&scripts);
        debug!(
            %location,
            executed = report.scripts_executed,
            failed = report.scripts_failed,
            skipped = report.scripts_skipped,
            "frame scripts ran"
        );

        scope.install_realm(realm);
        if let Err(error) = scope.drain_realm() {
            debug!(%error, "realm shims could not be drained");
        }
    }

    /// Inline and routed scripts of `document`, in document order.
    fn frame_scripts(&self, document: NodeId) -> Vec<ScriptSource> {
        let mut scripts = Vec::new();
        for (index, script) in self.tree.elements_by_tag(document, "script").into_iter().enumerate() {
            let kind = self
                .tree
                .attribute(script, "type")
                .map(|kind| kind.trim().to_ascii_lowercase())
                .unwrap_or_default();
            if !SCRIPT_TYPES.contains(&kind.as_str()) {
                continue;
            }

            let Some(src) = self.tree.attribute(script, "src") else {
                scripts.push(ScriptSource::inline(index, self.tree.text_content(script)));
                continue;
            };
            let response = match ResourceLocator::parse(src) {
                Ok(locator) => self.router.fetch_content(&locator),
                Err(error) => {
                    debug!(%src, %error, "script source unresolvable");
                    continue;
                }
            };
            if !response.is_success() {
                debug!(%src, status = response.status, "script source unavailable");
                continue;
            }
            let origin = self
                .tree
                .attribute(script, "data-vf-original-src")
                .unwrap_or(src)
                .to_owned();
            scripts.push(ScriptSource {
                origin,
                source: response.text(),
            });
        }
        scripts
    }
}
