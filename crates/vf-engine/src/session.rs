//! The virtualization session: owner of the host tree, the router and every
//! per-session registry.

use crate::config::EnginesChangedCallback;
use crate::config::LoadCallback;
use crate::config::RenderProps;
use crate::config::SessionConfig;
use crate::context::DEFERRED_SRC_ATTRIBUTE;
use crate::context::context_for;
use crate::lifecycle::PatchRecord;
use crate::registry::EngineRegistry;
use crate::rewriter::ContentRewriter;
use crate::rewriter::is_stylesheet_link;
use crate::router::ResourceStores;
use crate::router::SchemeRouter;
use crate::shims::FrameScope;
use crate::shims::LocalSocketServer;
use crate::shims::XhrRouteTable;
use crate::watcher::MutationWatcher;
use crate::watcher::PatchWork;
use crate::watcher::Worklist;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;
use tracing::debug;
use tracing::trace;
use tracing::warn;
use url::Url;
use vf_core::VirtResult;
use vf_dom::DomTree;
use vf_dom::NodeId;
use vf_dom::WindowId;
use vf_net::ResourceLocator;

const SOCKET_SERVER_IDENTITY: &str = "vframe-local";

pub struct VirtualizationSession {
    pub(crate) config: SessionConfig,
    pub(crate) tree: DomTree,
    pub(crate) router: Rc<SchemeRouter>,
    pub(crate) rewriter: ContentRewriter,
    pub(crate) watcher: MutationWatcher,
    pub(crate) worklist: Worklist,
    pub(crate) record: PatchRecord,
    pub(crate) registry: EngineRegistry,
    pub(crate) scopes: BTreeMap<WindowId, FrameScope>,
    pub(crate) sockets: Rc<LocalSocketServer>,
    pub(crate) xhr_routes: Rc<XhrRouteTable>,
    pub(crate) interception_table: Rc<[(String, String)]>,
    pub(crate) root_frame: Option<NodeId>,
    pub(crate) on_load: Option<LoadCallback>,
    pub(crate) on_engines_changed: Option<EnginesChangedCallback>,
}

impl fmt::Debug for VirtualizationSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VirtualizationSession")
            .field("root_frame", &self.root_frame)
            .field("frames", &self.scopes.len())
            .field("pending_work", &self.worklist.len())
            .field("live_dark_engines", &self.registry.live_count())
            .field("router", &self.router)
            .finish_non_exhaustive()
    }
}

impl VirtualizationSession {
    pub fn new(config: SessionConfig, stores: ResourceStores) -> Self {
        let router = Rc::new(SchemeRouter::new(stores));
        let rewriter = ContentRewriter::new(
            Rc::clone(&router),
            config.host_origin.clone(),
            config.root_url.clone(),
        );
        let interception_table = Rc::from(config.interception_table.clone());

        Self {
            config,
            tree: DomTree::new(),
            router,
            rewriter,
            watcher: MutationWatcher::new(),
            worklist: Worklist::default(),
            record: PatchRecord::default(),
            registry: EngineRegistry::new(),
            scopes: BTreeMap::new(),
            sockets: LocalSocketServer::new(SOCKET_SERVER_IDENTITY),
            xhr_routes: Rc::new(XhrRouteTable::new().with_default_route()),
            interception_table,
            root_frame: None,
            on_load: None,
            on_engines_changed: None,
        }
    }

    /// Replaces the XHR route table used by frames patched from now on.
    pub fn with_xhr_routes(mut self, routes: XhrRouteTable) -> Self {
        self.xhr_routes = Rc::new(routes);
        self
    }

    /// Creates the outer frame for `props.url` in the host document and
    /// patches everything reachable from it. A previous render is destroyed
    /// first.
    pub fn render(&mut self, props: RenderProps) -> VirtResult<NodeId> {
        if self.root_frame.is_some() {
            self.destroy();
        }

        let target = ResourceLocator::resolve(&props.url, self.config.root_url.as_ref())?;
        if self.config.root_url.is_none() {
            self.rewriter.set_root_url(Some(target.url().clone()));
        }
        self.router
            .set_host_callbacks(props.proxy.clone(), props.fetch_proxy.clone());
        self.on_load = props.on_load.clone();
        self.on_engines_changed = props.on_dark_engines_changed.clone();
        if !self.sockets.is_running() {
            self.sockets = LocalSocketServer::new(SOCKET_SERVER_IDENTITY);
        }

        let host_document = self.tree.host_document();
        let host_body = self.tree.host_body();
        let frame = self.tree.create_element(host_document, "iframe")?;
        self.tree.set_attribute(frame, "class", "vf-root-frame")?;
        self.tree
            .set_attribute(frame, DEFERRED_SRC_ATTRIBUTE, target.as_str())?;
        self.tree.append_child(host_body, frame)?;
        self.root_frame = Some(frame);
        debug!(url = %target.as_str(), frame, "rendering");

        self.worklist.push(PatchWork::Iframe(frame));
        self.pump();
        Ok(frame)
    }

    /// Drains observer records and the patch worklist until both are empty
    /// or the step limit is hit. Returns the number of work items handled.
    pub fn pump(&mut self) -> usize {
        let mut handled = 0_usize;
        loop {
            self.watcher.collect(&mut self.tree, &mut self.worklist);
            self.release_unloaded_windows();
            if self.worklist.is_empty() {
                break;
            }
            if handled >= self.config.max_pump_steps {
                warn!(pending = self.worklist.len(), "patch step limit reached; deferring the rest");
                break;
            }
            let Some(work) = self.worklist.pop() else {
                break;
            };
            if let Err(error) = self.process(work) {
                debug!(?work, %error, "patch step skipped");
            }
            handled = handled.saturating_add(1);
        }
        self.notify_engines_changed();
        handled
    }

    pub fn tree(&self) -> &DomTree {
        &self.tree
    }

    /// The host tree, for the embedded application's own DOM work. Changes
    /// under patched roots are picked up by the next [`Self::pump`].
    pub fn tree_mut(&mut self) -> &mut DomTree {
        &mut self.tree
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn router(&self) -> &Rc<SchemeRouter> {
        &self.router
    }

    pub fn rewriter(&self) -> &ContentRewriter {
        &self.rewriter
    }

    pub fn root_frame(&self) -> Option<NodeId> {
        self.root_frame
    }

    pub fn scope(&self, window: WindowId) -> Option<&FrameScope> {
        self.scopes.get(&window)
    }

    pub fn scope_mut(&mut self, window: WindowId) -> Option<&mut FrameScope> {
        self.scopes.get_mut(&window)
    }

    /// Scope of the window an iframe element hosts.
    pub fn scope_for_frame(&self, iframe: NodeId) -> Option<&FrameScope> {
        self.tree
            .frame_window(iframe)
            .and_then(|window| self.scopes.get(&window))
    }

    /// Every live frame scope, ordered by window id.
    pub fn scopes(&self) -> impl Iterator<Item = &FrameScope> {
        self.scopes.values()
    }

    pub fn frame_count(&self) -> usize {
        self.scopes.len()
    }

    pub fn patch_record(&self) -> &PatchRecord {
        &self.record
    }

    pub fn live_dark_engines(&self) -> usize {
        self.registry.live_count()
    }

    pub fn socket_server(&self) -> &Rc<LocalSocketServer> {
        &self.sockets
    }

    pub fn pending_work(&self) -> usize {
        self.worklist.len()
    }

    pub fn watched_roots(&self) -> usize {
        self.watcher.active_count(&self.tree)
    }

    /// Base URL for `node` as the resolver sees it right now.
    pub fn context_for(&self, node: NodeId) -> Option<Url> {
        context_for(&self.tree, node, self.config.root_url.as_ref())
    }

    fn process(&mut self, work: PatchWork) -> VirtResult<()> {
        match work {
            PatchWork::Iframe(iframe) => self.patch_iframe(iframe).map(|_| ()),
            PatchWork::ShadowHost(host) => self.patch_shadow_root(host).map(|_| ()),
            PatchWork::Stylesheet(link) => self.inline_stylesheet_late(link),
            PatchWork::Style(style) => self.rewrite_style_late(style),
            PatchWork::Reference { node, attribute } => self.virtualize_reference(node, attribute),
        }
    }

    fn inline_stylesheet_late(&mut self, link: NodeId) -> VirtResult<()> {
        if !is_stylesheet_link(&self.tree, link) {
            return Ok(());
        }
        let context = self.context_for(link);
        self.rewriter
            .inline_stylesheet(&mut self.tree, link, context.as_ref())?;
        Ok(())
    }

    fn rewrite_style_late(&mut self, style: NodeId) -> VirtResult<()> {
        if !self.tree.is_element(style, "style") {
            return Ok(());
        }
        let context = self.context_for(style);
        if self
            .rewriter
            .rewrite_style_element(&mut self.tree, style, context.as_ref())?
        {
            trace!(style, "style text rewritten");
        }
        Ok(())
    }

    fn virtualize_reference(&mut self, node: NodeId, attribute: &str) -> VirtResult<()> {
        if !self.tree.contains(node) {
            return Ok(());
        }
        let context = self.context_for(node);
        if self.tree.is_element(node, "script") {
            self.rewriter
                .rewrite_script_source(&mut self.tree, node, context.as_ref())?;
        } else {
            self.rewriter
                .virtualize_attribute(&mut self.tree, node, attribute, context.as_ref())?;
        }
        Ok(())
    }

    /// Drops the scopes of windows the tree unloaded since the last call.
    pub(crate) fn release_unloaded_windows(&mut self) {
        for window in self.tree.take_unloaded_windows() {
            if self.scopes.remove(&window).is_some() {
                trace!(window, "frame scope released");
            }
        }
    }

    pub(crate) fn notify_engines_changed(&self) {
        let Some(live) = self.registry.prune() else {
            return;
        };
        trace!(live, "dark-mode engine set changed");
        if let Some(callback) = &self.on_engines_changed {
            callback(live);
        }
    }
}
