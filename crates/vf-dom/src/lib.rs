//! Host DOM arena: documents, elements, shadow roots, browsing contexts and
//! mutation observation.
//!
//! Node and window ids are allocated monotonically and never reused, so an id
//! held after its node was discarded simply stops resolving.

pub mod hooks;
pub mod mutation;

use hooks::ElementCreationHook;
use hooks::PropertyInterceptor;
use mutation::MutationKind;
use mutation::MutationRecord;
use mutation::ObserveOptions;
use mutation::Observer;
use std::collections::BTreeMap;
use std::collections::HashMap;
use std::collections::HashSet;
use std::fmt;
use std::rc::Rc;
use vf_core::VirtError;
use vf_core::VirtResult;

/// ID used to address nodes in the DOM arena.
pub type NodeId = u64;
/// ID of a browsing context (the top window or an iframe's content window).
pub type WindowId = u64;
/// ID of a registered mutation observer.
pub type ObserverId = u64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentData {
    pub window: Option<WindowId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementData {
    pub tag: String,
    pub attributes: Vec<(String, String)>,
    pub shadow_root: Option<NodeId>,
    pub content_window: Option<WindowId>,
}

impl ElementData {
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    Document(DocumentData),
    Element(ElementData),
    Text(String),
    Comment(String),
    Doctype(String),
    ShadowRoot { host: NodeId },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    pub owner_document: NodeId,
    pub kind: NodeKind,
}

/// A browsing context. Iframe windows are created when the iframe becomes
/// connected and unloaded when it is removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Window {
    pub document: NodeId,
    pub frame_element: Option<NodeId>,
    pub parent: Option<WindowId>,
}

/// The whole host platform tree: every document of every frame lives here.
pub struct DomTree {
    nodes: HashMap<NodeId, Node>,
    windows: BTreeMap<WindowId, Window>,
    observers: BTreeMap<ObserverId, Observer>,
    creation_hooks: HashMap<NodeId, Vec<Rc<dyn ElementCreationHook>>>,
    interceptors: HashMap<(NodeId, String), Rc<dyn PropertyInterceptor>>,
    unloaded_windows: Vec<WindowId>,
    next_node: NodeId,
    next_window: WindowId,
    next_observer: ObserverId,
    top_window: WindowId,
    host_body: NodeId,
}

impl fmt::Debug for DomTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DomTree")
            .field("nodes", &self.nodes.len())
            .field("windows", &self.windows.len())
            .field("observers", &self.observers.len())
            .field("top_window", &self.top_window)
            .finish()
    }
}

impl Default for DomTree {
    fn default() -> Self {
        Self::new()
    }
}

impl DomTree {
    /// Creates the host platform with a top window whose document holds
    /// `<html><head></head><body></body></html>`.
    pub fn new() -> Self {
        let mut tree = Self {
            nodes: HashMap::new(),
            windows: BTreeMap::new(),
            observers: BTreeMap::new(),
            creation_hooks: HashMap::new(),
            interceptors: HashMap::new(),
            unloaded_windows: Vec::new(),
            next_node: 1,
            next_window: 1,
            next_observer: 1,
            top_window: 0,
            host_body: 0,
        };

        let top = tree.alloc_window(None, None);
        tree.top_window = top;
        let document = tree.window_document(top).unwrap_or_default();
        let html = tree.insert_element_node(document, "html");
        let head = tree.insert_element_node(document, "head");
        let body = tree.insert_element_node(document, "body");
        tree.link_child(document, html);
        tree.link_child(html, head);
        tree.link_child(html, body);
        tree.host_body = body;
        tree
    }

    pub fn top_window(&self) -> WindowId {
        self.top_window
    }

    pub fn host_document(&self) -> NodeId {
        self.window_document(self.top_window).unwrap_or_default()
    }

    pub fn host_body(&self) -> NodeId {
        self.host_body
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn window_count(&self) -> usize {
        self.windows.len()
    }

    pub fn contains(&self, node: NodeId) -> bool {
        self.nodes.contains_key(&node)
    }

    pub fn node(&self, node: NodeId) -> Option<&Node> {
        self.nodes.get(&node)
    }

    pub fn window(&self, window: WindowId) -> Option<&Window> {
        self.windows.get(&window)
    }

    fn node_ref(&self, node: NodeId) -> VirtResult<&Node> {
        self.nodes
            .get(&node)
            .ok_or_else(|| VirtError::new("dom.node_missing", format!("node {node} does not exist")))
    }

    fn element_mut(&mut self, node: NodeId) -> VirtResult<&mut ElementData> {
        match self.nodes.get_mut(&node).map(|entry| &mut entry.kind) {
            Some(NodeKind::Element(element)) => Ok(element),
            Some(_) => Err(VirtError::new(
                "dom.not_element",
                format!("node {node} is not an element"),
            )),
            None => Err(VirtError::new(
                "dom.node_missing",
                format!("node {node} does not exist"),
            )),
        }
    }

    pub fn element(&self, node: NodeId) -> Option<&ElementData> {
        match self.nodes.get(&node).map(|entry| &entry.kind) {
            Some(NodeKind::Element(element)) => Some(element),
            _ => None,
        }
    }

    pub fn tag_name(&self, node: NodeId) -> Option<&str> {
        self.element(node).map(|element| element.tag.as_str())
    }

    pub fn is_element(&self, node: NodeId, tag: &str) -> bool {
        self.tag_name(node).is_some_and(|name| name == tag)
    }

    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.nodes.get(&node).and_then(|entry| entry.parent)
    }

    pub fn children(&self, node: NodeId) -> &[NodeId] {
        self.nodes
            .get(&node)
            .map(|entry| entry.children.as_slice())
            .unwrap_or(&[])
    }

    pub fn owner_document(&self, node: NodeId) -> Option<NodeId> {
        self.nodes.get(&node).map(|entry| entry.owner_document)
    }

    // ---- creation ---------------------------------------------------------

    /// Creates a document with no browsing context, used for offline parsing.
    pub fn create_detached_document(&mut self) -> NodeId {
        self.alloc_document(None)
    }

    /// Creates an element through `document`'s creation entry point, running
    /// every creation hook registered on that document.
    pub fn create_element(&mut self, document: NodeId, tag: &str) -> VirtResult<NodeId> {
        self.ensure_document(document)?;
        let tag = tag.to_ascii_lowercase();
        let node = self.insert_element_node(document, &tag);

        let hooks = self
            .creation_hooks
            .get(&document)
            .cloned()
            .unwrap_or_default();
        for hook in hooks {
            for (property, interceptor) in hook.element_created(&tag) {
                // One accessor override per element and property.
                self.interceptors
                    .entry((node, property))
                    .or_insert(interceptor);
            }
        }

        Ok(node)
    }

    pub fn create_text(&mut self, document: NodeId, text: &str) -> VirtResult<NodeId> {
        self.ensure_document(document)?;
        Ok(self.alloc_node(document, NodeKind::Text(text.to_owned())))
    }

    pub fn create_comment(&mut self, document: NodeId, text: &str) -> VirtResult<NodeId> {
        self.ensure_document(document)?;
        Ok(self.alloc_node(document, NodeKind::Comment(text.to_owned())))
    }

    pub fn create_doctype(&mut self, document: NodeId, name: &str) -> VirtResult<NodeId> {
        self.ensure_document(document)?;
        Ok(self.alloc_node(document, NodeKind::Doctype(name.to_owned())))
    }

    pub fn add_creation_hook(
        &mut self,
        document: NodeId,
        hook: Rc<dyn ElementCreationHook>,
    ) -> VirtResult<()> {
        self.ensure_document(document)?;
        self.creation_hooks.entry(document).or_default().push(hook);
        Ok(())
    }

    pub fn creation_hook_count(&self, document: NodeId) -> usize {
        self.creation_hooks.get(&document).map_or(0, Vec::len)
    }

    pub fn has_interceptor(&self, node: NodeId, property: &str) -> bool {
        self.interceptors
            .contains_key(&(node, property.to_owned()))
    }

    // ---- tree mutation ----------------------------------------------------

    pub fn append_child(&mut self, parent: NodeId, child: NodeId) -> VirtResult<()> {
        self.insert_before(parent, child, None)
    }

    pub fn insert_before(
        &mut self,
        parent: NodeId,
        child: NodeId,
        reference: Option<NodeId>,
    ) -> VirtResult<()> {
        self.validate_insertion(parent, child)?;

        if let Some(old_parent) = self.parent(child) {
            self.remove_child(old_parent, child)?;
        }

        let owner = match &self.node_ref(parent)?.kind {
            NodeKind::Document(_) => parent,
            _ => self.node_ref(parent)?.owner_document,
        };
        self.adopt_subtree(child, owner);

        let position = match reference {
            Some(reference) => Some(
                self.children(parent)
                    .iter()
                    .position(|candidate| *candidate == reference)
                    .ok_or_else(|| {
                        VirtError::new(
                            "dom.reference_not_child",
                            format!("node {reference} is not a child of {parent}"),
                        )
                    })?,
            ),
            None => None,
        };

        if let Some(entry) = self.nodes.get_mut(&child) {
            entry.parent = Some(parent);
        }
        if let Some(entry) = self.nodes.get_mut(&parent) {
            match position {
                Some(index) => entry.children.insert(index, child),
                None => entry.children.push(child),
            }
        }

        self.queue_record(MutationRecord {
            target: parent,
            kind: MutationKind::ChildList {
                added: vec![child],
                removed: Vec::new(),
            },
        });

        if self.is_connected(parent) {
            self.connect_frames(child);
        }

        Ok(())
    }

    pub fn remove_child(&mut self, parent: NodeId, child: NodeId) -> VirtResult<()> {
        if self.parent(child) != Some(parent) {
            return Err(VirtError::new(
                "dom.not_child",
                format!("node {child} is not a child of {parent}"),
            ));
        }

        let was_connected = self.is_connected(parent);
        if let Some(entry) = self.nodes.get_mut(&parent) {
            entry.children.retain(|candidate| *candidate != child);
        }
        if let Some(entry) = self.nodes.get_mut(&child) {
            entry.parent = None;
        }

        self.queue_record(MutationRecord {
            target: parent,
            kind: MutationKind::ChildList {
                added: Vec::new(),
                removed: vec![child],
            },
        });

        if was_connected {
            self.disconnect_frames(child);
        }

        Ok(())
    }

    /// Detaches `node` from its parent, if any.
    pub fn detach(&mut self, node: NodeId) -> VirtResult<()> {
        match self.parent(node) {
            Some(parent) => self.remove_child(parent, node),
            None => Ok(()),
        }
    }

    pub fn attribute(&self, node: NodeId, name: &str) -> Option<&str> {
        self.element(node).and_then(|element| element.attribute(name))
    }

    pub fn attributes(&self, node: NodeId) -> &[(String, String)] {
        self.element(node)
            .map(|element| element.attributes.as_slice())
            .unwrap_or(&[])
    }

    /// Markup-level attribute write (`setAttribute`). Never intercepted.
    pub fn set_attribute(&mut self, node: NodeId, name: &str, value: &str) -> VirtResult<()> {
        let name = name.to_ascii_lowercase();
        let element = self.element_mut(node)?;
        let old_value = match element.attributes.iter_mut().find(|(key, _)| *key == name) {
            Some(entry) => Some(std::mem::replace(&mut entry.1, value.to_owned())),
            None => {
                element.attributes.push((name.clone(), value.to_owned()));
                None
            }
        };

        self.queue_record(MutationRecord {
            target: node,
            kind: MutationKind::Attribute { name, old_value },
        });
        Ok(())
    }

    pub fn remove_attribute(&mut self, node: NodeId, name: &str) -> VirtResult<Option<String>> {
        let name = name.to_ascii_lowercase();
        let element = self.element_mut(node)?;
        let Some(index) = element.attributes.iter().position(|(key, _)| *key == name) else {
            return Ok(None);
        };
        let (_, old_value) = element.attributes.remove(index);

        self.queue_record(MutationRecord {
            target: node,
            kind: MutationKind::Attribute {
                name,
                old_value: Some(old_value.clone()),
            },
        });
        Ok(Some(old_value))
    }

    /// Script-level property read (`element.src`). Reads pass through.
    pub fn property(&self, node: NodeId, property: &str) -> Option<&str> {
        self.attribute(node, property)
    }

    /// Script-level property write (`element.src = value`). When an accessor
    /// override is attached, the interceptor decides what the original setter
    /// stores and the assigned value is kept on `data-vf-original-<property>`.
    pub fn set_property(&mut self, node: NodeId, property: &str, value: &str) -> VirtResult<()> {
        let property = property.to_ascii_lowercase();
        let interceptor = self
            .interceptors
            .get(&(node, property.clone()))
            .cloned();

        let Some(interceptor) = interceptor else {
            return self.set_attribute(node, &property, value);
        };

        let tag = self
            .tag_name(node)
            .map(str::to_owned)
            .ok_or_else(|| VirtError::new("dom.not_element", format!("node {node} is not an element")))?;
        let write = interceptor.intercept_write(&tag, &property, value);
        self.set_attribute(node, &write.attribute, &write.value)?;
        self.set_attribute(node, &format!("data-vf-original-{property}"), value)
    }

    pub fn text_content(&self, node: NodeId) -> String {
        let mut out = String::new();
        for id in self.inclusive_subtree(node, false) {
            if let Some(NodeKind::Text(text)) = self.nodes.get(&id).map(|entry| &entry.kind) {
                out.push_str(text);
            }
        }
        out
    }

    pub fn set_text_content(&mut self, node: NodeId, text: &str) -> VirtResult<()> {
        let document = self
            .owner_document(node)
            .ok_or_else(|| VirtError::new("dom.node_missing", format!("node {node} does not exist")))?;
        for child in self.children(node).to_vec() {
            self.remove_child(node, child)?;
            self.discard(child);
        }
        if !text.is_empty() {
            let text_node = self.create_text(document, text)?;
            self.append_child(node, text_node)?;
        }
        Ok(())
    }

    // ---- shadow trees -----------------------------------------------------

    pub fn attach_shadow(&mut self, host: NodeId) -> VirtResult<NodeId> {
        let owner = self.node_ref(host)?.owner_document;
        if self.element_mut(host)?.shadow_root.is_some() {
            return Err(VirtError::new(
                "dom.shadow_exists",
                format!("element {host} already hosts a shadow root"),
            ));
        }

        let root = self.alloc_node(owner, NodeKind::ShadowRoot { host });
        self.element_mut(host)?.shadow_root = Some(root);
        self.queue_record(MutationRecord {
            target: host,
            kind: MutationKind::ShadowRootAttached { shadow_root: root },
        });
        Ok(root)
    }

    pub fn shadow_root(&self, host: NodeId) -> Option<NodeId> {
        self.element(host).and_then(|element| element.shadow_root)
    }

    pub fn shadow_host(&self, root: NodeId) -> Option<NodeId> {
        match self.nodes.get(&root).map(|entry| &entry.kind) {
            Some(NodeKind::ShadowRoot { host }) => Some(*host),
            _ => None,
        }
    }

    // ---- traversal --------------------------------------------------------

    /// Root of the tree `node` lives in: a document, a shadow root, or the
    /// topmost ancestor of a detached subtree.
    pub fn tree_root(&self, node: NodeId) -> NodeId {
        let mut current = node;
        while let Some(parent) = self.parent(current) {
            current = parent;
        }
        current
    }

    /// Pre-order descendants of `root`, excluding `root`, not entering shadow trees.
    pub fn descendants(&self, root: NodeId) -> Vec<NodeId> {
        let mut out = self.inclusive_subtree(root, false);
        if !out.is_empty() {
            out.remove(0);
        }
        out
    }

    pub fn elements_by_tag(&self, root: NodeId, tag: &str) -> Vec<NodeId> {
        self.descendants(root)
            .into_iter()
            .filter(|node| self.is_element(*node, tag))
            .collect()
    }

    pub fn first_element_by_tag(&self, root: NodeId, tag: &str) -> Option<NodeId> {
        self.descendants(root)
            .into_iter()
            .find(|node| self.is_element(*node, tag))
    }

    fn inclusive_subtree(&self, root: NodeId, cross_shadow: bool) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            let Some(entry) = self.nodes.get(&id) else {
                continue;
            };
            out.push(id);
            for child in entry.children.iter().rev() {
                stack.push(*child);
            }
            if cross_shadow {
                if let NodeKind::Element(ElementData {
                    shadow_root: Some(shadow),
                    ..
                }) = &entry.kind
                {
                    stack.push(*shadow);
                }
            }
        }
        out
    }

    pub fn is_connected(&self, node: NodeId) -> bool {
        let root = self.tree_root(node);
        match self.nodes.get(&root).map(|entry| &entry.kind) {
            Some(NodeKind::Document(data)) => data.window.is_some(),
            Some(NodeKind::ShadowRoot { host }) => self.is_connected(*host),
            _ => false,
        }
    }

    // ---- browsing contexts ------------------------------------------------

    pub fn window_document(&self, window: WindowId) -> Option<NodeId> {
        self.windows.get(&window).map(|entry| entry.document)
    }

    pub fn document_window(&self, document: NodeId) -> Option<WindowId> {
        match self.nodes.get(&document).map(|entry| &entry.kind) {
            Some(NodeKind::Document(data)) => data.window,
            _ => None,
        }
    }

    /// The window's frame collection, in creation order.
    pub fn window_frames(&self, window: WindowId) -> Vec<WindowId> {
        self.windows
            .iter()
            .filter(|(_, entry)| entry.parent == Some(window))
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn frame_window(&self, iframe: NodeId) -> Option<WindowId> {
        self.element(iframe).and_then(|element| element.content_window)
    }

    pub fn content_document(&self, iframe: NodeId) -> Option<NodeId> {
        self.frame_window(iframe)
            .and_then(|window| self.window_document(window))
    }

    /// Replaces the window's document with a fresh empty one, unloading every
    /// nested frame of the old document. Returns the new document.
    pub fn open_document(&mut self, window: WindowId) -> VirtResult<NodeId> {
        let old = self.window_document(window).ok_or_else(|| {
            VirtError::new("dom.window_missing", format!("window {window} does not exist"))
        })?;

        for child in self.window_frames(window) {
            self.unload_window(child);
        }
        self.discard(old);

        let document = self.alloc_document(Some(window));
        if let Some(entry) = self.windows.get_mut(&window) {
            entry.document = document;
        }
        Ok(document)
    }

    /// Windows unloaded since the last call.
    pub fn take_unloaded_windows(&mut self) -> Vec<WindowId> {
        std::mem::take(&mut self.unloaded_windows)
    }

    // ---- observers --------------------------------------------------------

    pub fn observe(&mut self, root: NodeId, options: ObserveOptions) -> VirtResult<ObserverId> {
        self.node_ref(root)?;
        let id = self.next_observer;
        self.next_observer = self.next_observer.saturating_add(1);
        self.observers.insert(
            id,
            Observer {
                root,
                options,
                records: Vec::new(),
            },
        );
        Ok(id)
    }

    pub fn observer_root(&self, observer: ObserverId) -> Option<NodeId> {
        self.observers.get(&observer).map(|entry| entry.root)
    }

    pub fn is_observing(&self, observer: ObserverId) -> bool {
        self.observers.contains_key(&observer)
    }

    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    /// Observers with undelivered records, in registration order.
    pub fn pending_observers(&self) -> Vec<ObserverId> {
        self.observers
            .iter()
            .filter(|(_, entry)| !entry.records.is_empty())
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn take_records(&mut self, observer: ObserverId) -> Vec<MutationRecord> {
        self.observers
            .get_mut(&observer)
            .map(|entry| std::mem::take(&mut entry.records))
            .unwrap_or_default()
    }

    pub fn disconnect(&mut self, observer: ObserverId) -> bool {
        self.observers.remove(&observer).is_some()
    }

    fn queue_record(&mut self, record: MutationRecord) {
        if self.observers.is_empty() {
            return;
        }

        let mut chain = HashSet::new();
        let mut current = Some(record.target);
        while let Some(id) = current {
            chain.insert(id);
            current = self.parent(id);
        }

        for observer in self.observers.values_mut() {
            if !observer.wants(&record.kind) {
                continue;
            }
            let matches = observer.root == record.target
                || (observer.options.subtree && chain.contains(&observer.root));
            if matches {
                observer.records.push(record.clone());
            }
        }
    }

    // ---- internals --------------------------------------------------------

    /// Frees a subtree (including shadow trees) from the arena.
    pub fn discard(&mut self, root: NodeId) {
        let doomed = self.inclusive_subtree(root, true);
        let doomed_set: HashSet<NodeId> = doomed.iter().copied().collect();

        if let Some(parent) = self.parent(root) {
            if let Some(entry) = self.nodes.get_mut(&parent) {
                entry.children.retain(|candidate| *candidate != root);
            }
        }

        for id in &doomed {
            self.nodes.remove(id);
            self.creation_hooks.remove(id);
        }
        self.interceptors
            .retain(|(node, _), _| !doomed_set.contains(node));
        self.observers
            .retain(|_, observer| !doomed_set.contains(&observer.root));
    }

    fn unload_window(&mut self, window: WindowId) {
        let mut order = Vec::new();
        let mut stack = vec![window];
        while let Some(current) = stack.pop() {
            order.push(current);
            stack.extend(self.window_frames(current));
        }

        // Innermost first so each document is gone before its parent's.
        for current in order.into_iter().rev() {
            let Some(entry) = self.windows.remove(&current) else {
                continue;
            };
            self.discard(entry.document);
            if let Some(frame) = entry.frame_element {
                if let Some(NodeKind::Element(element)) =
                    self.nodes.get_mut(&frame).map(|node| &mut node.kind)
                {
                    element.content_window = None;
                }
            }
            self.unloaded_windows.push(current);
        }
    }

    fn connect_frames(&mut self, root: NodeId) {
        for id in self.inclusive_subtree(root, true) {
            let needs_window = self
                .element(id)
                .is_some_and(|element| element.tag == "iframe" && element.content_window.is_none());
            if !needs_window {
                continue;
            }

            let parent_window = self
                .owner_document(id)
                .and_then(|document| self.document_window(document));
            let window = self.alloc_window(Some(id), parent_window);
            if let Some(NodeKind::Element(element)) =
                self.nodes.get_mut(&id).map(|node| &mut node.kind)
            {
                element.content_window = Some(window);
            }
        }
    }

    fn disconnect_frames(&mut self, root: NodeId) {
        for id in self.inclusive_subtree(root, true) {
            if let Some(window) = self.frame_window(id) {
                self.unload_window(window);
            }
        }
    }

    fn validate_insertion(&self, parent: NodeId, child: NodeId) -> VirtResult<()> {
        let parent_node = self.node_ref(parent)?;
        let child_node = self.node_ref(child)?;

        if matches!(
            parent_node.kind,
            NodeKind::Text(_) | NodeKind::Comment(_) | NodeKind::Doctype(_)
        ) {
            return Err(VirtError::new(
                "dom.leaf_parent",
                format!("node {parent} cannot have children"),
            ));
        }

        if matches!(
            child_node.kind,
            NodeKind::Document(_) | NodeKind::ShadowRoot { .. }
        ) {
            return Err(VirtError::new(
                "dom.root_insertion",
                format!("node {child} is a tree root and cannot be inserted"),
            ));
        }

        let mut current = Some(parent);
        while let Some(id) = current {
            if id == child {
                return Err(VirtError::new(
                    "dom.cycle",
                    format!("inserting {child} under {parent} would create a cycle"),
                ));
            }
            current = self.parent(id);
        }

        Ok(())
    }

    fn ensure_document(&self, document: NodeId) -> VirtResult<()> {
        match self.node_ref(document)?.kind {
            NodeKind::Document(_) => Ok(()),
            _ => Err(VirtError::new(
                "dom.not_document",
                format!("node {document} is not a document"),
            )),
        }
    }

    fn adopt_subtree(&mut self, root: NodeId, owner: NodeId) {
        for id in self.inclusive_subtree(root, true) {
            if let Some(entry) = self.nodes.get_mut(&id) {
                entry.owner_document = owner;
            }
        }
    }

    fn alloc_node(&mut self, owner_document: NodeId, kind: NodeKind) -> NodeId {
        let id = self.next_node;
        self.next_node = self.next_node.saturating_add(1);
        self.nodes.insert(
            id,
            Node {
                parent: None,
                children: Vec::new(),
                owner_document,
                kind,
            },
        );
        id
    }

    fn alloc_document(&mut self, window: Option<WindowId>) -> NodeId {
        let id = self.next_node;
        self.alloc_node(id, NodeKind::Document(DocumentData { window }))
    }

    fn alloc_window(&mut self, frame_element: Option<NodeId>, parent: Option<WindowId>) -> WindowId {
        let id = self.next_window;
        self.next_window = self.next_window.saturating_add(1);
        let document = self.alloc_document(Some(id));
        self.windows.insert(
            id,
            Window {
                document,
                frame_element,
                parent,
            },
        );
        id
    }

    fn insert_element_node(&mut self, document: NodeId, tag: &str) -> NodeId {
        self.alloc_node(
            document,
            NodeKind::Element(ElementData {
                tag: tag.to_owned(),
                attributes: Vec::new(),
                shadow_root: None,
                content_window: None,
            }),
        )
    }

    fn link_child(&mut self, parent: NodeId, child: NodeId) {
        if let Some(entry) = self.nodes.get_mut(&child) {
            entry.parent = Some(parent);
        }
        if let Some(entry) = self.nodes.get_mut(&parent) {
            entry.children.push(child);
        }
    }
}
