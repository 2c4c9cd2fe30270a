//! Mutation watching for patched document roots.
//!
//! The watcher never patches anything itself. It turns observer records into
//! [`PatchWork`] items on a [`Worklist`] that the session drains.

use crate::context::DEFERRED_SRCDOC_ATTRIBUTE;
use crate::context::DEFERRED_SRC_ATTRIBUTE;
use crate::rewriter::is_stylesheet_link;
use std::collections::HashSet;
use std::collections::VecDeque;
use tracing::trace;
use vf_core::VirtResult;
use vf_dom::DomTree;
use vf_dom::NodeId;
use vf_dom::ObserverId;
use vf_dom::mutation::MutationKind;
use vf_dom::mutation::MutationRecord;
use vf_dom::mutation::ObserveOptions;

const FRAME_ATTRIBUTES: &[&str] = &["src", "srcdoc", DEFERRED_SRC_ATTRIBUTE, DEFERRED_SRCDOC_ATTRIBUTE];

/// One unit of patch work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PatchWork {
    Iframe(NodeId),
    ShadowHost(NodeId),
    /// A `<link rel="stylesheet">` to inline post-hoc.
    Stylesheet(NodeId),
    /// A `<style>` element whose text needs its `url(...)` references
    /// rewritten.
    Style(NodeId),
    /// A raw URL attribute on an element that entered a patched tree.
    Reference {
        node: NodeId,
        attribute: &'static str,
    },
}

/// FIFO of pending patch work. Queuing an item that is already pending is
/// a no-op.
#[derive(Debug, Default)]
pub struct Worklist {
    queue: VecDeque<PatchWork>,
    pending: HashSet<PatchWork>,
}

impl Worklist {
    pub fn push(&mut self, work: PatchWork) -> bool {
        if !self.pending.insert(work) {
            return false;
        }
        self.queue.push_back(work);
        true
    }

    pub fn pop(&mut self) -> Option<PatchWork> {
        let work = self.queue.pop_front()?;
        self.pending.remove(&work);
        Some(work)
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn clear(&mut self) {
        self.queue.clear();
        self.pending.clear();
    }

    /// Queues the patchable nodes already present under `root`: iframes,
    /// shadow hosts and stylesheet links.
    pub fn seed_from(&mut self, tree: &DomTree, root: NodeId) {
        for node in tree.descendants(root) {
            if tree.is_element(node, "iframe") {
                self.push(PatchWork::Iframe(node));
            } else if is_stylesheet_link(tree, node) {
                self.push(PatchWork::Stylesheet(node));
            }
            if tree.shadow_root(node).is_some() {
                self.push(PatchWork::ShadowHost(node));
            }
        }
    }
}

/// Owns one observer per watched root (frame document or shadow root).
#[derive(Debug, Default)]
pub struct MutationWatcher {
    observers: Vec<ObserverId>,
}

impl MutationWatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts watching `root` for child-list and attribute changes across
    /// its subtree.
    pub fn arm(&mut self, tree: &mut DomTree, root: NodeId) -> VirtResult<ObserverId> {
        let observer = tree.observe(root, ObserveOptions::all())?;
        self.observers.push(observer);
        trace!(root, observer, "watching document root");
        Ok(observer)
    }

    /// Number of observers still alive. Observers of unloaded documents
    /// are dropped by the tree and stop counting here.
    pub fn active_count(&self, tree: &DomTree) -> usize {
        self.observers
            .iter()
            .filter(|observer| tree.is_observing(**observer))
            .count()
    }

    /// Delivers pending records and queues the resulting work. Returns the
    /// number of records handled.
    pub fn collect(&mut self, tree: &mut DomTree, worklist: &mut Worklist) -> usize {
        self.observers.retain(|observer| tree.is_observing(*observer));

        let mut handled = 0_usize;
        for observer in tree.pending_observers() {
            if !self.observers.contains(&observer) {
                continue;
            }
            for record in tree.take_records(observer) {
                classify(tree, &record, worklist);
                handled = handled.saturating_add(1);
            }
        }
        handled
    }

    pub fn disconnect_all(&mut self, tree: &mut DomTree) {
        for observer in self.observers.drain(..) {
            tree.disconnect(observer);
        }
    }
}

fn classify(tree: &DomTree, record: &MutationRecord, worklist: &mut Worklist) {
    match &record.kind {
        MutationKind::ChildList { added, .. } => {
            for node in added {
                classify_added(tree, *node, worklist);
            }
        }
        MutationKind::Attribute { name, .. } => {
            let target = record.target;
            if tree.is_element(target, "iframe") && FRAME_ATTRIBUTES.contains(&name.as_str()) {
                worklist.push(PatchWork::Iframe(target));
            } else if name == "href" && is_stylesheet_link(tree, target) {
                worklist.push(PatchWork::Stylesheet(target));
            }
        }
        MutationKind::ShadowRootAttached { .. } => {
            worklist.push(PatchWork::ShadowHost(record.target));
        }
    }
}

fn classify_added(tree: &DomTree, added: NodeId, worklist: &mut Worklist) {
    let mut nodes = vec![added];
    nodes.extend(tree.descendants(added));

    for node in nodes {
        let Some(tag) = tree.tag_name(node) else {
            // Text written into an existing <style> changes its sheet.
            if let Some(style) = tree.parent(node).filter(|parent| tree.is_element(*parent, "style")) {
                worklist.push(PatchWork::Style(style));
            }
            continue;
        };
        match tag {
            "iframe" => {
                worklist.push(PatchWork::Iframe(node));
            }
            "style" => {
                worklist.push(PatchWork::Style(node));
            }
            "link" if is_stylesheet_link(tree, node) => {
                worklist.push(PatchWork::Stylesheet(node));
            }
            "img" | "script" if tree.attribute(node, "src").is_some() => {
                worklist.push(PatchWork::Reference {
                    node,
                    attribute: "src",
                });
            }
            _ => {}
        }
        if tree.shadow_root(node).is_some() {
            worklist.push(PatchWork::ShadowHost(node));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::MutationWatcher;
    use super::PatchWork;
    use super::Worklist;
    use vf_dom::DomTree;
    use vf_dom::NodeId;
    use vf_html::HtmlParser;

    fn element(tree: &mut DomTree, document: NodeId, tag: &str) -> NodeId {
        match tree.create_element(document, tag) {
            Ok(node) => node,
            Err(error) => panic!("{error}"),
        }
    }

    fn drain(worklist: &mut Worklist) -> Vec<PatchWork> {
        std::iter::from_fn(|| worklist.pop()).collect()
    }

    #[test]
    fn added_subtrees_yield_frames_links_and_references() {
        let mut tree = DomTree::new();
        let document = tree.host_document();
        let body = tree.host_body();
        let mut watcher = MutationWatcher::new();
        let mut worklist = Worklist::default();
        assert!(watcher.arm(&mut tree, document).is_ok());

        let container = element(&mut tree, document, "div");
        let iframe = element(&mut tree, document, "iframe");
        let link = element(&mut tree, document, "link");
        let img = element(&mut tree, document, "img");
        let bare_img = element(&mut tree, document, "img");
        assert!(tree.set_attribute(link, "rel", "stylesheet").is_ok());
        assert!(tree.set_attribute(link, "href", "a.css").is_ok());
        assert!(tree.set_attribute(img, "src", "a.png").is_ok());
        for child in [iframe, link, img, bare_img] {
            assert!(tree.append_child(container, child).is_ok());
        }
        assert!(tree.append_child(body, container).is_ok());

        assert_eq!(watcher.collect(&mut tree, &mut worklist), 1);
        assert_eq!(
            drain(&mut worklist),
            vec![
                PatchWork::Iframe(iframe),
                PatchWork::Stylesheet(link),
                PatchWork::Reference {
                    node: img,
                    attribute: "src",
                },
            ]
        );
    }

    #[test]
    fn frame_attribute_changes_and_shadow_roots_are_reported_once() {
        let mut tree = DomTree::new();
        let document = tree.host_document();
        let body = tree.host_body();
        let iframe = element(&mut tree, document, "iframe");
        let host = element(&mut tree, document, "section");
        assert!(tree.append_child(body, iframe).is_ok());
        assert!(tree.append_child(body, host).is_ok());

        let mut watcher = MutationWatcher::new();
        let mut worklist = Worklist::default();
        assert!(watcher.arm(&mut tree, document).is_ok());

        assert!(tree.set_attribute(iframe, "data-vf-src", "a.html").is_ok());
        assert!(tree.set_attribute(iframe, "data-vf-src", "b.html").is_ok());
        assert!(tree.set_attribute(iframe, "title", "ignored").is_ok());
        assert!(tree.attach_shadow(host).is_ok());

        watcher.collect(&mut tree, &mut worklist);
        assert_eq!(
            drain(&mut worklist),
            vec![PatchWork::Iframe(iframe), PatchWork::ShadowHost(host)]
        );
    }

    #[test]
    fn style_elements_and_their_text_are_reported() {
        let mut tree = DomTree::new();
        let document = tree.host_document();
        let body = tree.host_body();
        let existing = element(&mut tree, document, "style");
        assert!(tree.append_child(body, existing).is_ok());

        let mut watcher = MutationWatcher::new();
        let mut worklist = Worklist::default();
        assert!(watcher.arm(&mut tree, document).is_ok());

        let added = element(&mut tree, document, "style");
        assert!(tree.append_child(body, added).is_ok());
        assert!(tree.set_text_content(existing, "p { color: red }").is_ok());

        watcher.collect(&mut tree, &mut worklist);
        assert_eq!(
            drain(&mut worklist),
            vec![PatchWork::Style(added), PatchWork::Style(existing)]
        );
    }

    #[test]
    fn pending_work_is_queued_once_until_popped() {
        let mut worklist = Worklist::default();
        assert!(worklist.push(PatchWork::Iframe(7)));
        assert!(worklist.push(PatchWork::Style(7)));
        assert!(!worklist.push(PatchWork::Iframe(7)));
        assert_eq!(worklist.len(), 2);

        assert_eq!(worklist.pop(), Some(PatchWork::Iframe(7)));
        assert!(worklist.push(PatchWork::Iframe(7)));
        assert!(!worklist.push(PatchWork::Style(7)));
        assert_eq!(
            drain(&mut worklist),
            vec![PatchWork::Style(7), PatchWork::Iframe(7)]
        );

        assert!(worklist.push(PatchWork::ShadowHost(3)));
        worklist.clear();
        assert!(worklist.is_empty());
        assert!(worklist.push(PatchWork::ShadowHost(3)));
    }

    #[test]
    fn unloaded_documents_stop_being_watched() {
        let mut tree = DomTree::new();
        let document = tree.host_document();
        let body = tree.host_body();
        let iframe = element(&mut tree, document, "iframe");
        assert!(tree.append_child(body, iframe).is_ok());
        let Some(frame_document) = tree.content_document(iframe) else {
            panic!("connected iframe has no document");
        };

        let mut watcher = MutationWatcher::new();
        let mut worklist = Worklist::default();
        assert!(watcher.arm(&mut tree, frame_document).is_ok());
        assert_eq!(watcher.active_count(&tree), 1);

        assert!(tree.detach(iframe).is_ok());
        assert_eq!(watcher.collect(&mut tree, &mut worklist), 0);
        assert_eq!(watcher.active_count(&tree), 0);

        watcher.disconnect_all(&mut tree);
        assert_eq!(tree.observer_count(), 0);
    }

    #[test]
    fn seeding_finds_parsed_frames() {
        let mut tree = DomTree::new();
        let document = match HtmlParser.parse_document(
            &mut tree,
            r#"<div><iframe data-vf-src="a.html"></iframe><link rel="stylesheet" href="x.css"></div>"#,
        ) {
            Ok(document) => document,
            Err(error) => panic!("{error}"),
        };
        let mut worklist = Worklist::default();
        worklist.seed_from(&tree, document);
        assert_eq!(worklist.len(), 2);
        assert!(matches!(worklist.pop(), Some(PatchWork::Iframe(_))));
        assert!(matches!(worklist.pop(), Some(PatchWork::Stylesheet(_))));
    }
}
