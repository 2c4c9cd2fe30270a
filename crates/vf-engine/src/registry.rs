//! Weak registry of live dark-mode engines.

use crate::darkmode::DarkModeEngine;
use std::cell::Cell;
use std::cell::RefCell;
use std::rc::Rc;
use std::rc::Weak;

#[derive(Debug, Default)]
pub struct EngineRegistry {
    engines: RefCell<Vec<Weak<DarkModeEngine>>>,
    last_reported: Cell<usize>,
}

impl EngineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, engine: &Rc<DarkModeEngine>) {
        self.engines.borrow_mut().push(Rc::downgrade(engine));
    }

    /// Drops collected entries. Returns the live count when it differs from
    /// the count returned by the previous change.
    pub fn prune(&self) -> Option<usize> {
        let mut engines = self.engines.borrow_mut();
        engines.retain(|engine| engine.strong_count() > 0);
        let live = engines.len();
        if live == self.last_reported.get() {
            return None;
        }
        self.last_reported.set(live);
        Some(live)
    }

    pub fn live_count(&self) -> usize {
        self.engines
            .borrow()
            .iter()
            .filter(|engine| engine.strong_count() > 0)
            .count()
    }

    pub fn live_engines(&self) -> Vec<Rc<DarkModeEngine>> {
        self.engines.borrow().iter().filter_map(Weak::upgrade).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::EngineRegistry;
    use crate::darkmode::DarkModeConfig;
    use crate::darkmode::DarkModeEngine;
    use std::rc::Rc;
    use vf_dom::DomTree;
    use vf_html::HtmlParser;

    fn engine(tree: &mut DomTree) -> Rc<DarkModeEngine> {
        let document = match HtmlParser.parse_document(tree, "<html><head></head></html>") {
            Ok(document) => document,
            Err(error) => panic!("{error}"),
        };
        match DarkModeEngine::install(tree, document, 0, &DarkModeConfig::default()) {
            Ok(engine) => engine,
            Err(error) => panic!("{error}"),
        }
    }

    #[test]
    fn reports_only_changes_in_the_live_set() {
        let mut tree = DomTree::new();
        let registry = EngineRegistry::new();
        let first = engine(&mut tree);
        let second = engine(&mut tree);
        registry.register(&first);
        registry.register(&second);

        assert_eq!(registry.prune(), Some(2));
        assert_eq!(registry.prune(), None);

        drop(first);
        assert_eq!(registry.live_count(), 1);
        assert_eq!(registry.prune(), Some(1));
        assert_eq!(registry.live_engines().len(), 1);

        drop(second);
        assert_eq!(registry.prune(), Some(0));
        assert_eq!(registry.prune(), None);
    }
}
