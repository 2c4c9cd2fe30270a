//! Property-setter interception for elements created inside patched frames.
//!
//! The decorator is registered on each frame document. Elements whose tag is
//! in the interception table get a routing override for the listed property.

use crate::router::SchemeRouter;
use std::cell::RefCell;
use std::rc::Rc;
use url::Url;
use vf_dom::hooks::ElementCreationHook;
use vf_dom::hooks::PropertyInterceptor;
use vf_dom::hooks::PropertyWrite;

/// `img`→`src`, `script`→`src`, `link`→`href`, `iframe`→`src`.
pub fn default_interception_table() -> Vec<(String, String)> {
    [("img", "src"), ("script", "src"), ("link", "href"), ("iframe", "src")]
        .into_iter()
        .map(|(tag, property)| (tag.to_owned(), property.to_owned()))
        .collect()
}

/// Shared, mutable base URL of one frame.
pub type ContextCell = Rc<RefCell<Option<Url>>>;

/// Routes property writes through the scheme router using the frame's
/// current context.
#[derive(Debug)]
pub struct RoutingInterceptor {
    router: Rc<SchemeRouter>,
    context: ContextCell,
}

impl RoutingInterceptor {
    pub fn new(router: Rc<SchemeRouter>, context: ContextCell) -> Self {
        Self { router, context }
    }
}

impl PropertyInterceptor for RoutingInterceptor {
    fn intercept_write(&self, tag: &str, property: &str, value: &str) -> PropertyWrite {
        // Frames never load natively; the patch loop picks the target up.
        if tag == "iframe" && property == "src" {
            return PropertyWrite {
                attribute: "data-vf-src".to_owned(),
                value: value.to_owned(),
            };
        }

        let context = self.context.borrow();
        PropertyWrite {
            attribute: property.to_owned(),
            value: self.router.virtualize(value, context.as_ref()),
        }
    }
}

/// Element-creation decorator installed on every patched document.
#[derive(Debug)]
pub struct FrameDecorator {
    table: Rc<[(String, String)]>,
    interceptor: Rc<RoutingInterceptor>,
}

impl FrameDecorator {
    pub fn new(table: Rc<[(String, String)]>, interceptor: Rc<RoutingInterceptor>) -> Self {
        Self { table, interceptor }
    }
}

impl ElementCreationHook for FrameDecorator {
    fn element_created(&self, tag: &str) -> Vec<(String, Rc<dyn PropertyInterceptor>)> {
        self.table
            .iter()
            .filter(|(candidate, _)| candidate == tag)
            .map(|(_, property)| {
                let interceptor: Rc<dyn PropertyInterceptor> = self.interceptor.clone();
                (property.clone(), interceptor)
            })
            .collect()
    }
}
