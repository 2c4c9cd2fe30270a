//! Element-creation decorators and property accessor interception.

use std::rc::Rc;

/// Result of an intercepted property write: which attribute the original
/// setter stores and what value it stores.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyWrite {
    pub attribute: String,
    pub value: String,
}

/// Replaces the setter half of an element property accessor.
///
/// Reads are never intercepted.
pub trait PropertyInterceptor {
    fn intercept_write(&self, tag: &str, property: &str, value: &str) -> PropertyWrite;
}

/// Decorator run for every element created through a document's creation
/// entry point. Returns the accessor overrides to attach to the new element.
pub trait ElementCreationHook {
    fn element_created(&self, tag: &str) -> Vec<(String, Rc<dyn PropertyInterceptor>)>;
}
