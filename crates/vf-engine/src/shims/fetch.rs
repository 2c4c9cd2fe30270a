//! Frame-level `fetch` replacement.

use crate::config::FetchProxyRequest;
use crate::interceptor::ContextCell;
use crate::router::SchemeRouter;
use std::rc::Rc;
use tracing::trace;
use vf_net::ResourceResponse;

#[derive(Debug)]
pub struct FetchShim {
    router: Rc<SchemeRouter>,
    context: ContextCell,
}

impl FetchShim {
    pub fn new(router: Rc<SchemeRouter>, context: ContextCell) -> Self {
        Self { router, context }
    }

    /// Resolves `input` against the frame context and fetches it. A host
    /// fetch proxy sees the raw request first and gets the default route as
    /// its fallback.
    pub fn fetch(&self, input: &str) -> ResourceResponse {
        let context = self.context.borrow().clone();
        trace!(%input, context = ?context.as_ref().map(|url| url.as_str()), "frame fetch");

        let Some(fetch_proxy) = self.router.fetch_proxy() else {
            return self.router.fetch_reference(input, context.as_ref());
        };
        let base_fetch = |href: &str| self.router.fetch_reference_direct(href, context.as_ref());
        fetch_proxy(&FetchProxyRequest {
            href: input,
            context_url: context.as_ref(),
            base_fetch: &base_fetch,
        })
    }
}
