//! Virtualization session: routes every resource load of an embedded
//! application through the session's backing stores and patches each frame
//! and shadow tree the application creates.

pub mod config;
pub mod context;
pub mod darkmode;
pub mod interceptor;
mod lifecycle;
pub mod registry;
pub mod rewriter;
pub mod router;
mod session;
pub mod shims;
pub mod watcher;

pub use config::FetchProxyRequest;
pub use config::RenderProps;
pub use config::SessionConfig;
pub use context::context_for;
pub use darkmode::DarkModeConfig;
pub use darkmode::DarkModeEngine;
pub use lifecycle::DeferredContent;
pub use lifecycle::PatchRecord;
pub use registry::EngineRegistry;
pub use rewriter::ContentRewriter;
pub use rewriter::RewrittenDocument;
pub use router::ResourceStores;
pub use router::SchemeRouter;
pub use session::VirtualizationSession;
pub use shims::FrameScope;

#[cfg(test)]
pub(crate) mod test_support {
    use std::cell::RefCell;
    use std::collections::BTreeMap;
    use vf_core::VirtError;
    use vf_core::VirtResult;
    use vf_net::NetworkFetcher;
    use vf_net::NetworkRequest;
    use vf_net::ResourceResponse;
    use vf_storage::VaultStore;

    /// Vault over an in-memory map, minting `app://vault/<path>` URLs.
    #[derive(Debug, Default)]
    pub(crate) struct MemoryVault {
        files: BTreeMap<String, Vec<u8>>,
    }

    impl MemoryVault {
        pub(crate) fn with_files<'a>(files: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
            Self {
                files: files
                    .into_iter()
                    .map(|(path, body)| (path.to_owned(), body.as_bytes().to_vec()))
                    .collect(),
            }
        }
    }

    impl VaultStore for MemoryVault {
        fn read(&self, path: &str) -> VirtResult<Vec<u8>> {
            self.files
                .get(path)
                .cloned()
                .ok_or_else(|| VirtError::new("storage.vault.entry_missing", path.to_owned()))
        }

        fn resource_url_for(&self, path: &str) -> String {
            format!("app://vault/{path}")
        }

        fn path_exists(&self, path: &str) -> bool {
            self.files.contains_key(path)
        }
    }

    /// Network double answering from a fixed page table.
    #[derive(Debug, Default)]
    pub(crate) struct StubNetwork {
        pages: BTreeMap<String, ResourceResponse>,
        requests: RefCell<Vec<NetworkRequest>>,
    }

    impl StubNetwork {
        pub(crate) fn with_page(url: &str, content_type: &str, body: &str) -> Self {
            Self::default().and_page(url, content_type, body)
        }

        pub(crate) fn and_page(mut self, url: &str, content_type: &str, body: &str) -> Self {
            self.pages.insert(
                url.to_owned(),
                ResourceResponse::ok(body.as_bytes().to_vec(), content_type),
            );
            self
        }

        pub(crate) fn requests(&self) -> Vec<NetworkRequest> {
            self.requests.borrow().clone()
        }
    }

    impl NetworkFetcher for StubNetwork {
        fn fetch(&self, request: &NetworkRequest) -> VirtResult<ResourceResponse> {
            self.requests.borrow_mut().push(request.clone());
            self.pages.get(request.url.as_str()).cloned().ok_or_else(|| {
                VirtError::new("net.connect_failed", format!("no route to {}", request.url))
            })
        }
    }
}
