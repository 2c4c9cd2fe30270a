//! URL scheme router: one dispatch point from locator to backing store.

use crate::config::FetchProxyFn;
use crate::config::FetchProxyRequest;
use crate::config::ProxyFn;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use tracing::debug;
use tracing::trace;
use url::Url;
use vf_core::VirtError;
use vf_core::VirtResult;
use vf_net::LocatorScheme;
use vf_net::NetworkFetcher;
use vf_net::NetworkRequest;
use vf_net::ResourceLocator;
use vf_net::ResourceResponse;
use vf_net::content_type_for_path;
use vf_net::is_passthrough;
use vf_net::is_virtualized;
use vf_storage::ArchiveStore;
use vf_storage::LocalFileAdapter;
use vf_storage::VaultStore;

/// The stores a session reads from.
#[derive(Clone)]
pub struct ResourceStores {
    pub archive: ArchiveStore,
    pub vault: Option<Rc<dyn VaultStore>>,
    pub network: Rc<dyn NetworkFetcher>,
}

impl fmt::Debug for ResourceStores {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceStores")
            .field("archive_entries", &self.archive.len())
            .field("vault", &self.vault.is_some())
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FetchRoute {
    Proxied,
    Direct,
}

pub struct SchemeRouter {
    archive: ArchiveStore,
    vault: Option<Rc<dyn VaultStore>>,
    local: LocalFileAdapter,
    network: Rc<dyn NetworkFetcher>,
    origin_paths: RefCell<HashMap<String, String>>,
    proxy: RefCell<Option<ProxyFn>>,
    fetch_proxy: RefCell<Option<FetchProxyFn>>,
}

impl fmt::Debug for SchemeRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemeRouter")
            .field("archive_entries", &self.archive.len())
            .field("vault", &self.vault.is_some())
            .field("origin_paths", &self.origin_paths.borrow().len())
            .finish_non_exhaustive()
    }
}

impl SchemeRouter {
    pub fn new(stores: ResourceStores) -> Self {
        Self {
            archive: stores.archive,
            vault: stores.vault,
            local: LocalFileAdapter,
            network: stores.network,
            origin_paths: RefCell::new(HashMap::new()),
            proxy: RefCell::new(None),
            fetch_proxy: RefCell::new(None),
        }
    }

    pub(crate) fn set_host_callbacks(&self, proxy: Option<ProxyFn>, fetch_proxy: Option<FetchProxyFn>) {
        *self.proxy.borrow_mut() = proxy;
        *self.fetch_proxy.borrow_mut() = fetch_proxy;
    }

    pub fn network(&self) -> Rc<dyn NetworkFetcher> {
        Rc::clone(&self.network)
    }

    pub fn fetch_proxy(&self) -> Option<FetchProxyFn> {
        self.fetch_proxy.borrow().clone()
    }

    /// Resolves `reference` against `context`, then lets the host proxy
    /// substitute the result.
    pub fn resolve(&self, reference: &str, context: Option<&Url>) -> VirtResult<ResourceLocator> {
        let locator = ResourceLocator::resolve(reference, context)?;
        let proxy = self.proxy.borrow().clone();
        match proxy {
            Some(proxy) if locator.scheme() != LocatorScheme::Virtual => {
                ResourceLocator::from_url(proxy(locator.url()))
            }
            _ => Ok(locator),
        }
    }

    /// Fetches through the handler for the locator's scheme. Never fails:
    /// handler errors become a 404.
    pub fn fetch_content(&self, locator: &ResourceLocator) -> ResourceResponse {
        match self.dispatch(locator, None, FetchRoute::Proxied, true) {
            Ok(response) => response,
            Err(error) => {
                debug!(locator = %locator.as_str(), %error, "resource unavailable; answering 404");
                ResourceResponse::not_found()
            }
        }
    }

    /// Resolves and fetches in one step, passing `context` on to the fetch
    /// proxy for network requests.
    pub fn fetch_reference(&self, reference: &str, context: Option<&Url>) -> ResourceResponse {
        self.fetch_resolved(reference, context, FetchRoute::Proxied)
    }

    /// Like [`Self::fetch_reference`] but never consults the fetch proxy.
    /// This is the fallback handed to the proxy itself.
    pub fn fetch_reference_direct(&self, reference: &str, context: Option<&Url>) -> ResourceResponse {
        self.fetch_resolved(reference, context, FetchRoute::Direct)
    }

    fn fetch_resolved(&self, reference: &str, context: Option<&Url>, route: FetchRoute) -> ResourceResponse {
        let locator = match self.resolve(reference, context) {
            Ok(locator) => locator,
            Err(error) => {
                debug!(%reference, %error, "unresolvable reference; answering 404");
                return ResourceResponse::not_found();
            }
        };
        match self.dispatch(&locator, context, route, true) {
            Ok(response) => response,
            Err(error) => {
                debug!(locator = %locator.as_str(), %error, "resource unavailable; answering 404");
                ResourceResponse::not_found()
            }
        }
    }

    /// Virtualized form of `reference`, or `None` when it must stay as
    /// written (passthrough, already virtualized, or unresolvable).
    pub fn try_virtualize(&self, reference: &str, context: Option<&Url>) -> Option<String> {
        if is_passthrough(reference) || is_virtualized(reference) {
            return None;
        }

        let locator = match self.resolve(reference, context) {
            Ok(locator) => locator,
            Err(error) => {
                trace!(%reference, %error, "leaving reference unchanged");
                return None;
            }
        };

        match locator.scheme() {
            // Host-served already.
            LocatorScheme::Virtual | LocatorScheme::ProxiedApp => None,
            LocatorScheme::Vault => Some(
                self.vault_resource_url(&locator)
                    .unwrap_or_else(|| locator.virtualized()),
            ),
            _ => Some(locator.virtualized()),
        }
    }

    pub fn virtualize(&self, reference: &str, context: Option<&Url>) -> String {
        self.try_virtualize(reference, context)
            .unwrap_or_else(|| reference.to_owned())
    }

    /// Vault path a minted resource URL was issued for.
    pub fn origin_path(&self, resource_url: &str) -> Option<String> {
        self.origin_paths.borrow().get(resource_url).cloned()
    }

    pub fn origin_path_count(&self) -> usize {
        self.origin_paths.borrow().len()
    }

    fn dispatch(
        &self,
        locator: &ResourceLocator,
        context: Option<&Url>,
        route: FetchRoute,
        unwrap: bool,
    ) -> VirtResult<ResourceResponse> {
        match locator.scheme() {
            LocatorScheme::Archive => {
                let (path, body) = locator
                    .store_path_candidates()
                    .into_iter()
                    .find_map(|path| self.archive.get(&path).map(|body| (path, body.to_vec())))
                    .ok_or_else(|| {
                        VirtError::new(
                            "storage.archive.entry_missing",
                            format!("archive has no entry for `{}`", locator.as_str()),
                        )
                    })?;
                Ok(ResourceResponse::ok(body, content_type_for_path(&path)))
            }
            LocatorScheme::Vault => {
                let vault = self.vault()?;
                let path = self.find_vault_path(vault, locator)?;
                let body = vault.read(&path)?;
                self.record_origin_path(vault, &path);
                Ok(ResourceResponse::ok(body, content_type_for_path(&path)))
            }
            LocatorScheme::ProxiedApp => {
                let mut key = locator.url().clone();
                key.set_query(None);
                key.set_fragment(None);
                let path = self.origin_path(key.as_str()).ok_or_else(|| {
                    VirtError::new(
                        "router.app_unknown",
                        format!("`{key}` was never issued for a vault path"),
                    )
                })?;
                let body = self.vault()?.read(&path)?;
                Ok(ResourceResponse::ok(body, content_type_for_path(&path)))
            }
            LocatorScheme::LocalFile => {
                let path = locator.url().path();
                let body = self.local.read(path)?;
                Ok(ResourceResponse::ok(body, content_type_for_path(path)))
            }
            LocatorScheme::Virtual if unwrap => {
                let inner = locator.unwrapped()?;
                self.dispatch(&inner, context, route, false)
            }
            LocatorScheme::Virtual => Err(VirtError::new(
                "router.virtual_nested",
                format!("`{}` wraps another virtualized URL", locator.as_str()),
            )),
            LocatorScheme::Network => self.fetch_network(locator.url(), context, route),
        }
    }

    fn fetch_network(&self, url: &Url, context: Option<&Url>, route: FetchRoute) -> VirtResult<ResourceResponse> {
        let fetch_proxy = match route {
            FetchRoute::Proxied => self.fetch_proxy(),
            FetchRoute::Direct => None,
        };
        let Some(fetch_proxy) = fetch_proxy else {
            return self.network.fetch(&NetworkRequest::get(url.clone()));
        };

        let base_fetch = |href: &str| self.fetch_live(href);
        Ok(fetch_proxy(&FetchProxyRequest {
            href: url.as_str(),
            context_url: context,
            base_fetch: &base_fetch,
        }))
    }

    fn fetch_live(&self, href: &str) -> ResourceResponse {
        let outcome = Url::parse(href)
            .map_err(|error| VirtError::new("router.href_invalid", format!("`{href}`: {error}")))
            .and_then(|url| self.network.fetch(&NetworkRequest::get(url)));
        outcome.unwrap_or_else(|error| {
            debug!(%href, %error, "live fetch failed; answering 404");
            ResourceResponse::not_found()
        })
    }

    fn vault(&self) -> VirtResult<&dyn VaultStore> {
        self.vault
            .as_deref()
            .ok_or_else(|| VirtError::new("router.vault_missing", "no vault store is configured"))
    }

    fn find_vault_path(&self, vault: &dyn VaultStore, locator: &ResourceLocator) -> VirtResult<String> {
        locator
            .store_path_candidates()
            .into_iter()
            .find(|path| vault.path_exists(path))
            .ok_or_else(|| {
                VirtError::new(
                    "storage.vault.entry_missing",
                    format!("vault has no file for `{}`", locator.as_str()),
                )
            })
    }

    fn vault_resource_url(&self, locator: &ResourceLocator) -> Option<String> {
        let vault = self.vault().ok()?;
        let path = self.find_vault_path(vault, locator).ok()?;
        Some(self.record_origin_path(vault, &path))
    }

    fn record_origin_path(&self, vault: &dyn VaultStore, path: &str) -> String {
        let resource_url = vault.resource_url_for(path);
        self.origin_paths
            .borrow_mut()
            .entry(resource_url.clone())
            .or_insert_with(|| path.to_owned());
        resource_url
    }
}

#[cfg(test)]
mod tests {
    use super::ResourceStores;
    use super::SchemeRouter;
    use crate::config::FetchProxyRequest;
    use crate::test_support::MemoryVault;
    use crate::test_support::StubNetwork;
    use std::rc::Rc;
    use url::Url;
    use vf_net::ResourceLocator;
    use vf_net::ResourceResponse;
    use vf_storage::ArchiveStore;

    fn router() -> SchemeRouter {
        SchemeRouter::new(ResourceStores {
            archive: ArchiveStore::from_entries([
                ("index.html", b"<p>home</p>".to_vec()),
                ("chapter one.html", b"<p>one</p>".to_vec()),
                ("css/site.css", b"a{}".to_vec()),
            ]),
            vault: Some(Rc::new(MemoryVault::with_files([("notes/today.html", "<p>today</p>")]))),
            network: Rc::new(StubNetwork::with_page("https://cdn.example/lib.js", "text/javascript", "ok()")),
        })
    }

    fn locator(input: &str) -> ResourceLocator {
        match ResourceLocator::parse(input) {
            Ok(locator) => locator,
            Err(error) => panic!("{error}"),
        }
    }

    #[test]
    fn archive_lookup_ignores_query_and_falls_back() {
        let router = router();
        let response = router.fetch_content(&locator("archive:/index.html?x=1"));
        assert_eq!(response.status, 200);
        assert_eq!(response.body, b"<p>home</p>");
        assert_eq!(response.content_type, "text/html");

        let response = router.fetch_content(&locator("archive:/index"));
        assert_eq!(response.body, b"<p>home</p>");

        let response = router.fetch_content(&locator("archive:/chapter%20one"));
        assert_eq!(response.body, b"<p>one</p>");

        assert_eq!(router.fetch_content(&locator("archive:/missing.css")).status, 404);
    }

    #[test]
    fn virtualized_locators_route_to_their_inner_scheme() {
        let router = router();
        let virtualized = locator("archive:/css/site.css").virtualized();
        let response = router.fetch_content(&locator(&virtualized));
        assert_eq!(response.body, b"a{}");
        assert_eq!(response.content_type, "text/css");
    }

    #[test]
    fn vault_references_become_app_urls_that_route_back() {
        let router = router();
        let context = match Url::parse("vault:/notes/index.html") {
            Ok(url) => url,
            Err(error) => panic!("{error}"),
        };
        let app_url = router.virtualize("today", Some(&context));
        assert_eq!(app_url, "app://vault/notes/today.html");
        assert_eq!(router.origin_path(&app_url).as_deref(), Some("notes/today.html"));

        // Already host-served URLs stay as they are.
        assert_eq!(router.virtualize(&app_url, Some(&context)), app_url);

        let response = router.fetch_content(&locator(&app_url));
        assert_eq!(response.body, b"<p>today</p>");
        assert_eq!(router.fetch_content(&locator("app://vault/unknown.html")).status, 404);
    }

    fn suffixing_proxy(request: &FetchProxyRequest<'_>) -> ResourceResponse {
        let mut response = (request.base_fetch)(request.href);
        response.body.extend_from_slice(b"// proxied");
        response
    }

    #[test]
    fn network_goes_through_the_fetch_proxy_when_present() {
        let router = router();
        let direct = router.fetch_content(&locator("https://cdn.example/lib.js"));
        assert_eq!(direct.body, b"ok()");

        router.set_host_callbacks(None, Some(Rc::new(suffixing_proxy)));
        let proxied = router.fetch_content(&locator("https://cdn.example/lib.js"));
        assert_eq!(proxied.body, b"ok()// proxied");

        let direct = router.fetch_reference_direct("lib.js", Url::parse("https://cdn.example/").ok().as_ref());
        assert_eq!(direct.body, b"ok()");
    }

    #[test]
    fn proxy_substitutes_schemes_before_dispatch() {
        let router = router();
        router.set_host_callbacks(
            Some(Rc::new(|url: &Url| {
                let rewritten = url.as_str().replacen("https://assets.local/", "archive:/", 1);
                Url::parse(&rewritten).unwrap_or_else(|_| url.clone())
            })),
            None,
        );
        let response = router.fetch_reference("https://assets.local/css/site.css", None);
        assert_eq!(response.body, b"a{}");
    }

    #[test]
    fn passthrough_and_unresolvable_references_are_untouched() {
        let router = router();
        assert_eq!(router.try_virtualize("data:text/plain,hi", None), None);
        assert_eq!(router.try_virtualize("#top", None), None);
        assert_eq!(router.try_virtualize("img/a.png", None), None);
        assert_eq!(
            router.fetch_reference("img/a.png", None),
            ResourceResponse::not_found()
        );
    }
}
