use crate::darkmode::DarkModeConfig;
use std::fmt;
use std::rc::Rc;
use url::Url;
use vf_dom::NodeId;
use vf_js::ScriptRealmConfig;
use vf_net::ResourceResponse;

/// Host-supplied scheme substitution applied before every resolution.
pub type ProxyFn = Rc<dyn Fn(&Url) -> Url>;
/// Host-supplied fetch override for network requests.
pub type FetchProxyFn = Rc<dyn Fn(&FetchProxyRequest<'_>) -> ResourceResponse>;
/// Called with the outer frame once its content is installed.
pub type LoadCallback = Rc<dyn Fn(NodeId)>;
/// Called with the live dark-mode engine count whenever it changes.
pub type EnginesChangedCallback = Rc<dyn Fn(usize)>;

/// What a fetch proxy sees: the raw reference, the context it was made
/// in, and a fallback that performs the default fetch.
pub struct FetchProxyRequest<'a> {
    pub href: &'a str,
    pub context_url: Option<&'a Url>,
    pub base_fetch: &'a dyn Fn(&str) -> ResourceResponse,
}

impl fmt::Debug for FetchProxyRequest<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchProxyRequest")
            .field("href", &self.href)
            .field("context_url", &self.context_url.map(Url::as_str))
            .finish_non_exhaustive()
    }
}

/// Session-wide settings fixed at construction.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Origin the host page is served from. Contexts under it are not
    /// trusted as resource bases.
    pub host_origin: Option<Url>,
    /// Fallback base URL for the top host document.
    pub root_url: Option<Url>,
    /// `(tag, property)` pairs whose setters are intercepted.
    pub interception_table: Vec<(String, String)>,
    pub run_scripts: bool,
    pub realm: ScriptRealmConfig,
    pub dark_mode: DarkModeConfig,
    /// Upper bound on work items handled by a single `pump`.
    pub max_pump_steps: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            host_origin: None,
            root_url: None,
            interception_table: crate::interceptor::default_interception_table(),
            run_scripts: true,
            realm: ScriptRealmConfig::default(),
            dark_mode: DarkModeConfig::default(),
            max_pump_steps: 10_000,
        }
    }
}

/// Arguments to [`crate::VirtualizationSession::render`].
#[derive(Clone, Default)]
pub struct RenderProps {
    pub url: String,
    pub proxy: Option<ProxyFn>,
    pub fetch_proxy: Option<FetchProxyFn>,
    pub on_load: Option<LoadCallback>,
    pub on_dark_engines_changed: Option<EnginesChangedCallback>,
}

impl RenderProps {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn with_proxy(mut self, proxy: impl Fn(&Url) -> Url + 'static) -> Self {
        self.proxy = Some(Rc::new(proxy));
        self
    }

    pub fn with_fetch_proxy(
        mut self,
        fetch_proxy: impl Fn(&FetchProxyRequest<'_>) -> ResourceResponse + 'static,
    ) -> Self {
        self.fetch_proxy = Some(Rc::new(fetch_proxy));
        self
    }

    pub fn on_load(mut self, callback: impl Fn(NodeId) + 'static) -> Self {
        self.on_load = Some(Rc::new(callback));
        self
    }

    pub fn on_dark_engines_changed(mut self, callback: impl Fn(usize) + 'static) -> Self {
        self.on_dark_engines_changed = Some(Rc::new(callback));
        self
    }
}

impl fmt::Debug for RenderProps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderProps")
            .field("url", &self.url)
            .field("proxy", &self.proxy.is_some())
            .field("fetch_proxy", &self.fetch_proxy.is_some())
            .field("on_load", &self.on_load.is_some())
            .field("on_dark_engines_changed", &self.on_dark_engines_changed.is_some())
            .finish()
    }
}
