//! `XMLHttpRequest` double.
//!
//! Requests are answered from a route table. Unmatched requests, and
//! requests to the host's own origin, go to the live network client.

use crate::interceptor::ContextCell;
use crate::router::SchemeRouter;
use rand::Rng;
use std::fmt;
use std::rc::Rc;
use std::time::Duration;
use std::time::Instant;
use tracing::debug;
use url::Url;
use vf_core::VirtError;
use vf_core::VirtResult;
use vf_net::NetworkRequest;
use vf_net::ResourceResponse;

pub const UNSENT: u8 = 0;
pub const OPENED: u8 = 1;
pub const HEADERS_RECEIVED: u8 = 2;
pub const LOADING: u8 = 3;
pub const DONE: u8 = 4;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ResponseType {
    #[default]
    Text,
    ArrayBuffer,
    Blob,
    Json,
}

impl ResponseType {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "" | "text" => Some(Self::Text),
            "arraybuffer" => Some(Self::ArrayBuffer),
            "blob" => Some(Self::Blob),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

/// The `response` attribute after a request completes.
#[derive(Debug, Clone, PartialEq)]
pub enum XhrResponse {
    Null,
    Text(String),
    Bytes(Vec<u8>),
    Json(serde_json::Value),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XhrEvent {
    ReadyStateChange(u8),
    Progress { loaded: usize, total: usize },
    Load,
    LoadEnd,
    Error,
    Abort,
    Timeout,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UrlPattern {
    Any,
    Exact(String),
    Prefix(String),
    Contains(String),
}

impl UrlPattern {
    pub fn matches(&self, url: &str) -> bool {
        match self {
            Self::Any => true,
            Self::Exact(expected) => url == expected,
            Self::Prefix(prefix) => url.starts_with(prefix.as_str()),
            Self::Contains(needle) => url.contains(needle.as_str()),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ResponseDelay {
    #[default]
    Immediate,
    Fixed(Duration),
    /// Drawn uniformly from `min..=max` for every request.
    Uniform { min: Duration, max: Duration },
}

impl ResponseDelay {
    pub fn sample(&self) -> Duration {
        match *self {
            Self::Immediate => Duration::ZERO,
            Self::Fixed(delay) => delay,
            Self::Uniform { min, max } if max <= min => min,
            Self::Uniform { min, max } => rand::rng().random_range(min..=max),
        }
    }
}

/// What the frame's script sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XhrRequest {
    pub method: String,
    /// The URL exactly as passed to `open`.
    pub url: String,
    /// `url` resolved against the frame context, when that was possible.
    pub resolved: Option<Url>,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
}

pub type XhrHandlerFn = Rc<dyn Fn(&XhrRequest) -> ResourceResponse>;

#[derive(Clone)]
pub enum XhrResponder {
    /// Answer through the scheme router, like `fetch`.
    Routed,
    Fixed(ResourceResponse),
    Handler(XhrHandlerFn),
}

impl fmt::Debug for XhrResponder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Routed => f.write_str("Routed"),
            Self::Fixed(response) => f.debug_tuple("Fixed").field(&response.status).finish(),
            Self::Handler(_) => f.write_str("Handler"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct XhrRoute {
    /// `None` matches every method.
    pub method: Option<String>,
    pub pattern: UrlPattern,
    pub delay: ResponseDelay,
    pub responder: XhrResponder,
}

impl XhrRoute {
    pub fn new(pattern: UrlPattern, responder: XhrResponder) -> Self {
        Self {
            method: None,
            pattern,
            delay: ResponseDelay::Immediate,
            responder,
        }
    }

    pub fn with_method(mut self, method: &str) -> Self {
        self.method = Some(method.to_ascii_uppercase());
        self
    }

    pub fn with_delay(mut self, delay: ResponseDelay) -> Self {
        self.delay = delay;
        self
    }

    fn matches(&self, method: &str, url: &str) -> bool {
        self.method
            .as_deref()
            .is_none_or(|expected| expected.eq_ignore_ascii_case(method))
            && self.pattern.matches(url)
    }
}

/// Routes in match order.
#[derive(Debug, Clone, Default)]
pub struct XhrRouteTable {
    routes: Vec<XhrRoute>,
}

impl XhrRouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// The table every frame gets unless the host configures one: a single
    /// catch-all route answered through the scheme router.
    pub fn with_default_route(self) -> Self {
        self.with_route(XhrRoute::new(UrlPattern::Any, XhrResponder::Routed))
    }

    pub fn with_route(mut self, route: XhrRoute) -> Self {
        self.routes.push(route);
        self
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn find(&self, method: &str, url: &str) -> Option<&XhrRoute> {
        self.routes.iter().find(|route| route.matches(method, url))
    }
}

/// Per-frame state shared by every request object the frame creates.
#[derive(Debug)]
pub struct XhrBackend {
    router: Rc<SchemeRouter>,
    context: ContextCell,
    routes: Rc<XhrRouteTable>,
    host_origin: Option<Url>,
}

impl XhrBackend {
    pub fn new(
        router: Rc<SchemeRouter>,
        context: ContextCell,
        routes: Rc<XhrRouteTable>,
        host_origin: Option<Url>,
    ) -> Self {
        Self {
            router,
            context,
            routes,
            host_origin,
        }
    }

    fn resolve(&self, url: &str) -> Option<Url> {
        let context = self.context.borrow();
        self.router
            .resolve(url, context.as_ref())
            .ok()
            .map(|locator| locator.url().clone())
    }

    fn route_for(&self, request: &XhrRequest) -> Option<XhrRoute> {
        let targets_host = match (&request.resolved, &self.host_origin) {
            (Some(resolved), Some(host)) => host.origin().is_tuple() && resolved.origin() == host.origin(),
            _ => false,
        };
        if targets_host {
            return None;
        }

        let target = request
            .resolved
            .as_ref()
            .map_or(request.url.as_str(), Url::as_str);
        self.routes.find(&request.method, target).cloned()
    }

    fn respond(&self, route: &XhrRoute, request: &XhrRequest) -> ResourceResponse {
        match &route.responder {
            XhrResponder::Routed => {
                let context = self.context.borrow().clone();
                self.router.fetch_reference(&request.url, context.as_ref())
            }
            XhrResponder::Fixed(response) => response.clone(),
            XhrResponder::Handler(handler) => handler(request),
        }
    }

    fn fetch_live(&self, request: &XhrRequest) -> VirtResult<ResourceResponse> {
        let url = request.resolved.clone().ok_or_else(|| {
            VirtError::new("xhr.url_unresolved", format!("cannot resolve `{}`", request.url))
        })?;
        let mut live = NetworkRequest::get(url).with_method(request.method.clone());
        for (name, value) in &request.headers {
            live = live.with_header(name.clone(), value.clone());
        }
        if let Some(body) = &request.body {
            live = live.with_body(body.clone());
        }
        self.router.network().fetch(&live)
    }
}

type Listener = Box<dyn FnMut(&XhrEvent)>;

/// A sent request waiting for its response delay to pass.
#[derive(Debug)]
struct InFlight {
    request: XhrRequest,
    route: Option<XhrRoute>,
    due: Instant,
    timed_out: bool,
}

/// One request object. Undelayed sends complete inside `send`; delayed ones
/// stay in flight until [`XmlHttpRequest::poll`] sees their due time. Every
/// event is recorded and passed to the listener, if any, as it is
/// dispatched.
pub struct XmlHttpRequest {
    backend: Rc<XhrBackend>,
    ready_state: u8,
    request: Option<XhrRequest>,
    send_flag: bool,
    in_flight: Option<InFlight>,
    response_type: ResponseType,
    timeout: Option<Duration>,
    status: u16,
    content_type: Option<String>,
    response: XhrResponse,
    events: Vec<XhrEvent>,
    listener: Option<Listener>,
}

impl fmt::Debug for XmlHttpRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("XmlHttpRequest")
            .field("ready_state", &self.ready_state)
            .field("request", &self.request)
            .field("status", &self.status)
            .field("events", &self.events)
            .finish_non_exhaustive()
    }
}

impl XmlHttpRequest {
    pub fn new(backend: Rc<XhrBackend>) -> Self {
        Self {
            backend,
            ready_state: UNSENT,
            request: None,
            send_flag: false,
            in_flight: None,
            response_type: ResponseType::Text,
            timeout: None,
            status: 0,
            content_type: None,
            response: XhrResponse::Null,
            events: Vec::new(),
            listener: None,
        }
    }

    pub fn set_listener(&mut self, listener: impl FnMut(&XhrEvent) + 'static) {
        self.listener = Some(Box::new(listener));
    }

    pub fn open(&mut self, method: &str, url: &str) {
        let resolved = self.backend.resolve(url);
        self.request = Some(XhrRequest {
            method: method.to_ascii_uppercase(),
            url: url.to_owned(),
            resolved,
            headers: Vec::new(),
            body: None,
        });
        self.send_flag = false;
        self.in_flight = None;
        self.status = 0;
        self.content_type = None;
        self.response = XhrResponse::Null;
        self.ready_state = OPENED;
        self.dispatch(XhrEvent::ReadyStateChange(OPENED));
    }

    pub fn set_request_header(&mut self, name: &str, value: &str) -> VirtResult<()> {
        let request = self.opened_request_mut()?;
        request.headers.push((name.to_owned(), value.to_owned()));
        Ok(())
    }

    pub fn set_response_type(&mut self, value: &str) -> VirtResult<()> {
        if matches!(self.ready_state, LOADING | DONE) {
            return Err(VirtError::new(
                "xhr.state_invalid",
                "responseType cannot change once loading started",
            ));
        }
        self.response_type = ResponseType::parse(value).ok_or_else(|| {
            VirtError::new("xhr.response_type_invalid", format!("unsupported responseType `{value}`"))
        })?;
        Ok(())
    }

    /// Zero disables the timeout.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = (!timeout.is_zero()).then_some(timeout);
    }

    pub fn send(&mut self, body: Option<Vec<u8>>) -> VirtResult<()> {
        let request = self.opened_request_mut()?;
        request.body = body;
        let request = request.clone();
        self.send_flag = true;

        let route = self.backend.route_for(&request);
        let delay = route.as_ref().map(|route| route.delay.sample()).unwrap_or_default();
        let (wait, timed_out) = match self.timeout {
            Some(timeout) if delay >= timeout => (timeout, true),
            _ => (delay, false),
        };
        if wait.is_zero() {
            self.complete(&request, route.as_ref(), timed_out);
            return Ok(());
        }

        let now = Instant::now();
        self.in_flight = Some(InFlight {
            request,
            route,
            due: now.checked_add(wait).unwrap_or(now),
            timed_out,
        });
        Ok(())
    }

    /// Completes an in-flight request whose due time has passed. Returns
    /// `true` when this call finished it.
    pub fn poll(&mut self) -> bool {
        self.poll_at(Instant::now())
    }

    /// [`Self::poll`] against an explicit clock reading.
    pub fn poll_at(&mut self, now: Instant) -> bool {
        if !self.in_flight.as_ref().is_some_and(|in_flight| in_flight.due <= now) {
            return false;
        }
        let Some(in_flight) = self.in_flight.take() else {
            return false;
        };
        self.complete(&in_flight.request, in_flight.route.as_ref(), in_flight.timed_out);
        true
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    /// When the in-flight request, if any, completes.
    pub fn due_at(&self) -> Option<Instant> {
        self.in_flight.as_ref().map(|in_flight| in_flight.due)
    }

    pub fn abort(&mut self) {
        let in_flight = (self.ready_state == OPENED && self.send_flag)
            || matches!(self.ready_state, HEADERS_RECEIVED | LOADING);
        self.in_flight = None;
        if in_flight {
            self.finish_with(XhrEvent::Abort);
        }
        self.ready_state = UNSENT;
        self.send_flag = false;
    }

    pub fn ready_state(&self) -> u8 {
        self.ready_state
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn response_type(&self) -> ResponseType {
        self.response_type
    }

    pub fn response(&self) -> &XhrResponse {
        &self.response
    }

    pub fn response_text(&self) -> Option<&str> {
        match &self.response {
            XhrResponse::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    pub fn events(&self) -> &[XhrEvent] {
        &self.events
    }

    fn opened_request_mut(&mut self) -> VirtResult<&mut XhrRequest> {
        if self.ready_state != OPENED || self.send_flag {
            return Err(VirtError::new(
                "xhr.state_invalid",
                format!("request is not open (readyState {})", self.ready_state),
            ));
        }
        self.request
            .as_mut()
            .ok_or_else(|| VirtError::new("xhr.state_invalid", "open() was never called"))
    }

    fn complete(&mut self, request: &XhrRequest, route: Option<&XhrRoute>, timed_out: bool) {
        if timed_out {
            self.finish_with(XhrEvent::Timeout);
            return;
        }

        let outcome = match route {
            Some(route) => Ok(self.backend.respond(route, request)),
            None => self.backend.fetch_live(request),
        };
        match outcome {
            Ok(response) => self.deliver(response),
            Err(error) => {
                debug!(url = %request.url, %error, "request failed");
                self.finish_with(XhrEvent::Error);
            }
        }
    }

    fn deliver(&mut self, response: ResourceResponse) {
        self.status = response.status;
        self.content_type = Some(response.content_type.clone());
        self.ready_state = HEADERS_RECEIVED;
        self.dispatch(XhrEvent::ReadyStateChange(HEADERS_RECEIVED));

        self.ready_state = LOADING;
        self.dispatch(XhrEvent::ReadyStateChange(LOADING));
        let size = response.body.len();
        self.dispatch(XhrEvent::Progress {
            loaded: size,
            total: size,
        });

        self.response = match self.response_type {
            ResponseType::Text => XhrResponse::Text(response.text()),
            ResponseType::ArrayBuffer | ResponseType::Blob => XhrResponse::Bytes(response.body),
            // Unparsable JSON yields a null response, not an error.
            ResponseType::Json => serde_json::from_slice(&response.body)
                .map(XhrResponse::Json)
                .unwrap_or(XhrResponse::Null),
        };
        self.ready_state = DONE;
        self.dispatch(XhrEvent::ReadyStateChange(DONE));
        self.dispatch(XhrEvent::Load);
        self.dispatch(XhrEvent::LoadEnd);
    }

    fn finish_with(&mut self, event: XhrEvent) {
        self.status = 0;
        self.response = XhrResponse::Null;
        self.ready_state = DONE;
        self.dispatch(XhrEvent::ReadyStateChange(DONE));
        self.dispatch(event);
        self.dispatch(XhrEvent::LoadEnd);
    }

    fn dispatch(&mut self, event: XhrEvent) {
        self.events.push(event);
        if let Some(listener) = self.listener.as_mut() {
            listener(&event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::DONE;
    use super::ResponseDelay;
    use super::UrlPattern;
    use super::XhrBackend;
    use super::XhrEvent;
    use super::XhrResponder;
    use super::XhrResponse;
    use super::XhrRoute;
    use super::XhrRouteTable;
    use super::XmlHttpRequest;
    use crate::router::ResourceStores;
    use crate::router::SchemeRouter;
    use crate::test_support::StubNetwork;
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::time::Duration;
use std::time::Instant;
    use url::Url;
    use vf_net::NetworkFetcher;
    use vf_net::ResourceResponse;
    use vf_storage::ArchiveStore;

    fn backend(table: XhrRouteTable, network: Rc<StubNetwork>) -> Rc<XhrBackend> {
        let network: Rc<dyn NetworkFetcher> = network;
        let router = Rc::new(SchemeRouter::new(ResourceStores {
            archive: ArchiveStore::from_entries([
                ("book/data/toc.json", b"{\"chapters\":3}".to_vec()),
                ("book/data/cover.bin", vec![0_u8, 159, 146, 150]),
            ]),
            vault: None,
            network,
        }));
        let context = Rc::new(RefCell::new(Url::parse("archive:/book/index.html").ok()));
        Rc::new(XhrBackend::new(
            router,
            context,
            Rc::new(table),
            Url::parse("https://host.example/").ok(),
        ))
    }

    fn default_backend() -> Rc<XhrBackend> {
        backend(XhrRouteTable::new().with_default_route(), Rc::new(StubNetwork::default()))
    }

    fn send(xhr: &mut XmlHttpRequest, body: Option<Vec<u8>>) {
        if let Err(error) = xhr.send(body) {
            panic!("{error}");
        }
    }

    #[test]
    fn ready_states_advance_in_order_and_load_follows_done() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut xhr = XmlHttpRequest::new(default_backend());
        let sink = Rc::clone(&seen);
        xhr.set_listener(move |event| sink.borrow_mut().push(*event));
        assert_eq!(xhr.ready_state(), 0);

        xhr.open("get", "data/toc.json");
        send(&mut xhr, None);

        let expected = vec![
            XhrEvent::ReadyStateChange(1),
            XhrEvent::ReadyStateChange(2),
            XhrEvent::ReadyStateChange(3),
            XhrEvent::Progress {
                loaded: 14,
                total: 14,
            },
            XhrEvent::ReadyStateChange(4),
            XhrEvent::Load,
            XhrEvent::LoadEnd,
        ];
        assert_eq!(xhr.events(), expected.as_slice());
        assert_eq!(*seen.borrow(), expected);
        assert_eq!(xhr.ready_state(), DONE);
        assert_eq!(xhr.status(), 200);
        assert_eq!(xhr.response_text(), Some("{\"chapters\":3}"));
    }

    #[test]
    fn response_type_shapes_the_response() {
        let mut xhr = XmlHttpRequest::new(default_backend());
        xhr.open("GET", "data/toc.json");
        assert!(xhr.set_response_type("json").is_ok());
        send(&mut xhr, None);
        assert_eq!(xhr.response(), &XhrResponse::Json(serde_json::json!({"chapters": 3})));

        xhr.open("GET", "data/cover.bin");
        assert!(xhr.set_response_type("arraybuffer").is_ok());
        send(&mut xhr, None);
        assert_eq!(xhr.response(), &XhrResponse::Bytes(vec![0, 159, 146, 150]));

        assert!(xhr.set_response_type("document").is_err());
    }

    #[test]
    fn routes_match_on_method_and_pattern() {
        let table = XhrRouteTable::new()
            .with_route(
                XhrRoute::new(
                    UrlPattern::Contains("/api/".to_owned()),
                    XhrResponder::Fixed(ResourceResponse::ok(b"[]".to_vec(), "application/json")),
                )
                .with_method("POST"),
            )
            .with_default_route();
        let mut xhr = XmlHttpRequest::new(backend(table, Rc::new(StubNetwork::default())));

        xhr.open("POST", "/api/sync");
        send(&mut xhr, Some(b"{}".to_vec()));
        assert_eq!(xhr.response_text(), Some("[]"));

        xhr.open("GET", "/api/sync");
        send(&mut xhr, None);
        assert_eq!(xhr.status(), 404);
        assert_eq!(xhr.events().last(), Some(&XhrEvent::LoadEnd));
    }

    fn complete_at_due_time(xhr: &mut XmlHttpRequest) {
        let Some(due) = xhr.due_at() else {
            panic!("request is not in flight");
        };
        if let Some(early) = due.checked_sub(Duration::from_millis(1)) {
            assert!(!xhr.poll_at(early));
        }
        assert!(xhr.poll_at(due));
        assert!(!xhr.is_in_flight());
    }

    #[test]
    fn delays_at_or_past_the_timeout_time_out() {
        let table = XhrRouteTable::new().with_route(
            XhrRoute::new(UrlPattern::Any, XhrResponder::Routed)
                .with_delay(ResponseDelay::Fixed(Duration::from_secs(60))),
        );
        let mut xhr = XmlHttpRequest::new(backend(table, Rc::new(StubNetwork::default())));
        xhr.open("GET", "data/toc.json");
        xhr.set_timeout(Duration::from_secs(30));
        send(&mut xhr, None);
        assert_eq!(xhr.events(), [XhrEvent::ReadyStateChange(1)].as_slice());

        complete_at_due_time(&mut xhr);
        assert_eq!(
            xhr.events(),
            [
                XhrEvent::ReadyStateChange(1),
                XhrEvent::ReadyStateChange(4),
                XhrEvent::Timeout,
                XhrEvent::LoadEnd,
            ]
            .as_slice()
        );
        assert_eq!(xhr.status(), 0);
    }

    #[test]
    fn delayed_requests_leave_the_thread_free() {
        let table = XhrRouteTable::new()
            .with_route(
                XhrRoute::new(UrlPattern::Contains("toc".to_owned()), XhrResponder::Routed)
                    .with_delay(ResponseDelay::Fixed(Duration::from_secs(3600))),
            )
            .with_default_route();
        let backend = backend(table, Rc::new(StubNetwork::default()));

        let mut slow = XmlHttpRequest::new(Rc::clone(&backend));
        slow.open("GET", "data/toc.json");
        send(&mut slow, None);
        assert!(slow.is_in_flight());
        assert_eq!(slow.ready_state(), 1);
        assert!(!slow.poll());

        // Other requests complete while the slow one is pending.
        let mut fast = XmlHttpRequest::new(backend);
        fast.open("GET", "data/cover.bin");
        send(&mut fast, None);
        assert_eq!(fast.ready_state(), DONE);
        assert_eq!(fast.status(), 200);
        assert!(slow.is_in_flight());

        complete_at_due_time(&mut slow);
        assert_eq!(slow.ready_state(), DONE);
        assert_eq!(slow.response_text(), Some("{\"chapters\":3}"));
        assert_eq!(slow.events().last(), Some(&XhrEvent::LoadEnd));
    }

    #[test]
    fn aborting_drops_the_in_flight_request() {
        let table = XhrRouteTable::new().with_route(
            XhrRoute::new(UrlPattern::Any, XhrResponder::Routed)
                .with_delay(ResponseDelay::Fixed(Duration::from_secs(60))),
        );
        let mut xhr = XmlHttpRequest::new(backend(table, Rc::new(StubNetwork::default())));
        xhr.open("GET", "data/toc.json");
        send(&mut xhr, None);
        let Some(due) = xhr.due_at() else {
            panic!("request is not in flight");
        };

        xhr.abort();
        assert!(!xhr.is_in_flight());
        assert!(!xhr.poll_at(due));
        assert_eq!(xhr.ready_state(), 0);
        assert!(xhr.events().contains(&XhrEvent::Abort));
        assert!(!xhr.events().contains(&XhrEvent::Load));
    }

    #[test]
    fn uniform_delays_stay_in_range() {
        let delay = ResponseDelay::Uniform {
            min: Duration::from_millis(1),
            max: Duration::from_millis(3),
        };
        for _ in 0..32 {
            let sample = delay.sample();
            assert!(sample >= Duration::from_millis(1) && sample <= Duration::from_millis(3));
        }
        let inverted = ResponseDelay::Uniform {
            min: Duration::from_millis(5),
            max: Duration::from_millis(1),
        };
        assert_eq!(inverted.sample(), Duration::from_millis(5));
    }

    #[test]
    fn unmatched_and_host_requests_use_the_live_network() {
        let network = Rc::new(
            StubNetwork::with_page("https://host.example/session", "application/json", "{\"ok\":true}")
                .and_page("https://telemetry.example/t", "text/plain", "ok"),
        );
        let table = XhrRouteTable::new().with_route(XhrRoute::new(
            UrlPattern::Prefix("archive:".to_owned()),
            XhrResponder::Routed,
        ));
        let mut xhr = XmlHttpRequest::new(backend(table, Rc::clone(&network)));

        xhr.open("POST", "https://telemetry.example/t");
        assert!(xhr.set_request_header("X-Trace", "1").is_ok());
        send(&mut xhr, Some(b"ping".to_vec()));
        assert_eq!(xhr.response_text(), Some("ok"));

        xhr.open("GET", "https://host.example/session");
        send(&mut xhr, None);
        assert_eq!(xhr.response_text(), Some("{\"ok\":true}"));

        let requests = network.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].method, "POST");
        assert_eq!(requests[0].body, b"ping".to_vec());
        assert_eq!(requests[0].headers, vec![("X-Trace".to_owned(), "1".to_owned())]);

        xhr.open("GET", "https://offline.example/");
        send(&mut xhr, None);
        assert!(xhr.events().contains(&XhrEvent::Error));
    }

    #[test]
    fn send_requires_an_open_request() {
        let mut xhr = XmlHttpRequest::new(default_backend());
        assert!(xhr.send(None).is_err());

        xhr.open("GET", "data/toc.json");
        xhr.abort();
        assert_eq!(xhr.ready_state(), 0);
        assert!(xhr.send(None).is_err());
    }
}
