//! Per-frame replacements for the network primitives and the globals the
//! embedded application talks through.

mod console;
mod fetch;
mod message;
pub mod websocket;
pub mod xhr;

pub use console::CONSOLE_LEVELS;
pub use console::ConsoleShim;
pub use fetch::FetchShim;
pub use message::MessageLog;
pub use websocket::LocalSocketServer;
pub use websocket::MockWebSocket;
pub use xhr::XhrBackend;
pub use xhr::XhrRouteTable;
pub use xhr::XmlHttpRequest;

use crate::darkmode::DarkModeEngine;
use crate::interceptor::ContextCell;
use crate::router::SchemeRouter;
use std::rc::Rc;
use url::Url;
use vf_core::VirtResult;
use vf_dom::WindowId;
use vf_js::FrameRealm;

/// Everything installed into one patched frame's window. Dropping the scope
/// releases the frame's script realm and its dark-mode engine.
#[derive(Debug)]
pub struct FrameScope {
    window: WindowId,
    context: ContextCell,
    fetch: FetchShim,
    xhr: Rc<XhrBackend>,
    sockets: Rc<LocalSocketServer>,
    messages: MessageLog,
    console: ConsoleShim,
    realm: Option<FrameRealm>,
    dark_mode: Option<Rc<DarkModeEngine>>,
}

impl FrameScope {
    pub fn new(
        window: WindowId,
        context: ContextCell,
        router: Rc<SchemeRouter>,
        xhr_routes: Rc<XhrRouteTable>,
        host_origin: Option<Url>,
        sockets: Rc<LocalSocketServer>,
    ) -> Self {
        Self {
            window,
            fetch: FetchShim::new(Rc::clone(&router), Rc::clone(&context)),
            xhr: Rc::new(XhrBackend::new(router, Rc::clone(&context), xhr_routes, host_origin)),
            context,
            sockets,
            messages: MessageLog::new(),
            console: ConsoleShim::new(),
            realm: None,
            dark_mode: None,
        }
    }

    pub fn window(&self) -> WindowId {
        self.window
    }

    pub fn context(&self) -> Option<Url> {
        self.context.borrow().clone()
    }

    pub fn fetch(&self) -> &FetchShim {
        &self.fetch
    }

    /// `new XMLHttpRequest()` inside the frame.
    pub fn xml_http_request(&self) -> XmlHttpRequest {
        XmlHttpRequest::new(Rc::clone(&self.xhr))
    }

    /// `new WebSocket(url)` inside the frame.
    pub fn open_websocket(&self, url: &str) -> VirtResult<MockWebSocket> {
        self.sockets.connect(url)
    }

    pub fn messages(&self) -> &MessageLog {
        &self.messages
    }

    pub fn console(&self) -> &ConsoleShim {
        &self.console
    }

    pub fn realm_mut(&mut self) -> Option<&mut FrameRealm> {
        self.realm.as_mut()
    }

    pub fn has_realm(&self) -> bool {
        self.realm.is_some()
    }

    pub fn dark_mode(&self) -> Option<&Rc<DarkModeEngine>> {
        self.dark_mode.as_ref()
    }

    pub(crate) fn install_realm(&mut self, realm: FrameRealm) {
        self.realm = Some(realm);
    }

    pub(crate) fn install_dark_mode(&mut self, engine: Rc<DarkModeEngine>) {
        self.dark_mode = Some(engine);
    }

    /// Moves whatever the realm's script-level shims captured into the
    /// scope's own console and message log.
    pub fn drain_realm(&mut self) -> VirtResult<()> {
        let Some(realm) = self.realm.as_mut() else {
            return Ok(());
        };
        self.messages.absorb(realm.take_posted_messages()?);
        self.console.absorb(realm.take_console_tally()?);
        Ok(())
    }
}
