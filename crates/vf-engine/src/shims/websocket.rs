//! In-process WebSocket double.
//!
//! Sockets created inside patched frames connect to one
//! [`LocalSocketServer`] per session. Nothing touches the network.

use serde_json::Value;
use serde_json::json;
use std::cell::Cell;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::collections::VecDeque;
use std::rc::Rc;
use std::rc::Weak;
use tracing::debug;
use tracing::trace;
use vf_core::VirtError;
use vf_core::VirtResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketState {
    Connecting = 0,
    Open = 1,
    Closing = 2,
    Closed = 3,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
    Open,
    Message(String),
    Close { code: u16, reason: String },
}

#[derive(Debug)]
struct SocketInner {
    id: u64,
    url: String,
    state: Cell<SocketState>,
    client_id: RefCell<Option<String>>,
    events: RefCell<VecDeque<SocketEvent>>,
}

impl SocketInner {
    fn deliver(&self, message: String) {
        self.events.borrow_mut().push_back(SocketEvent::Message(message));
    }

    fn close(&self, code: u16, reason: &str) {
        if self.state.get() == SocketState::Closed {
            return;
        }
        self.state.set(SocketState::Closed);
        self.events.borrow_mut().push_back(SocketEvent::Close {
            code,
            reason: reason.to_owned(),
        });
    }
}

/// Server double every frame socket talks to.
#[derive(Debug)]
pub struct LocalSocketServer {
    identity: String,
    next_id: Cell<u64>,
    running: Cell<bool>,
    sockets: RefCell<BTreeMap<u64, Rc<SocketInner>>>,
}

impl LocalSocketServer {
    pub fn new(identity: impl Into<String>) -> Rc<Self> {
        Rc::new(Self {
            identity: identity.into(),
            next_id: Cell::new(1),
            running: Cell::new(true),
            sockets: RefCell::new(BTreeMap::new()),
        })
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn is_running(&self) -> bool {
        self.running.get()
    }

    /// Opens a socket. The `open` event is already queued on return.
    pub fn connect(self: &Rc<Self>, url: &str) -> VirtResult<MockWebSocket> {
        if !self.is_running() {
            return Err(VirtError::new(
                "ws.server_stopped",
                format!("cannot connect to `{url}`: local server is stopped"),
            ));
        }

        let id = self.next_id.get();
        self.next_id.set(id.saturating_add(1));
        let inner = Rc::new(SocketInner {
            id,
            url: url.to_owned(),
            state: Cell::new(SocketState::Open),
            client_id: RefCell::new(None),
            events: RefCell::new(VecDeque::from([SocketEvent::Open])),
        });
        self.sockets.borrow_mut().insert(id, Rc::clone(&inner));
        trace!(id, %url, "local socket connected");

        Ok(MockWebSocket {
            inner,
            server: Rc::downgrade(self),
        })
    }

    pub fn connection_count(&self) -> usize {
        self.sockets
            .borrow()
            .values()
            .filter(|socket| socket.state.get() == SocketState::Open)
            .count()
    }

    /// Pushes `message` to every open socket. Returns how many received it.
    pub fn broadcast(&self, message: &Value) -> usize {
        let text = message.to_string();
        let sockets = self.sockets.borrow();
        let mut delivered = 0_usize;
        for socket in sockets.values().filter(|socket| socket.state.get() == SocketState::Open) {
            socket.deliver(text.clone());
            delivered = delivered.saturating_add(1);
        }
        delivered
    }

    /// Pushes `message` to sockets registered under `client_id`.
    pub fn push_to(&self, client_id: &str, message: &Value) -> usize {
        let text = message.to_string();
        let sockets = self.sockets.borrow();
        let mut delivered = 0_usize;
        for socket in sockets.values() {
            let registered = socket.client_id.borrow().as_deref() == Some(client_id);
            if registered && socket.state.get() == SocketState::Open {
                socket.deliver(text.clone());
                delivered = delivered.saturating_add(1);
            }
        }
        delivered
    }

    /// Closes every socket and refuses new connections.
    pub fn stop(&self) {
        self.running.set(false);
        let sockets = std::mem::take(&mut *self.sockets.borrow_mut());
        for socket in sockets.values() {
            socket.close(1001, "server stopped");
        }
        debug!(closed = sockets.len(), "local socket server stopped");
    }

    fn receive(&self, socket: &SocketInner, text: &str) {
        let message: Value = match serde_json::from_str(text) {
            Ok(message) => message,
            Err(error) => {
                trace!(id = socket.id, %error, "ignoring non-JSON socket message");
                return;
            }
        };

        match message["type"].as_str() {
            Some("whoami") => {
                let reply = json!({
                    "type": "whoyouare",
                    "reply_to": message["id"],
                    "identity": {
                        "server": self.identity,
                        "connection": socket.id,
                        "client_id": socket.client_id.borrow().clone(),
                    },
                });
                socket.deliver(reply.to_string());
            }
            Some("client_id") => {
                let Some(client_id) = message["client_id"].as_str() else {
                    trace!(id = socket.id, "client_id message without an id");
                    return;
                };
                *socket.client_id.borrow_mut() = Some(client_id.to_owned());
                let reply = json!({
                    "type": "client_id_ack",
                    "client_id": client_id,
                });
                socket.deliver(reply.to_string());
            }
            other => trace!(id = socket.id, kind = ?other, "unhandled socket message"),
        }
    }

    fn forget(&self, id: u64) {
        self.sockets.borrow_mut().remove(&id);
    }
}

/// The socket object a frame script holds.
#[derive(Debug)]
pub struct MockWebSocket {
    inner: Rc<SocketInner>,
    server: Weak<LocalSocketServer>,
}

impl MockWebSocket {
    pub fn url(&self) -> &str {
        &self.inner.url
    }

    pub fn ready_state(&self) -> SocketState {
        self.inner.state.get()
    }

    pub fn send(&self, text: &str) -> VirtResult<()> {
        if self.ready_state() != SocketState::Open {
            return Err(VirtError::new(
                "ws.socket_closed",
                format!("socket to `{}` is not open", self.inner.url),
            ));
        }
        match self.server.upgrade() {
            Some(server) => {
                server.receive(&self.inner, text);
                Ok(())
            }
            None => {
                self.inner.close(1006, "server gone");
                Err(VirtError::new("ws.server_stopped", "local server was dropped"))
            }
        }
    }

    pub fn close(&self) {
        if self.ready_state() == SocketState::Closed {
            return;
        }
        self.inner.state.set(SocketState::Closing);
        if let Some(server) = self.server.upgrade() {
            server.forget(self.inner.id);
        }
        self.inner.close(1000, "");
    }

    /// Events dispatched since the last call, oldest first.
    pub fn take_events(&self) -> Vec<SocketEvent> {
        self.inner.events.borrow_mut().drain(..).collect()
    }

    /// Message payloads dispatched since the last call; other events are
    /// discarded.
    pub fn take_messages(&self) -> Vec<String> {
        self.take_events()
            .into_iter()
            .filter_map(|event| match event {
                SocketEvent::Message(text) => Some(text),
                _ => None,
            })
            .collect()
    }
}
