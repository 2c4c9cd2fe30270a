//! `postMessage` wrapper. Every message leaves with target origin `"*"`.

use std::cell::RefCell;
use vf_js::PostedMessage;

#[derive(Debug, Default)]
pub struct MessageLog {
    messages: RefCell<Vec<PostedMessage>>,
}

impl MessageLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn post_message(&self, data: impl Into<String>, requested_origin: impl Into<String>) {
        self.messages.borrow_mut().push(PostedMessage {
            data: data.into(),
            requested_origin: requested_origin.into(),
            target_origin: "*".to_owned(),
        });
    }

    /// Takes messages drained from a script realm, re-forcing the target.
    pub fn absorb(&self, posted: Vec<PostedMessage>) {
        for message in posted {
            self.post_message(message.data, message.requested_origin);
        }
    }

    pub fn len(&self) -> usize {
        self.messages.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.borrow().is_empty()
    }

    pub fn take(&self) -> Vec<PostedMessage> {
        std::mem::take(&mut *self.messages.borrow_mut())
    }
}

#[cfg(test)]
mod tests {
    use super::MessageLog;
    use vf_js::PostedMessage;

    #[test]
    fn target_origin_is_always_wildcard() {
        let log = MessageLog::new();
        log.post_message("{\"page\":3}", "https://reader.example");
        log.absorb(vec![PostedMessage {
            data: "1".to_owned(),
            requested_origin: "app://vault".to_owned(),
            target_origin: "app://vault".to_owned(),
        }]);

        let messages = log.take();
        assert_eq!(messages.len(), 2);
        assert!(messages.iter().all(|message| message.target_origin == "*"));
        assert_eq!(messages[0].requested_origin, "https://reader.example");
        assert!(log.is_empty());
    }
}
