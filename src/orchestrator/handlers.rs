use alloc::boxed::Box;

use log::debug;

use crate::ports::MessageSink;

pub(crate) type ConnectionHandler = Box<dyn FnMut(bool)>;
pub(crate) type MessageHandler = Box<dyn FnMut(&str, &[u8])>;

/// Single application slot for inbound bus messages; the last registration wins.
#[derive(Default)]
pub(crate) struct MessageSlot {
    handler: Option<MessageHandler>,
}

impl MessageSlot {
    pub(crate) fn set(&mut self, handler: MessageHandler) {
        self.handler = Some(handler);
    }
}

impl MessageSink for MessageSlot {
    fn deliver(&mut self, topic: &str, payload: &[u8]) {
        debug!("bus: received topic={} len={}", topic, payload.len());
        match self.handler.as_mut() {
            Some(handler) => handler(topic, payload),
            None => debug!("bus: no message handler, dropped topic={}", topic),
        }
    }
}

/// Single application slot for connection-change notifications.
#[derive(Default)]
pub(crate) struct ConnectionSlot {
    handler: Option<ConnectionHandler>,
}

impl ConnectionSlot {
    pub(crate) fn set(&mut self, handler: ConnectionHandler) {
        self.handler = Some(handler);
    }

    pub(crate) fn notify(&mut self, connected: bool) {
        if let Some(handler) = self.handler.as_mut() {
            handler(connected);
        }
    }
}
