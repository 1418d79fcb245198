//! Message-handler registration keyed by message kind.
//!
//! A [`MessageRouter`] maps each [`MessageKind`] to an ordered list of
//! handlers. [`dispatch`](MessageRouter::dispatch) runs them synchronously,
//! in registration order, against a caller-supplied context, so one inbound
//! message is fully applied before the next is looked at.

use std::collections::HashMap;
use std::fmt;

use tracing::trace;

use crate::protocol::{MessageKind, ServerMessage};

/// A registered handler.
pub type Handler<C> = Box<dyn FnMut(&mut C, &ServerMessage) + Send>;

pub struct MessageRouter<C> {
    handlers: HashMap<MessageKind, Vec<Handler<C>>>,
}

impl<C> MessageRouter<C> {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register `handler` for messages of `kind`.
    pub fn on<F>(&mut self, kind: MessageKind, handler: F)
    where
        F: FnMut(&mut C, &ServerMessage) + Send + 'static,
    {
        self.handlers
            .entry(kind)
            .or_default()
            .push(Box::new(handler));
    }

    /// Run every handler registered for the message's kind.
    ///
    /// Returns the number of handlers invoked.
    pub fn dispatch(&mut self, ctx: &mut C, message: &ServerMessage) -> usize {
        let kind = message.kind();
        let Some(handlers) = self.handlers.get_mut(&kind) else {
            trace!(event = kind.as_str(), "no handler registered");
            return 0;
        };
        for handler in handlers.iter_mut() {
            handler(ctx, message);
        }
        handlers.len()
    }

    /// Number of handlers registered for `kind`.
    pub fn handler_count(&self, kind: MessageKind) -> usize {
        self.handlers.get(&kind).map_or(0, Vec::len)
    }
}

impl<C> Default for MessageRouter<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> fmt::Debug for MessageRouter<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<&str> = self.handlers.keys().map(MessageKind::as_str).collect();
        kinds.sort_unstable();
        f.debug_struct("MessageRouter")
            .field("kinds", &kinds)
            .finish()
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    #[test]
    fn handlers_run_in_registration_order() {
        let mut router: MessageRouter<Vec<&'static str>> = MessageRouter::new();
        router.on(MessageKind::EventEnded, |log, _| log.push("first"));
        router.on(MessageKind::EventEnded, |log, _| log.push("second"));
        router.on(MessageKind::HostCode, |log, _| log.push("host"));

        let mut log = Vec::new();
        assert_eq!(router.dispatch(&mut log, &ServerMessage::EventEnded), 2);
        assert_eq!(log, ["first", "second"]);
    }

    #[test]
    fn unregistered_kinds_are_ignored() {
        let mut router: MessageRouter<u64> = MessageRouter::new();
        router.on(MessageKind::TimerUpdate, |total, msg| {
            if let ServerMessage::TimerUpdate(ms) = msg {
                *total += ms;
            }
        });

        let mut total = 0;
        assert_eq!(router.dispatch(&mut total, &ServerMessage::HostCode("9".into())), 0);
        router.dispatch(&mut total, &ServerMessage::TimerUpdate(250));
        assert_eq!(total, 250);
        assert_eq!(router.handler_count(MessageKind::TimerUpdate), 1);
        assert_eq!(router.handler_count(MessageKind::HostCode), 0);
    }
}
