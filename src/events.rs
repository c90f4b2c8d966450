//! Fan-out dispatch for unsolicited gateway messages.
//!
//! Handlers are plain callbacks invoked on the channel's read turn, in
//! registration order. A panicking handler is isolated and logged so it can
//! neither starve later handlers nor take down the read loop.
//!
//! # Example
//!
//! ```
//! use admwire::events::EventBus;
//! use admwire::protocol::Event;
//! use serde_json::json;
//!
//! let bus = EventBus::new();
//! bus.register(Box::new(|event: &Event| {
//!     println!("event: {}", event.body);
//! }));
//!
//! bus.dispatch(&Event { body: json!({"type": "session"}) });
//! ```

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::RwLock;

use crate::protocol::Event;

/// Callback invoked for every unsolicited message.
pub type EventHandler = Box<dyn Fn(&Event) + Send + Sync>;

/// Ordered fan-out dispatcher for gateway events.
#[derive(Default)]
pub struct EventBus {
    handlers: RwLock<Vec<EventHandler>>,
}

impl EventBus {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a handler; it will receive every subsequent event, after all
    /// handlers registered before it.
    pub fn register(&self, handler: EventHandler) {
        self.handlers.write().unwrap().push(handler);
    }

    /// Deliver one event to every registered handler in registration order.
    ///
    /// A handler panic is caught and logged; remaining handlers still run.
    pub fn dispatch(&self, event: &Event) {
        let handlers = self.handlers.read().unwrap();
        for (index, handler) in handlers.iter().enumerate() {
            if catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
                tracing::error!(index, "event handler panicked, continuing with remaining handlers");
            }
        }
    }

    /// Number of registered handlers.
    pub fn handler_count(&self) -> usize {
        self.handlers.read().unwrap().len()
    }
}
