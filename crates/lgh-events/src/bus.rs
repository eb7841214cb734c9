//! Synchronous in-process publish/subscribe.

use crate::error::Result;
use crate::event::{Event, EventType, Payload};
use parking_lot::RwLock;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{error, warn};

/// A long-lived consumer of bus events.
///
/// Implementations must be cheap and non-blocking: `handle` runs inline on
/// the publisher's thread.
pub trait EventHandler: Send + Sync {
    /// Handle one event.
    fn handle(&self, event: &Event) -> Result<()>;

    /// Name used when reporting handler failures.
    fn name(&self) -> &str {
        "handler"
    }
}

/// Adapts a closure into an [`EventHandler`].
pub struct FnHandler<F> {
    name: String,
    f: F,
}

impl<F> FnHandler<F>
where
    F: Fn(&Event) -> Result<()> + Send + Sync,
{
    /// Wrap a closure under the given name.
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

impl<F> EventHandler for FnHandler<F>
where
    F: Fn(&Event) -> Result<()> + Send + Sync,
{
    fn handle(&self, event: &Event) -> Result<()> {
        (self.f)(event)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Central event dispatcher.
///
/// `publish` invokes every registered handler in registration order on the
/// caller's thread. Each invocation runs inside its own failure boundary, so
/// an erroring or panicking handler is reported and skipped.
#[derive(Default)]
pub struct EventBus {
    handlers: RwLock<Vec<Arc<dyn EventHandler>>>,
}

impl EventBus {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for the lifetime of the bus.
    pub fn subscribe(&self, handler: Arc<dyn EventHandler>) {
        self.handlers.write().push(handler);
    }

    /// Build an event and dispatch it to every handler.
    pub fn publish(
        &self,
        event_type: impl Into<EventType>,
        repo_name: impl Into<String>,
        payload: Option<Payload>,
    ) -> Event {
        let event = Event::new(event_type, repo_name, payload);
        self.dispatch(&event);
        event
    }

    /// Dispatch an existing event. Returns the number of handlers that
    /// completed without error.
    pub fn dispatch(&self, event: &Event) -> usize {
        // Snapshot so a handler may subscribe without deadlocking.
        let handlers = self.handlers.read().clone();

        let mut succeeded = 0;
        for handler in &handlers {
            match panic::catch_unwind(AssertUnwindSafe(|| handler.handle(event))) {
                Ok(Ok(())) => succeeded += 1,
                Ok(Err(e)) => {
                    warn!(
                        handler = handler.name(),
                        event_id = event.id(),
                        error = %e,
                        "Event handler failed"
                    );
                }
                Err(_) => {
                    error!(
                        handler = handler.name(),
                        event_id = event.id(),
                        "Event handler panicked"
                    );
                }
            }
        }
        succeeded
    }

    /// Number of registered handlers.
    pub fn handler_count(&self) -> usize {
        self.handlers.read().len()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("handlers", &self.handler_count())
            .finish()
    }
}
