//! The event pipeline owned by one server instance.

use crate::broker::Broker;
use crate::bus::EventBus;
use crate::error::Result;
use crate::event::{Event, EventType, Payload};
use crate::logger::EventLogger;
use std::path::Path;
use std::sync::Arc;

/// Bus, broker and logger wired together.
///
/// Built once at startup and shared (cheaply cloned) with every component
/// that publishes or subscribes.
#[derive(Debug, Clone)]
pub struct EventContext {
    bus: Arc<EventBus>,
    broker: Arc<Broker>,
    logger: Option<Arc<EventLogger>>,
}

impl EventContext {
    /// Create a pipeline that persists to `<events_dir>/events.jsonl` and
    /// fans out to live subscribers.
    pub fn open(events_dir: impl AsRef<Path>) -> Result<Self> {
        let logger = Arc::new(EventLogger::open(events_dir)?);
        Ok(Self::assemble(Some(logger)))
    }

    /// Create a pipeline with a caller-supplied logger.
    pub fn with_logger(logger: EventLogger) -> Self {
        Self::assemble(Some(Arc::new(logger)))
    }

    /// Create a pipeline with live fan-out only.
    pub fn in_memory() -> Self {
        Self::assemble(None)
    }

    fn assemble(logger: Option<Arc<EventLogger>>) -> Self {
        let bus = Arc::new(EventBus::new());
        let broker = Arc::new(Broker::new());

        // Logger first: persistence is recorded before live delivery.
        if let Some(logger) = &logger {
            bus.subscribe(logger.clone());
        }
        bus.subscribe(broker.clone());

        Self {
            bus,
            broker,
            logger,
        }
    }

    /// Publish a new event through the bus.
    pub fn publish(
        &self,
        event_type: impl Into<EventType>,
        repo_name: impl Into<String>,
        payload: Option<Payload>,
    ) -> Event {
        self.bus.publish(event_type, repo_name, payload)
    }

    /// Deliver an event to live subscribers only, skipping persistence.
    pub fn broadcast(&self, event: &Event) -> usize {
        self.broker.broadcast(event)
    }

    /// The bus, for registering additional handlers.
    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// The live broker.
    pub fn broker(&self) -> &Arc<Broker> {
        &self.broker
    }

    /// The persistent logger, if this context has one.
    pub fn logger(&self) -> Option<&Arc<EventLogger>> {
        self.logger.as_ref()
    }

    /// Close live subscribers, then drain and close the log.
    pub fn shutdown(&self) -> Result<()> {
        self.broker.close();
        if let Some(logger) = &self.logger {
            logger.close()?;
        }
        Ok(())
    }
}
