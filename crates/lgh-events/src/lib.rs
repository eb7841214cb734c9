//! # LGH Events
//!
//! The observability pipeline of the LGH gateway: every notable action
//! (push, repository registration or removal) becomes an [`Event`] that is
//! persisted to a rotating JSON-lines log and streamed to live subscribers.
//!
//! ## Components
//!
//! - **Event Bus**: synchronous publish/subscribe with per-handler failure
//!   isolation
//! - **Event Logger**: bounded queue drained by one worker thread into
//!   `events.jsonl`, rotated at 10 MiB
//! - **Broker**: per-subscriber bounded channels fed without blocking
//! - **Reader**: helpers to read the persisted log back
//!
//! Both the logger queue and the broker channels drop on overflow. The
//! publisher is usually a git push in flight, and it must never wait on
//! observers.
//!
//! ## Example
//!
//! ```rust
//! use lgh_events::{EventContext, EventType};
//!
//! let ctx = EventContext::in_memory();
//! let mut sub = ctx.broker().subscribe_client();
//!
//! ctx.publish(EventType::RepoAdded, "demo", None);
//!
//! let event = sub.try_recv().unwrap();
//! assert_eq!(event.repo_name(), "demo");
//! ```
//!
//! ## Architecture
//!
//! ```text
//!  publish(type, repo, payload)
//!          │
//!  ┌───────▼────────┐
//!  │   EventBus     │  handlers invoked in order, each isolated
//!  └───┬────────┬───┘
//!      │        │
//!  ┌───▼────┐ ┌─▼──────────────┐
//!  │ Logger │ │    Broker      │
//!  │ queue  │ │ id -> channel  │
//!  └───┬────┘ └─┬──────────────┘
//!      │        │
//!  events.jsonl  live subscribers (IPC)
//! ```

pub mod broker;
pub mod bus;
pub mod context;
pub mod error;
pub mod event;
pub mod logger;
pub mod reader;

pub use broker::{Broker, BrokerStats, SubscriberId, Subscription, SUBSCRIBER_BUFFER};
pub use bus::{EventBus, EventHandler, FnHandler};
pub use context::EventContext;
pub use error::{EventError, Result};
pub use event::{Event, EventType, Payload, REPLAYED_KEY};
pub use logger::{EventLogger, LoggerConfig, LoggerStats, LOG_FILE_NAME, MAX_LOG_SIZE, QUEUE_CAPACITY};
pub use reader::{read_events, select_last};
