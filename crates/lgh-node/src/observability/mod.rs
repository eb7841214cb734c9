//! # Observability
//!
//! - **Structured logging**: pretty or JSON output through `tracing`
//! - **Access logging**: one event per gateway request
//! - **Virtual owner rewrite**: `/lgh/<repo>.git/...` accepted as `/<repo>.git/...`

mod logging;
pub mod middleware;

pub use logging::{init_logging, LogFormat};
pub use middleware::{access_log, rewrite_virtual_owner, virtual_owner, VIRTUAL_OWNER};
