//! # LGH Node
//!
//! The local git hub gateway: an authenticated smart-HTTP front door for
//! bare repositories that turns pushes into events, persists them, and
//! streams them to local subscribers.
//!
//! ```text
//!   git client ──HTTP──▶ gateway ──CGI──▶ git http-backend
//!                           │
//!                    git.push / git.tag
//!                           ▼
//!                      EventContext ──▶ event log (events.jsonl)
//!                           │
//!                           └──▶ broker ──▶ IPC socket ──▶ watchers
//!
//!   lgh events replay ──HTTP──▶ /debug/events ──▶ broker only
//! ```
//!
//! ## Modules
//!
//! - [`api`] - Router, gates and transport delegation
//! - [`auth`] - HTTP Basic authentication and password hashing
//! - [`config`] - Configuration loading and validation
//! - [`ipc`] - Local event stream over a Unix socket
//! - [`observability`] - Logging setup and request middleware
//! - [`replay`] - Re-injection of logged events
//! - [`server`] - Gateway lifecycle

pub mod api;
pub mod auth;
pub mod config;
pub mod display;
#[cfg(unix)]
pub mod ipc;
pub mod observability;
pub mod replay;
pub mod server;
pub mod shutdown;
