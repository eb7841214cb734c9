//! Git transport boundary for LGH.
//!
//! The gateway validates requests and then delegates them to a
//! [`TransportBackend`]. This crate provides that boundary, the default
//! backend that runs `git http-backend`, request classification, and the
//! repository inspection used to describe pushes as events.

mod backend;
mod error;
mod protocol;
mod repo;

pub use backend::{
    BodyStream, GitHttpBackend, TransportBackend, TransportRequest, TransportResponse,
    DEFAULT_REMOTE_USER,
};
pub use error::GitError;
pub use protocol::{is_push_request, parse_repo_path, RECEIVE_PACK, UPLOAD_PACK};
pub use repo::{
    diff_refs, is_bare_repo, parse_show_ref, push_payload, snapshot_refs, tag_payload,
    RefAction, RefChange, RefSnapshot, ZERO_SHA,
};

/// Result type for git transport operations.
pub type Result<T> = std::result::Result<T, GitError>;
