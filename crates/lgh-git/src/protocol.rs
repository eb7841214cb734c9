//! Smart-HTTP request classification.

use http::Method;

/// Service name of the push side of the protocol.
pub const RECEIVE_PACK: &str = "git-receive-pack";

/// Service name of the fetch side of the protocol.
pub const UPLOAD_PACK: &str = "git-upload-pack";

/// Split a request path into the repository directory name and the
/// remaining git sub-path.
///
/// `/demo.git/info/refs` yields `("demo.git", "/info/refs")`. The repository
/// segment is the longest prefix of the first path segment that ends in
/// `.git`; paths without such a segment are rejected.
pub fn parse_repo_path(path: &str) -> Option<(&str, &str)> {
    let rest = path.strip_prefix('/')?;
    let segment_end = rest.find('/').unwrap_or(rest.len());
    let segment = &rest[..segment_end];

    let idx = segment.rfind(".git")?;
    if idx == 0 {
        return None;
    }
    let repo_end = idx + ".git".len();
    Some((&rest[..repo_end], &rest[repo_end..]))
}

/// Whether a request is a push (receive-pack) operation.
///
/// `git_path` and `service` must already be percent-decoded. Only `POST`
/// requests qualify; the ref advertisement (`GET
/// info/refs?service=git-receive-pack`) is a read.
pub fn is_push_request(method: &Method, git_path: &str, service: Option<&str>) -> bool {
    if method != Method::POST {
        return false;
    }
    git_path.contains(RECEIVE_PACK) || service == Some(RECEIVE_PACK)
}
