//! Delegation of smart-HTTP requests to an external transport process.
//!
//! The gateway never speaks the git wire protocol itself. It hands a
//! validated request to a [`TransportBackend`], which is fully responsible
//! for protocol correctness. [`GitHttpBackend`] runs `git http-backend` as a
//! CGI program; tests substitute their own implementation.

use crate::error::GitError;
use crate::repo::{self, RefSnapshot};
use crate::Result;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{BoxStream, StreamExt};
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::oneshot;
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};

/// A streamed request or response body.
pub type BodyStream = BoxStream<'static, std::io::Result<Bytes>>;

/// `REMOTE_USER` reported to the backend for anonymous requests.
pub const DEFAULT_REMOTE_USER: &str = "lgh-user";

/// A request that has passed every gateway check.
pub struct TransportRequest {
    /// Repository directory name, e.g. `demo.git`.
    pub repo: String,
    /// Path below the repository, e.g. `/info/refs`.
    pub git_path: String,
    pub method: Method,
    /// Raw query string without the leading `?`.
    pub query: Option<String>,
    pub headers: HeaderMap,
    pub remote_addr: Option<SocketAddr>,
    pub remote_user: String,
    pub body: BodyStream,
}

impl TransportRequest {
    /// `PATH_INFO` as seen by the backend.
    pub fn path_info(&self) -> String {
        format!("/{}{}", self.repo, self.git_path)
    }
}

impl std::fmt::Debug for TransportRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportRequest")
            .field("repo", &self.repo)
            .field("git_path", &self.git_path)
            .field("method", &self.method)
            .field("query", &self.query)
            .field("remote_user", &self.remote_user)
            .finish_non_exhaustive()
    }
}

/// The backend's response.
///
/// `completion` resolves once the backend has finished, carrying whether it
/// succeeded. The body must be consumed for the backend to finish.
pub struct TransportResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: BodyStream,
    pub completion: oneshot::Receiver<bool>,
}

impl std::fmt::Debug for TransportResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// Executes validated transport requests.
#[async_trait]
pub trait TransportBackend: Send + Sync {
    /// Serve one request against the repository root the backend was
    /// created for.
    async fn serve(&self, request: TransportRequest) -> Result<TransportResponse>;

    /// Snapshot the refs of a repository.
    async fn refs(&self, repo_path: &Path) -> Result<RefSnapshot> {
        repo::snapshot_refs(repo_path).await
    }
}

/// Runs `git http-backend` as a CGI program.
#[derive(Debug, Clone)]
pub struct GitHttpBackend {
    project_root: PathBuf,
    program: PathBuf,
}

impl GitHttpBackend {
    /// Locate `git-http-backend` via `git --exec-path`.
    pub async fn locate(project_root: impl Into<PathBuf>) -> Result<Self> {
        let output = Command::new("git")
            .arg("--exec-path")
            .output()
            .await
            .map_err(|e| GitError::GitUnavailable(e.to_string()))?;
        if !output.status.success() {
            return Err(GitError::GitUnavailable(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }

        let exec_path = PathBuf::from(String::from_utf8_lossy(&output.stdout).trim());
        let program = exec_path.join("git-http-backend");
        let program = if program.is_file() {
            program
        } else {
            let exe = program.with_extension("exe");
            if !exe.is_file() {
                return Err(GitError::BackendNotFound(program));
            }
            exe
        };

        Ok(Self::with_program(project_root, program))
    }

    /// Use an explicit backend executable.
    pub fn with_program(project_root: impl Into<PathBuf>, program: impl Into<PathBuf>) -> Self {
        Self {
            project_root: project_root.into(),
            program: program.into(),
        }
    }

    /// Root directory containing the bare repositories.
    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    fn command(&self, request: &TransportRequest) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.env_clear();
        if let Some(path) = std::env::var_os("PATH") {
            cmd.env("PATH", path);
        }
        cmd.envs(cgi_env(&self.project_root, request))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl TransportBackend for GitHttpBackend {
    async fn serve(&self, request: TransportRequest) -> Result<TransportResponse> {
        debug!(
            repo = %request.repo,
            method = %request.method,
            path = %request.path_info(),
            "delegating to git http-backend"
        );

        let mut child = self.command(&request).spawn()?;
        let (stdin, stdout, stderr) = match (child.stdin.take(), child.stdout.take(), child.stderr.take()) {
            (Some(stdin), Some(stdout), Some(stderr)) => (stdin, stdout, stderr),
            _ => return Err(GitError::Cgi("backend stdio not captured".to_string())),
        };

        let mut body = request.body;
        tokio::spawn(async move {
            let mut stdin = stdin;
            while let Some(chunk) = body.next().await {
                let written = match chunk {
                    Ok(chunk) => stdin.write_all(&chunk).await,
                    Err(e) => Err(e),
                };
                if let Err(e) = written {
                    debug!(error = %e, "request body not fully delivered to backend");
                    return;
                }
            }
            let _ = stdin.shutdown().await;
        });

        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                warn!(target: "lgh::git", "git http-backend: {}", line);
            }
        });

        let mut reader = BufReader::new(stdout);
        let (status, headers) = match read_cgi_head(&mut reader).await {
            Ok(head) => head,
            Err(e) => {
                let _ = child.kill().await;
                return Err(e);
            }
        };

        let (done_tx, done_rx) = oneshot::channel();
        tokio::spawn(async move {
            let success = match child.wait().await {
                Ok(status) => status.success(),
                Err(e) => {
                    warn!(error = %e, "failed to wait for git http-backend");
                    false
                }
            };
            let _ = done_tx.send(success);
        });

        Ok(TransportResponse {
            status,
            headers,
            body: ReaderStream::new(reader).boxed(),
            completion: done_rx,
        })
    }
}

/// CGI environment for a request.
fn cgi_env(project_root: &Path, request: &TransportRequest) -> Vec<(String, String)> {
    let header = |name: &str| {
        request
            .headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };

    let mut env = vec![
        (
            "GIT_PROJECT_ROOT".to_string(),
            project_root.display().to_string(),
        ),
        ("GIT_HTTP_EXPORT_ALL".to_string(), "1".to_string()),
        ("REMOTE_USER".to_string(), request.remote_user.clone()),
        ("GATEWAY_INTERFACE".to_string(), "CGI/1.1".to_string()),
        ("SERVER_PROTOCOL".to_string(), "HTTP/1.1".to_string()),
        ("REQUEST_METHOD".to_string(), request.method.to_string()),
        ("PATH_INFO".to_string(), request.path_info()),
        (
            "QUERY_STRING".to_string(),
            request.query.clone().unwrap_or_default(),
        ),
    ];

    if let Some(addr) = request.remote_addr {
        env.push(("REMOTE_ADDR".to_string(), addr.ip().to_string()));
    }
    for (var, name) in [
        ("CONTENT_TYPE", "content-type"),
        ("CONTENT_LENGTH", "content-length"),
        ("HTTP_CONTENT_ENCODING", "content-encoding"),
        ("HTTP_GIT_PROTOCOL", "git-protocol"),
    ] {
        if let Some(value) = header(name) {
            env.push((var.to_string(), value));
        }
    }
    env
}

/// Read the CGI header block up to the blank separator line.
async fn read_cgi_head<R>(reader: &mut BufReader<R>) -> Result<(StatusCode, HeaderMap)>
where
    R: AsyncRead + Unpin,
{
    let mut status = None;
    let mut headers = HeaderMap::new();
    let mut line = String::new();

    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            return Err(GitError::Cgi("missing header terminator".to_string()));
        }
        let trimmed = line.trim_end_matches(['\r', '\n']);
        if trimmed.is_empty() {
            break;
        }

        let (name, value) = trimmed
            .split_once(':')
            .ok_or_else(|| GitError::Cgi(format!("bad header line: {:?}", trimmed)))?;
        let value = value.trim();

        if name.eq_ignore_ascii_case("status") {
            let code = value
                .split_whitespace()
                .next()
                .and_then(|c| c.parse::<u16>().ok())
                .and_then(|c| StatusCode::from_u16(c).ok())
                .ok_or_else(|| GitError::Cgi(format!("bad status: {:?}", value)))?;
            status = Some(code);
            continue;
        }

        let name = HeaderName::from_bytes(name.trim().as_bytes())
            .map_err(|_| GitError::Cgi(format!("bad header name: {:?}", name)))?;
        let value = HeaderValue::from_str(value)
            .map_err(|_| GitError::Cgi(format!("bad header value for {}", name)))?;
        headers.append(name, value);
    }

    let status = status.unwrap_or_else(|| {
        if headers.contains_key(http::header::LOCATION) {
            StatusCode::FOUND
        } else {
            StatusCode::OK
        }
    });
    Ok((status, headers))
}
