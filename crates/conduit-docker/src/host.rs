//! Docker host discovery.
//!
//! Candidates are tried in priority order:
//!
//! | Source | Origin | Skippable on failure |
//! |--------|--------|----------------------|
//! | `config` | explicit `docker_host` setting | no |
//! | `env` | `DOCKER_HOST` | no |
//! | `detected` | platform socket locations that exist on disk | yes |
//! | `default` | the Engine client's own defaults | yes |
//!
//! Explicit settings never silently fall through to a guessed socket.

use std::fmt;
use std::path::{Path, PathBuf};

use bollard::{API_DEFAULT_VERSION, Docker};

use crate::error::{DockerError, DockerResult};

/// Seconds the Engine client waits on a single API call.
const CLIENT_TIMEOUT_SECS: u64 = 120;

/// Host platform, used to pick socket locations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    /// macOS (Docker Desktop, Colima, ...).
    MacOS,
    /// Linux (system, rootless or Desktop daemons).
    Linux,
    /// Windows (named pipe).
    Windows,
    /// Anything else.
    Other,
}

impl Platform {
    /// Detect the current platform.
    pub fn detect() -> Self {
        #[cfg(target_os = "macos")]
        {
            Platform::MacOS
        }

        #[cfg(target_os = "linux")]
        {
            Platform::Linux
        }

        #[cfg(target_os = "windows")]
        {
            Platform::Windows
        }

        #[cfg(not(any(target_os = "macos", target_os = "linux", target_os = "windows")))]
        {
            Platform::Other
        }
    }

    /// Get the display name for this platform.
    pub fn name(&self) -> &'static str {
        match self {
            Platform::MacOS => "macOS",
            Platform::Linux => "Linux",
            Platform::Windows => "Windows",
            Platform::Other => "other",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Where a candidate came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateSource {
    /// Explicit `docker_host` configuration.
    Config,
    /// The `DOCKER_HOST` environment variable.
    Env,
    /// A socket found at a well-known platform location.
    Detected,
    /// The Engine client's built-in defaults.
    Default,
}

impl CandidateSource {
    /// Whether a connection failure on this candidate may advance to the next one.
    pub fn may_skip(self) -> bool {
        matches!(self, CandidateSource::Detected | CandidateSource::Default)
    }

    /// Short label used in logs.
    pub fn label(self) -> &'static str {
        match self {
            CandidateSource::Config => "config",
            CandidateSource::Env => "env",
            CandidateSource::Detected => "detected",
            CandidateSource::Default => "default",
        }
    }
}

/// A concrete way of reaching a Docker daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DockerEndpoint {
    /// Unix domain socket.
    Unix(PathBuf),
    /// Windows named pipe.
    NamedPipe(String),
    /// Plain HTTP over TCP (`tcp://` or `http://`).
    Http(String),
    /// Whatever the Engine client picks on its own.
    LocalDefaults,
}

impl DockerEndpoint {
    /// Socket path, when the endpoint is a filesystem socket.
    pub fn socket_path(&self) -> Option<&Path> {
        match self {
            DockerEndpoint::Unix(path) => Some(path),
            _ => None,
        }
    }
}

impl fmt::Display for DockerEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DockerEndpoint::Unix(path) => write!(f, "unix://{}", path.display()),
            DockerEndpoint::NamedPipe(pipe) => write!(f, "npipe://{pipe}"),
            DockerEndpoint::Http(addr) => write!(f, "tcp://{addr}"),
            DockerEndpoint::LocalDefaults => write!(f, "client defaults"),
        }
    }
}

/// One entry of the ordered candidate list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DockerCandidate {
    /// How to connect.
    pub endpoint: DockerEndpoint,
    /// Human-readable description for logs and errors.
    pub description: String,
    /// Where the candidate came from.
    pub source: CandidateSource,
}

impl DockerCandidate {
    fn new(endpoint: DockerEndpoint, source: CandidateSource) -> Self {
        let description = format!("{} ({})", endpoint, source.label());
        Self {
            endpoint,
            description,
            source,
        }
    }
}

/// Parse a Docker host string (`unix://`, `npipe://`, `tcp://`, `http://` or a bare socket path).
pub fn parse_endpoint(host: &str) -> DockerResult<DockerEndpoint> {
    let host = host.trim();
    let invalid = |reason: &str| DockerError::InvalidHost {
        host: host.to_string(),
        reason: reason.to_string(),
    };

    if host.is_empty() {
        return Err(invalid("empty host"));
    }
    if let Some(path) = host.strip_prefix("unix://") {
        if path.is_empty() {
            return Err(invalid("missing socket path"));
        }
        return Ok(DockerEndpoint::Unix(PathBuf::from(path)));
    }
    if let Some(pipe) = host.strip_prefix("npipe://") {
        return Ok(DockerEndpoint::NamedPipe(pipe.to_string()));
    }
    if let Some(addr) = host
        .strip_prefix("tcp://")
        .or_else(|| host.strip_prefix("http://"))
    {
        if addr.is_empty() {
            return Err(invalid("missing address"));
        }
        return Ok(DockerEndpoint::Http(addr.trim_end_matches('/').to_string()));
    }
    if host.starts_with("https://") || host.starts_with("ssh://") {
        return Err(invalid("only unix, npipe and plain tcp hosts are supported"));
    }
    if host.starts_with('/') {
        return Ok(DockerEndpoint::Unix(PathBuf::from(host)));
    }
    Err(invalid("unrecognized scheme"))
}

/// Well-known socket locations for a platform, most specific first.
///
/// Only paths that `exists` reports as present are returned.
pub fn detected_socket_paths(
    platform: Platform,
    home: Option<&Path>,
    runtime_dir: Option<&Path>,
    uid: Option<u32>,
    exists: impl Fn(&Path) -> bool,
) -> Vec<PathBuf> {
    let mut paths = Vec::new();

    match platform {
        Platform::MacOS => {
            if let Some(home) = home {
                paths.push(home.join(".docker/run/docker.sock"));
                paths.push(home.join(".docker/desktop/docker.sock"));
                paths.push(home.join(".colima/default/docker.sock"));
            }
            paths.push(PathBuf::from("/var/run/docker.sock"));
        }
        Platform::Linux => {
            if let Some(home) = home {
                paths.push(home.join(".docker/desktop/docker.sock"));
            }
            if let Some(dir) = runtime_dir {
                paths.push(dir.join("docker.sock"));
            }
            if let Some(uid) = uid {
                paths.push(PathBuf::from(format!("/run/user/{uid}/docker.sock")));
            }
            paths.push(PathBuf::from("/var/run/docker.sock"));
        }
        Platform::Windows | Platform::Other => {}
    }

    let mut seen = Vec::new();
    paths.retain(|p| {
        if seen.contains(p) || !exists(p) {
            false
        } else {
            seen.push(p.clone());
            true
        }
    });
    paths
}

/// Build the ordered candidate list.
pub fn build_candidates(
    config_host: Option<&str>,
    env_host: Option<&str>,
    detected: Vec<PathBuf>,
) -> DockerResult<Vec<DockerCandidate>> {
    let mut candidates = Vec::new();

    if let Some(host) = config_host.filter(|h| !h.trim().is_empty()) {
        candidates.push(DockerCandidate::new(
            parse_endpoint(host)?,
            CandidateSource::Config,
        ));
    }
    if let Some(host) = env_host.filter(|h| !h.trim().is_empty()) {
        candidates.push(DockerCandidate::new(
            parse_endpoint(host)?,
            CandidateSource::Env,
        ));
    }
    for path in detected {
        candidates.push(DockerCandidate::new(
            DockerEndpoint::Unix(path),
            CandidateSource::Detected,
        ));
    }
    candidates.push(DockerCandidate::new(
        DockerEndpoint::LocalDefaults,
        CandidateSource::Default,
    ));

    Ok(candidates)
}

/// Candidates for the current process: config, `DOCKER_HOST`, detected sockets, defaults.
pub fn candidates_for_current_host(config_host: Option<&str>) -> DockerResult<Vec<DockerCandidate>> {
    let env_host = std::env::var("DOCKER_HOST").ok();
    let runtime_dir = std::env::var_os("XDG_RUNTIME_DIR").map(PathBuf::from);
    let home = dirs::home_dir();
    let detected = detected_socket_paths(
        Platform::detect(),
        home.as_deref(),
        runtime_dir.as_deref(),
        current_uid(),
        |p| p.exists(),
    );
    build_candidates(config_host, env_host.as_deref(), detected)
}

#[cfg(unix)]
fn current_uid() -> Option<u32> {
    use std::os::unix::fs::MetadataExt;
    std::fs::metadata("/proc/self").ok().map(|m| m.uid())
}

#[cfg(not(unix))]
fn current_uid() -> Option<u32> {
    None
}

/// Coarse classification of a failed connection attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// `ENOENT`: the socket does not exist.
    NotFound,
    /// `ECONNREFUSED`.
    Refused,
    /// `ECONNRESET`.
    Reset,
    /// `EPERM`.
    NotPermitted,
    /// `EACCES`.
    AccessDenied,
    /// Anything else.
    Other,
}

impl FailureKind {
    /// Whether a skippable candidate may be passed over after this failure.
    pub fn is_skippable(self) -> bool {
        !matches!(self, FailureKind::Other)
    }

    /// Classify an error message (and its source chain, already flattened into it).
    pub fn classify(message: &str) -> Self {
        let lower = message.to_ascii_lowercase();
        if lower.contains("eacces") || lower.contains("permission denied") || lower.contains("os error 13") {
            FailureKind::AccessDenied
        } else if lower.contains("eperm") || lower.contains("operation not permitted") || lower.contains("os error 1)") {
            FailureKind::NotPermitted
        } else if lower.contains("enoent")
            || lower.contains("no such file")
            || lower.contains("os error 2)")
            || lower.contains("socket not found")
            || lower.contains("sockets not found")
        {
            FailureKind::NotFound
        } else if lower.contains("econnrefused") || lower.contains("connection refused") {
            FailureKind::Refused
        } else if lower.contains("econnreset") || lower.contains("connection reset") {
            FailureKind::Reset
        } else {
            FailureKind::Other
        }
    }
}

/// Flatten an error and its sources into one message.
pub(crate) fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(inner) = source {
        message.push_str(": ");
        message.push_str(&inner.to_string());
        source = inner.source();
    }
    message
}

/// Guidance shown when the daemon socket is not accessible.
pub fn permission_guidance(socket: &str) -> String {
    format!(
        "The current user cannot open {socket}.\n\
         Fix it with one of:\n\
         \n\
           sudo usermod -aG docker $USER   (then log out and back in)\n\
           sudo chmod 666 {socket}         (less secure)\n\
         \n\
         or point `docker_host` / DOCKER_HOST at a socket you can access."
    )
}

/// A connected Engine client and the candidate that produced it.
#[derive(Debug, Clone)]
pub struct ResolvedHost {
    /// Engine API client.
    pub docker: Docker,
    /// Candidate that answered.
    pub candidate: DockerCandidate,
}

/// Walks a candidate list, pinging each until one answers.
///
/// The index is private to the resolver; independent resolvers never share state.
#[derive(Debug)]
pub struct HostResolver {
    candidates: Vec<DockerCandidate>,
    index: usize,
}

impl HostResolver {
    /// Create a resolver over an explicit candidate list.
    pub fn new(candidates: Vec<DockerCandidate>) -> Self {
        Self {
            candidates,
            index: 0,
        }
    }

    /// Create a resolver for the current host.
    pub fn for_current_host(config_host: Option<&str>) -> DockerResult<Self> {
        Ok(Self::new(candidates_for_current_host(config_host)?))
    }

    /// The ordered candidates.
    pub fn candidates(&self) -> &[DockerCandidate] {
        &self.candidates
    }

    /// Index of the candidate that will be tried next.
    pub fn position(&self) -> usize {
        self.index
    }

    /// Decide what to do after `candidate` failed with `message`.
    ///
    /// Returns `Ok(())` when the resolver may advance, or the error to surface.
    pub fn on_failure(&mut self, message: &str) -> DockerResult<()> {
        let Some(candidate) = self.candidates.get(self.index) else {
            return Err(DockerError::unreachable("no candidates", message));
        };
        let kind = FailureKind::classify(message);
        let is_last = self.index + 1 >= self.candidates.len();

        if kind == FailureKind::AccessDenied && (is_last || !candidate.source.may_skip()) {
            let socket = candidate
                .endpoint
                .socket_path()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| default_socket_for(&candidate.endpoint));
            return Err(DockerError::PermissionDenied {
                guidance: permission_guidance(&socket),
                socket,
            });
        }

        if candidate.source.may_skip() && kind.is_skippable() && !is_last {
            tracing::debug!(
                candidate = %candidate.description,
                error = %message,
                "docker candidate unavailable, trying next"
            );
            self.index += 1;
            return Ok(());
        }

        Err(DockerError::unreachable(&candidate.description, message))
    }

    /// Connect to the first candidate that answers a ping.
    pub async fn resolve(&mut self) -> DockerResult<ResolvedHost> {
        while let Some(candidate) = self.candidates.get(self.index).cloned() {
            let attempt = async {
                let docker = connect_endpoint(&candidate.endpoint)?;
                docker.ping().await?;
                Ok::<_, DockerError>(docker)
            };

            match attempt.await {
                Ok(docker) => {
                    tracing::info!(candidate = %candidate.description, "connected to docker daemon");
                    return Ok(ResolvedHost { docker, candidate });
                }
                Err(err) => {
                    let message = error_chain(&err);
                    self.on_failure(&message)?;
                }
            }
        }
        Err(DockerError::unreachable("no candidates", "candidate list exhausted"))
    }
}

fn default_socket_for(endpoint: &DockerEndpoint) -> String {
    match endpoint {
        DockerEndpoint::LocalDefaults if cfg!(windows) => "//./pipe/docker_engine".to_string(),
        DockerEndpoint::LocalDefaults => "/var/run/docker.sock".to_string(),
        other => other.to_string(),
    }
}

/// Build an Engine client for an endpoint. Connection is lazy; callers ping to verify.
pub fn connect_endpoint(endpoint: &DockerEndpoint) -> DockerResult<Docker> {
    let docker = match endpoint {
        #[cfg(unix)]
        DockerEndpoint::Unix(path) => {
            Docker::connect_with_unix(&path.to_string_lossy(), CLIENT_TIMEOUT_SECS, API_DEFAULT_VERSION)?
        }
        #[cfg(not(unix))]
        DockerEndpoint::Unix(path) => {
            return Err(DockerError::InvalidHost {
                host: path.display().to_string(),
                reason: "unix sockets are not available on this platform".to_string(),
            });
        }
        #[cfg(windows)]
        DockerEndpoint::NamedPipe(pipe) => {
            Docker::connect_with_named_pipe(pipe, CLIENT_TIMEOUT_SECS, API_DEFAULT_VERSION)?
        }
        #[cfg(not(windows))]
        DockerEndpoint::NamedPipe(pipe) => {
            return Err(DockerError::InvalidHost {
                host: pipe.clone(),
                reason: "named pipes are only available on Windows".to_string(),
            });
        }
        DockerEndpoint::Http(addr) => {
            Docker::connect_with_http(&format!("http://{addr}"), CLIENT_TIMEOUT_SECS, API_DEFAULT_VERSION)?
        }
        DockerEndpoint::LocalDefaults => Docker::connect_with_local_defaults()?,
    };
    Ok(docker)
}
