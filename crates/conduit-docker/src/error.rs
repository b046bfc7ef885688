//! Error types for Docker operations.

use thiserror::Error;

/// Errors that can occur while resolving a Docker host or managing a container.
#[derive(Debug, Error)]
pub enum DockerError {
    /// One or more `docker run` flags could not be translated.
    #[error("unsupported docker arguments: {}", .0.join(", "))]
    UnsupportedArgs(Vec<String>),

    /// A configured Docker host string could not be parsed.
    #[error("invalid docker host '{host}': {reason}")]
    InvalidHost { host: String, reason: String },

    /// No Docker daemon answered at the given endpoint.
    #[error("docker daemon unreachable via {candidate}: {message}")]
    Unreachable { candidate: String, message: String },

    /// The Docker socket exists but the current user may not open it.
    #[error("permission denied accessing docker socket {socket}\n\n{guidance}")]
    PermissionDenied { socket: String, guidance: String },

    /// The image could not be inspected or pulled.
    #[error("image '{image}' unavailable: {message}")]
    Image { image: String, message: String },

    /// The configured container name belongs to a container this crate did not create.
    #[error("container name '{name}' is in use by a container not managed by conduit")]
    NameConflict { name: String },

    /// Docker Engine API error.
    #[error("docker API error: {0}")]
    Api(#[from] bollard::errors::Error),

    /// JSON error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DockerError {
    /// Create an unreachable-daemon error.
    pub fn unreachable(candidate: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Unreachable {
            candidate: candidate.into(),
            message: message.into(),
        }
    }

    /// Create an image error.
    pub fn image(image: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Image {
            image: image.into(),
            message: message.into(),
        }
    }

    /// HTTP status code reported by the daemon, if this is an API response error.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Api(bollard::errors::Error::DockerResponseServerError { status_code, .. }) => {
                Some(*status_code)
            }
            _ => None,
        }
    }
}

/// Result type for Docker operations.
pub type DockerResult<T> = std::result::Result<T, DockerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_args_lists_every_flag() {
        let err = DockerError::UnsupportedArgs(vec!["--foo=bar".into(), "--detach".into()]);
        let msg = err.to_string();
        assert!(msg.contains("--foo=bar"));
        assert!(msg.contains("--detach"));
    }

    #[test]
    fn test_permission_denied_display() {
        let err = DockerError::PermissionDenied {
            socket: "/var/run/docker.sock".into(),
            guidance: "add yourself to the docker group".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("/var/run/docker.sock"));
        assert!(msg.contains("docker group"));
    }

    #[test]
    fn test_status_code() {
        let err = DockerError::Api(bollard::errors::Error::DockerResponseServerError {
            status_code: 404,
            message: "No such image".into(),
        });
        assert_eq!(err.status_code(), Some(404));
        assert_eq!(DockerError::unreachable("x", "y").status_code(), None);
    }
}
