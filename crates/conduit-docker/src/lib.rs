//! Docker support for running MCP servers in containers.
//!
//! This crate turns a `docker run` style configuration into a running
//! container whose stdio can carry an MCP session:
//!
//! - [`host`] finds a reachable Docker daemon, trying configured, environment
//!   and well-known socket locations in order
//! - [`args`] translates `docker run` flags into create options, rejecting
//!   anything it cannot express
//! - [`signature`] fingerprints those options so a matching container can be reused
//! - [`container`] creates or reuses the container, attaches, starts and cleans up
//!
//! # Example
//!
//! ```no_run
//! use conduit_docker::{ContainerManager, ContainerSpec, HostResolver};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let spec = ContainerSpec::from_run_args("mcp/fetch", vec![], &["--rm".to_string()])?;
//!
//!     let resolved = HostResolver::for_current_host(None)?.resolve().await?;
//!     let manager = ContainerManager::new(resolved.docker);
//!
//!     manager.ensure_image(spec.image()).await?;
//!     let container = manager.prepare(&spec).await?;
//!     let _attached = manager.attach(&container.id).await?;
//!     manager.start(&container.id).await?;
//!
//!     manager.cleanup_handle(&container.id, spec.remove_on_exit).run().await;
//!     Ok(())
//! }
//! ```

pub mod args;
pub mod container;
mod error;
pub mod host;
pub mod signature;

pub use args::{
    ContainerCreateOptions, GpuRequest, HostOptions, MountKind, MountSpec, TranslatedArgs,
    translate_args,
};
pub use container::{
    AttachedContainer, CleanupHandle, ContainerManager, ContainerOutput, ContainerSpec,
    ExistingContainer, OutputStream, PreparedContainer, ReuseDecision,
};
pub use error::{DockerError, DockerResult};
pub use host::{
    CandidateSource, DockerCandidate, DockerEndpoint, FailureKind, HostResolver, Platform,
    ResolvedHost,
};
pub use signature::{MANAGED_LABEL, SIGNATURE_LABEL, compute_signature};
