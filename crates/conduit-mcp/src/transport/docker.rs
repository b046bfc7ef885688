//! Servers running in Docker containers.
//!
//! Bring-up order matters: the run flags are translated before the daemon is
//! contacted, and the container is attached before it is started so no early
//! output is lost. Once a container exists, every failure path runs its
//! cleanup before the error is returned.

use std::time::Duration;

use conduit_docker::{
    CleanupHandle, ContainerManager, ContainerOutput, ContainerSpec, HostResolver, OutputStream,
};
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::HandshakeHook;
use super::stdio::{OutputWait, StdioChannel, Termination};
use crate::config::ServerConfig;
use crate::error::{McpError, Result};
use crate::handshake::HandshakeOutcome;
use crate::redact;

/// Longest wait for container output before each handshake attempt.
pub const OUTPUT_GRACE: Duration = Duration::from_secs(5);

/// How long the exit watcher waits for the output stream to drain.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// How long `shutdown` waits for the exit watcher after cleanup.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(15);

/// Build the container spec from a server configuration.
///
/// This only translates flags and never contacts the daemon.
pub fn container_spec(config: &ServerConfig) -> Result<ContainerSpec> {
    let image = config
        .image
        .as_deref()
        .ok_or_else(|| McpError::configuration(format!("server '{}': no image", config.name)))?;
    let spec = ContainerSpec::from_run_args(image, config.args.clone(), &config.container_args)?
        .with_name(config.container_name.clone())
        .with_reuse(config.reuse_container)
        .with_remove_on_exit(config.remove_on_exit);
    Ok(spec)
}

/// A running server container.
pub struct DockerTransport {
    channel: StdioChannel,
    cleanup: CleanupHandle,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for DockerTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DockerTransport")
            .field("container", &self.cleanup.id())
            .field("channel", &self.channel)
            .finish()
    }
}

impl DockerTransport {
    /// Bring up the container and run the handshake.
    pub async fn connect(
        config: &ServerConfig,
        on_handshake: HandshakeHook<'_>,
    ) -> Result<(Self, HandshakeOutcome)> {
        let spec = container_spec(config)?;

        let mut resolver = HostResolver::for_current_host(config.docker_host.as_deref())?;
        let resolved = resolver.resolve().await?;
        info!(
            server = %config.name,
            host = %resolved.candidate.description,
            source = resolved.candidate.source.label(),
            "Using Docker host"
        );

        let manager = ContainerManager::new(resolved.docker);
        manager.ensure_image(spec.image()).await?;
        let prepared = manager.prepare(&spec).await?;
        let cleanup = manager.cleanup_handle(&prepared.id, spec.remove_on_exit);
        info!(
            server = %config.name,
            container = %prepared.id,
            image = %spec.image(),
            reused = prepared.reused,
            "Container ready"
        );

        let attached = match manager.attach(&prepared.id).await {
            Ok(attached) => attached,
            Err(err) => {
                cleanup.run().await;
                return Err(err.into());
            }
        };

        let channel = StdioChannel::new(&config.name, attached.input, config.timeout());
        let pump = tokio::spawn(pump_output(attached.output, channel.clone()));

        if let Err(err) = manager.start(&prepared.id).await {
            pump.abort();
            cleanup.run().await;
            channel.terminate(Termination::new("container failed to start", None));
            return Err(err.into());
        }

        tokio::spawn(watch_exit(manager, cleanup.clone(), channel.clone()));

        let transport = Self {
            channel,
            cleanup,
            pump: Mutex::new(Some(pump)),
        };

        match transport.start_session(config, on_handshake).await {
            Ok(outcome) => Ok((transport, outcome)),
            Err(err) => {
                transport.shutdown().await;
                Err(err)
            }
        }
    }

    async fn start_session(
        &self,
        config: &ServerConfig,
        on_handshake: HandshakeHook<'_>,
    ) -> Result<HandshakeOutcome> {
        if config.startup_delay_ms > 0 {
            debug!(server = %config.name, delay_ms = config.startup_delay_ms, "Waiting before handshake");
            tokio::time::sleep(Duration::from_millis(config.startup_delay_ms)).await;
        }

        if let OutputWait::Terminated(termination) =
            self.channel.wait_for_output(0, OUTPUT_GRACE).await
        {
            return Err(McpError::startup(
                termination.reason,
                self.channel.recent_output(),
            ));
        }

        on_handshake();
        self.channel
            .handshake_with_retry(config.handshake_attempts(), OUTPUT_GRACE)
            .await
            .map_err(|err| {
                let message = match self.channel.termination() {
                    Some(termination) => termination.reason,
                    None => format!(
                        "handshake failed after {} attempt(s): {err}",
                        config.handshake_attempts()
                    ),
                };
                McpError::startup(message, self.channel.recent_output())
            })
    }

    /// The framed channel to the container.
    pub fn channel(&self) -> &StdioChannel {
        &self.channel
    }

    /// Container id.
    pub fn container_id(&self) -> &str {
        self.cleanup.id()
    }

    /// Stop and optionally remove the container, then wait for the exit watcher.
    pub async fn shutdown(&self) {
        self.channel.close_input().await;
        if self.cleanup.run().await {
            debug!(container = %self.cleanup.id(), "Container cleaned up");
        }
        if tokio::time::timeout(SHUTDOWN_TIMEOUT, self.channel.wait_terminated())
            .await
            .is_err()
        {
            warn!(container = %self.cleanup.id(), "Container did not report exit in time");
        }
        self.channel
            .terminate(Termination::new("disconnected", None));
        let pump = self.pump.lock().take();
        if let Some(pump) = pump {
            pump.abort();
        }
    }
}

async fn pump_output(mut output: OutputStream, channel: StdioChannel) {
    while let Some(item) = output.next().await {
        match item {
            Ok(ContainerOutput::Stdout(bytes)) => channel.on_stdout(&bytes).await,
            Ok(ContainerOutput::Stderr(bytes)) => channel.on_stderr(&bytes),
            Err(e) => {
                debug!(server = %channel.server(), error = %redact::error_text(&e.to_string()), "Container output stream failed");
                break;
            }
        }
    }
}

async fn watch_exit(manager: ContainerManager, cleanup: CleanupHandle, channel: StdioChannel) {
    let id = cleanup.id().to_string();
    let termination = match manager.wait(&id).await {
        Ok(code) => Termination::new(format!("container exited with code {code}"), Some(code)),
        Err(e) => Termination::new(format!("lost track of container: {e}"), None),
    };

    // let the attach stream deliver what the container printed last
    let mut since = channel.output_count();
    while let OutputWait::Output = channel.wait_for_output(since, DRAIN_TIMEOUT).await {
        since = channel.output_count();
    }

    if cleanup.run().await {
        debug!(container = %id, "Container cleaned up after exit");
    }
    info!(server = %channel.server(), container = %id, reason = %termination.reason, "Container exited");
    channel.terminate(termination);
}
