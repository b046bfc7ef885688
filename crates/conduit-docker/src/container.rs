//! Container lifecycle: image availability, create/reuse, attach, start, wait, cleanup.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bollard::Docker;
use bollard::container::{
    AttachContainerOptions, AttachContainerResults, Config, CreateContainerOptions,
    InspectContainerOptions, LogOutput, RemoveContainerOptions, StartContainerOptions,
    StopContainerOptions, WaitContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::models::{
    DeviceRequest, HostConfig, Mount, MountBindOptions, MountBindOptionsPropagationEnum,
    MountTmpfsOptions, MountTypeEnum, MountVolumeOptions,
};
use futures::{Stream, StreamExt};
use tokio::io::AsyncWrite;
use tracing::{debug, info, warn};

use crate::args::{ContainerCreateOptions, GpuRequest, MountKind, MountSpec, translate_args};
use crate::error::{DockerError, DockerResult};
use crate::signature::{MANAGED_LABEL, SIGNATURE_LABEL, compute_signature};

/// Seconds the daemon waits before killing a container on stop.
const STOP_TIMEOUT_SECS: i64 = 5;

/// Desired container, fully resolved before any daemon contact.
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    /// Configured container name, if any.
    pub name: Option<String>,
    /// Reuse a matching managed container instead of recreating it.
    pub reuse: bool,
    /// Remove the container during cleanup.
    pub remove_on_exit: bool,
    /// Translated create options, image and command included.
    pub options: ContainerCreateOptions,
}

impl ContainerSpec {
    /// Translate `docker run` flags and assemble a spec.
    ///
    /// Fails with [`DockerError::UnsupportedArgs`] listing every flag that
    /// could not be translated.
    pub fn from_run_args(
        image: impl Into<String>,
        cmd: Vec<String>,
        run_args: &[String],
    ) -> DockerResult<Self> {
        let mut options = translate_args(run_args).into_result()?;
        options.image = image.into();
        options.cmd = cmd;
        Ok(Self {
            name: None,
            reuse: true,
            remove_on_exit: options.remove_on_exit,
            options,
        })
    }

    /// Set the container name.
    pub fn with_name(mut self, name: Option<String>) -> Self {
        self.name = name.filter(|n| !n.trim().is_empty());
        self
    }

    /// Enable or disable reuse.
    pub fn with_reuse(mut self, reuse: bool) -> Self {
        self.reuse = reuse;
        self
    }

    /// Request removal on exit. `--rm` in the run flags already implies it.
    pub fn with_remove_on_exit(mut self, remove: bool) -> Self {
        self.remove_on_exit = remove || self.options.remove_on_exit;
        self
    }

    /// Image reference.
    pub fn image(&self) -> &str {
        &self.options.image
    }

    /// Options signature.
    pub fn signature(&self) -> DockerResult<String> {
        compute_signature(&self.options)
    }
}

/// What the daemon reported about a container with the configured name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExistingContainer {
    /// Container id.
    pub id: String,
    /// Whether it is running.
    pub running: bool,
    /// Its labels.
    pub labels: HashMap<String, String>,
}

impl ExistingContainer {
    /// Whether this crate created the container.
    pub fn is_managed(&self) -> bool {
        self.labels.get(MANAGED_LABEL).map(String::as_str) == Some("true")
    }

    /// Stored options signature, if any.
    pub fn signature(&self) -> Option<&str> {
        self.labels.get(SIGNATURE_LABEL).map(String::as_str)
    }
}

/// Outcome of comparing the desired spec with what already exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReuseDecision {
    /// Nothing to reuse, create a fresh container.
    Create,
    /// Reuse this container, stopping it first if it is running.
    Reuse { id: String, running: bool },
    /// Remove this managed container, then create.
    Recreate { id: String },
    /// The name is taken by a container this crate does not manage.
    Conflict,
}

impl ReuseDecision {
    /// Decide how to obtain a container.
    pub fn decide(existing: Option<&ExistingContainer>, signature: &str, reuse: bool) -> Self {
        let Some(existing) = existing else {
            return Self::Create;
        };
        if !existing.is_managed() {
            return Self::Conflict;
        }
        if reuse && existing.signature() == Some(signature) {
            Self::Reuse {
                id: existing.id.clone(),
                running: existing.running,
            }
        } else {
            Self::Recreate {
                id: existing.id.clone(),
            }
        }
    }
}

/// A container ready to be attached and started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedContainer {
    /// Container id.
    pub id: String,
    /// Whether an existing container was reused.
    pub reused: bool,
}

/// One chunk read from an attached container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerOutput {
    /// Standard output (or the console when a TTY is allocated).
    Stdout(Vec<u8>),
    /// Standard error.
    Stderr(Vec<u8>),
}

/// Output stream of an attached container.
pub type OutputStream = Pin<Box<dyn Stream<Item = DockerResult<ContainerOutput>> + Send>>;

/// Attached stdio of a container.
pub struct AttachedContainer {
    /// Multiplexed stdout/stderr.
    pub output: OutputStream,
    /// Container stdin.
    pub input: Pin<Box<dyn AsyncWrite + Send>>,
}

impl std::fmt::Debug for AttachedContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttachedContainer").finish_non_exhaustive()
    }
}

/// Drives container operations against one resolved daemon.
#[derive(Debug, Clone)]
pub struct ContainerManager {
    docker: Docker,
}

impl ContainerManager {
    /// Create a manager for a connected daemon.
    pub fn new(docker: Docker) -> Self {
        Self { docker }
    }

    /// Make sure the image is present locally, pulling it when missing.
    pub async fn ensure_image(&self, image: &str) -> DockerResult<()> {
        match self.docker.inspect_image(image).await {
            Ok(_) => {
                debug!(image = %image, "Image present locally");
                Ok(())
            }
            Err(err) if is_not_found(&err) => self.pull_image(image).await,
            Err(err) => Err(DockerError::image(image, err.to_string())),
        }
    }

    async fn pull_image(&self, image: &str) -> DockerResult<()> {
        info!(image = %image, "Pulling image");
        let (from_image, tag) = split_image_reference(image);
        let options = CreateImageOptions {
            from_image: from_image.to_string(),
            tag: tag.to_string(),
            ..Default::default()
        };

        let mut progress = self.docker.create_image(Some(options), None, None);
        while let Some(item) = progress.next().await {
            let info = item.map_err(|e| DockerError::image(image, e.to_string()))?;
            if let Some(error) = info.error {
                return Err(DockerError::image(image, error));
            }
            if let Some(status) = info.status {
                debug!(
                    image = %image,
                    status = %status,
                    progress = info.progress.as_deref().unwrap_or(""),
                    "Pull progress"
                );
            }
        }
        info!(image = %image, "Image pulled");
        Ok(())
    }

    /// Look up a container by name or id.
    pub async fn inspect_existing(&self, name: &str) -> DockerResult<Option<ExistingContainer>> {
        match self
            .docker
            .inspect_container(name, None::<InspectContainerOptions>)
            .await
        {
            Ok(details) => Ok(Some(ExistingContainer {
                id: details.id.unwrap_or_else(|| name.to_string()),
                running: details.state.and_then(|s| s.running).unwrap_or(false),
                labels: details.config.and_then(|c| c.labels).unwrap_or_default(),
            })),
            Err(err) if is_not_found(&err) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// Create or reuse the container described by `spec`.
    pub async fn prepare(&self, spec: &ContainerSpec) -> DockerResult<PreparedContainer> {
        let signature = spec.signature()?;

        let Some(name) = spec.name.as_deref() else {
            let id = self.create(spec, &signature).await?;
            return Ok(PreparedContainer { id, reused: false });
        };

        let existing = self.inspect_existing(name).await?;
        match ReuseDecision::decide(existing.as_ref(), &signature, spec.reuse) {
            ReuseDecision::Create => {
                let id = self.create(spec, &signature).await?;
                Ok(PreparedContainer { id, reused: false })
            }
            ReuseDecision::Reuse { id, running } => {
                info!(container = %name, "Reusing managed container");
                if running {
                    self.stop(&id).await?;
                }
                Ok(PreparedContainer { id, reused: true })
            }
            ReuseDecision::Recreate { id } => {
                info!(container = %name, "Recreating managed container");
                self.remove(&id).await?;
                let id = self.create(spec, &signature).await?;
                Ok(PreparedContainer { id, reused: false })
            }
            ReuseDecision::Conflict => Err(DockerError::NameConflict {
                name: name.to_string(),
            }),
        }
    }

    async fn create(&self, spec: &ContainerSpec, signature: &str) -> DockerResult<String> {
        let options = spec.name.as_ref().map(|name| CreateContainerOptions {
            name: name.clone(),
            platform: None,
        });
        let response = self
            .docker
            .create_container(options, to_create_config(&spec.options, signature))
            .await?;
        for warning in &response.warnings {
            warn!(container = %response.id, warning = %warning, "Docker create warning");
        }
        debug!(container = %response.id, image = %spec.image(), "Container created");
        Ok(response.id)
    }

    /// Attach to stdin, stdout and stderr. Call before [`start`](Self::start)
    /// so no early output is lost.
    pub async fn attach(&self, id: &str) -> DockerResult<AttachedContainer> {
        let AttachContainerResults { output, input } = self
            .docker
            .attach_container(
                id,
                Some(AttachContainerOptions::<String> {
                    stdin: Some(true),
                    stdout: Some(true),
                    stderr: Some(true),
                    stream: Some(true),
                    logs: Some(false),
                    detach_keys: None,
                }),
            )
            .await?;

        let output = output.filter_map(|item| async move {
            match item {
                Ok(LogOutput::StdOut { message }) | Ok(LogOutput::Console { message }) => {
                    Some(Ok(ContainerOutput::Stdout(message.to_vec())))
                }
                Ok(LogOutput::StdErr { message }) => {
                    Some(Ok(ContainerOutput::Stderr(message.to_vec())))
                }
                Ok(LogOutput::StdIn { .. }) => None,
                Err(err) => Some(Err(DockerError::from(err))),
            }
        });

        Ok(AttachedContainer {
            output: Box::pin(output),
            input,
        })
    }

    /// Start the container.
    pub async fn start(&self, id: &str) -> DockerResult<()> {
        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await?;
        debug!(container = %id, "Container started");
        Ok(())
    }

    /// Wait for the container to exit and return its exit code.
    pub async fn wait(&self, id: &str) -> DockerResult<i64> {
        let mut stream = self
            .docker
            .wait_container(id, None::<WaitContainerOptions<String>>);
        match stream.next().await {
            Some(Ok(response)) => Ok(response.status_code),
            Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. })) => Ok(code),
            Some(Err(err)) => Err(err.into()),
            None => Ok(0),
        }
    }

    /// Stop the container. Already stopped or missing containers are not an error.
    pub async fn stop(&self, id: &str) -> DockerResult<()> {
        match self
            .docker
            .stop_container(id, Some(StopContainerOptions { t: STOP_TIMEOUT_SECS }))
            .await
        {
            Ok(()) => Ok(()),
            Err(err) if matches!(status_of(&err), Some(304) | Some(404)) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// Force-remove the container. Missing containers are not an error.
    pub async fn remove(&self, id: &str) -> DockerResult<()> {
        match self
            .docker
            .remove_container(
                id,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await
        {
            Ok(()) => Ok(()),
            Err(err) if is_not_found(&err) => Ok(()),
            // removal already in progress
            Err(err) if status_of(&err) == Some(409) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// Cleanup handle for a container.
    pub fn cleanup_handle(&self, id: impl Into<String>, remove: bool) -> CleanupHandle {
        CleanupHandle {
            manager: self.clone(),
            id: id.into(),
            remove,
            done: Arc::new(AtomicBool::new(false)),
        }
    }
}

/// Stops and optionally removes a container exactly once, however many
/// clones of the handle ask for it.
#[derive(Debug, Clone)]
pub struct CleanupHandle {
    manager: ContainerManager,
    id: String,
    remove: bool,
    done: Arc<AtomicBool>,
}

impl CleanupHandle {
    /// Container id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Whether cleanup has already been claimed.
    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::SeqCst)
    }

    /// Claim the cleanup. Returns `true` for exactly one caller.
    pub fn claim(&self) -> bool {
        self.done
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Stop and, if configured, remove the container. Only the first call does work.
    pub async fn run(&self) -> bool {
        if !self.claim() {
            return false;
        }
        if let Err(e) = self.manager.stop(&self.id).await {
            warn!(container = %self.id, error = %e, "Failed to stop container");
        }
        if self.remove {
            if let Err(e) = self.manager.remove(&self.id).await {
                warn!(container = %self.id, error = %e, "Failed to remove container");
            } else {
                debug!(container = %self.id, "Container removed");
            }
        }
        true
    }
}

fn status_of(err: &bollard::errors::Error) -> Option<u16> {
    match err {
        bollard::errors::Error::DockerResponseServerError { status_code, .. } => {
            Some(*status_code)
        }
        _ => None,
    }
}

fn is_not_found(err: &bollard::errors::Error) -> bool {
    status_of(err) == Some(404) || err.to_string().to_lowercase().contains("no such")
}

/// Split an image reference into the repository and the tag to pull.
///
/// Untagged references pull `latest`; digest references are passed whole.
pub fn split_image_reference(image: &str) -> (&str, &str) {
    if image.contains('@') {
        return (image, "");
    }
    let name_start = image.rfind('/').map(|i| i + 1).unwrap_or(0);
    match image[name_start..].rfind(':') {
        Some(i) => (&image[..name_start + i], &image[name_start + i + 1..]),
        None => (image, "latest"),
    }
}

/// Build the Engine API create body, attaching the ownership labels.
pub fn to_create_config(options: &ContainerCreateOptions, signature: &str) -> Config<String> {
    let mut labels: HashMap<String, String> = options
        .labels
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    labels.insert(MANAGED_LABEL.to_string(), "true".to_string());
    labels.insert(SIGNATURE_LABEL.to_string(), signature.to_string());

    Config {
        image: Some(options.image.clone()),
        cmd: (!options.cmd.is_empty()).then(|| options.cmd.clone()),
        entrypoint: options.entrypoint.clone(),
        env: (!options.env.is_empty()).then(|| options.env.clone()),
        user: options.user.clone(),
        working_dir: options.working_dir.clone(),
        labels: Some(labels),
        attach_stdin: Some(true),
        attach_stdout: Some(true),
        attach_stderr: Some(true),
        // the MCP channel runs over stdin whether or not -i was given
        open_stdin: Some(true),
        stdin_once: Some(false),
        tty: Some(options.tty),
        host_config: Some(to_host_config(options)),
        ..Default::default()
    }
}

fn to_host_config(options: &ContainerCreateOptions) -> HostConfig {
    let host = &options.host;
    let non_empty = |v: &Vec<String>| (!v.is_empty()).then(|| v.clone());

    HostConfig {
        binds: non_empty(&host.binds),
        mounts: (!host.mounts.is_empty()).then(|| host.mounts.iter().map(to_mount).collect()),
        tmpfs: (!host.tmpfs.is_empty())
            .then(|| host.tmpfs.iter().map(|(k, v)| (k.clone(), v.clone())).collect()),
        network_mode: host.network_mode.clone(),
        privileged: host.privileged.then_some(true),
        shm_size: host.shm_size,
        extra_hosts: non_empty(&host.extra_hosts),
        security_opt: non_empty(&host.security_opt),
        sysctls: (!host.sysctls.is_empty())
            .then(|| host.sysctls.iter().map(|(k, v)| (k.clone(), v.clone())).collect()),
        cap_add: non_empty(&host.cap_add),
        cap_drop: non_empty(&host.cap_drop),
        ipc_mode: host.ipc_mode.clone(),
        pid_mode: host.pid_mode.clone(),
        device_requests: host.gpus.as_ref().map(|gpus| vec![to_device_request(gpus)]),
        ..Default::default()
    }
}

fn to_mount(spec: &MountSpec) -> Mount {
    let typ = match spec.kind {
        MountKind::Bind => MountTypeEnum::BIND,
        MountKind::Volume => MountTypeEnum::VOLUME,
        MountKind::Tmpfs => MountTypeEnum::TMPFS,
    };

    Mount {
        target: Some(spec.target.clone()),
        source: spec.source.clone(),
        typ: Some(typ),
        read_only: spec.read_only.then_some(true),
        consistency: spec.consistency.clone(),
        bind_options: spec
            .bind_propagation
            .as_deref()
            .map(|p| MountBindOptions {
                propagation: Some(propagation_mode(p)),
                ..Default::default()
            }),
        volume_options: spec.volume_nocopy.then(|| MountVolumeOptions {
            no_copy: Some(true),
            ..Default::default()
        }),
        tmpfs_options: (spec.tmpfs_size.is_some() || spec.tmpfs_mode.is_some()).then(|| {
            MountTmpfsOptions {
                size_bytes: spec.tmpfs_size,
                mode: spec.tmpfs_mode,
                ..Default::default()
            }
        }),
        ..Default::default()
    }
}

fn propagation_mode(mode: &str) -> MountBindOptionsPropagationEnum {
    match mode {
        "private" => MountBindOptionsPropagationEnum::PRIVATE,
        "rprivate" => MountBindOptionsPropagationEnum::RPRIVATE,
        "shared" => MountBindOptionsPropagationEnum::SHARED,
        "rshared" => MountBindOptionsPropagationEnum::RSHARED,
        "slave" => MountBindOptionsPropagationEnum::SLAVE,
        "rslave" => MountBindOptionsPropagationEnum::RSLAVE,
        _ => MountBindOptionsPropagationEnum::EMPTY,
    }
}

fn to_device_request(gpus: &GpuRequest) -> DeviceRequest {
    let (count, device_ids) = match gpus {
        GpuRequest::All => (Some(-1), None),
        GpuRequest::Count(n) => (Some(*n), None),
        GpuRequest::Devices(ids) => (None, Some(ids.clone())),
    };
    DeviceRequest {
        driver: Some(String::new()),
        count,
        device_ids,
        capabilities: Some(vec![vec!["gpu".to_string()]]),
        ..Default::default()
    }
}
