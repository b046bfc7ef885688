//! Spawned server processes (`uvx` and `npx` packages).

use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::HandshakeHook;
use super::stdio::{OutputWait, StdioChannel, Termination};
use crate::config::{ServerConfig, TransportKind};
use crate::error::{McpError, Result};
use crate::handshake::HandshakeOutcome;
use crate::redact;

/// How long to wait for the first output before handshaking anyway.
pub const READY_GRACE: Duration = Duration::from_secs(5);

/// How long the exit watcher waits for the output pipes to drain.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// How long `shutdown` waits for the process to exit after killing it.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

const READ_CHUNK: usize = 8 * 1024;

/// Override for the `uvx` binary.
pub const UVX_PATH_ENV: &str = "CONDUIT_UVX_PATH";

/// Override for the `npx` binary.
pub const NPX_PATH_ENV: &str = "CONDUIT_NPX_PATH";

/// Resolve the program to spawn for `command`.
///
/// The bare launcher name of the transport's ecosystem maps to the concrete
/// binary. Anything else is spawned as given.
pub fn resolve_launcher(kind: TransportKind, command: &str) -> String {
    let (launcher, env_var) = match kind {
        TransportKind::Uvx => ("uvx", UVX_PATH_ENV),
        TransportKind::Npx => ("npx", NPX_PATH_ENV),
        _ => return command.to_string(),
    };
    if command != launcher {
        return command.to_string();
    }
    launcher_path(launcher, std::env::var(env_var).ok(), cfg!(windows))
}

fn launcher_path(launcher: &str, override_path: Option<String>, windows: bool) -> String {
    match override_path.filter(|p| !p.trim().is_empty()) {
        Some(path) => path,
        // npm ships a batch shim on Windows
        None if windows && launcher == "npx" => "npx.cmd".to_string(),
        None => launcher.to_string(),
    }
}

/// A running server process.
pub struct ProcessTransport {
    channel: StdioChannel,
    kill: Mutex<Option<oneshot::Sender<()>>>,
    pid: Option<u32>,
}

impl std::fmt::Debug for ProcessTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessTransport")
            .field("pid", &self.pid)
            .field("channel", &self.channel)
            .finish()
    }
}

impl ProcessTransport {
    /// Spawn the server, wait for it to come up and run the handshake.
    pub async fn connect(
        config: &ServerConfig,
        on_handshake: HandshakeHook<'_>,
    ) -> Result<(Self, HandshakeOutcome)> {
        let transport = Self::spawn(config)?;

        match transport.channel.wait_for_output(0, READY_GRACE).await {
            OutputWait::Output => {}
            OutputWait::GraceElapsed => {
                info!(server = %config.name, grace = ?READY_GRACE, "No output from server yet, starting handshake");
            }
            OutputWait::Terminated(termination) => {
                return Err(transport.exited(&termination));
            }
        }

        on_handshake();
        match transport
            .channel
            .handshake_with_retry(config.handshake_attempts(), READY_GRACE)
            .await
        {
            Ok(outcome) => Ok((transport, outcome)),
            Err(err) => {
                let err = match transport.channel.termination() {
                    Some(termination) => transport.exited(&termination),
                    None => err,
                };
                transport.shutdown().await;
                Err(err)
            }
        }
    }

    /// Spawn the process and start the I/O tasks.
    pub fn spawn(config: &ServerConfig) -> Result<Self> {
        let command = config
            .command
            .as_deref()
            .ok_or_else(|| McpError::configuration(format!("server '{}': no command", config.name)))?;
        let program = resolve_launcher(config.transport, command);

        info!(
            server = %config.name,
            transport = %config.transport,
            command = %redact::command_line(&program, &config.args),
            "Spawning MCP server"
        );

        let mut child = Command::new(&program)
            .args(&config.args)
            .envs(&config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| McpError::spawn_failed(format!("failed to spawn '{program}': {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| McpError::spawn_failed("failed to capture stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| McpError::spawn_failed("failed to capture stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| McpError::spawn_failed("failed to capture stderr"))?;

        let pid = child.id();
        debug!(server = %config.name, pid = ?pid, "Server process started");

        let channel = StdioChannel::new(&config.name, Box::pin(stdin), config.timeout());
        let pumps = [
            tokio::spawn(pump(stdout, channel.clone(), Stream::Stdout)),
            tokio::spawn(pump(stderr, channel.clone(), Stream::Stderr)),
        ];

        let (kill_tx, kill_rx) = oneshot::channel();
        tokio::spawn(watch_exit(child, kill_rx, pumps, channel.clone()));

        Ok(Self {
            channel,
            kill: Mutex::new(Some(kill_tx)),
            pid,
        })
    }

    /// The framed channel to the process.
    pub fn channel(&self) -> &StdioChannel {
        &self.channel
    }

    /// OS process id.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Close stdin, kill the process and wait briefly for it to exit.
    pub async fn shutdown(&self) {
        self.channel.close_input().await;
        let kill = self.kill.lock().take();
        if let Some(kill) = kill {
            let _ = kill.send(());
        }
        if tokio::time::timeout(SHUTDOWN_TIMEOUT, self.channel.wait_terminated())
            .await
            .is_err()
        {
            warn!(server = %self.channel.server(), "Server process did not exit in time");
            self.channel
                .terminate(Termination::new("disconnected", None));
        }
    }

    fn exited(&self, termination: &Termination) -> McpError {
        McpError::ProcessExited {
            code: termination.exit_code.and_then(|c| i32::try_from(c).ok()),
            stderr: self.channel.recent_output(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Stream {
    Stdout,
    Stderr,
}

async fn pump<R>(mut reader: R, channel: StdioChannel, stream: Stream)
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => match stream {
                Stream::Stdout => channel.on_stdout(&buf[..n]).await,
                Stream::Stderr => channel.on_stderr(&buf[..n]),
            },
            Err(e) => {
                debug!(server = %channel.server(), ?stream, error = %e, "Read failed");
                break;
            }
        }
    }
}

async fn watch_exit(
    mut child: Child,
    kill: oneshot::Receiver<()>,
    pumps: [JoinHandle<()>; 2],
    channel: StdioChannel,
) {
    let status = tokio::select! {
        status = child.wait() => status,
        _ = kill => {
            if let Err(e) = child.start_kill() {
                debug!(server = %channel.server(), error = %e, "Kill failed");
            }
            child.wait().await
        }
    };

    // output written just before exit is still in the pipes
    let drained = tokio::time::timeout(DRAIN_TIMEOUT, async {
        for pump in pumps {
            let _ = pump.await;
        }
    })
    .await;
    if drained.is_err() {
        debug!(server = %channel.server(), "Output pipes still open after exit");
    }

    let termination = match status {
        Ok(status) => Termination::new(describe_exit(status), status.code().map(i64::from)),
        Err(e) => Termination::new(format!("failed to wait for server process: {e}"), None),
    };
    info!(server = %channel.server(), reason = %termination.reason, "Server process exited");
    channel.terminate(termination);
}

fn describe_exit(status: ExitStatus) -> String {
    match status.code() {
        Some(code) => format!("server process exited with code {code}"),
        None => "server process was terminated by a signal".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_launcher_resolution() {
        assert_eq!(launcher_path("uvx", None, false), "uvx");
        assert_eq!(launcher_path("npx", None, false), "npx");
        assert_eq!(launcher_path("npx", None, true), "npx.cmd");
        assert_eq!(launcher_path("uvx", None, true), "uvx");
        assert_eq!(
            launcher_path("npx", Some("/opt/node/bin/npx".into()), true),
            "/opt/node/bin/npx"
        );
        assert_eq!(launcher_path("uvx", Some("  ".into()), false), "uvx");
    }

    #[test]
    fn test_non_launcher_commands_pass_through() {
        assert_eq!(
            resolve_launcher(TransportKind::Uvx, "/usr/local/bin/my-server"),
            "/usr/local/bin/my-server"
        );
        assert_eq!(resolve_launcher(TransportKind::Npx, "node"), "node");
        assert_eq!(resolve_launcher(TransportKind::Docker, "uvx"), "uvx");
    }

    #[tokio::test]
    async fn test_spawn_missing_binary() {
        let config = ServerConfig::new("missing", TransportKind::Uvx)
            .with_command("conduit-nonexistent-server-12345");
        let err = ProcessTransport::spawn(&config).unwrap_err();
        assert!(matches!(err, McpError::SpawnFailed(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_exit_before_ready() {
        let config = ServerConfig::new("failing", TransportKind::Uvx)
            .with_command("sh")
            .with_args(vec!["-c".into(), "echo boom >&2; exit 3".into()]);
        // output arrives first, then the handshake observes the exit
        let err = ProcessTransport::connect(&config, &|| {}).await.unwrap_err();
        match err {
            McpError::ProcessExited { code, stderr } => {
                assert_eq!(code, Some(3));
                assert!(stderr.contains("boom"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_shutdown_kills_process() {
        let config = ServerConfig::new("sleeper", TransportKind::Uvx)
            .with_command("sleep")
            .with_arg("30");
        let transport = ProcessTransport::spawn(&config).unwrap();
        transport.shutdown().await;
        assert!(transport.channel().is_terminated());
    }
}
