//! Running a nats-server subprocess.
//!
//! `start` spawns the broker and waits until one of three things happens: the
//! readiness marker shows up on its stderr, the process exits, or spawning it
//! fails. The first of the two asynchronous events (marker, exit) wins, every
//! later one is ignored. `stop` sends a termination signal and waits for the
//! process to exit.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr};
use tokio::sync::oneshot;

use crate::{Error, Logger, Result, TracingLogger};

/// Printed by nats-server on stderr once it accepts connections.
pub const READY_MARKER: &str = "Server is ready";

/// Exit codes that count as a successful start when the broker exits before
/// printing [`READY_MARKER`].
pub const ACCEPTED_EXIT_CODES: &[i32] = &[0];

pub const DEFAULT_IP: &str = "0.0.0.0";

#[derive(Clone)]
pub struct NatsServerOptions {
    /// Forward broker output and lifecycle messages to `logger`.
    pub verbose: bool,
    /// Extra arguments appended after `--addr <ip> --port <port>`.
    pub args: Vec<String>,
    pub ip: String,
    /// `None` picks a free port on start.
    pub port: Option<u16>,
    pub logger: Arc<dyn Logger>,
}

impl Default for NatsServerOptions {
    fn default() -> Self {
        Self {
            verbose: true,
            args: Vec::new(),
            ip: DEFAULT_IP.to_string(),
            port: None,
            logger: Arc::new(TracingLogger),
        }
    }
}

impl std::fmt::Debug for NatsServerOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NatsServerOptions")
            .field("verbose", &self.verbose)
            .field("args", &self.args)
            .field("ip", &self.ip)
            .field("port", &self.port)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    NotStarted,
    Starting,
    Ready,
    Stopping,
    Stopped,
}

/// Outcome of the start race.
#[derive(Debug)]
enum Startup {
    Ready,
    Exited(Option<i32>),
}

/// Resolves the pending `start` at most once, whoever gets there first.
struct StartSignal(Mutex<Option<oneshot::Sender<Startup>>>);

impl StartSignal {
    fn new() -> (Arc<Self>, oneshot::Receiver<Startup>) {
        let (tx, rx) = oneshot::channel();
        (Arc::new(Self(Mutex::new(Some(tx)))), rx)
    }

    /// Returns false if the start was already resolved.
    fn complete(&self, outcome: Startup) -> bool {
        let sender = self
            .0
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        match sender {
            Some(tx) => {
                let _ = tx.send(outcome);
                true
            }
            None => false,
        }
    }
}

/// The live subprocess, owned by a supervisor task.
struct ServerProcess {
    stop_tx: Option<oneshot::Sender<()>>,
    supervisor: tokio::task::JoinHandle<std::io::Result<ExitStatus>>,
}

/// A nats-server subprocess bound to `ip:port`.
///
/// Dropping a running server terminates the broker.
pub struct NatsServer {
    options: NatsServerOptions,
    bin_path: PathBuf,
    state: ServerState,
    address: Option<(String, u16)>,
    process: Option<ServerProcess>,
}

impl NatsServer {
    pub fn new(options: NatsServerOptions, bin_path: impl Into<PathBuf>) -> Self {
        Self {
            options,
            bin_path: bin_path.into(),
            state: ServerState::NotStarted,
            address: None,
            process: None,
        }
    }

    pub fn options(&self) -> &NatsServerOptions {
        &self.options
    }

    pub fn bin_path(&self) -> &Path {
        &self.bin_path
    }

    pub fn state(&self) -> ServerState {
        self.state
    }

    /// `nats://host:port`, once started.
    pub fn url(&self) -> Option<String> {
        self.address
            .as_ref()
            .map(|(host, port)| format!("nats://{host}:{port}"))
    }

    pub fn host(&self) -> Option<&str> {
        self.address.as_ref().map(|(host, _)| host.as_str())
    }

    pub fn port(&self) -> Option<u16> {
        self.address.as_ref().map(|(_, port)| *port)
    }

    /// Spawn the broker and wait until it is ready.
    ///
    /// Fails with `AlreadyStarted` while a previous process is still owned by
    /// this instance.
    pub async fn start(&mut self) -> Result<()> {
        let verbose = self.options.verbose;
        let logger = self.options.logger.clone();

        if self.process.is_some() {
            let url = self.url().unwrap_or_default();
            if verbose {
                logger.warn(&format!("Nats server already started at {url}"));
            }
            return Err(Error::AlreadyStarted { url });
        }

        let ip = self.options.ip.clone();
        let port = match self.options.port {
            Some(port) => port,
            None => crate::free_port().await?,
        };

        let args = launch_args(&ip, port, &self.options.args);
        tracing::info!(bin = %self.bin_path.display(), ?args, "starting nats-server");
        if verbose {
            logger.log(&format!(
                "Starting NATS server: {} {}",
                self.bin_path.display(),
                args.join(" ")
            ));
        }

        self.state = ServerState::Starting;
        let mut child = match tokio::process::Command::new(&self.bin_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(source) => {
                self.state = ServerState::NotStarted;
                tracing::error!(bin = %self.bin_path.display(), "failed to spawn nats-server: {source}");
                if verbose {
                    logger.error(&format!("NATS server error: {source}"));
                }
                return Err(Error::SpawnFailed {
                    bin_path: self.bin_path.clone(),
                    source,
                });
            }
        };

        let (signal, started) = StartSignal::new();
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(watch_diagnostics(stderr, signal.clone(), verbose, logger.clone()));
        }

        let (stop_tx, stop_rx) = oneshot::channel();
        let supervisor = tokio::spawn(supervise(child, stop_rx, signal));

        self.process = Some(ServerProcess {
            stop_tx: Some(stop_tx),
            supervisor,
        });

        let outcome = started.await.unwrap_or(Startup::Exited(None));
        if let Startup::Exited(_) = outcome {
            // the supervisor has finished, nothing is left to stop
            if let Some(process) = self.process.take() {
                let _ = process.supervisor.await;
            }
        }

        match outcome {
            Startup::Ready => {
                self.address = Some((ip, port));
                self.state = ServerState::Ready;
                tracing::info!(port, "nats-server is ready");
                if verbose {
                    logger.log("NATS server is ready!");
                }
                Ok(())
            }
            Startup::Exited(Some(code)) if ACCEPTED_EXIT_CODES.contains(&code) => {
                self.address = Some((ip, port));
                self.state = ServerState::Stopped;
                tracing::info!(code, "nats-server exited before reporting readiness");
                if verbose {
                    logger.log("NATS server was stopped!");
                }
                Ok(())
            }
            Startup::Exited(code) => {
                // only a successful start exposes an address
                self.address = None;
                self.state = ServerState::Stopped;
                let err = Error::ProcessExited { code };
                tracing::warn!(?code, "nats-server exited during startup");
                if verbose {
                    logger.warn(&err.to_string());
                }
                Err(err)
            }
        }
    }

    /// Terminate the broker and wait for it to exit. No-op if nothing runs.
    pub async fn stop(&mut self) -> Result<()> {
        let Some(mut process) = self.process.take() else {
            return Ok(());
        };

        self.state = ServerState::Stopping;
        if let Some(stop_tx) = process.stop_tx.take() {
            // the supervisor is gone already if the broker exited on its own
            let _ = stop_tx.send(());
        }

        let status = process.supervisor.await.map_err(std::io::Error::other);
        // the process handle is gone either way
        self.state = ServerState::Stopped;
        let status = status??;

        let url = self.url().unwrap_or_default();
        tracing::info!(%url, code = ?status.code(), "nats-server stopped");
        if self.options.verbose {
            self.options
                .logger
                .log(&format!("NATS server was stopped at: {url}"));
        }
        Ok(())
    }
}

impl std::fmt::Debug for NatsServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NatsServer")
            .field("bin_path", &self.bin_path)
            .field("state", &self.state)
            .field("url", &self.url())
            .finish()
    }
}

/// `--addr <ip> --port <port>` followed by the caller's arguments.
pub fn launch_args(ip: &str, port: u16, extra: &[String]) -> Vec<String> {
    let mut args = vec![
        "--addr".to_string(),
        ip.to_string(),
        "--port".to_string(),
        port.to_string(),
    ];
    args.extend(extra.iter().cloned());
    args
}

async fn watch_diagnostics(
    stderr: ChildStderr,
    signal: Arc<StartSignal>,
    verbose: bool,
    logger: Arc<dyn Logger>,
) {
    let mut reader = BufReader::new(stderr);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        // raw bytes, the broker may echo non UTF-8 client input
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim_end_matches(['\r', '\n']);
                tracing::trace!(target: "nats_server", "{line}");
                if verbose {
                    logger.log(line);
                }
                if line.contains(READY_MARKER) {
                    signal.complete(Startup::Ready);
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                // the pipe is unusable, nothing more will arrive
                tracing::warn!("failed to read nats-server output: {e}");
                break;
            }
        }
    }
}

/// Owns the child until it exits. A message on (or the drop of) `stop_rx`
/// terminates it.
async fn supervise(
    mut child: Child,
    stop_rx: oneshot::Receiver<()>,
    signal: Arc<StartSignal>,
) -> std::io::Result<ExitStatus> {
    let status = tokio::select! {
        status = child.wait() => status,
        _ = stop_rx => match terminate(&mut child) {
            Ok(()) => child.wait().await,
            Err(e) => Err(e),
        },
    };

    signal.complete(Startup::Exited(
        status.as_ref().ok().and_then(ExitStatus::code),
    ));
    status
}

#[cfg(unix)]
fn terminate(child: &mut Child) -> std::io::Result<()> {
    use nix::errno::Errno;
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    // already reaped
    let Some(pid) = child.id() else { return Ok(()) };
    let pid = i32::try_from(pid).map_err(std::io::Error::other)?;

    match kill(Pid::from_raw(pid), Signal::SIGTERM) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(errno) => Err(std::io::Error::from(errno)),
    }
}

#[cfg(not(unix))]
fn terminate(child: &mut Child) -> std::io::Result<()> {
    child.start_kill()
}
