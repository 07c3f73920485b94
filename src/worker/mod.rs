//! Worker processes
//!
//! A [`Worker`] is one `pdf-worker` subprocess plus the RPC connection to it.
//!
//! ```text
//! spawn ──▶ stdout: "1|1|tcp|127.0.0.1:PORT" ──▶ connect + handshake
//!   │
//!   └── other stdout/stderr lines ──▶ tracing (target "pdf_worker")
//! ```

mod factory;

pub use factory::WorkerFactory;

use std::fmt;
use std::net::SocketAddr;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{oneshot, watch, Notify};
use tokio::task::JoinHandle;

use crate::config::WorkerCommand;
use crate::error::{Result, TransportError};
use crate::rpc::protocol::{parse_announce_line, MAGIC_COOKIE_KEY, MAGIC_COOKIE_VALUE};
use crate::rpc::RpcClient;

/// Lifecycle of a worker as seen by the pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Spawning,
    Validating,
    Idle,
    Borrowed,
    /// Failed a health check
    Invalid,
    /// The process is gone
    Exited,
    Discarded,
}

/// Kill switch and exit status of a worker process
///
/// Cloneable and usable while the worker itself is busy, so a hung call can
/// be cut short. Dropping the last handle (and the [`Worker`]) kills the
/// process.
#[derive(Debug, Clone)]
pub struct ProcessHandle {
    pid: Option<u32>,
    kill: Arc<Notify>,
    exited: watch::Receiver<bool>,
}

impl ProcessHandle {
    /// Hand `child` to a supervisor task that reaps it or kills it on request
    fn supervise(child: Child, pid: Option<u32>) -> Self {
        let kill = Arc::new(Notify::new());
        let (exited_tx, exited) = watch::channel(false);
        tokio::spawn(supervise(child, pid, kill.clone(), exited_tx));
        Self { pid, kill, exited }
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Whether the process is known to have exited; never blocks
    pub fn has_exited(&self) -> bool {
        *self.exited.borrow()
    }

    /// Receiver that flips to `true` once the process is gone
    pub fn exit_signal(&self) -> watch::Receiver<bool> {
        self.exited.clone()
    }

    /// Wait until the process has exited
    pub async fn wait(&self) {
        let mut exited = self.exited.clone();
        // An error means the supervisor is gone, which only happens after exit
        let _ = exited.wait_for(|gone| *gone).await;
    }

    /// Terminate the process and wait for it to be reaped
    pub async fn kill(&self) {
        if !self.has_exited() {
            self.kill.notify_one();
        }
        self.wait().await;
    }
}

async fn supervise(mut child: Child, pid: Option<u32>, kill: Arc<Notify>, exited: watch::Sender<bool>) {
    let status = tokio::select! {
        status = child.wait() => status,
        _ = kill.notified() => {
            if let Err(e) = child.start_kill() {
                tracing::warn!(?pid, "Failed to kill worker: {}", e);
            }
            let status = child.wait().await;
            tracing::info!(?pid, "Worker killed");
            status
        }
        // Every handle is gone; dropping the child kills it
        _ = exited.closed() => return,
    };

    match status {
        Ok(status) => tracing::debug!(?pid, %status, "Worker process exited"),
        Err(e) => tracing::warn!(?pid, "Failed to wait for worker: {}", e),
    }
    exited.send_replace(true);
}

/// A supervised worker subprocess
pub struct Worker {
    process: ProcessHandle,
    client: RpcClient,
    addr: SocketAddr,
    pid: Option<u32>,
    state: WorkerState,
    log_tasks: Vec<JoinHandle<()>>,
}

impl fmt::Debug for Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker")
            .field("pid", &self.pid)
            .field("addr", &self.addr)
            .field("state", &self.state)
            .field("engine", &self.client.engine())
            .finish()
    }
}

impl Worker {
    /// Launch a worker and connect to it
    pub async fn spawn(command: &WorkerCommand) -> Result<Self> {
        tracing::debug!(bin = %command.bin_path.display(), "Spawning worker");

        let mut child = Command::new(&command.bin_path)
            .args(&command.args)
            .env(MAGIC_COOKIE_KEY, MAGIC_COOKIE_VALUE)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(TransportError::Spawn)?;
        let pid = child.id();

        let (stdout, stderr) = match (child.stdout.take(), child.stderr.take()) {
            (Some(stdout), Some(stderr)) => (stdout, stderr),
            _ => {
                let _ = child.kill().await;
                return Err(TransportError::Protocol("worker output was not captured".into()).into());
            }
        };

        let (announce_tx, announce_rx) = oneshot::channel();
        let log_tasks = vec![
            tokio::spawn(forward_stdout(stdout, pid, announce_tx)),
            tokio::spawn(forward_lines(stderr, pid)),
        ];

        let addr = match tokio::time::timeout(command.start_timeout, announce_rx).await {
            Ok(Ok(addr)) => addr,
            Ok(Err(_)) => {
                // stdout closed before the announce line
                let status = child.wait().await.map_err(TransportError::Io)?;
                tracing::warn!(?pid, %status, "Worker exited before announcing itself");
                return Err(TransportError::Exited.into());
            }
            Err(_) => {
                tracing::warn!(?pid, "Worker did not start within {:?}", command.start_timeout);
                let _ = child.kill().await;
                return Err(TransportError::StartTimeout(command.start_timeout).into());
            }
        };

        let process = ProcessHandle::supervise(child, pid);
        let client = match RpcClient::connect(addr).await {
            Ok(client) => client.abort_on_exit(process.exit_signal()),
            Err(e) => {
                process.kill().await;
                return Err(e);
            }
        };

        tracing::info!(?pid, %addr, engine = client.engine(), "Worker started");
        Ok(Self {
            process,
            client,
            addr,
            pid,
            state: WorkerState::Spawning,
            log_tasks,
        })
    }

    pub fn client(&self) -> &RpcClient {
        &self.client
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Handle for killing the process without access to the worker
    pub fn process(&self) -> &ProcessHandle {
        &self.process
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: WorkerState) {
        self.state = state;
    }

    /// Whether the process has exited; never blocks
    pub fn exited(&mut self) -> bool {
        if self.state == WorkerState::Exited {
            return true;
        }
        if self.process.has_exited() {
            self.state = WorkerState::Exited;
        }
        self.state == WorkerState::Exited
    }

    /// Terminate the process immediately
    pub async fn kill(&mut self) -> Result<()> {
        self.process.kill().await;
        self.state = WorkerState::Exited;
        Ok(())
    }

    /// Close every document, ask the process to exit and wait for it
    ///
    /// Kills the process if it is still running after `close_timeout`.
    pub async fn close(mut self, close_timeout: Duration) {
        if !self.exited() {
            match tokio::time::timeout(close_timeout, self.client.close()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::debug!(pid = ?self.pid, "Close failed: {}", e),
                Err(_) => tracing::debug!(pid = ?self.pid, "Close timed out"),
            }
            if let Ok(Err(e)) = tokio::time::timeout(close_timeout, self.client.shutdown()).await {
                tracing::debug!(pid = ?self.pid, "Shutdown failed: {}", e);
            }

            if tokio::time::timeout(close_timeout, self.process.wait()).await.is_err() {
                tracing::warn!(pid = ?self.pid, "Worker did not stop within {:?}, killing", close_timeout);
                self.process.kill().await;
            } else {
                tracing::debug!(pid = ?self.pid, "Worker stopped");
            }
        }
        self.state = WorkerState::Discarded;
        // Forwarders end on their own once the pipes close
        self.log_tasks.clear();
    }
}

async fn forward_stdout<R>(stdout: R, pid: Option<u32>, announce: oneshot::Sender<SocketAddr>)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(stdout).lines();
    let mut announce = Some(announce);

    while let Ok(Some(line)) = lines.next_line().await {
        if announce.is_some() {
            if let Ok(addr) = parse_announce_line(&line) {
                if let Some(tx) = announce.take() {
                    let _ = tx.send(addr);
                }
                continue;
            }
        }
        tracing::info!(target: "pdf_worker", ?pid, "{}", line);
    }
}

async fn forward_lines<R>(output: R, pid: Option<u32>)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(output).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        tracing::info!(target: "pdf_worker", ?pid, "{}", line);
    }
}
