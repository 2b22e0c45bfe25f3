//! The PTY/container runtime adapter boundary.
//!
//! `PtySpawner` is the trait the Session Runtime spawns processes through.
//! [`LocalPtySpawner`] is the only implementation this repository ships:
//! a plain local-process PTY, grounded directly on the reader-thread /
//! channel shape of `codex-rs/utils/pty`'s `spawn_process`. A
//! container-isolated spawner (running the command inside `podman`/`docker
//! exec`) would implement the same trait; wiring that adapter is the
//! explicitly out-of-scope runtime plumbing named in spec §1 — only the
//! boundary is specified here.

use std::collections::HashMap;
use std::io::{ErrorKind, Read, Write};
use std::path::Path;
use std::time::Duration;

use portable_pty::{native_pty_system, CommandBuilder, PtySize};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy)]
pub struct PtyDimensions {
    pub cols: u16,
    pub rows: u16,
}

impl Default for PtyDimensions {
    fn default() -> Self {
        Self { cols: 80, rows: 24 }
    }
}

/// Handles to a spawned PTY process, returned by [`PtySpawner::spawn`].
pub struct SpawnedPty {
    /// Send raw bytes to be written to the PTY's input.
    pub writer: mpsc::Sender<Vec<u8>>,
    /// Receives raw bytes read from the PTY's output, in order.
    pub output: mpsc::Receiver<Vec<u8>>,
    /// Request a resize (`TIOCSWINSZ`-equivalent).
    pub resize: mpsc::Sender<PtyDimensions>,
    /// Resolves to the process exit code once the child exits.
    pub exit_code: oneshot::Receiver<i32>,
    /// Forcibly terminate the child process.
    pub killer: Box<dyn FnMut() -> std::io::Result<()> + Send>,
    reader_task: JoinHandle<()>,
    writer_task: JoinHandle<()>,
}

impl SpawnedPty {
    /// Aborts the background reader/writer tasks. Call after the PTY has
    /// exited and its output has been fully drained.
    pub fn abort_io_tasks(&self) {
        self.reader_task.abort();
        self.writer_task.abort();
    }
}

pub trait PtySpawner: Send + Sync {
    fn spawn(
        &self,
        command: &str,
        args: &[String],
        cwd: &Path,
        env: &HashMap<String, String>,
        size: PtyDimensions,
    ) -> anyhow::Result<SpawnedPty>;
}

/// Spawns a bare local-process PTY via `portable-pty`. No container
/// isolation; `isolation_mode = "container"` sessions would need a
/// different `PtySpawner` implementation, out of scope here.
pub struct LocalPtySpawner;

impl PtySpawner for LocalPtySpawner {
    fn spawn(
        &self,
        command: &str,
        args: &[String],
        cwd: &Path,
        env: &HashMap<String, String>,
        size: PtyDimensions,
    ) -> anyhow::Result<SpawnedPty> {
        if command.is_empty() {
            anyhow::bail!("missing program for PTY spawn");
        }

        let pty_system = native_pty_system();
        let pair = pty_system.openpty(PtySize {
            rows: size.rows,
            cols: size.cols,
            pixel_width: 0,
            pixel_height: 0,
        })?;

        let mut builder = CommandBuilder::new(command);
        builder.cwd(cwd);
        for arg in args {
            builder.arg(arg);
        }
        for (k, v) in env {
            builder.env(k, v);
        }

        let mut child = pair.slave.spawn_command(builder)?;
        drop(pair.slave);
        let mut killer = child.clone_killer();

        let mut reader = pair.master.try_clone_reader()?;
        let mut writer = pair.master.take_writer()?;
        let master = std::sync::Mutex::new(pair.master);

        let (output_tx, output_rx) = mpsc::channel::<Vec<u8>>(256);
        let reader_task: JoinHandle<()> = tokio::task::spawn_blocking(move || {
            let mut buf = [0u8; 8192];
            loop {
                match reader.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        if output_tx.blocking_send(buf[..n].to_vec()).is_err() {
                            break;
                        }
                    }
                    Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
                    Err(_) => break,
                }
            }
        });

        let (writer_tx, mut writer_rx) = mpsc::channel::<Vec<u8>>(128);
        let writer_task: JoinHandle<()> = tokio::task::spawn_blocking(move || {
            while let Some(bytes) = writer_rx.blocking_recv() {
                if writer.write_all(&bytes).is_err() {
                    break;
                }
            }
        });

        let (resize_tx, mut resize_rx) = mpsc::channel::<PtyDimensions>(16);
        tokio::task::spawn_blocking(move || {
            while let Some(dim) = resize_rx.blocking_recv() {
                let _ = master.lock().unwrap().resize(PtySize {
                    rows: dim.rows,
                    cols: dim.cols,
                    pixel_width: 0,
                    pixel_height: 0,
                });
            }
        });

        let (exit_tx, exit_rx) = oneshot::channel();
        tokio::task::spawn_blocking(move || {
            let status = child.wait();
            let code = status
                .ok()
                .and_then(|s| s.exit_code().try_into().ok())
                .unwrap_or(1);
            let _ = exit_tx.send(code);
        });

        Ok(SpawnedPty {
            writer: writer_tx,
            output: output_rx,
            resize: resize_tx,
            exit_code: exit_rx,
            killer: Box::new(move || killer.kill()),
            reader_task,
            writer_task,
        })
    }
}

/// Best-effort bounded drain used during the `Terminating` state: collects
/// whatever output arrives within `timeout`, then gives up.
pub async fn drain_output(output: &mut mpsc::Receiver<Vec<u8>>, timeout: Duration) -> Vec<u8> {
    let mut collected = Vec::new();
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            break;
        }
        match tokio::time::timeout(remaining, output.recv()).await {
            Ok(Some(bytes)) => collected.extend_from_slice(&bytes),
            _ => break,
        }
    }
    collected
}
