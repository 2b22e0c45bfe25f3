//! Per-session state machine: `Starting -> Active -> Terminating ->
//! Terminated` (spec §4.5). One task per session owns the [`SpawnedPty`]
//! exclusively; everything else reaches the session through
//! `Session::command_tx` or reads `Session::output_tx`/`Session::history`.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use super::pty::{drain_output, PtyDimensions, SpawnedPty};
use super::{RuntimeCommand, Session, TerminationEvent};

const DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

/// Spawns the task that drives `session` for its entire lifetime. Returns
/// immediately; the task runs until the child process exits or a
/// [`RuntimeCommand::Terminate`] is received.
pub fn spawn(
    session: Arc<Session>,
    spawned: SpawnedPty,
    commands: mpsc::UnboundedReceiver<RuntimeCommand>,
    termination_tx: mpsc::UnboundedSender<TerminationEvent>,
) {
    tokio::spawn(run(session, spawned, commands, termination_tx));
}

async fn run(
    session: Arc<Session>,
    mut spawned: SpawnedPty,
    mut commands: mpsc::UnboundedReceiver<RuntimeCommand>,
    termination_tx: mpsc::UnboundedSender<TerminationEvent>,
) {
    emit_marker(&session, "start");

    let exit_code = loop {
        tokio::select! {
            biased;

            exit = &mut spawned.exit_code => {
                break exit.unwrap_or(1);
            }

            output = spawned.output.recv() => {
                match output {
                    Some(bytes) => {
                        if let Err(err) = session.history.append(&bytes) {
                            tracing::warn!(session_id = %session.id, %err, "failed writing transcript");
                        }
                        let _ = session.output_tx.send(bytes::Bytes::from(bytes));
                    }
                    None => {
                        // Reader task ended without an exit code yet; keep
                        // waiting on spawned.exit_code to produce the final code.
                    }
                }
            }

            cmd = commands.recv() => {
                match cmd {
                    Some(RuntimeCommand::Stdin { data, .. }) => {
                        emit_marker(&session, "input submit");
                        let _ = spawned.writer.send(data).await;
                    }
                    Some(RuntimeCommand::Resize { cols, rows }) => {
                        {
                            let mut state = session.state.write().unwrap();
                            state.cols = cols;
                            state.rows = rows;
                        }
                        let _ = spawned.resize.send(PtyDimensions { cols, rows }).await;
                    }
                    Some(RuntimeCommand::TitleSet { title }) => {
                        session.state.write().unwrap().dynamic_title = Some(title);
                    }
                    Some(RuntimeCommand::Terminate) => {
                        (spawned.killer)().ok();
                    }
                    None => {
                        // Store dropped its sender; session is being torn down.
                        (spawned.killer)().ok();
                    }
                }
            }
        }
    };

    // Terminating: drain any output that raced the exit notification.
    let tail = drain_output(&mut spawned.output, DRAIN_TIMEOUT).await;
    if !tail.is_empty() {
        if let Err(err) = session.history.append(&tail) {
            tracing::warn!(session_id = %session.id, %err, "failed writing transcript tail");
        }
        let _ = session.output_tx.send(bytes::Bytes::from(tail));
    }
    spawned.abort_io_tasks();

    let (created_by, container_name) = {
        let mut state = session.state.write().unwrap();
        state.is_active = false;
        state.exit_code = Some(exit_code);
        (session.created_by.clone(), state.container_name.clone())
    };

    let _ = termination_tx.send(TerminationEvent {
        session_id: session.id.clone(),
        created_by,
        exit_code,
        container_name,
    });
}

/// Records a lifecycle marker (spec §4.5(a): session start, input submit)
/// and pushes the same OSC-133 bytes onto the live output channel so
/// attached clients see it without waiting for a history replay.
fn emit_marker(session: &Session, kind: &str) {
    match session.history.record_marker(kind, now_ms()) {
        Ok(bytes) => {
            let _ = session.output_tx.send(bytes::Bytes::from(bytes));
        }
        Err(err) => {
            tracing::warn!(session_id = %session.id, %err, "failed recording activity marker");
        }
    }
}

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system clock before epoch")
        .as_millis() as u64
}
