pub mod history;
pub mod pty;
pub mod runtime;

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, RwLock};

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc};

use self::history::History;
use self::pty::PtySpawner;
use crate::error::{AppError, AppResult};

pub type SessionId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    Private,
    SharedReadonly,
    Public,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, serde::Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum IsolationMode {
    #[default]
    None,
    Directory,
    Container,
}

/// Mutable fields of a [`Session`]. The Session Store is the only writer;
/// route handlers call its APIs rather than mutate this directly (spec §5).
pub struct SessionMutableState {
    pub alias: Option<String>,
    pub visibility: Visibility,
    pub workspace: String,
    pub workspace_order: i64,
    pub title: Option<String>,
    pub dynamic_title: Option<String>,
    pub is_active: bool,
    pub exit_code: Option<i32>,
    pub isolation_mode: IsolationMode,
    pub container_name: Option<String>,
    pub show_in_sidebar: bool,
    pub interactive: bool,
    pub connected_clients: HashSet<String>,
    pub cols: u16,
    pub rows: u16,
}

pub enum RuntimeCommand {
    Stdin { client_id: String, data: Vec<u8> },
    Resize { cols: u16, rows: u16 },
    TitleSet { title: String },
    Terminate,
}

/// Emitted by the runtime when a session finishes, for the server to enqueue
/// per-user notifications and stop any associated container (spec §4.5(c)).
#[derive(Debug, Clone)]
pub struct TerminationEvent {
    pub session_id: SessionId,
    pub created_by: String,
    pub exit_code: i32,
    pub container_name: Option<String>,
}

pub struct Session {
    pub id: SessionId,
    pub created_by: String,
    pub created_at: u64,
    pub template_id: Option<String>,
    pub template_parameters: HashMap<String, String>,
    pub parent_session_id: Option<String>,
    pub child_tab_type: Option<String>,
    pub state: RwLock<SessionMutableState>,
    pub history: Arc<History>,
    pub output_tx: broadcast::Sender<bytes::Bytes>,
    pub command_tx: mpsc::UnboundedSender<RuntimeCommand>,
}

impl Session {
    pub fn is_active(&self) -> bool {
        self.state.read().unwrap().is_active
    }

    pub fn visibility(&self) -> Visibility {
        self.state.read().unwrap().visibility
    }

    pub fn connected_clients(&self) -> HashSet<String> {
        self.state.read().unwrap().connected_clients.clone()
    }

    pub fn attach_client(&self, client_id: &str) {
        self.state
            .write()
            .unwrap()
            .connected_clients
            .insert(client_id.to_string());
    }

    pub fn detach_client(&self, client_id: &str) {
        self.state
            .write()
            .unwrap()
            .connected_clients
            .remove(client_id);
    }

    pub fn is_interactive(&self) -> bool {
        self.state.read().unwrap().interactive
    }

    pub fn is_client_attached(&self, client_id: &str) -> bool {
        self.state.read().unwrap().connected_clients.contains(client_id)
    }

    pub fn dimensions(&self) -> (u16, u16) {
        let state = self.state.read().unwrap();
        (state.cols, state.rows)
    }

    pub fn set_title(&self, title: Option<String>) {
        self.state.write().unwrap().title = title;
    }

    pub fn set_visibility(&self, visibility: Visibility) {
        self.state.write().unwrap().visibility = visibility;
    }

    pub fn set_workspace(&self, workspace: String) {
        self.state.write().unwrap().workspace = workspace;
    }

    pub fn set_show_in_sidebar(&self, show: bool) {
        self.state.write().unwrap().show_in_sidebar = show;
    }

    pub fn set_interactive(&self, interactive: bool) {
        self.state.write().unwrap().interactive = interactive;
    }

    pub fn summary(&self) -> SessionSummary {
        let state = self.state.read().unwrap();
        SessionSummary {
            session_id: self.id.clone(),
            alias: state.alias.clone(),
            created_by: self.created_by.clone(),
            visibility: state.visibility,
            workspace: state.workspace.clone(),
            workspace_order: state.workspace_order,
            title: state.title.clone(),
            dynamic_title: state.dynamic_title.clone(),
            created_at: self.created_at,
            is_active: state.is_active,
            exit_code: state.exit_code,
            template_id: self.template_id.clone(),
            isolation_mode: state.isolation_mode,
            container_name: state.container_name.clone(),
            parent_session_id: self.parent_session_id.clone(),
            child_tab_type: self.child_tab_type.clone(),
            show_in_sidebar: state.show_in_sidebar,
            interactive: state.interactive,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub session_id: SessionId,
    pub alias: Option<String>,
    pub created_by: String,
    pub visibility: Visibility,
    pub workspace: String,
    pub workspace_order: i64,
    pub title: Option<String>,
    pub dynamic_title: Option<String>,
    pub created_at: u64,
    pub is_active: bool,
    pub exit_code: Option<i32>,
    pub template_id: Option<String>,
    pub isolation_mode: IsolationMode,
    pub container_name: Option<String>,
    pub parent_session_id: Option<String>,
    pub child_tab_type: Option<String>,
    pub show_in_sidebar: bool,
    pub interactive: bool,
}

pub struct CreateSessionOptions {
    pub command: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub env: HashMap<String, String>,
    pub created_by: String,
    pub visibility: Visibility,
    pub workspace: Option<String>,
    pub alias: Option<String>,
    pub title: Option<String>,
    pub template_id: Option<String>,
    pub template_parameters: HashMap<String, String>,
    pub isolation_mode: IsolationMode,
    pub container_name: Option<String>,
    pub interactive: bool,
    pub parent_session_id: Option<String>,
    pub child_tab_type: Option<String>,
    pub show_in_sidebar: bool,
}

/// In-memory registry of live and recently-terminated sessions (spec §4.4).
pub struct SessionStore {
    active: DashMap<SessionId, Arc<Session>>,
    terminated: DashMap<SessionId, Arc<Session>>,
    terminated_order: std::sync::Mutex<VecDeque<SessionId>>,
    aliases: DashMap<String, SessionId>,
    spawner: Arc<dyn PtySpawner>,
    history_ring_bytes: usize,
    transcripts_dir: PathBuf,
    terminated_cap: usize,
    workspace_order_seq: AtomicI64,
}

impl SessionStore {
    pub fn new(spawner: Arc<dyn PtySpawner>, transcripts_dir: PathBuf, history_ring_bytes: usize) -> Self {
        Self {
            active: DashMap::new(),
            terminated: DashMap::new(),
            terminated_order: std::sync::Mutex::new(VecDeque::new()),
            aliases: DashMap::new(),
            spawner,
            history_ring_bytes,
            transcripts_dir,
            terminated_cap: 500,
            workspace_order_seq: AtomicI64::new(0),
        }
    }

    pub fn create_session(
        &self,
        options: CreateSessionOptions,
        termination_tx: mpsc::UnboundedSender<TerminationEvent>,
    ) -> anyhow::Result<Arc<Session>> {
        if let Some(alias) = &options.alias {
            if self.aliases.contains_key(alias) {
                anyhow::bail!("alias '{alias}' already in use");
            }
        }

        let id = uuid::Uuid::new_v4().to_string();
        let created_at = crate::auth::token::now_secs();
        let history = Arc::new(History::open(
            &self.transcripts_dir.join(format!("{id}.raw")),
            self.history_ring_bytes,
        )?);
        let (output_tx, _) = broadcast::channel(1024);
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        let state = SessionMutableState {
            alias: options.alias.clone(),
            visibility: options.visibility,
            workspace: options.workspace.clone().unwrap_or_else(|| "Default".to_string()),
            workspace_order: self.workspace_order_seq.fetch_add(1, Ordering::Relaxed),
            title: options.title.clone(),
            dynamic_title: None,
            is_active: true,
            exit_code: None,
            isolation_mode: options.isolation_mode,
            container_name: options.container_name.clone(),
            show_in_sidebar: options.show_in_sidebar,
            interactive: options.interactive,
            connected_clients: HashSet::new(),
            cols: 80,
            rows: 24,
        };

        let session = Arc::new(Session {
            id: id.clone(),
            created_by: options.created_by.clone(),
            created_at,
            template_id: options.template_id.clone(),
            template_parameters: options.template_parameters.clone(),
            parent_session_id: options.parent_session_id.clone(),
            child_tab_type: options.child_tab_type.clone(),
            state: RwLock::new(state),
            history,
            output_tx,
            command_tx,
        });

        let spawned = self.spawner.spawn(
            &options.command,
            &options.args,
            &options.cwd,
            &options.env,
            pty::PtyDimensions::default(),
        )?;

        runtime::spawn(Arc::clone(&session), spawned, command_rx, termination_tx);

        if let Some(alias) = &options.alias {
            self.aliases.insert(alias.clone(), id.clone());
        }
        self.active.insert(id.clone(), Arc::clone(&session));
        Ok(session)
    }

    pub fn get_session(&self, id: &str) -> Option<Arc<Session>> {
        self.active.get(id).map(|e| Arc::clone(e.value()))
    }

    pub fn get_session_including_terminated(&self, id: &str) -> Option<Arc<Session>> {
        self.get_session(id)
            .or_else(|| self.terminated.get(id).map(|e| Arc::clone(e.value())))
    }

    /// Resolves an alias to its session id if active, else treats the input
    /// as an id directly (spec §4.4: "falls through to treating the input
    /// as an ID").
    pub fn resolve_id_from_alias_or_id(&self, input: &str) -> String {
        self.aliases
            .get(input)
            .map(|e| e.value().clone())
            .unwrap_or_else(|| input.to_string())
    }

    pub fn get_all_sessions(&self) -> Vec<Arc<Session>> {
        self.active
            .iter()
            .map(|e| Arc::clone(e.value()))
            .chain(self.terminated.iter().map(|e| Arc::clone(e.value())))
            .collect()
    }

    pub fn get_active_sessions(&self) -> Vec<Arc<Session>> {
        self.active.iter().map(|e| Arc::clone(e.value())).collect()
    }

    /// Detaches `client_id` from every session it is attached to, returning
    /// the affected session ids so the caller can broadcast updates.
    pub fn cleanup_client_sessions(&self, client_id: &str) -> Vec<SessionId> {
        let mut affected = Vec::new();
        for entry in self.active.iter() {
            let session = entry.value();
            if session.connected_clients().contains(client_id) {
                session.detach_client(client_id);
                affected.push(session.id.clone());
            }
        }
        affected
    }

    pub fn terminate_session(&self, id: &str) -> AppResult<()> {
        let session = self
            .get_session(id)
            .ok_or_else(|| AppError::NotFound(format!("session {id}")))?;
        session
            .command_tx
            .send(RuntimeCommand::Terminate)
            .map_err(|_| AppError::ServiceUnavailable("session already terminated".into()))?;
        Ok(())
    }

    /// Moves a session from the active set to the terminated set. Called by
    /// the dispatcher task that observes [`TerminationEvent`]s, not by the
    /// runtime itself, keeping the store the single writer of record.
    pub fn mark_terminated(&self, id: &str) {
        if let Some((_, session)) = self.active.remove(id) {
            {
                let state = session.state.read().unwrap();
                if let Some(alias) = &state.alias {
                    self.aliases.remove(alias);
                }
            }
            self.terminated.insert(id.to_string(), session);
            let mut order = self.terminated_order.lock().unwrap();
            order.push_back(id.to_string());
            while order.len() > self.terminated_cap {
                if let Some(oldest) = order.pop_front() {
                    self.terminated.remove(&oldest);
                }
            }
        }
    }

    pub fn save_terminated_metadata(&self, session: &Session, data_dir: &Path) -> anyhow::Result<()> {
        let path = data_dir.join("sessions").join(format!("{}.json", session.id));
        let json = serde_json::to_vec_pretty(&session.summary())?;
        crate::util::write_atomically(&path, &json, 0o644)
    }

    /// Renames (or clears) a session's alias, enforcing that an alias
    /// resolves to at most one active session (spec §3 invariant).
    pub fn rename_alias(&self, session_id: &str, new_alias: Option<String>) -> AppResult<()> {
        let session = self
            .get_session(session_id)
            .ok_or_else(|| AppError::NotFound(format!("session {session_id}")))?;

        if let Some(alias) = &new_alias {
            if let Some(existing) = self.aliases.get(alias) {
                if existing.value() != session_id {
                    return Err(AppError::Conflict(format!("alias '{alias}' already in use")));
                }
            }
        }

        let old_alias = {
            let mut state = session.state.write().unwrap();
            std::mem::replace(&mut state.alias, new_alias.clone())
        };
        if let Some(old) = old_alias {
            self.aliases.remove(&old);
        }
        if let Some(alias) = new_alias {
            self.aliases.insert(alias, session_id.to_string());
        }
        Ok(())
    }

    /// Reorders sessions within `workspace`, persisting new `workspace_order`
    /// values for every id in `ordered_ids` that currently belongs to that
    /// workspace. Returns the ids actually reordered (spec §4.11).
    pub fn reorder_workspace(&self, workspace: &str, ordered_ids: &[String]) -> Vec<SessionId> {
        let mut applied = Vec::new();
        for (idx, id) in ordered_ids.iter().enumerate() {
            if let Some(session) = self.get_session(id) {
                let mut state = session.state.write().unwrap();
                if state.workspace == workspace {
                    state.workspace_order = idx as i64;
                    applied.push(id.clone());
                }
            }
        }
        applied
    }
}
