// Copyright © 2026 mailbeam.dev
// Licensed under MailBeam License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

//! The engine: owns every parser session, the mailbox tree, the cache
//! and the task set. Runs as a single actor task; transports post
//! framed responses into its loop, the host talks to it through an
//! [`EngineHandle`], and all state transitions, cache writes and tree
//! mutations happen on this one task.

use crate::modules::cache::{CacheFacade, MailboxDescriptor};
use crate::modules::codec::utf7::encode_mailbox_name;
use crate::modules::error::{code::ErrorCode, MailBeamError, MailBeamResult};
use crate::modules::imap::command::{AppendPayload, Command, SelectMode};
use crate::modules::imap::response::{Envelope, FetchAttr, ImapResponse, RespCode, StatusKind};
use crate::modules::imap::session::{run_connection, SessionCore, SessionEvent, SessionId};
use crate::modules::imap::transport::install_crypto_provider;
use crate::modules::settings::{EngineConfig, NetworkPolicy};
use crate::modules::state::{handle_untagged, ConnectionState, HandlerAction};
use crate::modules::sync;
use crate::modules::tasks::{
    append, fetch, list, status, uid_submit, FetchItems, Task, TaskId, TaskKind, TaskResult,
    TaskState,
};
use crate::modules::tree::{
    FetchState, NodeHandle, NodePayload, TreeEvent, TreeModel,
};
use crate::raise_error;
use ahash::AHashMap;
use chrono::{DateTime, FixedOffset};
use std::collections::VecDeque;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, info, warn};

pub mod policy;
pub mod pool;

use pool::{ConnectOutcome, EstablishedConnection};

/// Events the engine broadcasts to whoever subscribed.
#[derive(Clone, Debug)]
pub enum EngineEvent {
    ConnectionStateChanged {
        session: SessionId,
        state: ConnectionState,
    },
    /// ALERT text, verbatim from the server.
    Alert(String),
    CacheDegraded(String),
    MailboxSynced {
        mailbox: String,
        exists: u32,
    },
    TaskFailed {
        name: String,
        error: String,
    },
    TreeChanged(Vec<TreeEvent>),
}

/// Snapshot of one tree node for the presentation layer.
#[derive(Clone, Debug)]
pub enum NodeSnapshot {
    Mailbox {
        name: String,
        separator: Option<String>,
        flags: Vec<String>,
        child_state: FetchState,
    },
    MessageList {
        state: FetchState,
        count: usize,
    },
    Message {
        uid: u32,
        flags: Vec<String>,
        envelope: Option<Envelope>,
        size: Option<u32>,
        metadata_state: FetchState,
    },
    Part {
        part_id: String,
        media_type: String,
        media_subtype: String,
        file_name: Option<String>,
        octets: u32,
        has_data: bool,
        fetch_state: FetchState,
    },
}

type Responder = oneshot::Sender<Result<TaskResult, MailBeamError>>;

enum EngineRequest {
    ListMailboxes {
        parent: String,
        respond: Responder,
    },
    OpenMailbox {
        mailbox: String,
        respond: Responder,
    },
    MailboxStatus {
        mailbox: String,
        respond: Responder,
    },
    FetchMessageMetadata {
        mailbox: String,
        uid: u32,
        respond: Responder,
    },
    FetchPart {
        mailbox: String,
        uid: u32,
        part_id: String,
        respond: Responder,
    },
    Append {
        mailbox: String,
        flags: Vec<String>,
        timestamp: Option<DateTime<FixedOffset>>,
        payload: AppendPayload,
        respond: Responder,
    },
    GenUrlAuth {
        url: String,
        mechanism: String,
        respond: Responder,
    },
    UidSubmit {
        mailbox: String,
        uid_validity: u32,
        uid: u32,
        options: Vec<(String, String)>,
        respond: Responder,
    },
    SetNetworkPolicy(NetworkPolicy),
    NodeSnapshot {
        handle: NodeHandle,
        respond: oneshot::Sender<Option<NodeSnapshot>>,
    },
    ChildHandles {
        handle: NodeHandle,
        respond: oneshot::Sender<Vec<NodeHandle>>,
    },
    Shutdown,
}

/// The host-side handle: cheap to clone, every method is a message to
/// the engine actor.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::UnboundedSender<EngineRequest>,
    events: broadcast::Sender<EngineEvent>,
}

fn engine_gone<T>() -> MailBeamResult<T> {
    Err(raise_error!(
        "engine is not running".into(),
        ErrorCode::ConnectionClosed
    ))
}

impl EngineHandle {
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    async fn request(
        &self,
        build: impl FnOnce(Responder) -> EngineRequest,
    ) -> MailBeamResult<TaskResult> {
        let (tx, rx) = oneshot::channel();
        if self.tx.send(build(tx)).is_err() {
            return engine_gone();
        }
        match rx.await {
            Ok(result) => result,
            Err(_) => engine_gone(),
        }
    }

    pub async fn list_mailboxes(&self, parent: &str) -> MailBeamResult<Vec<MailboxDescriptor>> {
        match self
            .request(|respond| EngineRequest::ListMailboxes {
                parent: parent.to_string(),
                respond,
            })
            .await?
        {
            TaskResult::Mailboxes(list) => Ok(list),
            other => unexpected_result(other),
        }
    }

    /// SELECT the mailbox and run the sync; resolves with the message
    /// count once the view is live.
    pub async fn open_mailbox(&self, mailbox: &str) -> MailBeamResult<u32> {
        match self
            .request(|respond| EngineRequest::OpenMailbox {
                mailbox: mailbox.to_string(),
                respond,
            })
            .await?
        {
            TaskResult::MailboxOpened { exists } => Ok(exists),
            other => unexpected_result(other),
        }
    }

    /// STATUS the mailbox and preallocate its message placeholders
    /// without selecting it.
    pub async fn mailbox_status(&self, mailbox: &str) -> MailBeamResult<()> {
        self.request(|respond| EngineRequest::MailboxStatus {
            mailbox: mailbox.to_string(),
            respond,
        })
        .await
        .map(|_| ())
    }

    pub async fn fetch_message_metadata(&self, mailbox: &str, uid: u32) -> MailBeamResult<()> {
        self.request(|respond| EngineRequest::FetchMessageMetadata {
            mailbox: mailbox.to_string(),
            uid,
            respond,
        })
        .await
        .map(|_| ())
    }

    pub async fn fetch_part(
        &self,
        mailbox: &str,
        uid: u32,
        part_id: &str,
    ) -> MailBeamResult<Vec<u8>> {
        match self
            .request(|respond| EngineRequest::FetchPart {
                mailbox: mailbox.to_string(),
                uid,
                part_id: part_id.to_string(),
                respond,
            })
            .await?
        {
            TaskResult::PartData(data) => Ok(data),
            other => unexpected_result(other),
        }
    }

    /// APPEND; resolves with `(uidValidity, uid)` when the server
    /// advertises UIDPLUS, `(None, None)` otherwise.
    pub async fn append(
        &self,
        mailbox: &str,
        flags: Vec<String>,
        timestamp: Option<DateTime<FixedOffset>>,
        payload: AppendPayload,
    ) -> MailBeamResult<(Option<u32>, Option<u32>)> {
        match self
            .request(|respond| EngineRequest::Append {
                mailbox: mailbox.to_string(),
                flags,
                timestamp,
                payload,
                respond,
            })
            .await?
        {
            TaskResult::Append { uid_validity, uid } => Ok((uid_validity, uid)),
            other => unexpected_result(other),
        }
    }

    pub async fn gen_url_auth(&self, url: &str, mechanism: &str) -> MailBeamResult<String> {
        match self
            .request(|respond| EngineRequest::GenUrlAuth {
                url: url.to_string(),
                mechanism: mechanism.to_string(),
                respond,
            })
            .await?
        {
            TaskResult::UrlAuth(url) => Ok(url),
            other => unexpected_result(other),
        }
    }

    pub async fn uid_submit(
        &self,
        mailbox: &str,
        uid_validity: u32,
        uid: u32,
        options: Vec<(String, String)>,
    ) -> MailBeamResult<()> {
        self.request(|respond| EngineRequest::UidSubmit {
            mailbox: mailbox.to_string(),
            uid_validity,
            uid,
            options,
            respond,
        })
        .await
        .map(|_| ())
    }

    pub fn set_network_policy(&self, policy: NetworkPolicy) {
        let _ = self.tx.send(EngineRequest::SetNetworkPolicy(policy));
    }

    pub async fn node_snapshot(&self, handle: NodeHandle) -> MailBeamResult<Option<NodeSnapshot>> {
        let (tx, rx) = oneshot::channel();
        if self
            .tx
            .send(EngineRequest::NodeSnapshot {
                handle,
                respond: tx,
            })
            .is_err()
        {
            return engine_gone();
        }
        rx.await.or_else(|_| engine_gone())
    }

    pub async fn child_handles(&self, handle: NodeHandle) -> MailBeamResult<Vec<NodeHandle>> {
        let (tx, rx) = oneshot::channel();
        if self
            .tx
            .send(EngineRequest::ChildHandles {
                handle,
                respond: tx,
            })
            .is_err()
        {
            return engine_gone();
        }
        rx.await.or_else(|_| engine_gone())
    }

    pub fn shutdown(&self) {
        let _ = self.tx.send(EngineRequest::Shutdown);
    }
}

fn unexpected_result<T>(result: TaskResult) -> MailBeamResult<T> {
    Err(raise_error!(
        format!("task finished with an unexpected result: {result:?}"),
        ErrorCode::InternalError
    ))
}

/// Per-session progress of a mailbox sync.
#[derive(Debug)]
enum SyncStage {
    AwaitSelect,
    FullSearch { uids: Vec<u32> },
    FullFetch,
    Incremental { cached_uids: Vec<u32> },
    ReconcileSearch { cached_uids: Vec<u32>, uids: Vec<u32> },
}

pub struct Engine {
    config: EngineConfig,
    tree: TreeModel,
    cache: CacheFacade,
    policy: NetworkPolicy,

    sessions: AHashMap<SessionId, SessionCore>,
    next_session_id: SessionId,
    /// Sessions whose connect attempt is still in flight.
    connecting: usize,

    tasks: AHashMap<TaskId, Task>,
    next_task_id: TaskId,
    queued: VecDeque<TaskId>,

    sync_stages: AHashMap<SessionId, SyncStage>,
    sync_select_task: AHashMap<SessionId, TaskId>,
    pending_urlauth: AHashMap<SessionId, String>,

    requests: mpsc::UnboundedReceiver<EngineRequest>,
    net_rx: mpsc::UnboundedReceiver<SessionEvent>,
    net_tx: mpsc::UnboundedSender<SessionEvent>,
    connect_rx: mpsc::UnboundedReceiver<ConnectOutcome>,
    connect_tx: mpsc::UnboundedSender<ConnectOutcome>,
    events: broadcast::Sender<EngineEvent>,

    reconnect_at: Option<Instant>,
    shutting_down: bool,
}

impl Engine {
    pub fn new(config: EngineConfig, cache: Box<dyn crate::modules::cache::EngineCache>) -> (Self, EngineHandle) {
        let (req_tx, req_rx) = mpsc::unbounded_channel();
        let (net_tx, net_rx) = mpsc::unbounded_channel();
        let (connect_tx, connect_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(256);

        let handle = EngineHandle {
            tx: req_tx,
            events: events.clone(),
        };
        let policy = config.initial_policy;
        let engine = Self {
            config,
            tree: TreeModel::new(),
            cache: CacheFacade::new(cache),
            policy,
            sessions: AHashMap::new(),
            next_session_id: 0,
            connecting: 0,
            tasks: AHashMap::new(),
            next_task_id: 0,
            queued: VecDeque::new(),
            sync_stages: AHashMap::new(),
            sync_select_task: AHashMap::new(),
            pending_urlauth: AHashMap::new(),
            requests: req_rx,
            net_rx,
            net_tx,
            connect_rx,
            connect_tx,
            events,
            reconnect_at: None,
            shutting_down: false,
        };
        (engine, handle)
    }

    /// The engine actor. Runs until `shutdown()`.
    pub async fn run(mut self) {
        install_crypto_provider();
        let mut noop_timer = tokio::time::interval(self.config.noop_interval);
        noop_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            let reconnect_sleep = self.reconnect_at.map(tokio::time::sleep_until);
            tokio::select! {
                request = self.requests.recv() => {
                    match request {
                        Some(EngineRequest::Shutdown) | None => {
                            self.begin_shutdown();
                            break;
                        }
                        Some(request) => self.handle_request(request),
                    }
                }
                Some(event) = self.net_rx.recv() => self.on_session_event(event),
                Some(outcome) = self.connect_rx.recv() => self.on_connect_outcome(outcome),
                _ = noop_timer.tick() => self.on_noop_tick(),
                _ = async { reconnect_sleep.unwrap().await }, if self.reconnect_at.is_some() => {
                    self.reconnect_at = None;
                    self.pump();
                }
            }
            self.flush_events();
        }
        self.flush_events();
    }

    fn begin_shutdown(&mut self) {
        self.shutting_down = true;
        let ids: Vec<SessionId> = self.sessions.keys().copied().collect();
        for sid in ids {
            let task_id = self.make_task(Task::new(self.next_task_id, TaskKind::Logout));
            self.activate_on(task_id, sid);
            if let Some(session) = self.sessions.get_mut(&sid) {
                session.state = ConnectionState::LoggingOut;
            }
        }
    }

    // ── request handling ─────────────────────────────────────────

    fn handle_request(&mut self, request: EngineRequest) {
        match request {
            EngineRequest::ListMailboxes { parent, respond } => {
                self.request_list(parent, respond);
            }
            EngineRequest::OpenMailbox { mailbox, respond } => {
                let task = Task::new(self.next_task_id, TaskKind::Select {
                    mailbox,
                    mode: SelectMode::ReadOnly,
                })
                .with_responder(respond);
                let id = self.make_task(task);
                self.queued.push_back(id);
                self.pump();
            }
            EngineRequest::MailboxStatus { mailbox, respond } => {
                let task = Task::new(self.next_task_id, TaskKind::Status { mailbox })
                    .with_responder(respond);
                let id = self.make_task(task);
                self.queued.push_back(id);
                self.pump();
            }
            EngineRequest::FetchMessageMetadata { mailbox, uid, respond } => {
                self.request_metadata(mailbox, uid, respond);
            }
            EngineRequest::FetchPart {
                mailbox,
                uid,
                part_id,
                respond,
            } => {
                self.request_part(mailbox, uid, part_id, respond);
            }
            EngineRequest::Append {
                mailbox,
                flags,
                timestamp,
                payload,
                respond,
            } => {
                let task = Task::new(
                    self.next_task_id,
                    TaskKind::Append {
                        mailbox,
                        flags: (!flags.is_empty()).then(|| flags.join(" ")),
                        internal_date: timestamp.as_ref().map(append::format_internal_date),
                        payload,
                    },
                )
                .with_responder(respond);
                let id = self.make_task(task);
                self.queued.push_back(id);
                self.pump();
            }
            EngineRequest::GenUrlAuth {
                url,
                mechanism,
                respond,
            } => {
                let task = Task::new(self.next_task_id, TaskKind::GenUrlAuth { url, mechanism })
                    .with_responder(respond);
                let id = self.make_task(task);
                self.queued.push_back(id);
                self.pump();
            }
            EngineRequest::UidSubmit {
                mailbox,
                uid_validity,
                uid,
                options,
                respond,
            } => {
                let task = Task::new(
                    self.next_task_id,
                    TaskKind::UidSubmit {
                        mailbox,
                        uid_validity,
                        uid,
                        options,
                    },
                )
                .with_responder(respond);
                let id = self.make_task(task);
                self.queued.push_back(id);
                self.pump();
            }
            EngineRequest::SetNetworkPolicy(policy) => {
                info!(?policy, "network policy changed");
                self.policy = policy;
                // a transition never drops queued work, it only defers
                self.pump();
            }
            EngineRequest::NodeSnapshot { handle, respond } => {
                let _ = respond.send(self.snapshot(&handle));
            }
            EngineRequest::ChildHandles { handle, respond } => {
                let children = self
                    .tree
                    .resolve(&handle)
                    .map(|id| {
                        self.tree
                            .children(id)
                            .iter()
                            .map(|&child| self.tree.handle_of(child))
                            .collect()
                    })
                    .unwrap_or_default();
                let _ = respond.send(children);
            }
            EngineRequest::Shutdown => unreachable!("handled in run()"),
        }
    }

    fn request_list(&mut self, parent: String, respond: Responder) {
        // a fresh cached listing answers without the network
        if let Some(children) = self.cache.child_mailboxes(&parent) {
            if let Some(node) = self.tree.find_mailbox(&parent) {
                list::apply_children(&mut self.tree, node, &children);
            }
            let _ = respond.send(Ok(TaskResult::Mailboxes(children)));
            return;
        }
        let task = Task::new(self.next_task_id, TaskKind::List { parent }).with_responder(respond);
        let id = self.make_task(task);
        self.queued.push_back(id);
        self.pump();
    }

    fn request_metadata(&mut self, mailbox: String, uid: u32, respond: Responder) {
        if let Some(node) = self.tree.resolve(&NodeHandle::Message {
            mailbox: mailbox.clone(),
            uid,
        }) {
            if let NodePayload::Message(m) = self.tree.payload(node) {
                if m.metadata_state == FetchState::Done {
                    let _ = respond.send(Ok(TaskResult::Done));
                    return;
                }
            }
        }
        if self.cache.message_metadata(&mailbox, uid).is_some() {
            // restore into the tree if the message node exists
            if let Some(list) = self
                .tree
                .find_mailbox(&mailbox)
                .and_then(|m| self.tree.message_list_of(m))
            {
                if let Some(seq) = self.seq_of_uid(list, uid) {
                    fetch::restore_from_cache(
                        &mut self.tree,
                        &mut self.cache,
                        &mailbox,
                        list,
                        seq,
                        uid,
                    );
                }
            }
            let _ = respond.send(Ok(TaskResult::Done));
            return;
        }
        let task = Task::new(
            self.next_task_id,
            TaskKind::Fetch {
                mailbox: mailbox.clone(),
                set: uid.to_string(),
                uid: true,
                items: FetchItems::Metadata,
            },
        )
        .with_target(NodeHandle::Message { mailbox, uid })
        .with_responder(respond);
        let id = self.make_task(task);
        self.queued.push_back(id);
        self.pump();
    }

    fn request_part(&mut self, mailbox: String, uid: u32, part_id: String, respond: Responder) {
        if let Some(data) = self.cache.part(&mailbox, uid, &part_id) {
            if let Some(part) = self.tree.resolve(&NodeHandle::Part {
                mailbox: mailbox.clone(),
                uid,
                part_id: part_id.clone(),
            }) {
                self.tree.set_part_data(part, data.clone());
            }
            let _ = respond.send(Ok(TaskResult::PartData(data)));
            return;
        }
        // top-level multiparts have no fetchable body
        if let Some(part) = self.tree.resolve(&NodeHandle::Part {
            mailbox: mailbox.clone(),
            uid,
            part_id: part_id.clone(),
        }) {
            if let NodePayload::Part(node) = self.tree.payload(part) {
                if !node.fetchable() {
                    let _ = respond.send(Err(raise_error!(
                        format!("part '{part_id}' is a multipart container"),
                        ErrorCode::InvalidParameter
                    )));
                    return;
                }
                if node.fetch_state == FetchState::Loading {
                    // idempotent fetch: attach to the in-flight task
                    // by simply queueing another; the cache hit at
                    // completion makes it cheap
                }
            }
            self.tree.set_part_state(part, FetchState::Loading);
        }
        let task = Task::new(
            self.next_task_id,
            TaskKind::Fetch {
                mailbox: mailbox.clone(),
                set: uid.to_string(),
                uid: true,
                items: FetchItems::Part {
                    part_id: part_id.clone(),
                },
            },
        )
        .with_target(NodeHandle::Part {
            mailbox,
            uid,
            part_id,
        })
        .with_responder(respond);
        let id = self.make_task(task);
        self.queued.push_back(id);
        self.pump();
    }

    fn seq_of_uid(&self, list: crate::modules::tree::NodeId, uid: u32) -> Option<u32> {
        self.tree
            .children(list)
            .iter()
            .position(|&id| matches!(self.tree.payload(id), NodePayload::Message(m) if m.uid == uid))
            .map(|index| (index + 1) as u32)
    }

    fn snapshot(&self, handle: &NodeHandle) -> Option<NodeSnapshot> {
        let id = self.tree.resolve(handle)?;
        Some(match self.tree.payload(id) {
            NodePayload::Mailbox(m) => NodeSnapshot::Mailbox {
                name: m.name.clone(),
                separator: m.separator.clone(),
                flags: m.flags.clone(),
                child_state: m.child_state,
            },
            NodePayload::MessageList(l) => NodeSnapshot::MessageList {
                state: l.state,
                count: self.tree.child_count(id),
            },
            NodePayload::Message(m) => NodeSnapshot::Message {
                uid: m.uid,
                flags: m.flags.clone(),
                envelope: m.envelope.clone(),
                size: m.size,
                metadata_state: m.metadata_state,
            },
            NodePayload::Part(p) => NodeSnapshot::Part {
                part_id: p.part_id.clone(),
                media_type: p.media_type.clone(),
                media_subtype: p.media_subtype.clone(),
                file_name: p.file_name.clone(),
                octets: p.octets,
                has_data: p.data.is_some(),
                fetch_state: p.fetch_state,
            },
        })
    }

    // ── task machinery ───────────────────────────────────────────

    fn make_task(&mut self, mut task: Task) -> TaskId {
        let id = self.next_task_id;
        self.next_task_id += 1;
        task.id = id;
        self.tasks.insert(id, task);
        id
    }

    /// Try to give every queued task a connection; spawn connects and
    /// selects as needed.
    fn pump(&mut self) {
        if self.shutting_down {
            return;
        }
        let mut still_queued = VecDeque::new();
        let queued = std::mem::take(&mut self.queued);

        enum Disposition {
            Skip,
            Defer,
            Select { mailbox: String, mode: SelectMode },
            NeedsMailbox { mailbox: String, mode: SelectMode },
            Plain,
        }

        for task_id in queued {
            let disposition = match self.tasks.get(&task_id) {
                None => Disposition::Skip,
                Some(task) if task.is_finished() => Disposition::Skip,
                Some(_) if !policy::allows_network(self.policy) => Disposition::Defer,
                // a dependent task waits for its prerequisite; finished
                // tasks leave the table, so presence means "pending"
                Some(task)
                    if task
                        .depends_on
                        .map(|dep| self.tasks.contains_key(&dep))
                        .unwrap_or(false) =>
                {
                    Disposition::Defer
                }
                Some(task) => match &task.kind {
                    TaskKind::Select { mailbox, mode } => Disposition::Select {
                        mailbox: mailbox.clone(),
                        mode: mode.clone(),
                    },
                    kind => match kind.required_mailbox() {
                        Some((mailbox, mode)) => Disposition::NeedsMailbox {
                            mailbox: mailbox.to_string(),
                            mode,
                        },
                        None => Disposition::Plain,
                    },
                },
            };

            match disposition {
                Disposition::Skip => {}
                Disposition::Defer => still_queued.push_back(task_id),
                Disposition::Select { mailbox, mode } => {
                    match self.place_select(&mailbox, &mode) {
                        SelectPlacement::AlreadyOpen(exists) => {
                            self.finish_task(task_id, Ok(TaskResult::MailboxOpened { exists }));
                        }
                        SelectPlacement::Activate(sid) => {
                            self.activate_select(task_id, sid, &mailbox, &mode);
                        }
                        SelectPlacement::Wait => still_queued.push_back(task_id),
                    }
                }
                Disposition::NeedsMailbox { mailbox, mode } => {
                    if let Some(sid) = self.find_open_session(&mailbox) {
                        self.activate_on(task_id, sid);
                    } else {
                        self.ensure_mailbox_session(&mailbox, mode);
                        still_queued.push_back(task_id);
                    }
                }
                Disposition::Plain => {
                    if let Some(sid) = self.find_command_session() {
                        self.activate_on(task_id, sid);
                    } else {
                        self.ensure_connection();
                        still_queued.push_back(task_id);
                    }
                }
            }
        }
        // ensure_mailbox_session may have queued fresh SELECTs during
        // the walk; keep those and re-append the deferred tasks
        for task_id in still_queued {
            self.queued.push_back(task_id);
        }
        self.maybe_idle();
    }

    fn find_open_session(&self, mailbox: &str) -> Option<SessionId> {
        self.sessions
            .iter()
            .find(|(_, s)| {
                s.state == ConnectionState::Selected && s.mailbox.as_deref() == Some(mailbox)
            })
            .map(|(&sid, _)| sid)
    }

    fn find_command_session(&self) -> Option<SessionId> {
        self.sessions
            .iter()
            .find(|(_, s)| {
                matches!(
                    s.state,
                    ConnectionState::Authenticated | ConnectionState::Selected
                )
            })
            .map(|(&sid, _)| sid)
    }

    /// Make sure something is working towards having `mailbox` open:
    /// an existing Syncing session, a queued Select, a mode-switch or
    /// a fresh connection.
    fn ensure_mailbox_session(&mut self, mailbox: &str, mode: SelectMode) {
        let already_syncing = self.sessions.values().any(|s| {
            s.state == ConnectionState::Syncing && s.mailbox.as_deref() == Some(mailbox)
        });
        if already_syncing {
            return;
        }
        let select_pending = self.tasks.values().any(|t| {
            !t.is_finished()
                && matches!(&t.kind, TaskKind::Select { mailbox: m, .. } if m == mailbox)
        });
        if select_pending {
            return;
        }
        let task = Task::new(
            self.next_task_id,
            TaskKind::Select {
                mailbox: mailbox.to_string(),
                mode,
            },
        );
        let id = self.make_task(task);
        self.queued.push_back(id);
    }

    /// Where a SELECT should run, in the order the pool prefers:
    /// reuse, mode switch, new parser, steal.
    fn place_select(&mut self, mailbox: &str, mode: &SelectMode) -> SelectPlacement {
        // 1. a parser already in the mailbox with a compatible mode
        if let Some((&sid, session)) = self.sessions.iter().find(|(_, s)| {
            s.state == ConnectionState::Selected && s.mailbox.as_deref() == Some(mailbox)
        }) {
            let compatible = *mode == SelectMode::ReadOnly || !session.read_only;
            if compatible {
                return SelectPlacement::AlreadyOpen(session.pending_sync.exists.unwrap_or(0));
            }
            // 2. right mailbox, wrong mode: re-SELECT on that parser
            return SelectPlacement::Activate(sid);
        }

        // an idle authenticated parser
        if let Some(sid) = self
            .sessions
            .iter()
            .find(|(_, s)| s.state == ConnectionState::Authenticated)
            .map(|(&sid, _)| sid)
        {
            return SelectPlacement::Activate(sid);
        }

        // 3. the pool still has room
        if self.sessions.len() + self.connecting < self.config.max_parsers.max(1) {
            self.ensure_connection();
            return SelectPlacement::Wait;
        }

        // 4. steal an existing parser, cancelling what can be dropped
        let victim = self
            .sessions
            .iter()
            .filter(|(_, s)| s.state == ConnectionState::Selected)
            .map(|(&sid, _)| sid)
            .find(|&sid| !self.session_has_essential_tasks(sid));
        if let Some(sid) = victim {
            self.cancel_non_essential(sid);
            return SelectPlacement::Activate(sid);
        }
        SelectPlacement::Wait
    }

    fn session_has_essential_tasks(&self, sid: SessionId) -> bool {
        self.tasks.values().any(|t| {
            t.session == Some(sid) && t.state == TaskState::Activated && t.is_essential()
        })
    }

    fn cancel_non_essential(&mut self, sid: SessionId) {
        let doomed: Vec<TaskId> = self
            .tasks
            .values()
            .filter(|t| {
                t.session == Some(sid)
                    && t.state == TaskState::Activated
                    && !t.is_essential()
                    && !matches!(t.kind, TaskKind::Idle | TaskKind::Noop)
            })
            .map(|t| t.id)
            .collect();
        for id in doomed {
            self.finish_task(
                id,
                Err(raise_error!(
                    "connection was reassigned to another mailbox".into(),
                    ErrorCode::TaskCancelled
                )),
            );
        }
    }

    fn ensure_connection(&mut self) {
        if self.connecting > 0
            || self.sessions.len() + self.connecting >= self.config.max_parsers.max(1)
        {
            return;
        }
        if self.reconnect_at.is_some() {
            return;
        }
        self.connecting += 1;
        let sid = self.next_session_id;
        self.next_session_id += 1;
        info!(session = sid, "spawning new parser connection");
        pool::spawn_connect(sid, self.config.imap.clone(), self.connect_tx.clone());
    }

    fn on_connect_outcome(&mut self, outcome: ConnectOutcome) {
        self.connecting = self.connecting.saturating_sub(1);
        match outcome.result {
            Ok(EstablishedConnection { transport, caps }) => {
                let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
                let mut session = SessionCore::new(outcome.session, cmd_tx);
                session.state = ConnectionState::Authenticated;
                session.caps = caps;
                tokio::spawn(run_connection(
                    outcome.session,
                    transport,
                    cmd_rx,
                    self.net_tx.clone(),
                ));
                self.sessions.insert(outcome.session, session);
                self.emit(EngineEvent::ConnectionStateChanged {
                    session: outcome.session,
                    state: ConnectionState::Authenticated,
                });
                self.pump();
            }
            Err(err) => {
                warn!(session = outcome.session, "connect failed: {err}");
                self.emit(EngineEvent::TaskFailed {
                    name: "connect".into(),
                    error: err.to_string(),
                });
                if !self.queued.is_empty() {
                    self.reconnect_at = Some(Instant::now() + self.config.reconnect_backoff);
                }
            }
        }
    }

    // ── activation ───────────────────────────────────────────────

    fn leave_idle_if_needed(&mut self, sid: SessionId) {
        let Some(session) = self.sessions.get_mut(&sid) else {
            return;
        };
        if session.idling {
            session.idling = false;
            let _ = session.submit_untagged(&Command::IdleDone);
        }
    }

    fn activate_select(
        &mut self,
        task_id: TaskId,
        sid: SessionId,
        mailbox: &str,
        mode: &SelectMode,
    ) {
        self.leave_idle_if_needed(sid);
        let wire = encode_mailbox_name(mailbox);
        let command = match mode {
            SelectMode::ReadWrite => Command::Select { mailbox: wire },
            SelectMode::ReadOnly => Command::Examine { mailbox: wire },
        };
        let Some(session) = self.sessions.get_mut(&sid) else {
            return;
        };
        session.state = ConnectionState::Syncing;
        session.mailbox = Some(mailbox.to_string());
        session.read_only = *mode == SelectMode::ReadOnly;
        session.clear_sync_scratch();
        match session.submit(&command, task_id) {
            Ok(tag) => {
                if let Some(task) = self.tasks.get_mut(&task_id) {
                    task.state = TaskState::Activated;
                    task.tag = Some(tag);
                    task.session = Some(sid);
                }
                self.sync_stages.insert(sid, SyncStage::AwaitSelect);
                self.sync_select_task.insert(sid, task_id);
                self.emit(EngineEvent::ConnectionStateChanged {
                    session: sid,
                    state: ConnectionState::Syncing,
                });
            }
            Err(err) => self.teardown_session(sid, err),
        }
    }

    /// Submit a non-SELECT task's command on the given session.
    fn activate_on(&mut self, task_id: TaskId, sid: SessionId) {
        self.leave_idle_if_needed(sid);
        let Some(task_kind) = self.tasks.get(&task_id).map(|task| task.kind.clone()) else {
            return;
        };
        let command = match self.build_command(&task_kind) {
            Ok(command) => command,
            Err(err) => {
                self.finish_task(task_id, Err(err));
                return;
            }
        };
        let Some(session) = self.sessions.get_mut(&sid) else {
            self.queued.push_back(task_id);
            return;
        };
        match session.submit(&command, task_id) {
            Ok(tag) => {
                if let Some(task) = self.tasks.get_mut(&task_id) {
                    task.state = TaskState::Activated;
                    task.tag = Some(tag);
                    task.session = Some(sid);
                }
                if matches!(command, Command::Idle) {
                    if let Some(session) = self.sessions.get_mut(&sid) {
                        session.idling = true;
                    }
                }
            }
            Err(err) => self.teardown_session(sid, err),
        }
    }

    fn build_command(&mut self, kind: &TaskKind) -> MailBeamResult<Command> {
        Ok(match kind {
            TaskKind::Capability => Command::Capability,
            TaskKind::Noop => Command::Noop,
            TaskKind::Idle => Command::Idle,
            TaskKind::Logout => Command::Logout,
            TaskKind::StartTls => Command::StartTls,
            TaskKind::Login => Command::Login {
                username: self.config.imap.auth.username.clone(),
                password: self.config.imap.auth.password.clone(),
            },
            TaskKind::List { parent } => {
                let pattern = if parent.is_empty() {
                    "%".to_string()
                } else {
                    let separator = self
                        .tree
                        .find_mailbox(parent)
                        .and_then(|id| match self.tree.payload(id) {
                            NodePayload::Mailbox(m) => m.separator.clone(),
                            _ => None,
                        })
                        .unwrap_or_else(|| "/".to_string());
                    format!("{}{}%", encode_mailbox_name(parent), separator)
                };
                Command::List {
                    reference: String::new(),
                    pattern,
                }
            }
            TaskKind::Status { mailbox } => Command::Status {
                mailbox: encode_mailbox_name(mailbox),
            },
            TaskKind::Select { mailbox, mode } => match mode {
                SelectMode::ReadWrite => Command::Select {
                    mailbox: encode_mailbox_name(mailbox),
                },
                SelectMode::ReadOnly => Command::Examine {
                    mailbox: encode_mailbox_name(mailbox),
                },
            },
            TaskKind::Fetch { set, uid, items, .. } => Command::Fetch {
                set: set.clone(),
                uid: *uid,
                items: items.query(),
            },
            TaskKind::Search { query, .. } => Command::UidSearch {
                query: query.clone(),
            },
            TaskKind::Append {
                mailbox,
                flags,
                internal_date,
                payload,
            } => Command::Append {
                mailbox: encode_mailbox_name(mailbox),
                flags: flags.clone(),
                internal_date: internal_date.clone(),
                payload: payload.clone(),
            },
            TaskKind::GenUrlAuth { url, mechanism } => Command::GenUrlAuth {
                url: url.clone(),
                mechanism: mechanism.clone(),
            },
            TaskKind::UidSubmit {
                mailbox,
                uid_validity,
                uid,
                options,
            } => uid_submit::make_uid_submit_command(
                &mut self.cache,
                mailbox,
                *uid_validity,
                *uid,
                options.clone(),
            )?,
        })
    }

    // ── session events ───────────────────────────────────────────

    fn on_session_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Response(sid, response) => self.on_response(sid, response),
            SessionEvent::Failed(sid, err) => self.teardown_session(sid, err),
        }
    }

    fn on_response(&mut self, sid: SessionId, response: ImapResponse) {
        match response {
            ImapResponse::Done {
                tag,
                status,
                code,
                information,
            } => self.on_tagged(sid, tag, status, code, information),
            ImapResponse::Disconnected { reason } => {
                self.teardown_session(
                    sid,
                    raise_error!(reason, ErrorCode::ConnectionClosed),
                );
            }
            ImapResponse::GenUrlAuth(url) => {
                self.pending_urlauth.insert(sid, url);
            }
            ImapResponse::Continue { .. } => {
                // IDLE acknowledgement; nothing to do
            }
            untagged => {
                let Some(session) = self.sessions.get_mut(&sid) else {
                    return;
                };
                match handle_untagged(session, &untagged) {
                    Ok(actions) => self.apply_actions(sid, actions),
                    Err(err) => {
                        // protocol violation: the connection is done for
                        self.teardown_session(sid, err);
                    }
                }
            }
        }
    }

    fn on_tagged(
        &mut self,
        sid: SessionId,
        tag: String,
        status: StatusKind,
        code: Option<RespCode>,
        information: Option<String>,
    ) {
        let Some(session) = self.sessions.get_mut(&sid) else {
            return;
        };
        let Some(task_id) = session.command_map.remove(&tag) else {
            debug!(session = sid, tag, "tagged response for unknown tag");
            return;
        };
        if let Some(RespCode::Capabilities(list)) = &code {
            session.caps.replace(list);
        }
        if let Some(RespCode::Alert) = &code {
            self.emit(EngineEvent::Alert(
                information.clone().unwrap_or_default(),
            ));
        }

        let Some(task) = self.tasks.get(&task_id) else {
            return;
        };
        if task.state == TaskState::Cancelled {
            // cancelled tasks ignore their late completions
            self.tasks.remove(&task_id);
            return;
        }

        if task.sync_step {
            self.advance_sync(sid, task_id, status, information);
            return;
        }

        let kind = task.kind.clone();
        match kind {
            TaskKind::Select { .. } => {
                self.on_select_done(sid, task_id, status, code, information)
            }
            TaskKind::List { parent } => {
                let result = if status == StatusKind::Ok {
                    let session = self.sessions.get_mut(&sid).expect("session vanished");
                    list::complete_list(&mut self.tree, &mut self.cache, session, &parent)
                        .map(TaskResult::Mailboxes)
                } else {
                    Err(command_failed("LIST", &information))
                };
                self.finish_task(task_id, result);
            }
            TaskKind::Status { mailbox } => {
                let result = if status == StatusKind::Ok {
                    let session = self.sessions.get_mut(&sid).expect("session vanished");
                    status::complete_status(&mut self.tree, &mut self.cache, session, &mailbox)
                        .map(|_| TaskResult::Done)
                } else {
                    Err(command_failed("STATUS", &information))
                };
                self.finish_task(task_id, result);
            }
            TaskKind::Fetch { mailbox, items, .. } => {
                let result = if status == StatusKind::Ok {
                    match items {
                        FetchItems::Part { part_id } => {
                            let target_uid = match &self.tasks[&task_id].target {
                                Some(NodeHandle::Part { uid, .. }) => *uid,
                                _ => 0,
                            };
                            match self.cache.part(&mailbox, target_uid, &part_id) {
                                Some(data) => Ok(TaskResult::PartData(data)),
                                None => Err(raise_error!(
                                    format!("server returned no data for part {part_id}"),
                                    ErrorCode::ImapCommandFailed
                                )),
                            }
                        }
                        _ => Ok(TaskResult::Done),
                    }
                } else {
                    Err(command_failed("FETCH", &information))
                };
                self.finish_task(task_id, result);
                self.persist_uid_map(sid);
            }
            TaskKind::Search { .. } => {
                // non-sync searches have no consumer yet
                self.finish_task(task_id, Ok(TaskResult::Done));
            }
            TaskKind::Append { .. } => {
                let result = append::interpret_append_done(status, &code, &information);
                self.finish_task(task_id, result);
            }
            TaskKind::GenUrlAuth { .. } => {
                let result = if status == StatusKind::Ok {
                    match self.pending_urlauth.remove(&sid) {
                        Some(url) => Ok(TaskResult::UrlAuth(url)),
                        None => Err(raise_error!(
                            "GENURLAUTH completed without a URL".into(),
                            ErrorCode::ProtocolViolation
                        )),
                    }
                } else {
                    Err(command_failed("GENURLAUTH", &information))
                };
                self.finish_task(task_id, result);
            }
            TaskKind::UidSubmit { .. } => {
                let result = if status == StatusKind::Ok {
                    Ok(TaskResult::Done)
                } else {
                    Err(command_failed("UID SUBMIT", &information))
                };
                self.finish_task(task_id, result);
            }
            TaskKind::Noop | TaskKind::Idle | TaskKind::Logout | TaskKind::Capability
            | TaskKind::StartTls | TaskKind::Login => {
                let result = if status == StatusKind::Ok {
                    Ok(TaskResult::Done)
                } else {
                    Err(command_failed(kind.compact_name().as_str(), &information))
                };
                self.finish_task(task_id, result);
            }
        }
        self.pump();
    }

    fn finish_task(&mut self, task_id: TaskId, result: Result<TaskResult, MailBeamError>) {
        let Some(mut task) = self.tasks.remove(&task_id) else {
            return;
        };
        match &result {
            Ok(_) => {
                task.state = TaskState::Completed;
            }
            Err(err) => {
                task.state = if err.code() == ErrorCode::TaskCancelled {
                    TaskState::Cancelled
                } else {
                    TaskState::Failed
                };
                self.emit(EngineEvent::TaskFailed {
                    name: task.kind.compact_name(),
                    error: err.to_string(),
                });
            }
        }
        task.respond(result);
    }

    // ── untagged action application ──────────────────────────────

    fn apply_actions(&mut self, sid: SessionId, actions: Vec<HandlerAction>) {
        for action in actions {
            match action {
                HandlerAction::CapabilitiesChanged => {}
                HandlerAction::Alert(text) => self.emit(EngineEvent::Alert(text)),
                HandlerAction::ConnectionClosing => {
                    self.teardown_session(
                        sid,
                        raise_error!(
                            "server is closing the connection".into(),
                            ErrorCode::ConnectionClosed
                        ),
                    );
                    return;
                }
                HandlerAction::ApplyExpunge(seq) => self.apply_expunge(sid, seq),
                HandlerAction::ApplyExists(count) => self.apply_exists(sid, count),
                HandlerAction::ApplyRecent(count) => {
                    if let Some(session) = self.sessions.get_mut(&sid) {
                        session.pending_sync.recent = Some(count);
                    }
                }
                HandlerAction::ApplyFetch { seq, attrs } => {
                    self.apply_selected_fetch(sid, seq, &attrs)
                }
                HandlerAction::SearchResults(uids) => {
                    if let Some(stage) = self.sync_stages.get_mut(&sid) {
                        match stage {
                            SyncStage::FullSearch { uids: buffer }
                            | SyncStage::ReconcileSearch { uids: buffer, .. } => {
                                buffer.extend(uids)
                            }
                            _ => debug!(session = sid, "search results outside a sync listing"),
                        }
                    }
                }
            }
        }
    }

    fn selected_mailbox_list(
        &self,
        sid: SessionId,
    ) -> Option<(String, crate::modules::tree::NodeId)> {
        let session = self.sessions.get(&sid)?;
        let mailbox = session.mailbox.clone()?;
        let node = self.tree.find_mailbox(&mailbox)?;
        let list = self.tree.message_list_of(node)?;
        Some((mailbox, list))
    }

    fn apply_expunge(&mut self, sid: SessionId, seq: u32) {
        let Some((mailbox, list)) = self.selected_mailbox_list(sid) else {
            return;
        };
        let removed = self.tree.apply_expunge(list, seq);
        if let Some(session) = self.sessions.get_mut(&sid) {
            let exists = session.pending_sync.exists.unwrap_or(0).saturating_sub(1);
            session.pending_sync.exists = Some(exists);
            let state = session.pending_sync.clone();
            self.cache.set_sync_state(&mailbox, &state);
        }
        // drop the expunged UID from the persisted map
        if let Some(mut uids) = self.cache.uid_map(&mailbox) {
            let index = (seq as usize).saturating_sub(1);
            if index < uids.len() {
                uids.remove(index);
                self.cache.set_uid_map(&mailbox, &uids);
            }
        }
        // pending fetches addressing the removed message are gone
        if let Some(victim) = removed {
            let doomed: Vec<TaskId> = self
                .tasks
                .values()
                .filter(|t| !t.is_finished() && t.target.as_ref() == Some(&victim))
                .map(|t| t.id)
                .collect();
            for id in doomed {
                self.finish_task(
                    id,
                    Err(raise_error!(
                        "message was expunged".into(),
                        ErrorCode::TargetGone
                    )),
                );
            }
        }
    }

    fn apply_exists(&mut self, sid: SessionId, count: u32) {
        let Some((mailbox, list)) = self.selected_mailbox_list(sid) else {
            return;
        };
        let current = self.tree.child_count(list);
        if (count as usize) > current {
            let new_first_seq = current as u32 + 1;
            self.tree.grow_message_list(list, count as usize - current);
            // learn the new arrivals' UIDs and flags
            let task = Task::new(
                self.next_task_id,
                TaskKind::Fetch {
                    mailbox: mailbox.clone(),
                    set: format!("{new_first_seq}:{count}"),
                    uid: false,
                    items: FetchItems::UidFlags,
                },
            );
            let id = self.make_task(task);
            self.activate_on(id, sid);
        }
        if let Some(session) = self.sessions.get_mut(&sid) {
            session.pending_sync.exists = Some(count);
            let state = session.pending_sync.clone();
            self.cache.set_sync_state(&mailbox, &state);
        }
    }

    fn apply_selected_fetch(&mut self, sid: SessionId, seq: u32, attrs: &[FetchAttr]) {
        let Some((mailbox, list)) = self.selected_mailbox_list(sid) else {
            return;
        };
        match fetch::apply_fetch(&mut self.tree, &mut self.cache, &mailbox, list, seq, attrs) {
            Ok(_) => {}
            Err(err) if err.code() == ErrorCode::UnknownMessageIndex => {
                // fail whatever task asked for it, keep the connection
                warn!(session = sid, seq, "fetch for unknown message index");
                let doomed: Vec<TaskId> = self
                    .tasks
                    .values()
                    .filter(|t| {
                        t.session == Some(sid)
                            && t.state == TaskState::Activated
                            && matches!(t.kind, TaskKind::Fetch { .. })
                    })
                    .map(|t| t.id)
                    .collect();
                for id in doomed {
                    self.finish_task(
                        id,
                        Err(raise_error!(
                            format!("FETCH for unknown sequence {seq}"),
                            ErrorCode::UnknownMessageIndex
                        )),
                    );
                }
            }
            Err(err) => self.teardown_session(sid, err),
        }
    }

    /// Rewrite the cached uid map from the live tree once every
    /// message has a known UID.
    fn persist_uid_map(&mut self, sid: SessionId) {
        let Some((mailbox, list)) = self.selected_mailbox_list(sid) else {
            return;
        };
        let uids: Vec<u32> = self
            .tree
            .children(list)
            .iter()
            .filter_map(|&id| match self.tree.payload(id) {
                NodePayload::Message(m) => Some(m.uid),
                _ => None,
            })
            .collect();
        if !uids.is_empty() && uids.iter().all(|&uid| uid != 0) {
            self.cache.set_uid_map(&mailbox, &uids);
        }
    }

    // ── sync orchestration ───────────────────────────────────────

    fn on_select_done(
        &mut self,
        sid: SessionId,
        _task_id: TaskId,
        status: StatusKind,
        code: Option<RespCode>,
        information: Option<String>,
    ) {
        if status != StatusKind::Ok {
            self.abort_sync(sid, command_failed("SELECT", &information));
            return;
        }
        let Some(session) = self.sessions.get_mut(&sid) else {
            return;
        };
        // the tagged OK may carry READ-WRITE or late counters
        match &code {
            Some(RespCode::ReadOnly) => session.read_only = true,
            Some(RespCode::ReadWrite) => session.read_only = false,
            Some(RespCode::UidNext(n)) => session.pending_sync.uid_next = Some(*n),
            Some(RespCode::UidValidity(n)) => session.pending_sync.uid_validity = Some(*n),
            _ => {}
        }
        let mailbox = session.mailbox.clone().unwrap_or_default();
        let server_state = session.pending_sync.clone();
        let uidplus = session.caps.uidplus();

        if !server_state.is_usable_for_syncing() {
            self.abort_sync(
                sid,
                raise_error!(
                    format!("SELECT of '{mailbox}' finished without its mandatory counters"),
                    ErrorCode::ProtocolViolation
                ),
            );
            return;
        }

        match sync::decide(&mut self.cache, &mailbox, &server_state, uidplus) {
            sync::SyncDecision::UpToDate { cached_uids } => {
                let session = self.sessions.get(&sid).expect("session vanished");
                if let Err(err) = sync::apply_cached_view(
                    &mut self.tree,
                    &mut self.cache,
                    session,
                    &mailbox,
                    cached_uids,
                ) {
                    self.abort_sync(sid, err);
                    return;
                }
                self.finish_sync(sid);
            }
            sync::SyncDecision::Full { use_search } => {
                if use_search {
                    self.spawn_sync_step(
                        sid,
                        TaskKind::Search {
                            mailbox: mailbox.clone(),
                            query: "ALL".into(),
                        },
                        SyncStage::FullSearch { uids: Vec::new() },
                    );
                } else {
                    self.spawn_sync_step(
                        sid,
                        TaskKind::Fetch {
                            mailbox: mailbox.clone(),
                            set: "1:*".into(),
                            uid: true,
                            items: FetchItems::UidFlags,
                        },
                        SyncStage::FullFetch,
                    );
                }
            }
            sync::SyncDecision::Incremental { cached_uids } => {
                let start = sync::incremental_fetch_start(&mut self.cache, &mailbox);
                self.spawn_sync_step(
                    sid,
                    TaskKind::Fetch {
                        mailbox: mailbox.clone(),
                        set: format!("{start}:*"),
                        uid: true,
                        items: FetchItems::UidFlags,
                    },
                    SyncStage::Incremental { cached_uids },
                );
            }
            sync::SyncDecision::Reconcile { cached_uids } => {
                self.spawn_sync_step(
                    sid,
                    TaskKind::Search {
                        mailbox: mailbox.clone(),
                        query: "ALL".into(),
                    },
                    SyncStage::ReconcileSearch {
                        cached_uids,
                        uids: Vec::new(),
                    },
                );
            }
        }
    }

    fn spawn_sync_step(&mut self, sid: SessionId, kind: TaskKind, stage: SyncStage) {
        let task = Task::new(self.next_task_id, kind).as_sync_step();
        let id = self.make_task(task);
        self.sync_stages.insert(sid, stage);
        self.activate_on(id, sid);
    }

    fn advance_sync(
        &mut self,
        sid: SessionId,
        task_id: TaskId,
        status: StatusKind,
        information: Option<String>,
    ) {
        self.tasks.remove(&task_id);
        if status != StatusKind::Ok {
            self.abort_sync(sid, command_failed("mailbox sync", &information));
            return;
        }
        let Some(stage) = self.sync_stages.remove(&sid) else {
            return;
        };
        let Some(session) = self.sessions.get(&sid) else {
            return;
        };
        let mailbox = session.mailbox.clone().unwrap_or_default();

        let fetched_uids: Vec<u32> = session
            .uid_map
            .iter()
            .copied()
            .filter(|&uid| uid != 0)
            .collect();

        let result = match stage {
            SyncStage::AwaitSelect => return,
            SyncStage::FullSearch { uids } => sync::apply_full_listing(
                &mut self.tree,
                &mut self.cache,
                session,
                &mailbox,
                uids,
            ),
            SyncStage::FullFetch => sync::apply_full_listing(
                &mut self.tree,
                &mut self.cache,
                session,
                &mailbox,
                fetched_uids,
            ),
            SyncStage::Incremental { cached_uids } => sync::apply_incremental_tail(
                &mut self.tree,
                &mut self.cache,
                session,
                &mailbox,
                cached_uids,
                &fetched_uids,
            ),
            SyncStage::ReconcileSearch { cached_uids, uids } => sync::apply_reconcile(
                &mut self.tree,
                &mut self.cache,
                session,
                &mailbox,
                cached_uids,
                uids,
            ),
        };
        match result {
            Ok(()) => self.finish_sync(sid),
            Err(err) => self.abort_sync(sid, err),
        }
    }

    fn finish_sync(&mut self, sid: SessionId) {
        self.sync_stages.remove(&sid);
        let Some(session) = self.sessions.get_mut(&sid) else {
            return;
        };
        let mailbox = session.mailbox.clone().unwrap_or_default();
        // the server numbers messages by the view we just built
        let exists = session.pending_sync.exists.unwrap_or(0);

        if let Err(err) = {
            let session = self.sessions.get_mut(&sid).expect("session vanished");
            sync::finalize(&mut self.tree, &mut self.cache, session, &mailbox)
        } {
            self.abort_sync(sid, err);
            return;
        }

        let deferred = {
            let session = self.sessions.get_mut(&sid).expect("session vanished");
            std::mem::take(&mut session.deferred)
        };
        self.emit(EngineEvent::ConnectionStateChanged {
            session: sid,
            state: ConnectionState::Selected,
        });
        self.emit(EngineEvent::MailboxSynced {
            mailbox: mailbox.clone(),
            exists,
        });
        if let Some(select_task) = self.sync_select_task.remove(&sid) {
            self.finish_task(select_task, Ok(TaskResult::MailboxOpened { exists }));
        }
        // whatever arrived mid-sync belongs to the Selected state now
        for response in deferred {
            self.on_response(sid, response);
        }
        self.pump();
    }

    fn abort_sync(&mut self, sid: SessionId, err: MailBeamError) {
        self.sync_stages.remove(&sid);
        if let Some(select_task) = self.sync_select_task.remove(&sid) {
            self.finish_task(select_task, Err(err.clone_shallow()));
        }
        if err.is_connection_fatal() {
            self.teardown_session(sid, err);
            return;
        }
        if let Some(session) = self.sessions.get_mut(&sid) {
            session.state = ConnectionState::Authenticated;
            session.mailbox = None;
            session.clear_sync_scratch();
        }
        self.pump();
    }

    // ── lifecycle ────────────────────────────────────────────────

    fn teardown_session(&mut self, sid: SessionId, err: MailBeamError) {
        if self.sessions.remove(&sid).is_none() {
            return;
        }
        warn!(session = sid, "tearing down connection: {err}");
        self.sync_stages.remove(&sid);
        self.sync_select_task.remove(&sid);
        self.pending_urlauth.remove(&sid);

        // in-flight tasks die with the connection; queued ones stay
        let in_flight: Vec<TaskId> = self
            .tasks
            .values()
            .filter(|t| t.session == Some(sid) && t.state == TaskState::Activated)
            .map(|t| t.id)
            .collect();
        for id in in_flight {
            self.finish_task(id, Err(err.clone_shallow()));
        }
        self.emit(EngineEvent::ConnectionStateChanged {
            session: sid,
            state: ConnectionState::LoggingOut,
        });
        if !self.queued.is_empty() && !self.shutting_down {
            self.reconnect_at = Some(Instant::now() + self.config.reconnect_backoff);
        }
    }

    fn on_noop_tick(&mut self) {
        if self.shutting_down {
            return;
        }
        let idle_sessions: Vec<SessionId> = self
            .sessions
            .iter()
            .filter(|(_, s)| {
                s.command_map.is_empty()
                    && !s.idling
                    && matches!(
                        s.state,
                        ConnectionState::Authenticated | ConnectionState::Selected
                    )
            })
            .map(|(&sid, _)| sid)
            .collect();
        for sid in idle_sessions {
            let task = Task::new(self.next_task_id, TaskKind::Noop);
            let id = self.make_task(task);
            self.activate_on(id, sid);
        }
    }

    /// Park idle selected sessions in IDLE when the server offers it.
    fn maybe_idle(&mut self) {
        if self.shutting_down || !self.queued.is_empty() {
            return;
        }
        let candidates: Vec<SessionId> = self
            .sessions
            .iter()
            .filter(|(_, s)| {
                s.state == ConnectionState::Selected
                    && !s.idling
                    && s.command_map.is_empty()
                    && s.caps.idle()
            })
            .map(|(&sid, _)| sid)
            .collect();
        for sid in candidates {
            let task = Task::new(self.next_task_id, TaskKind::Idle);
            let id = self.make_task(task);
            self.activate_on(id, sid);
        }
    }

    fn emit(&self, event: EngineEvent) {
        let _ = self.events.send(event);
    }

    fn flush_events(&mut self) {
        let tree_events = self.tree.take_events();
        if !tree_events.is_empty() {
            self.emit(EngineEvent::TreeChanged(tree_events));
        }
        if let Some(warning) = self.cache.take_degradation_warning() {
            self.emit(EngineEvent::CacheDegraded(warning));
        }
    }
}

enum SelectPlacement {
    AlreadyOpen(u32),
    Activate(SessionId),
    Wait,
}

fn command_failed(what: &str, information: &Option<String>) -> MailBeamError {
    raise_error!(
        format!(
            "{what} failed: {}",
            information.as_deref().unwrap_or("no reason given")
        ),
        ErrorCode::ImapCommandFailed
    )
}

impl MailBeamError {
    /// Duplicate the error for fan-out to several tasks.
    fn clone_shallow(&self) -> MailBeamError {
        raise_error!(self.message().to_string(), self.code())
    }
}
