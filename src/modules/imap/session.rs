// Copyright © 2026 mailbeam.dev
// Licensed under MailBeam License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

//! Per-connection session state and the connection actor.
//!
//! A session splits in two: [`SessionCore`] is the data record the
//! engine owns (state, capabilities, tag map, reply accumulators), and
//! [`run_connection`] is the actor task that owns the transport,
//! frames responses, forwards them to the engine loop and gates
//! literal chunks on continuation requests.

use crate::modules::cache::SyncState;
use crate::modules::error::{code::ErrorCode, MailBeamError, MailBeamResult};
use crate::modules::imap::capabilities::CapabilitySet;
use crate::modules::imap::command::{serialize, Command, TagGenerator, WireChunk};
use crate::modules::imap::response::{ImapResponse, StatusItem};
use crate::modules::imap::transport::Transport;
use crate::modules::state::ConnectionState;
use crate::modules::tasks::TaskId;
use crate::raise_error;
use ahash::AHashMap;
use std::collections::VecDeque;
use tokio::sync::mpsc;
use tracing::{debug, warn};

pub type SessionId = u32;

/// One LIST reply line, accumulated while a List task is active.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ListReply {
    pub attributes: Vec<String>,
    pub delimiter: Option<String>,
    /// Wire (modified UTF-7) name.
    pub name: String,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StatusReply {
    pub mailbox: String,
    pub items: Vec<StatusItem>,
}

/// Events the connection actor forwards into the engine loop.
#[derive(Debug)]
pub enum SessionEvent {
    Response(SessionId, ImapResponse),
    Failed(SessionId, MailBeamError),
}

/// The engine-side record for one parser connection.
#[derive(Debug)]
pub struct SessionCore {
    pub id: SessionId,
    pub state: ConnectionState,
    /// Wire name of the selected mailbox, if any.
    pub mailbox: Option<String>,
    pub read_only: bool,
    pub caps: CapabilitySet,
    tags: TagGenerator,
    /// Outstanding command tags and the tasks that own them.
    pub command_map: AHashMap<String, TaskId>,
    pub list_replies: Vec<ListReply>,
    pub status_replies: Vec<StatusReply>,
    /// SyncState under construction while Selecting.
    pub pending_sync: SyncState,
    /// Sequence → UID map assembled during sync.
    pub uid_map: Vec<u32>,
    /// Flags seen during sync, keyed by UID.
    pub syncing_flags: AHashMap<u32, Vec<String>>,
    /// Responses that arrived while Selecting but belong to the
    /// post-SELECT sync phase.
    pub deferred: Vec<ImapResponse>,
    pub idling: bool,
    cmd_tx: mpsc::UnboundedSender<Vec<WireChunk>>,
}

impl SessionCore {
    pub fn new(id: SessionId, cmd_tx: mpsc::UnboundedSender<Vec<WireChunk>>) -> Self {
        Self {
            id,
            state: ConnectionState::Established,
            mailbox: None,
            read_only: false,
            caps: CapabilitySet::new(),
            tags: TagGenerator::new(),
            command_map: AHashMap::new(),
            list_replies: Vec::new(),
            status_replies: Vec::new(),
            pending_sync: SyncState::default(),
            uid_map: Vec::new(),
            syncing_flags: AHashMap::new(),
            deferred: Vec::new(),
            idling: false,
            cmd_tx,
        }
    }

    /// Serialize and hand a command to the connection actor. Returns
    /// the tag the completion will carry.
    pub fn submit(&mut self, command: &Command, task: TaskId) -> MailBeamResult<String> {
        let tag = self.tags.next_tag();
        let chunks = serialize(command, &tag, self.caps.literal_plus());
        debug!(
            session = self.id,
            tag, verb = command.verb(), "submitting command"
        );
        self.cmd_tx.send(chunks).map_err(|_| {
            raise_error!(
                "connection actor is gone".into(),
                ErrorCode::ConnectionClosed
            )
        })?;
        self.command_map.insert(tag.clone(), task);
        Ok(tag)
    }

    /// Untagged submission used only for the IDLE `DONE` line.
    pub fn submit_untagged(&mut self, command: &Command) -> MailBeamResult<()> {
        let chunks = serialize(command, "", self.caps.literal_plus());
        self.cmd_tx.send(chunks).map_err(|_| {
            raise_error!(
                "connection actor is gone".into(),
                ErrorCode::ConnectionClosed
            )
        })
    }

    /// Drop all per-sync scratch state, typically after the sync
    /// finished or the mailbox was abandoned.
    pub fn clear_sync_scratch(&mut self) {
        self.pending_sync = SyncState::default();
        self.uid_map.clear();
        self.syncing_flags.clear();
        self.deferred.clear();
    }
}

/// The connection actor: owns the transport, pumps responses to the
/// engine and writes queued command chunks, holding back anything
/// behind a synchronizing literal until the server's `+` arrives.
pub async fn run_connection(
    id: SessionId,
    mut transport: Transport,
    mut cmd_rx: mpsc::UnboundedReceiver<Vec<WireChunk>>,
    event_tx: mpsc::UnboundedSender<SessionEvent>,
) {
    let mut pending: VecDeque<WireChunk> = VecDeque::new();
    let mut awaiting_continuation = false;

    loop {
        // flush anything writable before blocking
        while !awaiting_continuation {
            let Some(chunk) = pending.pop_front() else {
                break;
            };
            awaiting_continuation = chunk.wait_for_continuation;
            if let Err(err) = transport.send(&chunk).await {
                let _ = event_tx.send(SessionEvent::Failed(id, err));
                return;
            }
        }

        tokio::select! {
            outgoing = cmd_rx.recv() => {
                match outgoing {
                    Some(chunks) => pending.extend(chunks),
                    // engine dropped the session; stop quietly
                    None => return,
                }
            }
            response = transport.read_response() => {
                match response {
                    Ok(ImapResponse::Continue { information }) => {
                        if awaiting_continuation {
                            awaiting_continuation = false;
                        } else {
                            // IDLE acknowledgement or a server quirk;
                            // the engine decides
                            let _ = event_tx.send(SessionEvent::Response(
                                id,
                                ImapResponse::Continue { information },
                            ));
                        }
                    }
                    Ok(terminal @ ImapResponse::Disconnected { .. }) => {
                        let _ = event_tx.send(SessionEvent::Response(id, terminal));
                        return;
                    }
                    Ok(other) => {
                        if event_tx.send(SessionEvent::Response(id, other)).is_err() {
                            return;
                        }
                    }
                    Err(err) => {
                        warn!(session = id, "transport failed: {err}");
                        let _ = event_tx.send(SessionEvent::Failed(id, err));
                        return;
                    }
                }
            }
        }
    }
}

/// Fold SELECT-style untagged data into a SyncState accumulator.
pub fn absorb_sync_item(sync: &mut SyncState, item: &StatusItem) {
    match item {
        StatusItem::Messages(n) => sync.exists = Some(*n),
        StatusItem::Recent(n) => sync.recent = Some(*n),
        StatusItem::UidNext(n) => sync.uid_next = Some(*n),
        StatusItem::UidValidity(n) => sync.uid_validity = Some(*n),
        StatusItem::Unseen(n) => sync.unseen = Some(*n),
        StatusItem::Other(_) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn submit_registers_tag_ownership() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut session = SessionCore::new(1, tx);
        let tag = session.submit(&Command::Capability, 7).unwrap();
        assert_eq!(tag, "y1");
        assert_eq!(session.command_map.get("y1"), Some(&7));
        let chunks = rx.try_recv().unwrap();
        assert_eq!(chunks[0].bytes, b"y1 CAPABILITY\r\n".to_vec());
    }

    #[test]
    fn tags_are_unique_per_session() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut session = SessionCore::new(1, tx);
        let a = session.submit(&Command::Noop, 1).unwrap();
        let b = session.submit(&Command::Noop, 2).unwrap();
        assert_ne!(a, b);
        assert_eq!(session.command_map.len(), 2);
    }
}
