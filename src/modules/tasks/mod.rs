// Copyright © 2026 mailbeam.dev
// Licensed under MailBeam License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

//! The task subsystem: every IMAP operation the engine performs is a
//! task that owns one command tag, optionally targets a tree node, and
//! reports completion or failure to its initiator. Dependent tasks
//! wait for their prerequisite before activating; tasks needing a
//! mailbox claim a parser connection through the engine's pool.

use crate::modules::cache::MailboxDescriptor;
use crate::modules::error::MailBeamError;
use crate::modules::imap::command::{AppendPayload, SelectMode};
use crate::modules::imap::session::SessionId;
use crate::modules::tree::NodeHandle;
use tokio::sync::oneshot;

pub mod append;
pub mod fetch;
pub mod genurlauth;
pub mod list;
pub mod status;
pub mod uid_submit;

pub type TaskId = u64;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TaskState {
    Created,
    /// Command issued; its tag is registered on a session.
    Activated,
    Completed,
    Failed,
    Cancelled,
}

/// What a finished task hands back to its initiator.
#[derive(Clone, Debug, PartialEq)]
pub enum TaskResult {
    Done,
    Mailboxes(Vec<MailboxDescriptor>),
    /// A mailbox finished its post-SELECT sync.
    MailboxOpened { exists: u32 },
    /// APPENDUID data; both absent when the server lacks UIDPLUS.
    Append {
        uid_validity: Option<u32>,
        uid: Option<u32>,
    },
    UrlAuth(String),
    PartData(Vec<u8>),
}

#[derive(Clone, Debug, PartialEq)]
pub enum FetchItems {
    /// `(ENVELOPE BODYSTRUCTURE RFC822.SIZE)` plus UID and FLAGS.
    Metadata,
    /// `BODY.PEEK[<part_id>]`.
    Part { part_id: String },
    /// `(UID FLAGS)`, the sync workhorse.
    UidFlags,
}

impl FetchItems {
    pub fn query(&self) -> String {
        match self {
            FetchItems::Metadata => {
                "(UID FLAGS ENVELOPE BODYSTRUCTURE RFC822.SIZE INTERNALDATE)".into()
            }
            FetchItems::Part { part_id } => format!("(UID BODY.PEEK[{part_id}])"),
            FetchItems::UidFlags => "(UID FLAGS)".into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum TaskKind {
    StartTls,
    Login,
    Capability,
    /// LIST the children of one mailbox (empty = top level).
    List { parent: String },
    Status { mailbox: String },
    Select { mailbox: String, mode: SelectMode },
    Fetch {
        mailbox: String,
        set: String,
        uid: bool,
        items: FetchItems,
    },
    /// UID SEARCH, used by the sync reconciliation paths.
    Search { mailbox: String, query: String },
    Append {
        mailbox: String,
        flags: Option<String>,
        internal_date: Option<String>,
        payload: AppendPayload,
    },
    GenUrlAuth {
        url: String,
        mechanism: String,
    },
    UidSubmit {
        mailbox: String,
        uid_validity: u32,
        uid: u32,
        options: Vec<(String, String)>,
    },
    Noop,
    Idle,
    Logout,
}

impl TaskKind {
    /// Mailbox this task must have selected before it can run; `None`
    /// runs in any authenticated session.
    pub fn required_mailbox(&self) -> Option<(&str, SelectMode)> {
        match self {
            TaskKind::Fetch { mailbox, .. } => Some((mailbox, SelectMode::ReadOnly)),
            TaskKind::Search { mailbox, .. } => Some((mailbox, SelectMode::ReadOnly)),
            TaskKind::UidSubmit { mailbox, .. } => Some((mailbox, SelectMode::ReadOnly)),
            TaskKind::Select { mailbox, mode } => Some((mailbox, mode.clone())),
            _ => None,
        }
    }

    /// Short label for progress reporting.
    pub fn compact_name(&self) -> String {
        match self {
            TaskKind::StartTls => "Negotiating encryption".into(),
            TaskKind::Login => "Logging in".into(),
            TaskKind::Capability => "Checking capabilities".into(),
            TaskKind::List { parent } if parent.is_empty() => "Listing mailboxes".into(),
            TaskKind::List { parent } => format!("Listing mailboxes in {parent}"),
            TaskKind::Status { mailbox } => format!("Checking {mailbox}"),
            TaskKind::Select { mailbox, .. } => format!("Opening {mailbox}"),
            TaskKind::Fetch { mailbox, .. } => format!("Fetching from {mailbox}"),
            TaskKind::Search { mailbox, .. } => format!("Searching {mailbox}"),
            TaskKind::Append { mailbox, .. } => format!("Saving into {mailbox}"),
            TaskKind::GenUrlAuth { .. } => "Requesting message URL".into(),
            TaskKind::UidSubmit { .. } => "Sending mail".into(),
            TaskKind::Noop => "Keeping connection alive".into(),
            TaskKind::Idle => "Waiting for updates".into(),
            TaskKind::Logout => "Logging out".into(),
        }
    }
}

#[derive(Debug)]
pub struct Task {
    pub id: TaskId,
    pub kind: TaskKind,
    pub state: TaskState,
    /// Tag of the issued command, once activated.
    pub tag: Option<String>,
    pub session: Option<SessionId>,
    /// Tree node this task populates, if any.
    pub target: Option<NodeHandle>,
    /// Task that must complete before this one activates.
    pub depends_on: Option<TaskId>,
    /// Channel back to the initiator; `None` for fire-and-forget
    /// internal tasks.
    pub responder: Option<oneshot::Sender<Result<TaskResult, MailBeamError>>>,
    /// True when this task is an internal step of a mailbox sync; its
    /// completion advances the sync stage instead of finishing a
    /// caller-visible operation.
    pub sync_step: bool,
}

impl Task {
    pub fn new(id: TaskId, kind: TaskKind) -> Self {
        Self {
            id,
            kind,
            state: TaskState::Created,
            tag: None,
            session: None,
            target: None,
            depends_on: None,
            responder: None,
            sync_step: false,
        }
    }

    pub fn as_sync_step(mut self) -> Self {
        self.sync_step = true;
        self
    }

    pub fn with_target(mut self, target: NodeHandle) -> Self {
        self.target = Some(target);
        self
    }

    pub fn with_responder(
        mut self,
        responder: oneshot::Sender<Result<TaskResult, MailBeamError>>,
    ) -> Self {
        self.responder = Some(responder);
        self
    }

    pub fn is_finished(&self) -> bool {
        matches!(
            self.state,
            TaskState::Completed | TaskState::Failed | TaskState::Cancelled
        )
    }

    /// Tell the initiator how it went. Harmless if nobody listens.
    pub fn respond(&mut self, result: Result<TaskResult, MailBeamError>) {
        if let Some(responder) = self.responder.take() {
            let _ = responder.send(result);
        }
    }

    /// Tasks that merely read data can be cancelled when the engine
    /// needs their connection; appends and submissions cannot.
    pub fn is_essential(&self) -> bool {
        matches!(
            self.kind,
            TaskKind::Append { .. }
                | TaskKind::UidSubmit { .. }
                | TaskKind::GenUrlAuth { .. }
                | TaskKind::Logout
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fetch_queries_match_the_wire_forms() {
        assert_eq!(
            FetchItems::Metadata.query(),
            "(UID FLAGS ENVELOPE BODYSTRUCTURE RFC822.SIZE INTERNALDATE)"
        );
        assert_eq!(
            FetchItems::Part {
                part_id: "2.1".into()
            }
            .query(),
            "(UID BODY.PEEK[2.1])"
        );
        assert_eq!(FetchItems::UidFlags.query(), "(UID FLAGS)");
    }

    #[test]
    fn essential_tasks_survive_connection_stealing() {
        let append = Task::new(
            1,
            TaskKind::Append {
                mailbox: "Sent".into(),
                flags: None,
                internal_date: None,
                payload: AppendPayload::Literal(vec![]),
            },
        );
        let fetch = Task::new(
            2,
            TaskKind::Fetch {
                mailbox: "INBOX".into(),
                set: "1".into(),
                uid: false,
                items: FetchItems::Metadata,
            },
        );
        assert!(append.is_essential());
        assert!(!fetch.is_essential());
    }

    #[test]
    fn required_mailbox_only_for_mailbox_tasks() {
        let list = Task::new(1, TaskKind::List { parent: "".into() });
        assert!(list.kind.required_mailbox().is_none());
        let fetch = TaskKind::Fetch {
            mailbox: "INBOX".into(),
            set: "1:*".into(),
            uid: true,
            items: FetchItems::UidFlags,
        };
        assert_eq!(
            fetch.required_mailbox(),
            Some(("INBOX", SelectMode::ReadOnly))
        );
    }
}
