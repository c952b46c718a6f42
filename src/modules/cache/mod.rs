// Copyright © 2026 mailbeam.dev
// Licensed under MailBeam License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

//! Persistent cache behind the engine: mailbox listings, per-mailbox
//! sync state, UID maps, per-UID flags and metadata, part bodies and
//! threading results.
//!
//! Two implementations exist: [`memory::MemoryCache`] for cacheless
//! sessions and tests, and [`combined::CombinedCache`] which keeps
//! metadata in a native_db store and diverts large part bodies to
//! zlib-compressed files. Cache failures are never fatal; the engine
//! degrades to the in-memory cache and carries on.

use crate::modules::error::MailBeamResult;
use crate::modules::imap::response::{BodyStructure, Envelope};
use serde::{Deserialize, Serialize};

pub mod combined;
pub mod disk;
pub mod memory;

/// Server-reported per-mailbox counters used to decide between
/// incremental and full resynchronization. Every field keeps its own
/// "seen" bit via `Option`.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct SyncState {
    pub exists: Option<u32>,
    pub recent: Option<u32>,
    pub unseen: Option<u32>,
    pub uid_next: Option<u32>,
    pub uid_validity: Option<u32>,
    pub flags: Vec<String>,
    pub permanent_flags: Vec<String>,
}

impl SyncState {
    /// A SyncState is complete once the fields the sync algorithm
    /// depends on have all been reported.
    pub fn is_usable_for_syncing(&self) -> bool {
        self.exists.is_some() && self.uid_next.is_some() && self.uid_validity.is_some()
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct MailboxDescriptor {
    /// Unicode mailbox path.
    pub name: String,
    pub separator: Option<String>,
    pub flags: Vec<String>,
}

/// Envelope, bodystructure and size for one UID.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MessageMetadata {
    pub envelope: Envelope,
    pub body_structure: BodyStructure,
    pub size: u32,
    pub internal_date: Option<String>,
}

/// One node of a server THREAD result.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct ThreadNode {
    pub uid: u32,
    pub children: Vec<ThreadNode>,
}

/// The cache contract. All operations are synchronous; the reference
/// implementations run on the engine's own thread and report failures
/// immediately.
pub trait EngineCache: Send {
    /// Child mailboxes of `parent` ("" is the root). `None` means the
    /// listing is absent or stale.
    fn child_mailboxes(&self, parent: &str) -> MailBeamResult<Option<Vec<MailboxDescriptor>>>;
    fn set_child_mailboxes(
        &mut self,
        parent: &str,
        children: &[MailboxDescriptor],
    ) -> MailBeamResult<()>;

    fn sync_state(&self, mailbox: &str) -> MailBeamResult<Option<SyncState>>;
    fn set_sync_state(&mut self, mailbox: &str, state: &SyncState) -> MailBeamResult<()>;

    /// Sequence → UID map, persisted as the ordered UID array.
    fn uid_map(&self, mailbox: &str) -> MailBeamResult<Option<Vec<u32>>>;
    fn set_uid_map(&mut self, mailbox: &str, uids: &[u32]) -> MailBeamResult<()>;

    fn message_flags(&self, mailbox: &str, uid: u32) -> MailBeamResult<Option<Vec<String>>>;
    fn set_message_flags(
        &mut self,
        mailbox: &str,
        uid: u32,
        flags: &[String],
    ) -> MailBeamResult<()>;

    fn message_metadata(&self, mailbox: &str, uid: u32)
        -> MailBeamResult<Option<MessageMetadata>>;
    fn set_message_metadata(
        &mut self,
        mailbox: &str,
        uid: u32,
        metadata: &MessageMetadata,
    ) -> MailBeamResult<()>;

    fn part(&self, mailbox: &str, uid: u32, part_id: &str) -> MailBeamResult<Option<Vec<u8>>>;
    fn set_part(
        &mut self,
        mailbox: &str,
        uid: u32,
        part_id: &str,
        data: &[u8],
    ) -> MailBeamResult<()>;

    fn thread_tree(&self, mailbox: &str) -> MailBeamResult<Option<Vec<ThreadNode>>>;
    fn set_thread_tree(&mut self, mailbox: &str, nodes: &[ThreadNode]) -> MailBeamResult<()>;

    /// Drop every message-scoped entry for a mailbox (uid map, flags,
    /// metadata, parts, threading). Used on UIDVALIDITY changes.
    fn clear_all_messages(&mut self, mailbox: &str) -> MailBeamResult<()>;
}

/// Infallible cache front the engine talks to. The first error from
/// the underlying implementation swaps it for a fresh [`memory::MemoryCache`]
/// for the rest of the session; the warning is surfaced once through
/// the engine event stream. Reads degrade to "absent", writes to
/// no-ops on a cache that just failed.
pub struct CacheFacade {
    inner: Box<dyn EngineCache>,
    degraded: bool,
    pending_warning: Option<String>,
}

impl std::fmt::Debug for CacheFacade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheFacade")
            .field("degraded", &self.degraded)
            .finish()
    }
}

macro_rules! degrade_on_error {
    ($self:ident, $call:expr, $fallback:expr) => {
        match $call {
            Ok(value) => value,
            Err(err) => {
                $self.degrade(err);
                $fallback
            }
        }
    };
}

impl CacheFacade {
    pub fn new(inner: Box<dyn EngineCache>) -> Self {
        Self {
            inner,
            degraded: false,
            pending_warning: None,
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    /// One-shot warning for the engine event stream.
    pub fn take_degradation_warning(&mut self) -> Option<String> {
        self.pending_warning.take()
    }

    fn degrade(&mut self, err: crate::modules::error::MailBeamError) {
        tracing::warn!("cache failure, degrading to in-memory cache: {err}");
        if !self.degraded {
            self.degraded = true;
            self.pending_warning = Some(format!("persistent cache disabled: {err}"));
            self.inner = Box::new(memory::MemoryCache::new());
        }
    }

    pub fn child_mailboxes(&mut self, parent: &str) -> Option<Vec<MailboxDescriptor>> {
        degrade_on_error!(self, self.inner.child_mailboxes(parent), None)
    }

    pub fn set_child_mailboxes(&mut self, parent: &str, children: &[MailboxDescriptor]) {
        degrade_on_error!(self, self.inner.set_child_mailboxes(parent, children), ())
    }

    pub fn sync_state(&mut self, mailbox: &str) -> Option<SyncState> {
        degrade_on_error!(self, self.inner.sync_state(mailbox), None)
    }

    pub fn set_sync_state(&mut self, mailbox: &str, state: &SyncState) {
        degrade_on_error!(self, self.inner.set_sync_state(mailbox, state), ())
    }

    pub fn uid_map(&mut self, mailbox: &str) -> Option<Vec<u32>> {
        degrade_on_error!(self, self.inner.uid_map(mailbox), None)
    }

    pub fn set_uid_map(&mut self, mailbox: &str, uids: &[u32]) {
        degrade_on_error!(self, self.inner.set_uid_map(mailbox, uids), ())
    }

    pub fn message_flags(&mut self, mailbox: &str, uid: u32) -> Option<Vec<String>> {
        degrade_on_error!(self, self.inner.message_flags(mailbox, uid), None)
    }

    pub fn set_message_flags(&mut self, mailbox: &str, uid: u32, flags: &[String]) {
        degrade_on_error!(self, self.inner.set_message_flags(mailbox, uid, flags), ())
    }

    pub fn message_metadata(&mut self, mailbox: &str, uid: u32) -> Option<MessageMetadata> {
        degrade_on_error!(self, self.inner.message_metadata(mailbox, uid), None)
    }

    pub fn set_message_metadata(&mut self, mailbox: &str, uid: u32, metadata: &MessageMetadata) {
        degrade_on_error!(
            self,
            self.inner.set_message_metadata(mailbox, uid, metadata),
            ()
        )
    }

    pub fn part(&mut self, mailbox: &str, uid: u32, part_id: &str) -> Option<Vec<u8>> {
        degrade_on_error!(self, self.inner.part(mailbox, uid, part_id), None)
    }

    pub fn set_part(&mut self, mailbox: &str, uid: u32, part_id: &str, data: &[u8]) {
        degrade_on_error!(self, self.inner.set_part(mailbox, uid, part_id, data), ())
    }

    pub fn thread_tree(&mut self, mailbox: &str) -> Option<Vec<ThreadNode>> {
        degrade_on_error!(self, self.inner.thread_tree(mailbox), None)
    }

    pub fn set_thread_tree(&mut self, mailbox: &str, nodes: &[ThreadNode]) {
        degrade_on_error!(self, self.inner.set_thread_tree(mailbox, nodes), ())
    }

    pub fn clear_all_messages(&mut self, mailbox: &str) {
        degrade_on_error!(self, self.inner.clear_all_messages(mailbox), ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingCache;

    impl EngineCache for FailingCache {
        fn child_mailboxes(
            &self,
            _parent: &str,
        ) -> MailBeamResult<Option<Vec<MailboxDescriptor>>> {
            Err(crate::raise_error!(
                "disk on fire".into(),
                crate::modules::error::code::ErrorCode::CacheError
            ))
        }
        fn set_child_mailboxes(
            &mut self,
            _parent: &str,
            _children: &[MailboxDescriptor],
        ) -> MailBeamResult<()> {
            Ok(())
        }
        fn sync_state(&self, _mailbox: &str) -> MailBeamResult<Option<SyncState>> {
            Ok(None)
        }
        fn set_sync_state(&mut self, _mailbox: &str, _state: &SyncState) -> MailBeamResult<()> {
            Ok(())
        }
        fn uid_map(&self, _mailbox: &str) -> MailBeamResult<Option<Vec<u32>>> {
            Ok(None)
        }
        fn set_uid_map(&mut self, _mailbox: &str, _uids: &[u32]) -> MailBeamResult<()> {
            Ok(())
        }
        fn message_flags(&self, _mailbox: &str, _uid: u32) -> MailBeamResult<Option<Vec<String>>> {
            Ok(None)
        }
        fn set_message_flags(
            &mut self,
            _mailbox: &str,
            _uid: u32,
            _flags: &[String],
        ) -> MailBeamResult<()> {
            Ok(())
        }
        fn message_metadata(
            &self,
            _mailbox: &str,
            _uid: u32,
        ) -> MailBeamResult<Option<MessageMetadata>> {
            Ok(None)
        }
        fn set_message_metadata(
            &mut self,
            _mailbox: &str,
            _uid: u32,
            _metadata: &MessageMetadata,
        ) -> MailBeamResult<()> {
            Ok(())
        }
        fn part(
            &self,
            _mailbox: &str,
            _uid: u32,
            _part_id: &str,
        ) -> MailBeamResult<Option<Vec<u8>>> {
            Ok(None)
        }
        fn set_part(
            &mut self,
            _mailbox: &str,
            _uid: u32,
            _part_id: &str,
            _data: &[u8],
        ) -> MailBeamResult<()> {
            Ok(())
        }
        fn thread_tree(&self, _mailbox: &str) -> MailBeamResult<Option<Vec<ThreadNode>>> {
            Ok(None)
        }
        fn set_thread_tree(&mut self, _mailbox: &str, _nodes: &[ThreadNode]) -> MailBeamResult<()> {
            Ok(())
        }
        fn clear_all_messages(&mut self, _mailbox: &str) -> MailBeamResult<()> {
            Ok(())
        }
    }

    #[test]
    fn facade_degrades_to_memory_on_first_error() {
        let mut facade = CacheFacade::new(Box::new(FailingCache));
        assert!(!facade.is_degraded());

        // the failing read degrades but does not propagate
        assert_eq!(facade.child_mailboxes(""), None);
        assert!(facade.is_degraded());
        let warning = facade.take_degradation_warning().unwrap();
        assert!(warning.contains("disk on fire"));
        assert_eq!(facade.take_degradation_warning(), None);

        // the replacement cache works normally
        facade.set_uid_map("INBOX", &[1, 2]);
        assert_eq!(facade.uid_map("INBOX"), Some(vec![1, 2]));
    }

    #[test]
    fn sync_state_completeness() {
        let mut state = SyncState::default();
        assert!(!state.is_usable_for_syncing());
        state.exists = Some(10);
        state.uid_next = Some(42);
        assert!(!state.is_usable_for_syncing());
        state.uid_validity = Some(7);
        assert!(state.is_usable_for_syncing());
        // recent/unseen are optional extras
        assert_eq!(state.recent, None);
    }
}
