// Copyright © 2026 mailbeam.dev
// Licensed under MailBeam License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

//! In-memory cache: no persistence, everything O(1)/O(log n). Used
//! when no cache directory is configured and as the degradation target
//! when the combined cache reports an error.

use super::{EngineCache, MailboxDescriptor, MessageMetadata, SyncState, ThreadNode};
use crate::modules::error::MailBeamResult;
use ahash::AHashMap;

#[derive(Debug, Default)]
pub struct MemoryCache {
    child_mailboxes: AHashMap<String, Vec<MailboxDescriptor>>,
    sync_states: AHashMap<String, SyncState>,
    uid_maps: AHashMap<String, Vec<u32>>,
    flags: AHashMap<(String, u32), Vec<String>>,
    metadata: AHashMap<(String, u32), MessageMetadata>,
    parts: AHashMap<(String, u32, String), Vec<u8>>,
    threads: AHashMap<String, Vec<ThreadNode>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EngineCache for MemoryCache {
    fn child_mailboxes(&self, parent: &str) -> MailBeamResult<Option<Vec<MailboxDescriptor>>> {
        Ok(self.child_mailboxes.get(parent).cloned())
    }

    fn set_child_mailboxes(
        &mut self,
        parent: &str,
        children: &[MailboxDescriptor],
    ) -> MailBeamResult<()> {
        self.child_mailboxes
            .insert(parent.to_string(), children.to_vec());
        Ok(())
    }

    fn sync_state(&self, mailbox: &str) -> MailBeamResult<Option<SyncState>> {
        Ok(self.sync_states.get(mailbox).cloned())
    }

    fn set_sync_state(&mut self, mailbox: &str, state: &SyncState) -> MailBeamResult<()> {
        self.sync_states.insert(mailbox.to_string(), state.clone());
        Ok(())
    }

    fn uid_map(&self, mailbox: &str) -> MailBeamResult<Option<Vec<u32>>> {
        Ok(self.uid_maps.get(mailbox).cloned())
    }

    fn set_uid_map(&mut self, mailbox: &str, uids: &[u32]) -> MailBeamResult<()> {
        self.uid_maps.insert(mailbox.to_string(), uids.to_vec());
        Ok(())
    }

    fn message_flags(&self, mailbox: &str, uid: u32) -> MailBeamResult<Option<Vec<String>>> {
        Ok(self.flags.get(&(mailbox.to_string(), uid)).cloned())
    }

    fn set_message_flags(
        &mut self,
        mailbox: &str,
        uid: u32,
        flags: &[String],
    ) -> MailBeamResult<()> {
        self.flags
            .insert((mailbox.to_string(), uid), flags.to_vec());
        Ok(())
    }

    fn message_metadata(
        &self,
        mailbox: &str,
        uid: u32,
    ) -> MailBeamResult<Option<MessageMetadata>> {
        Ok(self.metadata.get(&(mailbox.to_string(), uid)).cloned())
    }

    fn set_message_metadata(
        &mut self,
        mailbox: &str,
        uid: u32,
        metadata: &MessageMetadata,
    ) -> MailBeamResult<()> {
        self.metadata
            .insert((mailbox.to_string(), uid), metadata.clone());
        Ok(())
    }

    fn part(&self, mailbox: &str, uid: u32, part_id: &str) -> MailBeamResult<Option<Vec<u8>>> {
        Ok(self
            .parts
            .get(&(mailbox.to_string(), uid, part_id.to_string()))
            .cloned())
    }

    fn set_part(
        &mut self,
        mailbox: &str,
        uid: u32,
        part_id: &str,
        data: &[u8],
    ) -> MailBeamResult<()> {
        self.parts
            .insert((mailbox.to_string(), uid, part_id.to_string()), data.to_vec());
        Ok(())
    }

    fn thread_tree(&self, mailbox: &str) -> MailBeamResult<Option<Vec<ThreadNode>>> {
        Ok(self.threads.get(mailbox).cloned())
    }

    fn set_thread_tree(&mut self, mailbox: &str, nodes: &[ThreadNode]) -> MailBeamResult<()> {
        self.threads.insert(mailbox.to_string(), nodes.to_vec());
        Ok(())
    }

    fn clear_all_messages(&mut self, mailbox: &str) -> MailBeamResult<()> {
        self.uid_maps.remove(mailbox);
        self.threads.remove(mailbox);
        self.flags.retain(|(name, _), _| name != mailbox);
        self.metadata.retain(|(name, _), _| name != mailbox);
        self.parts.retain(|(name, _, _), _| name != mailbox);
        Ok(())
    }
}
