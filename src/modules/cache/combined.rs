// Copyright © 2026 mailbeam.dev
// Licensed under MailBeam License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

//! The combined cache: a native_db (redb-backed) store for metadata,
//! sync state and small part bodies, with zlib part files for anything
//! above the overflow threshold. Entries older than the renewal
//! threshold are treated as absent so a long-dead cache cannot shadow
//! the server.

use super::disk::PartFileStore;
use super::{EngineCache, MailboxDescriptor, MessageMetadata, SyncState, ThreadNode};
use crate::modules::error::{code::ErrorCode, MailBeamResult};
use crate::modules::settings::CacheConfig;
use crate::{raise_error, utc_now};
use native_db::*;
use native_model::{native_model, Model};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::LazyLock;

const KEY_SEP: char = '\u{1f}';

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[native_model(id = 1, version = 1)]
#[native_db]
struct CachedMailboxListing {
    #[primary_key]
    parent: String,
    children: Vec<MailboxDescriptor>,
    updated_at: i64,
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[native_model(id = 2, version = 1)]
#[native_db]
struct CachedSyncState {
    #[primary_key]
    mailbox: String,
    state: SyncState,
    updated_at: i64,
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[native_model(id = 3, version = 1)]
#[native_db]
struct CachedUidMap {
    #[primary_key]
    mailbox: String,
    uids: Vec<u32>,
    updated_at: i64,
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[native_model(id = 4, version = 1)]
#[native_db]
struct CachedFlags {
    #[primary_key]
    key: String,
    #[secondary_key]
    mailbox: String,
    flags: Vec<String>,
    updated_at: i64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[native_model(id = 5, version = 1)]
#[native_db]
struct CachedMetadata {
    #[primary_key]
    key: String,
    #[secondary_key]
    mailbox: String,
    metadata: MessageMetadata,
    updated_at: i64,
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[native_model(id = 6, version = 1)]
#[native_db]
struct CachedPart {
    #[primary_key]
    key: String,
    #[secondary_key]
    mailbox: String,
    data: Vec<u8>,
    updated_at: i64,
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[native_model(id = 7, version = 1)]
#[native_db]
struct CachedThreads {
    #[primary_key]
    mailbox: String,
    nodes: Vec<ThreadNode>,
    updated_at: i64,
}

static CACHE_MODELS: LazyLock<Models> = LazyLock::new(|| {
    let mut models = Models::new();
    models
        .define::<CachedMailboxListing>()
        .expect("failed to define model");
    models
        .define::<CachedSyncState>()
        .expect("failed to define model");
    models
        .define::<CachedUidMap>()
        .expect("failed to define model");
    models
        .define::<CachedFlags>()
        .expect("failed to define model");
    models
        .define::<CachedMetadata>()
        .expect("failed to define model");
    models
        .define::<CachedPart>()
        .expect("failed to define model");
    models
        .define::<CachedThreads>()
        .expect("failed to define model");
    models
});

fn message_key(mailbox: &str, uid: u32) -> String {
    format!("{mailbox}{KEY_SEP}{uid:010}")
}

fn part_key(mailbox: &str, uid: u32, part_id: &str) -> String {
    format!("{mailbox}{KEY_SEP}{uid:010}{KEY_SEP}{part_id}")
}

pub struct CombinedCache {
    db: Database<'static>,
    files: PartFileStore,
    renewal_ms: i64,
    overflow_threshold: usize,
}

impl std::fmt::Debug for CombinedCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CombinedCache")
            .field("renewal_ms", &self.renewal_ms)
            .field("overflow_threshold", &self.overflow_threshold)
            .finish()
    }
}

impl CombinedCache {
    pub fn open(cache_dir: &Path, config: &CacheConfig) -> MailBeamResult<Self> {
        std::fs::create_dir_all(cache_dir).map_err(|e| {
            raise_error!(
                format!("cannot create cache dir {}: {}", cache_dir.display(), e),
                ErrorCode::CacheError
            )
        })?;
        let db = Builder::new()
            .create(&CACHE_MODELS, cache_dir.join("metadata.db"))
            .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::CacheError))?;
        Ok(Self {
            db,
            files: PartFileStore::new(cache_dir),
            renewal_ms: config.renewal_days as i64 * 86_400_000,
            overflow_threshold: config.file_overflow_threshold,
        })
    }

    fn is_fresh(&self, updated_at: i64) -> bool {
        utc_now!() - updated_at < self.renewal_ms
    }

    fn get_primary<T: ToInput>(&self, key: String) -> MailBeamResult<Option<T>> {
        let r = self
            .db
            .r_transaction()
            .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::CacheError))?;
        r.get()
            .primary::<T>(key)
            .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::CacheError))
    }

    fn upsert<T: ToInput + Clone>(&self, item: T) -> MailBeamResult<()> {
        let rw = self
            .db
            .rw_transaction()
            .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::CacheError))?;
        rw.upsert(item)
            .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::CacheError))?;
        rw.commit()
            .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::CacheError))
    }
}

macro_rules! cache_err {
    ($expr:expr) => {
        $expr.map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::CacheError))
    };
}

impl EngineCache for CombinedCache {
    fn child_mailboxes(&self, parent: &str) -> MailBeamResult<Option<Vec<MailboxDescriptor>>> {
        let entry: Option<CachedMailboxListing> = self.get_primary(parent.to_string())?;
        Ok(entry
            .filter(|e| self.is_fresh(e.updated_at))
            .map(|e| e.children))
    }

    fn set_child_mailboxes(
        &mut self,
        parent: &str,
        children: &[MailboxDescriptor],
    ) -> MailBeamResult<()> {
        self.upsert(CachedMailboxListing {
            parent: parent.to_string(),
            children: children.to_vec(),
            updated_at: utc_now!(),
        })
    }

    fn sync_state(&self, mailbox: &str) -> MailBeamResult<Option<SyncState>> {
        let entry: Option<CachedSyncState> = self.get_primary(mailbox.to_string())?;
        Ok(entry
            .filter(|e| self.is_fresh(e.updated_at))
            .map(|e| e.state))
    }

    fn set_sync_state(&mut self, mailbox: &str, state: &SyncState) -> MailBeamResult<()> {
        self.upsert(CachedSyncState {
            mailbox: mailbox.to_string(),
            state: state.clone(),
            updated_at: utc_now!(),
        })
    }

    fn uid_map(&self, mailbox: &str) -> MailBeamResult<Option<Vec<u32>>> {
        let entry: Option<CachedUidMap> = self.get_primary(mailbox.to_string())?;
        Ok(entry
            .filter(|e| self.is_fresh(e.updated_at))
            .map(|e| e.uids))
    }

    fn set_uid_map(&mut self, mailbox: &str, uids: &[u32]) -> MailBeamResult<()> {
        self.upsert(CachedUidMap {
            mailbox: mailbox.to_string(),
            uids: uids.to_vec(),
            updated_at: utc_now!(),
        })
    }

    fn message_flags(&self, mailbox: &str, uid: u32) -> MailBeamResult<Option<Vec<String>>> {
        let entry: Option<CachedFlags> = self.get_primary(message_key(mailbox, uid))?;
        Ok(entry
            .filter(|e| self.is_fresh(e.updated_at))
            .map(|e| e.flags))
    }

    fn set_message_flags(
        &mut self,
        mailbox: &str,
        uid: u32,
        flags: &[String],
    ) -> MailBeamResult<()> {
        self.upsert(CachedFlags {
            key: message_key(mailbox, uid),
            mailbox: mailbox.to_string(),
            flags: flags.to_vec(),
            updated_at: utc_now!(),
        })
    }

    fn message_metadata(
        &self,
        mailbox: &str,
        uid: u32,
    ) -> MailBeamResult<Option<MessageMetadata>> {
        let entry: Option<CachedMetadata> = self.get_primary(message_key(mailbox, uid))?;
        Ok(entry
            .filter(|e| self.is_fresh(e.updated_at))
            .map(|e| e.metadata))
    }

    fn set_message_metadata(
        &mut self,
        mailbox: &str,
        uid: u32,
        metadata: &MessageMetadata,
    ) -> MailBeamResult<()> {
        self.upsert(CachedMetadata {
            key: message_key(mailbox, uid),
            mailbox: mailbox.to_string(),
            metadata: metadata.clone(),
            updated_at: utc_now!(),
        })
    }

    fn part(&self, mailbox: &str, uid: u32, part_id: &str) -> MailBeamResult<Option<Vec<u8>>> {
        let entry: Option<CachedPart> = self.get_primary(part_key(mailbox, uid, part_id))?;
        if let Some(entry) = entry {
            if self.is_fresh(entry.updated_at) {
                return Ok(Some(entry.data));
            }
            return Ok(None);
        }
        // large bodies live in the file overflow
        self.files.load(mailbox, uid, part_id)
    }

    fn set_part(
        &mut self,
        mailbox: &str,
        uid: u32,
        part_id: &str,
        data: &[u8],
    ) -> MailBeamResult<()> {
        if data.len() > self.overflow_threshold {
            return self.files.store(mailbox, uid, part_id, data);
        }
        self.upsert(CachedPart {
            key: part_key(mailbox, uid, part_id),
            mailbox: mailbox.to_string(),
            data: data.to_vec(),
            updated_at: utc_now!(),
        })
    }

    fn thread_tree(&self, mailbox: &str) -> MailBeamResult<Option<Vec<ThreadNode>>> {
        let entry: Option<CachedThreads> = self.get_primary(mailbox.to_string())?;
        Ok(entry
            .filter(|e| self.is_fresh(e.updated_at))
            .map(|e| e.nodes))
    }

    fn set_thread_tree(&mut self, mailbox: &str, nodes: &[ThreadNode]) -> MailBeamResult<()> {
        self.upsert(CachedThreads {
            mailbox: mailbox.to_string(),
            nodes: nodes.to_vec(),
            updated_at: utc_now!(),
        })
    }

    fn clear_all_messages(&mut self, mailbox: &str) -> MailBeamResult<()> {
        let rw = cache_err!(self.db.rw_transaction())?;

        if let Some(entry) = cache_err!(rw.get().primary::<CachedUidMap>(mailbox.to_string()))? {
            cache_err!(rw.remove(entry))?;
        }
        if let Some(entry) = cache_err!(rw.get().primary::<CachedThreads>(mailbox.to_string()))? {
            cache_err!(rw.remove(entry))?;
        }
        if let Some(entry) = cache_err!(rw.get().primary::<CachedSyncState>(mailbox.to_string()))? {
            cache_err!(rw.remove(entry))?;
        }

        let flags: Vec<CachedFlags> = cache_err!(cache_err!(rw
            .scan()
            .secondary::<CachedFlags>(CachedFlagsKey::mailbox))?
        .start_with(mailbox.to_string()))?
        .filter_map(Result::ok)
        .collect();
        for entry in flags {
            cache_err!(rw.remove(entry))?;
        }

        let metadata: Vec<CachedMetadata> = cache_err!(cache_err!(rw
            .scan()
            .secondary::<CachedMetadata>(CachedMetadataKey::mailbox))?
        .start_with(mailbox.to_string()))?
        .filter_map(Result::ok)
        .collect();
        for entry in metadata {
            cache_err!(rw.remove(entry))?;
        }

        let parts: Vec<CachedPart> = cache_err!(cache_err!(rw
            .scan()
            .secondary::<CachedPart>(CachedPartKey::mailbox))?
        .start_with(mailbox.to_string()))?
        .filter_map(Result::ok)
        .collect();
        for entry in parts {
            cache_err!(rw.remove(entry))?;
        }

        cache_err!(rw.commit())?;
        self.files.clear_mailbox(mailbox)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::imap::response::{BodyStructure, Envelope, PartCommon};

    fn open_cache(dir: &Path) -> CombinedCache {
        CombinedCache::open(dir, &CacheConfig::default()).unwrap()
    }

    fn sample_metadata() -> MessageMetadata {
        MessageMetadata {
            envelope: Envelope {
                subject: Some("hello".into()),
                ..Envelope::default()
            },
            body_structure: BodyStructure::Text {
                common: PartCommon {
                    media_type: "text".into(),
                    media_subtype: "plain".into(),
                    transfer_encoding: "7bit".into(),
                    octets: 5,
                    ..PartCommon::default()
                },
                lines: 1,
            },
            size: 120,
            internal_date: None,
        }
    }

    #[test]
    fn persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut cache = open_cache(dir.path());
            cache.set_uid_map("INBOX", &[1, 5, 9]).unwrap();
            cache
                .set_sync_state(
                    "INBOX",
                    &SyncState {
                        exists: Some(3),
                        uid_next: Some(10),
                        uid_validity: Some(777),
                        ..SyncState::default()
                    },
                )
                .unwrap();
            cache
                .set_message_metadata("INBOX", 5, &sample_metadata())
                .unwrap();
        }
        let cache = open_cache(dir.path());
        assert_eq!(cache.uid_map("INBOX").unwrap(), Some(vec![1, 5, 9]));
        assert_eq!(
            cache.sync_state("INBOX").unwrap().unwrap().uid_validity,
            Some(777)
        );
        assert_eq!(
            cache
                .message_metadata("INBOX", 5)
                .unwrap()
                .unwrap()
                .envelope
                .subject
                .as_deref(),
            Some("hello")
        );
    }

    #[test]
    fn small_parts_in_db_large_parts_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = open_cache(dir.path());

        let small = b"tiny body".to_vec();
        let large = vec![7u8; 1024 * 1024 + 1];
        cache.set_part("INBOX", 1, "1", &small).unwrap();
        cache.set_part("INBOX", 1, "2", &large).unwrap();

        assert_eq!(cache.part("INBOX", 1, "1").unwrap(), Some(small));
        assert_eq!(cache.part("INBOX", 1, "2").unwrap(), Some(large));
        // the large one must exist as an overflow file
        let overflow = dir
            .path()
            .join("parts")
            .join(crate::modules::utils::mailbox_dir_name("INBOX"));
        assert!(overflow.join("1_2.cache").exists());
    }

    #[test]
    fn clear_all_messages_scrubs_the_mailbox() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = open_cache(dir.path());
        cache.set_uid_map("INBOX", &[1]).unwrap();
        cache
            .set_message_flags("INBOX", 1, &["\\Seen".into()])
            .unwrap();
        cache.set_part("INBOX", 1, "1", b"data").unwrap();
        cache.set_uid_map("Sent", &[4]).unwrap();

        cache.clear_all_messages("INBOX").unwrap();

        assert_eq!(cache.uid_map("INBOX").unwrap(), None);
        assert_eq!(cache.message_flags("INBOX", 1).unwrap(), None);
        assert_eq!(cache.part("INBOX", 1, "1").unwrap(), None);
        assert_eq!(cache.uid_map("Sent").unwrap(), Some(vec![4]));
    }
}
