// Copyright © 2026 mailbeam.dev
// Licensed under MailBeam License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

//! Mailbox synchronization, decided after every SELECT/EXAMINE.
//!
//! The cached view is authoritative only while the server's
//! UIDVALIDITY matches the cached one; a change (or a cold cache)
//! forces the FULL path, otherwise the INCREMENTAL path extends the
//! cached UID map by the new tail or reconciles against a `UID SEARCH
//! ALL` when messages disappeared. The new SyncState is persisted
//! before the session enters Selected.

use crate::modules::cache::{CacheFacade, SyncState};
use crate::modules::error::{code::ErrorCode, MailBeamResult};
use crate::modules::imap::session::SessionCore;
use crate::modules::tasks::fetch::restore_from_cache;
use crate::modules::tree::{FetchState, NodeId, TreeModel};
use crate::raise_error;
use ahash::AHashSet;
use tracing::{debug, info};

/// Which sync path to take, decided from the cached state and the
/// server's SELECT report.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SyncDecision {
    /// Cache is useless (UIDVALIDITY changed or never synced). When
    /// the server lacks UIDPLUS the listing uses `UID FETCH 1:*
    /// (FLAGS)` instead of `UID SEARCH ALL`.
    Full { use_search: bool },
    /// Tail growth only: fetch flags for `<cachedUidNext>:*`.
    Incremental { cached_uids: Vec<u32> },
    /// Server has fewer messages than the cache; compare UID sets.
    Reconcile { cached_uids: Vec<u32> },
    /// Nothing changed; populate from cache without network traffic.
    UpToDate { cached_uids: Vec<u32> },
}

pub fn decide(
    cache: &mut CacheFacade,
    mailbox: &str,
    server: &SyncState,
    uidplus: bool,
) -> SyncDecision {
    let full = SyncDecision::Full {
        use_search: uidplus,
    };

    let Some(cached_state) = cache.sync_state(mailbox) else {
        debug!(mailbox, "no cached sync state, full sync");
        return full;
    };
    if cached_state.uid_validity != server.uid_validity || server.uid_validity.is_none() {
        info!(
            mailbox,
            cached = ?cached_state.uid_validity,
            server = ?server.uid_validity,
            "UIDVALIDITY changed, resetting cached mailbox"
        );
        cache.clear_all_messages(mailbox);
        return full;
    }

    let Some(cached_uids) = cache.uid_map(mailbox) else {
        return full;
    };

    let server_exists = server.exists.unwrap_or(0) as usize;
    let cached_uid_next = cached_state.uid_next;
    let server_uid_next = server.uid_next;

    if server_exists == cached_uids.len() && server_uid_next == cached_uid_next {
        return SyncDecision::UpToDate { cached_uids };
    }

    if server_exists >= cached_uids.len() {
        match (cached_uid_next, server_uid_next) {
            (Some(cached_next), Some(server_next)) if server_next > cached_next => {
                return SyncDecision::Incremental { cached_uids };
            }
            _ => {
                // growth that cannot be a plain tail extension
                return full;
            }
        }
    }

    SyncDecision::Reconcile { cached_uids }
}

/// First UID the incremental tail fetch must cover.
pub fn incremental_fetch_start(cache: &mut CacheFacade, mailbox: &str) -> u32 {
    cache
        .sync_state(mailbox)
        .and_then(|state| state.uid_next)
        .unwrap_or(1)
        .max(1)
}

fn message_list(tree: &TreeModel, mailbox: &str) -> MailBeamResult<NodeId> {
    let node = tree.find_mailbox(mailbox).ok_or_else(|| {
        raise_error!(
            format!("mailbox '{mailbox}' disappeared mid-sync"),
            ErrorCode::TargetGone
        )
    })?;
    tree.message_list_of(node).ok_or_else(|| {
        raise_error!(
            format!("mailbox '{mailbox}' has no message list"),
            ErrorCode::InternalError
        )
    })
}

/// Populate the list from an explicit ascending UID array, restoring
/// whatever flags and metadata the cache still has.
fn populate_list(
    tree: &mut TreeModel,
    cache: &mut CacheFacade,
    session: &SessionCore,
    mailbox: &str,
    uids: &[u32],
) -> MailBeamResult<NodeId> {
    let list = message_list(tree, mailbox)?;
    tree.set_placeholder_count(list, uids.len());
    for (index, &uid) in uids.iter().enumerate() {
        let seq = (index + 1) as u32;
        if !restore_from_cache(tree, cache, mailbox, list, seq, uid) {
            if let Some(message) = tree.message_at(list, seq) {
                tree.set_message_uid(message, uid);
            }
        }
        if let Some(flags) = session.syncing_flags.get(&uid) {
            if let Some(message) = tree.message_at(list, seq) {
                tree.set_flags(message, flags.clone());
                cache.set_message_flags(mailbox, uid, flags);
            }
        }
    }
    Ok(list)
}

/// FULL path: the server's UID listing replaces everything.
pub fn apply_full_listing(
    tree: &mut TreeModel,
    cache: &mut CacheFacade,
    session: &SessionCore,
    mailbox: &str,
    mut uids: Vec<u32>,
) -> MailBeamResult<()> {
    uids.sort_unstable();
    uids.dedup();
    info!(mailbox, count = uids.len(), "full sync listing applied");
    populate_list(tree, cache, session, mailbox, &uids)?;
    cache.set_uid_map(mailbox, &uids);
    Ok(())
}

/// INCREMENTAL path: append the genuinely new tail UIDs; UIDs the
/// cache already knew are flag-refreshed only.
pub fn apply_incremental_tail(
    tree: &mut TreeModel,
    cache: &mut CacheFacade,
    session: &SessionCore,
    mailbox: &str,
    cached_uids: Vec<u32>,
    fetched_uids: &[u32],
) -> MailBeamResult<()> {
    let known: AHashSet<u32> = cached_uids.iter().copied().collect();
    let mut uids = cached_uids;
    let mut added = 0usize;
    for &uid in fetched_uids {
        if uid != 0 && !known.contains(&uid) {
            uids.push(uid);
            added += 1;
        }
    }
    uids.sort_unstable();
    uids.dedup();
    debug!(
        mailbox,
        fetched = fetched_uids.len(),
        added,
        "incremental tail applied"
    );
    populate_list(tree, cache, session, mailbox, &uids)?;
    cache.set_uid_map(mailbox, &uids);
    Ok(())
}

/// Reconcile path: the server listing wins, cache entries for UIDs it
/// no longer reports are dropped.
pub fn apply_reconcile(
    tree: &mut TreeModel,
    cache: &mut CacheFacade,
    session: &SessionCore,
    mailbox: &str,
    cached_uids: Vec<u32>,
    server_uids: Vec<u32>,
) -> MailBeamResult<()> {
    let server_set: AHashSet<u32> = server_uids.iter().copied().collect();
    let removed: Vec<u32> = cached_uids
        .iter()
        .copied()
        .filter(|uid| !server_set.contains(uid))
        .collect();
    info!(
        mailbox,
        removed = removed.len(),
        "reconciling against server UID set"
    );
    apply_full_listing(tree, cache, session, mailbox, server_uids)
}

/// Populate straight from cache with no network involved.
pub fn apply_cached_view(
    tree: &mut TreeModel,
    cache: &mut CacheFacade,
    session: &SessionCore,
    mailbox: &str,
    cached_uids: Vec<u32>,
) -> MailBeamResult<()> {
    populate_list(tree, cache, session, mailbox, &cached_uids)?;
    Ok(())
}

/// Persist the fresh SyncState and flip the session into Selected.
/// Called last, so a crash mid-sync leaves the old state intact.
pub fn finalize(
    tree: &mut TreeModel,
    cache: &mut CacheFacade,
    session: &mut SessionCore,
    mailbox: &str,
) -> MailBeamResult<()> {
    let list = message_list(tree, mailbox)?;
    cache.set_sync_state(mailbox, &session.pending_sync);
    tree.set_list_state(list, FetchState::Done);
    session.state = crate::modules::state::ConnectionState::Selected;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::cache::memory::MemoryCache;
    use crate::modules::state::{test_support::make_session, ConnectionState};
    use crate::modules::tree::{MailboxSeed, NodePayload};

    fn setup() -> (TreeModel, CacheFacade, SessionCore) {
        let mut tree = TreeModel::new();
        let root = tree.root();
        tree.set_mailbox_children(
            root,
            vec![MailboxSeed {
                name: "INBOX".into(),
                separator: Some("/".into()),
                flags: vec![],
            }],
        );
        (
            tree,
            CacheFacade::new(Box::new(MemoryCache::new())),
            make_session(ConnectionState::Syncing),
        )
    }

    fn server_state(exists: u32, uid_next: u32, validity: u32) -> SyncState {
        SyncState {
            exists: Some(exists),
            uid_next: Some(uid_next),
            uid_validity: Some(validity),
            ..SyncState::default()
        }
    }

    fn list_uids(tree: &TreeModel) -> Vec<u32> {
        let inbox = tree.find_mailbox("INBOX").unwrap();
        let list = tree.message_list_of(inbox).unwrap();
        tree.children(list)
            .iter()
            .map(|&id| match tree.payload(id) {
                NodePayload::Message(m) => m.uid,
                other => panic!("unexpected: {}", other.kind_name()),
            })
            .collect()
    }

    #[test]
    fn cold_cache_takes_the_full_path() {
        let (_tree, mut cache, _session) = setup();
        let decision = decide(&mut cache, "INBOX", &server_state(5, 6, 1), true);
        assert_eq!(decision, SyncDecision::Full { use_search: true });
        // without UIDPLUS the listing comes from UID FETCH
        let decision = decide(&mut cache, "INBOX", &server_state(5, 6, 1), false);
        assert_eq!(decision, SyncDecision::Full { use_search: false });
    }

    #[test]
    fn uidvalidity_change_clears_and_goes_full() {
        let (_tree, mut cache, _session) = setup();
        cache.set_sync_state("INBOX", &server_state(3, 10, 1));
        cache.set_uid_map("INBOX", &[1, 2, 3]);
        cache.set_message_flags("INBOX", 2, &["\\Seen".into()]);

        let decision = decide(&mut cache, "INBOX", &server_state(3, 4, 2), true);
        assert_eq!(decision, SyncDecision::Full { use_search: true });
        // the stale per-message data is gone
        assert_eq!(cache.uid_map("INBOX"), None);
        assert_eq!(cache.message_flags("INBOX", 2), None);
    }

    #[test]
    fn unchanged_mailbox_is_up_to_date() {
        let (_tree, mut cache, _session) = setup();
        cache.set_sync_state("INBOX", &server_state(3, 10, 5));
        cache.set_uid_map("INBOX", &[4, 6, 9]);
        let decision = decide(&mut cache, "INBOX", &server_state(3, 10, 5), true);
        assert_eq!(
            decision,
            SyncDecision::UpToDate {
                cached_uids: vec![4, 6, 9]
            }
        );
    }

    #[test]
    fn tail_growth_is_incremental() {
        let (_tree, mut cache, _session) = setup();
        cache.set_sync_state("INBOX", &server_state(9, 30, 5));
        cache.set_uid_map("INBOX", &(1..=9).collect::<Vec<u32>>());
        let decision = decide(&mut cache, "INBOX", &server_state(10, 32, 5), true);
        assert_eq!(
            decision,
            SyncDecision::Incremental {
                cached_uids: (1..=9).collect()
            }
        );
        assert_eq!(incremental_fetch_start(&mut cache, "INBOX"), 30);
    }

    #[test]
    fn shrink_goes_to_reconcile() {
        let (_tree, mut cache, _session) = setup();
        cache.set_sync_state("INBOX", &server_state(5, 20, 5));
        cache.set_uid_map("INBOX", &[1, 2, 3, 4, 5]);
        let decision = decide(&mut cache, "INBOX", &server_state(3, 20, 5), true);
        assert_eq!(
            decision,
            SyncDecision::Reconcile {
                cached_uids: vec![1, 2, 3, 4, 5]
            }
        );
    }

    #[test]
    fn growth_without_uidnext_extension_falls_back_to_full() {
        let (_tree, mut cache, _session) = setup();
        cache.set_sync_state("INBOX", &server_state(3, 30, 5));
        cache.set_uid_map("INBOX", &[1, 2, 3]);
        // more messages but UIDNEXT did not move: not a plain tail
        let decision = decide(&mut cache, "INBOX", &server_state(5, 30, 5), true);
        assert_eq!(decision, SyncDecision::Full { use_search: true });
    }

    #[test]
    fn incremental_tail_adds_exactly_the_unknown_uids() {
        // cached uidNext=30, server returns UIDs 30 and 31, one known
        let (mut tree, mut cache, mut session) = setup();
        let cached: Vec<u32> = vec![10, 20, 30];
        cache.set_sync_state("INBOX", &server_state(3, 30, 5));
        cache.set_uid_map("INBOX", &cached);
        session.pending_sync = server_state(4, 32, 5);

        apply_incremental_tail(
            &mut tree,
            &mut cache,
            &session,
            "INBOX",
            cached,
            &[30, 31],
        )
        .unwrap();

        assert_eq!(list_uids(&tree), vec![10, 20, 30, 31]);
        assert_eq!(cache.uid_map("INBOX"), Some(vec![10, 20, 30, 31]));
    }

    #[test]
    fn full_listing_orders_by_uid() {
        let (mut tree, mut cache, session) = setup();
        apply_full_listing(
            &mut tree,
            &mut cache,
            &session,
            "INBOX",
            vec![9, 4, 6],
        )
        .unwrap();
        assert_eq!(list_uids(&tree), vec![4, 6, 9]);
    }

    #[test]
    fn reconcile_drops_missing_uids() {
        let (mut tree, mut cache, session) = setup();
        let cached = vec![1, 2, 3, 4, 5];
        cache.set_uid_map("INBOX", &cached);
        cache.set_message_flags("INBOX", 2, &["\\Seen".into()]);

        apply_reconcile(
            &mut tree,
            &mut cache,
            &session,
            "INBOX",
            cached,
            vec![1, 3, 5],
        )
        .unwrap();
        assert_eq!(list_uids(&tree), vec![1, 3, 5]);
        assert_eq!(cache.uid_map("INBOX"), Some(vec![1, 3, 5]));
    }

    #[test]
    fn incremental_sync_is_idempotent() {
        let (mut tree, mut cache, mut session) = setup();
        let cached = vec![10, 20, 30];
        cache.set_sync_state("INBOX", &server_state(3, 31, 5));
        cache.set_uid_map("INBOX", &cached);
        session.pending_sync = server_state(3, 31, 5);

        // two identical sync rounds with no server changes
        for _ in 0..2 {
            let decision = decide(&mut cache, "INBOX", &session.pending_sync.clone(), true);
            match decision {
                SyncDecision::UpToDate { cached_uids } => {
                    apply_cached_view(&mut tree, &mut cache, &session, "INBOX", cached_uids)
                        .unwrap();
                }
                other => panic!("expected UpToDate, got {other:?}"),
            }
            finalize(&mut tree, &mut cache, &mut session, "INBOX").unwrap();
            session.state = ConnectionState::Syncing;
        }
        assert_eq!(list_uids(&tree), vec![10, 20, 30]);
        assert_eq!(cache.uid_map("INBOX"), Some(vec![10, 20, 30]));
    }

    #[test]
    fn finalize_persists_before_selected() {
        let (mut tree, mut cache, mut session) = setup();
        session.pending_sync = server_state(0, 1, 9);
        finalize(&mut tree, &mut cache, &mut session, "INBOX").unwrap();
        assert_eq!(session.state, ConnectionState::Selected);
        assert_eq!(
            cache.sync_state("INBOX").unwrap().uid_validity,
            Some(9)
        );
    }
}
