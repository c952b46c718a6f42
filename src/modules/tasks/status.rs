// Copyright © 2026 mailbeam.dev
// Licensed under MailBeam License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

//! STATUS task completion: fold the reply into the cached sync state
//! and preallocate placeholder messages so the list renders at its
//! final size before any envelope arrives.

use crate::modules::cache::CacheFacade;
use crate::modules::codec::utf7::decode_mailbox_name;
use crate::modules::error::{code::ErrorCode, MailBeamResult};
use crate::modules::imap::session::{absorb_sync_item, SessionCore};
use crate::modules::tree::{FetchState, TreeModel};
use crate::raise_error;
use tracing::debug;

pub fn complete_status(
    tree: &mut TreeModel,
    cache: &mut CacheFacade,
    session: &mut SessionCore,
    mailbox: &str,
) -> MailBeamResult<()> {
    let replies = std::mem::take(&mut session.status_replies);
    let reply = replies
        .into_iter()
        .find(|reply| {
            reply.mailbox == mailbox || decode_mailbox_name(&reply.mailbox) == mailbox
        })
        .ok_or_else(|| {
            raise_error!(
                format!("STATUS finished without a reply for '{mailbox}'"),
                ErrorCode::ProtocolViolation
            )
        })?;

    let mut state = cache.sync_state(mailbox).unwrap_or_default();
    for item in &reply.items {
        absorb_sync_item(&mut state, item);
    }
    cache.set_sync_state(mailbox, &state);

    let exists = state.exists.unwrap_or(0);
    debug!(mailbox, exists, "STATUS completed, preallocating placeholders");

    let node = tree.find_mailbox(mailbox).ok_or_else(|| {
        raise_error!(
            format!("mailbox '{mailbox}' vanished before its STATUS finished"),
            ErrorCode::TargetGone
        )
    })?;
    let list = tree.message_list_of(node).ok_or_else(|| {
        raise_error!(
            format!("mailbox '{mailbox}' has no message list"),
            ErrorCode::InternalError
        )
    })?;
    tree.set_placeholder_count(list, exists as usize);
    tree.set_list_state(list, FetchState::NotFetched);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::cache::memory::MemoryCache;
    use crate::modules::imap::response::StatusItem;
    use crate::modules::imap::session::StatusReply;
    use crate::modules::state::{test_support::make_session, ConnectionState};
    use crate::modules::tree::MailboxSeed;

    #[test]
    fn status_preallocates_exists_placeholders() {
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
        let mut cache = CacheFacade::new(Box::new(MemoryCache::new()));
        let mut session = make_session(ConnectionState::Authenticated);
        session.status_replies.push(StatusReply {
            mailbox: "INBOX".into(),
            items: vec![
                StatusItem::Messages(7),
                StatusItem::Recent(1),
                StatusItem::UidNext(91),
                StatusItem::UidValidity(1234),
                StatusItem::Unseen(3),
            ],
        });

        complete_status(&mut tree, &mut cache, &mut session, "INBOX").unwrap();

        let inbox = tree.find_mailbox("INBOX").unwrap();
        let list = tree.message_list_of(inbox).unwrap();
        assert_eq!(tree.child_count(list), 7);

        let state = cache.sync_state("INBOX").unwrap();
        assert_eq!(state.exists, Some(7));
        assert_eq!(state.uid_next, Some(91));
        assert_eq!(state.uid_validity, Some(1234));
    }

    #[test]
    fn missing_reply_is_a_violation() {
        let mut tree = TreeModel::new();
        let mut cache = CacheFacade::new(Box::new(MemoryCache::new()));
        let mut session = make_session(ConnectionState::Authenticated);
        let err = complete_status(&mut tree, &mut cache, &mut session, "INBOX").unwrap_err();
        assert_eq!(err.code(), ErrorCode::ProtocolViolation);
    }
}
