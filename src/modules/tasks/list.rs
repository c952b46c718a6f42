// Copyright © 2026 mailbeam.dev
// Licensed under MailBeam License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

//! LIST task completion: collect the accumulated LIST replies, build
//! the sorted child mailbox set (INBOX first, then case-insensitive),
//! drop adjacent duplicates, persist the listing and swap it into the
//! tree under a layout-reset bracket.

use crate::modules::cache::{CacheFacade, MailboxDescriptor};
use crate::modules::codec::utf7::decode_mailbox_name;
use crate::modules::error::{code::ErrorCode, MailBeamResult};
use crate::modules::imap::session::{ListReply, SessionCore};
use crate::modules::tree::{MailboxSeed, TreeModel};
use crate::raise_error;
use std::cmp::Ordering;
use tracing::debug;

/// INBOX sorts before everything; the rest is case-insensitive.
fn compare_names(a: &str, b: &str) -> Ordering {
    let a_inbox = a.eq_ignore_ascii_case("INBOX");
    let b_inbox = b.eq_ignore_ascii_case("INBOX");
    match (a_inbox, b_inbox) {
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        _ => a.to_lowercase().cmp(&b.to_lowercase()).then(a.cmp(b)),
    }
}

/// Turn raw LIST replies into the ordered, deduplicated child set.
pub fn build_child_list(replies: &[ListReply]) -> Vec<MailboxDescriptor> {
    let mut children: Vec<MailboxDescriptor> = replies
        .iter()
        .map(|reply| MailboxDescriptor {
            name: decode_mailbox_name(&reply.name),
            separator: reply.delimiter.clone(),
            flags: reply.attributes.clone(),
        })
        .collect();

    children.sort_by(|a, b| compare_names(&a.name, &b.name));
    children.dedup_by(|a, b| a.name == b.name);
    children
}

/// Apply a finished LIST: write the cache, rebuild the tree children.
pub fn complete_list(
    tree: &mut TreeModel,
    cache: &mut CacheFacade,
    session: &mut SessionCore,
    parent: &str,
) -> MailBeamResult<Vec<MailboxDescriptor>> {
    let replies = std::mem::take(&mut session.list_replies);
    let children = build_child_list(&replies);
    debug!(
        parent,
        count = children.len(),
        "LIST completed, rebuilding mailbox children"
    );

    cache.set_child_mailboxes(parent, &children);

    let parent_node = tree.find_mailbox(parent).ok_or_else(|| {
        raise_error!(
            format!("mailbox '{parent}' vanished before its LIST finished"),
            ErrorCode::TargetGone
        )
    })?;
    apply_children(tree, parent_node, &children);
    Ok(children)
}

/// Shared by the live path and the cache-restore path.
pub fn apply_children(
    tree: &mut TreeModel,
    parent_node: crate::modules::tree::NodeId,
    children: &[MailboxDescriptor],
) {
    let seeds = children
        .iter()
        .map(|child| MailboxSeed {
            name: child.name.clone(),
            separator: child.separator.clone(),
            flags: child.flags.clone(),
        })
        .collect();
    tree.set_mailbox_children(parent_node, seeds);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reply(name: &str) -> ListReply {
        ListReply {
            attributes: vec!["\\HasNoChildren".into()],
            delimiter: Some("/".into()),
            name: name.into(),
        }
    }

    #[test]
    fn inbox_sorts_first_then_case_insensitive() {
        let replies: Vec<ListReply> = ["gamma", "Beta", "INBOX", "alpha"]
            .iter()
            .map(|n| reply(n))
            .collect();
        let children = build_child_list(&replies);
        let names: Vec<&str> = children.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["INBOX", "alpha", "Beta", "gamma"]);
    }

    #[test]
    fn adjacent_duplicates_collapse() {
        let replies: Vec<ListReply> = ["Drafts", "Drafts", "INBOX"]
            .iter()
            .map(|n| reply(n))
            .collect();
        let children = build_child_list(&replies);
        assert_eq!(children.len(), 2);
    }

    #[test]
    fn wire_names_are_decoded() {
        let replies = vec![reply("&ZeVnLIqe-")];
        let children = build_child_list(&replies);
        assert_eq!(children[0].name, "\u{65e5}\u{672c}\u{8a9e}");
    }

    #[test]
    fn list_scenario_populates_the_tree() {
        let mut tree = TreeModel::new();
        let mut cache =
            CacheFacade::new(Box::new(crate::modules::cache::memory::MemoryCache::new()));
        let mut session = crate::modules::state::test_support::make_session(
            crate::modules::state::ConnectionState::Authenticated,
        );
        for name in ["INBOX", "alpha", "Beta", "gamma"] {
            session.list_replies.push(reply(name));
        }

        let children = complete_list(&mut tree, &mut cache, &mut session, "").unwrap();
        assert_eq!(children.len(), 4);
        assert!(session.list_replies.is_empty());

        // tree: MessageList + the four mailboxes, sorted
        let root = tree.root();
        assert_eq!(tree.child_count(root), 5);
        let first = tree.child_at(root, 1).unwrap();
        match tree.payload(first) {
            crate::modules::tree::NodePayload::Mailbox(m) => assert_eq!(m.name, "INBOX"),
            other => panic!("unexpected: {}", other.kind_name()),
        }
        // and the cache saw the same listing
        assert_eq!(cache.child_mailboxes("").unwrap().len(), 4);
    }
}
