// Copyright © 2026 mailbeam.dev
// Licensed under MailBeam License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

//! FETCH data application: untagged FETCH responses addressed to a
//! message update the tree and the cache. Used both by live Selected
//! traffic and by the post-SELECT sync walk.

use crate::modules::cache::{CacheFacade, MessageMetadata};
use crate::modules::codec::qp::{base64_decode_tolerant, quoted_printable_decode};
use crate::modules::error::{code::ErrorCode, MailBeamResult};
use crate::modules::imap::response::FetchAttr;
use crate::modules::tree::{FetchState, NodeId, NodePayload, TreeModel};
use crate::raise_error;
use tracing::{trace, warn};

/// Decode a transfer-encoded body into its raw bytes.
pub fn decode_transfer_encoding(data: &[u8], encoding: &str) -> Vec<u8> {
    match encoding.to_ascii_lowercase().as_str() {
        "base64" => base64_decode_tolerant(data).unwrap_or_else(|| data.to_vec()),
        "quoted-printable" => quoted_printable_decode(data),
        _ => data.to_vec(),
    }
}

/// Apply one untagged FETCH to the message at 1-based `seq` in the
/// selected mailbox. Returns the UID the response carried, if any.
pub fn apply_fetch(
    tree: &mut TreeModel,
    cache: &mut CacheFacade,
    mailbox: &str,
    list: NodeId,
    seq: u32,
    attrs: &[FetchAttr],
) -> MailBeamResult<Option<u32>> {
    let message = tree.message_at(list, seq).ok_or_else(|| {
        raise_error!(
            format!("FETCH for unknown sequence {seq} in '{mailbox}'"),
            ErrorCode::UnknownMessageIndex
        )
    })?;

    let mut uid = match tree.payload(message) {
        NodePayload::Message(m) if m.uid != 0 => Some(m.uid),
        _ => None,
    };

    // UID first; everything else keys the cache by it
    for attr in attrs {
        if let FetchAttr::Uid(value) = attr {
            uid = Some(*value);
            tree.set_message_uid(message, *value);
        }
    }

    let mut metadata_dirty = false;
    for attr in attrs {
        match attr {
            FetchAttr::Uid(_) => {}
            FetchAttr::Flags(flags) => {
                tree.set_flags(message, flags.clone());
                if let Some(uid) = uid {
                    cache.set_message_flags(mailbox, uid, flags);
                }
            }
            FetchAttr::Envelope(envelope) => {
                tree.set_envelope(message, (**envelope).clone());
                metadata_dirty = true;
            }
            FetchAttr::Rfc822Size(size) => {
                tree.set_size(message, *size);
                metadata_dirty = true;
            }
            FetchAttr::InternalDate(date) => {
                tree.set_internal_date(message, date.clone());
            }
            FetchAttr::BodyStructure(body) => {
                tree.set_body_structure(message, body.clone());
                metadata_dirty = true;
            }
            FetchAttr::BodySection {
                part_id,
                data: Some(data),
                ..
            } => {
                apply_body_section(tree, cache, mailbox, message, uid, part_id.as_deref(), data);
            }
            FetchAttr::BodySection { data: None, .. } => {
                trace!(seq, "NIL body section ignored");
            }
            FetchAttr::Other(what) => {
                trace!(seq, what, "unhandled fetch attribute");
            }
        }
    }

    if metadata_dirty {
        if let Some(uid) = uid {
            persist_metadata(tree, cache, mailbox, message, uid);
        }
    }

    Ok(uid)
}

fn apply_body_section(
    tree: &mut TreeModel,
    cache: &mut CacheFacade,
    mailbox: &str,
    message: NodeId,
    uid: Option<u32>,
    part_id: Option<&str>,
    data: &[u8],
) {
    let part_id = part_id.unwrap_or("");
    let Some(part) = tree.find_part(message, part_id) else {
        // a part we never built a node for (e.g. an explicit .MIME
        // request); cache it anyway
        if let Some(uid) = uid {
            cache.set_part(mailbox, uid, part_id, data);
        } else {
            warn!(part_id, "body data without node or UID dropped");
        }
        return;
    };

    let decoded = match tree.payload(part) {
        NodePayload::Part(node) => decode_transfer_encoding(data, &node.transfer_encoding),
        _ => data.to_vec(),
    };
    tree.set_part_data(part, decoded.clone());
    if let Some(uid) = uid {
        cache.set_part(mailbox, uid, part_id, &decoded);
    }
}

fn persist_metadata(
    tree: &mut TreeModel,
    cache: &mut CacheFacade,
    mailbox: &str,
    message: NodeId,
    uid: u32,
) {
    if let NodePayload::Message(node) = tree.payload(message) {
        if let (Some(envelope), Some(body)) = (&node.envelope, &node.body_structure) {
            let metadata = MessageMetadata {
                envelope: envelope.clone(),
                body_structure: body.clone(),
                size: node.size.unwrap_or(0),
                internal_date: node.internal_date.clone(),
            };
            cache.set_message_metadata(mailbox, uid, &metadata);
        }
    }
}

/// Restore a message's cached metadata into the tree, marking it Done
/// so no task is originated for it.
pub fn restore_from_cache(
    tree: &mut TreeModel,
    cache: &mut CacheFacade,
    mailbox: &str,
    list: NodeId,
    seq: u32,
    uid: u32,
) -> bool {
    let Some(message) = tree.message_at(list, seq) else {
        return false;
    };
    tree.set_message_uid(message, uid);
    if let Some(flags) = cache.message_flags(mailbox, uid) {
        tree.set_flags(message, flags);
    }
    let Some(metadata) = cache.message_metadata(mailbox, uid) else {
        return false;
    };
    tree.set_envelope(message, metadata.envelope);
    tree.set_size(message, metadata.size);
    if let Some(date) = metadata.internal_date {
        tree.set_internal_date(message, date);
    }
    tree.set_body_structure(message, metadata.body_structure);
    tree.set_metadata_state(message, FetchState::Done);
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::cache::memory::MemoryCache;
    use crate::modules::imap::response::{BodyStructure, Envelope, PartCommon};
    use crate::modules::tree::MailboxSeed;

    fn setup() -> (TreeModel, CacheFacade, NodeId) {
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
        let inbox = tree.find_mailbox("INBOX").unwrap();
        let list = tree.message_list_of(inbox).unwrap();
        tree.grow_message_list(list, 3);
        let cache = CacheFacade::new(Box::new(MemoryCache::new()));
        (tree, cache, list)
    }

    fn text_body() -> BodyStructure {
        BodyStructure::Text {
            common: PartCommon {
                media_type: "text".into(),
                media_subtype: "plain".into(),
                transfer_encoding: "quoted-printable".into(),
                octets: 10,
                ..PartCommon::default()
            },
            lines: 1,
        }
    }

    #[test]
    fn metadata_fetch_updates_tree_and_cache() {
        let (mut tree, mut cache, list) = setup();
        let attrs = vec![
            FetchAttr::Uid(42),
            FetchAttr::Flags(vec!["\\Seen".into()]),
            FetchAttr::Envelope(Box::new(Envelope {
                subject: Some("hi".into()),
                ..Envelope::default()
            })),
            FetchAttr::Rfc822Size(1234),
            FetchAttr::BodyStructure(text_body()),
        ];
        let uid = apply_fetch(&mut tree, &mut cache, "INBOX", list, 2, &attrs).unwrap();
        assert_eq!(uid, Some(42));

        let message = tree.message_at(list, 2).unwrap();
        match tree.payload(message) {
            NodePayload::Message(m) => {
                assert_eq!(m.uid, 42);
                assert_eq!(m.envelope.as_ref().unwrap().subject.as_deref(), Some("hi"));
                assert_eq!(m.size, Some(1234));
                assert_eq!(m.metadata_state, FetchState::Done);
            }
            other => panic!("unexpected: {}", other.kind_name()),
        }
        assert!(cache.message_metadata("INBOX", 42).is_some());
        assert_eq!(
            cache.message_flags("INBOX", 42),
            Some(vec!["\\Seen".to_string()])
        );
    }

    #[test]
    fn body_section_is_decoded_before_storage() {
        let (mut tree, mut cache, list) = setup();
        apply_fetch(
            &mut tree,
            &mut cache,
            "INBOX",
            list,
            1,
            &[FetchAttr::Uid(7), FetchAttr::BodyStructure(text_body())],
        )
        .unwrap();

        apply_fetch(
            &mut tree,
            &mut cache,
            "INBOX",
            list,
            1,
            &[
                FetchAttr::Uid(7),
                FetchAttr::BodySection {
                    part_id: Some("1".into()),
                    origin: None,
                    data: Some(b"Jan=20Kundr=C3=A1t".to_vec()),
                },
            ],
        )
        .unwrap();

        let expected = "Jan Kundr\u{00e1}t".as_bytes().to_vec();
        assert_eq!(cache.part("INBOX", 7, "1"), Some(expected.clone()));
        let message = tree.message_at(list, 1).unwrap();
        let part = tree.find_part(message, "1").unwrap();
        match tree.payload(part) {
            NodePayload::Part(p) => assert_eq!(p.data.as_ref(), Some(&expected)),
            other => panic!("unexpected: {}", other.kind_name()),
        }
    }

    #[test]
    fn unknown_sequence_fails_without_poisoning() {
        let (mut tree, mut cache, list) = setup();
        let err = apply_fetch(&mut tree, &mut cache, "INBOX", list, 99, &[]).unwrap_err();
        assert_eq!(err.code(), ErrorCode::UnknownMessageIndex);
    }

    #[test]
    fn cache_restore_round_trips() {
        let (mut tree, mut cache, list) = setup();
        let attrs = vec![
            FetchAttr::Uid(5),
            FetchAttr::Envelope(Box::new(Envelope {
                subject: Some("cached".into()),
                ..Envelope::default()
            })),
            FetchAttr::Rfc822Size(10),
            FetchAttr::BodyStructure(text_body()),
        ];
        apply_fetch(&mut tree, &mut cache, "INBOX", list, 1, &attrs).unwrap();

        // a fresh tree, as after restart
        let (mut tree2, _, _) = setup();
        let inbox = tree2.find_mailbox("INBOX").unwrap();
        let list2 = tree2.message_list_of(inbox).unwrap();
        assert!(restore_from_cache(
            &mut tree2, &mut cache, "INBOX", list2, 1, 5
        ));
        let message = tree2.message_at(list2, 1).unwrap();
        match tree2.payload(message) {
            NodePayload::Message(m) => {
                assert_eq!(m.envelope.as_ref().unwrap().subject.as_deref(), Some("cached"));
                assert_eq!(m.metadata_state, FetchState::Done);
            }
            other => panic!("unexpected: {}", other.kind_name()),
        }
    }
}
