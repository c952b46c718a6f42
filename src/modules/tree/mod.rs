// Copyright © 2026 mailbeam.dev
// Licensed under MailBeam License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

//! The lazy mailbox tree: an arena of `Mailbox`, `MessageList`,
//! `Message` and `Part` nodes with explicit parent indices.
//!
//! Every mailbox owns a synthetic MessageList as its first child;
//! messages own their part trees. Mutations go through the write path
//! used by the state handlers and record bracketed [`TreeEvent`]s that
//! the engine forwards to the presentation layer. Handles that must
//! survive a resync are `(mailbox path, UID, part id)` triples, never
//! arena indices.

use crate::modules::codec::utf7::encode_mailbox_name;
use crate::modules::imap::response::{BodyStructure, Envelope};

pub mod node;
pub mod notify;

pub use node::{
    FetchState, MailboxNode, MessageListNode, MessageNode, NodePayload, PartNode, SpecialPart,
};
pub use notify::TreeEvent;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct NodeId(u32);

/// Persistent, sync-survivable node address.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub enum NodeHandle {
    Mailbox { path: String },
    MessageList { mailbox: String },
    Message { mailbox: String, uid: u32 },
    Part {
        mailbox: String,
        uid: u32,
        part_id: String,
    },
}

impl NodeHandle {
    pub fn mailbox_path(&self) -> &str {
        match self {
            NodeHandle::Mailbox { path } => path,
            NodeHandle::MessageList { mailbox }
            | NodeHandle::Message { mailbox, .. }
            | NodeHandle::Part { mailbox, .. } => mailbox,
        }
    }
}

#[derive(Debug)]
struct Slot {
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    payload: NodePayload,
    alive: bool,
}

/// Seed for one child mailbox produced by a LIST task.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MailboxSeed {
    pub name: String,
    pub separator: Option<String>,
    pub flags: Vec<String>,
}

#[derive(Debug)]
pub struct TreeModel {
    slots: Vec<Slot>,
    free: Vec<u32>,
    root: NodeId,
    events: Vec<TreeEvent>,
}

impl Default for TreeModel {
    fn default() -> Self {
        Self::new()
    }
}

impl TreeModel {
    pub fn new() -> Self {
        let mut model = Self {
            slots: Vec::new(),
            free: Vec::new(),
            root: NodeId(0),
            events: Vec::new(),
        };
        let root = model.alloc(
            None,
            NodePayload::Mailbox(MailboxNode {
                name: String::new(),
                wire_name: String::new(),
                separator: None,
                // the root cannot hold messages itself
                flags: vec!["\\Noselect".into()],
                child_state: FetchState::NotFetched,
            }),
        );
        model.root = root;
        model.attach_message_list(root);
        model
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    fn alloc(&mut self, parent: Option<NodeId>, payload: NodePayload) -> NodeId {
        if let Some(index) = self.free.pop() {
            self.slots[index as usize] = Slot {
                parent,
                children: Vec::new(),
                payload,
                alive: true,
            };
            return NodeId(index);
        }
        self.slots.push(Slot {
            parent,
            children: Vec::new(),
            payload,
            alive: true,
        });
        NodeId((self.slots.len() - 1) as u32)
    }

    fn slot(&self, id: NodeId) -> &Slot {
        &self.slots[id.0 as usize]
    }

    fn slot_mut(&mut self, id: NodeId) -> &mut Slot {
        &mut self.slots[id.0 as usize]
    }

    pub fn is_alive(&self, id: NodeId) -> bool {
        (id.0 as usize) < self.slots.len() && self.slot(id).alive
    }

    pub fn payload(&self, id: NodeId) -> &NodePayload {
        &self.slot(id).payload
    }

    pub fn payload_mut(&mut self, id: NodeId) -> &mut NodePayload {
        &mut self.slot_mut(id).payload
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.slot(id).parent
    }

    pub fn child_count(&self, id: NodeId) -> usize {
        self.slot(id).children.len()
    }

    pub fn child_at(&self, id: NodeId, index: usize) -> Option<NodeId> {
        self.slot(id).children.get(index).copied()
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.slot(id).children
    }

    pub fn take_events(&mut self) -> Vec<TreeEvent> {
        std::mem::take(&mut self.events)
    }

    // ── handles ──────────────────────────────────────────────────

    pub fn handle_of(&self, id: NodeId) -> NodeHandle {
        match &self.slot(id).payload {
            NodePayload::Mailbox(mbx) => NodeHandle::Mailbox {
                path: mbx.name.clone(),
            },
            NodePayload::MessageList(_) => NodeHandle::MessageList {
                mailbox: self.owning_mailbox_name(id),
            },
            NodePayload::Message(msg) => NodeHandle::Message {
                mailbox: self.owning_mailbox_name(id),
                uid: msg.uid,
            },
            NodePayload::Part(part) => {
                let (mailbox, uid) = self.owning_message(id);
                NodeHandle::Part {
                    mailbox,
                    uid,
                    part_id: part.part_id.clone(),
                }
            }
        }
    }

    fn owning_mailbox_name(&self, mut id: NodeId) -> String {
        loop {
            if let NodePayload::Mailbox(mbx) = &self.slot(id).payload {
                return mbx.name.clone();
            }
            match self.slot(id).parent {
                Some(parent) => id = parent,
                None => return String::new(),
            }
        }
    }

    fn owning_message(&self, mut id: NodeId) -> (String, u32) {
        let mut uid = 0;
        loop {
            if let NodePayload::Message(msg) = &self.slot(id).payload {
                if uid == 0 {
                    uid = msg.uid;
                }
            }
            if let NodePayload::Mailbox(mbx) = &self.slot(id).payload {
                return (mbx.name.clone(), uid);
            }
            match self.slot(id).parent {
                Some(parent) => id = parent,
                None => return (String::new(), uid),
            }
        }
    }

    pub fn resolve(&self, handle: &NodeHandle) -> Option<NodeId> {
        match handle {
            NodeHandle::Mailbox { path } => self.find_mailbox(path),
            NodeHandle::MessageList { mailbox } => {
                let mbx = self.find_mailbox(mailbox)?;
                self.message_list_of(mbx)
            }
            NodeHandle::Message { mailbox, uid } => {
                let mbx = self.find_mailbox(mailbox)?;
                let list = self.message_list_of(mbx)?;
                self.find_message_by_uid(list, *uid)
            }
            NodeHandle::Part {
                mailbox,
                uid,
                part_id,
            } => {
                let mbx = self.find_mailbox(mailbox)?;
                let list = self.message_list_of(mbx)?;
                let message = self.find_message_by_uid(list, *uid)?;
                self.find_part(message, part_id)
            }
        }
    }

    pub fn find_mailbox(&self, path: &str) -> Option<NodeId> {
        if path.is_empty() {
            return Some(self.root);
        }
        self.find_mailbox_under(self.root, path)
    }

    fn find_mailbox_under(&self, node: NodeId, path: &str) -> Option<NodeId> {
        for &child in &self.slot(node).children {
            if let NodePayload::Mailbox(mbx) = &self.slot(child).payload {
                if mbx.name == path {
                    return Some(child);
                }
                let is_prefix = match &mbx.separator {
                    Some(sep) if !sep.is_empty() => {
                        path.starts_with(&format!("{}{}", mbx.name, sep))
                    }
                    _ => false,
                };
                if is_prefix {
                    if let Some(found) = self.find_mailbox_under(child, path) {
                        return Some(found);
                    }
                }
            }
        }
        None
    }

    pub fn message_list_of(&self, mailbox: NodeId) -> Option<NodeId> {
        let first = self.child_at(mailbox, 0)?;
        matches!(self.slot(first).payload, NodePayload::MessageList(_)).then_some(first)
    }

    pub fn find_message_by_uid(&self, list: NodeId, uid: u32) -> Option<NodeId> {
        if uid == 0 {
            return None;
        }
        self.slot(list).children.iter().copied().find(|&child| {
            matches!(&self.slot(child).payload, NodePayload::Message(m) if m.uid == uid)
        })
    }

    pub fn find_part(&self, node: NodeId, part_id: &str) -> Option<NodeId> {
        for &child in &self.slot(node).children {
            match &self.slot(child).payload {
                NodePayload::Part(part) if part.part_id == part_id => return Some(child),
                _ => {}
            }
            if let Some(found) = self.find_part(child, part_id) {
                return Some(found);
            }
        }
        None
    }

    // ── mailbox hierarchy ────────────────────────────────────────

    fn attach_message_list(&mut self, mailbox: NodeId) {
        let selectable = match &self.slot(mailbox).payload {
            NodePayload::Mailbox(mbx) => mbx.is_selectable(),
            _ => false,
        };
        let list = self.alloc(
            Some(mailbox),
            NodePayload::MessageList(MessageListNode {
                // nothing will ever be fetched for \Noselect mailboxes
                state: if selectable {
                    FetchState::NotFetched
                } else {
                    FetchState::Done
                },
            }),
        );
        self.slot_mut(mailbox).children.insert(0, list);
    }

    fn remove_subtree(&mut self, id: NodeId) {
        let children = std::mem::take(&mut self.slot_mut(id).children);
        for child in children {
            self.remove_subtree(child);
        }
        let slot = self.slot_mut(id);
        slot.alive = false;
        slot.parent = None;
        self.free.push(id.0);
    }

    /// Replace the child mailboxes of `parent` from a LIST result. The
    /// MessageList at position 0 is preserved; the whole operation is
    /// a layout reset because sorted reordering cannot be expressed as
    /// a small diff.
    pub fn set_mailbox_children(&mut self, parent: NodeId, seeds: Vec<MailboxSeed>) {
        let handle = self.handle_of(parent);
        self.events.push(TreeEvent::ResetBegin {
            node: handle.clone(),
        });

        let old: Vec<NodeId> = self.slot(parent).children[1..].to_vec();
        for child in old {
            self.remove_subtree(child);
        }
        self.slot_mut(parent).children.truncate(1);

        for seed in seeds {
            let wire_name = encode_mailbox_name(&seed.name);
            let child = self.alloc(
                Some(parent),
                NodePayload::Mailbox(MailboxNode {
                    name: seed.name,
                    wire_name,
                    separator: seed.separator,
                    flags: seed.flags,
                    child_state: FetchState::NotFetched,
                }),
            );
            self.slot_mut(parent).children.push(child);
            self.attach_message_list(child);
        }

        if let NodePayload::Mailbox(mbx) = self.payload_mut(parent) {
            mbx.child_state = FetchState::Done;
        }
        self.events.push(TreeEvent::ResetEnd { node: handle });
    }

    // ── message list ─────────────────────────────────────────────

    /// Grow or shrink the list to `count` placeholder messages.
    pub fn set_placeholder_count(&mut self, list: NodeId, count: usize) {
        let current = self.child_count(list);
        if count > current {
            self.grow_message_list(list, count - current);
        } else if count < current {
            let handle = self.handle_of(list);
            let remove = current - count;
            self.events.push(TreeEvent::AboutToRemove {
                parent: handle.clone(),
                index: count,
                count: remove,
            });
            let doomed: Vec<NodeId> = self.slot(list).children[count..].to_vec();
            for child in doomed {
                self.remove_subtree(child);
            }
            self.slot_mut(list).children.truncate(count);
            self.events.push(TreeEvent::Removed {
                parent: handle,
                index: count,
                count: remove,
            });
        }
    }

    /// Append `count` placeholder messages (EXISTS growth).
    pub fn grow_message_list(&mut self, list: NodeId, count: usize) {
        if count == 0 {
            return;
        }
        let handle = self.handle_of(list);
        let index = self.child_count(list);
        self.events.push(TreeEvent::AboutToInsert {
            parent: handle.clone(),
            index,
            count,
        });
        for _ in 0..count {
            let message = self.alloc(Some(list), NodePayload::Message(MessageNode::default()));
            self.slot_mut(list).children.push(message);
        }
        self.events.push(TreeEvent::Inserted {
            parent: handle,
            index,
            count,
        });
    }

    /// Message node at 1-based sequence number.
    pub fn message_at(&self, list: NodeId, seq: u32) -> Option<NodeId> {
        if seq == 0 {
            return None;
        }
        self.child_at(list, (seq - 1) as usize)
    }

    /// Apply an EXPUNGE for 1-based sequence `seq`: the message is
    /// removed, everything after it shifts down by one. Returns the
    /// handle of the removed message for task cancellation.
    pub fn apply_expunge(&mut self, list: NodeId, seq: u32) -> Option<NodeHandle> {
        let index = (seq.checked_sub(1)?) as usize;
        if index >= self.child_count(list) {
            return None;
        }
        let victim = self.slot(list).children[index];
        let victim_handle = self.handle_of(victim);
        let parent_handle = self.handle_of(list);
        self.events.push(TreeEvent::AboutToRemove {
            parent: parent_handle.clone(),
            index,
            count: 1,
        });
        self.slot_mut(list).children.remove(index);
        self.remove_subtree(victim);
        self.events.push(TreeEvent::Removed {
            parent: parent_handle,
            index,
            count: 1,
        });
        Some(victim_handle)
    }

    pub fn set_list_state(&mut self, list: NodeId, state: FetchState) {
        if let NodePayload::MessageList(node) = self.payload_mut(list) {
            node.state = state;
        }
    }

    // ── message data ─────────────────────────────────────────────

    pub fn set_message_uid(&mut self, message: NodeId, uid: u32) {
        if let NodePayload::Message(node) = self.payload_mut(message) {
            node.uid = uid;
        }
    }

    pub fn set_flags(&mut self, message: NodeId, flags: Vec<String>) {
        let applied = match self.payload_mut(message) {
            NodePayload::Message(node) => {
                node.flags = flags;
                true
            }
            _ => false,
        };
        if applied {
            let handle = self.handle_of(message);
            self.events.push(TreeEvent::Changed { node: handle });
        }
    }

    pub fn set_envelope(&mut self, message: NodeId, envelope: Envelope) {
        let applied = match self.payload_mut(message) {
            NodePayload::Message(node) => {
                node.envelope = Some(envelope);
                true
            }
            _ => false,
        };
        if applied {
            let handle = self.handle_of(message);
            self.events.push(TreeEvent::Changed { node: handle });
        }
    }

    pub fn set_size(&mut self, message: NodeId, size: u32) {
        if let NodePayload::Message(node) = self.payload_mut(message) {
            node.size = Some(size);
        }
    }

    pub fn set_internal_date(&mut self, message: NodeId, date: String) {
        if let NodePayload::Message(node) = self.payload_mut(message) {
            node.internal_date = Some(date);
        }
    }

    pub fn set_metadata_state(&mut self, message: NodeId, state: FetchState) {
        if let NodePayload::Message(node) = self.payload_mut(message) {
            node.metadata_state = state;
        }
    }

    /// Store the bodystructure and (re)build the part tree under the
    /// message.
    pub fn set_body_structure(&mut self, message: NodeId, body: BodyStructure) {
        let handle = self.handle_of(message);
        self.events.push(TreeEvent::ResetBegin {
            node: handle.clone(),
        });
        let old = std::mem::take(&mut self.slot_mut(message).children);
        for child in old {
            self.remove_subtree(child);
        }

        self.build_message_parts(message, &body, "");
        // whole-message header and text pseudo-parts
        self.add_special_part(message, SpecialPart::Header, "HEADER");
        self.add_special_part(message, SpecialPart::Text, "TEXT");

        if let NodePayload::Message(node) = self.payload_mut(message) {
            node.body_structure = Some(body);
            node.metadata_state = FetchState::Done;
        }
        self.events.push(TreeEvent::ResetEnd { node: handle });
    }

    fn add_special_part(&mut self, parent: NodeId, special: SpecialPart, part_id: &str) -> NodeId {
        let node = self.alloc(
            Some(parent),
            NodePayload::Part(PartNode {
                part_id: part_id.to_string(),
                media_type: "text".into(),
                media_subtype: "plain".into(),
                special: Some(special),
                ..PartNode::default()
            }),
        );
        self.slot_mut(parent).children.push(node);
        node
    }

    /// Build the structural parts of one (possibly nested) message.
    /// `prefix` is empty for the top level and the container part id
    /// for a message/rfc822 payload.
    fn build_message_parts(&mut self, message: NodeId, body: &BodyStructure, prefix: &str) {
        match body {
            BodyStructure::Multipart { subtype, params, parts } => {
                let top = self.alloc(
                    Some(message),
                    NodePayload::Part(PartNode {
                        part_id: String::new(),
                        media_type: "multipart".into(),
                        media_subtype: subtype.clone(),
                        params: params.clone(),
                        is_top_level_multipart: true,
                        ..PartNode::default()
                    }),
                );
                self.slot_mut(message).children.push(top);
                for (i, sub) in parts.iter().enumerate() {
                    let id = join_part_id(prefix, i + 1);
                    self.build_part(top, sub, id);
                }
            }
            single => {
                let id = join_part_id(prefix, 1);
                self.build_part(message, single, id);
            }
        }
    }

    fn build_part(&mut self, parent: NodeId, body: &BodyStructure, id: String) -> NodeId {
        match body {
            BodyStructure::Multipart { subtype, params, parts } => {
                let node = self.alloc(
                    Some(parent),
                    NodePayload::Part(PartNode {
                        part_id: id.clone(),
                        media_type: "multipart".into(),
                        media_subtype: subtype.clone(),
                        params: params.clone(),
                        ..PartNode::default()
                    }),
                );
                self.slot_mut(parent).children.push(node);
                for (i, sub) in parts.iter().enumerate() {
                    let child_id = format!("{}.{}", id, i + 1);
                    self.build_part(node, sub, child_id);
                }
                node
            }
            BodyStructure::Message {
                common,
                envelope,
                body,
                ..
            } => {
                let node = self.alloc(
                    Some(parent),
                    NodePayload::Part(PartNode {
                        part_id: id.clone(),
                        media_type: common.media_type.clone(),
                        media_subtype: common.media_subtype.clone(),
                        params: common.params.clone(),
                        content_id: common.content_id.clone(),
                        description: common.description.clone(),
                        transfer_encoding: common.transfer_encoding.clone(),
                        octets: common.octets,
                        file_name: common.file_name(),
                        ..PartNode::default()
                    }),
                );
                self.slot_mut(parent).children.push(node);

                // message/rfc822 introduces a nested Message
                let nested = self.alloc(
                    Some(node),
                    NodePayload::Message(MessageNode {
                        envelope: Some((**envelope).clone()),
                        metadata_state: FetchState::Done,
                        ..MessageNode::default()
                    }),
                );
                self.slot_mut(node).children.push(nested);
                self.build_message_parts(nested, body, &id);
                if let NodePayload::Message(n) = self.payload_mut(nested) {
                    n.body_structure = Some((**body).clone());
                }

                self.add_special_part(node, SpecialPart::Header, &format!("{id}.HEADER"));
                self.add_special_part(node, SpecialPart::Text, &format!("{id}.TEXT"));
                self.add_mime_part(node, &id);
                node
            }
            BodyStructure::Basic { common } | BodyStructure::Text { common, .. } => {
                let node = self.alloc(
                    Some(parent),
                    NodePayload::Part(PartNode {
                        part_id: id.clone(),
                        media_type: common.media_type.clone(),
                        media_subtype: common.media_subtype.clone(),
                        params: common.params.clone(),
                        content_id: common.content_id.clone(),
                        description: common.description.clone(),
                        transfer_encoding: common.transfer_encoding.clone(),
                        octets: common.octets,
                        file_name: common.file_name(),
                        ..PartNode::default()
                    }),
                );
                self.slot_mut(parent).children.push(node);
                self.add_mime_part(node, &id);
                node
            }
        }
    }

    fn add_mime_part(&mut self, parent: NodeId, base_id: &str) {
        self.add_special_part(parent, SpecialPart::Mime, &format!("{base_id}.MIME"));
    }

    pub fn set_part_data(&mut self, part: NodeId, data: Vec<u8>) {
        let applied = match self.payload_mut(part) {
            NodePayload::Part(node) => {
                node.data = Some(data);
                node.fetch_state = FetchState::Done;
                true
            }
            _ => false,
        };
        if applied {
            let handle = self.handle_of(part);
            self.events.push(TreeEvent::Changed { node: handle });
        }
    }

    pub fn set_part_state(&mut self, part: NodeId, state: FetchState) {
        if let NodePayload::Part(node) = self.payload_mut(part) {
            node.fetch_state = state;
        }
    }
}

fn join_part_id(prefix: &str, index: usize) -> String {
    if prefix.is_empty() {
        index.to_string()
    } else {
        format!("{prefix}.{index}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::imap::response::PartCommon;

    fn seed(name: &str) -> MailboxSeed {
        MailboxSeed {
            name: name.into(),
            separator: Some("/".into()),
            flags: vec![],
        }
    }

    fn text_part(subtype: &str) -> BodyStructure {
        BodyStructure::Text {
            common: PartCommon {
                media_type: "text".into(),
                media_subtype: subtype.into(),
                transfer_encoding: "7bit".into(),
                octets: 42,
                ..PartCommon::default()
            },
            lines: 2,
        }
    }

    #[test]
    fn every_mailbox_gets_a_message_list_first() {
        let mut model = TreeModel::new();
        let root = model.root();
        model.set_mailbox_children(root, vec![seed("INBOX"), seed("Sent")]);

        assert_eq!(model.child_count(root), 3);
        let inbox = model.child_at(root, 1).unwrap();
        let first = model.child_at(inbox, 0).unwrap();
        assert!(matches!(
            model.payload(first),
            NodePayload::MessageList(_)
        ));
    }

    #[test]
    fn noselect_mailboxes_have_done_lists() {
        let mut model = TreeModel::new();
        let root = model.root();
        model.set_mailbox_children(
            root,
            vec![MailboxSeed {
                name: "folders-only".into(),
                separator: Some("/".into()),
                flags: vec!["\\Noselect".into()],
            }],
        );
        let mbx = model.child_at(root, 1).unwrap();
        let list = model.message_list_of(mbx).unwrap();
        match model.payload(list) {
            NodePayload::MessageList(node) => assert_eq!(node.state, FetchState::Done),
            other => panic!("unexpected: {}", other.kind_name()),
        }
    }

    #[test]
    fn expunge_shifts_sequence_numbers() {
        let mut model = TreeModel::new();
        let root = model.root();
        model.set_mailbox_children(root, vec![seed("INBOX")]);
        let inbox = model.child_at(root, 1).unwrap();
        let list = model.message_list_of(inbox).unwrap();

        model.grow_message_list(list, 3);
        for (i, uid) in [10u32, 20, 30].iter().enumerate() {
            let msg = model.message_at(list, (i + 1) as u32).unwrap();
            model.set_message_uid(msg, *uid);
        }

        let removed = model.apply_expunge(list, 2).unwrap();
        assert_eq!(
            removed,
            NodeHandle::Message {
                mailbox: "INBOX".into(),
                uid: 20
            }
        );
        assert_eq!(model.child_count(list), 2);
        // former seq 3 is now seq 2
        let msg = model.message_at(list, 2).unwrap();
        match model.payload(msg) {
            NodePayload::Message(m) => assert_eq!(m.uid, 30),
            other => panic!("unexpected: {}", other.kind_name()),
        }
    }

    #[test]
    fn expunge_events_bracket_the_mutation() {
        let mut model = TreeModel::new();
        let root = model.root();
        model.set_mailbox_children(root, vec![seed("INBOX")]);
        let inbox = model.child_at(root, 1).unwrap();
        let list = model.message_list_of(inbox).unwrap();
        model.grow_message_list(list, 1);
        model.take_events();

        model.apply_expunge(list, 1);
        let events = model.take_events();
        assert!(matches!(events[0], TreeEvent::AboutToRemove { index: 0, count: 1, .. }));
        assert!(matches!(events[1], TreeEvent::Removed { index: 0, count: 1, .. }));
    }

    #[test]
    fn part_ids_follow_the_bodystructure() {
        let body = BodyStructure::Multipart {
            subtype: "mixed".into(),
            params: vec![],
            parts: vec![
                text_part("plain"),
                BodyStructure::Multipart {
                    subtype: "alternative".into(),
                    params: vec![],
                    parts: vec![text_part("plain"), text_part("html")],
                },
            ],
        };

        let mut model = TreeModel::new();
        let root = model.root();
        model.set_mailbox_children(root, vec![seed("INBOX")]);
        let inbox = model.child_at(root, 1).unwrap();
        let list = model.message_list_of(inbox).unwrap();
        model.grow_message_list(list, 1);
        let msg = model.message_at(list, 1).unwrap();
        model.set_message_uid(msg, 7);
        model.set_body_structure(msg, body);

        for expected in ["1", "2", "2.1", "2.2", "HEADER", "TEXT", "1.MIME", "2.1.MIME"] {
            assert!(
                model.find_part(msg, expected).is_some(),
                "missing part {expected}"
            );
        }
        // the top-level multipart has no fetchable id
        let top = model.child_at(msg, 0).unwrap();
        match model.payload(top) {
            NodePayload::Part(p) => {
                assert!(p.is_top_level_multipart);
                assert!(!p.fetchable());
            }
            other => panic!("unexpected: {}", other.kind_name()),
        }
    }

    #[test]
    fn nested_rfc822_introduces_a_message_node() {
        let inner = BodyStructure::Text {
            common: PartCommon {
                media_type: "text".into(),
                media_subtype: "plain".into(),
                transfer_encoding: "7bit".into(),
                octets: 5,
                ..PartCommon::default()
            },
            lines: 1,
        };
        let body = BodyStructure::Multipart {
            subtype: "mixed".into(),
            params: vec![],
            parts: vec![
                text_part("plain"),
                BodyStructure::Message {
                    common: PartCommon {
                        media_type: "message".into(),
                        media_subtype: "rfc822".into(),
                        transfer_encoding: "7bit".into(),
                        octets: 500,
                        ..PartCommon::default()
                    },
                    envelope: Box::new(Envelope::default()),
                    body: Box::new(inner),
                    lines: 10,
                },
            ],
        };

        let mut model = TreeModel::new();
        let root = model.root();
        model.set_mailbox_children(root, vec![seed("INBOX")]);
        let inbox = model.child_at(root, 1).unwrap();
        let list = model.message_list_of(inbox).unwrap();
        model.grow_message_list(list, 1);
        let msg = model.message_at(list, 1).unwrap();
        model.set_message_uid(msg, 3);
        model.set_body_structure(msg, body);

        let rfc822 = model.find_part(msg, "2").unwrap();
        let nested = model.child_at(rfc822, 0).unwrap();
        assert!(matches!(model.payload(nested), NodePayload::Message(_)));
        // the embedded message's own part and pseudo-parts
        assert!(model.find_part(msg, "2.1").is_some());
        assert!(model.find_part(msg, "2.HEADER").is_some());
        assert!(model.find_part(msg, "2.TEXT").is_some());
    }

    #[test]
    fn handles_survive_resolution_round_trip() {
        let mut model = TreeModel::new();
        let root = model.root();
        model.set_mailbox_children(root, vec![seed("INBOX"), seed("Work")]);
        let work = model.child_at(root, 2).unwrap();
        model.set_mailbox_children(work, vec![seed("Work/Reports")]);

        let reports = model.find_mailbox("Work/Reports").unwrap();
        let handle = model.handle_of(reports);
        assert_eq!(model.resolve(&handle), Some(reports));

        let list = model.message_list_of(reports).unwrap();
        model.grow_message_list(list, 2);
        let msg = model.message_at(list, 2).unwrap();
        model.set_message_uid(msg, 99);
        let handle = model.handle_of(msg);
        assert_eq!(
            handle,
            NodeHandle::Message {
                mailbox: "Work/Reports".into(),
                uid: 99
            }
        );
        assert_eq!(model.resolve(&handle), Some(msg));
    }
}
