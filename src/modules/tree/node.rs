// Copyright © 2026 mailbeam.dev
// Licensed under MailBeam License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

//! Node payloads for the lazy mailbox tree.

use crate::modules::imap::response::{BodyStructure, Envelope};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub enum FetchState {
    #[default]
    NotFetched,
    Loading,
    Done,
}

/// A mailbox. Its first child is always the synthetic MessageList, so
/// `child(0)` yields messages and `child(1..)` yields submailboxes.
#[derive(Clone, Debug, Default)]
pub struct MailboxNode {
    /// Full Unicode path of the mailbox ("Work/Reports").
    pub name: String,
    /// Wire form of the same path (modified UTF-7).
    pub wire_name: String,
    pub separator: Option<String>,
    /// LIST name attributes (`\Noselect`, `\HasChildren`, ...).
    pub flags: Vec<String>,
    /// Fetch state of the child *mailbox* listing.
    pub child_state: FetchState,
}

impl MailboxNode {
    pub fn is_selectable(&self) -> bool {
        !self
            .flags
            .iter()
            .any(|f| f.eq_ignore_ascii_case("\\Noselect"))
    }

    /// Leaf name under its parent.
    pub fn leaf_name(&self) -> &str {
        match &self.separator {
            Some(sep) if !sep.is_empty() => self.name.rsplit(sep.as_str()).next().unwrap_or(&self.name),
            _ => &self.name,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct MessageListNode {
    pub state: FetchState,
}

#[derive(Clone, Debug, Default)]
pub struct MessageNode {
    /// Server UID; 0 until known.
    pub uid: u32,
    pub envelope: Option<Envelope>,
    pub body_structure: Option<BodyStructure>,
    pub flags: Vec<String>,
    pub size: Option<u32>,
    pub internal_date: Option<String>,
    /// Fetch state of the metadata (envelope + bodystructure).
    pub metadata_state: FetchState,
}

/// Synthetic part kinds addressable alongside numbered MIME parts.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum SpecialPart {
    Header,
    Text,
    Mime,
}

impl SpecialPart {
    pub fn suffix(&self) -> &'static str {
        match self {
            SpecialPart::Header => "HEADER",
            SpecialPart::Text => "TEXT",
            SpecialPart::Mime => "MIME",
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct PartNode {
    /// Dotted id locating this part for `BODY[...]`; empty for a
    /// top-level multipart, whose body cannot be fetched.
    pub part_id: String,
    pub media_type: String,
    pub media_subtype: String,
    pub params: Vec<(String, String)>,
    pub content_id: Option<String>,
    pub description: Option<String>,
    pub transfer_encoding: String,
    pub octets: u32,
    pub file_name: Option<String>,
    pub special: Option<SpecialPart>,
    /// True for a `multipart/*` at the top of a message or directly
    /// inside a `message/rfc822`.
    pub is_top_level_multipart: bool,
    /// Raw decoded body, fetched on demand.
    pub data: Option<Vec<u8>>,
    pub fetch_state: FetchState,
}

impl PartNode {
    pub fn fetchable(&self) -> bool {
        !self.is_top_level_multipart && !self.part_id.is_empty()
    }
}

#[derive(Clone, Debug)]
pub enum NodePayload {
    Mailbox(MailboxNode),
    MessageList(MessageListNode),
    Message(MessageNode),
    Part(PartNode),
}

impl NodePayload {
    pub fn kind_name(&self) -> &'static str {
        match self {
            NodePayload::Mailbox(_) => "mailbox",
            NodePayload::MessageList(_) => "message-list",
            NodePayload::Message(_) => "message",
            NodePayload::Part(_) => "part",
        }
    }
}
