// Copyright © 2026 mailbeam.dev
// Licensed under MailBeam License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

//! Owned, typed IMAP response records.
//!
//! The wire grammar is handled by imap-proto; this module converts its
//! borrowed structures into owned records the state handlers and tasks
//! consume, decoding RFC 2047 header fields into model-level Unicode
//! on the way.

use crate::modules::codec::address::MailAddress;
use crate::modules::codec::rfc2047::decode_rfc2047;
use crate::modules::codec::rfc2231::extract_param;
use imap_proto::types as wire;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum StatusKind {
    Ok,
    No,
    Bad,
    PreAuth,
    Bye,
}

impl From<wire::Status> for StatusKind {
    fn from(status: wire::Status) -> Self {
        match status {
            wire::Status::Ok => StatusKind::Ok,
            wire::Status::No => StatusKind::No,
            wire::Status::Bad => StatusKind::Bad,
            wire::Status::PreAuth => StatusKind::PreAuth,
            wire::Status::Bye => StatusKind::Bye,
        }
    }
}

/// Response codes the engine acts upon; everything else degrades to
/// `Other` with its raw text.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum RespCode {
    Alert,
    Capabilities(Vec<String>),
    PermanentFlags(Vec<String>),
    ReadOnly,
    ReadWrite,
    TryCreate,
    UidNext(u32),
    UidValidity(u32),
    Unseen(u32),
    AppendUid { uid_validity: u32, uid: Option<u32> },
    UidNotSticky,
    Other(String),
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum StatusItem {
    Messages(u32),
    Recent(u32),
    UidNext(u32),
    UidValidity(u32),
    Unseen(u32),
    Other(String),
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum MailboxData {
    Exists(u32),
    Recent(u32),
    Flags(Vec<String>),
    List {
        attributes: Vec<String>,
        delimiter: Option<String>,
        name: String,
    },
    Search(Vec<u32>),
    Status {
        mailbox: String,
        items: Vec<StatusItem>,
    },
}

/// Envelope in canonical model form: Unicode display strings, raw
/// RFC 2822 date text.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub date: Option<String>,
    pub subject: Option<String>,
    pub from: Vec<MailAddress>,
    pub sender: Vec<MailAddress>,
    pub reply_to: Vec<MailAddress>,
    pub to: Vec<MailAddress>,
    pub cc: Vec<MailAddress>,
    pub bcc: Vec<MailAddress>,
    pub in_reply_to: Option<String>,
    pub message_id: Option<String>,
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct PartCommon {
    pub media_type: String,
    pub media_subtype: String,
    pub params: Vec<(String, String)>,
    pub content_id: Option<String>,
    pub description: Option<String>,
    pub transfer_encoding: String,
    pub octets: u32,
    pub disposition: Option<(String, Vec<(String, String)>)>,
}

impl PartCommon {
    /// Suggested file name, preferring Content-Disposition over the
    /// legacy Content-Type `name` parameter.
    pub fn file_name(&self) -> Option<String> {
        if let Some((_, params)) = &self.disposition {
            if let Some(name) = extract_param(params, "filename") {
                return Some(name);
            }
        }
        extract_param(&self.params, "name")
    }

    pub fn charset(&self) -> Option<String> {
        extract_param(&self.params, "charset")
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum BodyStructure {
    Basic {
        common: PartCommon,
    },
    Text {
        common: PartCommon,
        lines: u32,
    },
    Message {
        common: PartCommon,
        envelope: Box<Envelope>,
        body: Box<BodyStructure>,
        lines: u32,
    },
    Multipart {
        subtype: String,
        params: Vec<(String, String)>,
        parts: Vec<BodyStructure>,
    },
}

impl BodyStructure {
    pub fn is_multipart(&self) -> bool {
        matches!(self, BodyStructure::Multipart { .. })
    }

    pub fn media_type(&self) -> (String, String) {
        match self {
            BodyStructure::Basic { common }
            | BodyStructure::Text { common, .. }
            | BodyStructure::Message { common, .. } => {
                (common.media_type.clone(), common.media_subtype.clone())
            }
            BodyStructure::Multipart { subtype, .. } => ("multipart".into(), subtype.clone()),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum FetchAttr {
    Uid(u32),
    Flags(Vec<String>),
    Rfc822Size(u32),
    InternalDate(String),
    Envelope(Box<Envelope>),
    BodyStructure(BodyStructure),
    BodySection {
        /// Dotted part id, e.g. "1.2", "2.HEADER"; `None` addresses
        /// the whole message.
        part_id: Option<String>,
        origin: Option<u32>,
        data: Option<Vec<u8>>,
    },
    Other(String),
}

/// One complete response from the server, plus the synthetic terminal
/// `Disconnected` record the transport emits exactly once.
#[derive(Clone, Debug, PartialEq)]
pub enum ImapResponse {
    /// Tagged completion.
    Done {
        tag: String,
        status: StatusKind,
        code: Option<RespCode>,
        information: Option<String>,
    },
    /// Untagged `* OK/NO/BAD/PREAUTH/BYE`.
    Data {
        status: StatusKind,
        code: Option<RespCode>,
        information: Option<String>,
    },
    /// Continuation request, releases a pending literal.
    Continue { information: Option<String> },
    Capabilities(Vec<String>),
    Expunge(u32),
    Fetch { seq: u32, attrs: Vec<FetchAttr> },
    MailboxData(MailboxData),
    /// `* GENURLAUTH "<url>"`; the URLAUTH extension's reply.
    GenUrlAuth(String),
    /// Anything the engine has no use for (ID, ACL, QUOTA, ...).
    Other(String),
    /// Synthetic terminal record; no responses follow it.
    Disconnected { reason: String },
}

fn cow_bytes_to_string(value: &Option<std::borrow::Cow<'_, [u8]>>) -> Option<String> {
    value
        .as_ref()
        .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
}

fn cow_str(value: &std::borrow::Cow<'_, str>) -> String {
    value.to_string()
}

fn name_attribute_str(attr: &wire::NameAttribute<'_>) -> String {
    match attr {
        wire::NameAttribute::NoInferiors => "\\Noinferiors".to_string(),
        wire::NameAttribute::NoSelect => "\\Noselect".to_string(),
        wire::NameAttribute::Marked => "\\Marked".to_string(),
        wire::NameAttribute::Unmarked => "\\Unmarked".to_string(),
        wire::NameAttribute::All => "\\All".to_string(),
        wire::NameAttribute::Archive => "\\Archive".to_string(),
        wire::NameAttribute::Drafts => "\\Drafts".to_string(),
        wire::NameAttribute::Flagged => "\\Flagged".to_string(),
        wire::NameAttribute::Junk => "\\Junk".to_string(),
        wire::NameAttribute::Sent => "\\Sent".to_string(),
        wire::NameAttribute::Trash => "\\Trash".to_string(),
        wire::NameAttribute::Extension(s) => s.to_string(),
        _ => String::new(),
    }
}

fn convert_addresses(list: &Option<Vec<wire::Address<'_>>>) -> Vec<MailAddress> {
    list.as_ref()
        .map(|addresses| {
            addresses
                .iter()
                .map(|a| MailAddress {
                    name: a
                        .name
                        .as_ref()
                        .map(|raw| decode_rfc2047(raw))
                        .unwrap_or_default(),
                    adl: cow_bytes_to_string(&a.adl).unwrap_or_default(),
                    mailbox: cow_bytes_to_string(&a.mailbox).unwrap_or_default(),
                    host: cow_bytes_to_string(&a.host).unwrap_or_default(),
                })
                .collect()
        })
        .unwrap_or_default()
}

pub fn convert_envelope(envelope: &wire::Envelope<'_>) -> Envelope {
    Envelope {
        date: cow_bytes_to_string(&envelope.date),
        subject: envelope
            .subject
            .as_ref()
            .map(|raw| decode_rfc2047(raw)),
        from: convert_addresses(&envelope.from),
        sender: convert_addresses(&envelope.sender),
        reply_to: convert_addresses(&envelope.reply_to),
        to: convert_addresses(&envelope.to),
        cc: convert_addresses(&envelope.cc),
        bcc: convert_addresses(&envelope.bcc),
        in_reply_to: cow_bytes_to_string(&envelope.in_reply_to),
        message_id: cow_bytes_to_string(&envelope.message_id),
    }
}

fn convert_params(params: &wire::BodyParams<'_>) -> Vec<(String, String)> {
    params
        .as_ref()
        .map(|list| {
            list.iter()
                .map(|(k, v)| (cow_str(k), cow_str(v)))
                .collect()
        })
        .unwrap_or_default()
}

fn transfer_encoding_name(encoding: &wire::ContentEncoding<'_>) -> String {
    match encoding {
        wire::ContentEncoding::SevenBit => "7bit".into(),
        wire::ContentEncoding::EightBit => "8bit".into(),
        wire::ContentEncoding::Binary => "binary".into(),
        wire::ContentEncoding::Base64 => "base64".into(),
        wire::ContentEncoding::QuotedPrintable => "quoted-printable".into(),
        wire::ContentEncoding::Other(name) => name.to_ascii_lowercase(),
    }
}

fn convert_common(
    common: &wire::BodyContentCommon<'_>,
    single: &wire::BodyContentSinglePart<'_>,
) -> PartCommon {
    PartCommon {
        media_type: common.ty.ty.to_ascii_lowercase(),
        media_subtype: common.ty.subtype.to_ascii_lowercase(),
        params: convert_params(&common.ty.params),
        content_id: single.id.as_ref().map(cow_str),
        description: single
            .description
            .as_ref()
            .map(|raw| decode_rfc2047(raw.as_bytes())),
        transfer_encoding: transfer_encoding_name(&single.transfer_encoding),
        octets: single.octets,
        disposition: common.disposition.as_ref().map(|d| {
            (
                d.ty.to_ascii_lowercase(),
                convert_params(&d.params),
            )
        }),
    }
}

pub fn convert_body_structure(body: &wire::BodyStructure<'_>) -> BodyStructure {
    match body {
        wire::BodyStructure::Basic { common, other, .. } => BodyStructure::Basic {
            common: convert_common(common, other),
        },
        wire::BodyStructure::Text {
            common,
            other,
            lines,
            ..
        } => BodyStructure::Text {
            common: convert_common(common, other),
            lines: *lines,
        },
        wire::BodyStructure::Message {
            common,
            other,
            envelope,
            body,
            lines,
            ..
        } => BodyStructure::Message {
            common: convert_common(common, other),
            envelope: Box::new(convert_envelope(envelope)),
            body: Box::new(convert_body_structure(body)),
            lines: *lines,
        },
        wire::BodyStructure::Multipart { common, bodies, .. } => BodyStructure::Multipart {
            subtype: common.ty.subtype.to_ascii_lowercase(),
            params: convert_params(&common.ty.params),
            parts: bodies.iter().map(convert_body_structure).collect(),
        },
    }
}

fn capability_name(capability: &wire::Capability<'_>) -> String {
    match capability {
        wire::Capability::Imap4rev1 => "IMAP4rev1".into(),
        wire::Capability::Auth(mechanism) => format!("AUTH={}", mechanism),
        wire::Capability::Atom(atom) => atom.to_string(),
    }
}

fn convert_code(code: &wire::ResponseCode<'_>) -> RespCode {
    match code {
        wire::ResponseCode::Alert => RespCode::Alert,
        wire::ResponseCode::Capabilities(caps) => {
            RespCode::Capabilities(caps.iter().map(capability_name).collect())
        }
        wire::ResponseCode::PermanentFlags(flags) => {
            RespCode::PermanentFlags(flags.iter().map(|f| f.to_string()).collect())
        }
        wire::ResponseCode::ReadOnly => RespCode::ReadOnly,
        wire::ResponseCode::ReadWrite => RespCode::ReadWrite,
        wire::ResponseCode::TryCreate => RespCode::TryCreate,
        wire::ResponseCode::UidNext(value) => RespCode::UidNext(*value),
        wire::ResponseCode::UidValidity(value) => RespCode::UidValidity(*value),
        wire::ResponseCode::Unseen(value) => RespCode::Unseen(*value),
        wire::ResponseCode::AppendUid(validity, members) => RespCode::AppendUid {
            uid_validity: *validity,
            uid: members.first().map(|member| match member {
                wire::UidSetMember::Uid(uid) => *uid,
                wire::UidSetMember::UidRange(range) => *range.start(),
            }),
        },
        wire::ResponseCode::UidNotSticky => RespCode::UidNotSticky,
        other => RespCode::Other(format!("{:?}", other)),
    }
}

/// Dotted part id for a BODY[...] section path.
pub fn section_part_id(section: &Option<wire::SectionPath>) -> Option<String> {
    use wire::{MessageSection, SectionPath};

    fn section_suffix(section: &MessageSection) -> &'static str {
        match section {
            MessageSection::Header => "HEADER",
            MessageSection::Text => "TEXT",
            MessageSection::Mime => "MIME",
        }
    }

    match section {
        None => None,
        Some(SectionPath::Full(msg_section)) => Some(section_suffix(msg_section).to_string()),
        Some(SectionPath::Part(path, msg_section)) => {
            let mut id = path
                .iter()
                .map(|n| n.to_string())
                .collect::<Vec<_>>()
                .join(".");
            if let Some(section) = msg_section {
                id.push('.');
                id.push_str(section_suffix(section));
            }
            Some(id)
        }
    }
}

fn convert_fetch_attr(attr: &wire::AttributeValue<'_>) -> FetchAttr {
    match attr {
        wire::AttributeValue::Uid(uid) => FetchAttr::Uid(*uid),
        wire::AttributeValue::Flags(flags) => {
            FetchAttr::Flags(flags.iter().map(|f| f.to_string()).collect())
        }
        wire::AttributeValue::Rfc822Size(size) => FetchAttr::Rfc822Size(*size),
        wire::AttributeValue::InternalDate(date) => FetchAttr::InternalDate(date.to_string()),
        wire::AttributeValue::Envelope(envelope) => {
            FetchAttr::Envelope(Box::new(convert_envelope(envelope)))
        }
        wire::AttributeValue::BodyStructure(body) => {
            FetchAttr::BodyStructure(convert_body_structure(body))
        }
        wire::AttributeValue::BodySection {
            section,
            index,
            data,
        } => FetchAttr::BodySection {
            part_id: section_part_id(section),
            origin: *index,
            data: data.as_ref().map(|bytes| bytes.to_vec()),
        },
        wire::AttributeValue::Rfc822(data) => FetchAttr::BodySection {
            part_id: None,
            origin: None,
            data: data.as_ref().map(|bytes| bytes.to_vec()),
        },
        other => FetchAttr::Other(format!("{:?}", other)),
    }
}

fn convert_status_attr(attr: &wire::StatusAttribute) -> StatusItem {
    match attr {
        wire::StatusAttribute::Messages(n) => StatusItem::Messages(*n),
        wire::StatusAttribute::Recent(n) => StatusItem::Recent(*n),
        wire::StatusAttribute::UidNext(n) => StatusItem::UidNext(*n),
        wire::StatusAttribute::UidValidity(n) => StatusItem::UidValidity(*n),
        wire::StatusAttribute::Unseen(n) => StatusItem::Unseen(*n),
        other => StatusItem::Other(format!("{:?}", other)),
    }
}

/// Convert one parsed wire response into the owned model.
pub fn convert_response(response: &wire::Response<'_>) -> ImapResponse {
    match response {
        wire::Response::Done {
            tag,
            status,
            code,
            information,
        } => ImapResponse::Done {
            tag: tag.0.clone(),
            status: match status {
                wire::Status::Ok => StatusKind::Ok,
                wire::Status::No => StatusKind::No,
                wire::Status::Bad => StatusKind::Bad,
                wire::Status::PreAuth => StatusKind::PreAuth,
                wire::Status::Bye => StatusKind::Bye,
            },
            code: code.as_ref().map(convert_code),
            information: information.as_ref().map(cow_str),
        },
        wire::Response::Data {
            status,
            code,
            information,
        } => ImapResponse::Data {
            status: match status {
                wire::Status::Ok => StatusKind::Ok,
                wire::Status::No => StatusKind::No,
                wire::Status::Bad => StatusKind::Bad,
                wire::Status::PreAuth => StatusKind::PreAuth,
                wire::Status::Bye => StatusKind::Bye,
            },
            code: code.as_ref().map(convert_code),
            information: information.as_ref().map(cow_str),
        },
        wire::Response::Continue { information, .. } => ImapResponse::Continue {
            information: information.as_ref().map(cow_str),
        },
        wire::Response::Capabilities(caps) => {
            ImapResponse::Capabilities(caps.iter().map(capability_name).collect())
        }
        wire::Response::Expunge(seq) => ImapResponse::Expunge(*seq),
        wire::Response::Fetch(seq, attrs) => ImapResponse::Fetch {
            seq: *seq,
            attrs: attrs.iter().map(convert_fetch_attr).collect(),
        },
        wire::Response::MailboxData(datum) => match datum {
            wire::MailboxDatum::Exists(n) => ImapResponse::MailboxData(MailboxData::Exists(*n)),
            wire::MailboxDatum::Recent(n) => ImapResponse::MailboxData(MailboxData::Recent(*n)),
            wire::MailboxDatum::Flags(flags) => ImapResponse::MailboxData(MailboxData::Flags(
                flags.iter().map(|f| f.to_string()).collect(),
            )),
            wire::MailboxDatum::List {
                name_attributes,
                delimiter,
                name,
            } => ImapResponse::MailboxData(MailboxData::List {
                attributes: name_attributes.iter().map(name_attribute_str).collect(),
                delimiter: delimiter.as_ref().map(cow_str),
                name: name.to_string(),
            }),
            wire::MailboxDatum::Search(uids) => {
                ImapResponse::MailboxData(MailboxData::Search(uids.clone()))
            }
            wire::MailboxDatum::Status { mailbox, status } => {
                ImapResponse::MailboxData(MailboxData::Status {
                    mailbox: mailbox.to_string(),
                    items: status.iter().map(convert_status_attr).collect(),
                })
            }
            other => ImapResponse::Other(format!("{:?}", other)),
        },
        other => ImapResponse::Other(format!("{:?}", other)),
    }
}
