// Copyright © 2026 mailbeam.dev
// Licensed under MailBeam License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

//! Outgoing message serialization.
//!
//! A composed message (envelope + flowed text body + attachments)
//! serializes either as one RFC 5322 byte stream for a single-literal
//! APPEND, or as a CATENATE part list where attachments already on the
//! server are referenced by IMAP URL instead of re-uploaded. The two
//! forms concatenate to identical MIME output.

use crate::modules::codec::address::MailAddress;
use crate::modules::codec::flowed::wrap_format_flowed;
use crate::modules::codec::qp::{base64_encode_wrapped, quoted_printable_encode};
use crate::modules::codec::rfc2047::encode_rfc2047_with_ascii_prefix;
use crate::modules::codec::rfc2231::encode_param;
use crate::modules::error::{code::ErrorCode, MailBeamResult};
use crate::modules::imap::command::CatenatePart;
use crate::modules::utils::random_token;
use crate::raise_error;
use chrono::{DateTime, FixedOffset, Local};

pub mod attachment;

pub use attachment::{scan_content, Attachment, AttachmentSource, SuggestedCte};

const RECIPIENT_FOLD_COLUMN: usize = 78;

/// One serialized segment: literal bytes, or an IMAP URL standing in
/// for bytes the server already has.
#[derive(Clone, Debug, PartialEq)]
enum Segment {
    Text(Vec<u8>),
    Url(String),
}

#[derive(Clone, Debug)]
pub struct MessageComposer {
    from: MailAddress,
    to: Vec<MailAddress>,
    cc: Vec<MailAddress>,
    bcc: Vec<MailAddress>,
    subject: String,
    in_reply_to: Vec<String>,
    references: Vec<String>,
    organization: Option<String>,
    user_agent: Option<String>,
    timestamp: DateTime<FixedOffset>,
    message_id: Option<String>,
    text_body: String,
    attachments: Vec<Attachment>,
}

impl MessageComposer {
    pub fn new(from: MailAddress) -> Self {
        let now = Local::now();
        Self {
            from,
            to: Vec::new(),
            cc: Vec::new(),
            bcc: Vec::new(),
            subject: String::new(),
            in_reply_to: Vec::new(),
            references: Vec::new(),
            organization: None,
            user_agent: None,
            timestamp: now.fixed_offset(),
            message_id: None,
            text_body: String::new(),
            attachments: Vec::new(),
        }
    }

    pub fn to(mut self, recipients: Vec<MailAddress>) -> Self {
        self.to = recipients;
        self
    }

    pub fn cc(mut self, recipients: Vec<MailAddress>) -> Self {
        self.cc = recipients;
        self
    }

    pub fn bcc(mut self, recipients: Vec<MailAddress>) -> Self {
        self.bcc = recipients;
        self
    }

    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = subject.into();
        self
    }

    pub fn in_reply_to(mut self, message_ids: Vec<String>) -> Self {
        self.in_reply_to = message_ids;
        self
    }

    pub fn references(mut self, message_ids: Vec<String>) -> Self {
        self.references = message_ids;
        self
    }

    pub fn organization(mut self, organization: impl Into<String>) -> Self {
        self.organization = Some(organization.into());
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn timestamp(mut self, timestamp: DateTime<FixedOffset>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Generate and stamp a Message-ID of the form `<uuid@host>`,
    /// using the sender's host.
    pub fn with_generated_message_id(mut self) -> Self {
        let host = if self.from.host.is_empty() {
            gethostname::gethostname().to_string_lossy().into_owned()
        } else {
            self.from.host.clone()
        };
        self.message_id = Some(format!("{}@{}", uuid::Uuid::new_v4(), host));
        self
    }

    pub fn text_body(mut self, body: impl Into<String>) -> Self {
        self.text_body = body.into();
        self
    }

    pub fn attach(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }

    pub fn message_timestamp(&self) -> &DateTime<FixedOffset> {
        &self.timestamp
    }

    /// All SMTP recipients (To + Cc + Bcc) in mailbox form.
    pub fn smtp_recipients(&self) -> Vec<String> {
        self.to
            .iter()
            .chain(&self.cc)
            .chain(&self.bcc)
            .map(MailAddress::as_smtp_mailbox)
            .collect()
    }

    pub fn smtp_sender(&self) -> String {
        self.from.as_smtp_mailbox()
    }

    fn boundary() -> String {
        format!("=_mailbeam_{}", random_token(32))
    }

    fn fold_recipients(header: &str, recipients: &[MailAddress], out: &mut Vec<u8>) {
        if recipients.is_empty() {
            return;
        }
        out.extend_from_slice(header.as_bytes());
        out.extend_from_slice(b": ");
        let mut column = header.len() + 2;
        for (i, recipient) in recipients.iter().enumerate() {
            let rendered = recipient.as_mail_header();
            if i > 0 {
                out.extend_from_slice(b",");
                column += 1;
                if column + 1 + rendered.len() > RECIPIENT_FOLD_COLUMN {
                    out.extend_from_slice(b"\r\n ");
                    column = 1;
                } else {
                    out.extend_from_slice(b" ");
                    column += 1;
                }
            }
            column += rendered.len();
            out.extend_from_slice(&rendered);
        }
        out.extend_from_slice(b"\r\n");
    }

    fn top_level_headers(&self, boundary: Option<&str>) -> Vec<u8> {
        let mut out = Vec::new();

        out.extend_from_slice(b"From: ");
        out.extend_from_slice(&self.from.as_mail_header());
        out.extend_from_slice(b"\r\n");

        Self::fold_recipients("To", &self.to, &mut out);
        Self::fold_recipients("Cc", &self.cc, &mut out);

        out.extend_from_slice(b"Subject: ");
        out.extend_from_slice(&encode_rfc2047_with_ascii_prefix(&self.subject));
        out.extend_from_slice(b"\r\n");

        out.extend_from_slice(
            format!(
                "Date: {}\r\n",
                self.timestamp.format("%a, %d %b %Y %H:%M:%S %z")
            )
            .as_bytes(),
        );

        if let Some(user_agent) = &self.user_agent {
            out.extend_from_slice(format!("User-Agent: {user_agent}\r\n").as_bytes());
        }
        out.extend_from_slice(b"MIME-Version: 1.0\r\n");

        if let Some(message_id) = &self.message_id {
            out.extend_from_slice(format!("Message-ID: <{message_id}>\r\n").as_bytes());
        }
        if !self.in_reply_to.is_empty() {
            let list: Vec<String> = self.in_reply_to.iter().map(|id| format!("<{id}>")).collect();
            out.extend_from_slice(format!("In-Reply-To: {}\r\n", list.join(" ")).as_bytes());
        }
        if !self.references.is_empty() {
            let list: Vec<String> = self.references.iter().map(|id| format!("<{id}>")).collect();
            out.extend_from_slice(format!("References: {}\r\n", list.join("\r\n ")).as_bytes());
        }
        if let Some(organization) = &self.organization {
            out.extend_from_slice(b"Organization: ");
            out.extend_from_slice(&encode_rfc2047_with_ascii_prefix(organization));
            out.extend_from_slice(b"\r\n");
        }

        match boundary {
            Some(boundary) => {
                out.extend_from_slice(
                    format!(
                        "Content-Type: multipart/mixed; boundary=\"{boundary}\"\r\n\r\n"
                    )
                    .as_bytes(),
                );
            }
            None => {
                out.extend_from_slice(
                    b"Content-Type: text/plain; charset=utf-8; format=flowed\r\n\
                      Content-Transfer-Encoding: quoted-printable\r\n\r\n",
                );
            }
        }
        out
    }

    fn flowed_body(&self) -> Vec<u8> {
        quoted_printable_encode(wrap_format_flowed(&self.text_body).as_bytes())
    }

    fn text_part_headers() -> &'static [u8] {
        b"Content-Type: text/plain; charset=utf-8; format=flowed\r\n\
          Content-Transfer-Encoding: quoted-printable\r\n\r\n"
    }

    fn attachment_headers(&self, attachment: &Attachment, cte: SuggestedCte) -> Vec<u8> {
        let mut out = Vec::new();
        match &attachment.file_name {
            Some(name) => {
                out.extend_from_slice(
                    format!(
                        "Content-Type: {}; {}\r\n",
                        attachment.mime_type,
                        encode_param("name", name)
                    )
                    .as_bytes(),
                );
                let disposition = if attachment.inline { "inline" } else { "attachment" };
                out.extend_from_slice(
                    format!(
                        "Content-Disposition: {}; {}\r\n",
                        disposition,
                        encode_param("filename", name)
                    )
                    .as_bytes(),
                );
            }
            None => {
                out.extend_from_slice(
                    format!("Content-Type: {}\r\n", attachment.mime_type).as_bytes(),
                );
            }
        }
        if let Some(content_id) = &attachment.content_id {
            out.extend_from_slice(format!("Content-ID: <{content_id}>\r\n").as_bytes());
        }
        out.extend_from_slice(
            format!("Content-Transfer-Encoding: {}\r\n\r\n", cte.header_value()).as_bytes(),
        );
        out
    }

    fn encode_attachment_body(data: &[u8], cte: SuggestedCte) -> Vec<u8> {
        match cte {
            SuggestedCte::Base64 => base64_encode_wrapped(data),
            _ => {
                let mut body = data.to_vec();
                if !body.ends_with(b"\r\n") {
                    body.extend_from_slice(b"\r\n");
                }
                body
            }
        }
    }

    /// Serialize into segments. `allow_urls` keeps IMAP-URL-backed
    /// attachments as URL references (the CATENATE form); without it
    /// every attachment must have loadable data.
    fn serialize(&self, allow_urls: bool) -> MailBeamResult<Vec<Segment>> {
        let mut segments = Vec::new();

        if self.attachments.is_empty() {
            let mut message = self.top_level_headers(None);
            message.extend_from_slice(&self.flowed_body());
            message.extend_from_slice(b"\r\n");
            segments.push(Segment::Text(message));
            return Ok(segments);
        }

        let boundary = Self::boundary();
        let mut current = self.top_level_headers(Some(&boundary));

        current.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
        current.extend_from_slice(Self::text_part_headers());
        current.extend_from_slice(&self.flowed_body());
        current.extend_from_slice(b"\r\n");

        for attachment in &self.attachments {
            current.extend_from_slice(format!("--{boundary}\r\n").as_bytes());

            if allow_urls {
                if let Some(url) = attachment.imap_url() {
                    // headers travel as TEXT; the body comes from the
                    // server via the URL
                    let cte = SuggestedCte::Base64;
                    current.extend_from_slice(&self.attachment_headers(attachment, cte));
                    segments.push(Segment::Text(std::mem::take(&mut current)));
                    segments.push(Segment::Url(url.to_string()));
                    current.extend_from_slice(b"\r\n");
                    continue;
                }
            }

            let data = attachment.load_data()?.ok_or_else(|| {
                raise_error!(
                    "attachment has neither data nor an IMAP URL".into(),
                    ErrorCode::InvalidParameter
                )
            })?;
            let cte = scan_content(&data);
            current.extend_from_slice(&self.attachment_headers(attachment, cte));
            current.extend_from_slice(&Self::encode_attachment_body(&data, cte));
        }

        current.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());
        segments.push(Segment::Text(current));
        Ok(segments)
    }

    /// The whole message as one byte stream (single-literal APPEND or
    /// direct SMTP submission).
    pub fn as_raw_message(&self) -> MailBeamResult<Vec<u8>> {
        let segments = self.serialize(false)?;
        let mut out = Vec::new();
        for segment in segments {
            match segment {
                Segment::Text(bytes) => out.extend_from_slice(&bytes),
                Segment::Url(_) => unreachable!("URL segments are disabled here"),
            }
        }
        Ok(out)
    }

    /// The CATENATE pair list; concatenating the TEXT parts with the
    /// dereferenced URLs yields exactly [`Self::as_raw_message`].
    pub fn as_catenate_parts(&self) -> MailBeamResult<Vec<CatenatePart>> {
        Ok(self
            .serialize(true)?
            .into_iter()
            .map(|segment| match segment {
                Segment::Text(bytes) => CatenatePart::Text(bytes),
                Segment::Url(url) => CatenatePart::Url(url),
            })
            .collect())
    }
}


#[cfg(test)]
impl MessageComposer {
    /// Swap every URL-backed attachment for its inline payload, so the
    /// test can compare against the single-literal serialization.
    fn attachments_replaced_for_test(mut self, data: Vec<u8>) -> Self {
        for attachment in &mut self.attachments {
            if let AttachmentSource::ImapPart { url, .. } = &attachment.source {
                if url.is_some() {
                    attachment.source = AttachmentSource::Inline(data.clone());
                }
            }
        }
        self
    }
}
