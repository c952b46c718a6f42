// Copyright © 2026 mailbeam.dev
// Licensed under MailBeam License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

//! Attachments for outgoing messages: inline bytes, a file on disk,
//! or a reference to a message part already sitting on the IMAP
//! server. A content scan picks the cheapest transfer encoding that
//! survives SMTP.

use crate::modules::error::{code::ErrorCode, MailBeamResult};
use crate::raise_error;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Suggested content-transfer-encoding, decided by scanning the data.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub enum SuggestedCte {
    #[default]
    Base64,
    SevenBit,
    EightBit,
    Binary,
}

impl SuggestedCte {
    pub fn header_value(&self) -> &'static str {
        match self {
            SuggestedCte::Base64 => "base64",
            SuggestedCte::SevenBit => "7bit",
            SuggestedCte::EightBit => "8bit",
            SuggestedCte::Binary => "binary",
        }
    }
}

/// Pick a CTE for raw content. NUL bytes or over-long lines force
/// base64; clean ASCII travels as 7bit; anything else is 8bit.
pub fn scan_content(data: &[u8]) -> SuggestedCte {
    const MAX_SMTP_LINE: usize = 998;
    let mut line_len = 0usize;
    let mut eight_bit = false;
    for &byte in data {
        match byte {
            0 => return SuggestedCte::Base64,
            b'\n' => line_len = 0,
            _ => {
                line_len += 1;
                if line_len > MAX_SMTP_LINE {
                    return SuggestedCte::Base64;
                }
                if byte >= 0x80 {
                    eight_bit = true;
                }
            }
        }
    }
    if eight_bit {
        SuggestedCte::EightBit
    } else {
        SuggestedCte::SevenBit
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum AttachmentSource {
    /// Bytes composed in memory.
    Inline(Vec<u8>),
    /// A file read at serialization time.
    File(PathBuf),
    /// A part of an existing IMAP message. `data` must be fetched
    /// before a single-literal serialization; `url` enables the
    /// CATENATE form without it.
    ImapPart {
        data: Option<Vec<u8>>,
        url: Option<String>,
    },
}

#[derive(Clone, Debug, PartialEq)]
pub struct Attachment {
    pub file_name: Option<String>,
    /// "application/pdf", "image/png", ...
    pub mime_type: String,
    pub content_id: Option<String>,
    pub inline: bool,
    pub source: AttachmentSource,
}

impl Attachment {
    pub fn inline_data(
        file_name: impl Into<String>,
        mime_type: impl Into<String>,
        data: Vec<u8>,
    ) -> Self {
        Self {
            file_name: Some(file_name.into()),
            mime_type: mime_type.into(),
            content_id: None,
            inline: false,
            source: AttachmentSource::Inline(data),
        }
    }

    pub fn from_file(path: impl Into<PathBuf>, mime_type: impl Into<String>) -> Self {
        let path = path.into();
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned());
        Self {
            file_name,
            mime_type: mime_type.into(),
            content_id: None,
            inline: false,
            source: AttachmentSource::File(path),
        }
    }

    pub fn imap_part(
        file_name: Option<String>,
        mime_type: impl Into<String>,
        data: Option<Vec<u8>>,
        url: Option<String>,
    ) -> Self {
        Self {
            file_name,
            mime_type: mime_type.into(),
            content_id: None,
            inline: false,
            source: AttachmentSource::ImapPart { data, url },
        }
    }

    /// Materialize the payload; a URL-only IMAP reference has none.
    pub fn load_data(&self) -> MailBeamResult<Option<Vec<u8>>> {
        match &self.source {
            AttachmentSource::Inline(data) => Ok(Some(data.clone())),
            AttachmentSource::File(path) => std::fs::read(path).map(Some).map_err(|err| {
                raise_error!(
                    format!("cannot read attachment {}: {}", path.display(), err),
                    ErrorCode::InvalidParameter
                )
            }),
            AttachmentSource::ImapPart { data, .. } => Ok(data.clone()),
        }
    }

    pub fn imap_url(&self) -> Option<&str> {
        match &self.source {
            AttachmentSource::ImapPart { url, .. } => url.as_deref(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_picks_seven_bit_for_ascii() {
        assert_eq!(scan_content(b"hello plain text\r\n"), SuggestedCte::SevenBit);
    }

    #[test]
    fn scan_picks_eight_bit_for_high_bytes() {
        assert_eq!(
            scan_content("p\u{0159}\u{00ed}loha\n".as_bytes()),
            SuggestedCte::EightBit
        );
    }

    #[test]
    fn scan_picks_base64_for_binary() {
        assert_eq!(scan_content(b"\x00\x01\x02"), SuggestedCte::Base64);
        let long_line = vec![b'a'; 1200];
        assert_eq!(scan_content(&long_line), SuggestedCte::Base64);
    }

    #[test]
    fn file_attachment_takes_its_name_from_the_path() {
        let attachment = Attachment::from_file("/tmp/report.pdf", "application/pdf");
        assert_eq!(attachment.file_name.as_deref(), Some("report.pdf"));
    }
}
