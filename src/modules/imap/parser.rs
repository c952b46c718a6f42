// Copyright © 2026 mailbeam.dev
// Licensed under MailBeam License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

//! Incremental response framing.
//!
//! The decoder buffers raw bytes from the transport and slices off one
//! complete response at a time. Completeness is decided by the wire
//! grammar itself (imap-proto counts literal payloads), so a FETCH
//! carrying a megabyte literal is not surfaced until the last byte is
//! in.

use crate::modules::error::{code::ErrorCode, MailBeamResult};
use crate::modules::imap::response::{convert_response, ImapResponse};
use crate::raise_error;

#[derive(Debug, Default)]
pub struct ResponseDecoder {
    buffer: Vec<u8>,
}

impl ResponseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// True when at least one complete response is sitting in the
    /// buffer.
    pub fn has_response(&self) -> bool {
        if self.buffer.is_empty() {
            return false;
        }
        let prefix: &[u8] = b"* GENURLAUTH ";
        if self.buffer.len() >= prefix.len()
            && self.buffer[..prefix.len()].eq_ignore_ascii_case(prefix)
        {
            return self.buffer.windows(2).any(|pair| pair == b"\r\n");
        }
        imap_proto::parser::parse_response(&self.buffer).is_ok()
    }

    /// Pop the next complete response, or `None` when more bytes are
    /// needed. Garbage the grammar rejects is a protocol violation.
    pub fn try_next(&mut self) -> MailBeamResult<Option<ImapResponse>> {
        if self.buffer.is_empty() {
            return Ok(None);
        }
        // GENURLAUTH replies are not part of the imap-proto grammar
        const GENURLAUTH_PREFIX: &[u8] = b"* GENURLAUTH ";
        if self.buffer.len() < GENURLAUTH_PREFIX.len() {
            if GENURLAUTH_PREFIX.starts_with(&self.buffer) {
                return Ok(None);
            }
        } else if self.buffer[..GENURLAUTH_PREFIX.len()].eq_ignore_ascii_case(GENURLAUTH_PREFIX) {
            // complete line or wait for the rest of it
            return Ok(self.take_genurlauth_line());
        }
        let (consumed, response) = match imap_proto::parser::parse_response(&self.buffer) {
            Ok((remaining, response)) => (
                self.buffer.len() - remaining.len(),
                convert_response(&response),
            ),
            Err(nom::Err::Incomplete(_)) => return Ok(None),
            Err(_) => {
                let prefix: Vec<u8> = self.buffer.iter().take(64).copied().collect();
                return Err(raise_error!(
                    format!(
                        "cannot parse server response starting with {:?}",
                        String::from_utf8_lossy(&prefix)
                    ),
                    ErrorCode::ProtocolViolation
                ));
            }
        };
        self.buffer.drain(..consumed);
        Ok(Some(response))
    }

    /// Consume a complete `* GENURLAUTH <astring>\r\n` line; the URL
    /// is either quoted or a bare atom.
    fn take_genurlauth_line(&mut self) -> Option<ImapResponse> {
        const PREFIX: &[u8] = b"* GENURLAUTH ";
        let line_end = self
            .buffer
            .windows(2)
            .position(|pair| pair == b"\r\n")?;
        let raw = self.buffer[PREFIX.len()..line_end].to_vec();
        self.buffer.drain(..line_end + 2);

        let text = String::from_utf8_lossy(&raw);
        let url = text
            .trim()
            .trim_start_matches('"')
            .trim_end_matches('"')
            .to_string();
        Some(ImapResponse::GenUrlAuth(url))
    }
}
