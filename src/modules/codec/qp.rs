// Copyright © 2026 mailbeam.dev
// Licensed under MailBeam License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

//! Content-transfer-encoding codecs: quoted-printable (RFC 2045 §6.7)
//! and a whitespace-tolerant base64 decoder.

use base64::{engine::general_purpose::STANDARD, Engine};

const QP_LINE_LIMIT: usize = 76;

fn hex_digit(value: u8) -> char {
    const HEX: &[u8; 16] = b"0123456789ABCDEF";
    HEX[value as usize & 0xf] as char
}

fn from_hex(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'A'..=b'F' => Some(c - b'A' + 10),
        b'a'..=b'f' => Some(c - b'a' + 10),
        _ => None,
    }
}

/// Quoted-printable encode with soft line breaks at 76 columns.
pub fn quoted_printable_encode(raw: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(raw.len() + raw.len() / 8);
    let mut column = 0;

    let push = |out: &mut Vec<u8>, piece: &[u8], column: &mut usize| {
        // the soft break '=' itself must fit within the limit
        if *column + piece.len() > QP_LINE_LIMIT - 1 {
            out.extend_from_slice(b"=\r\n");
            *column = 0;
        }
        out.extend_from_slice(piece);
        *column += piece.len();
    };

    let mut i = 0;
    while i < raw.len() {
        let b = raw[i];
        match b {
            b'\r' if raw.get(i + 1) == Some(&b'\n') => {
                out.extend_from_slice(b"\r\n");
                column = 0;
                i += 2;
                continue;
            }
            b'\n' => {
                out.extend_from_slice(b"\r\n");
                column = 0;
            }
            b' ' | b'\t' => {
                // trailing whitespace before a line break must be escaped
                let at_eol = matches!(raw.get(i + 1), None | Some(b'\n') | Some(b'\r'));
                if at_eol {
                    push(&mut out, &[b'=', hex_digit(b >> 4) as u8, hex_digit(b) as u8], &mut column);
                } else {
                    push(&mut out, &[b], &mut column);
                }
            }
            0x21..=0x3c | 0x3e..=0x7e => push(&mut out, &[b], &mut column),
            _ => {
                push(&mut out, &[b'=', hex_digit(b >> 4) as u8, hex_digit(b) as u8], &mut column);
            }
        }
        i += 1;
    }
    out
}

/// Quoted-printable decode. Soft line breaks ("=" at end of line) are
/// removed; both CRLF and bare LF line endings are accepted; malformed
/// escapes are passed through untouched.
pub fn quoted_printable_decode(raw: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        let b = raw[i];
        if b != b'=' {
            out.push(b);
            i += 1;
            continue;
        }
        match (raw.get(i + 1), raw.get(i + 2)) {
            (Some(b'\r'), Some(b'\n')) => i += 3,
            (Some(b'\n'), _) => i += 2,
            (Some(b'\r'), _) => i += 2,
            (Some(&hi), Some(&lo)) => match (from_hex(hi), from_hex(lo)) {
                (Some(h), Some(l)) => {
                    out.push((h << 4) | l);
                    i += 3;
                }
                _ => {
                    out.push(b);
                    i += 1;
                }
            },
            _ => {
                out.push(b);
                i += 1;
            }
        }
    }
    out
}

/// Base64 decode tolerating embedded whitespace and line breaks.
pub fn base64_decode_tolerant(raw: &[u8]) -> Option<Vec<u8>> {
    let cleaned: Vec<u8> = raw
        .iter()
        .copied()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();
    STANDARD.decode(&cleaned).ok()
}

/// Base64 encode wrapped at 76 columns with CRLF line endings, the
/// form MIME bodies use.
pub fn base64_encode_wrapped(raw: &[u8]) -> Vec<u8> {
    let encoded = STANDARD.encode(raw);
    let mut out = Vec::with_capacity(encoded.len() + encoded.len() / 38);
    for chunk in encoded.as_bytes().chunks(QP_LINE_LIMIT) {
        out.extend_from_slice(chunk);
        out.extend_from_slice(b"\r\n");
    }
    out
}
