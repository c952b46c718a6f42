// Copyright © 2026 mailbeam.dev
// Licensed under MailBeam License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

//! RFC 2231 extended MIME header parameters: `key*0`/`key*1`
//! continuations, the `charset'lang'value` extension, and the
//! percent-escaped emission form.

use super::rfc2047::decode_rfc2047;

fn find<'a>(params: &'a [(String, String)], wanted: &str) -> Option<&'a str> {
    params
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(wanted))
        .map(|(_, v)| v.as_str())
}

fn percent_decode(raw: &str) -> Vec<u8> {
    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let hex = |c: u8| match c {
            b'0'..=b'9' => Some(c - b'0'),
            b'A'..=b'F' => Some(c - b'A' + 10),
            b'a'..=b'f' => Some(c - b'a' + 10),
            _ => None,
        };
        if bytes[i] == b'%' {
            if let (Some(h), Some(l)) = (
                bytes.get(i + 1).and_then(|&c| hex(c)),
                bytes.get(i + 2).and_then(|&c| hex(c)),
            ) {
                out.push((h << 4) | l);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    out
}

fn decode_charset_value(raw: &str) -> String {
    // charset'language'percent-data
    let mut quotes = raw.match_indices('\'');
    if let (Some((pos1, _)), Some((pos2, _))) = (quotes.next(), quotes.next()) {
        let charset = &raw[..pos1];
        let data = percent_decode(&raw[pos2 + 1..]);
        if let Some(encoding) = encoding_rs::Encoding::for_label(charset.as_bytes()) {
            let (decoded, _, _) = encoding.decode(&data);
            return decoded.into_owned();
        }
        return String::from_utf8_lossy(&data).into_owned();
    }
    // malformed; treat as UTF-8 for compatibility
    String::from_utf8_lossy(&percent_decode(raw)).into_owned()
}

/// Reassemble and decode one parameter out of a MIME parameter list.
/// The result does not depend on the order in which the `*0`, `*1`, …
/// pieces arrived, only on their numeric suffixes.
pub fn extract_param(params: &[(String, String)], key: &str) -> Option<String> {
    // plain form first; some agents still put RFC 2047 words in it
    if let Some(value) = find(params, key) {
        return Some(decode_rfc2047(value.as_bytes()));
    }

    // continuation without the charset extension
    if find(params, &format!("{key}*0")).is_some() {
        let mut raw = String::new();
        let mut num = 0;
        while let Some(piece) = find(params, &format!("{key}*{num}")) {
            raw.push_str(piece);
            num += 1;
        }
        return Some(decode_rfc2047(raw.as_bytes()));
    }

    if let Some(raw) = find(params, &format!("{key}*")) {
        return Some(decode_charset_value(raw));
    }

    if find(params, &format!("{key}*0*")).is_some() {
        // continuation plus the charset extension; each segment may or
        // may not carry its own trailing star
        let mut raw = String::new();
        let mut num = 0;
        loop {
            if let Some(piece) = find(params, &format!("{key}*{num}")) {
                raw.push_str(piece);
            } else if let Some(piece) = find(params, &format!("{key}*{num}*")) {
                raw.push_str(piece);
            } else {
                break;
            }
            num += 1;
        }
        return Some(decode_charset_value(&raw));
    }

    None
}

fn is_safe_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'-' | b'.' | b'_')
}

/// Produce `key=value` for a MIME header, switching to the RFC 2231
/// extended form when the value leaves the safe ASCII set.
pub fn encode_param(key: &str, value: &str) -> String {
    if value.is_empty() {
        return format!("{key}=\"\"");
    }

    if value.bytes().all(is_safe_byte) {
        return format!("{key}={value}");
    }

    let mut out = format!("{key}*=utf-8''");
    for b in value.bytes() {
        if is_safe_byte(b) {
            out.push(b as char);
        } else {
            out.push('%');
            out.push(char::from_digit((b >> 4) as u32, 16).unwrap().to_ascii_uppercase());
            out.push(char::from_digit((b & 0xf) as u32, 16).unwrap().to_ascii_uppercase());
        }
    }
    out
}
