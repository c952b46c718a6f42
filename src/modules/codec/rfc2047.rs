// Copyright © 2026 mailbeam.dev
// Licensed under MailBeam License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

//! RFC 2047 encoded-word codec for message headers.
//!
//! Decoding accepts both `Q` and `B` encodings in any charset the
//! encoding_rs registry knows; unknown charsets fall back to UTF-8 and
//! then Latin-1. Encoding picks the smallest scheme that preserves the
//! input: plain ASCII, Latin-1 with `Q`, or UTF-8 with `B`, honoring
//! the 75-character encoded-word cap and folding long values into a
//! CRLF+SPACE-joined word sequence.

use super::qp::base64_decode_tolerant;

/// RFC 2047 limits one encoded-word to 75 characters including the
/// `=?charset?X?...?=` boiler plate.
const MAX_ENCODED_WORD: usize = 75;
/// RFC 5322 recommended line length, used by the ASCII-prefix variant.
const MAX_LINE_LENGTH: usize = 78;

fn decode_charset(bytes: &[u8], charset: &str) -> String {
    if let Some(encoding) = encoding_rs::Encoding::for_label(charset.as_bytes()) {
        let (decoded, _, _) = encoding.decode(bytes);
        return decoded.into_owned();
    }
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => bytes.iter().map(|&b| b as char).collect(),
    }
}

fn decode_word(charset: &str, encoding: &str, payload: &[u8]) -> Option<String> {
    let raw = match encoding {
        "Q" | "q" => {
            let mut bytes = Vec::with_capacity(payload.len());
            let mut i = 0;
            while i < payload.len() {
                match payload[i] {
                    b'_' => bytes.push(b' '),
                    b'=' => {
                        let hex = |c: u8| match c {
                            b'0'..=b'9' => Some(c - b'0'),
                            b'A'..=b'F' => Some(c - b'A' + 10),
                            b'a'..=b'f' => Some(c - b'a' + 10),
                            _ => None,
                        };
                        match (payload.get(i + 1).and_then(|&c| hex(c)), payload.get(i + 2).and_then(|&c| hex(c))) {
                            (Some(h), Some(l)) => {
                                bytes.push((h << 4) | l);
                                i += 2;
                            }
                            _ => bytes.push(b'='),
                        }
                    }
                    other => bytes.push(other),
                }
                i += 1;
            }
            bytes
        }
        "B" | "b" => base64_decode_tolerant(payload)?,
        _ => return None,
    };
    Some(decode_charset(&raw, charset))
}

/// Locate the next `=?charset?enc?text?=` starting at or after `from`.
/// Returns (start, end, charset, encoding, payload).
fn find_encoded_word(raw: &[u8], from: usize) -> Option<(usize, usize, String, String, Vec<u8>)> {
    let mut pos = from;
    while pos + 1 < raw.len() {
        if raw[pos] == b'=' && raw[pos + 1] == b'?' {
            let charset_start = pos + 2;
            let charset_end = raw[charset_start..].iter().position(|&b| b == b'?')? + charset_start;
            let enc_start = charset_end + 1;
            let enc_end = raw.get(enc_start..).and_then(|r| r.iter().position(|&b| b == b'?')).map(|p| p + enc_start)?;
            // payload runs to the next "?="
            let mut text_end = enc_end + 1;
            loop {
                match raw.get(text_end) {
                    Some(b'?') if raw.get(text_end + 1) == Some(&b'=') => break,
                    Some(_) => text_end += 1,
                    // unterminated; skip this false start
                    None => return find_encoded_word(raw, pos + 2),
                }
            }
            let charset = String::from_utf8_lossy(&raw[charset_start..charset_end]).into_owned();
            // strip RFC 2231 language suffix ("utf-8*en")
            let charset = charset.split('*').next().unwrap_or_default().to_string();
            let encoding = String::from_utf8_lossy(&raw[enc_start..enc_end]).into_owned();
            let payload = raw[enc_end + 1..text_end].to_vec();
            return Some((pos, text_end + 2, charset, encoding, payload));
        }
        pos += 1;
    }
    None
}

/// Decode a raw header value into Unicode. Whitespace that separates
/// two adjacent encoded-words is elided; a missing separator is
/// tolerated as an empty gap.
pub fn decode_rfc2047(raw: &[u8]) -> String {
    let mut out = String::new();
    let mut last = 0;
    let mut from = 0;

    while let Some((start, end, charset, encoding, payload)) = find_encoded_word(raw, from) {
        match decode_word(&charset, &encoding, &payload) {
            Some(decoded) => {
                let preceding = &raw[last..start];
                let gap_is_whitespace =
                    !preceding.is_empty() && preceding.iter().all(|b| b.is_ascii_whitespace());
                if !gap_is_whitespace {
                    out.push_str(&String::from_utf8_lossy(preceding));
                }
                out.push_str(&decoded);
                last = end;
                from = end;
            }
            None => {
                // not a real encoded word; scan past the false start
                from = start + 2;
            }
        }
    }
    out.push_str(&String::from_utf8_lossy(&raw[last..]));
    out
}

fn needs_q_escaping(c: char) -> bool {
    let u = c as u32;
    u <= 0x20 || u > 126 || matches!(c, '=' | '?' | '_')
}

fn q_symbol(c: char, out: &mut String) {
    if c == ' ' {
        out.push('_');
    } else if !needs_q_escaping(c) {
        out.push(c);
    } else {
        // Latin-1 byte of the character
        let byte = c as u32 as u8;
        out.push('=');
        out.push(char::from_digit((byte >> 4) as u32, 16).unwrap().to_ascii_uppercase());
        out.push(char::from_digit((byte & 0xf) as u32, 16).unwrap().to_ascii_uppercase());
    }
}

fn encode_latin1_q(text: &str) -> Vec<u8> {
    let max_payload = MAX_ENCODED_WORD - 7 - "iso-8859-1".len();
    let mut buf = String::from("=?iso-8859-1?Q?");
    let mut line_len = 0;
    for c in text.chars() {
        let mut symbol = String::new();
        q_symbol(c, &mut symbol);
        if line_len + symbol.len() > max_payload {
            buf.push_str("?=\r\n =?iso-8859-1?Q?");
            line_len = 0;
        }
        buf.push_str(&symbol);
        line_len += symbol.len();
    }
    buf.push_str("?=");
    buf.into_bytes()
}

fn encode_utf8_b(text: &str) -> Vec<u8> {
    let max_payload = MAX_ENCODED_WORD - 7 - "utf-8".len();
    let chars: Vec<char> = text.chars().collect();
    let mut res = Vec::new();
    let mut start = 0;

    while start < chars.len() {
        // find the largest code-point prefix whose base64 form fits
        let mut size = chars.len() - start;
        loop {
            let candidate: String = chars[start..start + size].iter().collect();
            let b64_len = candidate.len().div_ceil(3) * 4;
            if b64_len <= max_payload {
                if !res.is_empty() {
                    res.extend_from_slice(b"\r\n ");
                }
                res.extend_from_slice(b"=?utf-8?B?");
                res.extend_from_slice(crate::base64_encode!(candidate.as_bytes()).as_bytes());
                res.extend_from_slice(b"?=");
                start += size;
                break;
            }
            size -= 1;
        }
    }
    res
}

/// Encode a Unicode string for a header, using the smallest scheme
/// that preserves the data.
pub fn encode_rfc2047(text: &str) -> Vec<u8> {
    if text.chars().all(|c| c == ' ' || !needs_q_escaping(c)) {
        return text.as_bytes().to_vec();
    }
    if text.chars().all(|c| (c as u32) <= 0xff) {
        encode_latin1_q(text)
    } else {
        encode_utf8_b(text)
    }
}

/// Encode for a header while keeping a leading ASCII run verbatim.
/// The split between the verbatim prefix and the encoded remainder
/// lands on a word boundary whenever one exists.
pub fn encode_rfc2047_with_ascii_prefix(text: &str) -> Vec<u8> {
    let chars: Vec<char> = text.chars().collect();

    let mut pos = 0;
    while pos < chars.len()
        && pos < MAX_LINE_LENGTH
        && (chars[pos] == ' ' || !needs_q_escaping(chars[pos]))
    {
        pos += 1;
    }

    if pos != chars.len() {
        // retreat to the start of the word that needs encoding
        while pos > 0 && chars[pos - 1] != ' ' {
            pos -= 1;
        }
        if pos > 0 && chars[pos] == ' ' {
            pos -= 1;
        }
    }

    let prefix: String = chars[..pos].iter().collect();
    if pos == chars.len() {
        return prefix.into_bytes();
    }
    let rest: String = chars[pos..].iter().collect();

    let mut out = prefix.into_bytes();
    out.extend_from_slice(&encode_rfc2047(&rest));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_utf8_base64() {
        assert_eq!(
            decode_rfc2047(b"=?UTF-8?B?SmFuIEt1bmRyw6F0?="),
            "Jan Kundr\u{00e1}t"
        );
    }

    #[test]
    fn decodes_latin2_q_with_literal_gap() {
        assert_eq!(
            decode_rfc2047(b"=?ISO-8859-2?Q?Jan_Kundr=E1t?=XX=?ISO-8859-2?Q?Jan_Kundr=E1t?="),
            "Jan Kundr\u{00e1}tXXJan Kundr\u{00e1}t"
        );
    }

    #[test]
    fn whitespace_between_words_is_elided() {
        assert_eq!(
            decode_rfc2047(b"=?utf-8?B?SmFu?= =?utf-8?B?IEt1bmRyw6F0?="),
            "Jan Kundr\u{00e1}t"
        );
        assert_eq!(
            decode_rfc2047(b"=?utf-8?Q?a?=\r\n =?utf-8?Q?b?="),
            "ab"
        );
    }

    #[test]
    fn plain_text_passes_through() {
        assert_eq!(decode_rfc2047(b"nothing encoded here"), "nothing encoded here");
        assert_eq!(decode_rfc2047(b"broken =?word"), "broken =?word");
    }

    #[test]
    fn unknown_charset_falls_back() {
        assert_eq!(decode_rfc2047(b"=?x-no-such?Q?ok?="), "ok");
        // invalid UTF-8 degrades to Latin-1
        assert_eq!(decode_rfc2047(b"=?x-no-such?Q?=E1?="), "\u{00e1}");
    }

    #[test]
    fn ascii_is_not_encoded() {
        assert_eq!(encode_rfc2047("plain words"), b"plain words".to_vec());
    }

    #[test]
    fn encode_decode_round_trips() {
        for text in [
            "plain words",
            "Jan Kundr\u{00e1}t",
            "\u{010d}esk\u{00fd} text s del\u{0161}\u{00ed}m obsahem",
            "\u{65e5}\u{672c}\u{8a9e} subject line",
        ] {
            let encoded = encode_rfc2047(text);
            assert_eq!(decode_rfc2047(&encoded), text, "wire: {:?}", String::from_utf8_lossy(&encoded));
        }
    }

    #[test]
    fn long_input_folds_into_capped_words() {
        let text = "p\u{0159}\u{00ed}li\u{0161} \u{017e}lu\u{0165}ou\u{010d}k\u{00fd} k\u{016f}\u{0148} ".repeat(8);
        let encoded = encode_rfc2047(text.trim_end());
        for line in encoded.split(|&b| b == b'\n') {
            let line = line.strip_suffix(b"\r").unwrap_or(line);
            let line = line.strip_prefix(b" ").unwrap_or(line);
            assert!(line.len() <= MAX_ENCODED_WORD, "word too long: {}", line.len());
        }
        assert_eq!(decode_rfc2047(&encoded), text.trim_end());
    }

    #[test]
    fn ascii_prefix_survives_verbatim() {
        let encoded = encode_rfc2047_with_ascii_prefix("Re: schůzka zítra");
        let text = String::from_utf8_lossy(&encoded);
        assert!(text.starts_with("Re:"), "prefix lost: {text}");
        assert_eq!(decode_rfc2047(&encoded), "Re: schůzka zítra");
    }

    #[test]
    fn ascii_prefix_splits_on_word_boundary() {
        let encoded = encode_rfc2047_with_ascii_prefix("hello sv\u{011b}te");
        let text = String::from_utf8_lossy(&encoded);
        assert!(text.starts_with("hello"));
        assert!(!text.starts_with("hello s"), "split mid-word: {text}");
        assert_eq!(decode_rfc2047(&encoded), "hello sv\u{011b}te");
    }
}
