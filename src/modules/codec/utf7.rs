// Copyright © 2026 mailbeam.dev
// Licensed under MailBeam License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

//! Modified UTF-7 mailbox name codec (RFC 3501 §5.1.3).
//!
//! The IMAP variant replaces '/' with ',' in the base64 alphabet, uses
//! '&' as shift-in and '-' as shift-out, and escapes a literal '&' as
//! "&-". Mailbox names are Unicode in the model and modified UTF-7 on
//! the wire.

const MODIFIED_BASE64: &[u8; 64] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+,";

fn base64_value(c: u8) -> Option<u32> {
    MODIFIED_BASE64.iter().position(|&b| b == c).map(|p| p as u32)
}

/// Encode a Unicode mailbox name for the wire.
///
/// An input that is already a valid modified UTF-7 encoding is passed
/// through unchanged, so feeding a wire name back in cannot
/// double-encode it.
pub fn encode_mailbox_name(name: &str) -> String {
    if is_encoded_name(name) {
        return name.to_string();
    }

    let mut dst = String::with_capacity(name.len());
    let mut shifted: Vec<u16> = Vec::new();

    let flush = |dst: &mut String, shifted: &mut Vec<u16>| {
        if shifted.is_empty() {
            return;
        }
        dst.push('&');
        let mut bitbuf: u32 = 0;
        let mut bits = 0;
        for &unit in shifted.iter() {
            bitbuf = (bitbuf << 16) | unit as u32;
            bits += 16;
            while bits >= 6 {
                bits -= 6;
                dst.push(MODIFIED_BASE64[((bitbuf >> bits) & 0x3f) as usize] as char);
            }
            bitbuf &= (1 << bits) - 1;
        }
        if bits > 0 {
            dst.push(MODIFIED_BASE64[((bitbuf << (6 - bits)) & 0x3f) as usize] as char);
        }
        dst.push('-');
        shifted.clear();
    };

    for c in name.chars() {
        if (' '..='~').contains(&c) {
            flush(&mut dst, &mut shifted);
            dst.push(c);
            if c == '&' {
                dst.push('-');
            }
        } else {
            let mut units = [0u16; 2];
            shifted.extend_from_slice(c.encode_utf16(&mut units));
        }
    }
    flush(&mut dst, &mut shifted);
    dst
}

/// Decode a wire mailbox name back into Unicode. Malformed shift
/// sequences degrade to passing the raw bytes through, mirroring how
/// servers in the wild ship slightly broken names.
pub fn decode_mailbox_name(raw: &str) -> String {
    let bytes = raw.as_bytes();
    let mut out = String::with_capacity(raw.len());
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i];
        if c != b'&' {
            out.push(c as char);
            i += 1;
            continue;
        }
        // "&-" is a literal ampersand
        if bytes.get(i + 1) == Some(&b'-') {
            out.push('&');
            i += 2;
            continue;
        }
        i += 1;
        let mut bitbuf: u32 = 0;
        let mut bits = 0;
        let mut units: Vec<u16> = Vec::new();
        while i < bytes.len() {
            match base64_value(bytes[i]) {
                Some(v) => {
                    bitbuf = (bitbuf << 6) | v;
                    bits += 6;
                    if bits >= 16 {
                        bits -= 16;
                        units.push(((bitbuf >> bits) & 0xffff) as u16);
                        bitbuf &= (1 << bits) - 1;
                    }
                    i += 1;
                }
                None => break,
            }
        }
        // skip the terminating shift-out
        if bytes.get(i) == Some(&b'-') {
            i += 1;
        }
        out.extend(char::decode_utf16(units.into_iter()).map(|r| r.unwrap_or('\u{fffd}')));
    }
    out
}

/// True when `name` is entirely printable ASCII and every '&' starts a
/// well-formed shift sequence that decodes to at least one non-ASCII
/// UTF-16 unit. Such names are wire-form already.
fn is_encoded_name(name: &str) -> bool {
    if !name.is_ascii() {
        return false;
    }
    let bytes = name.as_bytes();
    let mut i = 0;
    let mut saw_shift = false;
    while i < bytes.len() {
        if bytes[i] != b'&' {
            i += 1;
            continue;
        }
        if bytes.get(i + 1) == Some(&b'-') {
            i += 2;
            continue;
        }
        i += 1;
        let start = i;
        let mut bits = 0;
        while i < bytes.len() && base64_value(bytes[i]).is_some() {
            bits += 6;
            i += 1;
        }
        // a shift run must be non-empty, closed by '-', and carry
        // whole UTF-16 units with only zero padding left over
        if i == start || bytes.get(i) != Some(&b'-') || bits % 16 >= 6 {
            return false;
        }
        i += 1;
        saw_shift = true;
    }
    saw_shift
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ascii_passes_through() {
        assert_eq!(encode_mailbox_name("INBOX"), "INBOX");
        assert_eq!(decode_mailbox_name("INBOX"), "INBOX");
    }

    #[test]
    fn ampersand_escapes() {
        assert_eq!(encode_mailbox_name("A&B"), "A&-B");
        assert_eq!(decode_mailbox_name("A&-B"), "A&B");
    }

    #[test]
    fn non_ascii_round_trips() {
        for name in [
            "Odeslan\u{00e9}",
            "\u{65e5}\u{672c}\u{8a9e}",
            "mix \u{00e1} end",
            "emoji \u{1f4e7} box",
        ] {
            let wire = encode_mailbox_name(name);
            assert!(wire.is_ascii(), "wire form must be ASCII: {wire}");
            assert_eq!(decode_mailbox_name(&wire), name);
        }
    }

    #[test]
    fn known_vector() {
        // RFC 3501's own example
        assert_eq!(encode_mailbox_name("~peter/mail/\u{53f0}\u{5317}/\u{65e5}\u{672c}\u{8a9e}"),
            "~peter/mail/&U,BTFw-/&ZeVnLIqe-");
        assert_eq!(
            decode_mailbox_name("~peter/mail/&U,BTFw-/&ZeVnLIqe-"),
            "~peter/mail/\u{53f0}\u{5317}/\u{65e5}\u{672c}\u{8a9e}"
        );
    }

    #[test]
    fn already_encoded_input_is_not_double_encoded() {
        let wire = "&ZeVnLIqe-";
        assert_eq!(encode_mailbox_name(wire), wire);
        // but a lone '&' that is no shift sequence still gets escaped
        assert_eq!(encode_mailbox_name("a&b"), "a&-b");
    }

    #[test]
    fn surrogate_pairs_survive() {
        let name = "\u{1f600}";
        assert_eq!(decode_mailbox_name(&encode_mailbox_name(name)), name);
    }
}
