// Copyright © 2026 mailbeam.dev
// Licensed under MailBeam License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

//! Mail address parsing and formatting.
//!
//! Addresses live in the model in canonical Unicode: display names are
//! RFC 2047-decoded, IDN hosts are U-labels. The two output forms are
//! the RFC 2822 header phrase (`"Display" <local@host>`, 2047-encoded
//! where needed) and the bare SMTP mailbox (`local@host`, A-label host,
//! local part quoted when it contains specials).

use serde::{Deserialize, Serialize};

use super::rfc2047::{decode_rfc2047, encode_rfc2047};

#[derive(Clone, Debug, Default, Eq, PartialEq, Hash, Deserialize, Serialize)]
pub struct MailAddress {
    /// Display name, decoded to Unicode. Empty when absent.
    pub name: String,
    /// Source route; kept verbatim for round-tripping, usually empty.
    pub adl: String,
    /// Local part without quoting.
    pub mailbox: String,
    /// Host as a Unicode U-label domain, or a literal without brackets.
    pub host: String,
}

fn is_atom_char(c: char) -> bool {
    c.is_ascii_alphanumeric()
        || matches!(
            c,
            '!' | '#' | '$' | '%' | '&' | '\'' | '*' | '+' | '-' | '/' | '=' | '?' | '^' | '_'
                | '`' | '{' | '|' | '}' | '~' | '.'
        )
}

fn is_atom_phrase(text: &str) -> bool {
    !text.is_empty()
        && text
            .chars()
            .all(|c| c == ' ' || c == '\t' || (c != '.' && is_atom_char(c)))
}

fn unquote(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.len() >= 2 && trimmed.starts_with('"') && trimmed.ends_with('"') {
        let inner = &trimmed[1..trimmed.len() - 1];
        let mut out = String::with_capacity(inner.len());
        let mut escaped = false;
        for c in inner.chars() {
            if escaped {
                out.push(c);
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else {
                out.push(c);
            }
        }
        out
    } else {
        trimmed.to_string()
    }
}

fn quote_local_part(local: &str) -> String {
    if !local.is_empty() && local.chars().all(is_atom_char) && !local.starts_with('.')
        && !local.ends_with('.') && !local.contains("..")
    {
        local.to_string()
    } else {
        let escaped: String = local
            .chars()
            .flat_map(|c| match c {
                '"' | '\\' => vec!['\\', c],
                other => vec![other],
            })
            .collect();
        format!("\"{escaped}\"")
    }
}

fn looks_like_literal(host: &str) -> bool {
    !host.is_empty()
        && host
            .chars()
            .all(|c| c.is_ascii_hexdigit() || c == '.' || c == ':')
        && host.chars().any(|c| c.is_ascii_digit() || c == ':')
}

fn host_to_unicode(host: &str) -> String {
    if host.to_ascii_lowercase().contains("xn--") {
        let (unicode, result) = idna::domain_to_unicode(host);
        if result.is_ok() {
            return unicode;
        }
    }
    host.to_string()
}

fn host_to_ascii(host: &str) -> String {
    if host.is_ascii() {
        return host.to_string();
    }
    idna::domain_to_ascii(host).unwrap_or_else(|_| host.to_string())
}

impl MailAddress {
    pub fn new(
        name: impl Into<String>,
        adl: impl Into<String>,
        mailbox: impl Into<String>,
        host: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            adl: adl.into(),
            mailbox: mailbox.into(),
            host: host.into(),
        }
    }

    /// Parse `Display Name <local@host>` (display optionally quoted,
    /// optionally 2047-encoded) or a bare `local@host`.
    pub fn parse(input: &str) -> Option<Self> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return None;
        }

        let (display, addr_spec) = match (trimmed.rfind('<'), trimmed.ends_with('>')) {
            (Some(lt), true) => {
                let display = trimmed[..lt].trim();
                let spec = &trimmed[lt + 1..trimmed.len() - 1];
                (display, spec.trim())
            }
            _ => ("", trimmed),
        };

        let at = find_addr_spec_split(addr_spec)?;
        let (local_raw, host_raw) = addr_spec.split_at(at);
        let host_raw = &host_raw[1..];
        if host_raw.is_empty() {
            return None;
        }

        let host = if host_raw.starts_with('[') && host_raw.ends_with(']') {
            host_raw[1..host_raw.len() - 1].to_string()
        } else {
            host_to_unicode(host_raw)
        };

        let name = decode_rfc2047(unquote(display).as_bytes());

        Some(Self {
            name,
            adl: String::new(),
            mailbox: unquote(local_raw),
            host,
        })
    }

    /// SMTP mailbox form: `local@host` with the local part quoted when
    /// it needs it, A-label host, and literals in brackets.
    pub fn as_smtp_mailbox(&self) -> String {
        let host = if looks_like_literal(&self.host) {
            format!("[{}]", self.host)
        } else {
            host_to_ascii(&self.host)
        };
        format!("{}@{}", quote_local_part(&self.mailbox), host)
    }

    /// Canonical header form with a 2047-encoded display name where
    /// one is needed.
    pub fn as_mail_header(&self) -> Vec<u8> {
        let addr = self.as_smtp_mailbox();
        if self.name.is_empty() {
            return addr.into_bytes();
        }

        let mut out = if self.name.is_ascii() {
            if is_atom_phrase(&self.name) {
                self.name.clone().into_bytes()
            } else {
                let escaped: String = self
                    .name
                    .chars()
                    .flat_map(|c| match c {
                        '"' | '\\' => vec!['\\', c],
                        other => vec![other],
                    })
                    .collect();
                format!("\"{escaped}\"").into_bytes()
            }
        } else {
            encode_rfc2047(&self.name)
        };
        out.extend_from_slice(b" <");
        out.extend_from_slice(addr.as_bytes());
        out.push(b'>');
        out
    }

    /// Human-readable `Display <local@host>` without wire encoding.
    pub fn pretty(&self) -> String {
        if self.name.is_empty() {
            format!("{}@{}", self.mailbox, self.host)
        } else {
            format!("{} <{}@{}>", self.name, self.mailbox, self.host)
        }
    }
}

/// Position of the '@' separating local part and host, honoring quoted
/// local parts.
fn find_addr_spec_split(spec: &str) -> Option<usize> {
    let bytes = spec.as_bytes();
    let mut in_quotes = false;
    let mut escaped = false;
    for (i, &b) in bytes.iter().enumerate() {
        if escaped {
            escaped = false;
            continue;
        }
        match b {
            b'\\' if in_quotes => escaped = true,
            b'"' => in_quotes = !in_quotes,
            b'@' if !in_quotes => return Some(i),
            _ => {}
        }
    }
    None
}

impl std::fmt::Display for MailAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.pretty())
    }
}
