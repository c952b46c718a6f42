// Copyright © 2026 mailbeam.dev
// Licensed under MailBeam License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

//! Command serialization.
//!
//! Tags are a per-connection monotone counter rendered as `y<n>`.
//! Serialization yields a chunk list; a chunk that announces a
//! non-synchronizing literal is written immediately, anything else
//! carrying `wait_for_continuation` must not be flushed until the
//! server's `+` arrives.

#[derive(Debug, Default)]
pub struct TagGenerator {
    counter: u64,
}

impl TagGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_tag(&mut self) -> String {
        self.counter += 1;
        format!("y{}", self.counter)
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SelectMode {
    ReadOnly,
    ReadWrite,
}

#[derive(Clone, Debug, PartialEq)]
pub enum AppendPayload {
    /// Whole message as one literal.
    Literal(Vec<u8>),
    /// CATENATE pair list: literals interleaved with IMAP URLs.
    Catenate(Vec<CatenatePart>),
}

#[derive(Clone, Debug, PartialEq)]
pub enum CatenatePart {
    Text(Vec<u8>),
    Url(String),
}

/// Everything the engine can say to a server. Mailbox names are
/// expected in wire (modified UTF-7) form already.
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    Capability,
    Noop,
    Logout,
    StartTls,
    Idle,
    /// Terminates an IDLE; the only line sent without a tag.
    IdleDone,
    Login {
        username: String,
        password: String,
    },
    List {
        reference: String,
        pattern: String,
    },
    Status {
        mailbox: String,
    },
    Select {
        mailbox: String,
    },
    Examine {
        mailbox: String,
    },
    Close,
    Fetch {
        set: String,
        uid: bool,
        items: String,
    },
    UidSearch {
        query: String,
    },
    Append {
        mailbox: String,
        flags: Option<String>,
        internal_date: Option<String>,
        payload: AppendPayload,
    },
    GenUrlAuth {
        url: String,
        mechanism: String,
    },
    UidSubmit {
        uid: u32,
        options: Vec<(String, String)>,
    },
}

impl Command {
    /// Name used for diagnostics; matches the wire verb.
    pub fn verb(&self) -> &'static str {
        match self {
            Command::Capability => "CAPABILITY",
            Command::Noop => "NOOP",
            Command::Logout => "LOGOUT",
            Command::StartTls => "STARTTLS",
            Command::Idle => "IDLE",
            Command::IdleDone => "DONE",
            Command::Login { .. } => "LOGIN",
            Command::List { .. } => "LIST",
            Command::Status { .. } => "STATUS",
            Command::Select { .. } => "SELECT",
            Command::Examine { .. } => "EXAMINE",
            Command::Close => "CLOSE",
            Command::Fetch { uid: false, .. } => "FETCH",
            Command::Fetch { uid: true, .. } => "UID FETCH",
            Command::UidSearch { .. } => "UID SEARCH",
            Command::Append { .. } => "APPEND",
            Command::GenUrlAuth { .. } => "GENURLAUTH",
            Command::UidSubmit { .. } => "UID SUBMIT",
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct WireChunk {
    pub bytes: Vec<u8>,
    /// The writer must hold the following chunks until the server
    /// sends a continuation request.
    pub wait_for_continuation: bool,
}

struct ChunkBuilder {
    chunks: Vec<WireChunk>,
    current: Vec<u8>,
    literal_plus: bool,
}

impl ChunkBuilder {
    fn new(literal_plus: bool) -> Self {
        Self {
            chunks: Vec::new(),
            current: Vec::new(),
            literal_plus,
        }
    }

    fn raw(&mut self, text: &str) {
        self.current.extend_from_slice(text.as_bytes());
    }

    /// atom | quoted-string | literal, picked by content.
    fn astring(&mut self, value: &[u8]) {
        let is_atom = !value.is_empty()
            && value.iter().all(|&b| {
                b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.' | b'+' | b'/' | b'=')
            });
        if is_atom {
            self.current.extend_from_slice(value);
            return;
        }
        let quotable = value
            .iter()
            .all(|&b| (0x20..0x7f).contains(&b) && b != b'\r' && b != b'\n');
        if quotable {
            self.current.push(b'"');
            for &b in value {
                if b == b'"' || b == b'\\' {
                    self.current.push(b'\\');
                }
                self.current.push(b);
            }
            self.current.push(b'"');
        } else {
            self.literal(value);
        }
    }

    fn literal(&mut self, payload: &[u8]) {
        let marker = if self.literal_plus { "+" } else { "" };
        self.current
            .extend_from_slice(format!("{{{}{}}}\r\n", payload.len(), marker).as_bytes());
        let announced = std::mem::take(&mut self.current);
        self.chunks.push(WireChunk {
            bytes: announced,
            wait_for_continuation: !self.literal_plus,
        });
        self.current.extend_from_slice(payload);
    }

    fn finish(mut self) -> Vec<WireChunk> {
        self.current.extend_from_slice(b"\r\n");
        self.chunks.push(WireChunk {
            bytes: self.current,
            wait_for_continuation: false,
        });
        self.chunks
    }
}

/// Serialize a command under the given tag. `literal_plus` reflects a
/// negotiated LITERAL+ capability and turns every literal into the
/// non-synchronizing form.
pub fn serialize(command: &Command, tag: &str, literal_plus: bool) -> Vec<WireChunk> {
    let mut b = ChunkBuilder::new(literal_plus);

    if !matches!(command, Command::IdleDone) {
        b.raw(tag);
        b.raw(" ");
    }

    match command {
        Command::Capability
        | Command::Noop
        | Command::Logout
        | Command::StartTls
        | Command::Idle
        | Command::Close => b.raw(command.verb()),
        Command::IdleDone => b.raw("DONE"),
        Command::Login { username, password } => {
            b.raw("LOGIN ");
            b.astring(username.as_bytes());
            b.raw(" ");
            b.astring(password.as_bytes());
        }
        Command::List { reference, pattern } => {
            b.raw("LIST ");
            b.astring(reference.as_bytes());
            b.raw(" ");
            b.astring(pattern.as_bytes());
        }
        Command::Status { mailbox } => {
            b.raw("STATUS ");
            b.astring(mailbox.as_bytes());
            b.raw(" (MESSAGES RECENT UIDNEXT UIDVALIDITY UNSEEN)");
        }
        Command::Select { mailbox } => {
            b.raw("SELECT ");
            b.astring(mailbox.as_bytes());
        }
        Command::Examine { mailbox } => {
            b.raw("EXAMINE ");
            b.astring(mailbox.as_bytes());
        }
        Command::Fetch { set, uid, items } => {
            if *uid {
                b.raw("UID FETCH ");
            } else {
                b.raw("FETCH ");
            }
            b.raw(set);
            b.raw(" ");
            b.raw(items);
        }
        Command::UidSearch { query } => {
            b.raw("UID SEARCH ");
            b.raw(query);
        }
        Command::Append {
            mailbox,
            flags,
            internal_date,
            payload,
        } => {
            b.raw("APPEND ");
            b.astring(mailbox.as_bytes());
            if let Some(flags) = flags {
                b.raw(" (");
                b.raw(flags);
                b.raw(")");
            }
            if let Some(date) = internal_date {
                b.raw(" \"");
                b.raw(date);
                b.raw("\"");
            }
            b.raw(" ");
            match payload {
                AppendPayload::Literal(data) => b.literal(data),
                AppendPayload::Catenate(parts) => {
                    b.raw("CATENATE (");
                    for (i, part) in parts.iter().enumerate() {
                        if i > 0 {
                            b.raw(" ");
                        }
                        match part {
                            CatenatePart::Text(data) => {
                                b.raw("TEXT ");
                                b.literal(data);
                            }
                            CatenatePart::Url(url) => {
                                b.raw("URL ");
                                b.astring(url.as_bytes());
                            }
                        }
                    }
                    b.raw(")");
                }
            }
        }
        Command::GenUrlAuth { url, mechanism } => {
            b.raw("GENURLAUTH ");
            b.astring(url.as_bytes());
            b.raw(" ");
            b.raw(mechanism);
        }
        Command::UidSubmit { uid, options } => {
            b.raw("UID SUBMIT ");
            b.raw(&uid.to_string());
            if !options.is_empty() {
                b.raw(" (");
                for (i, (key, value)) in options.iter().enumerate() {
                    if i > 0 {
                        b.raw(" ");
                    }
                    b.raw(key);
                    b.raw(" ");
                    b.astring(value.as_bytes());
                }
                b.raw(")");
            }
        }
    }

    b.finish()
}

/// Redact secrets for logs; LOGIN passwords never hit the trace
/// output.
pub fn loggable(command: &Command) -> String {
    match command {
        Command::Login { username, .. } => format!("LOGIN {} <password>", username),
        other => format!("{:?}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat(chunks: &[WireChunk]) -> Vec<u8> {
        chunks.iter().flat_map(|c| c.bytes.clone()).collect()
    }

    #[test]
    fn tags_count_up() {
        let mut tags = TagGenerator::new();
        assert_eq!(tags.next_tag(), "y1");
        assert_eq!(tags.next_tag(), "y2");
        assert_eq!(tags.next_tag(), "y3");
    }

    #[test]
    fn simple_commands_are_one_chunk() {
        let chunks = serialize(&Command::Capability, "y7", false);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].bytes, b"y7 CAPABILITY\r\n".to_vec());
        assert!(!chunks[0].wait_for_continuation);
    }

    #[test]
    fn mailbox_names_get_quoted() {
        let chunks = serialize(
            &Command::Select {
                mailbox: "My Folder".into(),
            },
            "y1",
            false,
        );
        assert_eq!(flat(&chunks), b"y1 SELECT \"My Folder\"\r\n".to_vec());
    }

    #[test]
    fn login_uses_literal_for_odd_passwords() {
        let chunks = serialize(
            &Command::Login {
                username: "user".into(),
                password: "p\u{00e1}ss".into(),
            },
            "y1",
            false,
        );
        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].wait_for_continuation);
        assert!(chunks[0].bytes.ends_with(b"{5}\r\n"));
    }

    #[test]
    fn append_literal_waits_for_continuation() {
        let chunks = serialize(
            &Command::Append {
                mailbox: "Sent".into(),
                flags: Some("\\Seen".into()),
                internal_date: None,
                payload: AppendPayload::Literal(b"From: x\r\n\r\nbody".to_vec()),
            },
            "y2",
            false,
        );
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].bytes, b"y2 APPEND Sent (\\Seen) {15}\r\n".to_vec());
        assert!(chunks[0].wait_for_continuation);
        assert_eq!(chunks[1].bytes, b"From: x\r\n\r\nbody\r\n".to_vec());
    }

    #[test]
    fn literal_plus_needs_no_continuation() {
        let chunks = serialize(
            &Command::Append {
                mailbox: "Sent".into(),
                flags: None,
                internal_date: None,
                payload: AppendPayload::Literal(b"xyz".to_vec()),
            },
            "y3",
            true,
        );
        assert!(chunks.iter().all(|c| !c.wait_for_continuation));
        assert_eq!(flat(&chunks), b"y3 APPEND Sent {3+}\r\nxyz\r\n".to_vec());
    }

    #[test]
    fn catenate_interleaves_text_and_urls() {
        let chunks = serialize(
            &Command::Append {
                mailbox: "Sent".into(),
                flags: None,
                internal_date: None,
                payload: AppendPayload::Catenate(vec![
                    CatenatePart::Text(b"header".to_vec()),
                    CatenatePart::Url("imap://u@h/b;UIDVALIDITY=1/;UID=2".into()),
                    CatenatePart::Text(b"tail".to_vec()),
                ]),
            },
            "y4",
            true,
        );
        let all = String::from_utf8(flat(&chunks)).unwrap();
        assert!(all.starts_with("y4 APPEND Sent CATENATE (TEXT {6+}\r\nheader URL "));
        assert!(all.contains("TEXT {4+}\r\ntail"));
        assert!(all.ends_with(")\r\n"));
    }

    #[test]
    fn idle_done_has_no_tag() {
        let chunks = serialize(&Command::IdleDone, "y9", false);
        assert_eq!(flat(&chunks), b"DONE\r\n".to_vec());
    }

    #[test]
    fn uid_submit_carries_options() {
        let chunks = serialize(
            &Command::UidSubmit {
                uid: 23,
                options: vec![
                    ("FROM".into(), "a@b".into()),
                    ("RECIPIENT".into(), "c@d".into()),
                ],
            },
            "y5",
            false,
        );
        assert_eq!(
            flat(&chunks),
            b"y5 UID SUBMIT 23 (FROM \"a@b\" RECIPIENT \"c@d\")\r\n".to_vec()
        );
    }

    #[test]
    fn passwords_never_reach_logs() {
        let text = loggable(&Command::Login {
            username: "u".into(),
            password: "secret".into(),
        });
        assert!(!text.contains("secret"));
    }
}
