//! In-process scripted IMAP server for engine integration tests.
//!
//! Speaks just enough IMAP4rev1 over plain TCP to drive the engine
//! through its full lifecycle: greeting, CAPABILITY, LOGIN, LIST,
//! EXAMINE with the sync walk, UID SEARCH/FETCH and APPEND with the
//! literal continuation dance.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

/// Messages the fake INBOX holds: (uid, flags, bodystructure body).
const INBOX_UIDS: [u32; 3] = [3, 5, 9];

pub struct FakeImapServer {
    port: u16,
    appends_seen: Arc<AtomicUsize>,
    _handle: tokio::task::JoinHandle<()>,
}

impl FakeImapServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind to ephemeral port");
        let port = listener.local_addr().unwrap().port();
        let appends_seen = Arc::new(AtomicUsize::new(0));

        let counter = appends_seen.clone();
        let handle = tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                let counter = counter.clone();
                tokio::spawn(async move {
                    let _ = serve_connection(stream, counter).await;
                });
            }
        });

        Self {
            port,
            appends_seen,
            _handle: handle,
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn appends_seen(&self) -> usize {
        self.appends_seen.load(Ordering::SeqCst)
    }
}

async fn write_all(stream: &mut (impl AsyncWriteExt + Unpin), text: &str) -> std::io::Result<()> {
    stream.write_all(text.as_bytes()).await?;
    stream.flush().await
}

/// Read one CRLF-terminated line.
async fn read_line(reader: &mut BufReader<TcpStream>) -> std::io::Result<Option<String>> {
    let mut line = Vec::new();
    loop {
        let byte = match reader.read_u8().await {
            Ok(byte) => byte,
            Err(_) => return Ok(None),
        };
        if byte == b'\n' {
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            return Ok(Some(String::from_utf8_lossy(&line).into_owned()));
        }
        line.push(byte);
    }
}

/// A literal announcement only ever sits at the end of a line.
fn literal_size(line: &str) -> Option<(usize, bool)> {
    if !line.ends_with('}') {
        return None;
    }
    let open = line.rfind('{')?;
    let inner = &line[open + 1..line.len() - 1];
    let non_sync = inner.ends_with('+');
    inner.trim_end_matches('+').parse().ok().map(|n| (n, non_sync))
}

async fn serve_connection(
    stream: TcpStream,
    appends: Arc<AtomicUsize>,
) -> std::io::Result<()> {
    let mut reader = BufReader::new(stream);
    write_all(
        reader.get_mut(),
        "* OK [CAPABILITY IMAP4rev1 UIDPLUS CATENATE URLAUTH] fake server ready\r\n",
    )
    .await?;

    while let Some(mut line) = read_line(&mut reader).await? {
        // synchronizing literals: acknowledge and swallow the payload
        while let Some((size, non_sync)) = literal_size(&line) {
            if !non_sync {
                write_all(reader.get_mut(), "+ go ahead\r\n").await?;
            }
            let mut payload = vec![0u8; size];
            reader.read_exact(&mut payload).await?;
            let rest = read_line(&mut reader).await?.unwrap_or_default();
            line = format!("{line}<literal>{rest}");
        }

        let Some((tag, rest)) = line.split_once(' ') else {
            continue;
        };
        let upper = rest.to_ascii_uppercase();
        let out = reader.get_mut();

        if upper.starts_with("CAPABILITY") {
            write_all(out, "* CAPABILITY IMAP4rev1 UIDPLUS CATENATE URLAUTH\r\n").await?;
            write_all(out, &format!("{tag} OK capability done\r\n")).await?;
        } else if upper.starts_with("LOGIN") {
            write_all(out, &format!("{tag} OK logged in\r\n")).await?;
        } else if upper.starts_with("LIST") {
            for (attrs, name) in [
                ("\\HasNoChildren", "INBOX"),
                ("\\HasNoChildren", "alpha"),
                ("\\HasNoChildren", "Beta"),
                ("\\HasNoChildren", "gamma"),
                ("\\Noselect \\HasChildren", "archive"),
            ] {
                write_all(out, &format!("* LIST ({attrs}) \"/\" \"{name}\"\r\n")).await?;
            }
            write_all(out, &format!("{tag} OK list done\r\n")).await?;
        } else if upper.starts_with("STATUS") {
            write_all(
                out,
                "* STATUS \"INBOX\" (MESSAGES 3 RECENT 0 UIDNEXT 10 UIDVALIDITY 777 UNSEEN 1)\r\n",
            )
            .await?;
            write_all(out, &format!("{tag} OK status done\r\n")).await?;
        } else if upper.starts_with("EXAMINE") || upper.starts_with("SELECT") {
            write_all(out, "* 3 EXISTS\r\n").await?;
            write_all(out, "* 0 RECENT\r\n").await?;
            write_all(
                out,
                "* FLAGS (\\Answered \\Flagged \\Deleted \\Seen \\Draft)\r\n",
            )
            .await?;
            write_all(out, "* OK [UIDVALIDITY 777] UIDs valid\r\n").await?;
            write_all(out, "* OK [UIDNEXT 10] next uid\r\n").await?;
            write_all(out, "* OK [UNSEEN 1] first unseen\r\n").await?;
            write_all(
                out,
                "* OK [PERMANENTFLAGS (\\Seen \\Deleted \\*)] limited\r\n",
            )
            .await?;
            let mode = if upper.starts_with("EXAMINE") {
                "[READ-ONLY]"
            } else {
                "[READ-WRITE]"
            };
            write_all(out, &format!("{tag} OK {mode} opened\r\n")).await?;
        } else if upper.starts_with("UID SEARCH") {
            let uids: Vec<String> = INBOX_UIDS.iter().map(|uid| uid.to_string()).collect();
            write_all(out, &format!("* SEARCH {}\r\n", uids.join(" "))).await?;
            write_all(out, &format!("{tag} OK search done\r\n")).await?;
        } else if upper.starts_with("UID FETCH") && upper.contains("BODY.PEEK[1]") {
            let body = "hello world";
            write_all(
                out,
                &format!(
                    "* 2 FETCH (UID 5 BODY[1] {{{}}}\r\n{})\r\n",
                    body.len(),
                    body
                ),
            )
            .await?;
            write_all(out, &format!("{tag} OK fetch done\r\n")).await?;
        } else if upper.starts_with("UID FETCH") && upper.contains("ENVELOPE") {
            write_all(
                out,
                "* 2 FETCH (UID 5 FLAGS (\\Seen) RFC822.SIZE 120 \
                 INTERNALDATE \"10-Mar-2024 09:30:00 +0100\" \
                 ENVELOPE (\"Sun, 10 Mar 2024 09:30:00 +0100\" \"fake subject\" \
                 ((\"Jan\" NIL \"jan\" \"example.org\")) NIL NIL \
                 ((NIL NIL \"alice\" \"example.net\")) NIL NIL NIL \"<mid@example.org>\") \
                 BODYSTRUCTURE (\"text\" \"plain\" (\"charset\" \"utf-8\") NIL NIL \"7bit\" 11 1))\r\n",
            )
            .await?;
            write_all(out, &format!("{tag} OK fetch done\r\n")).await?;
        } else if upper.starts_with("UID FETCH") || upper.starts_with("FETCH") {
            // flag listings for the sync walk
            for (seq, uid) in INBOX_UIDS.iter().enumerate() {
                write_all(
                    out,
                    &format!("* {} FETCH (UID {} FLAGS (\\Seen))\r\n", seq + 1, uid),
                )
                .await?;
            }
            write_all(out, &format!("{tag} OK fetch done\r\n")).await?;
        } else if upper.starts_with("APPEND") {
            appends.fetch_add(1, Ordering::SeqCst);
            write_all(out, &format!("{tag} OK [APPENDUID 111 23] append done\r\n")).await?;
        } else if upper.starts_with("GENURLAUTH") {
            // echo the URL back with a fake access token attached
            let url = rest
                .split('"')
                .nth(1)
                .unwrap_or("imap://fake")
                .to_string();
            write_all(out, &format!("* GENURLAUTH \"{url}:internal:91354a\"\r\n")).await?;
            write_all(out, &format!("{tag} OK genurlauth done\r\n")).await?;
        } else if upper.starts_with("NOOP") {
            write_all(out, &format!("{tag} OK noop done\r\n")).await?;
        } else if upper.starts_with("LOGOUT") {
            write_all(out, "* BYE see you\r\n").await?;
            write_all(out, &format!("{tag} OK logout done\r\n")).await?;
            return Ok(());
        } else {
            write_all(out, &format!("{tag} BAD unknown command\r\n")).await?;
        }
    }
    Ok(())
}
