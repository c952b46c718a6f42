//! GENURLAUTH task: ask the server to mint an authorized IMAP URL a
//! third party (the submission server, for BURL) can dereference.

use crate::modules::codec::utf7::encode_mailbox_name;
use crate::modules::imap::command::Command;

/// Build the `imap://` URL for a message freshly APPENDed into
/// `mailbox`, ready to be passed to GENURLAUTH with `;urlauth=submit+`.
pub fn message_url(
    host: &str,
    username: &str,
    mailbox: &str,
    uid_validity: u32,
    uid: u32,
    submit_user: &str,
) -> String {
    let wire_mailbox = encode_mailbox_name(mailbox);
    format!(
        "imap://{}@{}/{};UIDVALIDITY={};uid={};urlauth=submit+{}",
        urlencoding::encode(username),
        host,
        urlencoding::encode(&wire_mailbox),
        uid_validity,
        uid,
        urlencoding::encode(submit_user),
    )
}

pub fn make_genurlauth_command(url: &str, mechanism: &str) -> Command {
    Command::GenUrlAuth {
        url: url.to_string(),
        mechanism: mechanism.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_encodes_user_and_mailbox() {
        let url = message_url("mail.example.org", "jan", "Sent Items", 111, 23, "jan");
        assert_eq!(
            url,
            "imap://jan@mail.example.org/Sent%20Items;UIDVALIDITY=111;uid=23;urlauth=submit+jan"
        );
    }

    #[test]
    fn non_ascii_mailboxes_go_over_the_wire_encoded() {
        let url = message_url("h", "u", "Odeslan\u{00e9}", 1, 2, "u");
        // modified UTF-7 first, then percent-escaping of the '&'
        assert!(url.contains("Odeslan%26AOk-"), "{url}");
        assert!(url.is_ascii());
    }
}
