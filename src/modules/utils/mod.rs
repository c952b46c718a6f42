// Copyright © 2026 mailbeam.dev
// Licensed under MailBeam License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use base64::{engine::general_purpose, Engine};

#[macro_export]
macro_rules! mailbeam_version {
    () => {
        env!("CARGO_PKG_VERSION")
    };
}

#[macro_export]
macro_rules! utc_now {
    () => {{
        use chrono::Utc;
        Utc::now().timestamp_millis()
    }};
}

#[macro_export]
macro_rules! after_n_days_timestamp {
    ($start_ts:expr, $days:expr) => {{
        const MILLIS_PER_DAY: i64 = 86_400_000;
        $start_ts + ($days as i64) * MILLIS_PER_DAY
    }};
}

#[macro_export]
macro_rules! base64_encode {
    ($bytes:expr) => {{
        use base64::{engine::general_purpose::STANDARD, *};
        STANDARD.encode($bytes)
    }};
}

#[macro_export]
macro_rules! raise_error {
    ($msg:expr, $code:expr) => {
        $crate::modules::error::MailBeamError::Generic {
            message: $msg,
            location: snafu::Location::default(),
            code: $code,
        }
    };
}

/// File-system-safe name for a mailbox, used to key the on-disk part
/// store. URL-safe base64 keeps the result ASCII and free of path
/// separators regardless of the mailbox name.
pub fn mailbox_dir_name(mailbox: &str) -> String {
    general_purpose::URL_SAFE.encode(mailbox.as_bytes())
}

pub fn decode_mailbox_dir_name(name: &str) -> Option<String> {
    let bytes = general_purpose::URL_SAFE.decode(name).ok()?;
    String::from_utf8(bytes).ok()
}

/// Random ASCII token of the requested length, used for MIME boundaries.
pub fn random_token(len: usize) -> String {
    use rand::Rng;
    const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
    let mut rng = rand::rng();
    (0..len)
        .map(|_| ALPHABET[rng.random_range(0..ALPHABET.len())] as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mailbox_dir_name_round_trips() {
        for name in ["INBOX", "Folder/Child", "Šta novog", "a&b-c"] {
            let dir = mailbox_dir_name(name);
            assert!(dir.chars().all(|c| c.is_ascii() && c != '/'));
            assert_eq!(decode_mailbox_dir_name(&dir).as_deref(), Some(name));
        }
    }

    #[test]
    fn random_token_has_requested_length() {
        let token = random_token(32);
        assert_eq!(token.len(), 32);
        assert!(token.chars().all(|c| c.is_ascii_alphanumeric()));
    }
}
