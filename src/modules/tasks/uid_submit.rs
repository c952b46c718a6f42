// Copyright © 2026 mailbeam.dev
// Licensed under MailBeam License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

//! UID SUBMIT task: hand a message already sitting in a mailbox to
//! the server's submission agent. The caller's UIDVALIDITY must match
//! the mailbox's current one; a mismatch is a hard failure that must
//! not be retried, since the UID may now denote a different message.

use crate::modules::cache::CacheFacade;
use crate::modules::error::{code::ErrorCode, MailBeamResult};
use crate::modules::imap::command::Command;
use crate::raise_error;

/// Validate the caller's UIDVALIDITY against the engine's view and
/// build the command. The options list carries FROM/RECIPIENT pairs.
pub fn make_uid_submit_command(
    cache: &mut CacheFacade,
    mailbox: &str,
    expected_uid_validity: u32,
    uid: u32,
    options: Vec<(String, String)>,
) -> MailBeamResult<Command> {
    let current = cache
        .sync_state(mailbox)
        .and_then(|state| state.uid_validity);
    match current {
        Some(real) if real == expected_uid_validity => Ok(Command::UidSubmit { uid, options }),
        Some(real) => Err(raise_error!(
            format!(
                "UIDVALIDITY mismatch in '{mailbox}': expected {expected_uid_validity}, got {real}"
            ),
            ErrorCode::UidValidityMismatch
        )),
        None => Err(raise_error!(
            format!("mailbox '{mailbox}' has no known UIDVALIDITY"),
            ErrorCode::UidValidityMismatch
        )),
    }
}

/// FROM/RECIPIENT option pairs for the submission.
pub fn submit_options(from: &str, recipients: &[String]) -> Vec<(String, String)> {
    let mut options = vec![("FROM".to_string(), from.to_string())];
    for recipient in recipients {
        options.push(("RECIPIENT".to_string(), recipient.clone()));
    }
    options
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::cache::{memory::MemoryCache, SyncState};

    fn cache_with_validity(validity: u32) -> CacheFacade {
        let mut cache = CacheFacade::new(Box::new(MemoryCache::new()));
        cache.set_sync_state(
            "Sent",
            &SyncState {
                exists: Some(1),
                uid_next: Some(24),
                uid_validity: Some(validity),
                ..SyncState::default()
            },
        );
        cache
    }

    #[test]
    fn matching_validity_builds_the_command() {
        let mut cache = cache_with_validity(111);
        let command = make_uid_submit_command(
            &mut cache,
            "Sent",
            111,
            23,
            submit_options("a@b", &["c@d".to_string()]),
        )
        .unwrap();
        match command {
            Command::UidSubmit { uid, options } => {
                assert_eq!(uid, 23);
                assert_eq!(options[0], ("FROM".to_string(), "a@b".to_string()));
                assert_eq!(options[1], ("RECIPIENT".to_string(), "c@d".to_string()));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn mismatch_fails_with_distinct_error() {
        let mut cache = cache_with_validity(222);
        let err =
            make_uid_submit_command(&mut cache, "Sent", 111, 23, vec![]).unwrap_err();
        assert_eq!(err.code(), ErrorCode::UidValidityMismatch);
        assert!(!err.code().retryable());
    }

    #[test]
    fn unknown_validity_also_fails() {
        let mut cache = CacheFacade::new(Box::new(MemoryCache::new()));
        let err =
            make_uid_submit_command(&mut cache, "Sent", 111, 23, vec![]).unwrap_err();
        assert_eq!(err.code(), ErrorCode::UidValidityMismatch);
    }
}
