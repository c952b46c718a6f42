// Copyright © 2026 mailbeam.dev
// Licensed under MailBeam License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

//! APPEND task: build the command (single literal or CATENATE pair
//! list) and interpret the tagged completion. An `APPENDUID` response
//! code yields (uidValidity, uid); its absence is not an error but
//! disables BURL-based submission for that message.

use super::TaskResult;
use crate::modules::error::{code::ErrorCode, MailBeamError};
use crate::modules::imap::command::{AppendPayload, Command};
use crate::modules::imap::response::{RespCode, StatusKind};
use crate::raise_error;
use chrono::{DateTime, FixedOffset};
use tracing::debug;

/// Wire form of an INTERNALDATE, e.g. `14-Jul-2024 18:02:00 +0200`.
pub fn format_internal_date(timestamp: &DateTime<FixedOffset>) -> String {
    timestamp.format("%d-%b-%Y %H:%M:%S %z").to_string()
}

pub fn make_append_command(
    wire_mailbox: &str,
    flags: Option<&[String]>,
    timestamp: Option<&DateTime<FixedOffset>>,
    payload: AppendPayload,
) -> Command {
    Command::Append {
        mailbox: wire_mailbox.to_string(),
        flags: flags.map(|list| list.join(" ")),
        internal_date: timestamp.map(format_internal_date),
        payload,
    }
}

/// Interpret the tagged completion of an APPEND.
pub fn interpret_append_done(
    status: StatusKind,
    code: &Option<RespCode>,
    information: &Option<String>,
) -> Result<TaskResult, MailBeamError> {
    match status {
        StatusKind::Ok => match code {
            Some(RespCode::AppendUid { uid_validity, uid }) => {
                debug!(uid_validity, ?uid, "APPENDUID received");
                Ok(TaskResult::Append {
                    uid_validity: Some(*uid_validity),
                    uid: *uid,
                })
            }
            _ => Ok(TaskResult::Append {
                uid_validity: None,
                uid: None,
            }),
        },
        _ => Err(raise_error!(
            format!(
                "APPEND refused: {}",
                information.as_deref().unwrap_or("no reason given")
            ),
            ErrorCode::ImapCommandFailed
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn appenduid_parses_validity_and_uid() {
        // tagged "OK [APPENDUID 111 23] done"
        let result = interpret_append_done(
            StatusKind::Ok,
            &Some(RespCode::AppendUid {
                uid_validity: 111,
                uid: Some(23),
            }),
            &Some("done".into()),
        )
        .unwrap();
        assert_eq!(
            result,
            TaskResult::Append {
                uid_validity: Some(111),
                uid: Some(23)
            }
        );
    }

    #[test]
    fn missing_appenduid_is_not_fatal() {
        let result =
            interpret_append_done(StatusKind::Ok, &None, &Some("completed".into())).unwrap();
        assert_eq!(
            result,
            TaskResult::Append {
                uid_validity: None,
                uid: None
            }
        );
    }

    #[test]
    fn no_fails_with_server_text() {
        let err = interpret_append_done(
            StatusKind::No,
            &None,
            &Some("quota exceeded".into()),
        )
        .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ImapCommandFailed);
        assert!(err.message().contains("quota exceeded"));
    }

    #[test]
    fn internal_date_uses_imap_format() {
        let timestamp = FixedOffset::east_opt(2 * 3600)
            .unwrap()
            .with_ymd_and_hms(2024, 7, 14, 18, 2, 0)
            .unwrap();
        assert_eq!(format_internal_date(&timestamp), "14-Jul-2024 18:02:00 +0200");
    }

    #[test]
    fn append_command_carries_flags_and_date() {
        let timestamp = FixedOffset::east_opt(0)
            .unwrap()
            .with_ymd_and_hms(2024, 1, 2, 3, 4, 5)
            .unwrap();
        let command = make_append_command(
            "Sent",
            Some(&["\\Seen".to_string()]),
            Some(&timestamp),
            AppendPayload::Literal(b"x".to_vec()),
        );
        match command {
            Command::Append {
                mailbox,
                flags,
                internal_date,
                ..
            } => {
                assert_eq!(mailbox, "Sent");
                assert_eq!(flags.as_deref(), Some("\\Seen"));
                assert_eq!(internal_date.as_deref(), Some("02-Jan-2024 03:04:05 +0000"));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }
}
