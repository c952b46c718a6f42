// Copyright © 2026 mailbeam.dev
// Licensed under MailBeam License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use code::ErrorCode;
use snafu::{Location, Snafu};

pub mod code;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum MailBeamError {
    #[snafu(display("{message}"))]
    Generic {
        message: String,
        #[snafu(implicit)]
        location: Location,
        code: ErrorCode,
    },
}

pub type MailBeamResult<T, E = MailBeamError> = std::result::Result<T, E>;

impl MailBeamError {
    pub fn code(&self) -> ErrorCode {
        match self {
            MailBeamError::Generic { code, .. } => *code,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            MailBeamError::Generic { message, .. } => message,
        }
    }

    /// True when the error category tears down the affected connection.
    pub fn is_connection_fatal(&self) -> bool {
        matches!(
            self.code(),
            ErrorCode::ProtocolViolation
                | ErrorCode::NetworkError
                | ErrorCode::ConnectionClosed
                | ErrorCode::TlsHandshakeFailed
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raise_error;

    #[test]
    fn error_carries_code_and_message() {
        let err = raise_error!("mailbox gone".into(), ErrorCode::ResourceNotFound);
        assert_eq!(err.code(), ErrorCode::ResourceNotFound);
        assert_eq!(err.message(), "mailbox gone");
        assert_eq!(format!("{}", err), "mailbox gone");
    }

    #[test]
    fn protocol_violation_is_connection_fatal() {
        let err = raise_error!(
            "LIST in unauthenticated state".into(),
            ErrorCode::ProtocolViolation
        );
        assert!(err.is_connection_fatal());
        let err = raise_error!("NO bad mailbox".into(), ErrorCode::ImapCommandFailed);
        assert!(!err.is_connection_fatal());
    }
}
