// Copyright © 2026 mailbeam.dev
// Licensed under MailBeam License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use serde::{Deserialize, Serialize};

/// Stable error codes surfaced to the host application.
///
/// Codes are partitioned by range: configuration and caller errors
/// (10000+), network and transport (40000+), IMAP protocol (50000+),
/// cache (60000+), internal (70000+).
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[repr(u32)]
pub enum ErrorCode {
    // Caller-side errors (10000–10999)
    InvalidParameter = 10000,
    MissingConfiguration = 10020,
    Incompatible = 10030,

    // Network connection errors (40000–40999)
    NetworkError = 40000,
    ConnectionTimeout = 40010,
    TlsHandshakeFailed = 40020,
    ConnectionClosed = 40030,

    // IMAP protocol errors (50000–50999)
    ImapCommandFailed = 50000,
    ImapAuthenticationFailed = 50010,
    ProtocolViolation = 50020,
    UnknownMessageIndex = 50030,
    UidValidityMismatch = 50040,
    MailboxNotSelectable = 50050,
    TaskCancelled = 50060,
    TargetGone = 50070,

    // Cache errors (60000–60999)
    CacheError = 60000,

    // Resource and internal errors (70000–70999)
    ResourceNotFound = 70000,
    InternalError = 70010,
}

impl ErrorCode {
    /// Whether the failed operation may be retried once a new
    /// connection is available. Protocol violations and validity
    /// mismatches must not be retried.
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            ErrorCode::NetworkError | ErrorCode::ConnectionTimeout | ErrorCode::ConnectionClosed
        )
    }
}
