// Copyright © 2026 mailbeam.dev
// Licensed under MailBeam License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Complete construction-time configuration for the engine. There is
/// no global settings object; the host passes one of these to
/// [`crate::modules::engine::Engine::new`].
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct EngineConfig {
    pub imap: ImapServerConfig,
    pub cache: CacheConfig,
    /// Upper bound on concurrent parser connections.
    pub max_parsers: usize,
    /// Keepalive cadence while a connection is otherwise idle.
    pub noop_interval: Duration,
    /// Delay before a dropped connection is re-established.
    pub reconnect_backoff: Duration,
    pub initial_policy: NetworkPolicy,
    /// `User-Agent` value stamped on composed messages.
    pub user_agent: Option<String>,
    pub organization: Option<String>,
}

impl EngineConfig {
    pub fn new(imap: ImapServerConfig) -> Self {
        Self {
            imap,
            cache: CacheConfig::default(),
            max_parsers: 1,
            noop_interval: Duration::from_secs(2 * 60),
            reconnect_backoff: Duration::from_secs(10),
            initial_policy: NetworkPolicy::Online,
            user_agent: None,
            organization: None,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ImapServerConfig {
    pub host: String,
    pub port: u16,
    pub encryption: Encryption,
    pub auth: AuthConfig,
    /// TCP connect timeout.
    pub connect_timeout: Duration,
}

impl ImapServerConfig {
    pub fn new(host: impl Into<String>, port: u16, encryption: Encryption) -> Self {
        Self {
            host: host.into(),
            port,
            encryption,
            auth: AuthConfig::default(),
            connect_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub enum Encryption {
    /// Implicit TLS from the first byte (usually port 993).
    Ssl,
    /// Plain TCP upgraded with the STARTTLS command.
    StartTls,
    /// Cleartext. Only acceptable for tests and local bridges.
    None,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct AuthConfig {
    pub username: String,
    pub password: String,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct CacheConfig {
    /// Root directory for the persistent cache. `None` selects the
    /// in-memory cache.
    pub cache_dir: Option<PathBuf>,
    /// Entries older than this many days are treated as absent.
    pub renewal_days: u32,
    /// Part bodies larger than this many bytes divert to file storage.
    pub file_overflow_threshold: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_dir: None,
            renewal_days: 30,
            file_overflow_threshold: 1024 * 1024,
        }
    }
}

/// Network policy honored by the engine when scheduling tasks.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub enum NetworkPolicy {
    /// Queue all non-cache operations.
    Offline,
    /// Prefer cache; network only for operations with no cached answer.
    Expensive,
    /// Unrestricted.
    Online,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct LoggerConfig {
    pub log_level: String,
    pub ansi_logs: bool,
    pub log_to_file: bool,
    pub log_dir: PathBuf,
    pub max_log_files: usize,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            log_level: "info".into(),
            ansi_logs: true,
            log_to_file: false,
            log_dir: PathBuf::from("logs"),
            max_log_files: 7,
        }
    }
}
