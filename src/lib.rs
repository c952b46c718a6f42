//! MailBeam is an embeddable IMAP4rev1 client engine.
//!
//! The engine maintains one or more live connections to an IMAP server,
//! drives each connection through the IMAP state machine, synchronizes a
//! lazily populated mailbox/message tree with the server, and fetches
//! message metadata and body parts on demand. A host application
//! constructs an [`modules::engine::Engine`] from an explicit
//! [`modules::settings::EngineConfig`], runs it on a tokio runtime, and
//! talks to it through an [`modules::engine::EngineHandle`] while
//! subscribing to tree-change events.

pub mod modules;

pub use modules::engine::{Engine, EngineEvent, EngineHandle};
pub use modules::error::{code::ErrorCode, MailBeamError, MailBeamResult};
pub use modules::settings::{
    AuthConfig, CacheConfig, Encryption, EngineConfig, ImapServerConfig, LoggerConfig,
};
