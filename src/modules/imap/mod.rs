// Copyright © 2026 mailbeam.dev
// Licensed under MailBeam License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

//! Parser I/O: the byte-stream transport, the incremental response
//! decoder, command serialization with tag and literal handling, and
//! the per-connection session record.

pub mod capabilities;
pub mod command;
pub mod parser;
pub mod response;
pub mod session;
pub mod transport;
