// Copyright © 2026 mailbeam.dev
// Licensed under MailBeam License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

//! Connection state machine.
//!
//! The per-state response interpreters are pure functions over the
//! session record: `handle(session, response)` mutates only the
//! session's own accumulators and returns the engine-level side
//! effects as explicit [`HandlerAction`]s. The engine applies those to
//! the tree, the cache and the task set; the handlers never touch
//! them.

use crate::modules::error::MailBeamResult;
use crate::modules::imap::response::{FetchAttr, ImapResponse};
use crate::modules::imap::session::SessionCore;
use serde::{Deserialize, Serialize};

pub mod authenticated;
pub mod selected;
pub mod selecting;
pub mod unauthenticated;

/// Connection lifecycle. Monotonic except for the Selected ↔
/// Authenticated transitions via SELECT and CLOSE.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum ConnectionState {
    /// TCP (or TLS) is up, greeting not yet seen.
    Established,
    NotAuthenticated,
    Authenticated,
    /// SELECT/EXAMINE submitted or post-SELECT sync still running.
    Syncing,
    Selected,
    LoggingOut,
}

/// Side effects a state handler asks the engine to perform.
#[derive(Clone, Debug, PartialEq)]
pub enum HandlerAction {
    /// A capability list arrived (untagged or via response code).
    CapabilitiesChanged,
    /// An `ALERT` response code; the text must reach the user
    /// verbatim.
    Alert(String),
    /// Apply an EXPUNGE for this 1-based sequence number.
    ApplyExpunge(u32),
    /// The server reported a (possibly grown) EXISTS.
    ApplyExists(u32),
    ApplyRecent(u32),
    /// FETCH data addressed to the message at this sequence.
    ApplyFetch { seq: u32, attrs: Vec<FetchAttr> },
    /// UID SEARCH results for whatever sync or search task is active.
    SearchResults(Vec<u32>),
    /// The connection is shutting down (BYE).
    ConnectionClosing,
}

/// Route one untagged response through the handler for the session's
/// current state. Tagged completions never come here; the engine
/// routes them to their owning task first.
pub fn handle_untagged(
    session: &mut SessionCore,
    response: &ImapResponse,
) -> MailBeamResult<Vec<HandlerAction>> {
    match session.state {
        ConnectionState::Established | ConnectionState::NotAuthenticated => {
            unauthenticated::handle(session, response)
        }
        ConnectionState::Authenticated => authenticated::handle(session, response),
        ConnectionState::Syncing => selecting::handle(session, response),
        ConnectionState::Selected => selected::handle(session, response),
        ConnectionState::LoggingOut => {
            // nothing matters anymore; swallow everything
            Ok(Vec::new())
        }
    }
}
