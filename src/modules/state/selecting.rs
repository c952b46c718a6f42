// Copyright © 2026 mailbeam.dev
// Licensed under MailBeam License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

//! Handler for the Syncing state: between SELECT/EXAMINE submission
//! and the end of the post-SELECT sync walk. SELECT's untagged
//! responses accumulate into the pending SyncState; FETCH data that
//! arrives early feeds the UID map and flag buffers the sync phase
//! consumes; anything else unexpected is kept for later instead of
//! being dropped.

use super::HandlerAction;
use crate::modules::error::MailBeamResult;
use crate::modules::imap::response::{FetchAttr, ImapResponse, MailboxData, RespCode, StatusKind};
use crate::modules::imap::session::SessionCore;
use crate::modules::state::ConnectionState;
use tracing::trace;

fn absorb_code(
    session: &mut SessionCore,
    code: &RespCode,
    information: &Option<String>,
    actions: &mut Vec<HandlerAction>,
) {
    match code {
        RespCode::UidNext(n) => session.pending_sync.uid_next = Some(*n),
        RespCode::UidValidity(n) => session.pending_sync.uid_validity = Some(*n),
        RespCode::Unseen(n) => session.pending_sync.unseen = Some(*n),
        RespCode::PermanentFlags(flags) => {
            session.pending_sync.permanent_flags = flags.clone();
        }
        RespCode::ReadOnly => session.read_only = true,
        RespCode::ReadWrite => session.read_only = false,
        RespCode::Alert => actions.push(HandlerAction::Alert(
            information.clone().unwrap_or_default(),
        )),
        RespCode::Capabilities(caps) => {
            session.caps.replace(caps);
            actions.push(HandlerAction::CapabilitiesChanged);
        }
        _ => {}
    }
}

pub fn handle(
    session: &mut SessionCore,
    response: &ImapResponse,
) -> MailBeamResult<Vec<HandlerAction>> {
    let mut actions = Vec::new();
    match response {
        ImapResponse::MailboxData(MailboxData::Exists(n)) => {
            session.pending_sync.exists = Some(*n);
        }
        ImapResponse::MailboxData(MailboxData::Recent(n)) => {
            session.pending_sync.recent = Some(*n);
        }
        ImapResponse::MailboxData(MailboxData::Flags(flags)) => {
            session.pending_sync.flags = flags.clone();
        }
        ImapResponse::MailboxData(MailboxData::Search(uids)) => {
            actions.push(HandlerAction::SearchResults(uids.clone()));
        }
        ImapResponse::Data {
            status,
            code,
            information,
        } => {
            if *status == StatusKind::Bye {
                session.state = ConnectionState::LoggingOut;
                actions.push(HandlerAction::ConnectionClosing);
            } else if let Some(code) = code {
                absorb_code(session, code, information, &mut actions);
            }
        }
        ImapResponse::Fetch { seq, attrs } => {
            // flag fetches during the sync walk; uid_map entry plus
            // the flag buffer keyed by UID
            let uid = attrs.iter().find_map(|a| match a {
                FetchAttr::Uid(uid) => Some(*uid),
                _ => None,
            });
            let flags = attrs.iter().find_map(|a| match a {
                FetchAttr::Flags(flags) => Some(flags.clone()),
                _ => None,
            });
            if let Some(uid) = uid {
                let index = (*seq as usize).saturating_sub(1);
                if session.uid_map.len() <= index {
                    session.uid_map.resize(index + 1, 0);
                }
                session.uid_map[index] = uid;
                if let Some(flags) = flags {
                    session.syncing_flags.insert(uid, flags);
                }
            } else {
                trace!(session = session.id, seq, "fetch without UID during sync");
                session.deferred.push(response.clone());
            }
        }
        ImapResponse::Expunge(_) => {
            // cannot be applied while the view is being rebuilt
            session.deferred.push(response.clone());
        }
        ImapResponse::Capabilities(caps) => {
            session.caps.replace(caps);
            actions.push(HandlerAction::CapabilitiesChanged);
        }
        ImapResponse::Disconnected { .. } => {
            session.state = ConnectionState::LoggingOut;
            actions.push(HandlerAction::ConnectionClosing);
        }
        other => {
            // unexpected kind; keep it for the post-SELECT phase
            session.deferred.push(other.clone());
        }
    }
    Ok(actions)
}
