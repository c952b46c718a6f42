// Copyright © 2026 mailbeam.dev
// Licensed under MailBeam License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

//! Handler for the Authenticated state: accumulates LIST and STATUS
//! replies into the session buffers, absorbs capabilities and alerts,
//! and rejects message-level data as unexpected.

use super::HandlerAction;
use crate::modules::error::{code::ErrorCode, MailBeamResult};
use crate::modules::imap::response::{ImapResponse, MailboxData, RespCode, StatusKind};
use crate::modules::imap::session::{ListReply, SessionCore, StatusReply};
use crate::modules::state::ConnectionState;
use crate::raise_error;

pub fn handle(
    session: &mut SessionCore,
    response: &ImapResponse,
) -> MailBeamResult<Vec<HandlerAction>> {
    let mut actions = Vec::new();
    match response {
        ImapResponse::MailboxData(MailboxData::List {
            attributes,
            delimiter,
            name,
        }) => {
            session.list_replies.push(ListReply {
                attributes: attributes.clone(),
                delimiter: delimiter.clone(),
                name: name.clone(),
            });
            Ok(actions)
        }
        ImapResponse::MailboxData(MailboxData::Status { mailbox, items }) => {
            session.status_replies.push(StatusReply {
                mailbox: mailbox.clone(),
                items: items.clone(),
            });
            Ok(actions)
        }
        ImapResponse::Capabilities(caps) => {
            session.caps.replace(caps);
            actions.push(HandlerAction::CapabilitiesChanged);
            Ok(actions)
        }
        ImapResponse::Data {
            status,
            code,
            information,
        } => {
            if *status == StatusKind::Bye {
                session.state = ConnectionState::LoggingOut;
                actions.push(HandlerAction::ConnectionClosing);
            }
            match code {
                Some(RespCode::Capabilities(caps)) => {
                    session.caps.replace(caps);
                    actions.push(HandlerAction::CapabilitiesChanged);
                }
                Some(RespCode::Alert) => actions.push(HandlerAction::Alert(
                    information.clone().unwrap_or_default(),
                )),
                _ => {}
            }
            Ok(actions)
        }
        // GENURLAUTH replies are routed to their task by the engine
        ImapResponse::Continue { .. } | ImapResponse::Other(_) | ImapResponse::GenUrlAuth(_) => {
            Ok(actions)
        }
        ImapResponse::Disconnected { .. } => {
            session.state = ConnectionState::LoggingOut;
            actions.push(HandlerAction::ConnectionClosing);
            Ok(actions)
        }
        other => Err(raise_error!(
            format!("unexpected response in authenticated state: {:?}", other),
            ErrorCode::ProtocolViolation
        )),
    }
}
