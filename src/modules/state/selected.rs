//! Handler for the Selected state: live mailbox traffic. EXPUNGE
//! mutates the message list, EXISTS growth adds placeholders, FETCH
//! dispatches to the addressed message. LIST/STATUS remain legal here
//! because tasks may run them without leaving the mailbox, so
//! anything this handler does not treat specially falls back to the
//! authenticated handler.

use super::{authenticated, HandlerAction};
use crate::modules::error::MailBeamResult;
use crate::modules::imap::response::{ImapResponse, MailboxData};
use crate::modules::imap::session::SessionCore;

pub fn handle(
    session: &mut SessionCore,
    response: &ImapResponse,
) -> MailBeamResult<Vec<HandlerAction>> {
    let mut actions = Vec::new();
    match response {
        ImapResponse::Expunge(seq) => {
            actions.push(HandlerAction::ApplyExpunge(*seq));
            Ok(actions)
        }
        ImapResponse::MailboxData(MailboxData::Exists(n)) => {
            actions.push(HandlerAction::ApplyExists(*n));
            Ok(actions)
        }
        ImapResponse::MailboxData(MailboxData::Recent(n)) => {
            actions.push(HandlerAction::ApplyRecent(*n));
            Ok(actions)
        }
        ImapResponse::MailboxData(MailboxData::Search(uids)) => {
            actions.push(HandlerAction::SearchResults(uids.clone()));
            Ok(actions)
        }
        ImapResponse::MailboxData(MailboxData::Flags(flags)) => {
            session.pending_sync.flags = flags.clone();
            Ok(actions)
        }
        ImapResponse::Fetch { seq, attrs } => {
            actions.push(HandlerAction::ApplyFetch {
                seq: *seq,
                attrs: attrs.clone(),
            });
            Ok(actions)
        }
        other => authenticated::handle(session, other),
    }
}
