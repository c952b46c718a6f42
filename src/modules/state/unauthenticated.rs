// Copyright © 2026 mailbeam.dev
// Licensed under MailBeam License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

//! Handler for the Established and NotAuthenticated states: greeting
//! classification, server-initiated capabilities and alerts. Any data
//! response this early is a protocol violation that fails the session.

use super::{ConnectionState, HandlerAction};
use crate::modules::error::{code::ErrorCode, MailBeamResult};
use crate::modules::imap::capabilities::CapabilitySet;
use crate::modules::imap::response::{ImapResponse, RespCode, StatusKind};
use crate::modules::imap::session::SessionCore;
use crate::raise_error;
use tracing::debug;

/// What the connection driver should do next while the session is not
/// yet authenticated.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ConnectStep {
    /// Capabilities are unknown or stale; ask for them.
    NeedCapability,
    /// Issue STARTTLS before anything else.
    StartTls,
    /// Capabilities are known and logins are allowed.
    Login,
}

/// Decide the next connection step from the capability set and the
/// transport's TLS status. `want_starttls` reflects the configured
/// encryption mode.
pub fn decide_next_step(
    caps: &CapabilitySet,
    tls_active: bool,
    want_starttls: bool,
) -> MailBeamResult<ConnectStep> {
    if !caps.is_known() || !caps.is_fresh() {
        return Ok(ConnectStep::NeedCapability);
    }
    if !tls_active && (want_starttls || caps.login_disabled()) {
        if caps.starttls() {
            return Ok(ConnectStep::StartTls);
        }
        return Err(raise_error!(
            "logins are disabled and the server does not offer STARTTLS".into(),
            ErrorCode::ImapAuthenticationFailed
        ));
    }
    if caps.login_disabled() {
        return Err(raise_error!(
            "server still advertises LOGINDISABLED after STARTTLS".into(),
            ErrorCode::ImapAuthenticationFailed
        ));
    }
    Ok(ConnectStep::Login)
}

fn absorb_code(
    session: &mut SessionCore,
    code: &Option<RespCode>,
    actions: &mut Vec<HandlerAction>,
    information: &Option<String>,
) {
    match code {
        Some(RespCode::Capabilities(caps)) => {
            session.caps.replace(caps);
            actions.push(HandlerAction::CapabilitiesChanged);
        }
        Some(RespCode::Alert) => {
            actions.push(HandlerAction::Alert(
                information.clone().unwrap_or_default(),
            ));
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
        ImapResponse::Data {
            status,
            code,
            information,
        } => {
            absorb_code(session, code, &mut actions, information);
            if session.state == ConnectionState::Established {
                // this is the greeting
                match status {
                    StatusKind::Ok => {
                        debug!(session = session.id, "greeting: OK, not authenticated");
                        session.state = ConnectionState::NotAuthenticated;
                    }
                    StatusKind::PreAuth => {
                        debug!(session = session.id, "greeting: PREAUTH");
                        session.state = ConnectionState::Authenticated;
                    }
                    StatusKind::Bye => {
                        session.state = ConnectionState::LoggingOut;
                        actions.push(HandlerAction::ConnectionClosing);
                    }
                    StatusKind::No | StatusKind::Bad => {
                        return Err(raise_error!(
                            format!(
                                "server refused the connection: {}",
                                information.as_deref().unwrap_or("")
                            ),
                            ErrorCode::ProtocolViolation
                        ));
                    }
                }
            } else if *status == StatusKind::Bye {
                session.state = ConnectionState::LoggingOut;
                actions.push(HandlerAction::ConnectionClosing);
            }
            Ok(actions)
        }
        ImapResponse::Capabilities(caps) => {
            session.caps.replace(caps);
            actions.push(HandlerAction::CapabilitiesChanged);
            Ok(actions)
        }
        ImapResponse::Disconnected { .. } => {
            session.state = ConnectionState::LoggingOut;
            actions.push(HandlerAction::ConnectionClosing);
            Ok(actions)
        }
        ImapResponse::Continue { .. } => {
            // continuation with nothing pending; harmless
            Ok(actions)
        }
        other => Err(raise_error!(
            format!(
                "data response in unauthenticated state: {:?}",
                other
            ),
            ErrorCode::ProtocolViolation
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::state::test_support::make_session;

    #[test]
    fn ok_greeting_moves_to_not_authenticated() {
        let mut session = make_session(ConnectionState::Established);
        let actions = handle(
            &mut session,
            &ImapResponse::Data {
                status: StatusKind::Ok,
                code: Some(RespCode::Capabilities(vec![
                    "IMAP4rev1".into(),
                    "STARTTLS".into(),
                ])),
                information: Some("ready".into()),
            },
        )
        .unwrap();
        assert_eq!(session.state, ConnectionState::NotAuthenticated);
        assert!(session.caps.starttls());
        assert!(actions.contains(&HandlerAction::CapabilitiesChanged));
    }

    #[test]
    fn preauth_greeting_skips_login() {
        let mut session = make_session(ConnectionState::Established);
        handle(
            &mut session,
            &ImapResponse::Data {
                status: StatusKind::PreAuth,
                code: None,
                information: None,
            },
        )
        .unwrap();
        assert_eq!(session.state, ConnectionState::Authenticated);
    }

    #[test]
    fn bye_greeting_is_logging_out() {
        let mut session = make_session(ConnectionState::Established);
        let actions = handle(
            &mut session,
            &ImapResponse::Data {
                status: StatusKind::Bye,
                code: None,
                information: Some("go away".into()),
            },
        )
        .unwrap();
        assert_eq!(session.state, ConnectionState::LoggingOut);
        assert!(actions.contains(&HandlerAction::ConnectionClosing));
    }

    #[test]
    fn data_responses_violate_protocol() {
        let mut session = make_session(ConnectionState::NotAuthenticated);
        let err = handle(&mut session, &ImapResponse::Expunge(3)).unwrap_err();
        assert_eq!(err.code(), ErrorCode::ProtocolViolation);
    }

    #[test]
    fn login_gated_behind_starttls_when_disabled() {
        let mut caps = CapabilitySet::new();
        caps.replace(&[
            "IMAP4rev1".into(),
            "STARTTLS".into(),
            "LOGINDISABLED".into(),
        ]);
        assert_eq!(
            decide_next_step(&caps, false, false).unwrap(),
            ConnectStep::StartTls
        );
        // after the upgrade the server stops advertising LOGINDISABLED
        let mut after = CapabilitySet::new();
        after.replace(&["IMAP4rev1".into()]);
        assert_eq!(
            decide_next_step(&after, true, true).unwrap(),
            ConnectStep::Login
        );
    }

    #[test]
    fn no_starttls_and_logindisabled_fails() {
        let mut caps = CapabilitySet::new();
        caps.replace(&["IMAP4rev1".into(), "LOGINDISABLED".into()]);
        let err = decide_next_step(&caps, false, false).unwrap_err();
        assert_eq!(err.code(), ErrorCode::ImapAuthenticationFailed);
    }

    #[test]
    fn stale_capabilities_are_refetched() {
        let mut caps = CapabilitySet::new();
        caps.replace(&["IMAP4rev1".into()]);
        caps.invalidate();
        assert_eq!(
            decide_next_step(&caps, true, false).unwrap(),
            ConnectStep::NeedCapability
        );
    }
}
