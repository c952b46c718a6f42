// Copyright © 2026 mailbeam.dev
// Licensed under MailBeam License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

//! Connection establishment for the parser pool: greeting, optional
//! STARTTLS (gated on LOGINDISABLED and the configured encryption),
//! capability refresh and LOGIN, driven by the unauthenticated state
//! handler's decisions. The engine spawns one of these per new parser
//! and receives the outcome on its event loop.

use crate::modules::error::{code::ErrorCode, MailBeamResult};
use crate::modules::imap::capabilities::{check_capabilities, CapabilitySet};
use crate::modules::imap::command::{serialize, Command, TagGenerator};
use crate::modules::imap::response::{ImapResponse, RespCode, StatusKind};
use crate::modules::imap::session::SessionId;
use crate::modules::imap::transport::Transport;
use crate::modules::settings::{Encryption, ImapServerConfig};
use crate::modules::state::ConnectionState;
use crate::raise_error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// A connection that made it all the way to Authenticated.
#[derive(Debug)]
pub struct EstablishedConnection {
    pub transport: Transport,
    pub caps: CapabilitySet,
}

#[derive(Debug)]
pub struct ConnectOutcome {
    pub session: SessionId,
    pub result: MailBeamResult<EstablishedConnection>,
}

/// Read responses until the tagged completion for `tag`, feeding
/// capability updates into `caps`. Untagged chatter is tolerated;
/// anything fatal surfaces as an error.
async fn await_tagged_ok(
    transport: &mut Transport,
    caps: &mut CapabilitySet,
    tag: &str,
    failure_code: ErrorCode,
) -> MailBeamResult<(Option<RespCode>, Option<String>)> {
    loop {
        match transport.read_response().await? {
            ImapResponse::Done {
                tag: done_tag,
                status,
                code,
                information,
            } if done_tag == tag => {
                if let Some(RespCode::Capabilities(list)) = &code {
                    caps.replace(list);
                }
                if status == StatusKind::Ok {
                    return Ok((code, information));
                }
                return Err(raise_error!(
                    format!(
                        "command failed: {}",
                        information.as_deref().unwrap_or("no reason given")
                    ),
                    failure_code
                ));
            }
            ImapResponse::Capabilities(list) => caps.replace(&list),
            ImapResponse::Data {
                status: StatusKind::Bye,
                information,
                ..
            } => {
                return Err(raise_error!(
                    format!(
                        "server closed the connection: {}",
                        information.as_deref().unwrap_or("")
                    ),
                    ErrorCode::ConnectionClosed
                ));
            }
            ImapResponse::Data { code, .. } => {
                if let Some(RespCode::Capabilities(list)) = code {
                    caps.replace(&list);
                }
            }
            ImapResponse::Disconnected { reason } => {
                return Err(raise_error!(reason, ErrorCode::ConnectionClosed));
            }
            other => debug!("ignoring during connection setup: {other:?}"),
        }
    }
}

async fn submit_all(
    transport: &mut Transport,
    command: &Command,
    tag: &str,
) -> MailBeamResult<()> {
    // setup commands carry no synchronizing literals except LOGIN;
    // for those, wait for the continuation in line
    for chunk in serialize(command, tag, false) {
        let wait = chunk.wait_for_continuation;
        transport.send(&chunk).await?;
        if wait {
            loop {
                match transport.read_response().await? {
                    ImapResponse::Continue { .. } => break,
                    ImapResponse::Disconnected { reason } => {
                        return Err(raise_error!(reason, ErrorCode::ConnectionClosed));
                    }
                    other => debug!("ignoring while awaiting continuation: {other:?}"),
                }
            }
        }
    }
    Ok(())
}

/// The full greeting → STARTTLS → capability → LOGIN dance. Returns a
/// transport ready to be handed to the session actor in Authenticated
/// state.
pub async fn establish(config: &ImapServerConfig) -> MailBeamResult<EstablishedConnection> {
    let mut transport = Transport::connect(config).await?;
    let mut caps = CapabilitySet::new();
    let mut tags = TagGenerator::new();

    // the greeting decides where we start
    let state = match transport.read_response().await? {
        ImapResponse::Data {
            status,
            code,
            information,
        } => {
            if let Some(RespCode::Capabilities(list)) = &code {
                caps.replace(list);
            }
            match status {
                StatusKind::Ok => ConnectionState::NotAuthenticated,
                StatusKind::PreAuth => ConnectionState::Authenticated,
                StatusKind::Bye => {
                    return Err(raise_error!(
                        format!(
                            "server rejected the connection: {}",
                            information.as_deref().unwrap_or("")
                        ),
                        ErrorCode::ConnectionClosed
                    ));
                }
                _ => {
                    return Err(raise_error!(
                        "malformed greeting".into(),
                        ErrorCode::ProtocolViolation
                    ));
                }
            }
        }
        ImapResponse::Disconnected { reason } => {
            return Err(raise_error!(reason, ErrorCode::ConnectionClosed));
        }
        other => {
            return Err(raise_error!(
                format!("expected a greeting, got {other:?}"),
                ErrorCode::ProtocolViolation
            ));
        }
    };
    debug!("greeting processed, state {state:?}");

    let want_starttls = config.encryption == Encryption::StartTls;

    if state == ConnectionState::NotAuthenticated {
        use crate::modules::state::unauthenticated::{decide_next_step, ConnectStep};
        loop {
            match decide_next_step(&caps, transport.is_tls(), want_starttls)? {
                ConnectStep::NeedCapability => {
                    let tag = tags.next_tag();
                    submit_all(&mut transport, &Command::Capability, &tag).await?;
                    await_tagged_ok(&mut transport, &mut caps, &tag, ErrorCode::ImapCommandFailed)
                        .await?;
                    if !caps.is_known() {
                        return Err(raise_error!(
                            "server never disclosed its capabilities".into(),
                            ErrorCode::ProtocolViolation
                        ));
                    }
                    check_capabilities(&caps)?;
                }
                ConnectStep::StartTls => {
                    info!("issuing STARTTLS before authentication");
                    let tag = tags.next_tag();
                    submit_all(&mut transport, &Command::StartTls, &tag).await?;
                    await_tagged_ok(&mut transport, &mut caps, &tag, ErrorCode::TlsHandshakeFailed)
                        .await?;
                    transport.upgrade_tls().await?;
                    // everything learned in cleartext is suspect
                    caps.invalidate();
                }
                ConnectStep::Login => {
                    let tag = tags.next_tag();
                    submit_all(
                        &mut transport,
                        &Command::Login {
                            username: config.auth.username.clone(),
                            password: config.auth.password.clone(),
                        },
                        &tag,
                    )
                    .await?;
                    let (code, _) = await_tagged_ok(
                        &mut transport,
                        &mut caps,
                        &tag,
                        ErrorCode::ImapAuthenticationFailed,
                    )
                    .await?;
                    // LOGIN may change the capability set unless the
                    // tagged OK already carried the fresh one
                    if !matches!(code, Some(RespCode::Capabilities(_))) {
                        caps.invalidate();
                    }
                    break;
                }
            }
        }
    }

    if !caps.is_fresh() {
        let tag = tags.next_tag();
        submit_all(&mut transport, &Command::Capability, &tag).await?;
        await_tagged_ok(&mut transport, &mut caps, &tag, ErrorCode::ImapCommandFailed).await?;
    }
    check_capabilities(&caps)?;

    info!("IMAP connection established and authenticated");
    Ok(EstablishedConnection { transport, caps })
}

/// Fire-and-forget establishment; the outcome lands on the engine's
/// event loop.
pub fn spawn_connect(
    session: SessionId,
    config: ImapServerConfig,
    outcome_tx: mpsc::UnboundedSender<ConnectOutcome>,
) {
    tokio::spawn(async move {
        let result = establish(&config).await;
        if let Err(err) = &result {
            warn!(session, "connection attempt failed: {err}");
        }
        let _ = outcome_tx.send(ConnectOutcome { session, result });
    });
}
