// Copyright © 2026 mailbeam.dev
// Licensed under MailBeam License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

//! Capability set tracking and the extension checks the engine
//! negotiates by: STARTTLS, IDLE, LITERAL+, UIDPLUS, NAMESPACE, ID,
//! CATENATE, URLAUTH, BURL, CONDSTORE/QRESYNC.

use crate::modules::error::{code::ErrorCode, MailBeamResult};
use crate::raise_error;
use ahash::AHashSet;

#[derive(Clone, Debug, Default)]
pub struct CapabilitySet {
    caps: AHashSet<String>,
    /// Capabilities go stale after STARTTLS and after login; a fresh
    /// CAPABILITY round trip clears this.
    fresh: bool,
}

impl CapabilitySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn replace(&mut self, caps: &[String]) {
        self.caps = caps.iter().map(|c| c.to_ascii_uppercase()).collect();
        self.fresh = true;
    }

    pub fn invalidate(&mut self) {
        self.fresh = false;
    }

    pub fn is_fresh(&self) -> bool {
        self.fresh
    }

    pub fn is_known(&self) -> bool {
        !self.caps.is_empty()
    }

    pub fn has(&self, name: &str) -> bool {
        self.caps.contains(&name.to_ascii_uppercase())
    }

    pub fn starttls(&self) -> bool {
        self.has("STARTTLS")
    }

    pub fn login_disabled(&self) -> bool {
        self.has("LOGINDISABLED")
    }

    pub fn idle(&self) -> bool {
        self.has("IDLE")
    }

    pub fn literal_plus(&self) -> bool {
        self.has("LITERAL+")
    }

    pub fn uidplus(&self) -> bool {
        self.has("UIDPLUS")
    }

    pub fn catenate(&self) -> bool {
        self.has("CATENATE")
    }

    pub fn urlauth(&self) -> bool {
        self.has("URLAUTH")
    }

    pub fn burl(&self) -> bool {
        self.has("BURL") || self.caps.iter().any(|c| c.starts_with("BURL="))
    }

    pub fn condstore(&self) -> bool {
        self.has("CONDSTORE")
    }

    pub fn qresync(&self) -> bool {
        self.has("QRESYNC")
    }

    pub fn id(&self) -> bool {
        self.has("ID")
    }

    pub fn namespace(&self) -> bool {
        self.has("NAMESPACE")
    }
}

/// A server that cannot speak IMAP4rev1 is useless to this engine.
pub fn check_capabilities(caps: &CapabilitySet) -> MailBeamResult<()> {
    if !caps.has("IMAP4rev1") {
        return Err(raise_error!(
            "Server does not support IMAP4rev1".into(),
            ErrorCode::Incompatible
        ));
    }
    Ok(())
}
