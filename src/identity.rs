//! Seam to the external authentication collaborator.
//!
//! Tokens are assumed valid for the duration of a single flow; refresh and
//! expiry are the provider's concern.

use std::sync::RwLock;

/// The signed-in account as seen by the flows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub account_id: String,
    /// Bearer token for authenticated endpoints.
    pub id_token: String,
    /// Name announced when this device requests a pairing code.
    pub display_name: Option<String>,
}

impl Identity {
    pub fn new(account_id: impl Into<String>, id_token: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            id_token: id_token.into(),
            display_name: None,
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }
}

/// Supplies the current identity, if any.
///
/// Called at the start of every flow step, so a provider can sign in or out
/// between steps and the next step observes it.
pub trait IdentityProvider: Send + Sync {
    fn current(&self) -> Option<Identity>;
}

/// Identity holder the application updates on sign-in and sign-out.
#[derive(Debug, Default)]
pub struct SessionIdentity {
    inner: RwLock<Option<Identity>>,
}

impl SessionIdentity {
    pub fn new(identity: Option<Identity>) -> Self {
        Self {
            inner: RwLock::new(identity),
        }
    }

    pub fn sign_in(&self, identity: Identity) {
        *self.inner.write().unwrap_or_else(|e| e.into_inner()) = Some(identity);
    }

    pub fn sign_out(&self) {
        *self.inner.write().unwrap_or_else(|e| e.into_inner()) = None;
    }
}

impl IdentityProvider for SessionIdentity {
    fn current(&self) -> Option<Identity> {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).clone()
    }
}
