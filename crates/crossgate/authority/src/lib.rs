//! Crossgate Authority - the authorization gate for restricted entry points
//!
//! Status transitions into and out of Crossing must originate from a trusted
//! coordination path, not from an arbitrary caller forging a grant. The gate
//! holds the mapping from caller identity to "may invoke restricted entry
//! points" and is re-checked at call time on every restricted mutation, so a
//! revocation takes effect on the very next call.

#![deny(unsafe_code)]

use std::collections::HashSet;
use std::sync::RwLock;

use crossgate_types::{AgentId, CrossgateError};

/// Authorization gate guarding restricted registry mutations.
///
/// Exactly one delegate (the admission controller) should be authorized in
/// steady state. Multiple delegates are permitted but widen the trust
/// boundary and must be a deliberate operational choice.
pub struct AuthorityGate {
    admin: AgentId,
    delegates: RwLock<HashSet<AgentId>>,
}

impl AuthorityGate {
    /// Create a gate administered by `admin`. No delegate is authorized yet.
    pub fn new(admin: AgentId) -> Self {
        Self {
            admin,
            delegates: RwLock::new(HashSet::new()),
        }
    }

    /// Grant or revoke a delegate's access to restricted entry points.
    ///
    /// Administrator-only. Idempotent: re-asserting the current mapping
    /// succeeds without effect, which lets deployment wiring be re-run safely.
    pub fn set_authorized_caller(
        &self,
        caller: &AgentId,
        delegate: AgentId,
        allowed: bool,
    ) -> Result<(), CrossgateError> {
        if *caller != self.admin {
            return Err(CrossgateError::Unauthorized(caller.clone()));
        }

        let mut delegates = self
            .delegates
            .write()
            .map_err(|_| CrossgateError::LockPoisoned)?;

        let changed = if allowed {
            delegates.insert(delegate.clone())
        } else {
            delegates.remove(&delegate)
        };

        if changed {
            tracing::info!(%delegate, allowed, "authorized caller mapping updated");
        }

        Ok(())
    }

    /// Whether `identity` may invoke restricted entry points right now.
    /// Consulted at call time on every restricted mutation, never cached.
    pub fn is_authorized(&self, identity: &AgentId) -> bool {
        self.delegates
            .read()
            .map(|delegates| delegates.contains(identity))
            .unwrap_or(false)
    }

    /// The administrator identity this gate was created with.
    pub fn admin(&self) -> &AgentId {
        &self.admin
    }

    /// Currently authorized delegates, in a stable order.
    pub fn delegates(&self) -> Result<Vec<AgentId>, CrossgateError> {
        let delegates = self
            .delegates
            .read()
            .map_err(|_| CrossgateError::LockPoisoned)?;
        let mut list: Vec<_> = delegates.iter().cloned().collect();
        list.sort();
        Ok(list)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate() -> AuthorityGate {
        AuthorityGate::new(AgentId::new("admin"))
    }

    #[test]
    fn only_admin_may_change_the_mapping() {
        let gate = gate();
        let err = gate
            .set_authorized_caller(
                &AgentId::new("mallory"),
                AgentId::new("controller"),
                true,
            )
            .unwrap_err();
        assert_eq!(err, CrossgateError::Unauthorized(AgentId::new("mallory")));
        assert!(!gate.is_authorized(&AgentId::new("controller")));
    }

    #[test]
    fn grant_is_idempotent_and_revocation_is_immediate() {
        let gate = gate();
        let admin = AgentId::new("admin");
        let controller = AgentId::new("controller");

        gate.set_authorized_caller(&admin, controller.clone(), true)
            .unwrap();
        gate.set_authorized_caller(&admin, controller.clone(), true)
            .unwrap();
        assert!(gate.is_authorized(&controller));
        assert_eq!(gate.delegates().unwrap(), vec![controller.clone()]);

        gate.set_authorized_caller(&admin, controller.clone(), false)
            .unwrap();
        assert!(!gate.is_authorized(&controller));
        assert!(gate.delegates().unwrap().is_empty());
    }
}
