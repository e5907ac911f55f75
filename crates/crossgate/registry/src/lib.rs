//! Crossgate Registry - authoritative vehicle identity and state records
//!
//! The registry mints permanent token ids and holds each vehicle's
//! agent-writable fields (location, speed) alongside its status. Status is
//! jointly owned: agents never write it directly here - the only path into or
//! out of Crossing is `set_status`, which the authorization gate restricts to
//! the admission controller's delegate identity.

#![deny(unsafe_code)]

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crossgate_authority::AuthorityGate;
use crossgate_types::{
    AgentId, CrossgateError, VehicleId, VehicleRecord, VehicleStatus, VehicleView,
};

/// Identity and state registry for vehicle tokens.
pub struct VehicleRegistry {
    gate: Arc<AuthorityGate>,
    inner: RwLock<RegistryState>,
}

#[derive(Default)]
struct RegistryState {
    vehicles: HashMap<VehicleId, VehicleRecord>,
    next_token: u64,
}

impl VehicleRegistry {
    /// Create an empty registry whose restricted mutations are guarded by
    /// `gate`. Token ids start at 1.
    pub fn new(gate: Arc<AuthorityGate>) -> Self {
        Self {
            gate,
            inner: RwLock::new(RegistryState {
                vehicles: HashMap::new(),
                next_token: 1,
            }),
        }
    }

    /// Mint a new vehicle token owned by `owner`, starting at status Moving.
    ///
    /// Fails with `DuplicateOrInvalidOwner` when the owner identity is
    /// malformed (empty or the zero address). Tokens are permanent identity
    /// records; ids are never reused.
    pub fn register(
        &self,
        owner: AgentId,
        initial_location: impl Into<String>,
    ) -> Result<VehicleId, CrossgateError> {
        if !owner.is_wellformed() {
            return Err(CrossgateError::DuplicateOrInvalidOwner(owner.0));
        }

        let mut state = self.write_state()?;
        let token = VehicleId(state.next_token);
        state.next_token += 1;

        state.vehicles.insert(
            token,
            VehicleRecord {
                owner: owner.clone(),
                location: initial_location.into(),
                speed: 0,
                status: VehicleStatus::Moving,
                last_updated_at: chrono::Utc::now(),
            },
        );

        tracing::info!(%token, %owner, "vehicle registered");
        Ok(token)
    }

    /// Normal movement update from the owning agent. Leaves status untouched.
    pub fn update_state(
        &self,
        token: VehicleId,
        caller: &AgentId,
        location: impl Into<String>,
        speed: u64,
    ) -> Result<(), CrossgateError> {
        let mut state = self.write_state()?;
        let record = state
            .vehicles
            .get_mut(&token)
            .ok_or(CrossgateError::UnknownVehicle(token))?;

        if record.owner != *caller {
            return Err(CrossgateError::NotOwner {
                token,
                caller: caller.clone(),
            });
        }

        record.location = location.into();
        record.speed = speed;
        record.last_updated_at = chrono::Utc::now();
        Ok(())
    }

    /// Snapshot of a vehicle's externally visible state.
    pub fn get_state(&self, token: VehicleId) -> Result<VehicleView, CrossgateError> {
        let state = self.read_state()?;
        let record = state
            .vehicles
            .get(&token)
            .ok_or(CrossgateError::UnknownVehicle(token))?;

        Ok(VehicleView {
            token_id: token,
            owner: record.owner.clone(),
            location: record.location.clone(),
            speed: record.speed,
            status: record.status,
            last_updated_at: record.last_updated_at,
        })
    }

    /// Restricted status transition. The gate is consulted at call time, so
    /// a revoked delegate fails `Unauthorized` on its very next call.
    pub fn set_status(
        &self,
        token: VehicleId,
        caller: &AgentId,
        status: VehicleStatus,
    ) -> Result<(), CrossgateError> {
        if !self.gate.is_authorized(caller) {
            return Err(CrossgateError::Unauthorized(caller.clone()));
        }

        let mut state = self.write_state()?;
        let record = state
            .vehicles
            .get_mut(&token)
            .ok_or(CrossgateError::UnknownVehicle(token))?;

        record.status = status;
        record.last_updated_at = chrono::Utc::now();
        Ok(())
    }

    /// Owner lookup. Failing on a never-minted id is the load-bearing
    /// termination contract for external enumerators, which probe
    /// token id 1, 2, 3, ... until the first `UnknownVehicle`.
    pub fn owner_of(&self, token: VehicleId) -> Result<AgentId, CrossgateError> {
        let state = self.read_state()?;
        state
            .vehicles
            .get(&token)
            .map(|record| record.owner.clone())
            .ok_or(CrossgateError::UnknownVehicle(token))
    }

    /// Explicit ownership transfer - the only path that reassigns `owner`.
    pub fn transfer_ownership(
        &self,
        token: VehicleId,
        caller: &AgentId,
        new_owner: AgentId,
    ) -> Result<(), CrossgateError> {
        if !new_owner.is_wellformed() {
            return Err(CrossgateError::DuplicateOrInvalidOwner(new_owner.0));
        }

        let mut state = self.write_state()?;
        let record = state
            .vehicles
            .get_mut(&token)
            .ok_or(CrossgateError::UnknownVehicle(token))?;

        if record.owner != *caller {
            return Err(CrossgateError::NotOwner {
                token,
                caller: caller.clone(),
            });
        }

        tracing::info!(%token, from = %record.owner, to = %new_owner, "ownership transferred");
        record.owner = new_owner;
        record.last_updated_at = chrono::Utc::now();
        Ok(())
    }

    /// Number of minted vehicle tokens.
    pub fn vehicle_count(&self) -> Result<usize, CrossgateError> {
        Ok(self.read_state()?.vehicles.len())
    }

    fn read_state(&self) -> Result<std::sync::RwLockReadGuard<'_, RegistryState>, CrossgateError> {
        self.inner.read().map_err(|_| CrossgateError::LockPoisoned)
    }

    fn write_state(
        &self,
    ) -> Result<std::sync::RwLockWriteGuard<'_, RegistryState>, CrossgateError> {
        self.inner.write().map_err(|_| CrossgateError::LockPoisoned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry_with_delegate() -> (VehicleRegistry, AgentId, AgentId) {
        let admin = AgentId::new("admin");
        let delegate = AgentId::new("admission-controller");
        let gate = Arc::new(AuthorityGate::new(admin.clone()));
        gate.set_authorized_caller(&admin, delegate.clone(), true)
            .unwrap();
        (VehicleRegistry::new(gate), admin, delegate)
    }

    #[test]
    fn register_mints_sequential_tokens_starting_at_one() {
        let (registry, _, _) = registry_with_delegate();
        let a = registry
            .register(AgentId::new("0xAA"), "34.0570,-118.2500")
            .unwrap();
        let b = registry
            .register(AgentId::new("0xBB"), "34.0555,-118.2515")
            .unwrap();
        assert_eq!(a, VehicleId(1));
        assert_eq!(b, VehicleId(2));
        assert_eq!(
            registry.get_state(a).unwrap().status,
            VehicleStatus::Moving
        );
    }

    #[test]
    fn malformed_owner_is_rejected() {
        let (registry, _, _) = registry_with_delegate();
        let err = registry.register(AgentId::new("0x0"), "0,0").unwrap_err();
        assert!(matches!(err, CrossgateError::DuplicateOrInvalidOwner(_)));
        assert_eq!(registry.vehicle_count().unwrap(), 0);
    }

    #[test]
    fn update_state_from_non_owner_changes_nothing() {
        let (registry, _, _) = registry_with_delegate();
        let token = registry
            .register(AgentId::new("0xAA"), "34.0570,-118.2500")
            .unwrap();

        let err = registry
            .update_state(token, &AgentId::new("0xBB"), "0,0", 120)
            .unwrap_err();
        assert!(matches!(err, CrossgateError::NotOwner { .. }));

        let view = registry.get_state(token).unwrap();
        assert_eq!(view.location, "34.0570,-118.2500");
        assert_eq!(view.speed, 0);
        assert_eq!(view.status, VehicleStatus::Moving);
    }

    #[test]
    fn owner_probe_fails_exactly_past_the_highest_minted_id() {
        let (registry, _, _) = registry_with_delegate();
        for i in 0..3u64 {
            registry
                .register(AgentId::new(format!("0xA{i}")), "0,0")
                .unwrap();
        }
        for k in 1..=3 {
            assert!(registry.owner_of(VehicleId(k)).is_ok());
        }
        assert_eq!(
            registry.owner_of(VehicleId(4)).unwrap_err(),
            CrossgateError::UnknownVehicle(VehicleId(4))
        );
    }

    #[test]
    fn set_status_requires_a_live_delegate_grant() {
        let admin = AgentId::new("admin");
        let delegate = AgentId::new("admission-controller");
        let gate = Arc::new(AuthorityGate::new(admin.clone()));
        gate.set_authorized_caller(&admin, delegate.clone(), true)
            .unwrap();
        let registry = VehicleRegistry::new(Arc::clone(&gate));
        let token = registry.register(AgentId::new("0xAA"), "0,0").unwrap();

        registry
            .set_status(token, &delegate, VehicleStatus::Crossing)
            .unwrap();
        assert_eq!(
            registry.get_state(token).unwrap().status,
            VehicleStatus::Crossing
        );

        let err = registry
            .set_status(token, &AgentId::new("0xAA"), VehicleStatus::Moving)
            .unwrap_err();
        assert!(matches!(err, CrossgateError::Unauthorized(_)));

        // Revocation is observed on the delegate's very next call.
        gate.set_authorized_caller(&admin, delegate.clone(), false)
            .unwrap();
        let err = registry
            .set_status(token, &delegate, VehicleStatus::Moving)
            .unwrap_err();
        assert_eq!(err, CrossgateError::Unauthorized(delegate));
    }

    #[test]
    fn ownership_transfer_is_explicit_and_owner_only() {
        let (registry, _, _) = registry_with_delegate();
        let owner = AgentId::new("0xAA");
        let next = AgentId::new("0xBB");
        let token = registry.register(owner.clone(), "0,0").unwrap();

        let err = registry
            .transfer_ownership(token, &next, next.clone())
            .unwrap_err();
        assert!(matches!(err, CrossgateError::NotOwner { .. }));

        registry
            .transfer_ownership(token, &owner, next.clone())
            .unwrap();
        assert_eq!(registry.owner_of(token).unwrap(), next);
    }
}
