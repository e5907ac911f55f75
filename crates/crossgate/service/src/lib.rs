//! Crossgate Service - the unified protocol entry point
//!
//! The service wires the authorization gate, vehicle registry, admission
//! controller, and operation ledger together and funnels every mutating call
//! through one serialization point, so operations commit as atomic, totally
//! ordered transactions and the receipt order on the ledger matches the
//! commit order.
//!
//! There is no push channel. Agents write a request, wait for it to return,
//! then poll `get_vehicle_state` to observe the decision. The service is
//! correct under arbitrarily spaced polling, including polling that stops
//! entirely: an occupant that goes silent past the occupancy timeout is
//! force-cleared.

#![deny(unsafe_code)]

use std::sync::{Arc, Mutex};

use crossgate_admission::{AdmissionController, Occupancy, DEFAULT_OCCUPANCY_TIMEOUT_SECS};
use crossgate_authority::AuthorityGate;
use crossgate_ledger::{LedgerError, OpLedger, Receipt};
use crossgate_registry::VehicleRegistry;
use crossgate_types::{
    AgentId, CrossgateError, Decision, Event, IntersectionId, VehicleId, VehicleView,
};
use serde::Deserialize;
use thiserror::Error;

/// Deployment configuration for a crossgate instance.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Administrator identity allowed to change the delegate mapping.
    pub admin: AgentId,
    /// Identity the admission controller presents for restricted status
    /// transitions; authorized through the gate at construction.
    pub delegate: AgentId,
    /// Pre-provisioned intersections.
    pub intersections: Vec<IntersectionId>,
    /// Occupancy timeout in seconds.
    pub occupancy_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            admin: AgentId::new("crossgate-admin"),
            delegate: AgentId::new("admission-controller"),
            intersections: vec![IntersectionId(0)],
            occupancy_timeout_secs: DEFAULT_OCCUPANCY_TIMEOUT_SECS as u64,
        }
    }
}

/// The coordination service agents and observers talk to.
pub struct CrossgateService {
    gate: Arc<AuthorityGate>,
    registry: Arc<VehicleRegistry>,
    controller: AdmissionController,
    ledger: OpLedger,
    // One writer at a time: every mutating entry point serializes here.
    write_lock: Mutex<()>,
}

impl CrossgateService {
    /// Build a service and perform the deployment-time wiring: the admission
    /// controller's delegate identity is authorized through the gate before
    /// any request can be processed. Re-running construction with the same
    /// config is safe.
    pub fn new(config: Config) -> Result<Self, ServiceError> {
        let gate = Arc::new(AuthorityGate::new(config.admin.clone()));
        let registry = Arc::new(VehicleRegistry::new(Arc::clone(&gate)));
        let controller = AdmissionController::new(
            Arc::clone(&registry),
            config.delegate.clone(),
            config.intersections.iter().copied(),
            chrono::Duration::seconds(config.occupancy_timeout_secs as i64),
        );
        let ledger = OpLedger::new();

        gate.set_authorized_caller(&config.admin, config.delegate.clone(), true)?;
        ledger.append(Event::DelegateChanged {
            delegate: config.delegate.clone(),
            allowed: true,
        })?;

        tracing::info!(
            admin = %config.admin,
            delegate = %config.delegate,
            intersections = config.intersections.len(),
            timeout_secs = config.occupancy_timeout_secs,
            "crossgate service ready"
        );

        Ok(Self {
            gate,
            registry,
            controller,
            ledger,
            write_lock: Mutex::new(()),
        })
    }

    // ============ Registry operations ============

    /// Mint a new vehicle token for `owner`. The creation event on the
    /// ledger is how external tooling discovers the new id.
    pub fn register_vehicle(
        &self,
        owner: AgentId,
        initial_location: impl Into<String>,
    ) -> Result<VehicleId, ServiceError> {
        let _guard = self.serialize()?;
        let token = self.registry.register(owner.clone(), initial_location)?;
        self.ledger.append(Event::VehicleRegistered {
            token_id: token,
            owner,
        })?;
        Ok(token)
    }

    /// Normal movement update from the owning agent.
    pub fn update_vehicle_state(
        &self,
        token: VehicleId,
        caller: &AgentId,
        location: impl Into<String>,
        speed: u64,
    ) -> Result<(), ServiceError> {
        let _guard = self.serialize()?;
        let location = location.into();
        self.registry
            .update_state(token, caller, location.clone(), speed)?;
        self.ledger.append(Event::StateUpdated {
            token_id: token,
            location,
            speed,
        })?;
        Ok(())
    }

    /// Snapshot read; this is the polling surface agents use to observe
    /// admission decisions.
    pub fn get_vehicle_state(&self, token: VehicleId) -> Result<VehicleView, ServiceError> {
        Ok(self.registry.get_state(token)?)
    }

    /// Owner probe. Fails with `UnknownVehicle` past the highest minted id,
    /// which is the documented enumeration termination contract.
    pub fn owner_of(&self, token: VehicleId) -> Result<AgentId, ServiceError> {
        Ok(self.registry.owner_of(token)?)
    }

    /// Explicit ownership transfer by the current owner.
    pub fn transfer_ownership(
        &self,
        token: VehicleId,
        caller: &AgentId,
        new_owner: AgentId,
    ) -> Result<(), ServiceError> {
        let _guard = self.serialize()?;
        let from = self.registry.owner_of(token)?;
        self.registry
            .transfer_ownership(token, caller, new_owner.clone())?;
        self.ledger.append(Event::OwnershipTransferred {
            token_id: token,
            from,
            to: new_owner,
        })?;
        Ok(())
    }

    // ============ Admission operations ============

    /// Arbitrate a crossing request. The decision is also observable by
    /// re-reading the vehicle's state: Granted leaves it Crossing, Denied
    /// parks it Waiting. A Denied answer is terminal for this request; the
    /// agent re-requests to try again.
    pub fn request_to_cross(
        &self,
        token: VehicleId,
        intersection: IntersectionId,
    ) -> Result<Decision, ServiceError> {
        let _guard = self.serialize()?;
        let outcome = self.controller.request_to_cross(token, intersection)?;

        if let Some(evicted) = outcome.evicted {
            self.ledger.append(Event::SlotReleased {
                token_id: evicted,
                intersection,
                forced: true,
            })?;
        }
        self.ledger.append(Event::CrossingRequested {
            token_id: token,
            intersection,
            decision: outcome.decision,
        })?;

        Ok(outcome.decision)
    }

    /// Clean release of a held slot by the occupant's agent.
    pub fn release(
        &self,
        token: VehicleId,
        intersection: IntersectionId,
        caller: &AgentId,
    ) -> Result<(), ServiceError> {
        let _guard = self.serialize()?;
        self.controller.release(token, intersection, caller)?;
        self.ledger.append(Event::SlotReleased {
            token_id: token,
            intersection,
            forced: false,
        })?;
        Ok(())
    }

    /// Force-clear every slot whose occupant went silent past the timeout.
    /// Each forced release is receipted distinctly from a clean one.
    pub fn sweep_expired(&self) -> Result<Vec<(IntersectionId, VehicleId)>, ServiceError> {
        let _guard = self.serialize()?;
        let cleared = self.controller.sweep_expired()?;
        for &(intersection, token) in &cleared {
            self.ledger.append(Event::SlotReleased {
                token_id: token,
                intersection,
                forced: true,
            })?;
        }
        Ok(cleared)
    }

    /// Current occupancy of an intersection.
    pub fn occupant_of(
        &self,
        intersection: IntersectionId,
    ) -> Result<Option<Occupancy>, ServiceError> {
        Ok(self.controller.occupant_of(intersection)?)
    }

    /// Provisioned intersections.
    pub fn intersections(&self) -> Result<Vec<IntersectionId>, ServiceError> {
        Ok(self.controller.intersections()?)
    }

    // ============ Administration ============

    /// Grant or revoke a delegate's access to restricted entry points.
    /// Administrator-only; idempotent; takes effect on the next call.
    pub fn set_authorized_caller(
        &self,
        caller: &AgentId,
        delegate: AgentId,
        allowed: bool,
    ) -> Result<(), ServiceError> {
        let _guard = self.serialize()?;
        self.gate
            .set_authorized_caller(caller, delegate.clone(), allowed)?;
        self.ledger
            .append(Event::DelegateChanged { delegate, allowed })?;
        Ok(())
    }

    // ============ Ledger reads ============

    /// All operation receipts in commit order.
    pub fn events(&self) -> Result<Vec<Receipt>, ServiceError> {
        Ok(self.ledger.read_all()?)
    }

    /// Receipts from a sequence cursor, for resuming pollers.
    pub fn events_from(&self, from_seq: u64) -> Result<Vec<Receipt>, ServiceError> {
        Ok(self.ledger.read_from(from_seq)?)
    }

    /// Verify the ledger's hash chain end to end.
    pub fn verify_ledger(&self) -> Result<(), ServiceError> {
        Ok(self.ledger.validate()?)
    }

    // ============ Component access ============

    pub fn gate(&self) -> &AuthorityGate {
        &self.gate
    }

    pub fn registry(&self) -> &VehicleRegistry {
        &self.registry
    }

    pub fn controller(&self) -> &AdmissionController {
        &self.controller
    }

    pub fn ledger(&self) -> &OpLedger {
        &self.ledger
    }

    fn serialize(&self) -> Result<std::sync::MutexGuard<'_, ()>, ServiceError> {
        self.write_lock
            .lock()
            .map_err(|_| ServiceError::Protocol(CrossgateError::LockPoisoned))
    }
}

/// Service-level errors: the protocol taxonomy plus ledger failures.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Protocol(#[from] CrossgateError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}
