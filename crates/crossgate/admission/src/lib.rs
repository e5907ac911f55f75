//! Crossgate Admission - the intersection mutual-exclusion decision engine
//!
//! The controller owns each intersection's crossing slot and is the only
//! component permitted to move a vehicle into or out of Crossing. All
//! read-then-write sequences on occupancy happen under one write lock, the
//! explicit mutual-exclusion primitive behind the protocol's safety
//! invariant.
//!
//! There is no admission queue and no fairness guarantee: a denied vehicle
//! re-requests on its own cadence. A crashed occupant cannot wedge an
//! intersection - occupancy that is not reconfirmed within the timeout window
//! is force-cleared, and that forced release is logged distinctly from a
//! clean one.

#![deny(unsafe_code)]

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use crossgate_registry::VehicleRegistry;
use crossgate_types::{AgentId, CrossgateError, Decision, IntersectionId, VehicleId, VehicleStatus};

/// Default bound on how long an occupant may hold a slot without
/// reconfirming. Agents poll every 2-4 seconds, so 30 seconds of silence
/// means the occupant is gone, not slow.
pub const DEFAULT_OCCUPANCY_TIMEOUT_SECS: i64 = 30;

/// A held crossing slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Occupancy {
    pub occupant: VehicleId,
    pub granted_at: DateTime<Utc>,
    /// Advanced on every idempotent re-grant; drives timeout expiry.
    pub last_confirmed_at: DateTime<Utc>,
}

/// Outcome of one crossing request. `evicted` reports an expired previous
/// occupant that was force-cleared while handling this request, so the caller
/// can record the forced release separately from the decision.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RequestOutcome {
    pub decision: Decision,
    pub evicted: Option<VehicleId>,
}

/// Per-intersection admission controller.
pub struct AdmissionController {
    registry: Arc<VehicleRegistry>,
    delegate: AgentId,
    occupancy_timeout: chrono::Duration,
    slots: RwLock<HashMap<IntersectionId, Option<Occupancy>>>,
}

impl AdmissionController {
    /// Create a controller arbitrating the given pre-provisioned
    /// intersections. `delegate` is the identity the controller presents to
    /// the registry for restricted status transitions; it must be authorized
    /// through the gate before any request can be granted.
    pub fn new(
        registry: Arc<VehicleRegistry>,
        delegate: AgentId,
        intersections: impl IntoIterator<Item = IntersectionId>,
        occupancy_timeout: chrono::Duration,
    ) -> Self {
        let slots = intersections.into_iter().map(|id| (id, None)).collect();
        Self {
            registry,
            delegate,
            occupancy_timeout,
            slots: RwLock::new(slots),
        }
    }

    /// Arbitrate a crossing request. See [`Self::request_to_cross_at`].
    pub fn request_to_cross(
        &self,
        token: VehicleId,
        intersection: IntersectionId,
    ) -> Result<RequestOutcome, CrossgateError> {
        self.request_to_cross_at(token, intersection, Utc::now())
    }

    /// Arbitrate a crossing request as of `now`.
    ///
    /// Empty slot: occupy it, move the vehicle to Crossing, Granted. Slot
    /// already held by the requester: idempotent Granted that also counts as
    /// the occupant's reconfirmation. Held by someone else: Denied, and the
    /// requester is parked at Waiting if it was Moving. An expired occupant
    /// is force-cleared before the request is evaluated.
    pub fn request_to_cross_at(
        &self,
        token: VehicleId,
        intersection: IntersectionId,
        now: DateTime<Utc>,
    ) -> Result<RequestOutcome, CrossgateError> {
        let mut slots = self.write_slots()?;
        let slot = slots
            .get_mut(&intersection)
            .ok_or(CrossgateError::UnknownIntersection(intersection))?;

        let requester = self.registry.get_state(token)?;

        let mut evicted = None;
        if let Some(occupancy) = *slot {
            if self.is_expired(&occupancy, now) {
                self.registry
                    .set_status(occupancy.occupant, &self.delegate, VehicleStatus::Moving)?;
                *slot = None;
                evicted = Some(occupancy.occupant);
                tracing::warn!(
                    occupant = %occupancy.occupant,
                    %intersection,
                    last_confirmed_at = %occupancy.last_confirmed_at,
                    "occupancy timed out; slot force-cleared"
                );
            }
        }

        match *slot {
            None => {
                self.registry
                    .set_status(token, &self.delegate, VehicleStatus::Crossing)?;
                *slot = Some(Occupancy {
                    occupant: token,
                    granted_at: now,
                    last_confirmed_at: now,
                });
                tracing::info!(%token, %intersection, "crossing granted");
                Ok(RequestOutcome {
                    decision: Decision::Granted,
                    evicted,
                })
            }
            Some(ref mut occupancy) if occupancy.occupant == token => {
                // Duplicate request from a polling agent that has not yet
                // observed its own grant; also the reconfirmation signal.
                occupancy.last_confirmed_at = now;
                Ok(RequestOutcome {
                    decision: Decision::Granted,
                    evicted,
                })
            }
            Some(_) => {
                // The controller owns the Waiting transition, but never
                // downgrades a vehicle that is mid-crossing elsewhere.
                if requester.status == VehicleStatus::Moving {
                    self.registry
                        .set_status(token, &self.delegate, VehicleStatus::Waiting)?;
                }
                tracing::info!(%token, %intersection, "crossing denied; slot occupied");
                Ok(RequestOutcome {
                    decision: Decision::Denied,
                    evicted,
                })
            }
        }
    }

    /// Clean release by the occupant's agent: clears the slot and returns the
    /// vehicle to Moving. The caller must be the vehicle's recorded owner and
    /// the vehicle must actually hold the slot.
    pub fn release(
        &self,
        token: VehicleId,
        intersection: IntersectionId,
        caller: &AgentId,
    ) -> Result<(), CrossgateError> {
        let mut slots = self.write_slots()?;
        let slot = slots
            .get_mut(&intersection)
            .ok_or(CrossgateError::UnknownIntersection(intersection))?;

        let owner = self.registry.owner_of(token)?;
        if owner != *caller {
            return Err(CrossgateError::NotOwner {
                token,
                caller: caller.clone(),
            });
        }

        match *slot {
            Some(occupancy) if occupancy.occupant == token => {
                self.registry
                    .set_status(token, &self.delegate, VehicleStatus::Moving)?;
                *slot = None;
                tracing::info!(%token, %intersection, "slot released");
                Ok(())
            }
            _ => Err(CrossgateError::NotOccupant {
                token,
                intersection,
            }),
        }
    }

    /// Force-clear every expired slot. See [`Self::sweep_expired_at`].
    pub fn sweep_expired(&self) -> Result<Vec<(IntersectionId, VehicleId)>, CrossgateError> {
        self.sweep_expired_at(Utc::now())
    }

    /// Force-clear every slot whose occupant has not reconfirmed within the
    /// timeout window as of `now`, returning the cleared pairs. Each evicted
    /// vehicle is reset to Moving.
    pub fn sweep_expired_at(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<(IntersectionId, VehicleId)>, CrossgateError> {
        let mut slots = self.write_slots()?;
        let mut cleared = Vec::new();

        for (&intersection, slot) in slots.iter_mut() {
            if let Some(occupancy) = *slot {
                if self.is_expired(&occupancy, now) {
                    self.registry.set_status(
                        occupancy.occupant,
                        &self.delegate,
                        VehicleStatus::Moving,
                    )?;
                    *slot = None;
                    tracing::warn!(
                        occupant = %occupancy.occupant,
                        %intersection,
                        "occupancy timed out; slot force-cleared"
                    );
                    cleared.push((intersection, occupancy.occupant));
                }
            }
        }

        cleared.sort_by_key(|(intersection, _)| *intersection);
        Ok(cleared)
    }

    /// Current occupancy of an intersection, if any.
    pub fn occupant_of(
        &self,
        intersection: IntersectionId,
    ) -> Result<Option<Occupancy>, CrossgateError> {
        let slots = self.read_slots()?;
        slots
            .get(&intersection)
            .copied()
            .ok_or(CrossgateError::UnknownIntersection(intersection))
    }

    /// Provisioned intersections, in a stable order.
    pub fn intersections(&self) -> Result<Vec<IntersectionId>, CrossgateError> {
        let slots = self.read_slots()?;
        let mut ids: Vec<_> = slots.keys().copied().collect();
        ids.sort();
        Ok(ids)
    }

    /// The delegate identity this controller presents to the registry.
    pub fn delegate(&self) -> &AgentId {
        &self.delegate
    }

    fn is_expired(&self, occupancy: &Occupancy, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(occupancy.last_confirmed_at) > self.occupancy_timeout
    }

    fn read_slots(
        &self,
    ) -> Result<std::sync::RwLockReadGuard<'_, HashMap<IntersectionId, Option<Occupancy>>>, CrossgateError>
    {
        self.slots.read().map_err(|_| CrossgateError::LockPoisoned)
    }

    fn write_slots(
        &self,
    ) -> Result<std::sync::RwLockWriteGuard<'_, HashMap<IntersectionId, Option<Occupancy>>>, CrossgateError>
    {
        self.slots.write().map_err(|_| CrossgateError::LockPoisoned)
    }
}
