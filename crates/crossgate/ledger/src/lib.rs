//! Crossgate Ledger - tamper-evident record of protocol operations
//!
//! Every mutating operation that succeeds is appended here as a receipt.
//! Receipts are hash-chained: each carries the blake3 hash of its own
//! canonical encoding and the hash of its predecessor, so any later edit to a
//! stored receipt is detectable by `validate`. The ledger is append-only and
//! totally ordered; external tooling reads it to discover creation events and
//! to distinguish clean releases from timeout-forced ones.

#![deny(unsafe_code)]

use std::sync::RwLock;

use chrono::{DateTime, Utc};
use crossgate_types::Event;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Unique receipt identity.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReceiptId(pub String);

impl ReceiptId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

/// One appended operation record. `seq` starts at 1; `prev_hash` is `None`
/// only for the first receipt.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub receipt_id: ReceiptId,
    pub seq: u64,
    pub prev_hash: Option<[u8; 32]>,
    pub receipt_hash: [u8; 32],
    pub recorded_at: DateTime<Utc>,
    pub event: Event,
}

/// Append-only, hash-chained operation ledger.
pub struct OpLedger {
    inner: RwLock<Vec<Receipt>>,
}

impl OpLedger {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Vec::new()),
        }
    }

    /// Append an event, chaining it to the current head.
    pub fn append(&self, event: Event) -> Result<Receipt, LedgerError> {
        let mut receipts = self.inner.write().map_err(|_| LedgerError::LockPoisoned)?;

        let mut receipt = Receipt {
            receipt_id: ReceiptId::generate(),
            seq: (receipts.len() + 1) as u64,
            prev_hash: receipts.last().map(|prev| prev.receipt_hash),
            receipt_hash: [0; 32],
            recorded_at: Utc::now(),
            event,
        };
        receipt.receipt_hash = compute_receipt_hash(&receipt)?;

        receipts.push(receipt.clone());
        Ok(receipt)
    }

    /// The most recently appended receipt, if any.
    pub fn head(&self) -> Result<Option<Receipt>, LedgerError> {
        let receipts = self.inner.read().map_err(|_| LedgerError::LockPoisoned)?;
        Ok(receipts.last().cloned())
    }

    /// All receipts in append order.
    pub fn read_all(&self) -> Result<Vec<Receipt>, LedgerError> {
        let receipts = self.inner.read().map_err(|_| LedgerError::LockPoisoned)?;
        Ok(receipts.clone())
    }

    /// Receipts with `seq >= from_seq`, for pollers resuming from a cursor.
    pub fn read_from(&self, from_seq: u64) -> Result<Vec<Receipt>, LedgerError> {
        let receipts = self.inner.read().map_err(|_| LedgerError::LockPoisoned)?;
        let start = from_seq.saturating_sub(1) as usize;
        if start >= receipts.len() {
            return Ok(vec![]);
        }
        Ok(receipts[start..].to_vec())
    }

    pub fn len(&self) -> Result<usize, LedgerError> {
        let receipts = self.inner.read().map_err(|_| LedgerError::LockPoisoned)?;
        Ok(receipts.len())
    }

    pub fn is_empty(&self) -> Result<bool, LedgerError> {
        Ok(self.len()? == 0)
    }

    /// Verify sequence monotonicity, hash-chain linkage, and per-receipt
    /// hashes. Any tampering with a stored receipt surfaces here.
    pub fn validate(&self) -> Result<(), LedgerError> {
        let receipts = self.inner.read().map_err(|_| LedgerError::LockPoisoned)?;

        for (index, receipt) in receipts.iter().enumerate() {
            let expected_seq = (index + 1) as u64;
            if receipt.seq != expected_seq {
                return Err(LedgerError::IntegrityViolation {
                    seq: receipt.seq,
                    reason: format!("expected seq {}, found {}", expected_seq, receipt.seq),
                });
            }

            let expected_prev = if index == 0 {
                None
            } else {
                Some(receipts[index - 1].receipt_hash)
            };
            if receipt.prev_hash != expected_prev {
                return Err(LedgerError::IntegrityViolation {
                    seq: receipt.seq,
                    reason: "previous hash link mismatch".into(),
                });
            }

            if compute_receipt_hash(receipt)? != receipt.receipt_hash {
                return Err(LedgerError::IntegrityViolation {
                    seq: receipt.seq,
                    reason: "receipt hash mismatch".into(),
                });
            }
        }

        Ok(())
    }
}

impl Default for OpLedger {
    fn default() -> Self {
        Self::new()
    }
}

fn compute_receipt_hash(receipt: &Receipt) -> Result<[u8; 32], LedgerError> {
    let mut canonical = receipt.clone();
    canonical.receipt_hash = [0; 32];

    let encoded = serde_json::to_vec(&canonical)
        .map_err(|error| LedgerError::Serialization(error.to_string()))?;

    let mut hasher = blake3::Hasher::new();
    hasher.update(b"crossgate-receipt-v1:");
    hasher.update(&encoded);
    Ok(*hasher.finalize().as_bytes())
}

/// Errors raised by the operation ledger.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("ledger integrity violation at seq {seq}: {reason}")]
    IntegrityViolation { seq: u64, reason: String },

    #[error("ledger lock poisoned")]
    LockPoisoned,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossgate_types::{AgentId, Decision, IntersectionId, VehicleId};

    fn registered(id: u64) -> Event {
        Event::VehicleRegistered {
            token_id: VehicleId(id),
            owner: AgentId::new(format!("0xAA{id:02}")),
        }
    }

    #[test]
    fn appends_build_a_hash_chain() {
        let ledger = OpLedger::new();

        let first = ledger.append(registered(1)).unwrap();
        let second = ledger
            .append(Event::CrossingRequested {
                token_id: VehicleId(1),
                intersection: IntersectionId(0),
                decision: Decision::Granted,
            })
            .unwrap();

        assert_eq!(first.seq, 1);
        assert_eq!(first.prev_hash, None);
        assert_eq!(second.seq, 2);
        assert_eq!(second.prev_hash, Some(first.receipt_hash));
        ledger.validate().unwrap();
    }

    #[test]
    fn read_from_resumes_at_the_cursor() {
        let ledger = OpLedger::new();
        for id in 1..=4 {
            ledger.append(registered(id)).unwrap();
        }

        let tail = ledger.read_from(3).unwrap();
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].seq, 3);
        assert!(ledger.read_from(9).unwrap().is_empty());
        // seq 0 is below the first receipt; it reads everything.
        assert_eq!(ledger.read_from(0).unwrap().len(), 4);
    }

    #[test]
    fn tampering_with_a_stored_receipt_is_detected() {
        let ledger = OpLedger::new();
        ledger.append(registered(1)).unwrap();
        ledger.append(registered(2)).unwrap();

        {
            let mut receipts = ledger.inner.write().unwrap();
            receipts[0].event = registered(7);
        }

        let err = ledger.validate().unwrap_err();
        assert!(matches!(
            err,
            LedgerError::IntegrityViolation { seq: 1, ref reason } if reason == "receipt hash mismatch"
        ));
    }

    #[test]
    fn truncating_the_chain_link_is_detected() {
        let ledger = OpLedger::new();
        ledger.append(registered(1)).unwrap();
        ledger.append(registered(2)).unwrap();

        {
            let mut receipts = ledger.inner.write().unwrap();
            receipts.remove(0);
        }

        let err = ledger.validate().unwrap_err();
        assert!(matches!(err, LedgerError::IntegrityViolation { .. }));
    }
}
