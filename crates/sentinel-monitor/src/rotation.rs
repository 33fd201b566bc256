// SIGNING KEY ROTATION
// Two-phase controller moving the witness to the next configured key
//
// SAFETY INVARIANTS:
// 1. At most one rotation is in flight; requests while Rotating are refused, not queued
// 2. The next key is always (current + 1) mod len
// 3. A broadcast failure is retried exactly once before giving up
// 4. The phase returns to Active when the ticket is dropped, whatever the outcome
// 5. The private key is handed to the chain client and nowhere else
// 6. The session is re-established before the retry, a transport failure drops it

use log::{info, warn};
use parking_lot::Mutex;
use sentinel_chain::ChainClient;
use sentinel_core::{ChainError, SigningSecret, WitnessInfo};
use serde::{Deserialize, Serialize};
use std::future::Future;

/// Initial broadcast plus one retry.
pub const ROTATION_ATTEMPTS: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RotationPhase {
    Active,
    Rotating { target_index: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationTrigger {
    /// The missed-block window crossed the threshold
    MissedBlocks { window_missed: u64 },
    /// Operator asked for it
    Forced,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RotationOutcome {
    Rotated { key: String, index: usize },
    Failed { key: String, reason: String },
    /// Fewer than two signing keys configured
    Unavailable,
    AlreadyInProgress,
}

impl RotationOutcome {
    pub fn is_rotated(&self) -> bool {
        matches!(self, RotationOutcome::Rotated { .. })
    }
}

pub fn next_key_index(current: usize, key_count: usize) -> usize {
    if key_count == 0 {
        0
    } else {
        (current + 1) % key_count
    }
}

#[derive(Debug)]
pub struct RotationController {
    phase: Mutex<RotationPhase>,
}

impl Default for RotationController {
    fn default() -> Self {
        Self::new()
    }
}

impl RotationController {
    pub fn new() -> Self {
        RotationController {
            phase: Mutex::new(RotationPhase::Active),
        }
    }

    pub fn phase(&self) -> RotationPhase {
        *self.phase.lock()
    }

    pub fn is_rotating(&self) -> bool {
        matches!(self.phase(), RotationPhase::Rotating { .. })
    }

    /// Move to Rotating, or None if a rotation already holds the phase.
    pub fn try_begin(&self, target_index: usize) -> Option<RotationTicket<'_>> {
        let mut phase = self.phase.lock();
        if let RotationPhase::Rotating { .. } = *phase {
            return None;
        }
        *phase = RotationPhase::Rotating { target_index };
        Some(RotationTicket {
            controller: self,
            target_index,
        })
    }
}

/// Exclusive right to rotate; dropping it returns the controller to Active.
#[derive(Debug)]
pub struct RotationTicket<'a> {
    controller: &'a RotationController,
    target_index: usize,
}

impl RotationTicket<'_> {
    pub fn target_index(&self) -> usize {
        self.target_index
    }

    /// Broadcast the witness_update, retrying once on failure.
    /// `reconnect` runs before the retry so it reaches a live session.
    pub async fn submit<R, Fut>(
        &self,
        chain: &dyn ChainClient,
        witness: &WitnessInfo,
        new_key: &str,
        private_key: &SigningSecret,
        reconnect: R,
    ) -> RotationOutcome
    where
        R: Fn() -> Fut,
        Fut: Future<Output = Result<(), ChainError>>,
    {
        let mut last_error: Option<ChainError> = None;
        for attempt in 1..=ROTATION_ATTEMPTS {
            if attempt > 1 {
                if let Err(e) = reconnect().await {
                    warn!("Unable to reconnect before signing key update attempt {}: {}", attempt, e);
                    last_error = Some(e);
                    continue;
                }
            }
            match chain.broadcast_key_update(witness, new_key, private_key).await {
                Ok(()) => {
                    info!(
                        "Witness {} now signs with key #{} ({})",
                        witness.witness_id, self.target_index, new_key
                    );
                    return RotationOutcome::Rotated {
                        key: new_key.to_string(),
                        index: self.target_index,
                    };
                }
                Err(e) => {
                    warn!("Signing key update attempt {}/{} failed: {}", attempt, ROTATION_ATTEMPTS, e);
                    last_error = Some(e);
                }
            }
        }

        RotationOutcome::Failed {
            key: new_key.to_string(),
            reason: last_error.map(|e| e.to_string()).unwrap_or_default(),
        }
    }
}

impl Drop for RotationTicket<'_> {
    fn drop(&mut self) {
        *self.controller.phase.lock() = RotationPhase::Active;
    }
}
