//! Per-user quota policy on top of the code store.
//!
//! The coordinator is the single decision point for "can this user claim,
//! and if so, give them a code". It only reads from the store and triggers
//! writes through [`CodeStore::claim_one`]; every store fault is converted
//! to [`ClaimOutcome::Fault`] here so handlers never see a raw error.

use crate::error::StoreError;
use crate::store::{ClaimAttempt, CodeStore};
use std::sync::Arc;
use tracing::{error, info};

/// What the presentation layer gets back for one claim request.
#[derive(Debug)]
pub enum ClaimOutcome {
    /// A code was allocated; show it to the requesting user once.
    Granted(String),
    /// The user already holds the maximum number of codes.
    QuotaExceeded,
    /// No codes left; nothing was allocated.
    Exhausted,
    /// Storage fault. The diagnostic is for server logs, not for the user.
    Fault(StoreError),
}

pub struct ClaimCoordinator {
    store: Arc<CodeStore>,
    max_claims_per_user: i64,
}

impl ClaimCoordinator {
    /// `max_claims_per_user <= 0` disables the quota check entirely.
    pub fn new(store: Arc<CodeStore>, max_claims_per_user: i64) -> Self {
        Self {
            store,
            max_claims_per_user,
        }
    }

    fn quota(&self) -> Option<u32> {
        // Positive values beyond u32::MAX clamp rather than disable; only
        // zero and negatives turn the check off.
        (self.max_claims_per_user > 0)
            .then(|| u32::try_from(self.max_claims_per_user).unwrap_or(u32::MAX))
    }

    /// Check the quota, then atomically claim one code.
    ///
    /// The read here is only a fast path that avoids opening a write
    /// transaction for a request that will be rejected; the store re-checks
    /// the quota inside the claim transaction, so two simultaneous requests
    /// from the same user cannot both pass.
    pub async fn request_claim(&self, user_id: &str) -> ClaimOutcome {
        if let Some(max) = self.quota() {
            match self.store.count_user_claims(user_id).await {
                Ok(count) if count >= i64::from(max) => {
                    return ClaimOutcome::QuotaExceeded;
                }
                Ok(_) => {}
                Err(diagnostic) => {
                    error!(user_id, %diagnostic, "Quota check failed");
                    return ClaimOutcome::Fault(diagnostic);
                }
            }
        }

        match self.store.claim_one(user_id, self.quota()).await {
            Ok(ClaimAttempt::Claimed(code)) => {
                info!(user_id, code, "Code claimed");
                ClaimOutcome::Granted(code)
            }
            Ok(ClaimAttempt::QuotaExceeded) => ClaimOutcome::QuotaExceeded,
            Ok(ClaimAttempt::Exhausted) => {
                info!(user_id, "Claim requested but no codes are available");
                ClaimOutcome::Exhausted
            }
            Err(diagnostic) => {
                error!(user_id, %diagnostic, "Claim transaction failed");
                ClaimOutcome::Fault(diagnostic)
            }
        }
    }
}
