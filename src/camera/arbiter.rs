//! Process-wide claims on capture devices.
//!
//! The front camera can be held by one view at a time. Claims are first come,
//! first served: a second view asking for a held camera is refused, never
//! handed the device by preempting the holder.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::types::LensFacing;
use crate::coordinator::ViewId;

/// Shared claim table. Cloning shares the same table.
#[derive(Debug, Clone, Default)]
pub struct DeviceArbiter {
    claims: Arc<Mutex<HashMap<LensFacing, ViewId>>>,
}

impl DeviceArbiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `facing` for `owner`.
    ///
    /// Re-claiming a device the owner already holds succeeds. Returns the
    /// current holder when another view has it.
    pub fn claim(&self, facing: LensFacing, owner: ViewId) -> Result<(), ViewId> {
        let mut claims = match self.claims.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match claims.get(&facing) {
            Some(holder) if *holder != owner => Err(*holder),
            _ => {
                claims.insert(facing, owner);
                Ok(())
            }
        }
    }

    /// Release `facing` if `owner` holds it. Returns whether a claim was dropped.
    pub fn release(&self, facing: LensFacing, owner: ViewId) -> bool {
        let mut claims = match self.claims.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if claims.get(&facing) == Some(&owner) {
            claims.remove(&facing);
            true
        } else {
            false
        }
    }

    /// Current holder of `facing`.
    pub fn holder(&self, facing: LensFacing) -> Option<ViewId> {
        let claims = match self.claims.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        claims.get(&facing).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_claim_wins() {
        let arbiter = DeviceArbiter::new();
        assert!(arbiter.claim(LensFacing::Front, ViewId(1)).is_ok());
        assert_eq!(arbiter.claim(LensFacing::Front, ViewId(2)), Err(ViewId(1)));
        assert_eq!(arbiter.holder(LensFacing::Front), Some(ViewId(1)));
    }

    #[test]
    fn test_reclaim_by_holder_is_ok() {
        let arbiter = DeviceArbiter::new();
        arbiter.claim(LensFacing::Front, ViewId(1)).unwrap();
        assert!(arbiter.claim(LensFacing::Front, ViewId(1)).is_ok());
    }

    #[test]
    fn test_release_only_by_holder() {
        let arbiter = DeviceArbiter::new();
        arbiter.claim(LensFacing::Front, ViewId(1)).unwrap();
        assert!(!arbiter.release(LensFacing::Front, ViewId(2)));
        assert!(arbiter.release(LensFacing::Front, ViewId(1)));
        assert!(!arbiter.release(LensFacing::Front, ViewId(1)));
        assert!(arbiter.claim(LensFacing::Front, ViewId(2)).is_ok());
    }

    #[test]
    fn test_clones_share_claims() {
        let arbiter = DeviceArbiter::new();
        let other = arbiter.clone();
        arbiter.claim(LensFacing::Front, ViewId(7)).unwrap();
        assert_eq!(other.holder(LensFacing::Front), Some(ViewId(7)));
    }
}
