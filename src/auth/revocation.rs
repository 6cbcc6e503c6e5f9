use std::{
    collections::HashMap,
    sync::{Arc, PoisonError, RwLock},
};

use uuid::Uuid;

/// Token ids that were logged out before their natural expiry.
///
/// Entries only need to outlive the token they block, so each one is
/// stored with the token's `exp` and dropped once that moment passes.
#[derive(Clone, Default)]
pub struct RevocationList {
    inner: Arc<RwLock<HashMap<Uuid, i64>>>,
}

impl RevocationList {
    pub fn revoke(&self, jti: Uuid, exp: i64, now: i64) {
        let mut map = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        map.retain(|_, until| *until > now);
        if exp > now {
            map.insert(jti, exp);
        }
    }

    pub fn is_revoked(&self, jti: &Uuid, now: i64) -> bool {
        let map = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        matches!(map.get(jti), Some(until) if *until > now)
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).len()
    }
}
