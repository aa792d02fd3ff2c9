//! Pending authorization states, each redeemable exactly once.

use {
    chrono::{DateTime, Utc},
    dashmap::DashMap,
    tracing::debug,
};

#[cfg(feature = "metrics")]
use toolgate_metrics::{counter, oauth as oauth_metrics};

use crate::{Error, Result, types::OAuthState};

#[derive(Debug, Default)]
pub struct StateStore {
    states: DashMap<String, OAuthState>,
}

impl StateStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, state: OAuthState) {
        self.states.insert(state.state.clone(), state);
    }

    /// Remove and return the state. The removal happens before the expiry
    /// check, so a state can never be redeemed twice even when the two
    /// redemptions race.
    pub fn take(&self, state: &str, now: DateTime<Utc>) -> Result<OAuthState> {
        let Some((_, entry)) = self.states.remove(state) else {
            #[cfg(feature = "metrics")]
            counter!(oauth_metrics::INVALID_STATE_TOTAL).increment(1);
            return Err(Error::InvalidState);
        };
        if entry.is_expired(now) {
            #[cfg(feature = "metrics")]
            counter!(oauth_metrics::INVALID_STATE_TOTAL).increment(1);
            return Err(Error::StateExpired);
        }
        Ok(entry)
    }

    /// Drop every expired state; returns how many were removed.
    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let before = self.states.len();
        self.states.retain(|_, s| !s.is_expired(now));
        let purged = before.saturating_sub(self.states.len());
        if purged > 0 {
            debug!(purged, "purged expired OAuth states");
        }
        purged
    }

    /// Drop pending states for a server that is being deleted.
    pub fn remove_server(&self, server_id: &str) {
        self.states.retain(|_, s| s.server_id != server_id);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.states.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}
