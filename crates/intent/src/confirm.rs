//! Time-boxed, single-use confirmations that gate intent execution.

use std::{fmt, sync::Arc, time::Duration};

use {
    chrono::{DateTime, Utc},
    dashmap::DashMap,
    serde::{Deserialize, Serialize},
    tokio::task::JoinHandle,
    tokio_util::sync::CancellationToken,
    toolgate_common::{SharedClock, saturating_add, to_chrono},
    toolgate_config::ConfirmationsConfig,
    tracing::{debug, info},
};

#[cfg(feature = "metrics")]
use toolgate_metrics::{confirmations as confirmation_metrics, counter};

use crate::{
    catalog::IntentKind,
    detector::ServerRef,
    error::{Error, Result},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfirmationStatus {
    Pending,
    Confirmed,
    Cancelled,
    Expired,
}

impl ConfirmationStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
        }
    }
}

impl fmt::Display for ConfirmationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfirmationAction {
    Confirm,
    Cancel,
}

impl ConfirmationAction {
    /// Accepts `confirm`/`yes`/`approve` and `cancel`/`no`/`deny`.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "confirm" | "yes" | "approve" => Some(Self::Confirm),
            "cancel" | "no" | "deny" => Some(Self::Cancel),
            _ => None,
        }
    }

    fn outcome(self) -> ConfirmationStatus {
        match self {
            Self::Confirm => ConfirmationStatus::Confirmed,
            Self::Cancel => ConfirmationStatus::Cancelled,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfirmationRecord {
    pub confirmation_id: String,
    pub user_id: String,
    pub intent_kind: IntentKind,
    pub original_message: String,
    pub candidate_servers: Vec<ServerRef>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub status: ConfirmationStatus,
}

impl ConfirmationRecord {
    #[must_use]
    pub fn involves_server(&self, server_id: &str) -> bool {
        self.candidate_servers.iter().any(|s| s.id == server_id)
    }
}

/// In-memory table of confirmation records.
///
/// Records are lost on restart; the user re-issues the message.
pub struct ConfirmationBroker {
    records: DashMap<String, ConfirmationRecord>,
    ttl: chrono::Duration,
    clock: SharedClock,
}

impl ConfirmationBroker {
    #[must_use]
    pub fn new(ttl: Duration, clock: SharedClock) -> Self {
        Self {
            records: DashMap::new(),
            ttl: to_chrono(ttl),
            clock,
        }
    }

    #[must_use]
    pub fn from_config(config: &ConfirmationsConfig, clock: SharedClock) -> Self {
        Self::new(Duration::from_secs(config.ttl_secs), clock)
    }

    pub fn create(
        &self,
        user_id: &str,
        intent_kind: IntentKind,
        original_message: &str,
        candidate_servers: Vec<ServerRef>,
    ) -> ConfirmationRecord {
        let created_at = self.clock.now();
        let record = ConfirmationRecord {
            confirmation_id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            intent_kind,
            original_message: original_message.to_string(),
            candidate_servers,
            created_at,
            expires_at: saturating_add(created_at, self.ttl),
            status: ConfirmationStatus::Pending,
        };
        self.records
            .insert(record.confirmation_id.clone(), record.clone());

        info!(
            confirmation_id = %record.confirmation_id,
            user_id,
            intent = %intent_kind,
            "confirmation requested"
        );
        #[cfg(feature = "metrics")]
        counter!(confirmation_metrics::CREATED_TOTAL, "intent" => intent_kind.as_str()).increment(1);

        record
    }

    /// Move a pending record to `confirmed` or `cancelled`.
    ///
    /// The transition happens under the record's map entry lock, so of any
    /// number of concurrent resolutions exactly one succeeds.
    pub fn resolve(&self, confirmation_id: &str, action: ConfirmationAction) -> Result<ConfirmationRecord> {
        self.transition(confirmation_id, None, action)
    }

    /// Like [`resolve`](Self::resolve), but records owned by another user
    /// are reported as not found.
    pub fn resolve_for(
        &self,
        user_id: &str,
        confirmation_id: &str,
        action: ConfirmationAction,
    ) -> Result<ConfirmationRecord> {
        self.transition(confirmation_id, Some(user_id), action)
    }

    fn transition(
        &self,
        confirmation_id: &str,
        user_id: Option<&str>,
        action: ConfirmationAction,
    ) -> Result<ConfirmationRecord> {
        let mut entry = self
            .records
            .get_mut(confirmation_id)
            .filter(|entry| user_id.is_none_or(|user| entry.user_id == user))
            .ok_or_else(|| Error::NotFound(confirmation_id.to_string()))?;
        let record = entry.value_mut();

        match record.status {
            ConfirmationStatus::Pending if self.clock.now() > record.expires_at => {
                record.status = ConfirmationStatus::Expired;
                debug!(confirmation_id, "confirmation expired on access");
                #[cfg(feature = "metrics")]
                counter!(confirmation_metrics::EXPIRED_TOTAL).increment(1);
                Err(Error::Expired(confirmation_id.to_string()))
            },
            ConfirmationStatus::Pending => {
                record.status = action.outcome();
                info!(confirmation_id, status = %record.status, "confirmation resolved");
                #[cfg(feature = "metrics")]
                counter!(confirmation_metrics::RESOLVED_TOTAL, "status" => record.status.as_str())
                    .increment(1);
                Ok(record.clone())
            },
            ConfirmationStatus::Expired => Err(Error::Expired(confirmation_id.to_string())),
            status => Err(Error::AlreadyResolved {
                id: confirmation_id.to_string(),
                status,
            }),
        }
    }

    #[must_use]
    pub fn get(&self, confirmation_id: &str) -> Option<ConfirmationRecord> {
        self.records.get(confirmation_id).map(|entry| entry.clone())
    }

    /// Pending, unexpired records for a user, oldest first.
    #[must_use]
    pub fn pending_for_user(&self, user_id: &str) -> Vec<ConfirmationRecord> {
        let now = self.clock.now();
        let mut pending: Vec<ConfirmationRecord> = self
            .records
            .iter()
            .filter(|entry| {
                entry.user_id == user_id
                    && entry.status == ConfirmationStatus::Pending
                    && now <= entry.expires_at
            })
            .map(|entry| entry.clone())
            .collect();
        pending.sort_by_key(|record| record.created_at);
        pending
    }

    /// Drop every record whose candidates include `server_id`.
    pub fn remove_for_server(&self, server_id: &str) -> usize {
        let before = self.records.len();
        self.records
            .retain(|_, record| !record.involves_server(server_id));
        let removed = before.saturating_sub(self.records.len());
        if removed > 0 {
            debug!(server_id, removed, "dropped confirmations for removed server");
        }
        removed
    }

    /// Remove records more than `grace` past their expiry, whatever their
    /// status. Returns how many were removed.
    pub fn reap(&self, grace: Duration) -> usize {
        let grace = to_chrono(grace);
        let now = self.clock.now();
        let before = self.records.len();
        self.records.retain(|_, record| {
            record
                .expires_at
                .checked_add_signed(grace)
                .is_none_or(|deadline| now <= deadline)
        });
        let reaped = before.saturating_sub(self.records.len());
        if reaped > 0 {
            debug!(reaped, "reaped stale confirmations");
            #[cfg(feature = "metrics")]
            counter!(confirmation_metrics::REAPED_TOTAL).increment(reaped as u64);
        }
        reaped
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Periodically [`reap`](Self::reap) until `cancel` fires.
    pub fn spawn_reaper(
        self: Arc<Self>,
        interval: Duration,
        grace: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        self.reap(grace);
                    },
                }
            }
            debug!("confirmation reaper stopped");
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use {
        super::*,
        toolgate_common::{Classify, ErrorKind, ManualClock},
    };

    const TTL: Duration = Duration::from_secs(300);

    fn servers() -> Vec<ServerRef> {
        vec![ServerRef {
            id: "gmail".into(),
            name: "Gmail".into(),
        }]
    }

    #[test]
    fn confirm_is_single_use() {
        let broker = ConfirmationBroker::new(TTL, ManualClock::starting_now());
        let record = broker.create("u1", IntentKind::Email, "send an email", servers());
        assert_eq!(record.status, ConfirmationStatus::Pending);
        assert_eq!(record.expires_at - record.created_at, chrono::Duration::seconds(300));

        let resolved = broker
            .resolve(&record.confirmation_id, ConfirmationAction::Confirm)
            .unwrap();
        assert_eq!(resolved.status, ConfirmationStatus::Confirmed);

        let err = broker
            .resolve(&record.confirmation_id, ConfirmationAction::Confirm)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfirmationAlreadyResolved);
        assert!(err.to_string().contains("confirmed"));

        let err = broker
            .resolve(&record.confirmation_id, ConfirmationAction::Cancel)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfirmationAlreadyResolved);
    }

    #[test]
    fn huge_ttl_saturates_instead_of_overflowing() {
        let clock = ManualClock::starting_now();
        let broker = ConfirmationBroker::new(Duration::from_secs(u64::MAX), clock.clone());
        let record = broker.create("u1", IntentKind::Email, "send an email", servers());
        assert_eq!(record.expires_at, DateTime::<Utc>::MAX_UTC);

        clock.advance(Duration::from_secs(86_400 * 365));
        assert_eq!(broker.reap(Duration::from_secs(u64::MAX)), 0);
        broker
            .resolve(&record.confirmation_id, ConfirmationAction::Confirm)
            .unwrap();
    }

    #[test]
    fn expires_after_ttl() {
        let clock = ManualClock::starting_now();
        let broker = ConfirmationBroker::new(TTL, clock.clone());

        let on_time = broker.create("u1", IntentKind::Email, "a", servers());
        let late = broker.create("u1", IntentKind::Email, "b", servers());
        clock.advance(Duration::from_secs(300));
        assert!(
            broker
                .resolve(&on_time.confirmation_id, ConfirmationAction::Confirm)
                .is_ok()
        );

        clock.advance(Duration::from_secs(1));
        let err = broker
            .resolve(&late.confirmation_id, ConfirmationAction::Confirm)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfirmationExpired);
        assert_eq!(
            broker.get(&late.confirmation_id).unwrap().status,
            ConfirmationStatus::Expired
        );

        // Stays expired rather than turning into "already resolved".
        let err = broker
            .resolve(&late.confirmation_id, ConfirmationAction::Cancel)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfirmationExpired);
    }

    #[test]
    fn unknown_and_foreign_ids_are_not_found() {
        let broker = ConfirmationBroker::new(TTL, ManualClock::starting_now());
        let err = broker
            .resolve("nope", ConfirmationAction::Confirm)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfirmationNotFound);

        let record = broker.create("u1", IntentKind::Calendar, "book", servers());
        let err = broker
            .resolve_for("u2", &record.confirmation_id, ConfirmationAction::Confirm)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfirmationNotFound);
        assert!(
            broker
                .resolve_for("u1", &record.confirmation_id, ConfirmationAction::Cancel)
                .is_ok()
        );
    }

    #[tokio::test]
    async fn concurrent_resolutions_consume_once() {
        let broker = Arc::new(ConfirmationBroker::new(TTL, ManualClock::starting_now()));
        let record = broker.create("u1", IntentKind::Email, "send", servers());

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let broker = Arc::clone(&broker);
                let id = record.confirmation_id.clone();
                let action = if i % 2 == 0 {
                    ConfirmationAction::Confirm
                } else {
                    ConfirmationAction::Cancel
                };
                tokio::spawn(async move { broker.resolve(&id, action) })
            })
            .collect();

        let mut successes = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                successes += 1;
            }
        }
        assert_eq!(successes, 1);
    }

    #[test]
    fn pending_listing_and_server_removal() {
        let clock = ManualClock::starting_now();
        let broker = ConfirmationBroker::new(TTL, clock.clone());
        let first = broker.create("u1", IntentKind::Email, "a", servers());
        clock.advance(Duration::from_secs(1));
        let second = broker.create("u1", IntentKind::WebSearch, "b", vec![ServerRef {
            id: "search".into(),
            name: "Search".into(),
        }]);
        broker.create("u2", IntentKind::Email, "c", servers());

        let pending = broker.pending_for_user("u1");
        assert_eq!(
            pending.iter().map(|r| &r.confirmation_id).collect::<Vec<_>>(),
            vec![&first.confirmation_id, &second.confirmation_id]
        );

        assert_eq!(broker.remove_for_server("gmail"), 2);
        assert_eq!(broker.len(), 1);
        assert!(broker.get(&second.confirmation_id).is_some());
    }

    #[test]
    fn reap_respects_grace() {
        let clock = ManualClock::starting_now();
        let broker = ConfirmationBroker::new(TTL, clock.clone());
        broker.create("u1", IntentKind::Email, "a", servers());

        clock.advance(Duration::from_secs(330));
        assert_eq!(broker.reap(Duration::from_secs(60)), 0);
        clock.advance(Duration::from_secs(31));
        assert_eq!(broker.reap(Duration::from_secs(60)), 1);
        assert!(broker.is_empty());
    }

    #[tokio::test]
    async fn reaper_task_runs_until_cancelled() {
        let clock = ManualClock::starting_now();
        let broker = Arc::new(ConfirmationBroker::new(TTL, clock.clone()));
        broker.create("u1", IntentKind::Email, "a", servers());
        clock.advance(Duration::from_secs(600));

        let cancel = CancellationToken::new();
        let handle = Arc::clone(&broker).spawn_reaper(
            Duration::from_millis(10),
            Duration::from_secs(60),
            cancel.clone(),
        );
        for _ in 0..100 {
            if broker.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(broker.is_empty());

        cancel.cancel();
        handle.await.unwrap();
    }

    #[test]
    fn parses_action_aliases() {
        assert_eq!(ConfirmationAction::parse(" YES "), Some(ConfirmationAction::Confirm));
        assert_eq!(ConfirmationAction::parse("deny"), Some(ConfirmationAction::Cancel));
        assert_eq!(ConfirmationAction::parse("maybe"), None);
    }
}
