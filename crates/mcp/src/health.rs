//! Cached health probes, used as a pre-flight gate for failure-prone servers.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use {
    async_trait::async_trait,
    chrono::{DateTime, Utc},
    dashmap::DashMap,
    serde::Serialize,
    toolgate_common::{Classify, KeyedLocks, SharedClock, to_chrono},
    toolgate_config::HealthConfig,
    tracing::{debug, warn},
};

#[cfg(feature = "metrics")]
use toolgate_metrics::{counter, health as health_metrics, histogram};

use crate::{connector::TransportConnector, error::Result, registry::ServerConfig};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthCheckResult {
    pub server_id: String,
    pub checked_at: DateTime<Utc>,
    pub healthy: bool,
    pub response_time_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Something that can cheaply ask a server whether it is up.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn probe(&self, server: &ServerConfig) -> Result<()>;
}

#[async_trait]
impl HealthProbe for TransportConnector {
    async fn probe(&self, server: &ServerConfig) -> Result<()> {
        TransportConnector::probe(self, server).await
    }
}

#[derive(Debug, Clone, Copy)]
pub struct HealthSettings {
    pub ttl: Duration,
    pub slow_threshold: Duration,
    pub single_flight: bool,
}

impl From<&HealthConfig> for HealthSettings {
    fn from(config: &HealthConfig) -> Self {
        Self {
            ttl: Duration::from_secs(config.ttl_secs),
            slow_threshold: Duration::from_millis(config.slow_threshold_ms),
            single_flight: config.single_flight,
        }
    }
}

pub struct HealthChecker {
    probe: Arc<dyn HealthProbe>,
    cache: DashMap<String, HealthCheckResult>,
    flights: KeyedLocks<String>,
    settings: HealthSettings,
    ttl: chrono::Duration,
    clock: SharedClock,
}

impl HealthChecker {
    pub fn new(probe: Arc<dyn HealthProbe>, settings: HealthSettings, clock: SharedClock) -> Self {
        Self {
            probe,
            cache: DashMap::new(),
            flights: KeyedLocks::new(),
            ttl: to_chrono(settings.ttl),
            settings,
            clock,
        }
    }

    /// Cached result for `server` if younger than the TTL, else a fresh probe.
    /// Failures are cached too.
    pub async fn check(&self, server: &ServerConfig) -> HealthCheckResult {
        if let Some(hit) = self.cached(&server.id) {
            return hit;
        }

        let _flight = if self.settings.single_flight {
            let gate = self.flights.lock(&server.id).await;
            if let Some(hit) = self.cached(&server.id) {
                return hit;
            }
            Some(gate)
        } else {
            None
        };

        let result = self.run_probe(server).await;
        self.cache.insert(server.id.clone(), result.clone());
        result
    }

    async fn run_probe(&self, server: &ServerConfig) -> HealthCheckResult {
        #[cfg(feature = "metrics")]
        counter!(health_metrics::PROBES_TOTAL, "transport" => server.transport.as_str()).increment(1);

        let started = Instant::now();
        let outcome = self.probe.probe(server).await;
        let elapsed = started.elapsed();
        let response_time_ms = elapsed.as_millis() as u64;

        #[cfg(feature = "metrics")]
        histogram!(health_metrics::PROBE_DURATION_SECONDS).record(elapsed.as_secs_f64());

        let error = match outcome {
            // The server answered; only the user can clear this.
            Err(e) if e.kind().needs_user_action() => {
                debug!(server_id = %server.id, error = %e, "probe needs user action, server is up");
                None
            },
            Err(e) => Some(e.to_string()),
            Ok(()) if elapsed >= self.settings.slow_threshold => {
                warn!(
                    server_id = %server.id,
                    elapsed_ms = response_time_ms,
                    threshold_ms = self.settings.slow_threshold.as_millis() as u64,
                    "MCP server is responding slowly"
                );
                Some(format!(
                    "responded in {response_time_ms}ms, over the {}ms threshold",
                    self.settings.slow_threshold.as_millis()
                ))
            },
            Ok(()) => None,
        };

        let healthy = error.is_none();
        if !healthy {
            warn!(server_id = %server.id, error = ?error, "MCP server unhealthy");
            #[cfg(feature = "metrics")]
            counter!(health_metrics::UNHEALTHY_TOTAL).increment(1);
        }

        HealthCheckResult {
            server_id: server.id.clone(),
            checked_at: self.clock.now(),
            healthy,
            response_time_ms,
            error,
        }
    }

    fn cached(&self, server_id: &str) -> Option<HealthCheckResult> {
        let entry = self.cache.get(server_id)?;
        if self.clock.now() - entry.checked_at >= self.ttl {
            return None;
        }
        #[cfg(feature = "metrics")]
        counter!(health_metrics::CACHE_HITS_TOTAL).increment(1);
        Some(entry.clone())
    }

    /// Forget the cached result for a server.
    pub fn invalidate(&self, server_id: &str) {
        self.cache.remove(server_id);
        self.flights.forget(&server_id.to_string());
    }

    #[must_use]
    pub fn cached_result(&self, server_id: &str) -> Option<HealthCheckResult> {
        self.cache.get(server_id).map(|entry| entry.clone())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use {
        super::*,
        crate::{
            error::Error,
            registry::{AuthRequirement, TransportKind},
        },
        std::{
            collections::HashMap,
            sync::atomic::{AtomicUsize, Ordering},
        },
        toolgate_common::ManualClock,
    };

    #[derive(Default)]
    struct CountingProbe {
        calls: AtomicUsize,
        delay: Duration,
        fail: bool,
    }

    #[async_trait]
    impl HealthProbe for CountingProbe {
        async fn probe(&self, _server: &ServerConfig) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self.fail {
                return Err(Error::ConnectionRefused {
                    target: "http://down".into(),
                    reason: "refused".into(),
                });
            }
            Ok(())
        }
    }

    fn server() -> ServerConfig {
        ServerConfig {
            id: "pd".into(),
            owner_id: "u1".into(),
            name: "Pipedream Gmail".into(),
            description: None,
            transport: TransportKind::Pipedream,
            endpoint: "https://mcp.pipedream.net/x/gmail".into(),
            auth: AuthRequirement::None,
            env: HashMap::new(),
        }
    }

    fn settings(single_flight: bool) -> HealthSettings {
        HealthSettings {
            ttl: Duration::from_secs(300),
            slow_threshold: Duration::from_secs(10),
            single_flight,
        }
    }

    #[tokio::test]
    async fn second_check_within_ttl_is_cached() {
        let probe = Arc::new(CountingProbe::default());
        let clock = ManualClock::starting_now();
        let checker = HealthChecker::new(probe.clone(), settings(true), clock.clone());

        let first = checker.check(&server()).await;
        clock.advance(Duration::from_secs(299));
        let second = checker.check(&server()).await;
        assert!(first.healthy);
        assert_eq!(first, second);
        assert_eq!(probe.calls.load(Ordering::SeqCst), 1);

        clock.advance(Duration::from_secs(2));
        checker.check(&server()).await;
        assert_eq!(probe.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failures_are_cached() {
        let probe = Arc::new(CountingProbe {
            fail: true,
            ..Default::default()
        });
        let checker = HealthChecker::new(probe.clone(), settings(true), ManualClock::starting_now());

        let result = checker.check(&server()).await;
        assert!(!result.healthy);
        assert!(result.error.as_deref().unwrap().contains("refused"));
        assert!(!checker.check(&server()).await.healthy);
        assert_eq!(probe.calls.load(Ordering::SeqCst), 1);

        checker.invalidate("pd");
        checker.check(&server()).await;
        assert_eq!(probe.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn concurrent_checks_collapse_into_one_probe() {
        let probe = Arc::new(CountingProbe {
            delay: Duration::from_millis(50),
            ..Default::default()
        });
        let checker = HealthChecker::new(probe.clone(), settings(true), ManualClock::starting_now());
        let srv = server();

        let results = futures::future::join_all((0..5).map(|_| checker.check(&srv))).await;
        assert!(results.iter().all(|r| r.healthy));
        assert_eq!(probe.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn without_single_flight_every_caller_probes() {
        let probe = Arc::new(CountingProbe {
            delay: Duration::from_millis(50),
            ..Default::default()
        });
        let checker =
            HealthChecker::new(probe.clone(), settings(false), ManualClock::starting_now());
        let srv = server();

        futures::future::join_all((0..5).map(|_| checker.check(&srv))).await;
        assert_eq!(probe.calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn slow_probe_is_unhealthy() {
        let probe = Arc::new(CountingProbe {
            delay: Duration::from_millis(30),
            ..Default::default()
        });
        let checker = HealthChecker::new(
            probe,
            HealthSettings {
                slow_threshold: Duration::from_millis(10),
                ..settings(true)
            },
            ManualClock::starting_now(),
        );
        let result = checker.check(&server()).await;
        assert!(!result.healthy);
        assert!(result.response_time_ms >= 30);
        assert!(result.error.unwrap().contains("threshold"));
    }
}
