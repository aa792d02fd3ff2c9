use std::{collections::HashMap, sync::Arc};

use {
    serde_json::Value,
    toolgate_common::Classify,
    toolgate_config::SmtpConfig,
    toolgate_intent::IntentKind,
    tracing::{info, warn},
};

#[cfg(feature = "metrics")]
use toolgate_metrics::{counter, fallback as fallback_metrics};

use crate::{
    email::SmtpEmailFallback,
    error::{Error, Result},
    strategy::{ActionResult, FallbackStrategy},
};

/// Fixed table of intent kind to fallback strategy.
#[derive(Default)]
pub struct FallbackExecutor {
    strategies: HashMap<IntentKind, Arc<dyn FallbackStrategy>>,
}

impl FallbackExecutor {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in table: email intents go straight to SMTP.
    #[must_use]
    pub fn from_config(smtp: &SmtpConfig) -> Self {
        Self::new().with_strategy(IntentKind::Email, Arc::new(SmtpEmailFallback::from_config(smtp)))
    }

    #[must_use]
    pub fn with_strategy(mut self, kind: IntentKind, strategy: Arc<dyn FallbackStrategy>) -> Self {
        self.strategies.insert(kind, strategy);
        self
    }

    #[must_use]
    pub fn has_strategy(&self, kind: IntentKind) -> bool {
        self.strategies.contains_key(&kind)
    }

    /// Kinds whose strategy is registered and ready to run.
    #[must_use]
    pub fn available(&self) -> Vec<IntentKind> {
        let mut kinds: Vec<IntentKind> = self
            .strategies
            .iter()
            .filter(|(_, strategy)| strategy.is_available())
            .map(|(kind, _)| *kind)
            .collect();
        kinds.sort_by_key(|kind| kind.as_str());
        kinds
    }

    pub async fn execute(&self, kind: IntentKind, arguments: &Value) -> Result<ActionResult> {
        let Some(strategy) = self.strategies.get(&kind) else {
            return Err(Error::NoStrategy(kind));
        };

        #[cfg(feature = "metrics")]
        counter!(fallback_metrics::EXECUTIONS_TOTAL, "intent" => kind.as_str(), "strategy" => strategy.name())
            .increment(1);

        info!(intent = %kind, strategy = strategy.name(), "running fallback");
        match strategy.execute(arguments).await {
            Ok(result) => Ok(result),
            Err(e) => {
                warn!(intent = %kind, strategy = strategy.name(), error = %e, error_kind = e.kind().as_str(), "fallback failed");
                #[cfg(feature = "metrics")]
                counter!(fallback_metrics::FAILURES_TOTAL, "intent" => kind.as_str(), "strategy" => strategy.name())
                    .increment(1);
                Err(e)
            },
        }
    }
}
