//! Error categorization, correlation, retry with backoff, and
//! escalation.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tracing::{debug, warn};

use crate::store::{LogStore, StoreError};

use super::PipelineError;

/// Error categories used for correlation and escalation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    NetworkError,
    PermissionError,
    InstallationError,
    ConfigurationError,
    UnknownError,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::NetworkError => "network_error",
            ErrorCategory::PermissionError => "permission_error",
            ErrorCategory::InstallationError => "installation_error",
            ErrorCategory::ConfigurationError => "configuration_error",
            ErrorCategory::UnknownError => "unknown_error",
        }
    }

    /// Categories that can escalate a deployment to `failed` when they
    /// keep recurring.
    pub fn escalates(&self) -> bool {
        matches!(
            self,
            ErrorCategory::NetworkError
                | ErrorCategory::PermissionError
                | ErrorCategory::InstallationError
        )
    }
}

/// Ordered categorization table; the first rule whose pattern appears in
/// the message wins.
const CATEGORY_RULES: &[(&[&str], ErrorCategory)] = &[
    (&["network", "timeout"], ErrorCategory::NetworkError),
    (&["permission", "access denied"], ErrorCategory::PermissionError),
    (&["installation"], ErrorCategory::InstallationError),
    (&["configuration"], ErrorCategory::ConfigurationError),
];

pub fn categorize(message: &str) -> ErrorCategory {
    for (patterns, category) in CATEGORY_RULES {
        if patterns.iter().any(|pattern| message.contains(pattern)) {
            return *category;
        }
    }
    ErrorCategory::UnknownError
}

/// Aggregate view of one error category. In-memory only; resets with
/// the handler.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorCorrelation {
    pub category: ErrorCategory,
    pub frequency: u64,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    /// Set semantics, kept in insertion order
    pub affected_components: Vec<String>,
}

/// Where an error came from; threaded through handling and retries.
#[derive(Debug, Clone)]
pub struct ErrorContext {
    pub deployment_id: String,
    pub phase_id: Option<String>,
    pub source: String,
    pub component: Option<String>,
}

impl ErrorContext {
    pub fn new(deployment_id: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            deployment_id: deployment_id.into(),
            phase_id: None,
            source: source.into(),
            component: None,
        }
    }

    pub fn with_phase(mut self, phase_id: Option<String>) -> Self {
        self.phase_id = phase_id;
        self
    }

    pub fn with_component(mut self, component: impl Into<String>) -> Self {
        self.component = Some(component.into());
        self
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1_000),
            max_delay: Duration::from_millis(30_000),
        }
    }
}

impl RetryPolicy {
    /// Exponential backoff, capped: `base × 2^(attempt − 1)`, at most
    /// `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Escalation threshold: a recurring category this frequent marks the
/// deployment failed.
const ESCALATION_FREQUENCY: u64 = 3;

/// Single owner of failure policy: categorizes, correlates, retries,
/// escalates. One instance per pipeline, shared by reference.
pub struct ErrorHandler {
    store: Arc<dyn LogStore>,
    correlations: DashMap<ErrorCategory, ErrorCorrelation>,
    retry: RetryPolicy,
}

impl ErrorHandler {
    pub fn new(store: Arc<dyn LogStore>, retry: RetryPolicy) -> Self {
        Self {
            store,
            correlations: DashMap::new(),
            retry,
        }
    }

    /// Handle one failure: correlate it, report it to the store, and
    /// escalate the deployment if its category keeps recurring.
    pub async fn handle_error(
        &self,
        error: &PipelineError,
        context: &ErrorContext,
    ) -> Result<(), StoreError> {
        let message = error.to_string();
        let category = categorize(&message);
        self.update_correlation(category, context);

        self.store
            .track_error(
                &context.deployment_id,
                context.phase_id.as_deref(),
                category.as_str(),
                &context.source,
                &message,
                None,
            )
            .await?;

        if category.escalates() {
            self.escalate_if_frequent(category, &context.deployment_id).await?;
        }

        Ok(())
    }

    /// Run an operation with exponential-backoff retries. Each failed
    /// attempt is reported as a `retry_attempt`; exhaustion routes the
    /// last error through full handling and surfaces the distinct
    /// outer failure.
    pub async fn retry_with_backoff<T, F, Fut>(
        &self,
        mut operation: F,
        context: &ErrorContext,
    ) -> Result<T, PipelineError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, PipelineError>>,
    {
        let mut last_error = None;

        for attempt in 1..=self.retry.max_attempts {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(error) => {
                    let delay = self.retry.delay_for_attempt(attempt);
                    debug!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        source = %context.source,
                        "operation failed, backing off: {error}"
                    );

                    let report = format!("Attempt {attempt} failed: {error}");
                    if let Err(store_error) = self
                        .store
                        .track_error(
                            &context.deployment_id,
                            context.phase_id.as_deref(),
                            "retry_attempt",
                            &context.source,
                            &report,
                            None,
                        )
                        .await
                    {
                        warn!("failed to record retry attempt: {store_error}");
                    }

                    last_error = Some(error);
                    tokio::time::sleep(delay).await;
                }
            }
        }

        if let Some(error) = last_error {
            if let Err(store_error) = self.handle_error(&error, context).await {
                warn!("failed to handle exhausted retry: {store_error}");
            }
        }

        Err(PipelineError::RetryExhausted {
            attempts: self.retry.max_attempts,
        })
    }

    /// Snapshot of the correlation table for metrics and diagnostics.
    pub fn correlations(&self) -> Vec<ErrorCorrelation> {
        self.correlations.iter().map(|entry| entry.value().clone()).collect()
    }

    fn update_correlation(&self, category: ErrorCategory, context: &ErrorContext) {
        let now = Utc::now();
        let mut correlation =
            self.correlations.entry(category).or_insert_with(|| ErrorCorrelation {
                category,
                frequency: 0,
                first_seen: now,
                last_seen: now,
                affected_components: Vec::new(),
            });

        correlation.frequency += 1;
        correlation.last_seen = now;
        if let Some(component) = &context.component {
            if !correlation.affected_components.contains(component) {
                correlation.affected_components.push(component.clone());
            }
        }
    }

    async fn escalate_if_frequent(
        &self,
        category: ErrorCategory,
        deployment_id: &str,
    ) -> Result<(), StoreError> {
        let correlation = match self.correlations.get(&category) {
            Some(entry) => entry.value().clone(),
            None => return Ok(()),
        };
        if correlation.frequency < ESCALATION_FREQUENCY {
            return Ok(());
        }

        warn!(
            category = category.as_str(),
            frequency = correlation.frequency,
            deployment_id,
            "recurring error category, marking deployment failed"
        );
        self.store
            .update_deployment_status(deployment_id, "failed")
            .await?;

        let summary = format!(
            "Frequent {} detected: {} occurrences",
            category.as_str(),
            correlation.frequency
        );
        let snapshot = serde_json::to_string(&correlation).unwrap_or_default();
        self.store
            .track_error(
                deployment_id,
                None,
                "error_correlation",
                "error_handler",
                &summary,
                Some(&snapshot),
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn handler_with_store() -> (ErrorHandler, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let handler = ErrorHandler::new(store.clone(), RetryPolicy::default());
        (handler, store)
    }

    fn parse_error(message: &str) -> PipelineError {
        PipelineError::Parse(crate::parser::model::ParseError::InvalidFormat(
            message.to_string(),
        ))
    }

    #[test]
    fn test_categorize_ordered_first_match_wins() {
        assert_eq!(categorize("network timeout occurred"), ErrorCategory::NetworkError);
        assert_eq!(categorize("access denied on key"), ErrorCategory::PermissionError);
        assert_eq!(
            categorize("installation failed: missing dependencies"),
            ErrorCategory::InstallationError
        );
        assert_eq!(categorize("bad configuration value"), ErrorCategory::ConfigurationError);
        assert_eq!(categorize("something odd"), ErrorCategory::UnknownError);
        // network outranks installation when both patterns appear
        assert_eq!(
            categorize("installation aborted by network outage"),
            ErrorCategory::NetworkError
        );
    }

    #[test]
    fn test_delay_doubles_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(1_000));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(2_000));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(4_000));
        assert_eq!(policy.delay_for_attempt(10), Duration::from_millis(30_000));
    }

    #[tokio::test]
    async fn test_handle_error_tracks_category() {
        let (handler, store) = handler_with_store();
        let context = ErrorContext::new("dep-1", "test").with_phase(Some("phase-1".into()));

        handler
            .handle_error(&parse_error("network timeout occurred"), &context)
            .await
            .unwrap();

        let tracked = store.tracked_errors().await;
        assert_eq!(tracked.len(), 1);
        assert_eq!(tracked[0].category, "network_error");
        assert_eq!(tracked[0].deployment_id, "dep-1");
        assert_eq!(tracked[0].phase_id.as_deref(), Some("phase-1"));
    }

    #[tokio::test]
    async fn test_correlation_counts_and_components() {
        let (handler, _store) = handler_with_store();

        for component in ["agent", "agent", "installer"] {
            let context = ErrorContext::new("dep-1", "test").with_component(component);
            handler
                .handle_error(&parse_error("network unreachable"), &context)
                .await
                .unwrap();
        }

        let correlations = handler.correlations();
        assert_eq!(correlations.len(), 1);
        let network = &correlations[0];
        assert_eq!(network.frequency, 3);
        assert_eq!(network.affected_components, vec!["agent", "installer"]);
        assert!(network.last_seen >= network.first_seen);
    }

    #[tokio::test]
    async fn test_escalation_after_three_components() {
        let (handler, store) = handler_with_store();

        for component in ["network", "installer", "enrollment"] {
            let context = ErrorContext::new("dep-1", "test").with_component(component);
            handler
                .handle_error(&parse_error("installation failed badly"), &context)
                .await
                .unwrap();
        }

        let statuses = store.deployment_statuses().await;
        assert_eq!(statuses, vec![("dep-1".to_string(), "failed".to_string())]);

        let correlation_records: Vec<_> = store
            .tracked_errors()
            .await
            .into_iter()
            .filter(|e| e.category == "error_correlation")
            .collect();
        assert_eq!(correlation_records.len(), 1);
        assert!(correlation_records[0].message.contains("installation_error"));
        assert!(correlation_records[0].stack_trace.is_some());

        let correlations = handler.correlations();
        assert_eq!(correlations[0].frequency, 3);
        assert_eq!(correlations[0].affected_components.len(), 3);
    }

    #[tokio::test]
    async fn test_non_escalating_category_never_updates_deployment() {
        let (handler, store) = handler_with_store();

        for _ in 0..5 {
            let context = ErrorContext::new("dep-1", "test").with_component("mystery");
            handler
                .handle_error(&parse_error("something odd"), &context)
                .await
                .unwrap();
        }

        assert!(store.deployment_statuses().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_succeeds_on_third_attempt() {
        let (handler, _store) = handler_with_store();
        let context = ErrorContext::new("dep-1", "test");

        let attempts = std::sync::Arc::new(std::sync::atomic::AtomicU32::new(0));
        let counter = attempts.clone();

        let result = handler
            .retry_with_backoff(
                move || {
                    let counter = counter.clone();
                    async move {
                        let n = counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1;
                        if n < 3 {
                            Err(parse_error("network blip"))
                        } else {
                            Ok("success")
                        }
                    }
                },
                &context,
            )
            .await;

        assert_eq!(result.unwrap(), "success");
        assert_eq!(attempts.load(std::sync::atomic::Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_exhaustion_is_a_distinct_failure() {
        let (handler, store) = handler_with_store();
        let context = ErrorContext::new("dep-1", "test");

        let attempts = std::sync::Arc::new(std::sync::atomic::AtomicU32::new(0));
        let counter = attempts.clone();

        let result: Result<(), PipelineError> = handler
            .retry_with_backoff(
                move || {
                    let counter = counter.clone();
                    async move {
                        counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                        Err(parse_error("persistent network error"))
                    }
                },
                &context,
            )
            .await;

        assert_eq!(attempts.load(std::sync::atomic::Ordering::SeqCst), 3);
        match result {
            Err(PipelineError::RetryExhausted { attempts }) => assert_eq!(attempts, 3),
            other => panic!("expected RetryExhausted, got {:?}", other),
        }

        // Every attempt was reported, plus the final full handling.
        let tracked = store.tracked_errors().await;
        let retries = tracked.iter().filter(|e| e.category == "retry_attempt").count();
        assert_eq!(retries, 3);
        assert!(tracked.iter().any(|e| e.category == "network_error"));
    }
}
