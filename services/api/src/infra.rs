use std::collections::BTreeMap;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};

use lease_sign::signing::{
    deliver_with_backoff, BackoffPolicy, DocumentRenderer, FieldValue, NotificationDispatcher,
    NotificationEvent, NotifyError, RenderError, RenderedDocument, TemplateSnapshot,
};
use metrics_exporter_prometheus::PrometheusHandle;
use tracing::info;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// Renders an agreement as canonical JSON and fingerprints it with blake3.
/// Deterministic for a given snapshot and value map, which is what the
/// completion check relies on.
#[derive(Default, Clone)]
pub(crate) struct DigestRenderer;

impl DocumentRenderer for DigestRenderer {
    fn render(
        &self,
        snapshot: &TemplateSnapshot,
        values: &BTreeMap<String, FieldValue>,
    ) -> Result<RenderedDocument, RenderError> {
        let bytes = serde_json::to_vec(&serde_json::json!({
            "template": snapshot,
            "values": values,
        }))
        .map_err(|err| RenderError::Rejected(err.to_string()))?;

        let digest = blake3::hash(&bytes).to_hex().to_string();
        Ok(RenderedDocument { bytes, digest })
    }
}

/// Stand-in delivery channel: logs each event instead of sending mail.
#[derive(Default, Clone)]
pub(crate) struct LoggingDispatcher;

impl NotificationDispatcher for LoggingDispatcher {
    fn notify(&self, event: NotificationEvent) -> Result<(), NotifyError> {
        info!(
            key = %event.idempotency_key(),
            recipient = event.recipient.as_deref().unwrap_or("all parties"),
            "notification dispatched"
        );
        Ok(())
    }
}

/// Decorator that hands each event to a background task retrying with
/// backoff, so a flaky downstream never stalls a request handler.
pub(crate) struct RetryingDispatcher {
    inner: Arc<dyn NotificationDispatcher>,
    policy: BackoffPolicy,
}

impl RetryingDispatcher {
    pub(crate) fn new(inner: Arc<dyn NotificationDispatcher>) -> Self {
        Self {
            inner,
            policy: BackoffPolicy::default(),
        }
    }
}

impl NotificationDispatcher for RetryingDispatcher {
    fn notify(&self, event: NotificationEvent) -> Result<(), NotifyError> {
        let dispatcher = self.inner.clone();
        let policy = self.policy;
        tokio::spawn(deliver_with_backoff(dispatcher, event, policy));
        Ok(())
    }
}

/// Collects events in memory for the CLI demo and tests.
#[derive(Default, Clone)]
pub(crate) struct InMemoryDispatcher {
    events: Arc<Mutex<Vec<NotificationEvent>>>,
}

impl InMemoryDispatcher {
    pub(crate) fn events(&self) -> Vec<NotificationEvent> {
        self.events.lock().expect("event mutex poisoned").clone()
    }
}

impl NotificationDispatcher for InMemoryDispatcher {
    fn notify(&self, event: NotificationEvent) -> Result<(), NotifyError> {
        let mut guard = self.events.lock().expect("event mutex poisoned");
        guard.push(event);
        Ok(())
    }
}
