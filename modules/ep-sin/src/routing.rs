use async_trait::async_trait;
use ep_common::envelope::SignalEnvelope;
use ep_common::CoreError;

/// Routing classification of an accepted envelope (§4.1 stages 8-9).
/// Pure classification, no I/O: the same envelope always classifies the
/// same way given the same plane/signal_kind inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutingClass {
    RealtimeDetection,
    AnalyticsStore,
    EvidenceStore,
}

pub fn classify(envelope: &SignalEnvelope) -> RoutingClass {
    use ep_common::envelope::SignalKind;
    match envelope.signal_kind {
        SignalKind::Event if envelope.signal_type.ends_with("_failed") || envelope.signal_type.ends_with("_error") => {
            RoutingClass::RealtimeDetection
        }
        SignalKind::Event => RoutingClass::AnalyticsStore,
        SignalKind::Metric | SignalKind::Trace => RoutingClass::AnalyticsStore,
        SignalKind::Log => RoutingClass::EvidenceStore,
    }
}

/// Sink a normalized envelope is handed to once classified. Each consumer
/// type (alert ingestion, graph projector, audit archive) implements this
/// independently; the pipeline fans out to whichever consumers are wired
/// up for a given `RoutingClass` rather than pushing into a queue it then
/// immediately drains itself.
#[async_trait]
pub trait RoutingConsumer: Send + Sync {
    fn handles(&self, class: RoutingClass) -> bool;
    async fn consume(&self, envelope: &SignalEnvelope) -> Result<(), CoreError>;
}

/// Fan the envelope out to every consumer that handles its class,
/// respecting `max_attempts` per consumer with the shared backoff policy.
/// Returns the consumers whose delivery ultimately failed, in order.
pub async fn fan_out(
    envelope: &SignalEnvelope,
    consumers: &[std::sync::Arc<dyn RoutingConsumer>],
    max_attempts: u32,
) -> Vec<CoreError> {
    let class = classify(envelope);
    let mut failures = Vec::new();

    for consumer in consumers.iter().filter(|c| c.handles(class)) {
        let mut last_err = None;
        for _attempt in 0..max_attempts {
            match consumer.consume(envelope).await {
                Ok(()) => {
                    last_err = None;
                    break;
                }
                Err(e) => {
                    let retry = e.retryable();
                    last_err = Some(e);
                    if !retry {
                        break;
                    }
                }
            }
        }
        if let Some(err) = last_err {
            failures.push(err);
        }
    }

    failures
}
