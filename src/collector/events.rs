use async_trait::async_trait;
use k8s_openapi::api::core::v1::Event;
use std::sync::Arc;
use tracing::debug;

use super::{record_labels, Collector};
use crate::config::CollectorConfig;
use crate::error::{Error, Result};
use crate::filter::included;
use crate::kubernetes::ClusterApi;
use crate::types::{EventSourceRef, EventStatus, ObjectRef, ResourceKind, ResourceMetrics, ResourceStatus, Severity};

/// Events carry no usage or cost and are dispatched on their own channel.
pub struct EventCollector {
    api: Arc<dyn ClusterApi>,
    config: CollectorConfig,
}

impl EventCollector {
    pub fn new(api: Arc<dyn ClusterApi>, config: CollectorConfig) -> Self {
        Self { api, config }
    }
}

#[async_trait]
impl Collector for EventCollector {
    fn name(&self) -> &'static str {
        "event-collector"
    }

    fn description(&self) -> &'static str {
        "Collects Kubernetes events"
    }

    async fn collect(&self) -> Result<Vec<ResourceMetrics>> {
        let events = self
            .api
            .list_events()
            .await
            .map_err(|e| Error::list(ResourceKind::Event, e))?;

        let records: Vec<_> = events
            .iter()
            .filter(|ev| included(ev.metadata.namespace.as_deref().unwrap_or_default(), &self.config))
            .map(|ev| build_event_record(ev, &self.config))
            .collect();
        debug!(collector = self.name(), count = records.len(), "Collected events");
        Ok(records)
    }
}

pub fn event_status(event: &Event) -> EventStatus {
    let first = event.first_timestamp.as_ref().map(|t| t.0);
    let last = event.last_timestamp.as_ref().map(|t| t.0);
    let duration_seconds = match (first, last) {
        (Some(first), Some(last)) if first < last => (last - first).num_seconds(),
        _ => 0,
    };

    let event_type = event.type_.clone().unwrap_or_default();
    let involved = &event.involved_object;
    let source = event.source.as_ref();

    EventStatus {
        severity: Severity::from_event_type(&event_type),
        event_type,
        reason: event.reason.clone().unwrap_or_default(),
        message: event.message.clone().unwrap_or_default(),
        count: event.count.unwrap_or(0),
        source: EventSourceRef {
            component: source.and_then(|s| s.component.clone()).unwrap_or_default(),
            host: source.and_then(|s| s.host.clone()).unwrap_or_default(),
        },
        involved_object: ObjectRef {
            kind: involved.kind.clone().unwrap_or_default(),
            name: involved.name.clone().unwrap_or_default(),
            namespace: involved.namespace.clone().unwrap_or_default(),
            uid: involved.uid.clone().unwrap_or_default(),
        },
        first_timestamp: first,
        last_timestamp: last,
        duration_seconds,
    }
}

pub fn build_event_record(event: &Event, config: &CollectorConfig) -> ResourceMetrics {
    ResourceMetrics::new(
        ResourceKind::Event,
        event.metadata.name.clone().unwrap_or_default(),
        event.metadata.namespace.clone(),
        record_labels(event.metadata.labels.as_ref(), config),
    )
    .with_status(ResourceStatus::Event(event_status(event)))
}
