//! Progress reporting.
//!
//! Delivery is fire-and-forget: a sink that cannot deliver drops the update.

use bindery_core::types::DbId;
use bindery_events::bus::EVENT_BATCH_PROGRESS;
use bindery_events::{EventBus, PlatformEvent};
use serde::Serialize;
use tokio::sync::mpsc;

/// Progress after one item of a batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressUpdate {
    pub batch_id: DbId,
    /// Items processed so far (successful or failed).
    pub current: i32,
    pub total: i32,
    pub message: String,
    pub detail: Option<serde_json::Value>,
}

/// Receiver of progress updates.
pub trait ProgressSink: Send + Sync {
    fn report(&self, update: ProgressUpdate);
}

impl ProgressSink for mpsc::UnboundedSender<ProgressUpdate> {
    fn report(&self, update: ProgressUpdate) {
        // A closed receiver only means nobody is listening any more.
        let _ = self.send(update);
    }
}

impl ProgressSink for EventBus {
    fn report(&self, update: ProgressUpdate) {
        let batch_id = update.batch_id;
        let payload = serde_json::to_value(&update).unwrap_or_default();
        self.publish(
            PlatformEvent::new(EVENT_BATCH_PROGRESS)
                .with_source("batch", batch_id)
                .with_payload(payload),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update() -> ProgressUpdate {
        ProgressUpdate {
            batch_id: 4,
            current: 2,
            total: 5,
            message: "Processed a.cbr".into(),
            detail: None,
        }
    }

    #[test]
    fn channel_sink_ignores_closed_receiver() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        tx.report(update());
    }

    #[tokio::test]
    async fn event_bus_sink_publishes_progress_event() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();

        bus.report(update());

        let event = rx.recv().await.unwrap();
        assert_eq!(event.event_type, EVENT_BATCH_PROGRESS);
        assert_eq!(event.source_entity_id, Some(4));
        assert_eq!(event.payload["current"], 2);
        assert_eq!(event.payload["total"], 5);
    }
}
