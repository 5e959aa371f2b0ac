//! Event system for dispatch operations
//!
//! Every assignment transition and batch run is published on a broadcast bus.
//! Subscribers use it for:
//! - Audit logging
//! - Alerting on trips that need manual intervention
//! - Live dashboards

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, trace, warn};

use crate::db::models::{AssignmentMethod, AssignmentStatus, GuideRole};

const DEFAULT_CAPACITY: usize = 1024;

/// Events emitted by services
#[derive(Debug, Clone)]
pub enum DispatchEvent {
    AssignmentCreated {
        assignment_id: String,
        trip_id: String,
        guide_id: String,
        role: GuideRole,
        method: AssignmentMethod,
    },
    AssignmentConfirmed {
        assignment_id: String,
        trip_id: String,
        guide_id: String,
    },
    AssignmentRejected {
        assignment_id: String,
        trip_id: String,
        guide_id: String,
    },
    /// Retired by the sweep as `auto_reassigned` or `expired`
    AssignmentRetired {
        assignment_id: String,
        trip_id: String,
        guide_id: String,
        status: AssignmentStatus,
    },
    TripCheckedOut {
        assignment_id: String,
        trip_id: String,
        guide_id: String,
        fee_amount: i64,
    },
    SweepCompleted {
        reassigned: u32,
        failed: u32,
        skipped: u32,
    },
    AuditCompleted {
        scope: String,
        total_issues: usize,
        critical_issues: usize,
    },
}

/// Synchronous consumer of dispatch events
pub trait EventListener: Send + Sync {
    fn on_event(&self, event: &DispatchEvent);
}

/// Broadcast channel shared by all services
pub struct EventBus {
    sender: broadcast::Sender<DispatchEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Slow subscribers lag (and skip) once `capacity` events are buffered
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish to current subscribers; a bus nobody listens to drops the event
    pub fn emit(&self, event: DispatchEvent) {
        if let Err(broadcast::error::SendError(event)) = self.sender.send(event) {
            trace!(event = ?event, "No event subscribers");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DispatchEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Writes dispatch events to the tracing log
pub struct LoggingEventListener;

impl EventListener for LoggingEventListener {
    fn on_event(&self, event: &DispatchEvent) {
        match event {
            DispatchEvent::AssignmentCreated { trip_id, guide_id, role, method, .. } => {
                debug!(trip_id = %trip_id, guide_id = %guide_id, role = %role, method = %method, "Assignment created");
            }
            DispatchEvent::AssignmentRetired { trip_id, guide_id, status, .. } => {
                if *status == AssignmentStatus::Expired {
                    warn!(trip_id = %trip_id, guide_id = %guide_id, "Assignment expired after retry cap; trip needs manual assignment");
                } else {
                    debug!(trip_id = %trip_id, guide_id = %guide_id, status = %status, "Assignment retired");
                }
            }
            DispatchEvent::SweepCompleted { reassigned, failed, skipped } => {
                info!(reassigned, failed, skipped, "Sweep completed");
            }
            DispatchEvent::AuditCompleted { scope, total_issues, critical_issues } => {
                info!(scope = %scope, total_issues, critical_issues, "Audit completed");
            }
            _ => {
                trace!(event = ?event, "Dispatch event");
            }
        }
    }
}

/// Run [`LoggingEventListener`] on a background task until the bus closes
pub fn spawn_logging_listener(bus: Arc<EventBus>) -> tokio::task::JoinHandle<()> {
    let receiver = bus.subscribe();
    spawn_listener(receiver, LoggingEventListener)
}

/// Feed every event from `receiver` to `listener`
pub fn spawn_listener<L>(mut receiver: broadcast::Receiver<DispatchEvent>, listener: L) -> tokio::task::JoinHandle<()>
where
    L: EventListener + 'static,
{
    tokio::spawn(async move {
        loop {
            let event = match receiver.recv().await {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    debug!(missed, "Dispatch event listener fell behind");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            };
            listener.on_event(&event);
        }
        debug!("Dispatch event bus closed");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{timeout, Duration};

    #[tokio::test]
    async fn test_event_bus_emit_receive() {
        let bus = EventBus::new();
        let mut receiver = bus.subscribe();

        bus.emit(DispatchEvent::AssignmentConfirmed {
            assignment_id: "a-1".into(),
            trip_id: "t-1".into(),
            guide_id: "g-1".into(),
        });

        let event = timeout(Duration::from_millis(100), receiver.recv())
            .await
            .expect("timeout")
            .expect("receive error");

        match event {
            DispatchEvent::AssignmentConfirmed { assignment_id, trip_id, .. } => {
                assert_eq!(assignment_id, "a-1");
                assert_eq!(trip_id, "t-1");
            }
            _ => panic!("Wrong event type"),
        }
    }

    #[test]
    fn test_event_bus_no_subscribers() {
        let bus = EventBus::new();
        bus.emit(DispatchEvent::SweepCompleted {
            reassigned: 0,
            failed: 0,
            skipped: 0,
        });
        assert_eq!(bus.subscriber_count(), 0);
    }

    struct Counting(Arc<std::sync::atomic::AtomicUsize>);

    impl EventListener for Counting {
        fn on_event(&self, _event: &DispatchEvent) {
            self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_listener_runs_until_bus_closes() {
        let bus = EventBus::new();
        let seen = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let handle = spawn_listener(bus.subscribe(), Counting(seen.clone()));

        for _ in 0..3 {
            bus.emit(DispatchEvent::SweepCompleted { reassigned: 1, failed: 0, skipped: 0 });
        }
        drop(bus);
        timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();

        assert_eq!(seen.load(std::sync::atomic::Ordering::SeqCst), 3);
    }
}
