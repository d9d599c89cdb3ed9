//! Event system for verification engine transitions
//!
//! Every committed state change is published on the bus after its
//! transaction commits. Subscribers are the hook for real delivery
//! (push, email, websocket) of the notification rows the core writes, and
//! the logging listener doubles as an audit trail.

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, trace};

/// Hub events emitted by services
#[derive(Debug, Clone, PartialEq)]
pub enum HubEvent {
    // Proof lifecycle
    ProofSubmitted {
        proof_id: String,
        goal_id: String,
        submitter_id: String,
        required_verifications: i32,
    },
    VoteRecorded {
        proof_id: String,
        verifier_id: String,
        approved: bool,
    },
    ProofApproved {
        proof_id: String,
        milestone_id: Option<String>,
    },
    ProofRejected {
        proof_id: String,
        verifier_id: String,
    },
    ProofExpired {
        proof_id: String,
    },

    // Goal lifecycle
    GoalCreated {
        goal_id: String,
        owner_id: String,
        milestone_count: usize,
    },
    GoalStatusChanged {
        goal_id: String,
        status: String,
    },
    MilestonesFailed {
        goal_id: String,
        count: usize,
    },

    // Social graph
    FriendLinkChanged {
        link_id: String,
        status: String,
    },
    IntervalChangeRequested {
        request_id: String,
        goal_id: String,
    },
    IntervalChangeResolved {
        request_id: String,
        approved: bool,
    },

    // Delivery sink
    NotificationCreated {
        notification_id: String,
        recipient_id: String,
        kind: String,
    },
}

/// Trait for event listeners
pub trait EventListener: Send + Sync {
    fn on_event(&self, event: &HubEvent);
}

/// Event bus for broadcasting hub events
pub struct EventBus {
    sender: broadcast::Sender<HubEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(1024)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Emit an event to all subscribers
    pub fn emit(&self, event: HubEvent) {
        trace!(event = ?event, "Emitting hub event");
        // No subscribers is fine
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<HubEvent> {
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

/// Logging event listener for audit trails
pub struct LoggingEventListener;

impl EventListener for LoggingEventListener {
    fn on_event(&self, event: &HubEvent) {
        match event {
            HubEvent::ProofSubmitted {
                proof_id,
                goal_id,
                required_verifications,
                ..
            } => {
                info!(proof = %proof_id, goal = %goal_id, required = required_verifications, "Proof submitted");
            }
            HubEvent::ProofApproved { proof_id, milestone_id } => {
                info!(proof = %proof_id, milestone = ?milestone_id, "Proof approved");
            }
            HubEvent::ProofRejected { proof_id, verifier_id } => {
                info!(proof = %proof_id, verifier = %verifier_id, "Proof rejected");
            }
            HubEvent::ProofExpired { proof_id } => {
                info!(proof = %proof_id, "Proof expired");
            }
            HubEvent::NotificationCreated {
                recipient_id, kind, ..
            } => {
                debug!(recipient = %recipient_id, kind = %kind, "Notification ready for delivery");
            }
            _ => {
                trace!(event = ?event, "Hub event");
            }
        }
    }
}

/// Spawn a background task that logs all events
pub fn spawn_logging_listener(event_bus: Arc<EventBus>) -> tokio::task::JoinHandle<()> {
    let mut receiver = event_bus.subscribe();
    let listener = LoggingEventListener;

    tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(event) => listener.on_event(&event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    debug!(skipped = n, "Event listener lagged, skipped events");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Event bus closed, stopping listener");
                    break;
                }
            }
        }
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

        bus.emit(HubEvent::ProofExpired {
            proof_id: "p1".into(),
        });

        let event = timeout(Duration::from_millis(100), receiver.recv())
            .await
            .expect("timeout")
            .expect("receive error");

        assert_eq!(event, HubEvent::ProofExpired { proof_id: "p1".into() });
    }

    #[test]
    fn test_event_bus_no_subscribers() {
        let bus = EventBus::new();
        assert_eq!(bus.subscriber_count(), 0);
        bus.emit(HubEvent::ProofExpired { proof_id: "p1".into() });
    }

    #[tokio::test]
    async fn test_logging_listener_stops_when_bus_dropped() {
        let bus = Arc::new(EventBus::new());
        let handle = spawn_logging_listener(bus.clone());
        bus.emit(HubEvent::MilestonesFailed {
            goal_id: "g1".into(),
            count: 2,
        });
        drop(bus);

        timeout(Duration::from_secs(1), handle)
            .await
            .expect("listener did not stop")
            .unwrap();
    }
}
