use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::dsl::NodeKind;

/// Engine events, delivered through an optional listener channel.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum GraphEngineEvent {
    RunStarted {
        run_id: String,
        resumed: bool,
        timestamp: DateTime<Utc>,
    },
    NodeStarted {
        run_id: String,
        node_id: String,
        kind: NodeKind,
        timestamp: DateTime<Utc>,
    },
    NodeSucceeded {
        run_id: String,
        node_id: String,
        outputs: Value,
        elapsed_ms: u64,
        timestamp: DateTime<Utc>,
    },
    NodeFailed {
        run_id: String,
        node_id: String,
        error: String,
        caught: bool,
        timestamp: DateTime<Utc>,
    },
    NodeSkipped {
        run_id: String,
        node_id: String,
        timestamp: DateTime<Utc>,
    },
    /// Live token stream of a chat answer; other nodes never see it.
    AnswerDelta {
        run_id: String,
        node_id: String,
        text: String,
    },
    RunSuspended {
        run_id: String,
        node_id: String,
        timestamp: DateTime<Utc>,
    },
    RunFinished {
        run_id: String,
        succeeded: bool,
        timestamp: DateTime<Utc>,
    },
}

/// Sender wrapper for engine events, with an atomic active flag so that event
/// emission can be cheaply skipped once the listener goes away.
#[derive(Clone)]
pub struct EventEmitter {
    tx: mpsc::Sender<GraphEngineEvent>,
    active: Arc<AtomicBool>,
}

impl EventEmitter {
    pub fn new(tx: mpsc::Sender<GraphEngineEvent>) -> Self {
        Self {
            tx,
            active: Arc::new(AtomicBool::new(true)),
        }
    }

    #[inline(always)]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }

    pub async fn emit(&self, event: GraphEngineEvent) {
        if self.is_active() && self.tx.send(event).await.is_err() {
            self.active.store(false, Ordering::Relaxed);
        }
    }

    /// Non-blocking emission for synchronous callbacks; drops on a full channel.
    pub fn try_emit(&self, event: GraphEngineEvent) {
        if !self.is_active() {
            return;
        }
        if let Err(mpsc::error::TrySendError::Closed(_)) = self.tx.try_send(event) {
            self.active.store(false, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_emit_and_receive() {
        let (tx, mut rx) = mpsc::channel(4);
        let emitter = EventEmitter::new(tx);
        emitter
            .emit(GraphEngineEvent::NodeSkipped {
                run_id: "r".into(),
                node_id: "n".into(),
                timestamp: Utc::now(),
            })
            .await;
        match rx.recv().await {
            Some(GraphEngineEvent::NodeSkipped { node_id, .. }) => assert_eq!(node_id, "n"),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_closed_channel_deactivates() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let emitter = EventEmitter::new(tx);
        emitter.try_emit(GraphEngineEvent::AnswerDelta {
            run_id: "r".into(),
            node_id: "n".into(),
            text: "hi".into(),
        });
        assert!(!emitter.is_active());
    }

    #[test]
    fn test_event_serialization() {
        let event = GraphEngineEvent::RunFinished {
            run_id: "r".into(),
            succeeded: true,
            timestamp: Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "run_finished");
        assert_eq!(json["succeeded"], true);
    }
}
