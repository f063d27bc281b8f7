use std::sync::{Arc, Mutex};

use crossbeam_channel::{Receiver, Sender, unbounded};
use serde::Serialize;

/// Lifecycle notifications emitted by the façade.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum BridgeEvent {
    RendererFound { path: String },
    RendererLost { path: String },
}

#[derive(Clone, Default)]
pub struct BridgeEventBus {
    subscribers: Arc<Mutex<Vec<Sender<BridgeEvent>>>>,
}

impl BridgeEventBus {
    pub fn new() -> Self {
        Self {
            subscribers: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn subscribe(&self) -> Receiver<BridgeEvent> {
        let (tx, rx) = unbounded::<BridgeEvent>();
        {
            let mut subscribers = self.subscribers.lock().unwrap();
            subscribers.push(tx);
        }
        rx
    }

    pub(crate) fn broadcast(&self, event: BridgeEvent) {
        let mut subscribers = self.subscribers.lock().unwrap();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dropped_subscribers_are_pruned() {
        let bus = BridgeEventBus::new();
        let keep = bus.subscribe();
        let lose = bus.subscribe();
        drop(lose);

        bus.broadcast(BridgeEvent::RendererFound {
            path: "/org/renderlink/server/0".to_string(),
        });

        assert_eq!(
            keep.try_recv().unwrap(),
            BridgeEvent::RendererFound {
                path: "/org/renderlink/server/0".to_string()
            }
        );
        assert_eq!(bus.subscribers.lock().unwrap().len(), 1);
    }
}
