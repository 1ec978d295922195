use std::sync::Arc;

use async_trait::async_trait;
use mk_model::Event;

/// Receives lifecycle and cache events.
///
/// Implementations must not block; slow work belongs on a separate task.
#[async_trait]
pub trait Subscribe: Send + Sync + 'static {
    async fn on_event(&self, event: &Event);

    fn name(&self) -> &'static str;
}

/// Fan-out of events to every registered subscriber, in registration order.
#[derive(Clone, Default)]
pub struct EventBus {
    subscribers: Arc<Vec<Arc<dyn Subscribe>>>,
}

impl EventBus {
    pub fn new(subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        Self {
            subscribers: Arc::new(subscribers),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.subscribers.iter().map(|s| s.name()).collect()
    }

    pub async fn publish(&self, event: Event) {
        for sub in self.subscribers.iter() {
            sub.on_event(&event).await;
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus").field("subscribers", &self.names()).finish()
    }
}
