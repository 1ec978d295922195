use async_trait::async_trait;
use mk_core::Subscribe;
use mk_model::Event;

use crate::subscriber::view::log_event;

/// Writes every lifecycle and cache event to the log.
#[derive(Debug, Default)]
pub struct Journal;

impl Journal {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Subscribe for Journal {
    async fn on_event(&self, event: &Event) {
        log_event(event);
    }

    fn name(&self) -> &'static str {
        "journal"
    }
}
