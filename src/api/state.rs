use std::sync::Arc;

use crate::engine::MonitorEngine;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<MonitorEngine>,
}

impl AppState {
    pub fn new(engine: MonitorEngine) -> Self {
        Self {
            engine: Arc::new(engine),
        }
    }
}
