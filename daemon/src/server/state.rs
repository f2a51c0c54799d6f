//! Server state

use std::sync::Arc;

use crate::app::state::AppState;

/// Server state shared across handlers
pub struct ServerState {
    pub app: Arc<AppState>,
}

impl ServerState {
    pub fn new(app: Arc<AppState>) -> Self {
        Self { app }
    }
}
