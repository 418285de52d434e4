use std::sync::Arc;

use crate::services::{control::ControlClient, reconciler::ReconcilerHandle};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub reconciler: ReconcilerHandle,
    pub control: Arc<ControlClient>,
}

impl AppState {
    pub fn new(reconciler: ReconcilerHandle, control: Arc<ControlClient>) -> Self {
        Self { reconciler, control }
    }
}
